//! Replay a JSON-lines script through a fresh engine.
//!
//! Each non-blank line that does not start with `#` is one step:
//!
//! ```text
//! {"step":"pull","snapshot":{"coins":100,"stats":{"wins":0,"losses":0,"draws":0,"total_coins_won":0}}}
//! {"step":"action","action":"create_match","stake":10}
//! {"step":"push","event":{"event":"match_created","match_id":"m1"}}
//! {"step":"tick","count":3}
//! ```
//!
//! Every action the engine produces is printed as `<line>: <action>`.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use match_core::{Action, ActionError, EngineConfig, MatchEngine};
use match_types::{MatchId, Move, PullSnapshot, PushEvent};
use serde::Deserialize;

use super::describe_action;
use crate::config::Config;

/// One scripted input.
#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum Step {
    Pull { snapshot: PullSnapshot },
    Push { event: PushEvent },
    Tick {
        #[serde(default = "default_tick_count")]
        count: u32,
    },
    Action(ReplayAction),
}

fn default_tick_count() -> u32 {
    1
}

/// A user action issued against the engine.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ReplayAction {
    CreateMatch { stake: u64 },
    JoinMatch { match_id: MatchId, stake: u64 },
    CancelMatch,
    SubmitMove {
        #[serde(rename = "move")]
        mv: Move,
    },
    RequestRematch,
    LeaveResultView,
    Resync,
}

/// Replay the script at `path` and print to stdout.
pub fn run_file(path: &Path, config: &Config) -> Result<()> {
    let file =
        File::open(path).with_context(|| format!("Failed to open script {}", path.display()))?;
    let stdout = io::stdout();
    run(BufReader::new(file), stdout.lock(), config.engine_config())
}

/// Replay `input` against a new engine, writing one line per action.
pub fn run<R: BufRead, W: Write>(input: R, mut out: W, config: EngineConfig) -> Result<()> {
    let mut engine = MatchEngine::new(config);

    for (index, line) in input.lines().enumerate() {
        let number = index + 1;
        let line = line.context("Failed to read script")?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let step: Step = serde_json::from_str(trimmed)
            .with_context(|| format!("Invalid step on line {number}"))?;
        tracing::debug!(line = number, ?step, "replaying step");

        match apply(&mut engine, step) {
            Ok(actions) => {
                for action in &actions {
                    writeln!(out, "{number}: {}", describe_action(action)?)?;
                }
            }
            Err(StepError::Rejected(err)) => writeln!(out, "{number}: rejected: {err}")?,
            Err(StepError::Invalid(err)) => {
                return Err(err).with_context(|| format!("Invalid snapshot on line {number}"));
            }
        }
    }

    out.flush()?;
    Ok(())
}

enum StepError {
    Rejected(ActionError),
    Invalid(match_types::WireError),
}

fn apply(engine: &mut MatchEngine, step: Step) -> Result<Vec<Action>, StepError> {
    match step {
        Step::Pull { snapshot } => {
            snapshot.validate().map_err(StepError::Invalid)?;
            Ok(engine.apply_pull(snapshot))
        }
        Step::Push { event } => Ok(engine.apply_push(event)),
        Step::Tick { count } => Ok((0..count).flat_map(|_| engine.tick()).collect()),
        Step::Action(action) => {
            let result = match action {
                ReplayAction::CreateMatch { stake } => engine.create_match(stake),
                ReplayAction::JoinMatch { match_id, stake } => engine.join_match(match_id, stake),
                ReplayAction::CancelMatch => engine.cancel_match(),
                ReplayAction::SubmitMove { mv } => engine.submit_move(mv),
                ReplayAction::RequestRematch => engine.request_rematch(),
                ReplayAction::LeaveResultView => engine.leave_result_view(),
                ReplayAction::Resync => Ok(engine.resync()),
            };
            result.map_err(StepError::Rejected)
        }
    }
}
