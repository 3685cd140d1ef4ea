//! Per-turn move countdown.
//!
//! ```text
//!   Idle ──(match becomes Playing)──► Counting ──(timer expired)──► Locked
//!    ▲                                   │                            │
//!    └──────────(round result / match cleared or replaced)────────────┘
//! ```
//!
//! On a round result the timer is cancelled *before* anything else happens,
//! so an expiry queued for the same logical unit can no longer produce a
//! `move_timeout` intent.

use match_types::{Intent, MatchId, MatchStatus, Move};

use crate::engine::{Action, Notification};
use crate::error::ActionError;
use crate::store::MatchSnapshot;
use crate::timer::{TimerEvent, TimerHandle, TimerService, TimerSlot};

/// Where the move phase is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovePhaseState {
    /// No round is being played.
    Idle,
    /// The countdown is running and moves are accepted.
    Counting,
    /// The countdown ran out; waiting for the server to resolve the round.
    Locked,
}

/// Controller for the move countdown of the current match.
#[derive(Debug)]
pub struct MovePhase {
    state: MovePhaseState,
    match_id: Option<MatchId>,
    timer: Option<TimerHandle>,
    submitted: bool,
    budget: u32,
    urgency_threshold: u32,
}

impl MovePhase {
    /// Create an idle controller.
    pub fn new(budget: u32, urgency_threshold: u32) -> Self {
        Self {
            state: MovePhaseState::Idle,
            match_id: None,
            timer: None,
            submitted: false,
            budget,
            urgency_threshold,
        }
    }

    /// Current state.
    pub fn state(&self) -> MovePhaseState {
        self.state
    }

    /// True once a move was sent for the running round.
    pub fn move_submitted(&self) -> bool {
        self.submitted
    }

    /// React to the current match being replaced in the store.
    pub fn on_match_changed(
        &mut self,
        previous: Option<&MatchSnapshot>,
        current: Option<&MatchSnapshot>,
        timers: &mut TimerService,
    ) -> Vec<Action> {
        match current {
            Some(next) if next.status == MatchStatus::Playing => {
                let entered = match previous {
                    Some(prev) => prev.id != next.id || prev.status != MatchStatus::Playing,
                    None => true,
                };
                if entered {
                    self.begin(next.id.clone(), timers)
                } else {
                    Vec::new()
                }
            }
            _ => {
                self.reset(timers);
                Vec::new()
            }
        }
    }

    /// Route a timer event. Events for other timers are ignored.
    pub fn on_timer(&mut self, event: TimerEvent) -> Vec<Action> {
        if self.timer != Some(event.handle()) {
            return Vec::new();
        }

        match event {
            TimerEvent::Tick { remaining, .. } => vec![self.tick(remaining)],
            TimerEvent::Expired { .. } => {
                self.timer = None;
                self.state = MovePhaseState::Locked;
                let Some(match_id) = self.match_id.clone() else {
                    return vec![Action::Notify(Notification::MoveLocked)];
                };
                tracing::info!(%match_id, "move time expired");
                vec![
                    Action::Send(Intent::MoveTimeout { match_id }),
                    Action::Notify(Notification::MoveLocked),
                ]
            }
        }
    }

    /// The round resolved: stop the countdown and go idle.
    pub fn on_round_result(&mut self, timers: &mut TimerService) {
        self.reset(timers);
    }

    /// Send this player's move for the running round.
    pub fn submit_move(&mut self, mv: Move) -> Result<Vec<Action>, ActionError> {
        if self.state != MovePhaseState::Counting {
            return Err(ActionError::MovesClosed);
        }
        if self.submitted {
            return Err(ActionError::MoveAlreadySubmitted);
        }
        let match_id = self.match_id.clone().ok_or(ActionError::NoCurrentMatch)?;

        self.submitted = true;
        tracing::debug!(%match_id, ?mv, "move submitted");
        Ok(vec![Action::Send(Intent::SubmitMove { match_id, mv })])
    }

    /// Stop the countdown and forget the round.
    pub fn reset(&mut self, timers: &mut TimerService) {
        if let Some(handle) = self.timer.take() {
            timers.cancel(handle);
        }
        self.state = MovePhaseState::Idle;
        self.match_id = None;
        self.submitted = false;
    }

    fn begin(&mut self, match_id: MatchId, timers: &mut TimerService) -> Vec<Action> {
        let (handle, first) = timers.start(TimerSlot::Move, self.budget);
        tracing::debug!(%match_id, budget = self.budget, "move countdown started");

        self.timer = Some(handle);
        self.state = MovePhaseState::Counting;
        self.match_id = Some(match_id);
        self.submitted = false;

        match first {
            TimerEvent::Tick { remaining, .. } => vec![self.tick(remaining)],
            TimerEvent::Expired { .. } => Vec::new(),
        }
    }

    fn tick(&self, remaining: u32) -> Action {
        Action::Notify(Notification::MoveTick {
            remaining,
            urgent: remaining <= self.urgency_threshold,
        })
    }
}
