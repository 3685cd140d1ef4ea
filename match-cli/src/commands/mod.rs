//! CLI command implementations.

pub mod demo;
pub mod replay;
pub mod show_config;

use anyhow::{Context, Result};
use match_core::{Action, Notification};

/// One-line rendering of an engine action.
pub fn describe_action(action: &Action) -> Result<String> {
    Ok(match action {
        Action::Send(intent) => {
            let json = serde_json::to_string(intent).context("Failed to encode intent")?;
            format!("send {json}")
        }
        Action::RequestPull => "pull".to_string(),
        Action::Notify(notification) => format!("notify {}", describe_notification(notification)),
    })
}

/// One-line rendering of a notification.
pub fn describe_notification(notification: &Notification) -> String {
    match notification {
        Notification::MatchChanged(Some(current)) => {
            format!("match {} {} ({:?}, stake {})", current.id, current.status, current.role, current.stake)
        }
        Notification::MatchChanged(None) => "match cleared".to_string(),
        Notification::BalanceChanged(balance) => {
            let marker = if balance.provisional { " (provisional)" } else { "" };
            format!("balance {}{marker}", balance.coins)
        }
        Notification::OpenMatchesChanged(open) => format!("open matches {}", open.len()),
        Notification::MoveTick { remaining, urgent } => {
            let marker = if *urgent { " urgent" } else { "" };
            format!("move {remaining}{marker}")
        }
        Notification::MoveLocked => "move locked".to_string(),
        Notification::RoundResolved { outcome, .. } => format!("round {outcome:?}"),
        Notification::RematchChanged { phase, .. } => format!("rematch {phase:?}"),
        Notification::RematchTick { remaining } => format!("rematch {remaining}"),
    }
}
