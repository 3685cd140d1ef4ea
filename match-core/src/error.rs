//! Error and discard types for match-core.

use match_types::MatchId;
use thiserror::Error;

/// A local action the current state does not permit.
///
/// Returned synchronously; no intent is emitted when an action fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// Another match is still waiting or playing.
    #[error("match {0} is still in progress")]
    MatchInProgress(MatchId),

    /// A create or join was issued and has not been confirmed yet.
    #[error("a create or join request is already pending")]
    RequestPending,

    /// Not enough coins for the stake.
    #[error("insufficient coins: stake {stake}, balance {available}")]
    InsufficientCoins {
        /// Requested stake.
        stake: u64,
        /// Current (possibly provisional) balance.
        available: u64,
    },

    /// There is no current match to act on.
    #[error("no current match")]
    NoCurrentMatch,

    /// Moves are only accepted while the countdown is running.
    #[error("moves are not accepted right now")]
    MovesClosed,

    /// This round already has a move from this player.
    #[error("move already submitted for this round")]
    MoveAlreadySubmitted,

    /// Rematch is not offered for the current match.
    #[error("rematch is not available")]
    RematchUnavailable,

    /// This player already asked for a rematch.
    #[error("rematch already requested")]
    RematchAlreadyRequested,

    /// The current match has not concluded yet.
    #[error("match {0} has not concluded")]
    NotConcluded(MatchId),

    /// Only a waiting match this player created can be cancelled.
    #[error("match {0} cannot be cancelled")]
    NotCancellable(MatchId),
}

/// Why the reconciler discarded an update.
///
/// These are not failures: each is absorbed and logged, and the next update
/// is processed normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Proposes an older status than the one stored, or names a retired match.
    #[error("stale update for match {0}")]
    Stale(MatchId),

    /// Names a match unrelated to the current session.
    #[error("foreign match {0}")]
    Foreign(MatchId),

    /// Carries a fact that was already applied.
    #[error("duplicate {0}")]
    Duplicate(&'static str),

    /// Structurally valid but not applicable to the current state.
    #[error("invalid update: {0}")]
    Invalid(String),
}
