//! The local view of the player's session.
//!
//! [`SnapshotStore`] holds balance, statistics, open matches and the current
//! match. Everything outside this crate gets read-only access; the only
//! writer is the [`Reconciler`](crate::reconciler::Reconciler), through the
//! crate-private setters below.
//!
//! The current match is held as an `Arc<MatchSnapshot>` and replaced
//! wholesale on every accepted update, so an observer holding a previous
//! `Arc` keeps a consistent old version.

use std::collections::VecDeque;
use std::sync::Arc;

use match_types::{MatchId, MatchStatus, OpenMatch, PlayerStats, Role, RoundResult};

/// The current match as this client sees it. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    /// Server-issued match id.
    pub id: MatchId,
    /// This player's side.
    pub role: Role,
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Stake per player.
    pub stake: u64,
}

impl MatchSnapshot {
    /// Build a snapshot.
    pub fn new(id: MatchId, role: Role, status: MatchStatus, stake: u64) -> Self {
        Self {
            id,
            role,
            status,
            stake,
        }
    }

    /// Copy of this snapshot with a different status.
    pub fn with_status(&self, status: MatchStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Coins and lifetime statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    /// Coin balance.
    pub coins: u64,
    /// Lifetime statistics.
    pub stats: PlayerStats,
    /// True while `coins` is a local prediction not yet confirmed by the
    /// server.
    pub provisional: bool,
}

/// A create, join or cancel the player issued that the server has not
/// confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRequest {
    /// Waiting for `match_created`.
    Create {
        /// Stake the player offered.
        stake: u64,
    },
    /// Waiting for the joined match to start.
    Join {
        /// Match being joined.
        match_id: MatchId,
        /// Stake of that match.
        stake: u64,
    },
    /// Waiting for `match_cancelled`.
    Cancel {
        /// Match being cancelled.
        match_id: MatchId,
    },
}

/// Number of finished match ids remembered for stale detection.
const RETIRED_CAPACITY: usize = 32;

/// Exclusively-owned local view. Written only by the reconciler.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: Option<Arc<MatchSnapshot>>,
    balance: Balance,
    open_matches: Vec<OpenMatch>,
    /// Match whose round result has been consumed.
    concluded: Option<MatchId>,
    /// The last consumed round result. Stats are cumulative, so a repeat of
    /// this exact value is a redelivery.
    last_result: Option<RoundResult>,
    pending: Option<PendingRequest>,
    /// Pulls since `pending` was set that did not settle it.
    pending_misses: u32,
    retired: VecDeque<MatchId>,
    version: u64,
}

impl SnapshotStore {
    /// Create an empty store: no match, zero balance.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current match, if any.
    pub fn current(&self) -> Option<&Arc<MatchSnapshot>> {
        self.current.as_ref()
    }

    /// Status of the current match (`None` when there is none).
    pub fn status(&self) -> MatchStatus {
        self.current
            .as_ref()
            .map(|m| m.status)
            .unwrap_or(MatchStatus::None)
    }

    /// Coins and statistics.
    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    /// Joinable matches from the last pull.
    pub fn open_matches(&self) -> &[OpenMatch] {
        &self.open_matches
    }

    /// Unconfirmed create or join, if any.
    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// The last round result consumed, for any match.
    pub fn last_result(&self) -> Option<&RoundResult> {
        self.last_result.as_ref()
    }

    /// Incremented every time the current match is replaced.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// True when the current match is Waiting or Playing.
    pub fn has_active_match(&self) -> bool {
        self.status().is_active()
    }

    /// True when the current match's round is over: its result was consumed
    /// or the server reports it resolved.
    pub fn is_concluded(&self) -> bool {
        match &self.current {
            Some(current) => {
                current.status == MatchStatus::Resolved
                    || self.concluded.as_ref() == Some(&current.id)
            }
            None => false,
        }
    }

    /// True when the current match's round result has already been consumed.
    pub fn result_consumed(&self) -> bool {
        match (&self.current, &self.concluded) {
            (Some(current), Some(concluded)) => current.id == *concluded,
            _ => false,
        }
    }

    /// True when `id` belongs to a match that was left or superseded.
    pub fn is_retired(&self, id: &MatchId) -> bool {
        self.retired.contains(id)
    }

    pub(crate) fn replace_current(&mut self, next: Option<MatchSnapshot>) -> Option<Arc<MatchSnapshot>> {
        self.version += 1;
        let next = next.map(Arc::new);
        std::mem::replace(&mut self.current, next)
    }

    pub(crate) fn set_balance(&mut self, balance: Balance) {
        self.balance = balance;
    }

    pub(crate) fn set_open_matches(&mut self, open: Vec<OpenMatch>) {
        self.open_matches = open;
    }

    pub(crate) fn mark_concluded(&mut self, id: MatchId, result: RoundResult) {
        self.concluded = Some(id);
        self.last_result = Some(result);
    }

    /// A new pairing starts its stats from zero, so the previous pairing's
    /// last result says nothing about the next one.
    pub(crate) fn forget_result(&mut self) {
        self.last_result = None;
    }

    pub(crate) fn set_pending(&mut self, pending: Option<PendingRequest>) {
        self.pending = pending;
        self.pending_misses = 0;
    }

    /// Count one pull that left `pending` unsettled; returns the new count.
    pub(crate) fn note_pending_miss(&mut self) -> u32 {
        self.pending_misses += 1;
        self.pending_misses
    }

    pub(crate) fn retire(&mut self, id: MatchId) {
        if self.retired.contains(&id) {
            return;
        }
        if self.retired.len() == RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(id);
    }
}
