//! Merge pulled snapshots and pushed events into the [`SnapshotStore`].
//!
//! The two channels share no sequence number, so ordering is recovered from
//! the data itself:
//!
//! - **Status monotonicity.** For one match id, status only moves forward
//!   (`None < Waiting < Playing < Resolved`). A lower proposal is stale, a
//!   higher one replaces the snapshot, an equal one is a no-op. This absorbs
//!   out-of-order pushes and pulls that lag behind a push.
//! - **Foreign matches.** While the stored match is waiting or playing, an
//!   update naming another match is discarded, unless it is an explicit
//!   rematch supersession or confirms a create/join the player just issued.
//! - **Absolute balances.** Coins and statistics are restated, never sent as
//!   deltas, so the last authoritative value wins and repeats are no-ops.
//! - **Idempotence.** An update that changes nothing yields no
//!   [`StoreChange`], so nothing downstream fires twice.
//!
//! The reconciler owns the store; everyone else reads it through
//! [`Reconciler::store`].

use std::sync::Arc;

use match_types::{
    MatchCancelled, MatchId, MatchStatus, OpenMatch, PullSnapshot, PushEvent, RematchStarted,
    RematchStatusChanged, Role, RoundResult,
};

use crate::error::{ActionError, Rejection};
use crate::store::{Balance, MatchSnapshot, PendingRequest, SnapshotStore};

/// Pulls an unconfirmed create, join or cancel survives before it is
/// dropped. The server answers those requests synchronously, so a request
/// still unseen after this many snapshots was refused or never arrived.
const PENDING_PULL_LIMIT: u32 = 3;

/// One observable effect of a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// The current match snapshot was replaced (or cleared).
    MatchReplaced {
        /// Snapshot before the update.
        previous: Option<Arc<MatchSnapshot>>,
        /// Snapshot after the update.
        current: Option<Arc<MatchSnapshot>>,
    },
    /// Coins or statistics changed.
    BalanceChanged(Balance),
    /// The open-match list changed.
    OpenMatchesChanged(Vec<OpenMatch>),
    /// The current match's round result was consumed for the first time.
    RoundConcluded {
        /// The concluded match.
        match_id: MatchId,
        /// This player's role in it.
        role: Role,
        /// The result to hand to the controllers.
        result: RoundResult,
    },
    /// Rematch flags were reported for the concluded match.
    RematchFlags {
        /// The concluded match.
        match_id: MatchId,
        /// This player's role in it.
        role: Role,
        /// The reported flags.
        flags: RematchStatusChanged,
    },
    /// A match was installed that this client has not joined the push room
    /// of: a confirmed create, or one adopted from a pull.
    RoomJoinRequired(MatchId),
}

/// Outcome of one `apply_*` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    /// Changes actually made, in order. Empty for a no-op.
    pub changes: Vec<StoreChange>,
    /// Why (part of) the update was discarded, if it was.
    pub rejection: Option<Rejection>,
}

impl Reconciled {
    fn rejected(rejection: Rejection) -> Self {
        Self {
            changes: Vec::new(),
            rejection: Some(rejection),
        }
    }

    /// True when nothing changed.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Sole writer of the [`SnapshotStore`].
#[derive(Debug, Default)]
pub struct Reconciler {
    store: SnapshotStore,
}

impl Reconciler {
    /// Create a reconciler over an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the store.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Merge a full pulled snapshot.
    ///
    /// Balance and open matches are authoritative and always applied. The
    /// current-match part goes through the monotonicity rules; if it is
    /// discarded the rejection is reported alongside the other changes.
    pub fn apply_pull(&mut self, snapshot: PullSnapshot) -> Reconciled {
        let mut out = Reconciled::default();
        let pending_before = self.store.pending().cloned();

        let balance = Balance {
            coins: snapshot.coins,
            stats: snapshot.stats,
            provisional: false,
        };
        self.write_balance(balance, &mut out.changes);

        if self.store.open_matches() != snapshot.open_matches.as_slice() {
            self.store.set_open_matches(snapshot.open_matches.clone());
            out.changes
                .push(StoreChange::OpenMatchesChanged(snapshot.open_matches));
        }

        let proposal = snapshot
            .current_match
            .map(|m| MatchSnapshot::new(m.id, m.role, m.status, m.stake));

        match (self.store.current().cloned(), proposal) {
            (None, None) => {}
            (Some(current), None) if self.cancel_pending_for(&current.id) => {
                // The server already dropped the match we asked to cancel.
                self.store.set_pending(None);
                self.clear_current(&current.id, &mut out.changes);
            }
            (Some(current), None) => {
                // A pull without a match while one is held proposes "none",
                // which is never newer than anything stored.
                out.rejection = Some(Rejection::Stale(current.id.clone()));
            }
            (None, Some(proposed)) => {
                if self.store.is_retired(&proposed.id) {
                    out.rejection = Some(Rejection::Stale(proposed.id));
                } else {
                    self.settle_pending(&proposed, None);
                    let id = proposed.id.clone();
                    self.install(proposed, &mut out.changes);
                    out.changes.push(StoreChange::RoomJoinRequired(id));
                }
            }
            (Some(current), Some(proposed)) if current.id == proposed.id => {
                self.settle_pending(&proposed, Some(&current.id));
                if let Err(rejection) = self.advance_same(&current, proposed, &mut out.changes) {
                    out.rejection = Some(rejection);
                }
            }
            (Some(current), Some(proposed)) => {
                if self.store.is_retired(&proposed.id) {
                    out.rejection = Some(Rejection::Stale(proposed.id));
                } else if self.is_replaceable(&current) {
                    // The held match is over and the server already moved
                    // on: adopt its view even if every push was lost.
                    self.settle_pending(&proposed, Some(&current.id));
                    let id = proposed.id.clone();
                    self.install(proposed, &mut out.changes);
                    out.changes.push(StoreChange::RoomJoinRequired(id));
                } else {
                    out.rejection = Some(Rejection::Foreign(proposed.id));
                }
            }
        }

        if pending_before.is_some() && self.store.pending() == pending_before.as_ref() {
            self.note_pending_miss();
        }

        if let Some(rejection) = &out.rejection {
            log_rejection("pull", rejection);
        }
        out
    }

    /// Merge one pushed event.
    pub fn apply_push(&mut self, event: PushEvent) -> Reconciled {
        let name = event.name();
        let out = match event {
            PushEvent::MatchCreated(created) => self.on_match_created(created.match_id),
            PushEvent::MatchStarted(started) => {
                self.on_match_started(started.match_id, started.rematch)
            }
            PushEvent::RoundResult(result) => self.on_round_result(result),
            PushEvent::RematchStatusChanged(flags) => self.on_rematch_flags(flags),
            PushEvent::RematchStarted(started) => self.on_rematch_started(started),
            PushEvent::MatchCancelled(cancelled) => self.on_match_cancelled(cancelled),
            PushEvent::BalanceChanged(balance) => {
                let mut out = Reconciled::default();
                self.write_coins(balance.coins, &mut out.changes);
                out
            }
        };

        if let Some(rejection) = &out.rejection {
            log_rejection(name, rejection);
        } else if out.is_noop() {
            tracing::trace!(event = name, "push changed nothing");
        }
        out
    }

    /// Record a local create: predict the balance and remember the request
    /// until the server confirms it.
    pub fn begin_create(&mut self, stake: u64) -> Result<Vec<StoreChange>, ActionError> {
        self.check_can_start(stake)?;
        self.store.forget_result();
        self.store.set_pending(Some(PendingRequest::Create { stake }));
        Ok(self.predict_spend(stake))
    }

    /// Record a local join of `match_id`.
    pub fn begin_join(&mut self, match_id: MatchId, stake: u64) -> Result<Vec<StoreChange>, ActionError> {
        self.check_can_start(stake)?;
        self.store.forget_result();
        self.store
            .set_pending(Some(PendingRequest::Join { match_id, stake }));
        Ok(self.predict_spend(stake))
    }

    /// Record a cancel of the current match. Only the creator of a match
    /// still waiting for an opponent may cancel it; the match stays until the
    /// server confirms.
    pub fn begin_cancel(&mut self) -> Result<MatchId, ActionError> {
        let current = self
            .store
            .current()
            .cloned()
            .ok_or(ActionError::NoCurrentMatch)?;
        if current.role != Role::Creator || current.status != MatchStatus::Waiting {
            return Err(ActionError::NotCancellable(current.id.clone()));
        }
        if self.store.pending().is_some() {
            return Err(ActionError::RequestPending);
        }
        self.store.set_pending(Some(PendingRequest::Cancel {
            match_id: current.id.clone(),
        }));
        Ok(current.id.clone())
    }

    /// Drop the concluded current match (the player left the result view).
    pub fn leave(&mut self) -> Result<Vec<StoreChange>, ActionError> {
        let current = self
            .store
            .current()
            .cloned()
            .ok_or(ActionError::NoCurrentMatch)?;
        if !self.store.is_concluded() {
            return Err(ActionError::NotConcluded(current.id.clone()));
        }

        let mut changes = Vec::new();
        self.clear_current(&current.id, &mut changes);
        Ok(changes)
    }

    // ---- push handlers ----

    fn on_match_created(&mut self, id: MatchId) -> Reconciled {
        let mut out = Reconciled::default();
        let current = self.store.current().cloned();

        if let Some(current) = &current {
            if current.id == id {
                let proposed = current.with_status(MatchStatus::Waiting);
                if let Err(rejection) = self.advance_same(current, proposed, &mut out.changes) {
                    out.rejection = Some(rejection);
                }
                return out;
            }
        }
        if self.store.is_retired(&id) {
            return Reconciled::rejected(Rejection::Stale(id));
        }

        let stake = match self.store.pending() {
            Some(PendingRequest::Create { stake }) => *stake,
            _ => return Reconciled::rejected(Rejection::Foreign(id)),
        };
        if current.as_ref().is_some_and(|c| !self.is_replaceable(c)) {
            return Reconciled::rejected(Rejection::Foreign(id));
        }

        self.store.set_pending(None);
        self.install(
            MatchSnapshot::new(id.clone(), Role::Creator, MatchStatus::Waiting, stake),
            &mut out.changes,
        );
        out.changes.push(StoreChange::RoomJoinRequired(id));
        out
    }

    fn on_match_started(&mut self, id: MatchId, rematch: bool) -> Reconciled {
        let mut out = Reconciled::default();
        let current = self.store.current().cloned();

        if let Some(current) = &current {
            if current.id == id {
                // An opponent joined before our cancel landed.
                if self.cancel_pending_for(&id) {
                    self.store.set_pending(None);
                }
                let proposed = current.with_status(MatchStatus::Playing);
                if let Err(rejection) = self.advance_same(current, proposed, &mut out.changes) {
                    out.rejection = Some(rejection);
                }
                return out;
            }
        }
        if self.store.is_retired(&id) {
            return Reconciled::rejected(Rejection::Stale(id));
        }

        match (&current, self.store.pending().cloned()) {
            (Some(current), _) if rematch && self.is_replaceable(current) => {
                let next = MatchSnapshot::new(id, current.role, MatchStatus::Playing, current.stake);
                self.install(next, &mut out.changes);
            }
            (_, Some(PendingRequest::Join { match_id, stake })) if match_id == id => {
                if current.as_ref().is_some_and(|c| !self.is_replaceable(c)) {
                    return Reconciled::rejected(Rejection::Foreign(id));
                }
                self.store.set_pending(None);
                self.install(
                    MatchSnapshot::new(id, Role::Joiner, MatchStatus::Playing, stake),
                    &mut out.changes,
                );
            }
            _ => return Reconciled::rejected(Rejection::Foreign(id)),
        }
        out
    }

    fn on_round_result(&mut self, result: RoundResult) -> Reconciled {
        // The frame names no match. Stats are cumulative per pairing, so the
        // same value again is a redelivery, even after a rematch moved on.
        if self.store.last_result() == Some(&result) {
            return Reconciled::rejected(Rejection::Duplicate("round_result"));
        }
        let Some(current) = self.store.current().cloned() else {
            return Reconciled::rejected(Rejection::Invalid(
                "round result without a current match".into(),
            ));
        };
        if self.store.result_consumed() {
            return Reconciled::rejected(Rejection::Duplicate("round_result"));
        }

        self.store.mark_concluded(current.id.clone(), result.clone());
        Reconciled {
            changes: vec![StoreChange::RoundConcluded {
                match_id: current.id.clone(),
                role: current.role,
                result,
            }],
            rejection: None,
        }
    }

    fn on_rematch_flags(&mut self, flags: RematchStatusChanged) -> Reconciled {
        let Some(current) = self.store.current().cloned() else {
            return Reconciled::rejected(Rejection::Invalid(
                "rematch status without a current match".into(),
            ));
        };
        if !self.store.is_concluded() {
            return Reconciled::rejected(Rejection::Invalid(format!(
                "rematch status for match {} before its round concluded",
                current.id
            )));
        }
        Reconciled {
            changes: vec![StoreChange::RematchFlags {
                match_id: current.id.clone(),
                role: current.role,
                flags,
            }],
            rejection: None,
        }
    }

    fn on_rematch_started(&mut self, started: RematchStarted) -> Reconciled {
        let mut out = Reconciled::default();
        self.write_coins(started.coins, &mut out.changes);

        let id = started.match_id;
        let Some(current) = self.store.current().cloned() else {
            out.rejection = Some(Rejection::Foreign(id));
            return out;
        };

        if current.id == id {
            let mut proposed = current.with_status(MatchStatus::Playing);
            if let Some(stake) = started.stake {
                proposed.stake = stake;
            }
            if let Err(rejection) = self.advance_same(&current, proposed, &mut out.changes) {
                out.rejection = Some(rejection);
            }
        } else if self.store.is_retired(&id) {
            out.rejection = Some(Rejection::Stale(id));
        } else if self.is_replaceable(&current) {
            let next = MatchSnapshot::new(
                id,
                started.role.unwrap_or(current.role),
                MatchStatus::Playing,
                started.stake.unwrap_or(current.stake),
            );
            self.install(next, &mut out.changes);
        } else {
            out.rejection = Some(Rejection::Foreign(id));
        }
        out
    }

    fn on_match_cancelled(&mut self, cancelled: MatchCancelled) -> Reconciled {
        let mut out = Reconciled::default();
        self.write_coins(cancelled.coins, &mut out.changes);

        let id = cancelled.match_id;
        match self.store.current().cloned() {
            Some(current) if current.id == id => {
                if self.cancel_pending_for(&id) {
                    self.store.set_pending(None);
                }
                self.clear_current(&id, &mut out.changes);
            }
            _ if self.store.is_retired(&id) => out.rejection = Some(Rejection::Stale(id)),
            _ => out.rejection = Some(Rejection::Foreign(id)),
        }
        out
    }

    // ---- shared rules ----

    /// Apply the monotonicity rule to a proposal for the stored match id.
    fn advance_same(
        &mut self,
        current: &Arc<MatchSnapshot>,
        proposed: MatchSnapshot,
        changes: &mut Vec<StoreChange>,
    ) -> Result<(), Rejection> {
        if proposed.status < current.status {
            return Err(Rejection::Stale(proposed.id));
        }
        if **current == proposed {
            return Ok(());
        }
        let previous = self.store.replace_current(Some(proposed));
        changes.push(StoreChange::MatchReplaced {
            previous,
            current: self.store.current().cloned(),
        });
        Ok(())
    }

    /// Install a different match, retiring whatever was held.
    fn install(&mut self, next: MatchSnapshot, changes: &mut Vec<StoreChange>) {
        if let Some(current) = self.store.current() {
            self.store.retire(current.id.clone());
        }
        tracing::debug!(match_id = %next.id, status = %next.status, "installing match");
        let previous = self.store.replace_current(Some(next));
        changes.push(StoreChange::MatchReplaced {
            previous,
            current: self.store.current().cloned(),
        });
    }

    /// Retire the current match `id` and leave no match behind.
    fn clear_current(&mut self, id: &MatchId, changes: &mut Vec<StoreChange>) {
        tracing::debug!(match_id = %id, "clearing match");
        self.store.retire(id.clone());
        let previous = self.store.replace_current(None);
        changes.push(StoreChange::MatchReplaced {
            previous,
            current: None,
        });
    }

    /// A held match may give way to another once it no longer needs the
    /// player: resolved, or its round result already consumed.
    fn is_replaceable(&self, current: &MatchSnapshot) -> bool {
        !current.status.is_active() || self.store.is_concluded()
    }

    /// Clear the pending request if a pulled match answers it. `held` is
    /// the id of the match stored before this pull.
    fn settle_pending(&mut self, proposed: &MatchSnapshot, held: Option<&MatchId>) {
        let settled = match self.store.pending() {
            Some(PendingRequest::Create { .. }) => {
                held != Some(&proposed.id) && proposed.role == Role::Creator
            }
            Some(PendingRequest::Join { match_id, .. }) => *match_id == proposed.id,
            // Refused once the match moved past waiting.
            Some(PendingRequest::Cancel { match_id }) => {
                *match_id != proposed.id || proposed.status > MatchStatus::Waiting
            }
            None => false,
        };
        if settled {
            self.store.set_pending(None);
        }
    }

    fn cancel_pending_for(&self, id: &MatchId) -> bool {
        matches!(self.store.pending(), Some(PendingRequest::Cancel { match_id }) if match_id == id)
    }

    fn note_pending_miss(&mut self) {
        if self.store.note_pending_miss() < PENDING_PULL_LIMIT {
            return;
        }
        if let Some(pending) = self.store.pending() {
            tracing::info!(?pending, pulls = PENDING_PULL_LIMIT, "unconfirmed request dropped");
        }
        self.store.set_pending(None);
    }

    fn check_can_start(&self, stake: u64) -> Result<(), ActionError> {
        if let Some(current) = self.store.current() {
            if current.status.is_active() && !self.store.is_concluded() {
                return Err(ActionError::MatchInProgress(current.id.clone()));
            }
        }
        if self.store.pending().is_some() {
            return Err(ActionError::RequestPending);
        }
        let available = self.store.balance().coins;
        if available < stake {
            return Err(ActionError::InsufficientCoins { stake, available });
        }
        Ok(())
    }

    fn predict_spend(&mut self, stake: u64) -> Vec<StoreChange> {
        let mut balance = *self.store.balance();
        balance.coins = balance.coins.saturating_sub(stake);
        balance.provisional = true;
        self.store.set_balance(balance);
        vec![StoreChange::BalanceChanged(balance)]
    }

    fn write_coins(&mut self, coins: u64, changes: &mut Vec<StoreChange>) {
        let balance = Balance {
            coins,
            provisional: false,
            ..*self.store.balance()
        };
        self.write_balance(balance, changes);
    }

    fn write_balance(&mut self, balance: Balance, changes: &mut Vec<StoreChange>) {
        if *self.store.balance() != balance {
            self.store.set_balance(balance);
            changes.push(StoreChange::BalanceChanged(balance));
        }
    }
}

fn log_rejection(source: &str, rejection: &Rejection) {
    match rejection {
        Rejection::Stale(_) | Rejection::Duplicate(_) => {
            tracing::debug!(source, %rejection, "update discarded");
        }
        Rejection::Foreign(_) | Rejection::Invalid(_) => {
            tracing::warn!(source, %rejection, "update discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use match_types::{
        BalanceChanged, CurrentMatch, MatchCreated, MatchStarted, MatchStats, Move, PlayerStats,
        Winner,
    };

    fn pull(coins: u64, current: Option<(&str, Role, MatchStatus, u64)>) -> PullSnapshot {
        PullSnapshot {
            coins,
            stats: PlayerStats::default(),
            open_matches: vec![],
            current_match: current.map(|(id, role, status, stake)| CurrentMatch {
                id: MatchId::new(id),
                role,
                status,
                stake,
            }),
        }
    }

    fn started(id: &str, rematch: bool) -> PushEvent {
        PushEvent::MatchStarted(MatchStarted {
            match_id: MatchId::new(id),
            rematch,
        })
    }

    fn result(can_rematch: bool) -> PushEvent {
        PushEvent::RoundResult(RoundResult {
            creator_move: Move::Rock,
            joiner_move: Move::Scissors,
            winner: Winner::Player1,
            stats: MatchStats {
                creator_wins: 1,
                joiner_wins: 0,
                draws: 0,
            },
            can_rematch,
        })
    }

    fn rematch_started(id: &str, coins: u64) -> PushEvent {
        PushEvent::RematchStarted(RematchStarted {
            match_id: MatchId::new(id),
            coins,
            role: None,
            stake: None,
        })
    }

    fn with_playing(id: &str) -> Reconciler {
        let mut r = Reconciler::new();
        r.apply_pull(pull(100, Some((id, Role::Creator, MatchStatus::Waiting, 10))));
        r.apply_push(started(id, false));
        r
    }

    #[test]
    fn pull_installs_snapshot_and_balance() {
        let mut r = Reconciler::new();
        let out = r.apply_pull(pull(100, Some(("m1", Role::Creator, MatchStatus::Waiting, 10))));

        assert!(out.rejection.is_none());
        assert_eq!(r.store().balance().coins, 100);
        let current = r.store().current().unwrap();
        assert_eq!(current.id, MatchId::new("m1"));
        assert_eq!(current.status, MatchStatus::Waiting);
        assert!(out
            .changes
            .iter()
            .any(|c| matches!(c, StoreChange::MatchReplaced { .. })));
    }

    #[test]
    fn higher_status_push_replaces_snapshot() {
        let r = with_playing("m1");
        assert_eq!(r.store().status(), MatchStatus::Playing);
    }

    #[test]
    fn stale_pull_leaves_snapshot_unchanged() {
        let mut r = with_playing("m1");
        let before = Arc::clone(r.store().current().unwrap());

        let out = r.apply_pull(pull(100, Some(("m1", Role::Creator, MatchStatus::Waiting, 10))));

        assert_eq!(out.rejection, Some(Rejection::Stale(MatchId::new("m1"))));
        assert!(Arc::ptr_eq(&before, r.store().current().unwrap()));
    }

    #[test]
    fn stale_pull_still_applies_authoritative_balance() {
        let mut r = with_playing("m1");
        let out = r.apply_pull(pull(80, Some(("m1", Role::Creator, MatchStatus::Waiting, 10))));

        assert_eq!(r.store().balance().coins, 80);
        assert_eq!(r.store().status(), MatchStatus::Playing);
        assert!(out.rejection.is_some());
    }

    #[test]
    fn status_sequence_is_non_decreasing_under_shuffled_delivery() {
        let mut r = Reconciler::new();
        let updates: Vec<Box<dyn Fn(&mut Reconciler)>> = vec![
            Box::new(|r| {
                r.apply_pull(pull(100, Some(("m1", Role::Creator, MatchStatus::Playing, 10))));
            }),
            Box::new(|r| {
                r.apply_pull(pull(100, Some(("m1", Role::Creator, MatchStatus::Waiting, 10))));
            }),
            Box::new(|r| {
                r.apply_pull(pull(100, Some(("m1", Role::Creator, MatchStatus::Resolved, 10))));
            }),
            Box::new(|r| {
                r.apply_push(started("m1", false));
            }),
            Box::new(|r| {
                r.apply_pull(pull(100, Some(("m1", Role::Creator, MatchStatus::Waiting, 10))));
            }),
        ];

        let mut seen = vec![r.store().status()];
        for update in &updates {
            update(&mut r);
            seen.push(r.store().status());
        }

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "status regressed: {:?}", seen);
        assert_eq!(r.store().status(), MatchStatus::Resolved);
    }

    #[test]
    fn duplicate_push_is_a_noop() {
        let mut r = with_playing("m1");
        let out = r.apply_push(started("m1", false));

        assert!(out.is_noop());
        assert!(out.rejection.is_none());
    }

    #[test]
    fn foreign_match_push_is_discarded_while_active() {
        let mut r = with_playing("m1");
        let out = r.apply_push(started("mX", false));

        assert_eq!(out.rejection, Some(Rejection::Foreign(MatchId::new("mX"))));
        assert_eq!(r.store().current().unwrap().id, MatchId::new("m1"));
    }

    #[test]
    fn rematch_signal_is_rejected_while_round_still_open() {
        let mut r = with_playing("m1");
        let out = r.apply_push(started("m2", true));

        assert_eq!(out.rejection, Some(Rejection::Foreign(MatchId::new("m2"))));
    }

    #[test]
    fn rematch_started_supersedes_concluded_match() {
        let mut r = with_playing("m1");
        r.apply_push(result(true));

        let out = r.apply_push(rematch_started("m2", 90));

        assert!(out.rejection.is_none());
        let current = r.store().current().unwrap();
        assert_eq!(current.id, MatchId::new("m2"));
        assert_eq!(current.status, MatchStatus::Playing);
        assert_eq!(current.role, Role::Creator);
        assert_eq!(current.stake, 10);
        assert_eq!(r.store().balance().coins, 90);
        assert!(r.store().is_retired(&MatchId::new("m1")));
        assert!(!r.store().is_concluded());
    }

    #[test]
    fn rematch_match_started_after_rematch_started_is_a_noop() {
        let mut r = with_playing("m1");
        r.apply_push(result(true));
        r.apply_push(rematch_started("m2", 90));

        let out = r.apply_push(started("m2", true));
        assert!(out.is_noop());
        assert!(out.rejection.is_none());
    }

    #[test]
    fn superseded_match_cannot_come_back_via_lagging_pull() {
        let mut r = with_playing("m1");
        r.apply_push(result(true));
        r.apply_push(rematch_started("m2", 90));

        let out = r.apply_pull(pull(90, Some(("m1", Role::Creator, MatchStatus::Playing, 10))));

        assert_eq!(out.rejection, Some(Rejection::Stale(MatchId::new("m1"))));
        assert_eq!(r.store().current().unwrap().id, MatchId::new("m2"));
    }

    #[test]
    fn round_result_is_consumed_once() {
        let mut r = with_playing("m1");

        let first = r.apply_push(result(true));
        let second = r.apply_push(result(true));

        assert!(matches!(
            first.changes.as_slice(),
            [StoreChange::RoundConcluded { .. }]
        ));
        assert_eq!(second.rejection, Some(Rejection::Duplicate("round_result")));
        // Result does not move status on its own.
        assert_eq!(r.store().status(), MatchStatus::Playing);
    }

    #[test]
    fn rematch_flags_before_result_are_invalid() {
        let mut r = with_playing("m1");
        let out = r.apply_push(PushEvent::RematchStatusChanged(RematchStatusChanged {
            creator_requested: true,
            joiner_requested: false,
        }));
        assert!(matches!(out.rejection, Some(Rejection::Invalid(_))));
    }

    #[test]
    fn absolute_balance_updates_are_idempotent() {
        let mut r = Reconciler::new();
        let push = PushEvent::BalanceChanged(BalanceChanged { coins: 42 });

        let first = r.apply_push(push.clone());
        let second = r.apply_push(push);

        assert_eq!(first.changes.len(), 1);
        assert!(second.is_noop());
    }

    #[test]
    fn optimistic_spend_is_overwritten_by_pull() {
        let mut r = Reconciler::new();
        r.apply_pull(pull(100, None));

        r.begin_create(10).unwrap();
        assert_eq!(r.store().balance().coins, 90);
        assert!(r.store().balance().provisional);

        r.apply_pull(pull(95, None));
        assert_eq!(r.store().balance().coins, 95);
        assert!(!r.store().balance().provisional);
    }

    #[test]
    fn match_created_requires_pending_create() {
        let mut r = Reconciler::new();
        r.apply_pull(pull(100, None));

        let foreign = r.apply_push(PushEvent::MatchCreated(MatchCreated {
            match_id: MatchId::new("m1"),
        }));
        assert_eq!(foreign.rejection, Some(Rejection::Foreign(MatchId::new("m1"))));

        r.begin_create(10).unwrap();
        let out = r.apply_push(PushEvent::MatchCreated(MatchCreated {
            match_id: MatchId::new("m1"),
        }));

        assert!(out
            .changes
            .contains(&StoreChange::RoomJoinRequired(MatchId::new("m1"))));
        let current = r.store().current().unwrap();
        assert_eq!(current.role, Role::Creator);
        assert_eq!(current.status, MatchStatus::Waiting);
        assert_eq!(current.stake, 10);
        assert!(r.store().pending().is_none());
    }

    #[test]
    fn join_is_confirmed_by_match_started() {
        let mut r = Reconciler::new();
        r.apply_pull(pull(100, None));
        r.begin_join(MatchId::new("m5"), 20).unwrap();

        r.apply_push(started("m5", false));

        let current = r.store().current().unwrap();
        assert_eq!(current.role, Role::Joiner);
        assert_eq!(current.status, MatchStatus::Playing);
        assert_eq!(current.stake, 20);
    }

    #[test]
    fn cannot_start_while_match_in_progress() {
        let mut r = with_playing("m1");
        assert_eq!(
            r.begin_create(5),
            Err(ActionError::MatchInProgress(MatchId::new("m1")))
        );
    }

    #[test]
    fn cannot_stake_more_than_balance() {
        let mut r = Reconciler::new();
        r.apply_pull(pull(5, None));
        assert_eq!(
            r.begin_create(10),
            Err(ActionError::InsufficientCoins {
                stake: 10,
                available: 5
            })
        );
    }

    #[test]
    fn leave_requires_concluded_match_and_retires_it() {
        let mut r = with_playing("m1");
        assert_eq!(r.leave(), Err(ActionError::NotConcluded(MatchId::new("m1"))));

        r.apply_push(result(false));
        r.leave().unwrap();

        assert!(r.store().current().is_none());
        let out = r.apply_pull(pull(100, Some(("m1", Role::Creator, MatchStatus::Resolved, 10))));
        assert_eq!(out.rejection, Some(Rejection::Stale(MatchId::new("m1"))));
        assert!(r.store().current().is_none());
    }

    #[test]
    fn pull_heals_lost_rematch_pushes() {
        let mut r = with_playing("m1");
        r.apply_pull(pull(100, Some(("m1", Role::Creator, MatchStatus::Resolved, 10))));

        let out = r.apply_pull(pull(90, Some(("m2", Role::Creator, MatchStatus::Playing, 10))));

        assert!(out.rejection.is_none());
        assert_eq!(r.store().current().unwrap().id, MatchId::new("m2"));
    }

    #[test]
    fn pull_without_match_does_not_clear_held_match() {
        let mut r = with_playing("m1");
        let out = r.apply_pull(pull(100, None));

        assert_eq!(out.rejection, Some(Rejection::Stale(MatchId::new("m1"))));
        assert_eq!(r.store().status(), MatchStatus::Playing);
    }

    fn waiting_creator(id: &str) -> Reconciler {
        let mut r = Reconciler::new();
        r.apply_pull(pull(100, None));
        r.begin_create(10).unwrap();
        r.apply_push(PushEvent::MatchCreated(MatchCreated {
            match_id: MatchId::new(id),
        }));
        r
    }

    fn cancelled(id: &str, coins: u64) -> PushEvent {
        PushEvent::MatchCancelled(MatchCancelled {
            match_id: MatchId::new(id),
            coins,
        })
    }

    // ===========================================
    // Round result redelivery
    // ===========================================

    #[test]
    fn redelivered_result_after_rematch_is_a_duplicate() {
        let mut r = with_playing("m1");
        r.apply_push(result(true));
        r.apply_push(rematch_started("m2", 90));

        let out = r.apply_push(result(true));

        assert_eq!(out.rejection, Some(Rejection::Duplicate("round_result")));
        assert!(out.is_noop());
        assert!(!r.store().is_concluded());
        assert_eq!(r.store().current().unwrap().id, MatchId::new("m2"));
    }

    #[test]
    fn next_rematch_round_result_is_accepted() {
        let mut r = with_playing("m1");
        r.apply_push(result(true));
        r.apply_push(rematch_started("m2", 90));

        let out = r.apply_push(PushEvent::RoundResult(RoundResult {
            creator_move: Move::Rock,
            joiner_move: Move::Scissors,
            winner: Winner::Player1,
            stats: MatchStats {
                creator_wins: 2,
                joiner_wins: 0,
                draws: 0,
            },
            can_rematch: true,
        }));

        assert!(out.rejection.is_none());
        assert!(r.store().is_concluded());
    }

    #[test]
    fn new_pairing_accepts_result_equal_to_previous_one() {
        let mut r = with_playing("m1");
        r.apply_push(result(false));
        r.leave().unwrap();

        r.begin_join(MatchId::new("m8"), 10).unwrap();
        r.apply_push(started("m8", false));
        let out = r.apply_push(result(false));

        assert!(out.rejection.is_none());
        assert!(r.store().is_concluded());
    }

    #[test]
    fn result_without_match_is_invalid_unless_redelivered() {
        let mut r = with_playing("m1");
        r.apply_push(result(false));
        r.leave().unwrap();

        let again = r.apply_push(result(false));
        assert_eq!(again.rejection, Some(Rejection::Duplicate("round_result")));

        let mut fresh = Reconciler::new();
        let out = fresh.apply_push(result(false));
        assert!(matches!(out.rejection, Some(Rejection::Invalid(_))));
    }

    // ===========================================
    // Unconfirmed requests
    // ===========================================

    #[test]
    fn refused_join_expires_after_pulls_without_the_match() {
        let mut r = Reconciler::new();
        r.apply_pull(pull(100, None));
        r.begin_join(MatchId::new("m3"), 10).unwrap();

        for _ in 1..PENDING_PULL_LIMIT {
            r.apply_pull(pull(100, None));
        }
        assert!(r.store().pending().is_some());
        assert_eq!(r.begin_create(10), Err(ActionError::RequestPending));

        r.apply_pull(pull(100, None));

        assert!(r.store().pending().is_none());
        assert!(!r.store().balance().provisional);
        assert!(r.begin_create(10).is_ok());
    }

    #[test]
    fn unsent_create_expires_after_pulls() {
        let mut r = Reconciler::new();
        r.apply_pull(pull(50, None));
        r.begin_create(20).unwrap();

        for _ in 0..PENDING_PULL_LIMIT {
            r.apply_pull(pull(50, None));
        }

        assert!(r.store().pending().is_none());
        assert_eq!(r.store().balance().coins, 50);
    }

    #[test]
    fn pull_of_held_concluded_match_does_not_settle_create() {
        let mut r = with_playing("m1");
        r.apply_push(result(false));
        r.begin_create(10).unwrap();

        r.apply_pull(pull(90, Some(("m1", Role::Creator, MatchStatus::Resolved, 10))));
        assert!(r.store().pending().is_some());

        let out = r.apply_push(PushEvent::MatchCreated(MatchCreated {
            match_id: MatchId::new("m2"),
        }));
        assert!(out.rejection.is_none());
        assert_eq!(r.store().current().unwrap().id, MatchId::new("m2"));
    }

    // ===========================================
    // Open matches
    // ===========================================

    #[test]
    fn open_match_list_is_replaced_and_repeats_are_silent() {
        let mut r = Reconciler::new();
        let with_open = |open: Vec<OpenMatch>| PullSnapshot {
            open_matches: open,
            ..pull(100, None)
        };
        let listed = vec![
            OpenMatch {
                id: MatchId::new("o1"),
                stake: 5,
            },
            OpenMatch {
                id: MatchId::new("o2"),
                stake: 20,
            },
        ];

        let first = r.apply_pull(with_open(listed.clone()));
        assert!(first
            .changes
            .contains(&StoreChange::OpenMatchesChanged(listed.clone())));

        let repeat = r.apply_pull(with_open(listed.clone()));
        assert!(repeat.is_noop());

        let shrunk = vec![listed[1].clone()];
        let replaced = r.apply_pull(with_open(shrunk.clone()));
        assert_eq!(
            replaced.changes,
            vec![StoreChange::OpenMatchesChanged(shrunk.clone())]
        );
        assert_eq!(r.store().open_matches(), shrunk.as_slice());
    }

    // ===========================================
    // Cancel
    // ===========================================

    #[test]
    fn cancel_only_for_waiting_match_created_here() {
        assert_eq!(Reconciler::new().begin_cancel(), Err(ActionError::NoCurrentMatch));

        let mut playing = with_playing("m1");
        assert_eq!(
            playing.begin_cancel(),
            Err(ActionError::NotCancellable(MatchId::new("m1")))
        );

        let mut joiner = Reconciler::new();
        joiner.apply_pull(pull(100, Some(("m2", Role::Joiner, MatchStatus::Waiting, 10))));
        assert_eq!(
            joiner.begin_cancel(),
            Err(ActionError::NotCancellable(MatchId::new("m2")))
        );

        let mut r = waiting_creator("m3");
        assert_eq!(r.begin_cancel(), Ok(MatchId::new("m3")));
        assert_eq!(r.begin_cancel(), Err(ActionError::RequestPending));
        assert_eq!(r.store().status(), MatchStatus::Waiting);
    }

    #[test]
    fn match_cancelled_clears_match_and_refunds() {
        let mut r = waiting_creator("m3");
        r.begin_cancel().unwrap();

        let out = r.apply_push(cancelled("m3", 100));

        assert!(out.rejection.is_none());
        assert!(r.store().current().is_none());
        assert!(r.store().pending().is_none());
        assert_eq!(r.store().balance().coins, 100);
        assert!(!r.store().balance().provisional);
        assert!(r.store().is_retired(&MatchId::new("m3")));

        let late = r.apply_pull(pull(100, Some(("m3", Role::Creator, MatchStatus::Waiting, 10))));
        assert_eq!(late.rejection, Some(Rejection::Stale(MatchId::new("m3"))));
        assert!(r.begin_create(10).is_ok());
    }

    #[test]
    fn pull_without_match_confirms_pending_cancel() {
        let mut r = waiting_creator("m3");
        r.begin_cancel().unwrap();

        let out = r.apply_pull(pull(100, None));

        assert!(out.rejection.is_none());
        assert!(r.store().current().is_none());
        assert!(r.store().pending().is_none());
    }

    #[test]
    fn opponent_joining_first_refuses_cancel() {
        let mut r = waiting_creator("m3");
        r.begin_cancel().unwrap();

        r.apply_push(started("m3", false));

        assert!(r.store().pending().is_none());
        assert_eq!(r.store().status(), MatchStatus::Playing);
        let out = r.apply_pull(pull(90, None));
        assert_eq!(out.rejection, Some(Rejection::Stale(MatchId::new("m3"))));
    }

    #[test]
    fn cancel_of_unknown_match_is_foreign() {
        let mut r = with_playing("m1");
        let out = r.apply_push(cancelled("m9", 70));

        assert_eq!(out.rejection, Some(Rejection::Foreign(MatchId::new("m9"))));
        assert_eq!(r.store().current().unwrap().id, MatchId::new("m1"));
    }
}
