//! The match engine: reconciler, timers and both controllers behind one API.
//!
//! Every operation returns the [`Action`]s the runtime must perform. Store
//! changes are routed to the controllers in the order the reconciler
//! produced them, so a round result always cancels the move countdown
//! before anything else sees it.

use std::sync::Arc;

use match_types::{Intent, MatchId, Move, OpenMatch, Outcome, PullSnapshot, PushEvent, RoundResult};

use crate::error::ActionError;
use crate::move_phase::{MovePhase, MovePhaseState};
use crate::reconciler::{Reconciler, StoreChange};
use crate::rematch::{RematchNegotiation, RematchPhase, RematchState};
use crate::store::{Balance, MatchSnapshot, SnapshotStore};
use crate::timer::{TimerService, TimerSlot};

/// Timing configuration, in logical time units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Units a player has to move.
    pub move_budget: u32,
    /// Remaining units at or below which the move countdown is urgent.
    pub urgency_threshold: u32,
    /// Units a rematch offer stays open.
    pub rematch_budget: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            move_budget: 10,
            urgency_threshold: 3,
            rematch_budget: 30,
        }
    }
}

impl EngineConfig {
    /// Set the move budget.
    pub fn with_move_budget(mut self, units: u32) -> Self {
        self.move_budget = units;
        self
    }

    /// Set the urgency threshold.
    pub fn with_urgency_threshold(mut self, units: u32) -> Self {
        self.urgency_threshold = units;
        self
    }

    /// Set the rematch offer window.
    pub fn with_rematch_budget(mut self, units: u32) -> Self {
        self.rematch_budget = units;
        self
    }
}

/// Something the runtime must do.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send an intent to the authority.
    Send(Intent),
    /// Pull a fresh snapshot now.
    RequestPull,
    /// Tell observers.
    Notify(Notification),
}

/// What observers (the view) are told.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The current match was replaced or cleared.
    MatchChanged(Option<Arc<MatchSnapshot>>),
    /// Coins or statistics changed.
    BalanceChanged(Balance),
    /// The open-match list changed.
    OpenMatchesChanged(Vec<OpenMatch>),
    /// Move countdown progress.
    MoveTick {
        /// Units left.
        remaining: u32,
        /// At or below the urgency threshold.
        urgent: bool,
    },
    /// Move time ran out; moves are disabled.
    MoveLocked,
    /// The round was resolved.
    RoundResolved {
        /// Server result.
        result: RoundResult,
        /// Result from this player's perspective.
        outcome: Outcome,
    },
    /// Rematch negotiation changed.
    RematchChanged {
        /// New phase.
        phase: RematchPhase,
        /// Flags and deadline.
        state: RematchState,
    },
    /// Rematch window progress.
    RematchTick {
        /// Units left.
        remaining: u32,
    },
}

/// The whole client-side match lifecycle, free of I/O.
#[derive(Debug)]
pub struct MatchEngine {
    config: EngineConfig,
    reconciler: Reconciler,
    timers: TimerService,
    move_phase: MovePhase,
    rematch: RematchNegotiation,
    /// Push room this client last asked to join.
    joined_room: Option<MatchId>,
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl MatchEngine {
    /// Create an engine with an empty store.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            reconciler: Reconciler::new(),
            timers: TimerService::new(),
            move_phase: MovePhase::new(config.move_budget, config.urgency_threshold),
            rematch: RematchNegotiation::new(config.rematch_budget),
            joined_room: None,
        }
    }

    /// Timing configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read-only view of the reconciled state.
    pub fn store(&self) -> &SnapshotStore {
        self.reconciler.store()
    }

    /// Move countdown state.
    pub fn move_phase(&self) -> MovePhaseState {
        self.move_phase.state()
    }

    /// Units left on the move countdown, if running.
    pub fn move_remaining(&self) -> Option<u32> {
        self.timers.remaining(TimerSlot::Move)
    }

    /// Rematch negotiation phase.
    pub fn rematch_phase(&self) -> RematchPhase {
        self.rematch.phase()
    }

    /// Rematch flags and deadline.
    pub fn rematch_state(&self) -> RematchState {
        self.rematch.state()
    }

    /// Current logical time.
    pub fn now(&self) -> u64 {
        self.timers.now()
    }

    /// Reconcile a full pulled snapshot.
    pub fn apply_pull(&mut self, snapshot: PullSnapshot) -> Vec<Action> {
        let reconciled = self.reconciler.apply_pull(snapshot);
        self.route(reconciled.changes)
    }

    /// Reconcile one pushed event.
    pub fn apply_push(&mut self, event: PushEvent) -> Vec<Action> {
        let reconciled = self.reconciler.apply_push(event);
        self.route(reconciled.changes)
    }

    /// Advance logical time by one unit and deliver timer events.
    pub fn tick(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        for event in self.timers.advance() {
            match event.handle().slot() {
                TimerSlot::Move => actions.extend(self.move_phase.on_timer(event)),
                TimerSlot::Rematch => actions.extend(self.rematch.on_timer(event)),
            }
        }
        actions
    }

    /// Open a new match with `stake`.
    pub fn create_match(&mut self, stake: u64) -> Result<Vec<Action>, ActionError> {
        let changes = self.reconciler.begin_create(stake)?;
        let mut actions = self.route(changes);
        actions.push(Action::Send(Intent::CreateMatch { stake }));
        tracing::info!(stake, "creating match");
        Ok(actions)
    }

    /// Join the open match `match_id` at `stake`.
    pub fn join_match(&mut self, match_id: MatchId, stake: u64) -> Result<Vec<Action>, ActionError> {
        let changes = self.reconciler.begin_join(match_id.clone(), stake)?;
        let mut actions = self.route(changes);
        tracing::info!(%match_id, stake, "joining match");
        actions.push(Action::Send(Intent::JoinMatch {
            match_id: match_id.clone(),
        }));
        actions.extend(self.join_room(match_id));
        Ok(actions)
    }

    /// Withdraw the waiting match this player created. The match stays until
    /// the server confirms with `match_cancelled` or a pull no longer shows it.
    pub fn cancel_match(&mut self) -> Result<Vec<Action>, ActionError> {
        let match_id = self.reconciler.begin_cancel()?;
        tracing::info!(%match_id, "cancelling match");
        Ok(vec![Action::Send(Intent::CancelMatch { match_id })])
    }

    /// Submit this player's move for the running round.
    pub fn submit_move(&mut self, mv: Move) -> Result<Vec<Action>, ActionError> {
        if self.store().current().is_none() {
            return Err(ActionError::NoCurrentMatch);
        }
        self.move_phase.submit_move(mv)
    }

    /// Ask for, or accept, a rematch of the concluded match.
    pub fn request_rematch(&mut self) -> Result<Vec<Action>, ActionError> {
        self.rematch.request(&mut self.timers)
    }

    /// Leave the result view: end negotiation and drop the concluded match.
    pub fn leave_result_view(&mut self) -> Result<Vec<Action>, ActionError> {
        let changes = self.reconciler.leave()?;
        let mut actions = self.rematch.reset(&mut self.timers);
        actions.extend(self.route(changes));
        Ok(actions)
    }

    /// Catch up after (re)connecting: pull now and re-join the match room.
    ///
    /// The room is re-joined even if it was joined before the connection
    /// dropped, since the server forgets room membership with the socket.
    pub fn resync(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::RequestPull];
        self.joined_room = None;
        if let Some(current) = self.store().current() {
            let match_id = current.id.clone();
            actions.extend(self.join_room(match_id));
        }
        actions
    }

    /// Stop every timer and reset both controllers. Later ticks are silent.
    pub fn teardown(&mut self) {
        self.timers.cancel_all();
        self.move_phase.reset(&mut self.timers);
        self.rematch.reset(&mut self.timers);
        tracing::debug!("engine torn down");
    }

    fn join_room(&mut self, match_id: MatchId) -> Option<Action> {
        if self.joined_room.as_ref() == Some(&match_id) {
            return None;
        }
        self.joined_room = Some(match_id.clone());
        Some(Action::Send(Intent::JoinRoom { match_id }))
    }

    fn route(&mut self, changes: Vec<StoreChange>) -> Vec<Action> {
        let mut actions = Vec::new();
        for change in changes {
            match change {
                StoreChange::MatchReplaced { previous, current } => {
                    let superseded = match (&previous, &current) {
                        (Some(prev), Some(next)) => prev.id != next.id,
                        (Some(_), None) => true,
                        (None, _) => false,
                    };
                    actions.push(Action::Notify(Notification::MatchChanged(current.clone())));
                    if superseded {
                        actions.extend(self.rematch.reset(&mut self.timers));
                    }
                    actions.extend(self.move_phase.on_match_changed(
                        previous.as_deref(),
                        current.as_deref(),
                        &mut self.timers,
                    ));
                }
                StoreChange::BalanceChanged(balance) => {
                    actions.push(Action::Notify(Notification::BalanceChanged(balance)));
                }
                StoreChange::OpenMatchesChanged(open) => {
                    actions.push(Action::Notify(Notification::OpenMatchesChanged(open)));
                }
                StoreChange::RoundConcluded {
                    match_id,
                    role,
                    result,
                } => {
                    self.move_phase.on_round_result(&mut self.timers);
                    let outcome = result.outcome_for(role);
                    let can_rematch = result.can_rematch;
                    tracing::info!(%match_id, ?outcome, can_rematch, "round resolved");
                    actions.push(Action::Notify(Notification::RoundResolved { result, outcome }));
                    actions.extend(self.rematch.on_round_result(
                        match_id,
                        role,
                        can_rematch,
                        &mut self.timers,
                    ));
                }
                StoreChange::RematchFlags { match_id, flags, .. } => {
                    actions.extend(self.rematch.on_flags(&match_id, flags, &mut self.timers));
                }
                StoreChange::RoomJoinRequired(match_id) => {
                    actions.extend(self.join_room(match_id));
                }
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use match_types::{
        CurrentMatch, MatchCancelled, MatchCreated, MatchStarted, MatchStats, MatchStatus,
        PlayerStats, RematchStarted, RematchStatusChanged, Role, Winner,
    };

    fn pull(coins: u64, current: Option<(&str, Role, MatchStatus)>) -> PullSnapshot {
        PullSnapshot {
            coins,
            stats: PlayerStats::default(),
            open_matches: vec![],
            current_match: current.map(|(id, role, status)| CurrentMatch {
                id: MatchId::new(id),
                role,
                status,
                stake: 10,
            }),
        }
    }

    fn started(id: &str) -> PushEvent {
        PushEvent::MatchStarted(MatchStarted {
            match_id: MatchId::new(id),
            rematch: false,
        })
    }

    fn result(can_rematch: bool) -> PushEvent {
        PushEvent::RoundResult(RoundResult {
            creator_move: Move::Paper,
            joiner_move: Move::Rock,
            winner: Winner::Player1,
            stats: MatchStats {
                creator_wins: 1,
                joiner_wins: 0,
                draws: 0,
            },
            can_rematch,
        })
    }

    fn flags(creator: bool, joiner: bool) -> PushEvent {
        PushEvent::RematchStatusChanged(RematchStatusChanged {
            creator_requested: creator,
            joiner_requested: joiner,
        })
    }

    fn sent(actions: &[Action]) -> Vec<Intent> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(intent) => Some(intent.clone()),
                _ => None,
            })
            .collect()
    }

    fn move_ticks(actions: &[Action]) -> Vec<u32> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Notify(Notification::MoveTick { remaining, .. }) => Some(*remaining),
                _ => None,
            })
            .collect()
    }

    fn ticks(engine: &mut MatchEngine, units: u32) -> Vec<Action> {
        (0..units).flat_map(|_| engine.tick()).collect()
    }

    /// Creator of m1, round in progress.
    fn playing_engine() -> MatchEngine {
        let mut engine = MatchEngine::default();
        engine.apply_pull(pull(100, Some(("m1", Role::Creator, MatchStatus::Waiting))));
        engine.apply_push(started("m1"));
        engine
    }

    // ========================================================================
    // Full lifecycle
    // ========================================================================

    #[test]
    fn rematch_scenario_moves_to_the_new_match() {
        let mut engine = playing_engine();
        assert_eq!(engine.move_phase(), MovePhaseState::Counting);

        engine.submit_move(Move::Paper).unwrap();
        ticks(&mut engine, 4);
        engine.apply_push(result(true));
        assert_eq!(engine.move_phase(), MovePhaseState::Idle);

        let actions = engine.request_rematch().unwrap();
        assert_eq!(
            sent(&actions),
            vec![Intent::RematchRequest {
                match_id: MatchId::new("m1")
            }]
        );
        assert_eq!(engine.rematch_phase(), RematchPhase::SelfOffered);

        engine.apply_push(flags(true, true));
        assert_eq!(engine.rematch_phase(), RematchPhase::BothAccepted);

        let actions = engine.apply_push(PushEvent::RematchStarted(RematchStarted {
            match_id: MatchId::new("m2"),
            coins: 90,
            role: None,
            stake: None,
        }));

        let current = engine.store().current().unwrap();
        assert_eq!(current.id, MatchId::new("m2"));
        assert_eq!(current.status, MatchStatus::Playing);
        assert_eq!(engine.store().balance().coins, 90);
        assert_eq!(engine.rematch_phase(), RematchPhase::Inactive);
        assert_eq!(engine.rematch_state(), RematchState::default());
        assert_eq!(engine.move_phase(), MovePhaseState::Counting);
        assert_eq!(move_ticks(&actions), vec![10]);
        assert!(sent(&actions).is_empty());
    }

    #[test]
    fn create_flow_joins_room_and_starts_countdown() {
        let mut engine = MatchEngine::default();
        engine.apply_pull(pull(100, None));

        let actions = engine.create_match(10).unwrap();
        assert_eq!(sent(&actions), vec![Intent::CreateMatch { stake: 10 }]);
        assert_eq!(engine.store().balance().coins, 90);
        assert!(engine.store().balance().provisional);

        let actions = engine.apply_push(PushEvent::MatchCreated(MatchCreated {
            match_id: MatchId::new("m7"),
        }));
        assert_eq!(
            sent(&actions),
            vec![Intent::JoinRoom {
                match_id: MatchId::new("m7")
            }]
        );
        assert_eq!(engine.move_phase(), MovePhaseState::Idle);

        engine.apply_push(started("m7"));
        assert_eq!(engine.move_phase(), MovePhaseState::Counting);
    }

    #[test]
    fn join_flow_sends_join_and_room_intents() {
        let mut engine = MatchEngine::default();
        engine.apply_pull(pull(100, None));

        let actions = engine.join_match(MatchId::new("m3"), 25).unwrap();

        assert_eq!(
            sent(&actions),
            vec![
                Intent::JoinMatch {
                    match_id: MatchId::new("m3")
                },
                Intent::JoinRoom {
                    match_id: MatchId::new("m3")
                },
            ]
        );
        assert_eq!(engine.store().balance().coins, 75);
    }

    #[test]
    fn failed_action_sends_nothing() {
        let mut engine = playing_engine();
        assert_eq!(
            engine.create_match(10),
            Err(ActionError::MatchInProgress(MatchId::new("m1")))
        );
        assert_eq!(engine.request_rematch(), Err(ActionError::RematchUnavailable));
        assert_eq!(engine.store().balance().coins, 100);
    }

    // ========================================================================
    // Idempotence and exclusivity
    // ========================================================================

    #[test]
    fn duplicate_push_does_not_restart_countdown() {
        let mut engine = playing_engine();
        ticks(&mut engine, 3);

        let actions = engine.apply_push(started("m1"));

        assert!(actions.is_empty());
        assert_eq!(engine.move_remaining(), Some(7));
    }

    #[test]
    fn duplicate_round_result_is_reported_once() {
        let mut engine = playing_engine();

        let first = engine.apply_push(result(true));
        let second = engine.apply_push(result(true));

        assert!(first
            .iter()
            .any(|a| matches!(a, Action::Notify(Notification::RoundResolved { .. }))));
        assert!(second.is_empty());
    }

    #[test]
    fn redelivered_result_does_not_end_rematch_round() {
        let mut engine = playing_engine();
        engine.apply_push(result(true));
        engine.request_rematch().unwrap();
        engine.apply_push(PushEvent::RematchStarted(RematchStarted {
            match_id: MatchId::new("m2"),
            coins: 90,
            role: None,
            stake: None,
        }));
        ticks(&mut engine, 2);

        let actions = engine.apply_push(result(true));

        assert!(actions.is_empty());
        assert_eq!(engine.move_phase(), MovePhaseState::Counting);
        assert_eq!(engine.move_remaining(), Some(8));
        assert_eq!(engine.request_rematch(), Err(ActionError::RematchUnavailable));
        assert!(engine.submit_move(Move::Rock).is_ok());
    }

    #[test]
    fn one_move_countdown_across_matches() {
        let mut engine = playing_engine();
        ticks(&mut engine, 5);
        engine.apply_push(result(true));
        engine.apply_push(PushEvent::MatchStarted(MatchStarted {
            match_id: MatchId::new("m2"),
            rematch: true,
        }));

        let actions = engine.tick();
        assert_eq!(move_ticks(&actions), vec![9]);
    }

    #[test]
    fn stale_pull_produces_no_actions() {
        let mut engine = playing_engine();

        let actions = engine.apply_pull(pull(100, Some(("m1", Role::Creator, MatchStatus::Waiting))));

        assert!(actions.is_empty());
        assert_eq!(engine.store().status(), MatchStatus::Playing);
        assert_eq!(engine.move_phase(), MovePhaseState::Counting);
    }

    // ========================================================================
    // Timeouts
    // ========================================================================

    #[test]
    fn expiry_sends_single_timeout() {
        let mut engine = playing_engine();

        let actions = ticks(&mut engine, 20);

        assert_eq!(
            sent(&actions),
            vec![Intent::MoveTimeout {
                match_id: MatchId::new("m1")
            }]
        );
        assert_eq!(engine.move_phase(), MovePhaseState::Locked);
    }

    #[test]
    fn result_between_zero_and_expiry_suppresses_timeout() {
        let mut engine = playing_engine();
        ticks(&mut engine, 10);
        assert_eq!(engine.move_remaining(), Some(0));

        engine.apply_push(result(false));
        let actions = ticks(&mut engine, 5);

        assert!(sent(&actions).is_empty());
    }

    #[test]
    fn rematch_offer_expires_after_budget() {
        let mut engine = MatchEngine::new(EngineConfig::default().with_rematch_budget(3));
        engine.apply_pull(pull(100, Some(("m1", Role::Joiner, MatchStatus::Playing))));
        engine.apply_push(result(true));
        engine.apply_push(flags(true, false));
        assert_eq!(engine.rematch_phase(), RematchPhase::PeerOffered);

        let actions = ticks(&mut engine, 4);

        assert_eq!(engine.rematch_phase(), RematchPhase::Expired);
        assert!(sent(&actions).is_empty());
        assert_eq!(engine.request_rematch(), Err(ActionError::RematchUnavailable));
    }

    // ========================================================================
    // Session control
    // ========================================================================

    #[test]
    fn leaving_result_view_clears_match() {
        let mut engine = playing_engine();
        assert!(engine.leave_result_view().is_err());

        engine.apply_push(result(true));
        engine.request_rematch().unwrap();
        let actions = engine.leave_result_view().unwrap();

        assert!(engine.store().current().is_none());
        assert_eq!(engine.rematch_phase(), RematchPhase::Inactive);
        assert!(actions.contains(&Action::Notify(Notification::MatchChanged(None))));
        assert!(ticks(&mut engine, 40).is_empty());
    }

    #[test]
    fn cancel_flow_clears_waiting_match() {
        let mut engine = MatchEngine::default();
        engine.apply_pull(pull(100, None));
        engine.create_match(10).unwrap();
        engine.apply_push(PushEvent::MatchCreated(MatchCreated {
            match_id: MatchId::new("m7"),
        }));

        let actions = engine.cancel_match().unwrap();
        assert_eq!(
            sent(&actions),
            vec![Intent::CancelMatch {
                match_id: MatchId::new("m7")
            }]
        );

        let actions = engine.apply_push(PushEvent::MatchCancelled(MatchCancelled {
            match_id: MatchId::new("m7"),
            coins: 100,
        }));

        assert!(actions.contains(&Action::Notify(Notification::MatchChanged(None))));
        assert!(engine.store().current().is_none());
        assert_eq!(engine.store().balance().coins, 100);
        assert!(engine.create_match(10).is_ok());
    }

    #[test]
    fn cancel_is_refused_once_playing() {
        let mut engine = playing_engine();
        assert_eq!(
            engine.cancel_match(),
            Err(ActionError::NotCancellable(MatchId::new("m1")))
        );
    }

    #[test]
    fn resync_pulls_and_rejoins_room() {
        let mut engine = playing_engine();
        assert_eq!(
            engine.resync(),
            vec![
                Action::RequestPull,
                Action::Send(Intent::JoinRoom {
                    match_id: MatchId::new("m1")
                }),
            ]
        );
        assert_eq!(MatchEngine::default().resync(), vec![Action::RequestPull]);
    }

    #[test]
    fn teardown_silences_timers() {
        let mut engine = playing_engine();
        engine.apply_push(result(true));
        engine.request_rematch().unwrap();

        engine.teardown();

        assert!(ticks(&mut engine, 50).is_empty());
    }
}
