//! Rematch negotiation for a concluded match.
//!
//! ```text
//!                  local request                 peer flag
//!   Inactive ──────────────────► SelfOffered ─────────────────┐
//!      │                                                      ▼
//!      └────── peer flag ──────► PeerOffered ──local accept─► BothAccepted
//!
//!   SelfOffered / PeerOffered / BothAccepted ──(timer expired)──► Expired
//!   any ──(new match supersedes / player leaves)──► Inactive
//! ```
//!
//! Flags arrive as creator/joiner booleans and are mapped to self/peer by the
//! player's role. Within one negotiation they only accumulate, so duplicated
//! or reordered status pushes converge on the same phase.

use match_types::{Intent, MatchId, RematchStatusChanged, Role};

use crate::engine::{Action, Notification};
use crate::error::ActionError;
use crate::timer::{TimerEvent, TimerHandle, TimerService, TimerSlot};

/// Negotiation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RematchPhase {
    /// No offer on the table.
    Inactive,
    /// This player asked; waiting for the peer.
    SelfOffered,
    /// The peer asked; this player may accept.
    PeerOffered,
    /// Both asked; waiting for the server to start the new match.
    BothAccepted,
    /// The offer window closed without a new match.
    Expired,
}

/// Flags and deadline of the running negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RematchState {
    /// This player has asked for a rematch.
    pub self_requested: bool,
    /// The opponent has asked for a rematch.
    pub peer_requested: bool,
    /// Logical time at which the offer window closes.
    pub deadline: Option<u64>,
}

#[derive(Debug, Clone)]
struct Eligibility {
    match_id: MatchId,
    role: Role,
}

/// Controller for the rematch offer window.
#[derive(Debug)]
pub struct RematchNegotiation {
    phase: RematchPhase,
    state: RematchState,
    eligible: Option<Eligibility>,
    timer: Option<TimerHandle>,
    budget: u32,
}

impl RematchNegotiation {
    /// Create an inactive controller with an offer window of `budget` units.
    pub fn new(budget: u32) -> Self {
        Self {
            phase: RematchPhase::Inactive,
            state: RematchState::default(),
            eligible: None,
            timer: None,
            budget,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RematchPhase {
        self.phase
    }

    /// Current flags and deadline.
    pub fn state(&self) -> RematchState {
        self.state
    }

    /// True when the concluded match offered a rematch.
    pub fn is_eligible(&self) -> bool {
        self.eligible.is_some()
    }

    /// A round result was consumed for `match_id`.
    ///
    /// Starts a fresh negotiation context. Only results with
    /// `can_rematch` make the controller eligible.
    pub fn on_round_result(
        &mut self,
        match_id: MatchId,
        role: Role,
        can_rematch: bool,
        timers: &mut TimerService,
    ) -> Vec<Action> {
        let actions = self.reset(timers);
        if can_rematch {
            self.eligible = Some(Eligibility { match_id, role });
        }
        actions
    }

    /// The player asked for (or accepted) a rematch.
    pub fn request(&mut self, timers: &mut TimerService) -> Result<Vec<Action>, ActionError> {
        let Some(eligible) = self.eligible.clone() else {
            return Err(ActionError::RematchUnavailable);
        };

        let next = match self.phase {
            RematchPhase::Inactive => RematchPhase::SelfOffered,
            RematchPhase::PeerOffered => RematchPhase::BothAccepted,
            RematchPhase::SelfOffered | RematchPhase::BothAccepted => {
                return Err(ActionError::RematchAlreadyRequested)
            }
            RematchPhase::Expired => return Err(ActionError::RematchUnavailable),
        };

        let mut actions = vec![Action::Send(Intent::RematchRequest {
            match_id: eligible.match_id.clone(),
        })];
        self.state.self_requested = true;
        actions.extend(self.transition(next, timers));
        tracing::info!(match_id = %eligible.match_id, phase = ?self.phase, "rematch requested");
        Ok(actions)
    }

    /// The server reported rematch flags for `match_id`.
    pub fn on_flags(
        &mut self,
        match_id: &MatchId,
        flags: RematchStatusChanged,
        timers: &mut TimerService,
    ) -> Vec<Action> {
        let Some(eligible) = &self.eligible else {
            tracing::debug!(%match_id, "rematch flags ignored: no rematch offered");
            return Vec::new();
        };
        if eligible.match_id != *match_id {
            tracing::debug!(%match_id, "rematch flags ignored: different match");
            return Vec::new();
        }
        if self.phase == RematchPhase::Expired {
            return Vec::new();
        }

        let (mine, theirs) = match eligible.role {
            Role::Creator => (flags.creator_requested, flags.joiner_requested),
            Role::Joiner => (flags.joiner_requested, flags.creator_requested),
        };
        let self_requested = self.state.self_requested || mine;
        let peer_requested = self.state.peer_requested || theirs;
        if self_requested == self.state.self_requested && peer_requested == self.state.peer_requested {
            return Vec::new();
        }

        self.state.self_requested = self_requested;
        self.state.peer_requested = peer_requested;
        let next = match (self_requested, peer_requested) {
            (true, true) => RematchPhase::BothAccepted,
            (true, false) => RematchPhase::SelfOffered,
            (false, true) => RematchPhase::PeerOffered,
            (false, false) => self.phase,
        };
        self.transition(next, timers)
    }

    /// Route a timer event. Events for other timers are ignored.
    pub fn on_timer(&mut self, event: TimerEvent) -> Vec<Action> {
        if self.timer != Some(event.handle()) {
            return Vec::new();
        }
        match event {
            TimerEvent::Tick { remaining, .. } => {
                vec![Action::Notify(Notification::RematchTick { remaining })]
            }
            TimerEvent::Expired { .. } => {
                self.timer = None;
                self.phase = RematchPhase::Expired;
                self.state = RematchState::default();
                tracing::info!("rematch offer expired");
                vec![self.changed()]
            }
        }
    }

    /// Drop the negotiation: the match was superseded or the player left.
    pub fn reset(&mut self, timers: &mut TimerService) -> Vec<Action> {
        if let Some(handle) = self.timer.take() {
            timers.cancel(handle);
        }
        self.eligible = None;
        let was = std::mem::replace(&mut self.phase, RematchPhase::Inactive);
        self.state = RematchState::default();
        if was == RematchPhase::Inactive {
            Vec::new()
        } else {
            vec![self.changed()]
        }
    }

    fn transition(&mut self, next: RematchPhase, timers: &mut TimerService) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.phase == RematchPhase::Inactive && next != RematchPhase::Inactive {
            let (handle, first) = timers.start(TimerSlot::Rematch, self.budget);
            self.timer = Some(handle);
            self.state.deadline = Some(timers.now() + u64::from(self.budget));
            if let TimerEvent::Tick { remaining, .. } = first {
                actions.push(Action::Notify(Notification::RematchTick { remaining }));
            }
        }
        if next != self.phase {
            tracing::debug!(from = ?self.phase, to = ?next, "rematch phase changed");
            self.phase = next;
        }
        actions.insert(0, self.changed());
        actions
    }

    fn changed(&self) -> Action {
        Action::Notify(Notification::RematchChanged {
            phase: self.phase,
            state: self.state,
        })
    }
}
