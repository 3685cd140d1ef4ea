//! Protocol messages for rps-match.
//!
//! Three families of frames cross the boundary with the match server:
//! - [`PushEvent`]: one fact pushed over the real-time channel
//! - [`PullSnapshot`]: full state returned by the polling endpoint
//! - [`Intent`]: requests emitted by the client
//!
//! All frames are JSON. Unknown extra fields are tolerated (the server adds
//! presentation fields freely); missing required fields or unknown tags are
//! rejected at decode time so that nothing is ever partially applied.

use serde::{Deserialize, Serialize};

use crate::{MatchId, MatchStatus, Move, Outcome, Role, WireError, Winner};

/// All events the server pushes over the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    /// A match this client asked to create now exists
    MatchCreated(MatchCreated),
    /// A match moved to playing
    MatchStarted(MatchStarted),
    /// Both moves are in and the server decided the round
    RoundResult(RoundResult),
    /// One or both players asked for a rematch
    RematchStatusChanged(RematchStatusChanged),
    /// The server created the rematch match
    RematchStarted(RematchStarted),
    /// Authoritative coin balance
    BalanceChanged(BalanceChanged),
    /// The creator withdrew a match nobody had joined
    MatchCancelled(MatchCancelled),
}

impl PushEvent {
    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    /// Short tag name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MatchCreated(_) => "match_created",
            Self::MatchStarted(_) => "match_started",
            Self::RoundResult(_) => "round_result",
            Self::RematchStatusChanged(_) => "rematch_status_changed",
            Self::RematchStarted(_) => "rematch_started",
            Self::BalanceChanged(_) => "balance_changed",
            Self::MatchCancelled(_) => "match_cancelled",
        }
    }
}

/// A match created on this client's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCreated {
    /// Server-issued id of the new match
    pub match_id: MatchId,
}

/// A match moved to playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStarted {
    /// The match that started
    pub match_id: MatchId,
    /// True when this match is the result of a rematch negotiation
    #[serde(default)]
    pub rematch: bool,
}

/// Cumulative per-match tallies reported with a round result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    /// Rounds won by the creator
    pub creator_wins: u32,
    /// Rounds won by the joiner
    pub joiner_wins: u32,
    /// Drawn rounds
    pub draws: u32,
}

/// Outcome of a round, decided by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    /// The creator's move
    pub creator_move: Move,
    /// The joiner's move
    pub joiner_move: Move,
    /// Absolute winner
    pub winner: Winner,
    /// Cumulative tallies for this pairing
    pub stats: MatchStats,
    /// Whether both players can afford another round at the same stake
    pub can_rematch: bool,
}

impl RoundResult {
    /// The winner from the given role's perspective.
    pub fn outcome_for(&self, role: Role) -> Outcome {
        self.winner.outcome_for(role)
    }

    /// The move played by the given role.
    pub fn my_move(&self, role: Role) -> Move {
        match role {
            Role::Creator => self.creator_move,
            Role::Joiner => self.joiner_move,
        }
    }

    /// The move played by the other side.
    pub fn opponent_move(&self, role: Role) -> Move {
        match role {
            Role::Creator => self.joiner_move,
            Role::Joiner => self.creator_move,
        }
    }
}

/// Rematch request flags, as the server currently sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RematchStatusChanged {
    /// The creator asked for a rematch
    pub creator_requested: bool,
    /// The joiner asked for a rematch
    pub joiner_requested: bool,
}

/// The rematch match exists and is already playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RematchStarted {
    /// Id of the new match
    pub match_id: MatchId,
    /// Balance after the new stake was taken
    pub coins: u64,
    /// Role in the new match (the server keeps the original creator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Stake of the new match (same as the old one when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stake: Option<u64>,
}

/// Authoritative balance update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChanged {
    /// Current coin balance
    pub coins: u64,
}

/// A waiting match was withdrawn and its stake refunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCancelled {
    /// The cancelled match
    pub match_id: MatchId,
    /// Balance after the refund
    pub coins: u64,
}

/// Lifetime statistics for this player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    /// Matches won
    pub wins: u32,
    /// Matches lost
    pub losses: u32,
    /// Matches drawn
    pub draws: u32,
    /// Net coins won across all matches
    pub total_coins_won: i64,
}

/// An open match another player created and this player could join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenMatch {
    /// Match id
    pub id: MatchId,
    /// Stake required to join
    pub stake: u64,
}

/// The match the server considers current for this player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentMatch {
    /// Match id
    pub id: MatchId,
    /// This player's role
    pub role: Role,
    /// Server-side status
    pub status: MatchStatus,
    /// Stake per player
    pub stake: u64,
}

/// Full state returned by the polling endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSnapshot {
    /// Coin balance
    pub coins: u64,
    /// Lifetime statistics
    pub stats: PlayerStats,
    /// Joinable matches
    #[serde(default)]
    pub open_matches: Vec<OpenMatch>,
    /// Current match, if any
    #[serde(default)]
    pub current_match: Option<CurrentMatch>,
}

impl PullSnapshot {
    /// Deserialize and validate from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let snapshot: Self = serde_json::from_slice(bytes).map_err(WireError::Decode)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    /// Check protocol rules serde cannot express.
    pub fn validate(&self) -> Result<(), WireError> {
        if let Some(current) = &self.current_match {
            if current.status == MatchStatus::None {
                return Err(WireError::InvalidData(format!(
                    "current match {} reported with status none",
                    current.id
                )));
            }
        }
        Ok(())
    }
}

/// Requests the client sends toward the match server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Subscribe to push events for a match
    JoinRoom {
        /// Match to follow
        match_id: MatchId,
    },
    /// The local move countdown ran out
    MoveTimeout {
        /// Match whose round timed out
        match_id: MatchId,
    },
    /// Offer (or accept) a rematch
    RematchRequest {
        /// The finished match
        match_id: MatchId,
    },
    /// Create an open match with the given stake
    CreateMatch {
        /// Stake per player
        stake: u64,
    },
    /// Join an open match
    JoinMatch {
        /// Match to join
        match_id: MatchId,
    },
    /// Withdraw a waiting match this player created
    CancelMatch {
        /// Match to cancel
        match_id: MatchId,
    },
    /// Submit this player's move
    SubmitMove {
        /// Match being played
        match_id: MatchId,
        /// The move
        #[serde(rename = "move")]
        mv: Move,
    },
}

impl Intent {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }

    /// The match this intent refers to, if any.
    pub fn match_id(&self) -> Option<&MatchId> {
        match self {
            Self::JoinRoom { match_id }
            | Self::MoveTimeout { match_id }
            | Self::RematchRequest { match_id }
            | Self::JoinMatch { match_id }
            | Self::CancelMatch { match_id }
            | Self::SubmitMove { match_id, .. } => Some(match_id),
            Self::CreateMatch { .. } => None,
        }
    }
}
