//! Match vocabulary: roles, lifecycle status, moves and winners.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a match this client plays.
///
/// Fixed for the lifetime of a match. Decides which move, win and rematch
/// flag is "mine".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Created the match and staked first (player 1).
    Creator,
    /// Joined an open match (player 2).
    Joiner,
}

impl Role {
    /// Check if this is the creator side.
    pub fn is_creator(&self) -> bool {
        matches!(self, Self::Creator)
    }
}

/// Lifecycle status of a match.
///
/// Totally ordered: `None < Waiting < Playing < Resolved`. A match never
/// moves backwards through this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// No current match.
    None,
    /// Created, waiting for an opponent.
    Waiting,
    /// Both players present, moves open.
    Playing,
    /// Outcome decided by the server.
    Resolved,
}

impl MatchStatus {
    /// Position in the monotonic order (0..=3).
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Waiting or Playing: a match that still needs the player.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Waiting | Self::Playing)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Waiting => "waiting",
            Self::Playing => "playing",
            Self::Resolved => "resolved",
        };
        f.write_str(s)
    }
}

/// A rock-paper-scissors move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Move {
    /// Rock
    Rock,
    /// Paper
    Paper,
    /// Scissors
    Scissors,
}

impl std::str::FromStr for Move {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rock" => Ok(Self::Rock),
            "paper" => Ok(Self::Paper),
            "scissors" => Ok(Self::Scissors),
            other => Err(format!("unknown move: {other}")),
        }
    }
}

/// Round winner as reported by the server (absolute, not perspective).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    /// The creator won.
    Player1,
    /// The joiner won.
    Player2,
    /// Nobody won.
    Draw,
}

impl Winner {
    /// Translate the absolute winner into this player's outcome.
    pub fn outcome_for(&self, role: Role) -> Outcome {
        match (self, role) {
            (Self::Draw, _) => Outcome::Draw,
            (Self::Player1, Role::Creator) | (Self::Player2, Role::Joiner) => Outcome::Won,
            _ => Outcome::Lost,
        }
    }
}

/// A round result from one player's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// This player won.
    Won,
    /// This player lost.
    Lost,
    /// Draw.
    Draw,
}
