//! # match-types
//!
//! Wire format types for the rps-match synchronization engine.
//!
//! This crate provides the foundational types used across all rps-match crates:
//! - [`MatchId`] - Opaque match identity issued by the match server
//! - [`Role`], [`MatchStatus`], [`Move`], [`Winner`] - Match vocabulary
//! - [`PushEvent`] - Real-time notifications from the match server
//! - [`PullSnapshot`] - Full state returned by the polling endpoint
//! - [`Intent`] - Outbound requests toward the match server
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod status;

pub use error::WireError;
pub use ids::MatchId;
pub use messages::{
    BalanceChanged, CurrentMatch, Intent, MatchCancelled, MatchCreated, MatchStarted, MatchStats, OpenMatch,
    PlayerStats, PullSnapshot, PushEvent, RematchStarted, RematchStatusChanged, RoundResult,
};
pub use status::{MatchStatus, Move, Outcome, Role, Winner};
