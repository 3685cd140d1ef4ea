//! # match-core
//!
//! Pure logic for rps-match (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms that keep one
//! consistent view of the current match while two unordered channels (push
//! events and periodic pulls) feed it, without any network or clock access.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! Time is logical: the runtime calls [`MatchEngine::tick`] once per time
//! unit. The actual I/O (push channel, pull requests, wall clock) is performed
//! by `match-client`, which interprets the [`Action`]s produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod engine;
pub mod error;
pub mod move_phase;
pub mod reconciler;
pub mod rematch;
pub mod store;
pub mod timer;

pub use connection::{ChannelEvent, ConnectionAction, ConnectionEvent, ConnectionState};
pub use engine::{Action, EngineConfig, MatchEngine, Notification};
pub use error::{ActionError, Rejection};
pub use move_phase::{MovePhase, MovePhaseState};
pub use reconciler::{Reconciled, Reconciler, StoreChange};
pub use rematch::{RematchNegotiation, RematchPhase, RematchState};
pub use store::{Balance, MatchSnapshot, PendingRequest, SnapshotStore};
pub use timer::{TimerEvent, TimerHandle, TimerService, TimerSlot};
