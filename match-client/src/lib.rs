//! # match-client
//!
//! Session runtime for rps-match.
//!
//! Runs a [`MatchEngine`](match_core::MatchEngine) against a live
//! [`Transport`]: it keeps the push channel connected, pulls snapshots on a
//! fixed interval, drives the logical clock from a wall-clock tick, and fans
//! [`Notification`](match_core::Notification)s out to any number of
//! subscribers.
//!
//! ## Features
//!
//! - **Single-owner session task**: all state changes are applied in order
//!   by one task; callers talk to it through [`MatchClient`]
//! - **Reconnect with backoff**: lost push channels are retried and followed
//!   by an immediate pull
//! - **Transport Abstraction**: pluggable transport layer (mock included)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod transport;

pub use client::{ClientConfig, ClientError, MatchClient, SessionSnapshot};
pub use transport::{MockTransport, Transport, TransportError};
