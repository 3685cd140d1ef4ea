//! Error types for rps-match wire frames.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON deserialization failed (unknown tag, missing field, bad type)
    #[error("deserialization failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// Frame decoded but violates a protocol rule
    #[error("invalid data: {0}")]
    InvalidData(String),
}
