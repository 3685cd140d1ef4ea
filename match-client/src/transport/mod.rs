//! Transport abstraction for rps-match.
//!
//! The authority is reached over two channels with no shared ordering:
//! - a long-lived push channel (`connect()`, `send()`, `recv()`)
//! - a request/response snapshot read (`pull()`)
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect("authority").await?;
//! transport.send(&intent.to_bytes()?).await?;
//! let frame = transport.recv().await?;
//! let snapshot = transport.pull().await?;
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Failures reaching the authority.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The push channel could not be opened.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The push channel is not open.
    #[error("not connected")]
    NotConnected,

    /// The push channel was lost while in use.
    #[error("connection closed")]
    ConnectionClosed,

    /// An intent frame could not be written.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Reading a push frame failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Snapshot read failed.
    #[error("pull failed: {0}")]
    PullFailed(String),

    /// The authority did not answer in time.
    #[error("connection timeout")]
    Timeout,
}

/// Both channels to the authority behind one object.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the push channel to the authority at `address`.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one intent frame.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive the next push frame.
    ///
    /// Waits until a frame is available or the channel is lost. Must be
    /// cancel-safe: dropping the future never loses a frame.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Read one full snapshot frame.
    ///
    /// Independent of the push channel; may succeed while it is down.
    async fn pull(&self) -> Result<Vec<u8>, TransportError>;

    /// Whether the push channel is currently open.
    fn is_connected(&self) -> bool;

    /// Close the push channel.
    async fn close(&self) -> Result<(), TransportError>;
}
