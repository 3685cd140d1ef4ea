//! Push-channel connection state machine.
//!
//! Pure and side-effect free: it takes events and produces a new state plus
//! a list of actions. `match-client` performs the actual connecting,
//! sleeping and resyncing.

use std::time::Duration;

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Push channel open.
    Connected,
    /// Lost or failed, waiting to retry.
    Reconnecting {
        /// Number of failed attempts so far.
        attempt: u32,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: ConnectionEvent) -> (Self, Vec<ConnectionAction>) {
        match (self, event) {
            (Self::Disconnected, ConnectionEvent::ConnectRequested) => {
                (Self::Connecting, vec![ConnectionAction::Connect])
            }

            // Both a first connect and a reconnect end in a resync: whatever
            // was pushed while the channel was down is only visible via pull.
            (Self::Connecting | Self::Reconnecting { .. }, ConnectionEvent::ConnectSucceeded) => (
                Self::Connected,
                vec![
                    ConnectionAction::Emit(ChannelEvent::Connected),
                    ConnectionAction::Resync,
                ],
            ),
            (Self::Connecting, ConnectionEvent::ConnectFailed { error }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    ConnectionAction::Emit(ChannelEvent::ConnectionFailed { error }),
                    ConnectionAction::StartReconnectTimer {
                        delay: calculate_backoff(1),
                    },
                ],
            ),

            (Self::Connected, ConnectionEvent::Disconnected { reason }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    ConnectionAction::Emit(ChannelEvent::Disconnected { reason }),
                    ConnectionAction::StartReconnectTimer {
                        delay: calculate_backoff(1),
                    },
                ],
            ),
            (Self::Connected, ConnectionEvent::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    ConnectionAction::Disconnect,
                    ConnectionAction::Emit(ChannelEvent::Disconnected {
                        reason: "shutdown requested".into(),
                    }),
                ],
            ),

            (Self::Reconnecting { .. }, ConnectionEvent::ReconnectTimer) => {
                (Self::Connecting, vec![ConnectionAction::Connect])
            }
            (Self::Reconnecting { attempt }, ConnectionEvent::ConnectFailed { error }) => {
                let next_attempt = attempt.saturating_add(1);
                (
                    Self::Reconnecting {
                        attempt: next_attempt,
                    },
                    vec![
                        ConnectionAction::Emit(ChannelEvent::ReconnectFailed {
                            attempt: next_attempt,
                            error,
                        }),
                        ConnectionAction::StartReconnectTimer {
                            delay: calculate_backoff(next_attempt),
                        },
                    ],
                )
            }
            (Self::Reconnecting { .. } | Self::Connecting, ConnectionEvent::DisconnectRequested) => {
                (Self::Disconnected, vec![ConnectionAction::CancelReconnect])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the push channel is open.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Session start.
    ConnectRequested,
    /// Transport connected.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The push channel was lost.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Session shutdown.
    DisconnectRequested,
    /// Reconnect backoff elapsed.
    ReconnectTimer,
}

/// Instructions for the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open the transport.
    Connect,
    /// Close the transport.
    Disconnect,
    /// Pull immediately and re-join the current match room.
    Resync,
    /// Sleep before the next attempt.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect sleep.
    CancelReconnect,
    /// Report a lifecycle change.
    Emit(ChannelEvent),
}

/// Connection lifecycle reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Push channel open.
    Connected,
    /// First connection attempt failed.
    ConnectionFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Push channel lost.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// A retry failed.
    ReconnectFailed {
        /// Which reconnection attempt this was.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
}

/// Reconnection backoff with jitter.
///
/// Formula: min(8s, 2^(attempt-1) seconds) + random(0..=1000ms)
pub fn calculate_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(3);
    let base_secs = 2u64.pow(exponent).min(8);
    Duration::from_secs(base_secs) + Duration::from_millis(random_jitter_ms())
}

/// Random jitter between 0 and 1000 milliseconds.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % 1001,
        Err(err) => {
            tracing::warn!(%err, "no entropy for reconnect jitter");
            0
        }
    }
}
