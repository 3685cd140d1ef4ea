//! Mock transport for tests and the demo command.
//!
//! Push frames are fed through an in-memory channel, pull responses are
//! queued, and every sent frame is captured for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Notify};

/// Mock transport for testing.
///
/// Clones share the same state, so a test can keep one handle while the
/// session owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    push_tx: mpsc::UnboundedSender<Vec<u8>>,
    push_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    lost: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    connect_count: u32,
    sent_messages: Vec<Vec<u8>>,
    pull_queue: VecDeque<Vec<u8>>,
    last_pull: Option<Vec<u8>>,
    pull_count: u32,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
    fail_next_pull: Option<String>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::default(),
            push_tx,
            push_rx: Arc::new(tokio::sync::Mutex::new(push_rx)),
            lost: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame to be delivered by `recv()`.
    pub fn queue_push(&self, data: Vec<u8>) {
        // The receiver lives as long as `self`, so this cannot fail.
        let _ = self.push_tx.send(data);
    }

    /// Queue a snapshot to be returned by the next `pull()` call.
    ///
    /// Once the queue is empty, `pull()` keeps returning the last snapshot.
    pub fn queue_pull(&self, data: Vec<u8>) {
        self.lock().pull_queue.push_back(data);
    }

    /// Get all messages that were sent.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.lock().sent_messages.clone()
    }

    /// Get the last message that was sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.lock().sent_messages.last().cloned()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> u32 {
        self.lock().connect_count
    }

    /// Number of `pull()` calls, failed ones included.
    pub fn pull_count(&self) -> u32 {
        self.lock().pull_count
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.lock().fail_next_recv = Some(error.to_string());
    }

    /// Cause the next pull() to fail with the given error.
    pub fn fail_next_pull(&self, error: &str) {
        self.lock().fail_next_pull = Some(error.to_string());
    }

    /// Simulate the push channel dropping.
    ///
    /// A pending `recv()` returns `ConnectionClosed` and frames not yet
    /// received are lost with the socket.
    pub fn drop_connection(&self) {
        self.lock().connected = false;
        if let Ok(mut rx) = self.push_rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
        self.lost.notify_waiters();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connect_count += 1;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_messages.push(data.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        // Register for loss notification before checking state, so a drop
        // between the check and the wait is not missed.
        let lost = self.lost.notified();
        tokio::pin!(lost);
        lost.as_mut().enable();

        {
            let mut inner = self.lock();
            if !inner.connected {
                return Err(TransportError::NotConnected);
            }
            if let Some(error) = inner.fail_next_recv.take() {
                return Err(TransportError::ReceiveFailed(error));
            }
        }

        let mut frames = self.push_rx.lock().await;
        tokio::select! {
            frame = frames.recv() => frame.ok_or(TransportError::ConnectionClosed),
            _ = &mut lost => Err(TransportError::ConnectionClosed),
        }
    }

    async fn pull(&self) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.lock();
        inner.pull_count += 1;

        if let Some(error) = inner.fail_next_pull.take() {
            return Err(TransportError::PullFailed(error));
        }
        if let Some(next) = inner.pull_queue.pop_front() {
            inner.last_pull = Some(next.clone());
            return Ok(next);
        }
        inner
            .last_pull
            .clone()
            .ok_or_else(|| TransportError::PullFailed("no snapshot available".into()))
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        self.lost.notify_waiters();
        Ok(())
    }
}
