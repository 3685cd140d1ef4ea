//! MatchClient - the session runtime for rps-match.
//!
//! # Architecture
//!
//! One spawned task owns the [`MatchEngine`] and the connection state
//! machine. Everything that can change state arrives at that task and is
//! applied in order, so no locks guard the engine.
//!
//! ```text
//! Application ──commands──► session task ──intents──► Transport
//!      ▲                      │   ▲   ▲
//!      └────notifications─────┘   │   └── push frames
//!                                 └────── pull results (spawned task)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use match_client::{ClientConfig, MatchClient, MockTransport};
//!
//! let client = MatchClient::start(ClientConfig::new("authority"), MockTransport::new());
//! let mut notifications = client.subscribe();
//! client.create_match(10).await?;
//! while let Ok(notification) = notifications.recv().await { /* render */ }
//! client.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use match_core::{
    Action, ActionError, Balance, ChannelEvent, ConnectionAction, ConnectionEvent,
    ConnectionState, EngineConfig, MatchEngine, MatchSnapshot, MovePhaseState, Notification,
    RematchPhase, RematchState,
};
use match_types::{Intent, MatchId, Move, OpenMatch, PullSnapshot, PushEvent, WireError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::transport::{Transport, TransportError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame could not be encoded or decoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The action is not allowed in the current state.
    #[error("invalid action: {0}")]
    Action(#[from] ActionError),

    /// The session task has stopped.
    #[error("session closed")]
    SessionClosed,
}

/// Configuration for MatchClient.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the authority.
    pub address: String,
    /// Wall-clock length of one logical time unit.
    pub tick: Duration,
    /// Pull every this many ticks.
    pub pull_interval: u32,
    /// Timer budgets.
    pub engine: EngineConfig,
    /// Notifications buffered per subscriber before it starts lagging.
    pub notification_capacity: usize,
}

impl ClientConfig {
    /// Create a configuration with default timings.
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            tick: Duration::from_secs(1),
            pull_interval: 5,
            engine: EngineConfig::default(),
            notification_capacity: 256,
        }
    }

    /// Set the length of one time unit (at least one millisecond).
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Set the pull interval, in ticks. Zero disables periodic pulls.
    pub fn with_pull_interval(mut self, ticks: u32) -> Self {
        self.pull_interval = ticks;
        self
    }

    /// Set the timer budgets.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set the per-subscriber notification buffer.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity.max(1);
        self
    }
}

/// A consistent copy of the session state, for rendering.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Current match.
    pub current: Option<Arc<MatchSnapshot>>,
    /// Coins and statistics.
    pub balance: Balance,
    /// Joinable matches.
    pub open_matches: Vec<OpenMatch>,
    /// Move countdown state.
    pub move_phase: MovePhaseState,
    /// Units left to move, if counting.
    pub move_remaining: Option<u32>,
    /// Rematch negotiation phase.
    pub rematch_phase: RematchPhase,
    /// Rematch flags and deadline.
    pub rematch_state: RematchState,
    /// Push channel state.
    pub connection: ConnectionState,
}

type Reply = oneshot::Sender<Result<(), ActionError>>;

enum Command {
    CreateMatch { stake: u64, reply: Reply },
    JoinMatch { match_id: MatchId, stake: u64, reply: Reply },
    SubmitMove { mv: Move, reply: Reply },
    RequestRematch { reply: Reply },
    LeaveResultView { reply: Reply },
    CancelMatch { reply: Reply },
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },
}

/// Handle to a running session.
///
/// Dropping the handle stops the session as well; [`MatchClient::shutdown`]
/// additionally waits for it to finish.
pub struct MatchClient {
    commands: mpsc::Sender<Command>,
    notifications: broadcast::Sender<Notification>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MatchClient {
    /// Spawn the session task and start connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T: Transport>(config: ClientConfig, transport: T) -> Self {
        let (commands, command_rx) = mpsc::channel(32);
        let (notifications, _) = broadcast::channel(config.notification_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let session = Session::new(config, Arc::new(transport), notifications.clone());
        let task = tokio::spawn(session.run(command_rx, shutdown_rx));

        Self {
            commands,
            notifications,
            shutdown,
            task,
        }
    }

    /// Receive every notification produced from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Open a new match.
    pub async fn create_match(&self, stake: u64) -> Result<(), ClientError> {
        self.request(|reply| Command::CreateMatch { stake, reply }).await?
            .map_err(ClientError::from)
    }

    /// Join an open match.
    pub async fn join_match(&self, match_id: MatchId, stake: u64) -> Result<(), ClientError> {
        self.request(|reply| Command::JoinMatch {
            match_id,
            stake,
            reply,
        })
        .await?
        .map_err(ClientError::from)
    }

    /// Submit a move for the running round.
    pub async fn submit_move(&self, mv: Move) -> Result<(), ClientError> {
        self.request(|reply| Command::SubmitMove { mv, reply }).await?
            .map_err(ClientError::from)
    }

    /// Ask for, or accept, a rematch.
    pub async fn request_rematch(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::RequestRematch { reply }).await?
            .map_err(ClientError::from)
    }

    /// Withdraw the waiting match this player created.
    pub async fn cancel_match(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::CancelMatch { reply }).await?
            .map_err(ClientError::from)
    }

    /// Leave the result view of a concluded match.
    pub async fn leave_result_view(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::LeaveResultView { reply }).await?
            .map_err(ClientError::from)
    }

    /// Copy of the current session state.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, ClientError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Stop the session: cancel timers, abort any pull, close the transport.
    ///
    /// No notification is sent once this returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(%err, "session task ended abnormally");
        }
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        response.await.map_err(|_| ClientError::SessionClosed)
    }
}

type PullResult = Result<Vec<u8>, TransportError>;

/// State owned by the session task.
struct Session<T: Transport> {
    config: ClientConfig,
    transport: Arc<T>,
    engine: MatchEngine,
    connection: ConnectionState,
    notifications: broadcast::Sender<Notification>,
    pull_task: Option<JoinHandle<()>>,
    pull_tx: mpsc::Sender<PullResult>,
    pull_rx: Option<mpsc::Receiver<PullResult>>,
    reconnect_at: Option<Instant>,
    ticks_since_pull: u32,
}

impl<T: Transport> Session<T> {
    fn new(config: ClientConfig, transport: Arc<T>, notifications: broadcast::Sender<Notification>) -> Self {
        let (pull_tx, pull_rx) = mpsc::channel(1);
        Self {
            engine: MatchEngine::new(config.engine),
            config,
            transport,
            connection: ConnectionState::new(),
            notifications,
            pull_task: None,
            pull_tx,
            pull_rx: Some(pull_rx),
            reconnect_at: None,
            ticks_since_pull: 0,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut shutdown: watch::Receiver<bool>) {
        let transport = Arc::clone(&self.transport);
        let Some(mut pull_rx) = self.pull_rx.take() else {
            return;
        };
        let mut tick = tokio::time::interval_at(Instant::now() + self.config.tick, self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(address = %self.config.address, "session started");
        self.drive_connection(ConnectionEvent::ConnectRequested).await;

        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },

                frame = transport.recv(), if self.connection.is_connected() => {
                    self.on_frame(frame).await;
                }

                Some(result) = pull_rx.recv() => self.on_pull(result).await,

                _ = tick.tick() => self.on_tick().await,

                _ = tokio::time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)),
                    if reconnect_at.is_some() =>
                {
                    self.reconnect_at = None;
                    self.drive_connection(ConnectionEvent::ReconnectTimer).await;
                }
            }
        }

        self.teardown().await;
    }

    async fn on_command(&mut self, command: Command) {
        let (result, reply) = match command {
            Command::CreateMatch { stake, reply } => (self.engine.create_match(stake), reply),
            Command::JoinMatch {
                match_id,
                stake,
                reply,
            } => (self.engine.join_match(match_id, stake), reply),
            Command::SubmitMove { mv, reply } => (self.engine.submit_move(mv), reply),
            Command::RequestRematch { reply } => (self.engine.request_rematch(), reply),
            Command::LeaveResultView { reply } => (self.engine.leave_result_view(), reply),
            Command::CancelMatch { reply } => (self.engine.cancel_match(), reply),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
                return;
            }
        };

        let outcome = match result {
            Ok(actions) => {
                self.perform(actions).await;
                Ok(())
            }
            Err(err) => {
                tracing::debug!(%err, "action rejected");
                Err(err)
            }
        };
        // The caller may have given up waiting; the action still happened.
        let _ = reply.send(outcome);
    }

    async fn on_frame(&mut self, frame: Result<Vec<u8>, TransportError>) {
        match frame {
            Ok(bytes) => match PushEvent::from_bytes(&bytes) {
                Ok(event) => {
                    tracing::debug!(event = event.name(), "push received");
                    let actions = self.engine.apply_push(event);
                    self.perform(actions).await;
                }
                Err(err) => tracing::warn!(%err, "dropping undecodable push frame"),
            },
            Err(err) => {
                self.drive_connection(ConnectionEvent::Disconnected {
                    reason: err.to_string(),
                })
                .await;
            }
        }
    }

    async fn on_pull(&mut self, result: PullResult) {
        self.pull_task = None;
        let snapshot = match result {
            Ok(bytes) => PullSnapshot::from_bytes(&bytes),
            Err(err) => {
                tracing::warn!(%err, "pull failed, waiting for next interval");
                return;
            }
        };
        match snapshot {
            Ok(snapshot) => {
                let actions = self.engine.apply_pull(snapshot);
                self.perform(actions).await;
            }
            Err(err) => tracing::warn!(%err, "dropping undecodable pull snapshot"),
        }
    }

    async fn on_tick(&mut self) {
        let actions = self.engine.tick();
        self.perform(actions).await;

        if self.config.pull_interval == 0 {
            return;
        }
        self.ticks_since_pull += 1;
        if self.ticks_since_pull >= self.config.pull_interval {
            self.start_pull();
        }
    }

    async fn perform(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(intent) => self.send_intent(&intent).await,
                Action::RequestPull => self.start_pull(),
                Action::Notify(notification) => {
                    // No subscribers is fine.
                    let _ = self.notifications.send(notification);
                }
            }
        }
    }

    async fn send_intent(&self, intent: &Intent) {
        let bytes = match intent.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%err, ?intent, "failed to encode intent");
                return;
            }
        };
        if let Err(err) = self.transport.send(&bytes).await {
            // The next pull shows whatever the authority actually did.
            tracing::warn!(%err, ?intent, "failed to send intent");
        }
    }

    /// Spawn a pull unless one is already outstanding.
    fn start_pull(&mut self) {
        self.ticks_since_pull = 0;
        if self.pull_task.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("pull already in flight");
            return;
        }

        let transport = Arc::clone(&self.transport);
        let results = self.pull_tx.clone();
        self.pull_task = Some(tokio::spawn(async move {
            let result = transport.pull().await;
            let _ = results.send(result).await;
        }));
    }

    async fn drive_connection(&mut self, event: ConnectionEvent) {
        let mut pending = vec![event];
        while let Some(event) = pending.pop() {
            let (next, actions) = self.connection.on_event(event);
            self.connection = next;

            for action in actions {
                match action {
                    ConnectionAction::Connect => {
                        match self.transport.connect(&self.config.address).await {
                            Ok(()) => pending.push(ConnectionEvent::ConnectSucceeded),
                            Err(err) => pending.push(ConnectionEvent::ConnectFailed {
                                error: err.to_string(),
                            }),
                        }
                    }
                    ConnectionAction::Disconnect => {
                        if let Err(err) = self.transport.close().await {
                            tracing::warn!(%err, "failed to close transport");
                        }
                    }
                    ConnectionAction::Resync => {
                        let actions = self.engine.resync();
                        self.perform(actions).await;
                    }
                    ConnectionAction::StartReconnectTimer { delay } => {
                        tracing::debug!(?delay, "reconnect scheduled");
                        self.reconnect_at = Some(Instant::now() + delay);
                    }
                    ConnectionAction::CancelReconnect => self.reconnect_at = None,
                    ConnectionAction::Emit(event) => log_channel_event(&event),
                }
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let store = self.engine.store();
        SessionSnapshot {
            current: store.current().cloned(),
            balance: *store.balance(),
            open_matches: store.open_matches().to_vec(),
            move_phase: self.engine.move_phase(),
            move_remaining: self.engine.move_remaining(),
            rematch_phase: self.engine.rematch_phase(),
            rematch_state: self.engine.rematch_state(),
            connection: self.connection,
        }
    }

    async fn teardown(&mut self) {
        if let Some(task) = self.pull_task.take() {
            task.abort();
        }
        self.engine.teardown();
        self.drive_connection(ConnectionEvent::DisconnectRequested).await;
        if self.transport.is_connected() {
            if let Err(err) = self.transport.close().await {
                tracing::warn!(%err, "failed to close transport");
            }
        }
        tracing::info!("session stopped");
    }
}

fn log_channel_event(event: &ChannelEvent) {
    match event {
        ChannelEvent::Connected => tracing::info!("push channel connected"),
        ChannelEvent::ConnectionFailed { error } => {
            tracing::warn!(%error, "push channel connection failed");
        }
        ChannelEvent::Disconnected { reason } => tracing::warn!(%reason, "push channel lost"),
        ChannelEvent::ReconnectFailed { attempt, error } => {
            tracing::warn!(attempt, %error, "reconnect failed");
        }
    }
}
