//! Tunnel Engine - connection lifecycle manager
//!
//! [`TunnelEngine`] is the only owner of the connection state. All inputs
//! (`start`, `stop`, attempt completions, channel faults, backoff timers)
//! are funnelled through one control queue and handled one at a time by a
//! single actor task, so a `stop` can never interleave with a half-applied
//! `start` completion.
//!
//! Every connection attempt carries a generation number. Completions and
//! faults tagged with an older generation are discarded; a stale successful
//! open still gets its channel closed.

use crate::config::{TransportMode, TunnelConfig};
use crate::error::{Result, TransportError};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{ChannelFactory, TransportSelector, TunnelChannel};
use crate::tunnel::relay::{FaultSink, Relay};
use crate::tunnel::{InterfaceSettings, VirtualInterface};
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Connection state, owned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of the live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub mode: TransportMode,
    pub endpoint: String,
    pub connected_at: SystemTime,
    /// Reconnect attempt that produced this session; 0 for the initial start
    pub attempt: u32,
}

/// State plus message pair observed by the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: ConnectionState,
    pub message: Option<String>,
    pub error: Option<TransportError>,
    pub session: Option<SessionInfo>,
}

impl EngineStatus {
    fn idle() -> Self {
        Self {
            state: ConnectionState::Idle,
            message: None,
            error: None,
            session: None,
        }
    }
}

enum Command {
    Start {
        config: Box<TunnelConfig>,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    AttemptFinished {
        generation: u64,
        outcome: Result<Arc<dyn TunnelChannel>>,
    },
    ChannelClosed {
        generation: u64,
        error: TransportError,
    },
    BackoffElapsed {
        generation: u64,
    },
}

/// Handle to a running engine.
///
/// Must be created inside a tokio runtime. Dropping the handle tears the
/// connection down.
pub struct TunnelEngine {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<EngineStatus>,
    shutdown: CancellationToken,
}

impl TunnelEngine {
    /// Engine using the default [`TransportSelector`]
    pub fn new(interface: Arc<dyn VirtualInterface>) -> Self {
        Self::with_factory(interface, Arc::new(TransportSelector::new()))
    }

    pub fn with_factory(
        interface: Arc<dyn VirtualInterface>,
        factory: Arc<dyn ChannelFactory>,
    ) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(EngineStatus::idle());
        let shutdown = CancellationToken::new();

        let actor = Actor {
            interface,
            factory,
            events: commands.clone(),
            status: status_tx,
            state: ConnectionState::Idle,
            generation: 0,
            config: None,
            policy: ReconnectPolicy::default(),
            attempt: 0,
            pending_start: None,
            connecting: None,
            backoff: None,
            active: None,
        };
        tokio::spawn(actor.run(inbox, shutdown.clone()));

        Self {
            commands,
            status,
            shutdown,
        }
    }

    /// Connect with `config`. Valid from `Idle` or `Failed`; resolves once
    /// the first attempt has either connected or failed.
    pub async fn start(&self, config: TunnelConfig) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start {
                config: Box::new(config),
                reply,
            })
            .map_err(|_| engine_gone())?;
        rx.await.map_err(|_| engine_gone())?
    }

    /// Tear everything down and return to `Idle`. Idempotent.
    ///
    /// After this returns no packet is delivered and no state changes until
    /// the next `start`.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }
}

impl Drop for TunnelEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn engine_gone() -> TransportError {
    TransportError::InvalidState("engine has shut down".to_string())
}

struct ActiveConnection {
    generation: u64,
    channel: Arc<dyn TunnelChannel>,
    relay: Relay,
    established: Instant,
}

struct Actor {
    interface: Arc<dyn VirtualInterface>,
    factory: Arc<dyn ChannelFactory>,
    events: mpsc::UnboundedSender<Command>,
    status: watch::Sender<EngineStatus>,
    state: ConnectionState,
    generation: u64,
    config: Option<TunnelConfig>,
    policy: ReconnectPolicy,
    /// Reconnect attempts since the last stable connection
    attempt: u32,
    pending_start: Option<oneshot::Sender<Result<()>>>,
    connecting: Option<JoinHandle<()>>,
    backoff: Option<JoinHandle<()>>,
    active: Option<ActiveConnection>,
}

impl Actor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>, shutdown: CancellationToken) {
        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = inbox.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command).await;
        }

        self.teardown().await;
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(engine_gone()));
        }
        log::debug!("Tunnel engine stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start { config, reply } => self.on_start(*config, reply),
            Command::Stop { reply } => {
                self.on_stop().await;
                let _ = reply.send(());
            }
            Command::AttemptFinished {
                generation,
                outcome,
            } => self.on_attempt_finished(generation, outcome).await,
            Command::ChannelClosed { generation, error } => {
                self.on_channel_closed(generation, error).await
            }
            Command::BackoffElapsed { generation } => self.on_backoff_elapsed(generation),
        }
    }

    fn on_start(&mut self, config: TunnelConfig, reply: oneshot::Sender<Result<()>>) {
        if !matches!(self.state, ConnectionState::Idle | ConnectionState::Failed) {
            let _ = reply.send(Err(TransportError::InvalidState(format!(
                "cannot start while {}",
                self.state
            ))));
            return;
        }

        log::info!(
            "Starting {:?} tunnel to {}:{}",
            config.transport_mode,
            config.server_address,
            config.port
        );
        self.policy = ReconnectPolicy::from(&config.reconnect);
        self.config = Some(config);
        self.attempt = 0;
        self.pending_start = Some(reply);
        self.set_state(ConnectionState::Connecting, None, None);
        self.spawn_attempt();
    }

    async fn on_stop(&mut self) {
        if self.state == ConnectionState::Idle {
            return;
        }

        self.set_state(ConnectionState::Disconnecting, None, None);
        self.teardown().await;
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(TransportError::closed("cancelled by stop")));
        }
        self.config = None;
        self.set_state(ConnectionState::Idle, Some("stopped".to_string()), None);
    }

    async fn on_attempt_finished(
        &mut self,
        generation: u64,
        outcome: Result<Arc<dyn TunnelChannel>>,
    ) {
        let expected = generation == self.generation
            && matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Reconnecting
            );
        if !expected {
            log::debug!("Discarding stale attempt result (generation {generation})");
            if let Ok(channel) = outcome {
                channel.close().await;
            }
            return;
        }
        self.connecting = None;

        match outcome {
            Ok(channel) => self.on_connected(generation, channel),
            Err(error) if self.state == ConnectionState::Connecting => {
                log::error!("Connection failed: {error}");
                self.fail(error.clone());
                if let Some(reply) = self.pending_start.take() {
                    let _ = reply.send(Err(error));
                }
            }
            Err(error) if error.is_retryable() => {
                log::warn!("Reconnect attempt {} failed: {error}", self.attempt);
                self.schedule_reconnect(error);
            }
            Err(error) => {
                log::error!("Reconnect aborted: {error}");
                self.fail(error);
            }
        }
    }

    fn on_connected(&mut self, generation: u64, channel: Arc<dyn TunnelChannel>) {
        let session = SessionInfo {
            id: Uuid::new_v4(),
            mode: channel.mode(),
            endpoint: channel.endpoint().url(),
            connected_at: SystemTime::now(),
            attempt: self.attempt,
        };
        log::debug!("Session {} on generation {generation}", session.id);

        let events = self.events.clone();
        let on_fault: FaultSink = Arc::new(move |error| {
            let _ = events.send(Command::ChannelClosed { generation, error });
        });
        let relay = Relay::spawn(Arc::clone(&channel), Arc::clone(&self.interface), on_fault);

        self.active = Some(ActiveConnection {
            generation,
            channel,
            relay,
            established: Instant::now(),
        });
        self.set_state(
            ConnectionState::Connected,
            Some(format!("connected to {}", session.endpoint)),
            Some(session),
        );
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Ok(()));
        }
    }

    async fn on_channel_closed(&mut self, generation: u64, error: TransportError) {
        let current = self.state == ConnectionState::Connected
            && self.active.as_ref().is_some_and(|a| a.generation == generation);
        if !current {
            log::debug!("Ignoring channel fault from generation {generation}: {error}");
            return;
        }

        log::warn!("Channel closed: {error}");
        if let Some(active) = self.active.take() {
            if self.policy.is_stable(active.established.elapsed()) {
                self.attempt = 0;
            }
            close_connection(active).await;
        }
        self.schedule_reconnect(error);
    }

    fn on_backoff_elapsed(&mut self, generation: u64) {
        if generation != self.generation || self.state != ConnectionState::Reconnecting {
            return;
        }
        self.backoff = None;
        log::info!("Reconnect attempt {}/{}", self.attempt, self.policy.max_attempts);
        self.spawn_attempt();
    }

    fn schedule_reconnect(&mut self, error: TransportError) {
        self.attempt += 1;
        if !self.policy.should_retry(self.attempt) {
            log::error!(
                "Giving up after {} reconnect attempt(s)",
                self.policy.max_attempts
            );
            self.fail(error);
            return;
        }

        let delay = self.policy.delay_for_attempt(self.attempt);
        self.generation += 1;
        let generation = self.generation;
        let events = self.events.clone();
        self.backoff = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Command::BackoffElapsed { generation });
        }));

        self.set_state(
            ConnectionState::Reconnecting,
            Some(format!(
                "{error}; retrying in {delay:?} (attempt {}/{})",
                self.attempt, self.policy.max_attempts
            )),
            None,
        );
        self.publish_error(error);
    }

    /// Apply settings and open a fresh channel in the background
    fn spawn_attempt(&mut self) {
        let Some(config) = self.config.clone() else {
            self.fail(TransportError::InvalidState("no configuration".to_string()));
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let interface = Arc::clone(&self.interface);
        let factory = Arc::clone(&self.factory);
        let events = self.events.clone();
        log::debug!("Connection attempt generation {generation}");

        self.connecting = Some(tokio::spawn(async move {
            let outcome = connect(interface, factory, config).await;
            let _ = events.send(Command::AttemptFinished {
                generation,
                outcome,
            });
        }));
    }

    fn fail(&mut self, error: TransportError) {
        self.set_state(ConnectionState::Failed, Some(error.to_string()), None);
        self.publish_error(error);
    }

    /// Cancel everything in flight. Invalidates the current generation.
    async fn teardown(&mut self) {
        self.generation += 1;

        if let Some(task) = self.connecting.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(task) = self.backoff.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(active) = self.active.take() {
            close_connection(active).await;
        }
    }

    fn set_state(
        &mut self,
        state: ConnectionState,
        message: Option<String>,
        session: Option<SessionInfo>,
    ) {
        if self.state != state {
            log::info!("Tunnel state: {} -> {}", self.state, state);
        }
        self.state = state;
        self.status.send_replace(EngineStatus {
            state,
            message,
            error: None,
            session,
        });
    }

    fn publish_error(&self, error: TransportError) {
        self.status.send_modify(|status| status.error = Some(error));
    }
}

async fn connect(
    interface: Arc<dyn VirtualInterface>,
    factory: Arc<dyn ChannelFactory>,
    config: TunnelConfig,
) -> Result<Arc<dyn TunnelChannel>> {
    let settings = InterfaceSettings::from_config(&config);
    log::debug!("Applying interface settings: {settings}");
    match tokio::time::timeout(config.settings_timeout(), interface.apply_settings(&settings)).await
    {
        Ok(Ok(())) => {}
        Ok(Err(reason)) => return Err(TransportError::SettingsApplyFailed(reason)),
        Err(_) => {
            return Err(TransportError::SettingsApplyFailed(format!(
                "timed out after {:?}",
                config.settings_timeout()
            )))
        }
    }

    let channel = factory.select(&config)?;
    match tokio::time::timeout(config.connect_timeout(), channel.open()).await {
        Ok(Ok(())) => Ok(channel),
        Ok(Err(e)) => {
            channel.close().await;
            Err(e)
        }
        Err(_) => {
            channel.close().await;
            Err(TransportError::ConnectFailed(format!(
                "open timed out after {:?}",
                config.connect_timeout()
            )))
        }
    }
}

async fn close_connection(active: ActiveConnection) {
    active.relay.shutdown().await;
    active.channel.close().await;
    log::info!(
        "Channel to {} released: {}",
        active.channel.endpoint(),
        active.channel.stats().snapshot()
    );
}
