//! Session state machine.
//!
//! One task owns all session state. Public operations arrive as [`Command`]s,
//! each carrying a oneshot reply; driver I/O runs in spawned tasks that post
//! their results back as [`Internal`] events tagged with the session epoch.
//! Results from an older epoch (a session that has since been torn down) are
//! discarded, and any link they carry is closed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::channel::{LinkSlot, MessageChannel};
use super::driver::{DriverResult, LinkEvent, ReceiverDriver, ReceiverLink};
use super::listener::{ConnectionListener, MessageListener};
use super::status::StatusCache;
use super::supervisor::{ReconnectPlan, ReconnectSupervisor};
use super::types::{
    ApplicationContext, ApplicationProvenance, ApplicationSession, ConnectionState,
    SessionStatus,
};
use crate::discovery::Device;
use crate::error::{CastError, CastResult};
use crate::events::{ConnectionEvent, EventEmitter, MessageEvent};
use crate::utils::{is_valid_volume, now_millis};

/// Capacity of each link's event channel.
const LINK_EVENT_CAPACITY: usize = 64;

/// Link id held by a suspended session. Ids handed out start at 1.
const NO_LINK: u64 = 0;

pub(crate) type Reply<T> = oneshot::Sender<CastResult<T>>;

/// Requests from the engine handle.
pub(crate) enum Command {
    Connect {
        device: Device,
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Launch {
        app_id: String,
        relaunch: bool,
        reply: Reply<ApplicationContext>,
    },
    Join {
        app_id: String,
        session_id: Option<String>,
        reply: Reply<ApplicationContext>,
    },
    Leave {
        reply: Reply<()>,
    },
    Stop {
        session_id: Option<String>,
        reply: Reply<()>,
    },
    SetVolume {
        level: f32,
        reply: Reply<()>,
    },
    SetMuted {
        muted: bool,
        reply: Reply<()>,
    },
    SetReconnectTimeout {
        secs: u64,
        reply: Reply<()>,
    },
    SendText {
        namespace: String,
        text: String,
        reply: Reply<()>,
    },
    ReceiveText {
        namespace: String,
        listener: Option<Arc<dyn MessageListener>>,
        reply: Reply<()>,
    },
    SetConnectionListener {
        listener: Option<Arc<dyn ConnectionListener>>,
        reply: Reply<()>,
    },
}

/// Application request issued from the connected state.
pub(crate) enum AppRequest {
    Launch { relaunch: bool },
    Join { session_id: Option<String> },
}

/// Results and notifications posted back to the state machine task.
pub(crate) enum Internal {
    ConnectDone {
        epoch: u64,
        result: DriverResult<Arc<dyn ReceiverLink>>,
    },
    AppDone {
        epoch: u64,
        app_id: String,
        provenance: ApplicationProvenance,
        result: DriverResult<ApplicationSession>,
        reply: Reply<ApplicationContext>,
    },
    ReleaseDone {
        epoch: u64,
        result: DriverResult<()>,
        reply: Reply<()>,
    },
    VolumeDone {
        epoch: u64,
        level: f32,
        result: DriverResult<()>,
        reply: Reply<()>,
    },
    MutedDone {
        epoch: u64,
        muted: bool,
        result: DriverResult<()>,
        reply: Reply<()>,
    },
    Link {
        link_id: u64,
        event: LinkEvent,
    },
    ReconnectAttempt {
        epoch: u64,
        attempt: u32,
    },
    Reconnected {
        epoch: u64,
        link_id: u64,
        link: Arc<dyn ReceiverLink>,
        rejoin: Option<DriverResult<ApplicationSession>>,
    },
    ReconnectFailed {
        epoch: u64,
        error: CastError,
    },
}

/// Creates the event channel for a new link and forwards its events, tagged
/// with `link_id`, to the state machine until `cancel` fires.
pub(crate) fn link_channel(
    link_id: u64,
    internal: mpsc::UnboundedSender<Internal>,
    cancel: CancellationToken,
) -> mpsc::Sender<LinkEvent> {
    let (tx, mut rx) = mpsc::channel(LINK_EVENT_CAPACITY);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        if internal.send(Internal::Link { link_id, event }).is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });
    tx
}

/// Tunables handed to the state machine at spawn time.
pub(crate) struct MachineSettings {
    pub reconnect_timeout: Duration,
    pub reconnect_backoff_ms: Vec<u64>,
    pub outbound_queue_capacity: usize,
    pub command_channel_capacity: usize,
}

/// Handle to a running state machine task.
pub(crate) struct MachineHandle {
    pub commands: mpsc::Sender<Command>,
    pub status: StatusCache,
    pub task: JoinHandle<()>,
}

/// State owned by one session instance (`connect` until teardown).
struct LiveSession {
    device: Device,
    link: LinkSlot,
    link_id: u64,
    cancel: CancellationToken,
    supervisor: Option<CancellationToken>,
    channel: MessageChannel,
}

pub(crate) struct SessionMachine {
    driver: Arc<dyn ReceiverDriver>,
    emitter: Arc<dyn EventEmitter>,
    status: StatusCache,
    settings: MachineSettings,
    internal_tx: mpsc::UnboundedSender<Internal>,
    link_ids: Arc<AtomicU64>,
    listener: Option<Arc<dyn ConnectionListener>>,
    session: Option<LiveSession>,
    pending_connect: Option<Reply<()>>,
    app_busy: bool,
    epoch: u64,
}

impl SessionMachine {
    /// Spawns the state machine task.
    pub(crate) fn spawn(
        driver: Arc<dyn ReceiverDriver>,
        emitter: Arc<dyn EventEmitter>,
        settings: MachineSettings,
        shutdown: CancellationToken,
    ) -> MachineHandle {
        let status = StatusCache::new(settings.reconnect_timeout.as_secs());
        let (commands, commands_rx) = mpsc::channel(settings.command_channel_capacity);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let machine = Self {
            driver,
            emitter,
            status: status.clone(),
            settings,
            internal_tx,
            link_ids: Arc::new(AtomicU64::new(1)),
            listener: None,
            session: None,
            pending_connect: None,
            app_busy: false,
            epoch: 0,
        };
        let task = tokio::spawn(machine.run(commands_rx, internal_rx, shutdown));

        MachineHandle {
            commands,
            status,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        shutdown: CancellationToken,
    ) {
        log::debug!("[SessionMachine] Started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = internal.recv() => self.handle_internal(event),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(CastError::EngineShutDown));
        }
        if self.session.is_some() {
            self.teardown(None, true);
        }
        log::debug!("[SessionMachine] Stopped");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { device, reply } => self.connect(device, reply),
            Command::Disconnect { reply } => {
                let _ = reply.send(self.disconnect());
            }
            Command::Launch {
                app_id,
                relaunch,
                reply,
            } => self.start_application(app_id, AppRequest::Launch { relaunch }, reply),
            Command::Join {
                app_id,
                session_id,
                reply,
            } => self.start_application(app_id, AppRequest::Join { session_id }, reply),
            Command::Leave { reply } => self.release_application(None, false, reply),
            Command::Stop { session_id, reply } => {
                self.release_application(session_id, true, reply)
            }
            Command::SetVolume { level, reply } => self.set_volume(level, reply),
            Command::SetMuted { muted, reply } => self.set_muted(muted, reply),
            Command::SetReconnectTimeout { secs, reply } => {
                self.settings.reconnect_timeout = Duration::from_secs(secs);
                self.status.update(|s| s.reconnect_timeout_secs = secs);
                log::debug!("[SessionMachine] Reconnect timeout set to {}s", secs);
                let _ = reply.send(Ok(()));
            }
            Command::SendText {
                namespace,
                text,
                reply,
            } => match self.connected_session() {
                Ok(session) => session.channel.send(namespace, text, reply),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::ReceiveText {
                namespace,
                listener,
                reply,
            } => {
                let result = self.connected_session().map(|session| {
                    session.channel.register(&namespace, listener);
                });
                if result.is_ok() {
                    self.warn_if_unadvertised(&namespace);
                }
                let _ = reply.send(result);
            }
            Command::SetConnectionListener { listener, reply } => {
                self.listener = listener;
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn connect(&mut self, device: Device, reply: Reply<()>) {
        let rejection = match self.status.state() {
            ConnectionState::Connecting | ConnectionState::Suspended => {
                Some(CastError::AlreadyConnecting)
            }
            ConnectionState::Connected => Some(CastError::AlreadyConnected),
            ConnectionState::Idle | ConnectionState::Disconnected => None,
        };
        if let Some(error) = rejection {
            log::debug!("[SessionMachine] Connect to {} rejected: {}", device.id, error);
            let _ = reply.send(Err(error));
            return;
        }

        self.epoch += 1;
        let epoch = self.epoch;
        let link_id = self.link_ids.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let link: LinkSlot = Arc::new(RwLock::new(None));
        let channel = MessageChannel::open(
            Arc::clone(&link),
            self.settings.outbound_queue_capacity,
            cancel.child_token(),
        );

        log::info!(
            "[SessionMachine] Connecting to {} ({})",
            device.id,
            device.friendly_name
        );
        self.status.update(|s| {
            s.device_id = Some(device.id.clone());
            s.device_name = Some(device.friendly_name.clone());
            s.application = None;
            s.last_error = None;
            s.volume = 0.0;
            s.muted = false;
        });

        let events = link_channel(link_id, self.internal_tx.clone(), cancel.clone());
        let driver = Arc::clone(&self.driver);
        let internal = self.internal_tx.clone();
        let target = device.clone();
        tokio::spawn(async move {
            let result = driver.connect(&target, events).await;
            let _ = internal.send(Internal::ConnectDone { epoch, result });
        });

        self.session = Some(LiveSession {
            device,
            link,
            link_id,
            cancel,
            supervisor: None,
            channel,
        });
        self.pending_connect = Some(reply);
        self.set_state(ConnectionState::Connecting, false);
    }

    fn disconnect(&mut self) -> CastResult<()> {
        match self.status.state() {
            ConnectionState::Idle => Err(CastError::NotConnected),
            ConnectionState::Disconnected => Ok(()),
            _ => {
                if let Some(reply) = self.pending_connect.take() {
                    let _ = reply.send(Err(CastError::ConnectFailed(
                        "cancelled by disconnect".to_string(),
                    )));
                }
                log::info!("[SessionMachine] Disconnecting");
                self.teardown(None, true);
                Ok(())
            }
        }
    }

    fn start_application(
        &mut self,
        app_id: String,
        request: AppRequest,
        reply: Reply<ApplicationContext>,
    ) {
        let link = match self.ready_link() {
            Ok(link) => link,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        self.app_busy = true;

        let epoch = self.epoch;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let (provenance, result) = match request {
                AppRequest::Launch { relaunch } => (
                    ApplicationProvenance::Launched,
                    link.launch_application(&app_id, relaunch).await,
                ),
                AppRequest::Join { session_id } => (
                    ApplicationProvenance::Joined,
                    link.join_application(&app_id, session_id.as_deref()).await,
                ),
            };
            let _ = internal.send(Internal::AppDone {
                epoch,
                app_id,
                provenance,
                result,
                reply,
            });
        });
    }

    fn release_application(&mut self, session_id: Option<String>, stop: bool, reply: Reply<()>) {
        if let Err(e) = self.connected_session() {
            let _ = reply.send(Err(e));
            return;
        }
        let Some(context) = self.status.read(|s| s.application.clone()) else {
            let _ = reply.send(Err(CastError::NoActiveApplication));
            return;
        };
        if let Some(requested) = session_id {
            if requested != context.session_id {
                let _ = reply.send(Err(CastError::ApplicationNotFound(requested)));
                return;
            }
        }
        let link = match self.ready_link() {
            Ok(link) => link,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        self.app_busy = true;

        let epoch = self.epoch;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = if stop {
                link.stop_application(&context.session_id).await
            } else {
                link.leave_application().await
            };
            let _ = internal.send(Internal::ReleaseDone {
                epoch,
                result,
                reply,
            });
        });
    }

    fn set_volume(&mut self, level: f32, reply: Reply<()>) {
        if !is_valid_volume(level) {
            let _ = reply.send(Err(CastError::InvalidArgument(format!(
                "volume {} outside [0, 1]",
                level
            ))));
            return;
        }
        let link = match self.connected_link() {
            Ok(link) => link,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let epoch = self.epoch;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = link.set_volume(level).await;
            let _ = internal.send(Internal::VolumeDone {
                epoch,
                level,
                result,
                reply,
            });
        });
    }

    fn set_muted(&mut self, muted: bool, reply: Reply<()>) {
        let link = match self.connected_link() {
            Ok(link) => link,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let epoch = self.epoch;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = link.set_muted(muted).await;
            let _ = internal.send(Internal::MutedDone {
                epoch,
                muted,
                result,
                reply,
            });
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal events
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::ConnectDone { epoch, result } => self.on_connect_done(epoch, result),
            Internal::AppDone {
                epoch,
                app_id,
                provenance,
                result,
                reply,
            } => {
                let _ = reply.send(self.on_app_done(epoch, app_id, provenance, result));
            }
            Internal::ReleaseDone {
                epoch,
                result,
                reply,
            } => {
                let _ = reply.send(self.on_release_done(epoch, result));
            }
            Internal::VolumeDone {
                epoch,
                level,
                result,
                reply,
            } => {
                let outcome = self.on_command_done(epoch, result).map(|()| {
                    let muted = self.status.read(|s| s.muted);
                    self.apply_volume(level, muted);
                });
                let _ = reply.send(outcome);
            }
            Internal::MutedDone {
                epoch,
                muted,
                result,
                reply,
            } => {
                let outcome = self.on_command_done(epoch, result).map(|()| {
                    let volume = self.status.read(|s| s.volume);
                    self.apply_volume(volume, muted);
                });
                let _ = reply.send(outcome);
            }
            Internal::Link { link_id, event } => self.on_link_event(link_id, event),
            Internal::ReconnectAttempt { epoch, attempt } => {
                self.on_reconnect_attempt(epoch, attempt)
            }
            Internal::Reconnected {
                epoch,
                link_id,
                link,
                rejoin,
            } => self.on_reconnected(epoch, link_id, link, rejoin),
            Internal::ReconnectFailed { epoch, error } => {
                if epoch == self.epoch && self.session.is_some() {
                    log::warn!("[SessionMachine] Reconnection failed: {}", error);
                    self.teardown(Some(error), true);
                }
            }
        }
    }

    fn on_connect_done(&mut self, epoch: u64, result: DriverResult<Arc<dyn ReceiverLink>>) {
        let current = epoch == self.epoch
            && self.session.is_some()
            && self.status.state() == ConnectionState::Connecting
            && !self.status.is_reconnecting();
        if !current {
            if let Ok(link) = result {
                log::debug!("[SessionMachine] Closing link from abandoned connect");
                close_link(link);
            }
            return;
        }

        match result {
            Ok(link) => {
                if let Some(session) = self.session.as_ref() {
                    *session.link.write() = Some(Arc::clone(&link));
                    log::info!("[SessionMachine] Connected to {}", session.device.id);
                }
                self.set_state(ConnectionState::Connected, false);
                if let Some(reply) = self.pending_connect.take() {
                    let _ = reply.send(Ok(()));
                }
                if let Some(ref listener) = self.listener {
                    listener.connected();
                }
                tokio::spawn(async move {
                    if let Err(e) = link.request_status().await {
                        log::debug!("[SessionMachine] Initial status request failed: {}", e);
                    }
                });
            }
            Err(e) => {
                log::warn!("[SessionMachine] Connect failed: {}", e);
                let error = CastError::ConnectFailed(e.to_string());
                let reply = self.pending_connect.take();
                if let Some(ref listener) = self.listener {
                    listener.failed_to_connect(&error);
                }
                self.teardown(Some(error.clone()), false);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(error));
                }
            }
        }
    }

    fn on_app_done(
        &mut self,
        epoch: u64,
        app_id: String,
        provenance: ApplicationProvenance,
        result: DriverResult<ApplicationSession>,
    ) -> CastResult<ApplicationContext> {
        if epoch != self.epoch {
            return Err(CastError::NotConnected);
        }
        self.app_busy = false;

        let failed = |reason: String| match provenance {
            ApplicationProvenance::Launched => CastError::ApplicationLaunchFailed(reason),
            ApplicationProvenance::Joined => CastError::ApplicationJoinFailed(reason),
        };
        let result = match result {
            Ok(_) if !self.status.is_connected() => {
                Err(failed("connection lost during request".to_string()))
            }
            Ok(session) => Ok(session),
            Err(e) => Err(failed(e.to_string())),
        };

        match result {
            Ok(session) => {
                let context = ApplicationContext::new(app_id, session, provenance);
                log::info!(
                    "[SessionMachine] Application {} {:?} (session {})",
                    context.app_id,
                    provenance,
                    context.session_id
                );
                self.status
                    .update(|s| s.application = Some(context.clone()));
                self.emitter.emit_connection(ConnectionEvent::ApplicationConnected {
                    device_id: self.device_id(),
                    app_id: context.app_id.clone(),
                    session_id: context.session_id.clone(),
                    timestamp: now_millis(),
                });
                if let Some(ref listener) = self.listener {
                    listener.connected_to_application(&context.metadata, &context.session_id);
                }
                Ok(context)
            }
            Err(error) => {
                log::warn!("[SessionMachine] {}", error);
                self.status.update(|s| s.application = None);
                if let Some(ref listener) = self.listener {
                    listener.failed_to_connect_to_application(&error);
                }
                self.emit_failure(&error);
                Err(error)
            }
        }
    }

    fn on_release_done(&mut self, epoch: u64, result: DriverResult<()>) -> CastResult<()> {
        if epoch != self.epoch {
            return Err(CastError::NotConnected);
        }
        self.app_busy = false;

        match result {
            Ok(()) => {
                self.clear_application(None);
                Ok(())
            }
            Err(e) => {
                let error = CastError::ApplicationStopFailed(e.to_string());
                log::warn!("[SessionMachine] {}", error);
                if let Some(ref listener) = self.listener {
                    listener.failed_to_stop_application(&error);
                }
                Err(error)
            }
        }
    }

    fn on_command_done(&mut self, epoch: u64, result: DriverResult<()>) -> CastResult<()> {
        if epoch != self.epoch {
            return Err(CastError::NotConnected);
        }
        result.map_err(CastError::from)
    }

    fn on_link_event(&mut self, link_id: u64, event: LinkEvent) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.link_id != link_id {
            log::trace!("[SessionMachine] Ignoring event from stale link {}", link_id);
            return;
        }

        match event {
            LinkEvent::MessageReceived { namespace, text } => {
                self.emitter.emit_message(MessageEvent::Received {
                    device_id: session.device.id.clone(),
                    namespace: namespace.clone(),
                    message: text.clone(),
                    timestamp: now_millis(),
                });
                session
                    .channel
                    .deliver(namespace, text, self.listener.clone());
            }
            LinkEvent::StatusChanged { volume, muted } => {
                let volume = if volume.is_finite() {
                    volume.clamp(0.0, 1.0)
                } else {
                    self.status.read(|s| s.volume)
                };
                self.apply_volume(volume, muted);
            }
            LinkEvent::ApplicationStopped { reason } => {
                if self.status.read(|s| s.application.is_some()) {
                    log::info!(
                        "[SessionMachine] Receiver stopped the application: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                    self.clear_application(reason);
                }
            }
            LinkEvent::ConnectionSuspended { reason } => {
                if self.status.state() == ConnectionState::Connected {
                    log::warn!("[SessionMachine] Connection suspended: {}", reason);
                    self.begin_reconnect();
                }
            }
            LinkEvent::ConnectionClosed { reason } => {
                let state = self.status.state();
                if state == ConnectionState::Connected
                    || state == ConnectionState::Suspended
                    || self.status.is_reconnecting()
                {
                    log::info!(
                        "[SessionMachine] Receiver closed the connection: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                    self.teardown(None, true);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconnection
    // ─────────────────────────────────────────────────────────────────────────

    fn begin_reconnect(&mut self) {
        let rejoin = self
            .status
            .read(|s| s.application.as_ref().map(|a| (a.app_id.clone(), a.session_id.clone())));
        let Some(session) = self.session.as_mut() else {
            return;
        };

        // Only links issued by the supervisor may drive transitions from here.
        session.link_id = NO_LINK;
        if let Some(old) = session.link.write().take() {
            close_link(old);
        }

        let plan = ReconnectPlan {
            epoch: self.epoch,
            device: session.device.clone(),
            rejoin,
            timeout: self.settings.reconnect_timeout,
            backoff: self.settings.reconnect_backoff_ms.clone(),
        };
        let supervisor = ReconnectSupervisor {
            driver: Arc::clone(&self.driver),
            internal: self.internal_tx.clone(),
            link_ids: Arc::clone(&self.link_ids),
            session_cancel: session.cancel.clone(),
        };
        session.supervisor = Some(supervisor.spawn(plan));
        self.set_state(ConnectionState::Suspended, true);
    }

    fn on_reconnect_attempt(&mut self, epoch: u64, attempt: u32) {
        if epoch != self.epoch || !self.status.is_reconnecting() {
            return;
        }
        let device_id = self.device_id();
        self.set_state(ConnectionState::Connecting, true);
        self.emitter.emit_connection(ConnectionEvent::Reconnecting {
            device_id,
            attempt,
            timestamp: now_millis(),
        });
        if let Some(ref listener) = self.listener {
            listener.reconnecting(attempt);
        }
    }

    fn on_reconnected(
        &mut self,
        epoch: u64,
        link_id: u64,
        link: Arc<dyn ReceiverLink>,
        rejoin: Option<DriverResult<ApplicationSession>>,
    ) {
        if epoch != self.epoch || !self.status.is_reconnecting() {
            close_link(link);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            close_link(link);
            return;
        };

        *session.link.write() = Some(Arc::clone(&link));
        session.link_id = link_id;
        session.supervisor = None;
        log::info!("[SessionMachine] Reconnected to {}", session.device.id);

        match rejoin {
            Some(Ok(app)) => {
                self.status.update(|s| {
                    if let Some(context) = s.application.as_mut() {
                        context.session_id = app.session_id;
                        context.metadata = app.metadata;
                    }
                });
            }
            Some(Err(e)) => {
                let app_id = self
                    .status
                    .read(|s| s.application.as_ref().map(|a| a.app_id.clone()))
                    .unwrap_or_default();
                let error = CastError::ApplicationJoinFailed(e.to_string());
                log::warn!(
                    "[SessionMachine] Reconnected without application {}: {}",
                    app_id,
                    e
                );
                self.status.update(|s| s.application = None);
                self.emitter.emit_connection(ConnectionEvent::Degraded {
                    device_id: self.device_id(),
                    app_id,
                    reason: e.to_string(),
                    timestamp: now_millis(),
                });
                if let Some(ref listener) = self.listener {
                    listener.disconnected_from_application(Some(&error));
                }
            }
            None => {}
        }

        self.set_state(ConnectionState::Connected, false);
        if let Some(ref listener) = self.listener {
            listener.connected();
        }
        tokio::spawn(async move {
            if let Err(e) = link.request_status().await {
                log::debug!("[SessionMachine] Status request after reconnect failed: {}", e);
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Ends the current session instance: cancels the supervisor and channel
    /// tasks, closes the link, clears the application context, and moves to
    /// `Disconnected`. The connection listener is deregistered afterwards.
    fn teardown(&mut self, error: Option<CastError>, notify_listener: bool) {
        let Some(session) = self.session.take() else {
            return;
        };

        if let Some(supervisor) = session.supervisor.as_ref() {
            supervisor.cancel();
        }
        session.channel.close();
        session.cancel.cancel();
        if let Some(link) = session.link.write().take() {
            close_link(link);
        }

        let had_app = self.status.read(|s| s.application.is_some());
        if had_app {
            self.clear_application(None);
        }

        self.epoch += 1;
        self.app_busy = false;
        self.status.update(|s| s.last_error = error.clone());
        self.set_state(ConnectionState::Disconnected, false);

        if let Some(ref error) = error {
            self.emit_failure(error);
        }
        if let Some(listener) = self.listener.take() {
            if notify_listener {
                listener.disconnected(error.as_ref());
            }
        }
        log::info!("[SessionMachine] Session with {} ended", session.device.id);
    }

    fn clear_application(&mut self, reason: Option<String>) {
        let Some(context) = self.status.read(|s| s.application.clone()) else {
            return;
        };
        self.status.update(|s| s.application = None);
        self.emitter
            .emit_connection(ConnectionEvent::ApplicationDisconnected {
                device_id: self.device_id(),
                app_id: context.app_id,
                reason,
                timestamp: now_millis(),
            });
        if let Some(ref listener) = self.listener {
            listener.disconnected_from_application(None);
        }
    }

    fn apply_volume(&mut self, volume: f32, muted: bool) {
        let changed = self
            .status
            .read(|s| s.volume != volume || s.muted != muted);
        if !changed {
            return;
        }
        self.status.update(|s| {
            s.volume = volume;
            s.muted = muted;
        });
        self.emitter.emit_connection(ConnectionEvent::VolumeChanged {
            device_id: self.device_id(),
            volume,
            muted,
            timestamp: now_millis(),
        });
        if let Some(ref listener) = self.listener {
            listener.volume_changed(volume, muted);
        }
    }

    fn set_state(&mut self, state: ConnectionState, reconnecting: bool) {
        let unchanged = self
            .status
            .read(|s| s.state == state && s.reconnecting == reconnecting);
        if unchanged {
            return;
        }
        self.status.update(|s| {
            s.state = state;
            s.reconnecting = reconnecting;
        });
        log::debug!(
            "[SessionMachine] State -> {}{}",
            state,
            if reconnecting { " (reconnecting)" } else { "" }
        );
        self.emitter.emit_connection(ConnectionEvent::StateChanged {
            device_id: self.status.read(|s| s.device_id.clone()),
            state,
            reconnecting,
            timestamp: now_millis(),
        });
        if let Some(ref listener) = self.listener {
            listener.state_changed(state);
        }
    }

    fn warn_if_unadvertised(&self, namespace: &str) {
        if let Some(app_id) = self.status.read(|s| unadvertised_by(s, namespace)) {
            log::warn!(
                "[SessionMachine] Application {} does not advertise namespace {}",
                app_id,
                namespace
            );
        }
    }

    fn emit_failure(&self, error: &CastError) {
        self.emitter.emit_connection(ConnectionEvent::Failed {
            device_id: self.status.read(|s| s.device_id.clone()),
            error: error.clone(),
            timestamp: now_millis(),
        });
    }

    fn device_id(&self) -> String {
        self.status
            .read(|s| s.device_id.clone())
            .unwrap_or_default()
    }

    fn connected_session(&self) -> CastResult<&LiveSession> {
        match self.session.as_ref() {
            Some(session) if self.status.is_connected() => Ok(session),
            _ => Err(CastError::NotConnected),
        }
    }

    fn connected_link(&self) -> CastResult<Arc<dyn ReceiverLink>> {
        self.connected_session()?
            .link
            .read()
            .clone()
            .ok_or(CastError::NotConnected)
    }

    /// Link for an application operation; rejects a second one while one is pending.
    fn ready_link(&self) -> CastResult<Arc<dyn ReceiverLink>> {
        let link = self.connected_link()?;
        if self.app_busy {
            return Err(CastError::OperationInProgress(
                "application request pending".to_string(),
            ));
        }
        Ok(link)
    }
}

fn close_link(link: Arc<dyn ReceiverLink>) {
    tokio::spawn(async move { link.close().await });
}

/// App id of the active application if it does not list `namespace`.
fn unadvertised_by(status: &SessionStatus, namespace: &str) -> Option<String> {
    status
        .application
        .as_ref()
        .filter(|app| !app.metadata.supports_namespace(namespace))
        .map(|app| app.app_id.clone())
}
