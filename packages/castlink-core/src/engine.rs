//! The engine: public command surface for binding layers.
//!
//! [`CastEngine`] wires the device registry, the scan controller and the
//! session state machine together and exposes one async method per command.
//! Instances are independent; create as many as tests need.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::discovery::{Device, DeviceScanner};
use crate::error::{CastError, CastResult};
use crate::events::{BroadcastEventBridge, EventEmitter};
use crate::protocol_constants::MAX_RECONNECT_TIMEOUT_SECS;
use crate::registry::{DeviceRegistry, ScanListener};
use crate::scan::ScanController;
use crate::session::machine::{Command, MachineSettings, Reply, SessionMachine};
use crate::session::{
    ApplicationContext, ConnectionListener, MessageListener, ReceiverDriver, SessionStatus,
    StatusCache,
};

struct EngineInner {
    id: String,
    config: EngineConfig,
    registry: Arc<DeviceRegistry>,
    scan: ScanController,
    commands: tokio::sync::mpsc::Sender<Command>,
    status: StatusCache,
    shutdown: CancellationToken,
    session_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct CastEngine {
    inner: Arc<EngineInner>,
}

impl CastEngine {
    /// Creates an engine. Must be called from within a Tokio runtime.
    ///
    /// Applies `config.log_level`, when set, to the global `log` max level.
    pub fn create(
        config: EngineConfig,
        driver: Arc<dyn ReceiverDriver>,
        scanner: Arc<dyn DeviceScanner>,
        emitter: Arc<dyn EventEmitter>,
    ) -> CastResult<Self> {
        config.validate().map_err(CastError::InvalidArgument)?;
        if let Some(level) = config.level_filter() {
            log::set_max_level(level);
        }

        let registry = Arc::new(DeviceRegistry::new(Arc::clone(&emitter)));
        let scan = ScanController::new(
            scanner,
            Arc::clone(&registry),
            config.stale_after(),
            config.prune_interval(),
        );
        let shutdown = CancellationToken::new();
        let machine = SessionMachine::spawn(
            driver,
            emitter,
            MachineSettings {
                reconnect_timeout: config.reconnect_timeout(),
                reconnect_backoff_ms: config.reconnect_backoff_ms.clone(),
                outbound_queue_capacity: config.outbound_queue_capacity,
                command_channel_capacity: config.command_channel_capacity,
            },
            shutdown.clone(),
        );

        let id = uuid::Uuid::new_v4().to_string();
        log::info!("[CastEngine] Created {} (default app {})", id, config.app_id);
        Ok(Self {
            inner: Arc::new(EngineInner {
                id,
                config,
                registry,
                scan,
                commands: machine.commands,
                status: machine.status,
                shutdown,
                session_task: Mutex::new(Some(machine.task)),
            }),
        })
    }

    /// Creates an engine whose events fan out through a broadcast bridge sized
    /// by `config.event_channel_capacity`.
    pub fn with_broadcast(
        config: EngineConfig,
        driver: Arc<dyn ReceiverDriver>,
        scanner: Arc<dyn DeviceScanner>,
    ) -> CastResult<(Self, Arc<BroadcastEventBridge>)> {
        config.validate().map_err(CastError::InvalidArgument)?;
        let bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
        let engine = Self::create(config, driver, scanner, bridge.clone())?;
        Ok((engine, bridge))
    }

    /// Shuts the engine down: stops scanning, ends any session, and waits for
    /// the session task to exit. Later calls fail with `EngineShutDown`.
    pub async fn destroy(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        log::info!("[CastEngine] Destroying {}", self.inner.id);
        self.inner.shutdown.cancel();
        self.inner.scan.stop_scan().await;

        let task = self.inner.session_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::warn!("[CastEngine] Session task ended abnormally: {}", e);
            }
        }
    }

    /// Unique id of this engine instance, used in logs.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn ensure_running(&self) -> CastResult<()> {
        if self.inner.shutdown.is_cancelled() {
            Err(CastError::EngineShutDown)
        } else {
            Ok(())
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> CastResult<T> {
        self.ensure_running()?;
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(make(tx))
            .await
            .map_err(|_| CastError::EngineShutDown)?;
        rx.await.map_err(|_| CastError::EngineShutDown)?
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Discovery
    // ─────────────────────────────────────────────────────────────────────────

    /// Begins discovery. A second call while scanning succeeds without effect.
    pub async fn start_scan(&self) -> CastResult<()> {
        self.ensure_running()?;
        self.inner.scan.start_scan().await
    }

    /// Halts discovery and forgets every discovered device.
    pub async fn stop_scan(&self) -> CastResult<()> {
        self.ensure_running()?;
        self.inner.scan.stop_scan().await;
        Ok(())
    }

    pub async fn is_scanning(&self) -> bool {
        self.inner.scan.is_scanning().await
    }

    /// Registers the listener for device online/offline notifications.
    pub fn set_scan_listener(&self, listener: Option<Arc<dyn ScanListener>>) {
        self.inner.registry.set_listener(listener);
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.inner.registry.list()
    }

    pub fn get_device(&self, device_id: &str) -> CastResult<Device> {
        self.inner.registry.get(device_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session
    // ─────────────────────────────────────────────────────────────────────────

    /// Connects to a discovered receiver. Resolves once connected or failed.
    pub async fn connect(&self, device_id: &str) -> CastResult<()> {
        self.ensure_running()?;
        let device = self.inner.registry.get(device_id)?;
        self.request(|reply| Command::Connect { device, reply }).await
    }

    /// Ends the session, releasing its application context and message channel.
    pub async fn disconnect(&self) -> CastResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Launches a receiver application (the configured default when `app_id`
    /// is `None`). With `relaunch` false a running instance is joined instead.
    pub async fn launch_application(
        &self,
        app_id: Option<&str>,
        relaunch: bool,
    ) -> CastResult<ApplicationContext> {
        let app_id = app_id.unwrap_or(&self.inner.config.app_id).to_string();
        self.request(|reply| Command::Launch {
            app_id,
            relaunch,
            reply,
        })
        .await
    }

    /// Joins a running application, optionally a specific application session.
    pub async fn join_application(
        &self,
        app_id: Option<&str>,
        session_id: Option<&str>,
    ) -> CastResult<ApplicationContext> {
        let app_id = app_id.unwrap_or(&self.inner.config.app_id).to_string();
        let session_id = session_id.map(str::to_string);
        self.request(|reply| Command::Join {
            app_id,
            session_id,
            reply,
        })
        .await
    }

    /// Detaches from the application, leaving it running on the receiver.
    pub async fn leave_application(&self) -> CastResult<()> {
        self.request(|reply| Command::Leave { reply }).await
    }

    /// Stops the active application. With a session id, the id must match the
    /// active application context.
    pub async fn stop_application(&self, session_id: Option<&str>) -> CastResult<()> {
        let session_id = session_id.map(str::to_string);
        self.request(|reply| Command::Stop { session_id, reply })
            .await
    }

    /// Sets receiver volume. `level` must be within `[0, 1]`.
    pub async fn set_volume(&self, level: f32) -> CastResult<()> {
        self.request(|reply| Command::SetVolume { level, reply })
            .await
    }

    pub async fn set_muted(&self, muted: bool) -> CastResult<()> {
        self.request(|reply| Command::SetMuted { muted, reply })
            .await
    }

    /// Last-known session status. Never blocks.
    pub fn request_device_status(&self) -> SessionStatus {
        self.inner.status.snapshot()
    }

    /// Subscribes to session status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.is_connected()
    }

    pub fn is_connected_to_app(&self) -> bool {
        self.inner.status.is_connected_to_app()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.status.is_reconnecting()
    }

    /// Reconnect timeout in seconds.
    pub fn get_reconnect_timeout(&self) -> u64 {
        self.inner.status.read(|s| s.reconnect_timeout_secs)
    }

    /// Sets the reconnect timeout; applies to the next suspension.
    ///
    /// Accepts `0..=MAX_RECONNECT_TIMEOUT_SECS`.
    pub async fn set_reconnect_timeout(&self, seconds: i64) -> CastResult<()> {
        let secs = u64::try_from(seconds).map_err(|_| {
            CastError::InvalidArgument(format!("reconnect timeout {}s is negative", seconds))
        })?;
        if secs > MAX_RECONNECT_TIMEOUT_SECS {
            return Err(CastError::InvalidArgument(format!(
                "reconnect timeout {}s exceeds {}s",
                secs, MAX_RECONNECT_TIMEOUT_SECS
            )));
        }
        self.request(|reply| Command::SetReconnectTimeout { secs, reply })
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messaging
    // ─────────────────────────────────────────────────────────────────────────

    /// Sends a text message on an established namespace.
    ///
    /// Resolves once the receiver link has accepted the message.
    pub async fn send_text_message(&self, namespace: &str, text: &str) -> CastResult<()> {
        let namespace = namespace.to_string();
        let text = text.to_string();
        self.request(|reply| Command::SendText {
            namespace,
            text,
            reply,
        })
        .await
    }

    /// Establishes a namespace for the current session, optionally with a
    /// listener invoked for every message on it.
    pub async fn receive_text_message(
        &self,
        namespace: &str,
        listener: Option<Arc<dyn MessageListener>>,
    ) -> CastResult<()> {
        let namespace = namespace.to_string();
        self.request(|reply| Command::ReceiveText {
            namespace,
            listener,
            reply,
        })
        .await
    }

    /// Registers the connection listener for the current or next session.
    ///
    /// The listener is dropped when that session ends.
    pub async fn set_connection_listener(
        &self,
        listener: Option<Arc<dyn ConnectionListener>>,
    ) -> CastResult<()> {
        self.request(|reply| Command::SetConnectionListener { listener, reply })
            .await
    }

    /// Connects, launches (or joins) the application and opens `namespace`.
    ///
    /// If the application step fails the session is disconnected again and
    /// the application error is returned.
    pub async fn open_app_session(
        &self,
        device_id: &str,
        app_id: Option<&str>,
        namespace: &str,
        listener: Option<Arc<dyn MessageListener>>,
    ) -> CastResult<ApplicationContext> {
        self.connect(device_id).await?;

        let result = async {
            let context = self.launch_application(app_id, false).await?;
            self.receive_text_message(namespace, listener).await?;
            Ok(context)
        }
        .await;

        if result.is_err() {
            if let Err(e) = self.disconnect().await {
                log::debug!("[CastEngine] Disconnect after failed app session: {}", e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::discovery::ScanEvent;
    use crate::events::{BroadcastEventBridge, CastEvent, ConnectionEvent, NoopEventEmitter};
    use crate::session::{ConnectionState, DriverError, LinkEvent};
    use crate::test_fixtures::{
        device, MockDriver, MockScanner, RecordingListener, TEST_NAMESPACE,
    };
    use parking_lot::Mutex as PlMutex;

    struct Harness {
        engine: CastEngine,
        driver: Arc<MockDriver>,
        scanner: Arc<MockScanner>,
    }

    async fn harness_with(config: EngineConfig, emitter: Arc<dyn EventEmitter>) -> Harness {
        let driver = Arc::new(MockDriver::new());
        let scanner = Arc::new(MockScanner::new());
        let engine = CastEngine::create(config, driver.clone(), scanner.clone(), emitter).unwrap();
        engine.start_scan().await.unwrap();
        scanner.push(ScanEvent::Found(device("tv"))).await;
        scanner.push(ScanEvent::Found(device("speaker"))).await;
        settle().await;
        Harness {
            engine,
            driver,
            scanner,
        }
    }

    async fn harness() -> Harness {
        harness_with(EngineConfig::default(), Arc::new(NoopEventEmitter)).await
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for_state(engine: &CastEngine, state: ConnectionState) {
        let mut rx = engine.subscribe_status();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| s.state == state))
            .await
            .expect("state not reached in time")
            .expect("status channel closed");
    }

    async fn connected() -> Harness {
        let h = harness().await;
        h.engine.connect("tv").await.unwrap();
        h
    }

    #[tokio::test]
    async fn connect_unknown_device_is_not_found() {
        let h = harness().await;
        assert_eq!(
            h.engine.connect("nope").await,
            Err(CastError::DeviceNotFound("nope".into()))
        );
        assert_eq!(h.driver.connect_count(), 0);
    }

    #[tokio::test]
    async fn connect_and_disconnect() {
        let h = connected().await;
        assert!(h.engine.is_connected());
        let status = h.engine.request_device_status();
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.device_id.as_deref(), Some("tv"));

        h.engine.disconnect().await.unwrap();
        assert_eq!(
            h.engine.request_device_status().state,
            ConnectionState::Disconnected
        );
        settle().await;
        assert!(h.driver.last_link().is_closed());
    }

    #[tokio::test]
    async fn disconnect_from_idle_is_not_connected() {
        let h = harness().await;
        assert_eq!(h.engine.disconnect().await, Err(CastError::NotConnected));
    }

    #[tokio::test]
    async fn connect_failure_ends_disconnected() {
        let h = harness().await;
        h.driver
            .script_connects(vec![Err(DriverError::Unreachable("no route".into()))]);

        let err = h.engine.connect("tv").await.unwrap_err();
        assert!(matches!(err, CastError::ConnectFailed(_)));
        let status = h.engine.request_device_status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.last_error, Some(err));

        // a fresh session instance may be started afterwards
        h.engine.connect("tv").await.unwrap();
        assert!(h.engine.is_connected());
    }

    #[tokio::test]
    async fn connect_rejected_while_connecting() {
        let h = harness().await;
        h.driver.hold_connects();

        let engine = h.engine.clone();
        let first = tokio::spawn(async move { engine.connect("tv").await });
        wait_for_state(&h.engine, ConnectionState::Connecting).await;

        assert_eq!(
            h.engine.connect("tv").await,
            Err(CastError::AlreadyConnecting)
        );
        assert_eq!(
            h.engine.connect("speaker").await,
            Err(CastError::AlreadyConnecting)
        );

        h.driver.release_connects();
        first.await.unwrap().unwrap();
        assert_eq!(h.driver.connect_count(), 1);
        assert_eq!(h.engine.connect("tv").await, Err(CastError::AlreadyConnected));
    }

    #[tokio::test]
    async fn disconnect_while_connecting_fails_pending_connect() {
        let h = harness().await;
        h.driver.hold_connects();

        let engine = h.engine.clone();
        let pending = tokio::spawn(async move { engine.connect("tv").await });
        wait_for_state(&h.engine, ConnectionState::Connecting).await;

        h.engine.disconnect().await.unwrap();
        assert!(matches!(
            pending.await.unwrap(),
            Err(CastError::ConnectFailed(_))
        ));

        h.driver.release_connects();
        settle().await;
        assert_eq!(
            h.engine.request_device_status().state,
            ConnectionState::Disconnected
        );
        assert!(h.driver.last_link().is_closed());
    }

    #[tokio::test]
    async fn launch_creates_application_context() {
        let h = connected().await;
        let context = h.engine.launch_application(None, false).await.unwrap();
        assert_eq!(context.app_id, "CC1AD845");
        assert_eq!(context.session_id, "session-1");
        assert!(h.engine.is_connected_to_app());
    }

    #[tokio::test]
    async fn launch_requires_connection() {
        let h = harness().await;
        assert_eq!(
            h.engine.launch_application(Some("ABCD"), false).await,
            Err(CastError::NotConnected)
        );
    }

    #[tokio::test]
    async fn launch_failure_keeps_connection_without_context() {
        let h = harness().await;
        h.driver.fail_on_new_links(
            "launch_application",
            DriverError::Rejected("unknown app".into()),
        );
        h.engine.connect("tv").await.unwrap();

        let err = h.engine.launch_application(Some("BAD"), true).await.unwrap_err();
        assert!(matches!(err, CastError::ApplicationLaunchFailed(_)));
        assert!(h.engine.is_connected());
        assert!(!h.engine.is_connected_to_app());
    }

    #[tokio::test]
    async fn join_with_session_id() {
        let h = connected().await;
        let context = h
            .engine
            .join_application(Some("ABCD"), Some("existing-7"))
            .await
            .unwrap();
        assert_eq!(context.session_id, "existing-7");
        assert_eq!(
            context.provenance,
            crate::session::ApplicationProvenance::Joined
        );
    }

    #[tokio::test]
    async fn stop_and_leave_require_active_application() {
        let h = connected().await;
        assert_eq!(
            h.engine.leave_application().await,
            Err(CastError::NoActiveApplication)
        );
        assert_eq!(
            h.engine.stop_application(None).await,
            Err(CastError::NoActiveApplication)
        );
    }

    #[tokio::test]
    async fn stop_with_mismatched_session_id_is_not_found() {
        let h = connected().await;
        h.engine.launch_application(None, false).await.unwrap();

        assert_eq!(
            h.engine.stop_application(Some("other")).await,
            Err(CastError::ApplicationNotFound("other".into()))
        );
        assert!(h.engine.is_connected_to_app());

        h.engine.stop_application(Some("session-1")).await.unwrap();
        assert!(!h.engine.is_connected_to_app());
        assert!(h.engine.is_connected());
    }

    #[tokio::test]
    async fn leave_clears_context_only() {
        let h = connected().await;
        h.engine.launch_application(None, false).await.unwrap();
        h.engine.leave_application().await.unwrap();
        assert!(!h.engine.is_connected_to_app());
        assert!(h.engine.is_connected());
        assert!(h
            .driver
            .last_link()
            .calls()
            .contains(&"leave_application".to_string()));
    }

    #[tokio::test]
    async fn failed_stop_keeps_context() {
        let h = connected().await;
        h.engine.launch_application(None, false).await.unwrap();
        h.driver
            .last_link()
            .fail("stop_application", DriverError::Rejected("busy".into()));

        let err = h.engine.stop_application(None).await.unwrap_err();
        assert!(matches!(err, CastError::ApplicationStopFailed(_)));
        assert!(h.engine.is_connected_to_app());
    }

    #[tokio::test]
    async fn volume_validation_and_status() {
        let h = connected().await;

        assert!(matches!(
            h.engine.set_volume(1.5).await,
            Err(CastError::InvalidArgument(_))
        ));
        assert!(matches!(
            h.engine.set_volume(-0.2).await,
            Err(CastError::InvalidArgument(_))
        ));

        h.engine.set_volume(0.5).await.unwrap();
        assert_eq!(h.engine.request_device_status().volume, 0.5);

        h.engine.set_muted(true).await.unwrap();
        let status = h.engine.request_device_status();
        assert!(status.muted);
        assert_eq!(status.volume, 0.5);
    }

    #[tokio::test]
    async fn volume_requires_connection() {
        let h = harness().await;
        assert_eq!(h.engine.set_volume(0.5).await, Err(CastError::NotConnected));
        assert_eq!(h.engine.set_muted(true).await, Err(CastError::NotConnected));
    }

    #[tokio::test]
    async fn receiver_volume_reports_update_status() {
        let h = connected().await;
        let listener = Arc::new(RecordingListener::default());
        h.engine
            .set_connection_listener(Some(listener.clone()))
            .await
            .unwrap();

        h.driver
            .last_link()
            .emit(LinkEvent::StatusChanged {
                volume: 0.25,
                muted: false,
            })
            .await;
        settle().await;

        assert_eq!(h.engine.request_device_status().volume, 0.25);
        assert!(listener
            .calls()
            .contains(&"volume_changed:0.25:false".to_string()));
    }

    #[tokio::test]
    async fn reconnect_timeout_must_be_non_negative() {
        let h = harness().await;
        assert_eq!(h.engine.get_reconnect_timeout(), 15);
        assert!(matches!(
            h.engine.set_reconnect_timeout(-1).await,
            Err(CastError::InvalidArgument(_))
        ));
        h.engine.set_reconnect_timeout(30).await.unwrap();
        assert_eq!(h.engine.get_reconnect_timeout(), 30);
    }

    #[tokio::test]
    async fn reconnect_timeout_has_an_upper_bound() {
        let h = connected().await;
        assert!(matches!(
            h.engine.set_reconnect_timeout(i64::MAX).await,
            Err(CastError::InvalidArgument(_))
        ));
        assert!(matches!(
            h.engine
                .set_reconnect_timeout(MAX_RECONNECT_TIMEOUT_SECS as i64 + 1)
                .await,
            Err(CastError::InvalidArgument(_))
        ));
        assert_eq!(h.engine.get_reconnect_timeout(), 15);

        h.engine
            .set_reconnect_timeout(MAX_RECONNECT_TIMEOUT_SECS as i64)
            .await
            .unwrap();
        assert_eq!(h.engine.get_reconnect_timeout(), MAX_RECONNECT_TIMEOUT_SECS);
        assert!(h.engine.is_connected());
    }

    #[tokio::test]
    async fn disconnect_clears_application_and_channel() {
        let h = connected().await;
        h.engine.launch_application(None, false).await.unwrap();
        h.engine
            .receive_text_message(TEST_NAMESPACE, None)
            .await
            .unwrap();

        h.engine.disconnect().await.unwrap();
        let status = h.engine.request_device_status();
        assert!(status.application.is_none());
        assert_eq!(
            h.engine.send_text_message(TEST_NAMESPACE, "hi").await,
            Err(CastError::NotConnected)
        );

        // a new session starts without the old namespace
        h.engine.connect("tv").await.unwrap();
        assert_eq!(
            h.engine.send_text_message(TEST_NAMESPACE, "hi").await,
            Err(CastError::ChannelNotEstablished(TEST_NAMESPACE.into()))
        );
    }

    #[tokio::test]
    async fn send_while_disconnected_never_transmits() {
        let h = connected().await;
        h.engine
            .receive_text_message(TEST_NAMESPACE, None)
            .await
            .unwrap();
        h.engine.disconnect().await.unwrap();

        for _ in 0..3 {
            assert_eq!(
                h.engine.send_text_message(TEST_NAMESPACE, "hi").await,
                Err(CastError::NotConnected)
            );
        }
        assert!(h.driver.last_link().sent().is_empty());
    }

    #[tokio::test]
    async fn send_and_transmit_failure() {
        let h = connected().await;
        h.engine
            .receive_text_message(TEST_NAMESPACE, None)
            .await
            .unwrap();

        h.engine
            .send_text_message(TEST_NAMESPACE, "hello")
            .await
            .unwrap();
        assert_eq!(
            h.driver.last_link().sent(),
            vec![(TEST_NAMESPACE.to_string(), "hello".to_string())]
        );

        h.driver
            .last_link()
            .fail("send_text", DriverError::Transport("reset".into()));
        assert!(matches!(
            h.engine.send_text_message(TEST_NAMESPACE, "again").await,
            Err(CastError::TransmitFailed(_))
        ));
        assert!(h.engine.is_connected());
    }

    #[tokio::test]
    async fn inbound_messages_reach_listeners_in_order() {
        let h = connected().await;
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        h.engine
            .receive_text_message(
                TEST_NAMESPACE,
                Some(Arc::new(move |_: &str, text: &str| {
                    sink.lock().push(text.to_string())
                })),
            )
            .await
            .unwrap();

        let link = h.driver.last_link();
        for i in 0..20 {
            link.emit(LinkEvent::MessageReceived {
                namespace: TEST_NAMESPACE.into(),
                text: format!("m{}", i),
            })
            .await;
        }
        for _ in 0..200 {
            if seen.lock().len() == 20 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let expected: Vec<String> = (0..20).map(|i| format!("m{}", i)).collect();
        assert_eq!(*seen.lock(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_loss_reconnects_with_context_intact() {
        let h = connected().await;
        let context = h.engine.launch_application(None, false).await.unwrap();
        h.engine
            .receive_text_message(TEST_NAMESPACE, None)
            .await
            .unwrap();
        let first_link = h.driver.last_link();

        first_link
            .emit(LinkEvent::ConnectionSuspended {
                reason: "wifi blip".into(),
            })
            .await;
        wait_for_state(&h.engine, ConnectionState::Suspended).await;
        assert!(h.engine.is_reconnecting());
        assert!(!h.engine.is_connected());

        tokio::time::sleep(Duration::from_millis(50)).await;
        wait_for_state(&h.engine, ConnectionState::Connected).await;

        let status = h.engine.request_device_status();
        assert!(!status.reconnecting);
        let restored = status.application.expect("application context kept");
        assert_eq!(restored.app_id, context.app_id);
        assert_eq!(restored.session_id, context.session_id);
        assert_eq!(h.driver.link_count(), 2);
        assert!(first_link.is_closed());

        // message channel survives on the new link
        h.engine
            .send_text_message(TEST_NAMESPACE, "after")
            .await
            .unwrap();
        assert_eq!(h.driver.last_link().sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_from_abandoned_link_does_not_end_reconnect() {
        let h = connected().await;
        let context = h.engine.launch_application(None, false).await.unwrap();
        let first_link = h.driver.last_link();

        first_link
            .emit(LinkEvent::ConnectionSuspended {
                reason: "wifi blip".into(),
            })
            .await;
        first_link
            .emit(LinkEvent::ConnectionClosed { reason: None })
            .await;
        settle().await;
        assert!(h.engine.is_reconnecting());

        tokio::time::sleep(Duration::from_millis(50)).await;
        wait_for_state(&h.engine, ConnectionState::Connected).await;

        let status = h.engine.request_device_status();
        let restored = status.application.expect("application context kept");
        assert_eq!(restored.session_id, context.session_id);
        assert_eq!(h.driver.link_count(), 2);
        assert!(first_link.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn loss_beyond_timeout_disconnects() {
        let h = connected().await;
        h.engine.launch_application(None, false).await.unwrap();
        h.driver
            .fail_all_connects(Some(DriverError::Unreachable("gone".into())));

        h.driver
            .last_link()
            .emit(LinkEvent::ConnectionSuspended {
                reason: "power loss".into(),
            })
            .await;
        wait_for_state(&h.engine, ConnectionState::Disconnected).await;

        let status = h.engine.request_device_status();
        assert_eq!(status.last_error, Some(CastError::ReconnectTimeout));
        assert!(status.application.is_none());
        assert!(!status.reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rejoin_reports_degraded() {
        let bridge = BroadcastEventBridge::new(64);
        let mut events = bridge.subscribe();
        let h = harness_with(EngineConfig::default(), Arc::new(bridge)).await;
        h.engine.connect("tv").await.unwrap();
        h.engine.launch_application(None, false).await.unwrap();
        h.driver.fail_on_new_links(
            "join_application",
            DriverError::Rejected("session gone".into()),
        );

        h.driver
            .last_link()
            .emit(LinkEvent::ConnectionSuspended {
                reason: "blip".into(),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        wait_for_state(&h.engine, ConnectionState::Connected).await;

        assert!(!h.engine.is_connected_to_app());
        let mut degraded = false;
        while let Ok(event) = events.try_recv() {
            if let CastEvent::Connection(ConnectionEvent::Degraded { app_id, .. }) = event {
                assert_eq!(app_id, "CC1AD845");
                degraded = true;
            }
        }
        assert!(degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_reconnect_cancels_supervisor() {
        let h = connected().await;
        h.driver
            .fail_all_connects(Some(DriverError::Unreachable("gone".into())));
        h.driver
            .last_link()
            .emit(LinkEvent::ConnectionSuspended {
                reason: "blip".into(),
            })
            .await;
        wait_for_state(&h.engine, ConnectionState::Suspended).await;

        h.engine.disconnect().await.unwrap();
        let attempts = h.driver.connect_count();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.driver.connect_count(), attempts);
        let status = h.engine.request_device_status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_rejected_while_reconnecting() {
        let h = connected().await;
        h.driver
            .fail_all_connects(Some(DriverError::Unreachable("gone".into())));
        h.driver
            .last_link()
            .emit(LinkEvent::ConnectionSuspended {
                reason: "blip".into(),
            })
            .await;
        wait_for_state(&h.engine, ConnectionState::Suspended).await;

        assert_eq!(
            h.engine.connect("speaker").await,
            Err(CastError::AlreadyConnecting)
        );
    }

    #[tokio::test]
    async fn receiver_closing_ends_session() {
        let h = connected().await;
        let listener = Arc::new(RecordingListener::default());
        h.engine
            .set_connection_listener(Some(listener.clone()))
            .await
            .unwrap();

        h.driver
            .last_link()
            .emit(LinkEvent::ConnectionClosed { reason: None })
            .await;
        wait_for_state(&h.engine, ConnectionState::Disconnected).await;
        assert!(listener.calls().contains(&"disconnected:none".to_string()));
    }

    #[tokio::test]
    async fn receiver_stopping_app_clears_context() {
        let h = connected().await;
        h.engine.launch_application(None, false).await.unwrap();
        h.driver
            .last_link()
            .emit(LinkEvent::ApplicationStopped {
                reason: Some("user quit".into()),
            })
            .await;
        settle().await;
        assert!(!h.engine.is_connected_to_app());
        assert!(h.engine.is_connected());
    }

    #[tokio::test]
    async fn connection_listener_lifecycle() {
        let h = harness().await;
        let listener = Arc::new(RecordingListener::default());
        h.engine
            .set_connection_listener(Some(listener.clone()))
            .await
            .unwrap();

        h.engine.connect("tv").await.unwrap();
        h.engine.launch_application(None, false).await.unwrap();
        h.engine.disconnect().await.unwrap();

        let calls = listener.calls();
        assert_eq!(
            calls,
            vec![
                "state:connecting",
                "state:connected",
                "connected",
                "connected_to_application:CC1AD845:session-1",
                "disconnected_from_application",
                "state:disconnected",
                "disconnected:none",
            ]
        );

        // deregistered with the session
        h.engine.connect("tv").await.unwrap();
        assert_eq!(listener.calls().len(), calls.len());
    }

    #[tokio::test]
    async fn open_app_session_connects_launches_and_listens() {
        let h = harness().await;
        let context = h
            .engine
            .open_app_session("tv", Some("ABCD1234"), TEST_NAMESPACE, None)
            .await
            .unwrap();
        assert_eq!(context.app_id, "ABCD1234");
        h.engine
            .send_text_message(TEST_NAMESPACE, "ping")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn open_app_session_disconnects_on_app_failure() {
        let h = harness().await;
        h.driver.fail_on_new_links(
            "launch_application",
            DriverError::Rejected("not allowed".into()),
        );

        let err = h
            .engine
            .open_app_session("tv", None, TEST_NAMESPACE, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::ApplicationLaunchFailed(_)));
        assert_eq!(
            h.engine.request_device_status().state,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn stop_scan_forgets_devices_while_session_continues() {
        let h = connected().await;
        h.engine.stop_scan().await.unwrap();

        assert!(h.engine.list_devices().is_empty());
        assert_eq!(h.scanner.stop_count(), 1);
        assert!(h.engine.is_connected());
        assert_eq!(
            h.engine.request_device_status().device_id.as_deref(),
            Some("tv")
        );

        // only what the new scan reports shows up again
        h.engine.start_scan().await.unwrap();
        h.scanner.push(ScanEvent::Found(device("speaker"))).await;
        settle().await;
        let ids: Vec<_> = h.engine.list_devices().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["speaker"]);

        h.engine
            .receive_text_message(TEST_NAMESPACE, None)
            .await
            .unwrap();
        h.engine
            .send_text_message(TEST_NAMESPACE, "still here")
            .await
            .unwrap();
        assert_eq!(h.driver.last_link().sent().len(), 1);
    }

    #[tokio::test]
    async fn destroy_shuts_everything_down() {
        let h = connected().await;
        h.engine.destroy().await;

        assert_eq!(
            h.engine.request_device_status().state,
            ConnectionState::Disconnected
        );
        assert_eq!(h.engine.connect("tv").await, Err(CastError::EngineShutDown));
        assert_eq!(h.engine.start_scan().await, Err(CastError::EngineShutDown));
        assert!(!h.engine.is_scanning().await);
        settle().await;
        assert!(h.driver.last_link().is_closed());
    }

    #[tokio::test]
    async fn broadcast_engine_publishes_device_events() {
        let scanner = Arc::new(MockScanner::new());
        let (engine, bridge) = CastEngine::with_broadcast(
            EngineConfig::default(),
            Arc::new(MockDriver::new()),
            scanner.clone(),
        )
        .unwrap();
        let mut events = bridge.subscribe();

        engine.start_scan().await.unwrap();
        scanner.push(ScanEvent::Found(device("tv"))).await;
        settle().await;

        let mut online = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, CastEvent::Device(crate::events::DeviceEvent::Online { .. })) {
                online = true;
            }
        }
        assert!(online);
        engine.destroy().await;
    }

    #[tokio::test]
    async fn engines_are_independent() {
        let a = harness().await;
        let b = harness().await;
        assert_ne!(a.engine.id(), b.engine.id());

        a.engine.connect("tv").await.unwrap();
        assert!(a.engine.is_connected());
        assert!(!b.engine.is_connected());
    }

    #[tokio::test]
    async fn create_rejects_invalid_config() {
        let config = EngineConfig {
            reconnect_backoff_ms: vec![],
            ..EngineConfig::default()
        };
        let result = CastEngine::create(
            config,
            Arc::new(MockDriver::new()),
            Arc::new(MockScanner::new()),
            Arc::new(NoopEventEmitter),
        );
        assert!(matches!(result, Err(CastError::InvalidArgument(_))));
    }
}
