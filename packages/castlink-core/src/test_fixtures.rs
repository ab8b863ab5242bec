//! Shared test doubles for the scanner and receiver driver seams.
//!
//! `MockDriver` hands out scripted `MockLink`s and records every call so tests
//! can assert on what the engine actually asked the receiver to do.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::discovery::{Device, DeviceScanner, DiscoveryError, DiscoveryResult, ScanEvent};
use crate::error::CastError;
use crate::session::{
    ApplicationMetadata, ApplicationSession, ConnectionListener, ConnectionState, DriverError,
    DriverResult, LinkEvent, ReceiverDriver, ReceiverLink,
};

pub(crate) const TEST_NAMESPACE: &str = "urn:x-cast:com.example.chat";

pub(crate) fn device(id: &str) -> Device {
    Device::new(id, format!("Receiver {}", id), "192.168.1.50".parse().unwrap(), 8009)
}

fn metadata(app_id: &str) -> ApplicationMetadata {
    ApplicationMetadata {
        application_id: app_id.to_string(),
        application_name: "Mock Receiver App".to_string(),
        namespaces: vec![TEST_NAMESPACE.to_string()],
        ..ApplicationMetadata::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scanner
// ─────────────────────────────────────────────────────────────────────────────

/// Scanner whose events are pushed by the test.
#[derive(Default)]
pub(crate) struct MockScanner {
    tx: Mutex<Option<mpsc::Sender<ScanEvent>>>,
    fail_next: Mutex<Option<String>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl MockScanner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_next_start(&self, reason: &str) {
        *self.fail_next.lock() = Some(reason.to_string());
    }

    pub(crate) async fn push(&self, event: ScanEvent) {
        let tx = self.tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub(crate) fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceScanner for MockScanner {
    async fn start(&self) -> DiscoveryResult<mpsc::Receiver<ScanEvent>> {
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(DiscoveryError::Unavailable(reason));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.tx.lock().take();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

/// Receiver driver with scripted connect results.
pub(crate) struct MockDriver {
    script: Mutex<VecDeque<DriverResult<()>>>,
    fail_all: Mutex<Option<DriverError>>,
    gate: watch::Sender<bool>,
    link_failures: Mutex<HashMap<&'static str, DriverError>>,
    links: Mutex<Vec<Arc<MockLink>>>,
    connects: AtomicUsize,
    hold_joins: AtomicBool,
}

impl MockDriver {
    pub(crate) fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            script: Mutex::new(VecDeque::new()),
            fail_all: Mutex::new(None),
            gate,
            link_failures: Mutex::new(HashMap::new()),
            links: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            hold_joins: AtomicBool::new(false),
        }
    }

    /// Results for the next connects, in order; afterwards connects succeed.
    pub(crate) fn script_connects(&self, results: Vec<DriverResult<()>>) {
        self.script.lock().extend(results);
    }

    /// Makes every connect fail with `error` (or succeed again with `None`).
    pub(crate) fn fail_all_connects(&self, error: Option<DriverError>) {
        *self.fail_all.lock() = error;
    }

    /// Holds connects until [`release_connects`](Self::release_connects).
    pub(crate) fn hold_connects(&self) {
        self.gate.send_replace(false);
    }

    pub(crate) fn release_connects(&self) {
        self.gate.send_replace(true);
    }

    /// Every link created from now on fails `op` with `error`.
    pub(crate) fn fail_on_new_links(&self, op: &'static str, error: DriverError) {
        self.link_failures.lock().insert(op, error);
    }

    /// Every link created from now on blocks `join_application` until
    /// [`MockLink::release_joins`] is called on it.
    pub(crate) fn hold_joins_on_new_links(&self) {
        self.hold_joins.store(true, Ordering::SeqCst);
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Most recently created link.
    pub(crate) fn last_link(&self) -> Arc<MockLink> {
        self.links
            .lock()
            .last()
            .cloned()
            .expect("no link has been created")
    }
}

#[async_trait]
impl ReceiverDriver for MockDriver {
    async fn connect(
        &self,
        _device: &Device,
        events: mpsc::Sender<LinkEvent>,
    ) -> DriverResult<Arc<dyn ReceiverLink>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        loop {
            let open = *gate.borrow_and_update();
            if open || gate.changed().await.is_err() {
                break;
            }
        }

        let failure = self.fail_all.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        let scripted = self.script.lock().pop_front();
        if let Some(Err(error)) = scripted {
            return Err(error);
        }

        let link = Arc::new(MockLink::new(Some(events)));
        *link.failures.lock() = self.link_failures.lock().clone();
        if self.hold_joins.load(Ordering::SeqCst) {
            link.join_gate.send_replace(false);
        }
        self.links.lock().push(Arc::clone(&link));
        Ok(link)
    }
}

/// Recording receiver link.
pub(crate) struct MockLink {
    events: Option<mpsc::Sender<LinkEvent>>,
    failures: Mutex<HashMap<&'static str, DriverError>>,
    calls: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
    launches: AtomicUsize,
    join_gate: watch::Sender<bool>,
}

impl MockLink {
    fn new(events: Option<mpsc::Sender<LinkEvent>>) -> Self {
        Self {
            events,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            launches: AtomicUsize::new(0),
            join_gate: watch::channel(true).0,
        }
    }

    /// A link not attached to any driver (no event channel).
    pub(crate) fn detached() -> Arc<Self> {
        Arc::new(Self::new(None))
    }

    /// Makes `op` fail with `error` until cleared.
    pub(crate) fn fail(&self, op: &'static str, error: DriverError) {
        self.failures.lock().insert(op, error);
    }

    pub(crate) fn release_joins(&self) {
        self.join_gate.send_replace(true);
    }

    pub(crate) fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Pushes an unsolicited event as the receiver would.
    pub(crate) async fn emit(&self, event: LinkEvent) {
        if let Some(events) = self.events.as_ref() {
            let _ = events.send(event).await;
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self, op: &'static str) -> DriverResult<()> {
        self.calls.lock().push(op.to_string());
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        match self.failures.lock().get(op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReceiverLink for MockLink {
    async fn launch_application(
        &self,
        app_id: &str,
        _relaunch: bool,
    ) -> DriverResult<ApplicationSession> {
        self.check("launch_application")?;
        let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ApplicationSession {
            session_id: format!("session-{}", n),
            metadata: metadata(app_id),
        })
    }

    async fn join_application(
        &self,
        app_id: &str,
        session_id: Option<&str>,
    ) -> DriverResult<ApplicationSession> {
        let mut gate = self.join_gate.subscribe();
        loop {
            let open = *gate.borrow_and_update();
            if open || gate.changed().await.is_err() {
                break;
            }
        }
        self.check("join_application")?;
        Ok(ApplicationSession {
            session_id: session_id.unwrap_or("joined-1").to_string(),
            metadata: metadata(app_id),
        })
    }

    async fn leave_application(&self) -> DriverResult<()> {
        self.check("leave_application")
    }

    async fn stop_application(&self, _session_id: &str) -> DriverResult<()> {
        self.check("stop_application")
    }

    async fn set_volume(&self, _level: f32) -> DriverResult<()> {
        self.check("set_volume")
    }

    async fn set_muted(&self, _muted: bool) -> DriverResult<()> {
        self.check("set_muted")
    }

    async fn send_text(&self, namespace: &str, text: &str) -> DriverResult<()> {
        self.check("send_text")?;
        self.sent
            .lock()
            .push((namespace.to_string(), text.to_string()));
        Ok(())
    }

    async fn request_status(&self) -> DriverResult<()> {
        self.check("request_status")
    }

    async fn close(&self) {
        self.calls.lock().push("close".to_string());
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Listeners
// ─────────────────────────────────────────────────────────────────────────────

/// Connection listener that records callbacks as strings.
#[derive(Default)]
pub(crate) struct RecordingListener {
    calls: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl ConnectionListener for RecordingListener {
    fn connected(&self) {
        self.record("connected".into());
    }

    fn connected_to_application(&self, metadata: &ApplicationMetadata, session_id: &str) {
        self.record(format!(
            "connected_to_application:{}:{}",
            metadata.application_id, session_id
        ));
    }

    fn failed_to_connect(&self, error: &CastError) {
        self.record(format!("failed_to_connect:{}", crate::ErrorCode::code(error)));
    }

    fn failed_to_connect_to_application(&self, error: &CastError) {
        self.record(format!(
            "failed_to_connect_to_application:{}",
            crate::ErrorCode::code(error)
        ));
    }

    fn disconnected(&self, error: Option<&CastError>) {
        let code = error.map(crate::ErrorCode::code).unwrap_or("none");
        self.record(format!("disconnected:{}", code));
    }

    fn disconnected_from_application(&self, _error: Option<&CastError>) {
        self.record("disconnected_from_application".into());
    }

    fn volume_changed(&self, level: f32, muted: bool) {
        self.record(format!("volume_changed:{}:{}", level, muted));
    }

    fn reconnecting(&self, attempt: u32) {
        self.record(format!("reconnecting:{}", attempt));
    }

    fn state_changed(&self, state: ConnectionState) {
        self.record(format!("state:{}", state));
    }

    fn message_received(&self, namespace: &str, text: &str) {
        self.record(format!("message:{}:{}", namespace, text));
    }
}
