//! Message channel: per-session text messaging over named namespaces.
//!
//! Two tasks live for as long as the session does:
//! - a writer that drains the outbound queue onto the current link, one
//!   message at a time, and fails whatever is still queued on teardown;
//! - a dispatcher that invokes listeners for inbound messages in arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::driver::ReceiverLink;
use super::listener::{ConnectionListener, MessageListener};
use crate::error::{CastError, CastResult};

/// Slot holding the session's current link. Empty while suspended.
pub(crate) type LinkSlot = Arc<RwLock<Option<Arc<dyn ReceiverLink>>>>;

type NamespaceMap = Arc<RwLock<HashMap<String, Vec<Arc<dyn MessageListener>>>>>;

struct Outbound {
    namespace: String,
    text: String,
    reply: oneshot::Sender<CastResult<()>>,
}

struct Inbound {
    namespace: String,
    text: String,
    listener: Option<Arc<dyn ConnectionListener>>,
}

/// Message channel binding owned by one session instance.
///
/// Dropping the channel (after [`close`](Self::close)) lets the dispatcher
/// finish delivering what already arrived and then exit.
pub(crate) struct MessageChannel {
    namespaces: NamespaceMap,
    outbound: mpsc::Sender<Outbound>,
    inbound: mpsc::UnboundedSender<Inbound>,
    cancel: CancellationToken,
}

impl MessageChannel {
    /// Spawns the writer and dispatcher tasks for a new session.
    pub(crate) fn open(link: LinkSlot, queue_capacity: usize, cancel: CancellationToken) -> Self {
        let namespaces: NamespaceMap = Arc::new(RwLock::new(HashMap::new()));
        let (outbound, outbound_rx) = mpsc::channel(queue_capacity);
        let (inbound, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(outbound_rx, link, cancel.clone()));
        tokio::spawn(run_dispatcher(inbound_rx, Arc::clone(&namespaces)));

        Self {
            namespaces,
            outbound,
            inbound,
            cancel,
        }
    }

    /// Establishes a namespace, optionally with a listener for it.
    pub(crate) fn register(&self, namespace: &str, listener: Option<Arc<dyn MessageListener>>) {
        let mut namespaces = self.namespaces.write();
        let listeners = namespaces.entry(namespace.to_string()).or_default();
        if let Some(listener) = listener {
            listeners.push(listener);
        }
        log::debug!(
            "[MessageChannel] Namespace {} established ({} listener(s))",
            namespace,
            listeners.len()
        );
    }

    pub(crate) fn is_established(&self, namespace: &str) -> bool {
        self.namespaces.read().contains_key(namespace)
    }

    /// Queues a message. The result is delivered through `reply` once the
    /// link has accepted (or refused) it.
    pub(crate) fn send(
        &self,
        namespace: String,
        text: String,
        reply: oneshot::Sender<CastResult<()>>,
    ) {
        if !self.is_established(&namespace) {
            let _ = reply.send(Err(CastError::ChannelNotEstablished(namespace)));
            return;
        }
        let item = Outbound {
            namespace,
            text,
            reply,
        };
        if let Err(e) = self.outbound.try_send(item) {
            let (item, error) = match e {
                mpsc::error::TrySendError::Full(item) => (
                    item,
                    CastError::TransmitFailed("outbound queue full".to_string()),
                ),
                mpsc::error::TrySendError::Closed(item) => (item, CastError::NotConnected),
            };
            let _ = item.reply.send(Err(error));
        }
    }

    /// Hands an inbound message to the dispatcher.
    pub(crate) fn deliver(
        &self,
        namespace: String,
        text: String,
        listener: Option<Arc<dyn ConnectionListener>>,
    ) {
        let message = Inbound {
            namespace,
            text,
            listener,
        };
        if self.inbound.send(message).is_err() {
            log::warn!("[MessageChannel] Dispatcher gone, dropping inbound message");
        }
    }

    /// Stops the writer; queued messages fail with `NotConnected`.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

async fn run_writer(mut rx: mpsc::Receiver<Outbound>, link: LinkSlot, cancel: CancellationToken) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let current = link.read().clone();
        let result = match current {
            Some(link) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(CastError::NotConnected),
                    r = link.send_text(&item.namespace, &item.text) => r.map_err(|e| {
                        log::warn!(
                            "[MessageChannel] Transmit on {} failed: {}",
                            item.namespace,
                            e
                        );
                        CastError::TransmitFailed(e.to_string())
                    }),
                }
            }
            None => Err(CastError::NotConnected),
        };
        let _ = item.reply.send(result);
    }

    rx.close();
    let mut drained = 0usize;
    while let Ok(item) = rx.try_recv() {
        let _ = item.reply.send(Err(CastError::NotConnected));
        drained += 1;
    }
    if drained > 0 {
        log::debug!("[MessageChannel] Failed {} queued message(s) on teardown", drained);
    }
}

async fn run_dispatcher(mut rx: mpsc::UnboundedReceiver<Inbound>, namespaces: NamespaceMap) {
    while let Some(message) = rx.recv().await {
        let listeners = namespaces
            .read()
            .get(&message.namespace)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener.on_message(&message.namespace, &message.text);
        }
        if let Some(listener) = message.listener {
            listener.message_received(&message.namespace, &message.text);
        }
    }
}
