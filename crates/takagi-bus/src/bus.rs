//! Event bus
//!
//! Handlers register against dotted addresses (optionally with `*`
//! wildcards) and receive messages on a dedicated bounded queue, one task
//! per handler, so a single handler always sees messages in publish order.
//! Delivery happens outside the registry lock; handler panics are caught
//! and logged, never propagated to the publisher.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::buffer::{BufferConfig, MessageBuffer};
use crate::error::{BusError, Result};
use crate::message::{address_matches, BusMessage, Scope};

/// Identifier returned by handler registration.
pub type HandlerId = Uuid;

/// How long an unused reply consumer lives before it is reclaimed.
const REPLY_CONSUMER_TTL: Duration = Duration::from_secs(30);

/// Per-handler queue depth. Publishes past this drop the event with a
/// warning; point-to-point sends wait for space.
const HANDLER_QUEUE_DEPTH: usize = 256;

/// Forwarder from GLOBAL-scope publications to CoAP observers, installed
/// while the server is running.
pub trait ObserveBridge: Send + Sync {
    fn forward(&self, address: &str, body: &Value);
}

type Callback = Arc<dyn Fn(BusMessage) + Send + Sync>;

struct Registration {
    id: HandlerId,
    local_only: bool,
    queue: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct BusInner {
    /// Registrations keyed by their (possibly wildcard) address.
    handlers: HashMap<String, Vec<Registration>>,
    /// Round-robin cursors for point-to-point sends.
    cursors: HashMap<String, usize>,
}

/// Address-keyed publish/subscribe bus.
pub struct EventBus {
    inner: Mutex<BusInner>,
    buffer: Option<MessageBuffer>,
    /// Latest GLOBAL-scope body per address, read-mostly.
    latest: DashMap<String, Value>,
    bridge: RwLock<Option<Arc<dyn ObserveBridge>>>,
}

impl EventBus {
    /// Bus without message buffering.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner::default()),
            buffer: None,
            latest: DashMap::new(),
            bridge: RwLock::new(None),
        }
    }

    /// Bus with a bounded per-address replay buffer.
    pub fn with_buffer(config: BufferConfig) -> Self {
        Self {
            buffer: Some(MessageBuffer::new(config)),
            ..Self::new()
        }
    }

    pub fn buffer(&self) -> Option<&MessageBuffer> {
        self.buffer.as_ref()
    }

    /// Install the CoAP observer bridge for GLOBAL-scope publications.
    pub fn set_observe_bridge(&self, bridge: Arc<dyn ObserveBridge>) {
        *self.bridge.write() = Some(bridge);
    }

    pub fn clear_observe_bridge(&self) {
        *self.bridge.write() = None;
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a handler for an address (wildcards allowed).
    pub fn consumer<F>(&self, address: &str, handler: F) -> HandlerId
    where
        F: Fn(BusMessage) + Send + Sync + 'static,
    {
        self.consumer_with(address, false, handler)
    }

    /// Register a handler, optionally marked local-only so the GLOBAL
    /// bridge skips it.
    pub fn consumer_with<F>(&self, address: &str, local_only: bool, handler: F) -> HandlerId
    where
        F: Fn(BusMessage) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let callback: Callback = Arc::new(handler);
        let (tx, mut rx) = mpsc::channel::<BusMessage>(HANDLER_QUEUE_DEPTH);

        // One task per handler keeps per-handler delivery in publish order.
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let cb = callback.clone();
                let result = std::panic::catch_unwind(AssertUnwindSafe(move || cb(msg)));
                if result.is_err() {
                    error!("bus handler panicked; continuing");
                }
            }
        });

        let mut inner = self.inner.lock();
        inner.handlers.entry(address.to_string()).or_default().push(Registration {
            id,
            local_only,
            queue: tx,
        });
        debug!("consumer registered on {}", address);
        id
    }

    /// Remove a handler by id. Returns whether it was found.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut inner = self.inner.lock();
        let mut found = false;
        inner.handlers.retain(|_, regs| {
            let before = regs.len();
            regs.retain(|r| r.id != id);
            found |= regs.len() != before;
            !regs.is_empty()
        });
        found
    }

    pub fn handler_count(&self) -> usize {
        self.inner.lock().handlers.values().map(Vec::len).sum()
    }

    // =========================================================================
    // Publish / subscribe
    // =========================================================================

    /// Publish to every handler matching the address, exact or wildcard.
    pub fn publish(&self, address: &str, body: Value) {
        self.publish_with(address, body, HashMap::new(), Scope::Local);
    }

    pub fn publish_scoped(&self, address: &str, body: Value, scope: Scope) {
        self.publish_with(address, body, HashMap::new(), scope);
    }

    pub fn publish_with(
        &self,
        address: &str,
        body: Value,
        headers: HashMap<String, String>,
        scope: Scope,
    ) {
        let msg = BusMessage::new(address, body)
            .with_headers(headers)
            .with_scope(scope);

        // Buffer writes happen before any local delivery.
        if let Some(buffer) = &self.buffer {
            buffer.store(&msg);
        }

        if scope == Scope::Global {
            self.latest.insert(address.to_string(), msg.body.clone());
            if let Some(bridge) = self.bridge.read().as_ref() {
                bridge.forward(address, &msg.body);
            }
        }

        let queues: Vec<(String, mpsc::Sender<BusMessage>)> = {
            let inner = self.inner.lock();
            inner
                .handlers
                .iter()
                .filter(|(pattern, _)| address_matches(pattern, address))
                .flat_map(|(pattern, regs)| {
                    regs.iter().map(|r| (pattern.clone(), r.queue.clone()))
                })
                .collect()
        };

        for (pattern, queue) in queues {
            match queue.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("handler queue full on {}, dropping event {}", pattern, address);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Latest GLOBAL-scope body seen for an address.
    pub fn latest(&self, address: &str) -> Option<Value> {
        self.latest.get(address).map(|entry| entry.value().clone())
    }

    /// Buffered messages for an address since an instant, oldest first.
    pub fn replay(&self, address: &str, since: Option<Instant>) -> Vec<BusMessage> {
        self.buffer
            .as_ref()
            .map(|b| b.replay(address, since))
            .unwrap_or_default()
    }

    // =========================================================================
    // Point-to-point / request-reply
    // =========================================================================

    /// Deliver to exactly one handler registered on the address, selected
    /// by a per-address round-robin cursor. Waits for queue space.
    pub async fn send(&self, address: &str, body: Value) {
        self.send_message(BusMessage::new(address, body)).await;
    }

    async fn send_message(&self, msg: BusMessage) {
        let queue = {
            let mut inner = self.inner.lock();
            let len = match inner.handlers.get(&msg.address) {
                Some(regs) if !regs.is_empty() => regs.len(),
                Some(_) => return,
                None => {
                    debug!("send to {} with no consumer", msg.address);
                    return;
                }
            };
            let cursor = inner.cursors.entry(msg.address.clone()).or_insert(0);
            let idx = *cursor % len;
            *cursor = (*cursor + 1) % len;
            let queue = inner.handlers.get(&msg.address).unwrap()[idx].queue.clone();
            queue
        };

        if queue.send(msg).await.is_err() {
            debug!("send target queue closed");
        }
    }

    /// Point-to-point send with a reply callback. A unique reply address
    /// is allocated and carried in the message's reply-to header; the
    /// temporary consumer is reclaimed after 30 seconds if unused.
    pub async fn send_expecting<F>(self: &Arc<Self>, address: &str, body: Value, reply_handler: F)
    where
        F: Fn(BusMessage) + Send + Sync + 'static,
    {
        let reply_address = format!("reply.{}", Uuid::new_v4().simple());
        let reply_id = self.consumer(&reply_address, reply_handler);

        let bus = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(REPLY_CONSUMER_TTL).await;
            if let Some(bus) = bus.upgrade() {
                bus.unregister(reply_id);
            }
        });

        self.send_message(BusMessage::new(address, body).with_reply_to(reply_address))
            .await;
    }

    /// Point-to-point send expecting a reply, resolving when it arrives.
    /// The temporary reply consumer is reclaimed after 30 seconds.
    pub async fn send_async(self: &Arc<Self>, address: &str, body: Value) -> Result<BusMessage> {
        let rx = self.send_with_reply(address, body).await;
        rx.await.map_err(|_| BusError::ReplyClosed)
    }

    /// Request-reply with a deadline.
    pub async fn send_sync(
        self: &Arc<Self>,
        address: &str,
        body: Value,
        timeout: Duration,
    ) -> Result<BusMessage> {
        let rx = self.send_with_reply(address, body).await;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BusError::ReplyClosed),
            Err(_) => Err(BusError::Timeout),
        }
    }

    async fn send_with_reply(
        self: &Arc<Self>,
        address: &str,
        body: Value,
    ) -> oneshot::Receiver<BusMessage> {
        let reply_address = format!("reply.{}", Uuid::new_v4().simple());
        let (tx, rx) = oneshot::channel();

        let slot = Mutex::new(Some(tx));
        let reply_id = self.consumer(&reply_address, move |msg| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(msg);
            }
        });

        // Reclaim the reply consumer if no reply ever arrives.
        let bus = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(REPLY_CONSUMER_TTL).await;
            if let Some(bus) = bus.upgrade() {
                bus.unregister(reply_id);
            }
        });

        self.send_message(BusMessage::new(address, body).with_reply_to(reply_address))
            .await;
        rx
    }

    /// Reply to a request-reply message.
    pub async fn reply(&self, to: &BusMessage, body: Value) {
        if let Some(reply_to) = &to.reply_to {
            self.send_message(BusMessage::new(reply_to.clone(), body)).await;
        }
    }

    /// Ids of local-only registrations matching an address, used by the
    /// GLOBAL bridge to skip them.
    pub fn local_only_handlers(&self, address: &str) -> Vec<HandlerId> {
        let inner = self.inner.lock();
        inner
            .handlers
            .iter()
            .filter(|(pattern, _)| address_matches(pattern, address))
            .flat_map(|(_, regs)| regs.iter().filter(|r| r.local_only).map(|r| r.id))
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
