//! Observe subsystem (RFC 7641)
//!
//! Server-side observable resources: a registry of per-path subscriptions,
//! notification fan-out with monotonic sequence numbers and optional delta
//! filtering, and a staleness sweep for observers that stopped listening.
//!
//! Notification delivery snapshots the subscriber list under the mutex and
//! delivers outside it. Per subscription, notifications go out in `notify`
//! order with strictly increasing sequence numbers; there is no ordering
//! contract across subscriptions.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use takagi_core::codec::encode_udp;
use takagi_core::message::{code, content_format, option};
use takagi_core::{ContentCodecs, HookSink, Inbound, Outbound};

use crate::middleware::{Middleware, Next};
use crate::route::normalize_path;
use crate::router::Router;
use crate::OBSERVE_METHOD;

/// Local delivery callback for in-process observers.
pub type ObserverCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Sends encoded notification datagrams; implemented by the UDP server.
pub trait NotificationSink: Send + Sync {
    fn send(&self, datagram: Bytes, to: SocketAddr);
}

/// One observer of one path.
pub struct Subscription {
    pub token: Bytes,
    pub peer: Option<SocketAddr>,
    pub callback: Option<ObserverCallback>,
    /// Minimum numeric change required before a notification goes out.
    pub delta: Option<f64>,
    created_at: Instant,
    last_notified_at: Option<Instant>,
    last_value: Option<Value>,
    last_seen: Option<Value>,
    last_sequence: u32,
}

impl Subscription {
    /// Subscription for a remote peer, keyed by its token.
    pub fn remote(token: Bytes, peer: SocketAddr) -> Self {
        Self {
            token,
            peer: Some(peer),
            callback: None,
            delta: None,
            created_at: Instant::now(),
            last_notified_at: None,
            last_value: None,
            last_seen: None,
            last_sequence: 0,
        }
    }

    /// Subscription delivered through an in-process callback.
    pub fn local(callback: ObserverCallback) -> Self {
        Self {
            token: Bytes::new(),
            peer: None,
            callback: Some(callback),
            delta: None,
            created_at: Instant::now(),
            last_notified_at: None,
            last_value: None,
            last_seen: None,
            last_sequence: 0,
        }
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = Some(delta);
        self
    }

    pub fn sequence(&self) -> u32 {
        self.last_sequence
    }

    pub fn last_value(&self) -> Option<&Value> {
        self.last_value.as_ref()
    }

    /// Whether a new value passes the delta filter. A notification goes
    /// out when the value moved at least `delta` away from the last
    /// notified value, or jumped at least `delta` since the previous
    /// observation; non-numeric values always pass.
    fn should_deliver(&self, new_value: &Value) -> bool {
        let Some(delta) = self.delta else {
            return true;
        };
        let Some(new_num) = new_value.as_f64() else {
            return true;
        };
        let baseline_passes = |prior: &Option<Value>| {
            prior
                .as_ref()
                .and_then(Value::as_f64)
                .map(|prev| (prev - new_num).abs() >= delta)
        };
        match (
            baseline_passes(&self.last_value),
            baseline_passes(&self.last_seen),
        ) {
            (None, None) => true,
            (a, b) => a.unwrap_or(false) || b.unwrap_or(false),
        }
    }
}

enum Delivery {
    Local(ObserverCallback),
    Remote {
        token: Bytes,
        peer: SocketAddr,
        sequence: u32,
    },
}

/// Per-path subscription lists with notification fan-out.
pub struct ObserveRegistry {
    subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
    sink: RwLock<Option<Arc<dyn NotificationSink>>>,
    hooks: RwLock<Option<Arc<dyn HookSink>>>,
    codecs: Arc<ContentCodecs>,
    next_message_id: AtomicU16,
}

impl ObserveRegistry {
    pub fn new(codecs: Arc<ContentCodecs>) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            sink: RwLock::new(None),
            hooks: RwLock::new(None),
            codecs,
            next_message_id: AtomicU16::new(1),
        }
    }

    /// Install the datagram sink notifications are written to.
    pub fn set_sink(&self, sink: Arc<dyn NotificationSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn clear_sink(&self) {
        *self.sink.write() = None;
    }

    pub fn set_hook_sink(&self, sink: Arc<dyn HookSink>) {
        *self.hooks.write() = Some(sink);
    }

    fn emit(&self, event: &str, payload: Value) {
        if let Some(hooks) = self.hooks.read().as_ref() {
            hooks.emit(event, payload);
        }
    }

    // =========================================================================
    // Subscription lifecycle
    // =========================================================================

    /// Add an observer. A re-registration with the same token and peer
    /// replaces the previous subscription.
    pub fn subscribe(&self, path: &str, subscription: Subscription) {
        let path = normalize_path(path);
        let token_hex = hex(&subscription.token);
        {
            let mut subs = self.subscriptions.lock();
            let list = subs.entry(path.clone()).or_default();
            if subscription.peer.is_some() {
                list.retain(|s| !(s.token == subscription.token && s.peer == subscription.peer));
            }
            list.push(subscription);
        }
        debug!("observer subscribed on {}", path);
        self.emit(
            "observe_subscribed",
            json!({ "path": path, "token": token_hex }),
        );
    }

    /// Remove the first subscription with a matching token.
    pub fn unsubscribe(&self, path: &str, token: &Bytes) -> bool {
        let path = normalize_path(path);
        let removed = {
            let mut subs = self.subscriptions.lock();
            let Some(list) = subs.get_mut(&path) else {
                return false;
            };
            match list.iter().position(|s| s.token == *token) {
                Some(index) => {
                    list.remove(index);
                    if list.is_empty() {
                        subs.remove(&path);
                    }
                    true
                }
                None => false,
            }
        };
        if removed {
            self.emit(
                "observe_unsubscribed",
                json!({ "path": path, "token": hex(token) }),
            );
        }
        removed
    }

    /// Drop every subscription held by a peer with the given token,
    /// across all paths. Used on RST receipt.
    pub fn remove_peer(&self, peer: SocketAddr, token: &Bytes) -> usize {
        let mut removed = 0;
        let mut subs = self.subscriptions.lock();
        subs.retain(|_, list| {
            let before = list.len();
            list.retain(|s| !(s.peer == Some(peer) && s.token == *token));
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    /// Drop every subscription held by a peer, regardless of token. Used
    /// on RST receipt when the reset carries no token.
    pub fn remove_all_for_peer(&self, peer: SocketAddr) -> usize {
        let mut removed = 0;
        let mut subs = self.subscriptions.lock();
        subs.retain(|_, list| {
            let before = list.len();
            list.retain(|s| s.peer != Some(peer));
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    pub fn subscriber_count(&self, path: &str) -> usize {
        self.subscriptions
            .lock()
            .get(&normalize_path(path))
            .map_or(0, Vec::len)
    }

    /// Drop every subscription. Called on server shutdown.
    pub fn stop_all(&self) {
        self.subscriptions.lock().clear();
    }

    // =========================================================================
    // Notification
    // =========================================================================

    /// Fan a new value out to the path's subscribers. Returns the number
    /// of notifications delivered.
    pub fn notify(&self, path: &str, new_value: &Value) -> usize {
        let path = normalize_path(path);
        self.emit("observe_notify_start", json!({ "path": path }));

        let deliveries: Vec<Delivery> = {
            let mut subs = self.subscriptions.lock();
            let Some(list) = subs.get_mut(&path) else {
                self.emit("observe_notify_end", json!({ "path": path, "delivered": 0 }));
                return 0;
            };

            let now = Instant::now();
            let mut out = Vec::new();
            for sub in list.iter_mut() {
                let deliver = sub.should_deliver(new_value);
                sub.last_seen = Some(new_value.clone());
                if !deliver {
                    continue;
                }
                let delivery = match (&sub.callback, sub.peer) {
                    (Some(cb), _) => Delivery::Local(cb.clone()),
                    (None, Some(peer)) => Delivery::Remote {
                        token: sub.token.clone(),
                        peer,
                        sequence: sub.last_sequence + 1,
                    },
                    (None, None) => continue,
                };
                sub.last_sequence += 1;
                sub.last_value = Some(new_value.clone());
                sub.last_notified_at = Some(now);
                out.push(delivery);
            }
            out
        };

        let delivered = deliveries.len();
        for delivery in deliveries {
            match delivery {
                Delivery::Local(cb) => cb(new_value),
                Delivery::Remote { token, peer, sequence } => {
                    self.send_notification(&path, token, peer, sequence, new_value);
                }
            }
        }

        self.emit(
            "observe_notify_end",
            json!({ "path": path, "delivered": delivered }),
        );
        delivered
    }

    fn send_notification(
        &self,
        path: &str,
        token: Bytes,
        peer: SocketAddr,
        sequence: u32,
        value: &Value,
    ) {
        let Some(sink) = self.sink.read().clone() else {
            warn!("observe notification for {} dropped: no sink installed", path);
            return;
        };

        let payload = match self.codecs.encode(content_format::JSON, value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("observe notification for {} dropped: {}", path, e);
                return;
            }
        };

        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let out = Outbound::notification(token, code::CONTENT)
            .with_message_id(message_id)
            .with_observe(sequence)
            .with_content_format(content_format::JSON)
            .with_payload(payload);

        match encode_udp(&out.into_message()) {
            Ok(datagram) => sink.send(datagram, peer),
            Err(e) => warn!("observe notification for {} failed to encode: {}", path, e),
        }
    }

    // =========================================================================
    // Staleness
    // =========================================================================

    /// Remove remote subscriptions with no activity inside `max_age`.
    /// Local callback observers are never swept. Returns removed count.
    pub fn cleanup_stale_observers(&self, max_age: Duration, now: Instant) -> usize {
        let mut removed = 0;
        let mut subs = self.subscriptions.lock();
        subs.retain(|path, list| {
            let before = list.len();
            list.retain(|sub| {
                if sub.callback.is_some() {
                    return true;
                }
                let last_active = sub.last_notified_at.unwrap_or(sub.created_at);
                now.duration_since(last_active) < max_age
            });
            let dropped = before - list.len();
            if dropped > 0 {
                debug!("swept {} stale observers on {}", dropped, path);
            }
            removed += dropped;
            !list.is_empty()
        });
        removed
    }
}

fn hex(bytes: &Bytes) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// Middleware
// ============================================================================

/// Handles GET-with-Observe requests against observable routes:
/// Observe=0 creates a subscription and serves the initial state with an
/// Observe option; Observe=1 cancels it. Everything else falls through.
pub struct ObserveMiddleware {
    registry: Arc<ObserveRegistry>,
    router: Arc<Router>,
}

impl ObserveMiddleware {
    pub fn new(registry: Arc<ObserveRegistry>, router: Arc<Router>) -> Self {
        Self { registry, router }
    }
}

impl Middleware for ObserveMiddleware {
    fn call(&self, request: Inbound, next: Next<'_>) -> Outbound {
        let path = normalize_path(&request.path());

        if request.observe_register() {
            if let Some((entry, params)) = self.router.lookup(OBSERVE_METHOD, &path) {
                let peer = match request.peer() {
                    Some(peer) => peer,
                    None => return next.run(request),
                };
                self.registry
                    .subscribe(&path, Subscription::remote(request.token().clone(), peer));

                let mut out = self.router.dispatch_entry(&entry, request, params);
                if out.code().is_success() {
                    out.set_uint_option(option::OBSERVE, 0);
                }
                return out;
            }
        } else if request.observe_deregister() {
            self.registry.unsubscribe(&path, request.token());
            if let Some((entry, params)) = self.router.lookup(OBSERVE_METHOD, &path) {
                return self.router.dispatch_entry(&entry, request, params);
            }
        } else if !request.is_observe() && request.is_get() {
            // A plain GET on an observable path serves the current state.
            if self.router.lookup("GET", &path).is_none() {
                if let Some((entry, params)) = self.router.lookup(OBSERVE_METHOD, &path) {
                    return self.router.dispatch_entry(&entry, request, params);
                }
            }
        }

        next.run(request)
    }
}
