//! Lifecycle hooks
//!
//! Named events (`server_starting`, `router_route_added`,
//! `observe_subscribed`, ...) are published on the bus at
//! `hooks.<event>` with LOCAL scope. Subscriber errors are the bus's
//! problem: logged and swallowed.

use serde_json::Value;
use std::sync::Arc;

use takagi_core::HookSink;

use crate::bus::{EventBus, HandlerId};
use crate::message::Scope;

/// Thin adapter forwarding named lifecycle events through the event bus.
pub struct Hooks {
    bus: Arc<EventBus>,
}

impl Hooks {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish an event at `hooks.<event>`.
    pub fn emit(&self, event: &str, payload: Value) {
        self.bus
            .publish_scoped(&format!("hooks.{event}"), payload, Scope::Local);
    }

    /// Subscribe to one named event.
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.bus
            .consumer(&format!("hooks.{event}"), move |msg| handler(msg.body))
    }
}

impl HookSink for Hooks {
    fn emit(&self, event: &str, payload: Value) {
        Hooks::emit(self, event, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = Arc::new(EventBus::new());
        let hooks = Hooks::new(bus.clone());

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        hooks.on("server_starting", move |payload| {
            assert_eq!(payload["port"], json!(5683));
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        hooks.emit("server_starting", json!({ "port": 5683 }));
        sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscriber_panic_is_swallowed() {
        let bus = Arc::new(EventBus::new());
        let hooks = Hooks::new(bus.clone());

        hooks.on("boom", |_| panic!("subscriber failure"));

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        hooks.on("boom", move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        hooks.emit("boom", json!({}));
        sleep(Duration::from_millis(50)).await;
        // The panicking subscriber does not stop the other one.
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
