//! Lifecycle hook sink
//!
//! Core and router components emit named lifecycle events without depending
//! on a concrete event bus. The bus installs itself as the [`HookSink`] at
//! startup; until then events go to [`NullHooks`].

use serde_json::Value;

/// Receiver for named lifecycle events.
pub trait HookSink: Send + Sync {
    /// Emit an event with an arbitrary JSON payload.
    fn emit(&self, event: &str, payload: Value);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHooks;

impl HookSink for NullHooks {
    fn emit(&self, _event: &str, _payload: Value) {}
}
