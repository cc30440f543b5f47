//! Takagi Event Bus
//!
//! Address-keyed publish/subscribe backing both the hook system and the
//! Observe fan-out:
//! - wildcard routing (`*` matches exactly one dotted segment)
//! - point-to-point sends with per-address round-robin selection
//! - request-reply with bounded timeouts
//! - optional bounded per-address message buffering with replay
//! - scope-tagged distribution (LOCAL / CLUSTER / GLOBAL)

pub mod buffer;
pub mod bus;
pub mod error;
pub mod hooks;
pub mod message;

pub use buffer::{BufferConfig, MessageBuffer};
pub use bus::{EventBus, HandlerId, ObserveBridge};
pub use error::{BusError, Result};
pub use hooks::Hooks;
pub use message::{BusMessage, Scope};
