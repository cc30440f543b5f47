//! Takagi Core
//!
//! Core types, encoding, and protocol primitives for the Takagi CoAP
//! framework.
//!
//! This crate provides:
//! - The CoAP message model ([`Message`], [`Code`], [`MessageType`])
//! - Wire codec for UDP (RFC 7252) and TCP (RFC 8323) framings ([`codec`])
//! - Runtime protocol-constant registries ([`Registries`])
//! - Payload serialization by content-format ([`ContentCodecs`])
//! - Parsed request / response-under-construction views ([`Inbound`], [`Outbound`])

pub mod codec;
pub mod error;
pub mod hook;
pub mod inbound;
pub mod message;
pub mod outbound;
pub mod registry;
pub mod serialize;

pub use error::{Error, Result};
pub use hook::{HookSink, NullHooks};
pub use inbound::Inbound;
pub use message::{Code, Message, MessageType, Transport};
pub use outbound::Outbound;
pub use registry::{Registries, Registry, RegistryEntry};
pub use serialize::{ContentCodecs, PayloadCodec};

/// Default CoAP port (UDP and TCP)
pub const DEFAULT_PORT: u16 = 5683;

/// Payload marker separating options from payload on the wire
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Maximum token length in bytes
pub const MAX_TOKEN_LEN: usize = 8;

/// Max-Message-Size advertised in the server CSM (RFC 8323 §5.3.1.1)
pub const CSM_MAX_MESSAGE_SIZE: u64 = 8_388_864;
