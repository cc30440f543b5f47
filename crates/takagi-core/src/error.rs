//! Error types for Takagi core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Truncated message or frame
    #[error("short message: need {needed} bytes, have {have}")]
    Short { needed: usize, have: usize },

    /// Version field was not 1
    #[error("unsupported version: {0}")]
    BadVersion(u8),

    /// Structurally invalid message
    #[error("malformed message: {0}")]
    Malformed(&'static str),

    /// Option delta or length beyond the two-byte extension range
    #[error("option delta or length too large: {0}")]
    TooLarge(u32),

    /// No codec registered for a content format
    #[error("unknown content format: {0}")]
    UnknownFormat(u16),

    /// Payload encoding failed
    #[error("encode error: {0}")]
    Encode(String),

    /// Payload decoding failed
    #[error("decode error: {0}")]
    Decode(String),

    /// A registry value was re-registered with a different symbol
    #[error("registry conflict: value {value} already registered as {existing}")]
    RegistryConflict { value: u16, existing: String },
}
