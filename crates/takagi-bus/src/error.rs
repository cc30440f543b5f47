//! Error types for the event bus

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Error, Debug)]
pub enum BusError {
    /// Request-reply deadline elapsed
    #[error("request timed out")]
    Timeout,

    /// Reply channel dropped before a reply arrived
    #[error("reply channel closed")]
    ReplyClosed,

    /// Address failed validation
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
