//! Error types for the server facade

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] takagi_transport::TransportError),

    #[error(transparent)]
    Router(#[from] takagi_router::RouterError),

    #[error(transparent)]
    Plugin(#[from] crate::plugin::PluginError),
}
