//! Error types for the router

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    /// (method, path) already registered
    #[error("duplicate route: {method} {path}")]
    DuplicateRoute { method: String, path: String },

    /// Path pattern failed validation
    #[error("invalid route pattern: {0}")]
    InvalidPattern(String),
}
