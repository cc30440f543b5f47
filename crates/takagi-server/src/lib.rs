//! Takagi Server
//!
//! Wires the framework together: one [`Takagi`] instance owns the router,
//! event bus, observe registry, serializer and constant registries, and a
//! plugin manager; [`Takagi::start`] brings up the UDP worker-pool server
//! (plus the TCP server when configured), the observe staleness sweep, and
//! the bus buffer maintenance job.

pub mod config;
pub mod error;
pub mod plugin;
pub mod server;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use plugin::{
    AppContext, Dependency, FieldKind, FieldSpec, Manifest, OptionMap, Plugin, PluginError,
    PluginManager,
};
pub use server::{RunningServer, Takagi};
