//! Server configuration

use std::time::Duration;

use takagi_bus::BufferConfig;
use takagi_transport::{TcpConfig, UdpConfig};

/// Top-level configuration for one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP transport settings.
    pub udp: UdpConfig,
    /// TCP transport settings; `None` disables the TCP server.
    pub tcp: Option<TcpConfig>,
    /// Interval between observe staleness sweeps.
    pub observe_sweep_interval: Duration,
    /// Observers with no activity inside this window are swept.
    pub observe_max_age: Duration,
    /// Event-bus message buffering; `None` disables replay.
    pub buffer: Option<BufferConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            udp: UdpConfig::default(),
            tcp: Some(TcpConfig::default()),
            observe_sweep_interval: Duration::from_secs(30),
            observe_max_age: Duration::from_secs(300),
            buffer: None,
        }
    }
}

impl ServerConfig {
    /// Configuration binding ephemeral loopback ports, for tests.
    pub fn loopback() -> Self {
        let mut config = Self::default();
        config.udp.addr = "127.0.0.1:0".to_string();
        if let Some(tcp) = &mut config.tcp {
            tcp.addr = "127.0.0.1:0".to_string();
        }
        config
    }
}
