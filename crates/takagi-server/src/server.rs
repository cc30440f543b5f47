//! Server lifecycle
//!
//! A [`Takagi`] instance wires the framework's parts together; tests and
//! embedders construct as many instances as they like, nothing is global.
//! [`Takagi::start`] binds the transports, installs the notification sink
//! and the bus→observe bridge, spawns the background jobs, and returns a
//! [`RunningServer`] whose `shutdown` unwinds all of it.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use takagi_bus::{EventBus, Hooks, ObserveBridge};
use takagi_core::{ContentCodecs, Registries};
use takagi_router::{
    MiddlewareChain, Middleware, ObserveMiddleware, ObserveRegistry, RequestLogger, Router,
};
use takagi_transport::{TcpServer, UdpServer};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::plugin::PluginManager;

/// Forwards GLOBAL-scope publications at `observe.<dotted.path>` to the
/// CoAP observers of `/<dotted/path>`.
struct BusObserveBridge {
    observe: Arc<ObserveRegistry>,
}

impl ObserveBridge for BusObserveBridge {
    fn forward(&self, address: &str, body: &Value) {
        if let Some(rest) = address.strip_prefix("observe.") {
            let path = format!("/{}", rest.replace('.', "/"));
            let delivered = self.observe.notify(&path, body);
            debug!("bridged {} to {} observers of {}", address, delivered, path);
        }
    }
}

/// One framework instance: router, bus, observe registry, serializers,
/// constant registries, and plugins.
pub struct Takagi {
    config: ServerConfig,
    codecs: Arc<ContentCodecs>,
    registries: Arc<Registries>,
    router: Arc<Router>,
    bus: Arc<EventBus>,
    hooks: Arc<Hooks>,
    observe: Arc<ObserveRegistry>,
    chain: Arc<MiddlewareChain>,
    plugins: PluginManager,
}

impl Takagi {
    pub fn new(config: ServerConfig) -> Self {
        let codecs = Arc::new(ContentCodecs::with_defaults());
        let registries = Arc::new(Registries::coap());
        let router = Router::new(codecs.clone());
        let bus = Arc::new(match &config.buffer {
            Some(buffer) => EventBus::with_buffer(buffer.clone()),
            None => EventBus::new(),
        });
        let hooks = Arc::new(Hooks::new(bus.clone()));
        let observe = Arc::new(ObserveRegistry::new(codecs.clone()));

        registries.install_hook_sink(hooks.clone());
        router.set_hook_sink(hooks.clone());
        observe.set_hook_sink(hooks.clone());

        let mut chain = MiddlewareChain::new(router.clone());
        chain.push(Arc::new(RequestLogger) as Arc<dyn Middleware>);
        chain.push(Arc::new(ObserveMiddleware::new(observe.clone(), router.clone())));
        let chain = Arc::new(chain);

        let plugins = PluginManager::new(
            hooks.clone(),
            router.clone(),
            bus.clone(),
            codecs.clone(),
            registries.clone(),
            observe.clone(),
        );

        Self {
            config,
            codecs,
            registries,
            router,
            bus,
            hooks,
            observe,
            chain,
            plugins,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn hooks(&self) -> &Arc<Hooks> {
        &self.hooks
    }

    pub fn observe(&self) -> &Arc<ObserveRegistry> {
        &self.observe
    }

    pub fn codecs(&self) -> &Arc<ContentCodecs> {
        &self.codecs
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn chain(&self) -> &Arc<MiddlewareChain> {
        &self.chain
    }

    /// Bind the transports and bring the instance up.
    pub async fn start(self) -> Result<RunningServer> {
        self.hooks.emit(
            "server_starting",
            json!({ "udp": self.config.udp.addr, "tcp": self.config.tcp.as_ref().map(|t| t.addr.clone()) }),
        );

        let udp = UdpServer::bind(
            self.config.udp.clone(),
            self.chain.clone(),
            self.observe.clone(),
        )
        .await?;
        self.observe.set_sink(udp.notification_sink());
        self.bus.set_observe_bridge(Arc::new(BusObserveBridge {
            observe: self.observe.clone(),
        }));

        let tcp = match &self.config.tcp {
            Some(tcp_config) => Some(TcpServer::bind(tcp_config.clone(), self.chain.clone()).await?),
            None => None,
        };

        let mut jobs = Vec::new();

        // Periodic observe staleness sweep.
        let observe = self.observe.clone();
        let sweep_interval = self.config.observe_sweep_interval;
        let max_age = self.config.observe_max_age;
        jobs.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = observe.cleanup_stale_observers(max_age, Instant::now());
                if removed > 0 {
                    info!("observe sweep removed {} stale observers", removed);
                }
            }
        }));

        // Buffer TTL maintenance, when buffering is on.
        if self.bus.buffer().is_some() {
            let bus = self.bus.clone();
            let ttl_interval = self.config.observe_sweep_interval;
            jobs.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(ttl_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Some(buffer) = bus.buffer() {
                        buffer.evict_expired();
                    }
                }
            }));
        }

        info!("server up: udp {} tcp {:?}", udp.local_addr(), tcp.as_ref().map(TcpServer::local_addr));
        self.hooks.emit(
            "server_started",
            json!({ "udp": udp.local_addr().to_string() }),
        );

        Ok(RunningServer {
            udp,
            tcp,
            jobs,
            bus: self.bus,
            hooks: self.hooks,
            observe: self.observe,
        })
    }
}

impl Default for Takagi {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

/// Handles to a started instance.
pub struct RunningServer {
    udp: UdpServer,
    tcp: Option<TcpServer>,
    jobs: Vec<JoinHandle<()>>,
    bus: Arc<EventBus>,
    hooks: Arc<Hooks>,
    observe: Arc<ObserveRegistry>,
}

impl RunningServer {
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp.local_addr()
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().map(TcpServer::local_addr)
    }

    /// Block until Ctrl-C, then shut down.
    pub async fn run_until_ctrl_c(self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("signal listener failed: {}", e);
        }
        info!("interrupt received");
        self.shutdown().await;
    }

    /// Cooperative shutdown: stop jobs, drain transports, clear observers.
    pub async fn shutdown(self) {
        self.hooks.emit("server_stopping", json!({}));

        for job in &self.jobs {
            job.abort();
        }

        self.udp.shutdown().await;
        if let Some(tcp) = self.tcp {
            tcp.shutdown().await;
        }

        self.observe.stop_all();
        self.observe.clear_sink();
        self.bus.clear_observe_bridge();

        self.hooks.emit("server_stopped", json!({}));
        info!("server stopped");
    }
}
