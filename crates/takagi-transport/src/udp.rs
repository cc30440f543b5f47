//! UDP transport server (RFC 7252)
//!
//! One datagram socket shared by a pool of worker tasks. Each worker
//! loops: receive, decode, route through the middleware chain, encode,
//! send back to the origin. Confirmable requests get a piggybacked ACK
//! echoing message id and token; non-confirmable ones get a NON;
//! undecodable datagrams get an RST. Receive errors are logged
//! per-datagram and never kill a worker.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use takagi_core::codec::{decode_udp, encode_udp};
use takagi_core::message::code;
use takagi_core::{Inbound, Message, MessageType};
use takagi_router::{MiddlewareChain, NotificationSink, ObserveRegistry};

use crate::error::{Result, TransportError};

/// UDP server configuration
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Listen address, e.g. `0.0.0.0:5683`
    pub addr: String,
    /// Number of worker tasks draining the socket
    pub workers: usize,
    /// Receive buffer size per worker
    pub recv_buffer_size: usize,
    /// Grace period for workers on shutdown
    pub shutdown_grace: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            addr: format!("0.0.0.0:{}", takagi_core::DEFAULT_PORT),
            workers: 4,
            recv_buffer_size: 65536,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Notification sink writing through the server's shared socket.
struct UdpSink {
    tx: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
}

impl NotificationSink for UdpSink {
    fn send(&self, datagram: Bytes, to: SocketAddr) {
        if self.tx.send((datagram, to)).is_err() {
            warn!("notification to {} dropped: sender task gone", to);
        }
    }
}

/// The UDP worker-pool server.
pub struct UdpServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    sender_task: JoinHandle<()>,
    outgoing: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
    grace: Duration,
}

impl UdpServer {
    /// Bind the socket and start the worker pool.
    pub async fn bind(
        config: UdpConfig,
        chain: Arc<MiddlewareChain>,
        observe: Arc<ObserveRegistry>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(&config.addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr()?;
        info!("UDP server listening on {}", local_addr);

        let (shutdown, _) = watch::channel(false);
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<(Bytes, SocketAddr)>();

        // One task owns server-initiated sends (Observe notifications).
        let sender_socket = socket.clone();
        let sender_task = tokio::spawn(async move {
            while let Some((datagram, to)) = outgoing_rx.recv().await {
                if let Err(e) = sender_socket.send_to(&datagram, to).await {
                    warn!("UDP notification send to {} failed: {}", to, e);
                }
            }
        });

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for worker in 0..config.workers.max(1) {
            let socket = socket.clone();
            let chain = chain.clone();
            let observe = observe.clone();
            let mut shutdown_rx = shutdown.subscribe();
            let buf_size = config.recv_buffer_size;

            workers.push(tokio::spawn(async move {
                let mut buf = vec![0u8; buf_size];
                debug!("UDP worker {} up", worker);
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        result = socket.recv_from(&mut buf) => match result {
                            Ok((len, peer)) => {
                                handle_datagram(&socket, &chain, &observe, &buf[..len], peer)
                                    .await;
                            }
                            Err(e) => {
                                // Per-datagram failure; the worker carries on.
                                error!("UDP recv error: {}", e);
                            }
                        }
                    }
                }
                debug!("UDP worker {} down", worker);
            }));
        }

        Ok(Self {
            local_addr,
            shutdown,
            workers,
            sender_task,
            outgoing,
            grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sink the observe registry writes notifications to.
    pub fn notification_sink(&self) -> Arc<dyn NotificationSink> {
        Arc::new(UdpSink {
            tx: self.outgoing.clone(),
        })
    }

    /// Stop the workers, waiting out the grace period before aborting.
    pub async fn shutdown(self) {
        info!("UDP server on {} shutting down", self.local_addr);
        let _ = self.shutdown.send(true);

        let join_all = futures::future::join_all(self.workers);
        if tokio::time::timeout(self.grace, join_all).await.is_err() {
            warn!("UDP workers exceeded the shutdown grace period");
        }
        self.sender_task.abort();
    }
}

async fn handle_datagram(
    socket: &UdpSocket,
    chain: &MiddlewareChain,
    observe: &ObserveRegistry,
    datagram: &[u8],
    peer: SocketAddr,
) {
    let message = match decode_udp(datagram) {
        Ok(message) => message,
        Err(e) => {
            debug!("malformed datagram from {}: {}", peer, e);
            send_reset(socket, datagram, peer).await;
            return;
        }
    };

    match message.mtype {
        Some(MessageType::Con) | Some(MessageType::Non) if message.code.is_request() => {
            let request = Inbound::new(message, Some(peer));
            let response = chain.handle(request);
            match encode_udp(&response.into_message()) {
                Ok(bytes) => {
                    if let Err(e) = socket.send_to(&bytes, peer).await {
                        warn!("UDP send to {} failed: {}", peer, e);
                    }
                }
                Err(e) => error!("response encode failed: {}", e),
            }
        }
        Some(MessageType::Rst) => {
            // A reset from an observer cancels its subscriptions.
            let removed = if message.token.is_empty() {
                observe.remove_all_for_peer(peer)
            } else {
                observe.remove_peer(peer, &message.token)
            };
            if removed > 0 {
                debug!("RST from {} cancelled {} observations", peer, removed);
            }
        }
        Some(MessageType::Ack) => {
            // Piggybacked or bare ACKs need no action on the server side.
        }
        _ => {
            send_reset(socket, datagram, peer).await;
        }
    }
}

/// RST echoing the offending message id when the header got far enough
/// to carry one.
async fn send_reset(socket: &UdpSocket, datagram: &[u8], peer: SocketAddr) {
    let message_id = if datagram.len() >= 4 {
        u16::from_be_bytes([datagram[2], datagram[3]])
    } else {
        0
    };

    let reset = Message {
        mtype: Some(MessageType::Rst),
        message_id: Some(message_id),
        code: takagi_core::Code(code::EMPTY),
        ..Message::default()
    };

    match encode_udp(&reset) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, peer).await {
                warn!("RST send to {} failed: {}", peer, e);
            }
        }
        Err(e) => error!("RST encode failed: {}", e),
    }
}
