//! TCP transport server (RFC 8323)
//!
//! Accept loop with one task per connection. The first frame from a
//! client must be a CSM; the server answers with its own CSM advertising
//! Max-Message-Size and Block-Wise-Transfer. After the handshake: PING
//! gets a PONG echoing the token, RELEASE and ABORT close the connection,
//! and request codes route through the middleware chain with no type or
//! message id. Malformed frames abort the one connection.

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use takagi_core::codec::{decode_tcp, encode_tcp, tcp_frame_len};
use takagi_core::message::{csm_option, signaling};
use takagi_core::{Inbound, Message, CSM_MAX_MESSAGE_SIZE};
use takagi_router::MiddlewareChain;

use crate::error::{Result, TransportError};

/// TCP server configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Listen address, e.g. `0.0.0.0:5683`
    pub addr: String,
    /// Largest accepted frame; also advertised in the server CSM
    pub max_message_size: usize,
    /// Read buffer size per connection
    pub read_buffer_size: usize,
    /// Deadline for connection tasks on shutdown
    pub shutdown_grace: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            addr: format!("0.0.0.0:{}", takagi_core::DEFAULT_PORT),
            max_message_size: CSM_MAX_MESSAGE_SIZE as usize,
            read_buffer_size: 8192,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// The connection-per-task TCP server.
pub struct TcpServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    grace: Duration,
}

impl TcpServer {
    /// Bind the listener and start accepting connections.
    pub async fn bind(config: TcpConfig, chain: Arc<MiddlewareChain>) -> Result<Self> {
        let listener = TcpListener::bind(&config.addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let local_addr = listener.local_addr()?;
        info!("TCP server listening on {}", local_addr);

        let (shutdown, mut accept_shutdown) = watch::channel(false);
        let conn_shutdown = shutdown.clone();
        let max_size = config.max_message_size;
        let read_buf = config.read_buffer_size;

        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.changed() => {
                        if *accept_shutdown.borrow() {
                            break;
                        }
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            info!("TCP connection from {}", peer);
                            let chain = chain.clone();
                            let shutdown_rx = conn_shutdown.subscribe();
                            tokio::spawn(async move {
                                handle_connection(stream, peer, chain, max_size, read_buf, shutdown_rx)
                                    .await;
                            });
                        }
                        Err(e) => {
                            error!("TCP accept error: {}", e);
                        }
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            shutdown,
            accept_task,
            grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listener and signal connection tasks to drain.
    pub async fn shutdown(self) {
        info!("TCP server on {} shutting down", self.local_addr);
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(self.grace, self.accept_task).await.is_err() {
            warn!("TCP accept loop exceeded the shutdown grace period");
        }
    }
}

enum Action {
    None,
    Reply(Bytes),
    Close,
    AbortClose,
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    chain: Arc<MiddlewareChain>,
    max_size: usize,
    read_buf_size: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(read_buf_size);
    let mut csm_seen = false;

    loop {
        // Drain every complete frame already buffered.
        while let Some(frame_len) = tcp_frame_len(&buf) {
            if frame_len > max_size {
                warn!("frame from {} exceeds {} bytes, aborting", peer, max_size);
                send_abort(&mut writer).await;
                return;
            }
            if buf.len() < frame_len {
                break;
            }
            let frame = buf.split_to(frame_len).freeze();

            let action = match decode_tcp(&frame) {
                Ok(message) => handle_message(message, &mut csm_seen, &chain, peer),
                Err(e) => {
                    warn!("malformed frame from {}: {}", peer, e);
                    Action::AbortClose
                }
            };

            match action {
                Action::None => {}
                Action::Reply(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        warn!("TCP write to {} failed: {}", peer, e);
                        return;
                    }
                }
                Action::Close => {
                    debug!("closing connection to {}", peer);
                    return;
                }
                Action::AbortClose => {
                    send_abort(&mut writer).await;
                    return;
                }
            }
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("connection to {} closing on shutdown", peer);
                    return;
                }
            }
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    debug!("connection from {} closed by peer", peer);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("TCP read from {} failed: {}", peer, e);
                    return;
                }
            }
        }
    }
}

fn handle_message(
    message: Message,
    csm_seen: &mut bool,
    chain: &MiddlewareChain,
    peer: SocketAddr,
) -> Action {
    // The first message on a connection must be the client CSM.
    if !*csm_seen {
        if message.code.0 != signaling::CSM {
            warn!("first frame from {} was not a CSM", peer);
            return Action::AbortClose;
        }
        *csm_seen = true;
        return match encode_tcp(&server_csm()) {
            Ok(bytes) => Action::Reply(bytes),
            Err(e) => {
                error!("server CSM encode failed: {}", e);
                Action::AbortClose
            }
        };
    }

    match message.code.0 {
        signaling::CSM => Action::None,
        signaling::PING => {
            let pong = Message::tcp(signaling::PONG).with_token(message.token);
            match encode_tcp(&pong) {
                Ok(bytes) => Action::Reply(bytes),
                Err(e) => {
                    error!("PONG encode failed: {}", e);
                    Action::None
                }
            }
        }
        signaling::PONG => Action::None,
        signaling::RELEASE | signaling::ABORT => Action::Close,
        _ if message.code.is_request() => {
            let request = Inbound::new(message, Some(peer));
            let response = chain.handle(request);
            match encode_tcp(&response.into_message()) {
                Ok(bytes) => Action::Reply(bytes),
                Err(e) => {
                    error!("response encode failed: {}", e);
                    Action::None
                }
            }
        }
        _ => Action::None,
    }
}

/// Server CSM: Max-Message-Size (2) and an empty Block-Wise-Transfer (4).
fn server_csm() -> Message {
    let mut csm = Message::tcp(signaling::CSM);
    csm.set_uint_option(csm_option::MAX_MESSAGE_SIZE, CSM_MAX_MESSAGE_SIZE);
    csm.set_option(csm_option::BLOCK_WISE_TRANSFER, Bytes::new());
    csm
}

async fn send_abort(writer: &mut OwnedWriteHalf) {
    let abort = Message::tcp(signaling::ABORT);
    if let Ok(bytes) = encode_tcp(&abort) {
        let _ = writer.write_all(&bytes).await;
    }
}
