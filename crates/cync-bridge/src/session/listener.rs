// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS accept loop: terminates device TLS sessions, enforces the connection
//! limit and allowlist, and spawns one task per accepted connection. Each
//! task registers a [`SessionHandle`] so the Dispatcher can route commands
//! to it without touching the socket directly.

use crate::config::BridgeConfig;
use crate::error::ConnectionError;
use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::session::engine::Session;
use crate::session::handles::{DispatchRequest, SessionHandle, SessionRegistry};
use crate::session::state::SessionState;
use crate::timing::TimingPolicy;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Shared state the accept loop and every connection task read.
pub struct ListenerContext {
    pub config: Arc<BridgeConfig>,
    pub registry: Arc<RwLock<Registry>>,
    pub sessions: SessionRegistry,
    pub tls_acceptor: TlsAcceptor,
    pub timing: TimingPolicy,
    pub metrics: Arc<Metrics>,
    pub connection_count: AtomicUsize,
    pub shutdown: Arc<tokio::sync::Notify>,
}

impl ListenerContext {
    fn is_allowed(&self, addr: IpAddr) -> bool {
        match &self.config.tcp_whitelist {
            Some(allowlist) if !allowlist.is_empty() => allowlist.contains(&addr),
            _ => true,
        }
    }
}

/// Accept device connections until shutdown is signaled.
pub async fn run(ctx: Arc<ListenerContext>) -> Result<(), ConnectionError> {
    let bind_addr = format!("{}:{}", ctx.config.bind_address, ctx.config.device_port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))?;
    info!(addr = %bind_addr, "device TLS endpoint listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = accept_one(ctx, stream, peer_addr).await {
                                warn!(%peer_addr, error = %e, "connection handler exited with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept() failed"),
                }
            }
            _ = ctx.shutdown.notified() => {
                info!("listener shutting down");
                return Ok(());
            }
        }
    }
}

async fn accept_one(
    ctx: Arc<ListenerContext>,
    stream: tokio::net::TcpStream,
    peer_addr: std::net::SocketAddr,
) -> Result<(), ConnectionError> {
    if !ctx.is_allowed(peer_addr.ip()) {
        debug!(%peer_addr, "rejected: not in allowlist");
        return Ok(());
    }

    let over_limit = ctx.connection_count.load(Ordering::SeqCst) >= ctx.config.max_tcp_connections;

    let mut tls_stream = ctx
        .tls_acceptor
        .accept(stream)
        .await
        .map_err(|e| ConnectionError::Tls(e.to_string()))?;

    if over_limit {
        warn!(%peer_addr, "max_tcp_connections reached, blackholing then closing");
        tokio::time::sleep(ctx.config.blackhole_delay()).await;
        let _ = tls_stream.shutdown().await;
        return Ok(());
    }

    ctx.connection_count.fetch_add(1, Ordering::SeqCst);
    ctx.metrics.session_opened();
    let result = drive_session(&ctx, tls_stream, peer_addr).await;
    ctx.metrics.session_closed();
    ctx.connection_count.fetch_sub(1, Ordering::SeqCst);
    result
}

async fn drive_session(
    ctx: &Arc<ListenerContext>,
    mut stream: tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
    peer_addr: std::net::SocketAddr,
) -> Result<(), ConnectionError> {
    let peer_key = peer_addr.to_string();
    let mut session = Session::new(
        peer_key.clone(),
        ctx.config.home_id,
        next_queue_id(),
        ctx.registry.clone(),
        ctx.config.dedup_ttl(),
        ctx.config.dedup_capacity,
        ctx.timing,
    );
    session.on_tls_accepted();
    info!(%peer_addr, "session accepted");

    let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<DispatchRequest>(32);
    let handle = SessionHandle::new(peer_key.clone(), command_tx);
    ctx.sessions.insert(handle.clone());

    let mut framer = crate::codec::PacketFramer::new();
    let mut read_buf = [0u8; 4096];
    let outcome = run_loop(ctx, &mut session, &handle, &mut stream, &mut framer, &mut read_buf, &mut command_rx).await;

    ctx.sessions.remove(&peer_key);
    session.close(&ctx.registry).await;
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    ctx: &Arc<ListenerContext>,
    session: &mut Session,
    handle: &SessionHandle,
    stream: &mut tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
    framer: &mut crate::codec::PacketFramer,
    read_buf: &mut [u8],
    command_rx: &mut tokio::sync::mpsc::Receiver<DispatchRequest>,
) -> Result<(), ConnectionError> {
    let peer_addr = &session.peer_addr;

    loop {
        tokio::select! {
            read_result = stream.read(read_buf) => {
                match read_result {
                    Ok(0) => {
                        debug!(%peer_addr, "peer closed connection");
                        return Ok(());
                    }
                    Ok(n) => {
                        for frame in framer.feed(&read_buf[..n]) {
                            ctx.metrics.record_packet_received();
                            match session.handle_raw(&frame).await {
                                Ok(outbound) => {
                                    for out in outbound {
                                        ctx.metrics.record_packet_sent();
                                        if let Err(e) = stream.write_all(&out).await {
                                            return Err(ConnectionError::Io(e.to_string()));
                                        }
                                    }
                                }
                                Err(e) => {
                                    ctx.metrics.record_decode_error();
                                    warn!(%peer_addr, error = %e, "packet handling error");
                                }
                            }
                        }
                        sync_handle(session, handle);
                    }
                    Err(e) => return Err(ConnectionError::Io(e.to_string())),
                }
            }
            Some(request) = command_rx.recv() => {
                let result = session
                    .send_reliable(request.endpoint, &request.data, request.correlation_id, |frame| {
                        let stream = &mut *stream;
                        Box::pin(async move {
                            let _ = stream.write_all(&frame).await;
                        })
                    })
                    .await;
                let _ = request.reply.send(result);
                sync_handle(session, handle);
            }
            _ = tokio::time::sleep(ctx.timing.heartbeat_timeout) => {
                warn!(%peer_addr, "heartbeat timeout, closing session");
                return Ok(());
            }
            _ = ctx.shutdown.notified() => {
                debug!(%peer_addr, "session closing for shutdown");
                return Ok(());
            }
        }
    }
}

fn sync_handle(session: &Session, handle: &SessionHandle) {
    handle.touch();
    handle.set_ready(session.state == SessionState::Ready);
    for cync_id in &session.known_device_ids {
        handle.remember(*cync_id);
    }
}

fn next_queue_id() -> [u8; 3] {
    static COUNTER: AtomicUsize = AtomicUsize::new(1);
    let value = COUNTER.fetch_add(1, Ordering::SeqCst) as u32;
    [(value >> 16) as u8, (value >> 8) as u8, value as u8]
}
