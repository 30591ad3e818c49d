// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The per-connection session: applies inbound packets to session and
//! registry state and produces the outbound bytes a caller must write back
//! to the socket. The session itself does no I/O; [`super::listener`] owns
//! the socket and drives [`Session::handle_raw`] from its Reader task.

use crate::codec::{self, DecodedPacket, PacketKind};
use crate::error::{RegistryValidationError, SessionError};
use crate::registry::device::{DeviceId, StatusDelta};
use crate::registry::Registry;
use crate::session::dedup::{DedupCache, DedupKey};
use crate::session::pending::{PendingOutcome, PendingTable};
use crate::session::state::SessionState;
use crate::timing::{CorrelationId, TimingPolicy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Outcome of a reliable send, per spec §4.2 step 6/7.
#[derive(Debug, Clone, Copy)]
pub struct SendResult {
    pub success: bool,
    pub correlation_id: CorrelationId,
    pub retries: u32,
}

/// One TCP/TLS connection, owned exclusively by its accepting task.
pub struct Session {
    pub peer_addr: String,
    pub home_id: u32,
    pub queue_id: [u8; 3],
    pub state: SessionState,
    pub known_device_ids: std::collections::HashSet<u32>,
    pub last_heartbeat: Instant,
    has_probed: bool,
    msg_id_counter: u16,
    pending: PendingTable,
    dedup: DedupCache,
    registry: Arc<RwLock<Registry>>,
    timing: TimingPolicy,
}

impl Session {
    pub fn new(
        peer_addr: String,
        home_id: u32,
        queue_id: [u8; 3],
        registry: Arc<RwLock<Registry>>,
        dedup_ttl: Duration,
        dedup_capacity: usize,
        timing: TimingPolicy,
    ) -> Self {
        Self {
            peer_addr,
            home_id,
            queue_id,
            state: SessionState::Accepted,
            known_device_ids: std::collections::HashSet::new(),
            last_heartbeat: Instant::now(),
            has_probed: false,
            msg_id_counter: 0,
            pending: PendingTable::new(),
            dedup: DedupCache::new(dedup_ttl, dedup_capacity),
            registry,
            timing,
        }
    }

    pub fn on_tls_accepted(&mut self) {
        self.state = SessionState::AwaitingHandshake;
    }

    fn next_msg_id(&mut self) -> [u8; 2] {
        self.msg_id_counter = self.msg_id_counter.wrapping_add(1);
        self.msg_id_counter.to_be_bytes()
    }

    /// Decode a raw frame (as produced by the framer) and apply it,
    /// returning every outbound frame the caller must write, in order.
    pub async fn handle_raw(&mut self, raw: &[u8]) -> Result<Vec<Vec<u8>>, SessionError> {
        let decoded = codec::decode(raw)?;
        self.last_heartbeat = Instant::now();

        if !self.state.accepts_all_kinds() && matches!(decoded.kind(), PacketKind::Status | PacketKind::Command | PacketKind::HeartbeatDevice) {
            debug!(peer = %self.peer_addr, state = ?self.state, kind = ?decoded.kind(), "out-of-order packet dropped");
            return Ok(Vec::new());
        }

        match decoded {
            DecodedPacket::Simple(packet) => self.handle_simple(packet.kind, &packet.payload).await,
            DecodedPacket::Framed(framed) => self.handle_framed(framed).await,
        }
    }

    async fn handle_simple(&mut self, kind: PacketKind, payload: &[u8]) -> Result<Vec<Vec<u8>>, SessionError> {
        match kind {
            PacketKind::Handshake => Ok(self.handle_handshake(payload)),
            PacketKind::DeviceInfo => self.handle_device_info(payload).await,
            PacketKind::CommandAck => {
                self.handle_command_ack(payload);
                Ok(Vec::new())
            }
            PacketKind::HeartbeatDevice => Ok(vec![codec::encode_heartbeat_ack(&[])]),
            _ => {
                warn!(peer = %self.peer_addr, ?kind, "unexpected simple packet kind");
                Ok(Vec::new())
            }
        }
    }

    fn handle_handshake(&mut self, _payload: &[u8]) -> Vec<Vec<u8>> {
        let mut out = vec![codec::encode_handshake_ack(&[])];
        self.state = SessionState::Handshaking;

        if !self.has_probed {
            self.state = SessionState::Probing;
            out.push(codec::encode_probe(&[]));
            self.has_probed = true;
        }
        self.state = SessionState::Ready;
        out
    }

    async fn handle_device_info(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, SessionError> {
        if payload.len() >= 4 {
            let cync_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let name = String::from_utf8_lossy(&payload[4..]).trim_matches('\0').to_string();
            self.known_device_ids.insert(cync_id);

            let id = DeviceId::new(self.home_id, cync_id);
            let mut registry = self.registry.write().await;
            registry.upsert_minimal_device(id);
            if !name.is_empty() {
                if let Some(device) = registry.device(id) {
                    let mut attrs = device.attrs.clone();
                    attrs.name = name;
                    registry.upsert_device(id, attrs);
                }
            }
            registry.record_known_session(id, &self.peer_addr);
            registry.mark_online(id);
        }
        Ok(vec![codec::encode_info_ack(&[])])
    }

    async fn handle_framed(&mut self, framed: crate::codec::FramedPacket) -> Result<Vec<Vec<u8>>, SessionError> {
        match framed.kind {
            PacketKind::Status => self.handle_status(framed).await,
            _ => {
                warn!(peer = %self.peer_addr, kind = ?framed.kind, "unexpected framed packet kind");
                Ok(Vec::new())
            }
        }
    }

    async fn handle_status(&mut self, framed: crate::codec::FramedPacket) -> Result<Vec<Vec<u8>>, SessionError> {
        let dedup_key = DedupKey::new(
            PacketKind::Status.byte(),
            framed.endpoint,
            framed.msg_id,
            &framed.data,
        );

        if self.dedup.check_and_insert(dedup_key) {
            debug!(peer = %self.peer_addr, "status packet dedup hit");
            return Ok(vec![codec::encode_status_ack(&[])]);
        }

        if !framed.checksum_valid {
            warn!(peer = %self.peer_addr, "status packet checksum invalid, dropping");
            return Ok(vec![codec::encode_status_ack(&[])]);
        }

        if let Some(delta) = decode_status_delta(&framed.data) {
            let cync_id = u32::from_be_bytes([0, framed.endpoint[2], framed.endpoint[3], framed.endpoint[4]]);
            self.known_device_ids.insert(cync_id);
            let id = DeviceId::new(self.home_id, cync_id);

            let mut registry = self.registry.write().await;
            registry.upsert_minimal_device(id);
            registry.record_known_session(id, &self.peer_addr);
            registry.mark_online(id);
            match registry.update_status(id, delta) {
                Ok(_) => {}
                Err(RegistryValidationError::OutOfRange { field, value }) => {
                    warn!(peer = %self.peer_addr, field, value, "status update out of range, dropped");
                }
                Err(e) => warn!(peer = %self.peer_addr, error = %e, "status update rejected"),
            }
        }

        Ok(vec![codec::encode_status_ack(&[])])
    }

    fn handle_command_ack(&mut self, payload: &[u8]) {
        if payload.len() < 2 {
            return;
        }
        let msg_id = [payload[0], payload[1]];
        if !self.pending.resolve(msg_id) {
            debug!(peer = %self.peer_addr, ?msg_id, "late or unknown ACK dropped");
        }
    }

    /// Encode, send (via `write`), and await an ACK for a 0x73 command,
    /// retrying with backoff up to `max_retries` on timeout.
    pub async fn send_reliable<W>(
        &mut self,
        endpoint: [u8; 5],
        data: &[u8],
        correlation_id: CorrelationId,
        mut write: W,
    ) -> SendResult
    where
        W: FnMut(Vec<u8>) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send,
    {
        let msg_id = self.next_msg_id();
        let mut rx = self.pending.insert(msg_id, correlation_id);
        let frame = codec::encode_command(endpoint, msg_id, data);

        for attempt in 0..=self.timing.max_retries {
            write(frame.clone()).await;

            let outcome = tokio::time::timeout(self.timing.ack_timeout, &mut rx).await;
            match outcome {
                Ok(Ok(PendingOutcome::Acked)) => {
                    return SendResult { success: true, correlation_id, retries: attempt };
                }
                Ok(Ok(PendingOutcome::Shutdown)) => {
                    return SendResult { success: false, correlation_id, retries: attempt };
                }
                Ok(Err(_)) => {
                    // Sender dropped without resolving; treat as failure.
                    self.pending.remove(msg_id);
                    return SendResult { success: false, correlation_id, retries: attempt };
                }
                Err(_timeout) => {
                    if attempt < self.timing.max_retries {
                        self.pending.record_retry(msg_id);
                        tokio::time::sleep(self.timing.retry_delay(attempt)).await;
                        continue;
                    }
                }
            }
        }

        self.pending.remove(msg_id);
        info!(peer = %self.peer_addr, ?msg_id, "command exhausted retries without ACK");
        SendResult { success: false, correlation_id, retries: self.timing.max_retries }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn dedup_stats(&self) -> (usize, u64, u64) {
        (self.dedup.len(), self.dedup.hits(), self.dedup.evictions())
    }

    /// Release every pending waiter and tear down session-owned state. Must
    /// be called exactly once, when the connection closes.
    pub async fn close(&mut self, registry: &Arc<RwLock<Registry>>) {
        self.state = SessionState::Closing;
        self.pending.release_all();
        registry.write().await.forget_session(&self.peer_addr);
        self.state = SessionState::Closed;
    }
}

/// Best-effort parse of a status broadcast's inner payload into a
/// [`StatusDelta`]. Layout: `[state, brightness, temperature, r, g, b]`,
/// any trailing bytes ignored; a payload shorter than one byte yields no
/// delta.
fn decode_status_delta(data: &[u8]) -> Option<StatusDelta> {
    if data.is_empty() {
        return None;
    }
    let state = data.first().copied();
    let brightness = data.get(1).copied();
    let temperature = data.get(2).copied();
    let rgb = if data.len() >= 6 {
        Some((data[3], data[4], data[5]))
    } else {
        None
    };

    Some(StatusDelta { state, brightness, temperature, rgb })
}
