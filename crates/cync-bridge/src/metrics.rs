// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide counters and gauges, per component §4.6. Plain atomics: no
//! external metrics crate is in the teacher's stack for this tier, so the
//! bridge exposes values the binary can format for a text endpoint or log
//! snapshot itself.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub decode_errors: AtomicU64,
    pub retransmits: AtomicU64,
    pub ack_matched: AtomicU64,
    pub ack_timeout: AtomicU64,
    pub idempotent_drops: AtomicU64,
    pub handshakes_ok: AtomicU64,
    pub handshakes_failed: AtomicU64,
    pub reconnects: AtomicU64,
    pub active_sessions: AtomicI64,
    pub dedup_cache_size: AtomicI64,
    pub dedup_evictions: AtomicU64,
    pub primary_session_violations: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmit(&self) {
        self.retransmits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_matched(&self) {
        self.ack_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_timeout(&self) {
        self.ack_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idempotent_drop(&self) {
        self.idempotent_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake(&self, ok: bool) {
        if ok {
            self.handshakes_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_dedup_cache_size(&self, size: usize) {
        self.dedup_cache_size.store(size as i64, Ordering::Relaxed);
    }

    pub fn record_dedup_eviction(&self) {
        self.dedup_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_primary_session_violation(&self) {
        self.primary_session_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// A flat text snapshot, the shape an HTTP metrics endpoint or a
    /// periodic log line would emit.
    pub fn snapshot(&self) -> String {
        format!(
            "packets_sent={} packets_received={} decode_errors={} retransmits={} \
             ack_matched={} ack_timeout={} idempotent_drops={} handshakes_ok={} \
             handshakes_failed={} reconnects={} active_sessions={} dedup_cache_size={} \
             dedup_evictions={} primary_session_violations={}",
            self.packets_sent.load(Ordering::Relaxed),
            self.packets_received.load(Ordering::Relaxed),
            self.decode_errors.load(Ordering::Relaxed),
            self.retransmits.load(Ordering::Relaxed),
            self.ack_matched.load(Ordering::Relaxed),
            self.ack_timeout.load(Ordering::Relaxed),
            self.idempotent_drops.load(Ordering::Relaxed),
            self.handshakes_ok.load(Ordering::Relaxed),
            self.handshakes_failed.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed),
            self.active_sessions.load(Ordering::Relaxed),
            self.dedup_cache_size.load(Ordering::Relaxed),
            self.dedup_evictions.load(Ordering::Relaxed),
            self.primary_session_violations.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let metrics = Metrics::new();
        metrics.record_packet_sent();
        metrics.record_packet_sent();
        metrics.record_decode_error();
        assert_eq!(metrics.packets_sent.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.decode_errors.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn session_gauge_tracks_open_and_close() {
        let metrics = Metrics::new();
        metrics.session_opened();
        metrics.session_opened();
        metrics.session_closed();
        assert_eq!(metrics.active_sessions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn snapshot_contains_every_field_name() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot();
        for field in ["packets_sent", "ack_timeout", "dedup_evictions", "active_sessions"] {
            assert!(snapshot.contains(field));
        }
    }
}
