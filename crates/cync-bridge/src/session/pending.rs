// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tracking table for outbound 0x73 commands awaiting a 0x7B ACK.

use crate::timing::CorrelationId;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;

/// Outcome of a pending command, delivered through its completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOutcome {
    Acked,
    Shutdown,
}

/// An outbound 0x73 awaiting ACK. Invariant: at most one entry per `msg_id`
/// per session, enforced by [`PendingTable::insert`].
pub struct PendingCommand {
    pub correlation_id: CorrelationId,
    pub sent_at: Instant,
    pub retry_count: u32,
    completion: Option<oneshot::Sender<PendingOutcome>>,
}

/// The per-session table of in-flight commands, keyed by `msg_id`.
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<[u8; 2], PendingCommand>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending command, returning the receiver half of its
    /// completion signal. Panics if an entry for `msg_id` already exists —
    /// callers must never reuse a `msg_id` while it has a live entry.
    pub fn insert(
        &mut self,
        msg_id: [u8; 2],
        correlation_id: CorrelationId,
    ) -> oneshot::Receiver<PendingOutcome> {
        let (tx, rx) = oneshot::channel();
        let previous = self.entries.insert(
            msg_id,
            PendingCommand {
                correlation_id,
                sent_at: Instant::now(),
                retry_count: 0,
                completion: Some(tx),
            },
        );
        debug_assert!(previous.is_none(), "msg_id reused while pending");
        rx
    }

    pub fn record_retry(&mut self, msg_id: [u8; 2]) {
        if let Some(entry) = self.entries.get_mut(&msg_id) {
            entry.retry_count += 1;
        }
    }

    pub fn retry_count(&self, msg_id: [u8; 2]) -> u32 {
        self.entries.get(&msg_id).map(|e| e.retry_count).unwrap_or(0)
    }

    /// Resolve a pending entry on a matching 0x7B ACK. Returns `false` if no
    /// entry was found (a late ACK, harmless and dropped).
    pub fn resolve(&mut self, msg_id: [u8; 2]) -> bool {
        match self.entries.remove(&msg_id) {
            Some(entry) => {
                if let Some(tx) = entry.completion {
                    let _ = tx.send(PendingOutcome::Acked);
                }
                true
            }
            None => false,
        }
    }

    /// Drop the entry without a result, used after retries are exhausted;
    /// the caller observes the ACK-wait timeout directly.
    pub fn remove(&mut self, msg_id: [u8; 2]) {
        self.entries.remove(&msg_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every waiter with `Shutdown`, emptying the table. Called on
    /// session close so no task is left awaiting a signal that will never
    /// arrive.
    pub fn release_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            if let Some(tx) = entry.completion {
                let _ = tx.send(PendingOutcome::Shutdown);
            }
        }
    }
}
