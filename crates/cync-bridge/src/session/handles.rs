// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lightweight, cloneable handles to live sessions, shared with the
//! Dispatcher so it can pick a primary session and route a command without
//! ever touching the socket itself. The connection task remains the single
//! writer; a handle only lets other components *ask* it to send.

use crate::session::SendResult;
use crate::timing::CorrelationId;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// A request the connection task services by calling
/// [`crate::session::Session::send_reliable`] on its owned `Session`.
pub struct DispatchRequest {
    pub endpoint: [u8; 5],
    pub data: Vec<u8>,
    pub correlation_id: CorrelationId,
    pub reply: oneshot::Sender<SendResult>,
}

#[derive(Clone)]
pub struct SessionHandle {
    pub peer_addr: String,
    pub known_device_ids: Arc<RwLock<HashSet<u32>>>,
    pub last_active: Arc<RwLock<Instant>>,
    pub ready: Arc<AtomicBool>,
    command_tx: mpsc::Sender<DispatchRequest>,
}

impl SessionHandle {
    pub fn new(peer_addr: String, command_tx: mpsc::Sender<DispatchRequest>) -> Self {
        Self {
            peer_addr,
            known_device_ids: Arc::new(RwLock::new(HashSet::new())),
            last_active: Arc::new(RwLock::new(Instant::now())),
            ready: Arc::new(AtomicBool::new(false)),
            command_tx,
        }
    }

    pub fn touch(&self) {
        *self.last_active.write() = Instant::now();
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn knows(&self, cync_id: u32) -> bool {
        self.known_device_ids.read().contains(&cync_id)
    }

    pub fn known_count(&self) -> usize {
        self.known_device_ids.read().len()
    }

    pub fn remember(&self, cync_id: u32) {
        self.known_device_ids.write().insert(cync_id);
    }

    /// Ask the owning connection task to send a reliable command. Fails if
    /// the connection task has already exited.
    pub async fn send_reliable(
        &self,
        endpoint: [u8; 5],
        data: Vec<u8>,
        correlation_id: CorrelationId,
    ) -> Result<SendResult, crate::error::DispatchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(DispatchRequest { endpoint, data, correlation_id, reply: reply_tx })
            .await
            .map_err(|_| crate::error::DispatchError::ConnectionClosed)?;
        reply_rx.await.map_err(|_| crate::error::DispatchError::ConnectionClosed)
    }
}

/// Registry of live session handles, keyed by peer address. Distinct from
/// the device/group [`crate::registry::Registry`]: this tracks *sessions*,
/// not devices.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.peer_addr.clone(), handle);
    }

    pub fn remove(&self, peer_addr: &str) {
        self.sessions.remove(peer_addr);
    }

    /// Every ready session that knows `cync_id`, most-recently-active
    /// first, lexicographic peer address as the tiebreak.
    pub fn candidates_for(&self, cync_id: u32) -> Vec<SessionHandle> {
        let mut candidates: Vec<SessionHandle> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_ready() && entry.value().knows(cync_id))
            .map(|entry| entry.value().clone())
            .collect();
        candidates.sort_by(|a, b| {
            let a_active = *a.last_active.read();
            let b_active = *b.last_active.read();
            b_active.cmp(&a_active).then_with(|| a.peer_addr.cmp(&b.peer_addr))
        });
        candidates
    }

    /// The primary session for a device: most recently active among those
    /// that know it, ready, tiebreak by peer address.
    pub fn primary_for(&self, cync_id: u32) -> Option<SessionHandle> {
        self.candidates_for(cync_id).into_iter().next()
    }

    /// The primary session for a group: prefer the session that knows the
    /// most of the group's online members, tiebreak as above.
    pub fn primary_for_group(&self, member_ids: &[u32]) -> Option<SessionHandle> {
        let mut best: Option<(usize, SessionHandle)> = None;
        for entry in self.sessions.iter() {
            let handle = entry.value();
            if !handle.is_ready() {
                continue;
            }
            let known = member_ids.iter().filter(|id| handle.knows(**id)).count();
            if known == 0 {
                continue;
            }
            let replace = match &best {
                None => true,
                Some((best_known, best_handle)) => {
                    known > *best_known
                        || (known == *best_known && {
                            let best_active = *best_handle.last_active.read();
                            let this_active = *handle.last_active.read();
                            this_active > best_active
                                || (this_active == best_active && handle.peer_addr < best_handle.peer_addr)
                        })
                }
            };
            if replace {
                best = Some((known, handle.clone()));
            }
        }
        best.map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(peer_addr: &str) -> (SessionHandle, mpsc::Receiver<DispatchRequest>) {
        let (tx, rx) = mpsc::channel(4);
        (SessionHandle::new(peer_addr.to_string(), tx), rx)
    }

    #[test]
    fn primary_for_picks_most_recently_active() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle("10.0.0.1:1");
        let (b, _rx_b) = handle("10.0.0.2:1");
        a.set_ready(true);
        b.set_ready(true);
        a.remember(42);
        b.remember(42);
        *a.last_active.write() = Instant::now() - std::time::Duration::from_secs(5);
        registry.insert(a);
        registry.insert(b.clone());

        let primary = registry.primary_for(42).unwrap();
        assert_eq!(primary.peer_addr, b.peer_addr);
    }

    #[test]
    fn primary_for_ties_break_lexicographically() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle("10.0.0.2:1");
        let (b, _rx_b) = handle("10.0.0.1:1");
        a.set_ready(true);
        b.set_ready(true);
        a.remember(1);
        b.remember(1);
        let now = Instant::now();
        *a.last_active.write() = now;
        *b.last_active.write() = now;
        registry.insert(a);
        registry.insert(b);

        let primary = registry.primary_for(1).unwrap();
        assert_eq!(primary.peer_addr, "10.0.0.1:1");
    }

    #[test]
    fn not_ready_sessions_are_excluded() {
        let registry = SessionRegistry::new();
        let (a, _rx) = handle("10.0.0.1:1");
        a.remember(1);
        registry.insert(a);
        assert!(registry.primary_for(1).is_none());
    }

    #[test]
    fn group_primary_prefers_most_known_members() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle("10.0.0.1:1");
        let (b, _rx_b) = handle("10.0.0.2:1");
        a.set_ready(true);
        b.set_ready(true);
        a.remember(1);
        b.remember(1);
        b.remember(2);
        registry.insert(a);
        registry.insert(b.clone());

        let primary = registry.primary_for_group(&[1, 2, 3]).unwrap();
        assert_eq!(primary.peer_addr, b.peer_addr);
    }
}
