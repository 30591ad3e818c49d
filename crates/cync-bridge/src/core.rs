// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Explicit dependency injection root (§9): every shared handle the bridge
//! needs is a typed field here, constructed once at startup and passed
//! down. No process-wide singletons besides this struct's own `Arc`.

use crate::config::BridgeConfig;
use crate::dispatcher::Dispatcher;
use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::session::SessionRegistry;
use crate::timing::TimingPolicy;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct Core {
    pub config: Arc<BridgeConfig>,
    pub registry: Arc<RwLock<Registry>>,
    pub sessions: SessionRegistry,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<Metrics>,
    pub timing: TimingPolicy,
    pub shutdown: Arc<tokio::sync::Notify>,
}

impl Core {
    pub fn new(config: BridgeConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(RwLock::new(Registry::new()));
        let sessions = SessionRegistry::new();
        let timing = TimingPolicy::from_p99(config.ack_p99(), config.max_retries);
        let kelvin_bounds = crate::registry::TemperatureBounds {
            min_kelvin: config.min_kelvin,
            max_kelvin: config.max_kelvin,
        };
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), sessions.clone(), config.cmd_broadcasts, kelvin_bounds));

        Self {
            config,
            registry,
            sessions,
            dispatcher,
            metrics: Arc::new(Metrics::new()),
            timing,
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Seed the registry from the config file's homes/devices/groups on
    /// startup.
    pub async fn seed_registry(&self) {
        let mut registry = self.registry.write().await;
        for (id, attrs) in self.config.seed_devices() {
            registry.upsert_device(id, attrs);
        }
        for group in self.config.seed_groups() {
            registry.upsert_group(group);
        }
    }

    /// Graceful shutdown per §5: signal every task, wait for the bounded
    /// drain timeout.
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
        tokio::time::sleep(self.timing.cleanup_interval.min(std::time::Duration::from_secs(5))).await;
    }
}
