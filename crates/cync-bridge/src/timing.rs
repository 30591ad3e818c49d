// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Correlation IDs and the adaptive timeout/retry schedule derived from a
//! single measured ACK-latency percentile.

use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

/// A fresh identifier attached to every externally originated operation
/// (MQTT command, discovery publish) and threaded explicitly through calls,
/// never through a thread-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timeouts and retry parameters, all derived from one measured `p99`
/// ACK-latency figure.
#[derive(Debug, Clone, Copy)]
pub struct TimingPolicy {
    pub ack_timeout: Duration,
    pub handshake_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub cleanup_interval: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter_ratio: f64,
}

impl TimingPolicy {
    /// Derive a full policy from a measured p99 ACK latency (default 51 ms).
    pub fn from_p99(p99: Duration, max_retries: u32) -> Self {
        let ack_timeout = p99.mul_f64(2.5);
        let handshake_timeout = ack_timeout.mul_f64(2.5);
        let heartbeat_timeout = (ack_timeout * 3).max(Duration::from_secs(10));
        let cleanup_interval = (ack_timeout / 3).clamp(Duration::from_secs(10), Duration::from_secs(60));

        Self {
            ack_timeout,
            handshake_timeout,
            heartbeat_timeout,
            cleanup_interval,
            max_retries,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            retry_jitter_ratio: 0.10,
        }
    }

    /// Delay before the `attempt`-th retry (0-indexed): `base * 2^attempt +
    /// jitter`, capped at `retry_max_delay`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = self.retry_base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = exp.min(self.retry_max_delay.as_secs_f64());
        let jitter = capped * self.retry_jitter_ratio * rand::thread_rng().gen::<f64>();
        Duration::from_secs_f64(capped + jitter)
    }
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self::from_p99(Duration::from_millis(51), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_formula() {
        let policy = TimingPolicy::from_p99(Duration::from_millis(51), 3);
        assert_eq!(policy.ack_timeout, Duration::from_millis(51).mul_f64(2.5));
        assert_eq!(policy.handshake_timeout, policy.ack_timeout.mul_f64(2.5));
        assert_eq!(policy.heartbeat_timeout, Duration::from_secs(10));
    }

    #[test]
    fn heartbeat_timeout_floor_applies_for_small_p99() {
        let policy = TimingPolicy::from_p99(Duration::from_millis(1), 3);
        assert_eq!(policy.heartbeat_timeout, Duration::from_secs(10));
    }

    #[test]
    fn cleanup_interval_is_clamped() {
        let policy = TimingPolicy::from_p99(Duration::from_millis(1), 3);
        assert_eq!(policy.cleanup_interval, Duration::from_secs(10));

        let policy = TimingPolicy::from_p99(Duration::from_secs(10), 3);
        assert_eq!(policy.cleanup_interval, Duration::from_secs(60));
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let policy = TimingPolicy::default();
        let d0 = policy.retry_delay(0);
        let d5 = policy.retry_delay(5);
        assert!(d0 >= policy.retry_base_delay);
        assert!(d5 <= policy.retry_max_delay.mul_f64(1.0 + policy.retry_jitter_ratio));
    }

    #[test]
    fn correlation_id_is_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }
}
