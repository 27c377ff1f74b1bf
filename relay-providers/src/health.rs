//! Per-provider health accounting.

use std::sync::Mutex;

use chrono::Utc;

use crate::provider::{HealthStatus, ProviderHealth};

/// Smoothing factor for the latency EWMA.
const EWMA_ALPHA: f64 = 0.3;

/// Consecutive failures after which a provider is excluded from selection.
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 3;

#[derive(Debug, Default)]
struct HealthInner {
    ewma_latency_ms: Option<f64>,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
}

/// Rolling success/failure counts and smoothed latency for one provider.
///
/// Writes take the mutex briefly; reads produce an owned snapshot so hot
/// paths never hold the lock across awaits.
#[derive(Debug)]
pub struct HealthTracker {
    inner: Mutex<HealthInner>,
    unhealthy_after: u32,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UNHEALTHY_AFTER)
    }
}

impl HealthTracker {
    /// Create a tracker that marks the provider unhealthy after
    /// `unhealthy_after` consecutive failures.
    #[must_use]
    pub fn new(unhealthy_after: u32) -> Self {
        Self { inner: Mutex::new(HealthInner::default()), unhealthy_after }
    }

    /// Record a successful call and its latency.
    pub fn record_success(&self, latency_ms: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.successes += 1;
        inner.consecutive_failures = 0;
        inner.ewma_latency_ms = Some(match inner.ewma_latency_ms {
            Some(prev) => EWMA_ALPHA * latency_ms + (1.0 - EWMA_ALPHA) * prev,
            None => latency_ms,
        });
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.failures += 1;
        inner.consecutive_failures += 1;
    }

    /// Whether the provider is currently eligible for selection.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.consecutive_failures < self.unhealthy_after
    }

    /// Smoothed latency, when any call has succeeded.
    #[must_use]
    pub fn latency_ms(&self) -> Option<f64> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ewma_latency_ms
    }

    /// Owned point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ProviderHealth {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let status = if inner.consecutive_failures >= self.unhealthy_after {
            HealthStatus::Unhealthy
        } else if inner.consecutive_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        ProviderHealth {
            status,
            latency_ms: inner.ewma_latency_ms,
            last_checked: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy() {
        let tracker = HealthTracker::default();
        assert!(tracker.is_healthy());
        assert_eq!(tracker.snapshot().status, HealthStatus::Healthy);
        assert!(tracker.latency_ms().is_none());
    }

    #[test]
    fn consecutive_failures_flip_to_unhealthy() {
        let tracker = HealthTracker::new(3);
        tracker.record_failure();
        assert_eq!(tracker.snapshot().status, HealthStatus::Degraded);
        assert!(tracker.is_healthy());
        tracker.record_failure();
        tracker.record_failure();
        assert!(!tracker.is_healthy());
        assert_eq!(tracker.snapshot().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn success_resets_the_streak() {
        let tracker = HealthTracker::new(2);
        tracker.record_failure();
        tracker.record_success(100.0);
        tracker.record_failure();
        assert!(tracker.is_healthy());
    }

    #[test]
    fn ewma_smooths_latency() {
        let tracker = HealthTracker::default();
        tracker.record_success(100.0);
        assert_eq!(tracker.latency_ms(), Some(100.0));
        tracker.record_success(200.0);
        // 0.3 * 200 + 0.7 * 100 = 130
        assert!((tracker.latency_ms().unwrap() - 130.0).abs() < 1e-9);
    }
}
