use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Per-run counters for external judgments.
#[derive(Debug, Default)]
pub struct UsageStats {
    requested: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    fallbacks: AtomicU64,
    total_cost: Mutex<f64>,
}

/// Point-in-time copy of [`UsageStats`], for the run report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    /// Second opinions asked for, cache hits included.
    pub requested: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failures: u64,
    pub retries: u64,
    pub fallbacks: u64,
    pub total_cost: f64,
    /// `cache_hits / requested`, 0 when nothing was requested.
    pub hit_rate: f64,
}

impl UsageStats {
    pub fn record_request(&self) {
        self.requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_cost(&self, cost: f64) {
        if !cost.is_finite() || cost <= 0.0 {
            return;
        }
        if let Ok(mut total) = self.total_cost.lock() {
            *total += cost;
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let requested = self.requested.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        UsageSnapshot {
            requested,
            cache_hits,
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            total_cost: self.total_cost.lock().map(|c| *c).unwrap_or(0.0),
            hit_rate: if requested == 0 {
                0.0
            } else {
                cache_hits as f64 / requested as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hit_rate() {
        let stats = UsageStats::default();
        assert_eq!(stats.snapshot().hit_rate, 0.0);
        for _ in 0..4 {
            stats.record_request();
        }
        stats.record_hit();
        stats.record_miss();
        stats.add_cost(0.25);
        stats.add_cost(-1.0);
        stats.add_cost(f64::NAN);
        let snap = stats.snapshot();
        assert_eq!(snap.requested, 4);
        assert_relative_eq!(snap.hit_rate, 0.25);
        assert_relative_eq!(snap.total_cost, 0.25);
    }
}
