//! Atomic proxy statistics counters.
//!
//! Monotonic display counters; all atomics use `Relaxed` ordering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Default)]
struct StatsInner {
    total_requests: AtomicU64,
    relayed: AtomicU64,
    not_found: AtomicU64,
    discovery_failures: AtomicU64,
    upstream_errors: AtomicU64,
}

/// Thread-safe proxy statistics. Cheap to clone (Arc).
#[derive(Clone, Default)]
pub struct ProxyStats {
    inner: Arc<StatsInner>,
}

/// Snapshot of current stats values, serializable to JSON.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub relayed: u64,
    pub not_found: u64,
    pub discovery_failures: u64,
    pub upstream_errors: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests(&self) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_relayed(&self) {
        self.inner.relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_not_found(&self) {
        self.inner.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_discovery_failures(&self) {
        self.inner.discovery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_upstream_errors(&self, n: u64) {
        self.inner.upstream_errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            relayed: self.inner.relayed.load(Ordering::Relaxed),
            not_found: self.inner.not_found.load(Ordering::Relaxed),
            discovery_failures: self.inner.discovery_failures.load(Ordering::Relaxed),
            upstream_errors: self.inner.upstream_errors.load(Ordering::Relaxed),
        }
    }
}
