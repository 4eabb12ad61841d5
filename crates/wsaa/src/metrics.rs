//! Metrics collection for ticket acquisition.
//!
//! Provides counters for cache effectiveness, single-flight joins and
//! authentication outcomes.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use arca_wsaa::{TicketErrorKind, TicketMetrics};
//!
//! let metrics = TicketMetrics::new();
//!
//! metrics.record_cache_miss();
//! metrics.record_authentication(Duration::from_millis(420));
//! metrics.record_authentication_failure(TicketErrorKind::Transport);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.authentications, 1);
//! assert_eq!(snapshot.error_transport, 1);
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::error::TicketErrorKind;

/// Snapshot of ticket metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct TicketMetricsSnapshot {
    // Cache
    /// Calls answered from the in-memory cache.
    #[builder(default)]
    pub cache_hits: u64,
    /// Calls that found no usable cached ticket.
    #[builder(default)]
    pub cache_misses: u64,
    /// Calls that joined an attempt already in flight.
    #[builder(default)]
    pub joined_waiters: u64,
    /// Attempts answered from the persistent store.
    #[builder(default)]
    pub store_hits: u64,

    // Authentication
    /// Round-trips to the authority, successful or not.
    #[builder(default)]
    pub authentications: u64,
    /// Cumulative round-trip latency in microseconds.
    #[builder(default)]
    pub authentication_latency_us: u64,

    // Failures by category
    /// Key material errors.
    #[builder(default)]
    pub error_key: u64,
    /// Signature errors.
    #[builder(default)]
    pub error_signature: u64,
    /// Transport errors.
    #[builder(default)]
    pub error_transport: u64,
    /// Authority rejections.
    #[builder(default)]
    pub error_rejected: u64,
    /// Response parse errors.
    #[builder(default)]
    pub error_parse: u64,
    /// Other errors.
    #[builder(default)]
    pub error_other: u64,
}

impl TicketMetricsSnapshot {
    /// Returns the total number of failed attempts.
    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.error_key
            + self.error_signature
            + self.error_transport
            + self.error_rejected
            + self.error_parse
            + self.error_other
    }

    /// Returns the cache hit rate as a fraction (0.0 to 1.0).
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 { 0.0 } else { self.cache_hits as f64 / total as f64 }
    }

    /// Returns the average authentication latency in microseconds.
    #[must_use]
    pub fn avg_authentication_latency_us(&self) -> f64 {
        if self.authentications == 0 {
            0.0
        } else {
            self.authentication_latency_us as f64 / self.authentications as f64
        }
    }
}

#[derive(Default)]
struct TicketMetricsInner {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    joined_waiters: AtomicU64,
    store_hits: AtomicU64,
    authentications: AtomicU64,
    authentication_latency_us: AtomicU64,
    error_key: AtomicU64,
    error_signature: AtomicU64,
    error_transport: AtomicU64,
    error_rejected: AtomicU64,
    error_parse: AtomicU64,
    error_other: AtomicU64,
}

/// Metrics collector for a [`TicketManager`](crate::TicketManager).
///
/// Lock-free atomic counters, shared across clones.
#[derive(Clone, Default)]
pub struct TicketMetrics {
    inner: Arc<TicketMetricsInner>,
}

impl std::fmt::Debug for TicketMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TicketMetrics").field(&self.snapshot()).finish()
    }
}

impl TicketMetrics {
    /// Creates a new metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a cache hit.
    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache miss.
    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a caller joining an in-flight attempt.
    pub fn record_join(&self) {
        self.inner.joined_waiters.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an attempt satisfied by the persistent store.
    pub fn record_store_hit(&self) {
        self.inner.store_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one round-trip to the authority.
    pub fn record_authentication(&self, duration: Duration) {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.inner.authentications.fetch_add(1, Ordering::Relaxed);
        self.inner.authentication_latency_us.fetch_add(us, Ordering::Relaxed);
    }

    /// Records a failed attempt by category.
    pub fn record_authentication_failure(&self, kind: TicketErrorKind) {
        let counter = match kind {
            TicketErrorKind::Key => &self.inner.error_key,
            TicketErrorKind::Signature => &self.inner.error_signature,
            TicketErrorKind::Transport => &self.inner.error_transport,
            TicketErrorKind::AuthorityRejected => &self.inner.error_rejected,
            TicketErrorKind::Parse => &self.inner.error_parse,
            TicketErrorKind::Other => &self.inner.error_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TicketMetricsSnapshot {
        let inner = &self.inner;
        TicketMetricsSnapshot::builder()
            .cache_hits(inner.cache_hits.load(Ordering::Relaxed))
            .cache_misses(inner.cache_misses.load(Ordering::Relaxed))
            .joined_waiters(inner.joined_waiters.load(Ordering::Relaxed))
            .store_hits(inner.store_hits.load(Ordering::Relaxed))
            .authentications(inner.authentications.load(Ordering::Relaxed))
            .authentication_latency_us(inner.authentication_latency_us.load(Ordering::Relaxed))
            .error_key(inner.error_key.load(Ordering::Relaxed))
            .error_signature(inner.error_signature.load(Ordering::Relaxed))
            .error_transport(inner.error_transport.load(Ordering::Relaxed))
            .error_rejected(inner.error_rejected.load(Ordering::Relaxed))
            .error_parse(inner.error_parse.load(Ordering::Relaxed))
            .error_other(inner.error_other.load(Ordering::Relaxed))
            .build()
    }
}
