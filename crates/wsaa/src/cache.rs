//! In-memory ticket cache.
//!
//! Maps `(environment, service, identity)` to the most recently issued
//! [`Ticket`]. Entries are never deleted explicitly: each entry's expiry is
//! the ticket's remaining lifetime at insertion, and the cache is capacity
//! bounded with LRU eviction.
//!
//! Usability is decided against the injected [`Clock`], not the cache's own
//! timer, so a ticket within the renewal margin is reported as absent even
//! while it still occupies an entry.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Duration as ChronoDuration;
use moka::{policy::EvictionPolicy, sync::Cache};

use crate::{
    clock::Clock,
    types::{Ticket, TicketKey},
};

/// Per-entry expiry policy derived from the ticket's own expiration time.
struct TicketExpiry {
    clock: Arc<dyn Clock>,
}

impl TicketExpiry {
    fn remaining(&self, ticket: &Ticket) -> Duration {
        (ticket.expires_at - self.clock.now()).to_std().unwrap_or(Duration::ZERO)
    }
}

impl moka::Expiry<TicketKey, Ticket> for TicketExpiry {
    fn expire_after_create(
        &self,
        _key: &TicketKey,
        value: &Ticket,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.remaining(value))
    }

    fn expire_after_update(
        &self,
        _key: &TicketKey,
        value: &Ticket,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.remaining(value))
    }
}

/// Concurrent ticket cache.
///
/// # Thread Safety
///
/// Readers never block each other; [`put`](Self::put) replaces an entry
/// atomically.
#[derive(Clone)]
pub struct TicketCache {
    entries: Cache<TicketKey, Ticket>,
    clock: Arc<dyn Clock>,
    renewal_margin: ChronoDuration,
}

impl std::fmt::Debug for TicketCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketCache")
            .field("entries", &self.entries.entry_count())
            .field("renewal_margin", &self.renewal_margin)
            .finish_non_exhaustive()
    }
}

impl TicketCache {
    /// Creates a cache holding at most `capacity` tickets.
    ///
    /// A ticket is usable while `now < expires_at - renewal_margin`.
    #[must_use]
    pub fn new(capacity: u64, renewal_margin: ChronoDuration, clock: Arc<dyn Clock>) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(TicketExpiry { clock: Arc::clone(&clock) })
            .build();
        Self { entries, clock, renewal_margin }
    }

    /// Returns the cached ticket for `key` if it is still usable.
    #[must_use]
    pub fn get(&self, key: &TicketKey) -> Option<Ticket> {
        let now = self.clock.now();
        self.entries.get(key).filter(|ticket| ticket.is_usable_at(now, self.renewal_margin))
    }

    /// Returns the cached ticket for `key` regardless of usability.
    #[must_use]
    pub fn peek(&self, key: &TicketKey) -> Option<Ticket> {
        self.entries.get(key)
    }

    /// Stores `ticket` under `key`, replacing any previous entry.
    pub fn put(&self, key: TicketKey, ticket: Ticket) {
        self.entries.insert(key, ticket);
    }

    /// Returns the renewal margin.
    #[must_use]
    pub fn renewal_margin(&self) -> ChronoDuration {
        self.renewal_margin
    }

    /// Returns the approximate number of entries.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Runs pending eviction work.
    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
    }
}
