//! Ticket manager: the single entry point for obtaining tickets.
//!
//! [`TicketManager`] composes the request builder, signer, authenticator
//! and cache, and guarantees that at most one authentication per
//! `(environment, service, identity)` is in flight at any time.
//!
//! # Flow
//!
//! ```text
//! acquire(env, service, identity)
//!   → usable ticket in cache?           → return it
//!   → attempt in flight for the key?    → join it
//!   → otherwise start an attempt:
//!       persistent store (optional)     → usable? store in cache, return
//!       build request → sign → LoginCms → store in cache (+ persist) → return
//! ```
//!
//! # Single-flight
//!
//! Each attempt runs on its own task and is published as a shared future in
//! the in-flight map. Callers that arrive while it runs await the same
//! future and observe the same ticket or the same error. A caller that stops
//! waiting does not cancel the attempt.
//!
//! The attempt writes the cache before it leaves the in-flight map, and
//! callers re-read the cache while holding the in-flight lock. A caller can
//! therefore never start a second attempt right after a successful one.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use fail::fail_point;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use tracing::Instrument;

use crate::{
    cache::TicketCache,
    client::{Authenticator, LoginCmsClient},
    clock::{Clock, SystemClock},
    config::{
        DEFAULT_CACHE_CAPACITY, DEFAULT_RENEWAL_MARGIN, DEFAULT_REQUEST_WINDOW, MAX_RENEWAL_MARGIN,
        TicketConfig,
    },
    error::{Result, TicketError},
    metrics::TicketMetrics,
    request::{RequestBuilder, SignedEnvelope},
    signer::{CmsSigner, PayloadSigner},
    store::{FileTicketStore, TicketStore},
    types::{Environment, Identity, Ticket, TicketKey},
};

type SharedAttempt = Shared<BoxFuture<'static, Result<Ticket>>>;

struct ManagerInner {
    signer: Arc<dyn PayloadSigner>,
    authenticator: Arc<dyn Authenticator>,
    requests: RequestBuilder,
    cache: TicketCache,
    store: Option<Arc<dyn TicketStore>>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashMap<TicketKey, SharedAttempt>>,
    metrics: TicketMetrics,
    renewal_margin: ChronoDuration,
}

/// Obtains, caches and renews access tickets.
///
/// Cloning is cheap; clones share the cache, the in-flight attempts and the
/// metrics.
///
/// # Examples
///
/// ```no_run
/// use arca_wsaa::{Environment, Identity, TicketConfig, TicketManager};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TicketConfig::builder()
///     .identity(Identity::new(20123456789)?)
///     .private_key_file("keys/private.key")
///     .certificate_file("keys/certificate.crt")
///     .build()?;
/// let manager = TicketManager::from_config(&config)?;
///
/// let ticket = manager.acquire(Environment::Testing, "wsfe", config.identity()).await?;
/// println!("ticket valid until {}", ticket.expires_at);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TicketManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for TicketManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketManager")
            .field("cache", &self.inner.cache)
            .field("in_flight", &self.in_flight_count())
            .field("persistent_store", &self.inner.store.is_some())
            .finish_non_exhaustive()
    }
}

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

#[bon::bon]
impl TicketManager {
    /// Creates a manager from explicit collaborators.
    ///
    /// # Arguments
    ///
    /// * `signer` - Signs serialized ticket requests.
    /// * `authenticator` - Exchanges signed requests for tickets.
    ///
    /// # Optional Fields
    ///
    /// * `clock` - Time source (default: system clock).
    /// * `renewal_margin` - Renew tickets this long before expiry (default: 5 minutes).
    /// * `request_window` - Validity of each signed request (default: 10 minutes).
    /// * `cache_capacity` - Maximum cached tickets (default: 1024).
    /// * `store` - Persistent ticket store (default: none).
    /// * `metrics` - Metrics collector (default: a fresh one).
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Config`] if:
    /// - `renewal_margin` is 12 hours or longer
    /// - `request_window` is zero or longer than 24 hours
    /// - `cache_capacity` is zero
    #[builder]
    pub fn new(
        signer: Arc<dyn PayloadSigner>,
        authenticator: Arc<dyn Authenticator>,
        #[builder(default = system_clock())] clock: Arc<dyn Clock>,
        #[builder(default = DEFAULT_RENEWAL_MARGIN)] renewal_margin: Duration,
        #[builder(default = DEFAULT_REQUEST_WINDOW)] request_window: Duration,
        #[builder(default = DEFAULT_CACHE_CAPACITY)] cache_capacity: u64,
        store: Option<Arc<dyn TicketStore>>,
        #[builder(default)] metrics: TicketMetrics,
    ) -> Result<Self> {
        if cache_capacity == 0 {
            return Err(TicketError::Config("cache_capacity cannot be zero".into()));
        }
        if renewal_margin >= MAX_RENEWAL_MARGIN {
            return Err(TicketError::Config(format!(
                "renewal_margin must be below {}s",
                MAX_RENEWAL_MARGIN.as_secs()
            )));
        }
        let renewal_margin = ChronoDuration::from_std(renewal_margin)
            .map_err(|_| TicketError::Config("renewal_margin out of range".into()))?;
        let requests = RequestBuilder::new(request_window)?;
        let cache = TicketCache::new(cache_capacity, renewal_margin, Arc::clone(&clock));

        Ok(Self {
            inner: Arc::new(ManagerInner {
                signer,
                authenticator,
                requests,
                cache,
                store,
                clock,
                in_flight: Mutex::new(HashMap::new()),
                metrics,
                renewal_margin,
            }),
        })
    }

    /// Creates a manager backed by the real signer, the `LoginCms` client
    /// and, when `cache_dir` is set, a [`FileTicketStore`].
    ///
    /// # Errors
    ///
    /// - [`TicketError::Config`] if `config` is invalid
    /// - [`TicketError::Key`] if the key material cannot be loaded
    pub fn from_config(config: &TicketConfig) -> Result<Self> {
        config.validate()?;
        let signer = CmsSigner::from_pem_files(config.private_key_file(), config.certificate_file())?;
        let client = LoginCmsClient::from_config(config)?;
        let store = config
            .cache_dir()
            .map(|dir| Arc::new(FileTicketStore::new(dir)) as Arc<dyn TicketStore>);

        tracing::info!(
            identity = %config.identity(),
            environment = %config.environment(),
            persistent_store = store.is_some(),
            "Ticket manager initialized"
        );

        Self::builder()
            .signer(Arc::new(signer))
            .authenticator(Arc::new(client))
            .renewal_margin(config.renewal_margin())
            .request_window(config.request_window())
            .cache_capacity(config.cache_capacity())
            .maybe_store(store)
            .build()
    }

    /// Returns a usable ticket for `(environment, service, identity)`,
    /// authenticating if necessary.
    ///
    /// # Errors
    ///
    /// - [`TicketError::InvalidRequest`] if `service` is empty or contains whitespace
    /// - any error of the attempt that was joined or started; see [`TicketError`]
    #[tracing::instrument(
        name = "acquire_ticket",
        skip(self),
        fields(environment = %environment, identity = %identity)
    )]
    pub async fn acquire(
        &self,
        environment: Environment,
        service: &str,
        identity: Identity,
    ) -> Result<Ticket> {
        let key = TicketKey::new(environment, service, identity)?;
        self.acquire_key(key).await
    }

    /// Same as [`acquire`](Self::acquire) for an already validated key.
    ///
    /// # Errors
    ///
    /// See [`acquire`](Self::acquire).
    pub async fn acquire_key(&self, key: TicketKey) -> Result<Ticket> {
        if let Some(ticket) = self.inner.cache.get(&key) {
            self.inner.metrics.record_cache_hit();
            tracing::debug!(%key, "Ticket cache hit");
            return Ok(ticket);
        }

        let attempt = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(ticket) = self.inner.cache.get(&key) {
                self.inner.metrics.record_cache_hit();
                tracing::debug!(%key, "Ticket cache hit after in-flight check");
                return Ok(ticket);
            }
            if let Some(existing) = in_flight.get(&key) {
                self.inner.metrics.record_join();
                tracing::debug!(%key, "Joining in-flight authentication");
                existing.clone()
            } else {
                self.inner.metrics.record_cache_miss();
                tracing::debug!(%key, "Ticket cache miss, starting authentication");
                let attempt = self.spawn_attempt(key.clone());
                in_flight.insert(key, attempt.clone());
                attempt
            }
        };

        attempt.await
    }

    /// Returns the ticket cache.
    #[must_use]
    pub fn cache(&self) -> &TicketCache {
        &self.inner.cache
    }

    /// Returns the metrics collector.
    #[must_use]
    pub fn metrics(&self) -> &TicketMetrics {
        &self.inner.metrics
    }

    /// Returns the number of attempts currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    fn spawn_attempt(&self, key: TicketKey) -> SharedAttempt {
        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!("ticket_attempt", %key);
        let task_key = key.clone();
        let handle = tokio::spawn(
            async move {
                let result = inner.attempt(&task_key).await;
                if let Ok(ticket) = &result {
                    inner.cache.put(task_key.clone(), ticket.clone());
                }
                inner.in_flight.lock().remove(&task_key);
                result
            }
            .instrument(span),
        );

        let inner = Arc::clone(&self.inner);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    inner.in_flight.lock().remove(&key);
                    tracing::error!(%key, error = %join_error, "Ticket attempt did not complete");
                    Err(TicketError::Internal(format!("ticket attempt did not complete: {join_error}")))
                },
            }
        }
        .boxed()
        .shared()
    }
}

impl ManagerInner {
    async fn attempt(&self, key: &TicketKey) -> Result<Ticket> {
        if let Some(ticket) = self.load_persisted(key).await {
            self.metrics.record_store_hit();
            return Ok(ticket);
        }

        let result = self.authenticate(key).await;
        match &result {
            Ok(ticket) => {
                tracing::info!(%key, expires_at = %ticket.expires_at, "Ticket issued");
                if !ticket.is_usable_at(self.clock.now(), self.renewal_margin) {
                    tracing::warn!(
                        %key,
                        expires_at = %ticket.expires_at,
                        "Issued ticket is already inside the renewal margin"
                    );
                }
                self.persist(key, ticket).await;
            },
            Err(err) => {
                self.metrics.record_authentication_failure(err.kind());
                if err.is_already_authenticated() {
                    tracing::warn!(
                        %key,
                        error = %err,
                        "Authority still holds an active ticket for this service; it is not \
                         available locally"
                    );
                } else {
                    tracing::warn!(
                        %key,
                        error = %err,
                        transient = err.is_transient(),
                        "Ticket authentication failed"
                    );
                }
            },
        }
        result
    }

    async fn authenticate(&self, key: &TicketKey) -> Result<Ticket> {
        fail_point!("manager-before-authenticate", |_| {
            Err(TicketError::transport("injected failure before authentication"))
        });

        let request = self.requests.build(key.service(), self.clock.now());
        let xml = request.to_xml()?;
        let envelope = SignedEnvelope::from_der(&self.signer.sign(xml.as_bytes())?);

        let started = std::time::Instant::now();
        let result = self.authenticator.authenticate(key, &envelope).await;
        self.metrics.record_authentication(started.elapsed());
        result
    }

    async fn load_persisted(&self, key: &TicketKey) -> Option<Ticket> {
        let store = self.store.as_ref()?;
        match store.load(key).await {
            Ok(Some(ticket)) if ticket.is_usable_at(self.clock.now(), self.renewal_margin) => {
                tracing::debug!(%key, expires_at = %ticket.expires_at, "Using persisted ticket");
                Some(ticket)
            },
            Ok(Some(ticket)) => {
                tracing::debug!(%key, expires_at = %ticket.expires_at, "Persisted ticket is stale");
                None
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(%key, error = %err, "Failed to load persisted ticket");
                None
            },
        }
    }

    async fn persist(&self, key: &TicketKey, ticket: &Ticket) {
        let Some(store) = &self.store else { return };
        if let Err(err) = store.save(key, ticket).await {
            tracing::warn!(%key, error = %err, "Failed to persist ticket");
        }
    }
}
