//! Configuration for the ticket subsystem.
//!
//! This module provides [`TicketConfig`], which carries everything
//! [`TicketManager::from_config`](crate::TicketManager::from_config) needs:
//! the identity, key material locations, the environment, and the timing
//! knobs that govern when tickets are renewed.
//!
//! The subsystem does not read configuration sources itself. Callers build a
//! [`TicketConfig`] through its builder or deserialize it from whatever
//! format they already use.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TicketError},
    types::{Environment, Identity},
};

/// Default LoginCms endpoint of the homologation authority.
pub const TESTING_LOGIN_URL: &str = "https://wsaahomo.afip.gov.ar/ws/services/LoginCms";

/// Default LoginCms endpoint of the production authority.
pub const PRODUCTION_LOGIN_URL: &str = "https://wsaa.afip.gov.ar/ws/services/LoginCms";

/// Default renewal margin (5 minutes).
///
/// Tickets are renewed once they are within this window of their expiry.
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Default request validity window (10 minutes).
pub const DEFAULT_REQUEST_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Default request timeout (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum number of cached tickets.
pub const DEFAULT_CACHE_CAPACITY: u64 = 1_024;

/// Longest request window accepted by the authority.
pub(crate) const MAX_REQUEST_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Renewal margins at or above a ticket's lifetime would renew on every call.
pub(crate) const MAX_RENEWAL_MARGIN: Duration = Duration::from_secs(12 * 60 * 60);

/// LoginCms endpoint per environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Endpoints {
    /// Homologation endpoint.
    #[serde(default = "default_testing_url")]
    pub testing: String,
    /// Production endpoint.
    #[serde(default = "default_production_url")]
    pub production: String,
}

fn default_testing_url() -> String {
    TESTING_LOGIN_URL.to_owned()
}

fn default_production_url() -> String {
    PRODUCTION_LOGIN_URL.to_owned()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self { testing: default_testing_url(), production: default_production_url() }
    }
}

impl Endpoints {
    /// Returns the endpoint for `environment`.
    #[must_use]
    pub fn url_for(&self, environment: Environment) -> &str {
        match environment {
            Environment::Testing => &self.testing,
            Environment::Production => &self.production,
        }
    }

    /// Points both environments at the same base URL.
    ///
    /// Useful for local authority stubs.
    #[must_use]
    pub fn single(url: impl Into<String>) -> Self {
        let url = url.into();
        Self { testing: url.clone(), production: url }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (name, url) in [("testing", &self.testing), ("production", &self.production)] {
            reqwest::Url::parse(url).map_err(|e| {
                TicketError::Config(format!("invalid {name} endpoint '{url}': {e}"))
            })?;
        }
        Ok(())
    }
}

/// Configuration for [`TicketManager`](crate::TicketManager).
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use arca_wsaa::{Environment, Identity, TicketConfig};
///
/// let config = TicketConfig::builder()
///     .identity(Identity::new(20123456789)?)
///     .private_key_file("keys/private.key")
///     .certificate_file("keys/certificate.crt")
///     .environment(Environment::Production)
///     .renewal_margin(Duration::from_secs(120))
///     .build()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TicketConfig {
    /// Tax identifier tickets are requested for.
    pub(crate) identity: Identity,

    /// PEM file with the RSA private key (PKCS#8 or PKCS#1).
    pub(crate) private_key_file: PathBuf,

    /// PEM file with the certificate issued for the key.
    pub(crate) certificate_file: PathBuf,

    /// Which authority to talk to.
    #[serde(default)]
    pub(crate) environment: Environment,

    /// Safety window subtracted from a ticket's expiry.
    #[serde(with = "humantime_serde", default = "default_renewal_margin")]
    pub(crate) renewal_margin: Duration,

    /// Validity window of each signed request.
    #[serde(with = "humantime_serde", default = "default_request_window")]
    pub(crate) request_window: Duration,

    /// Request timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub(crate) timeout: Duration,

    /// Connection timeout.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub(crate) connect_timeout: Duration,

    /// LoginCms endpoints.
    #[serde(default)]
    pub(crate) endpoints: Endpoints,

    /// Directory for persisted tickets. Disabled when `None`.
    #[serde(default)]
    pub(crate) cache_dir: Option<PathBuf>,

    /// Maximum number of cached tickets.
    #[serde(default = "default_cache_capacity")]
    pub(crate) cache_capacity: u64,

    /// Skip TLS certificate verification towards the authority.
    #[serde(default)]
    pub(crate) accept_invalid_certs: bool,
}

fn default_renewal_margin() -> Duration {
    DEFAULT_RENEWAL_MARGIN
}

fn default_request_window() -> Duration {
    DEFAULT_REQUEST_WINDOW
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_cache_capacity() -> u64 {
    DEFAULT_CACHE_CAPACITY
}

#[bon::bon]
impl TicketConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Arguments
    ///
    /// * `identity` - Tax identifier tickets are requested for.
    /// * `private_key_file` - PEM private key path.
    /// * `certificate_file` - PEM certificate path.
    ///
    /// # Optional Fields
    ///
    /// * `environment` - Authority to use (default: testing).
    /// * `renewal_margin` - Renewal safety window (default: 5 minutes).
    /// * `request_window` - Signed request validity (default: 10 minutes).
    /// * `timeout` - Request timeout (default: 30 seconds).
    /// * `connect_timeout` - Connection timeout (default: 10 seconds).
    /// * `endpoints` - LoginCms URLs (default: the public authorities).
    /// * `cache_dir` - Directory for persisted tickets (default: none).
    /// * `cache_capacity` - Maximum cached tickets (default: 1024).
    /// * `accept_invalid_certs` - Skip TLS verification (default: false).
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Config`] if:
    /// - `request_window` is zero or longer than 24 hours
    /// - `renewal_margin` is 12 hours or longer
    /// - either timeout is zero
    /// - `cache_capacity` is zero
    /// - an endpoint is not a valid URL
    #[builder]
    pub fn new(
        identity: Identity,
        #[builder(into)] private_key_file: PathBuf,
        #[builder(into)] certificate_file: PathBuf,
        #[builder(default)] environment: Environment,
        #[builder(default = DEFAULT_RENEWAL_MARGIN)] renewal_margin: Duration,
        #[builder(default = DEFAULT_REQUEST_WINDOW)] request_window: Duration,
        #[builder(default = DEFAULT_TIMEOUT)] timeout: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        #[builder(default)] endpoints: Endpoints,
        #[builder(into)] cache_dir: Option<PathBuf>,
        #[builder(default = DEFAULT_CACHE_CAPACITY)] cache_capacity: u64,
        #[builder(default)] accept_invalid_certs: bool,
    ) -> Result<Self> {
        let config = Self {
            identity,
            private_key_file,
            certificate_file,
            environment,
            renewal_margin,
            request_window,
            timeout,
            connect_timeout,
            endpoints,
            cache_dir,
            cache_capacity,
            accept_invalid_certs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// Deserialized configurations skip the builder, so callers loading a
    /// config from a file should call this before use.
    /// [`TicketManager::from_config`](crate::TicketManager::from_config)
    /// always does.
    ///
    /// # Errors
    ///
    /// See [`TicketConfig::builder`].
    pub fn validate(&self) -> Result<()> {
        if self.request_window.is_zero() {
            return Err(TicketError::Config("request_window cannot be zero".into()));
        }
        if self.request_window > MAX_REQUEST_WINDOW {
            return Err(TicketError::Config(format!(
                "request_window cannot exceed {}s",
                MAX_REQUEST_WINDOW.as_secs()
            )));
        }
        if self.renewal_margin >= MAX_RENEWAL_MARGIN {
            return Err(TicketError::Config(format!(
                "renewal_margin must be below {}s",
                MAX_RENEWAL_MARGIN.as_secs()
            )));
        }
        if self.timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(TicketError::Config("timeouts cannot be zero".into()));
        }
        if self.cache_capacity == 0 {
            return Err(TicketError::Config("cache_capacity cannot be zero".into()));
        }
        self.endpoints.validate()
    }

    /// Returns the identity.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Returns the private key path.
    #[must_use]
    pub fn private_key_file(&self) -> &std::path::Path {
        &self.private_key_file
    }

    /// Returns the certificate path.
    #[must_use]
    pub fn certificate_file(&self) -> &std::path::Path {
        &self.certificate_file
    }

    /// Returns the environment.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Returns the renewal margin.
    #[must_use]
    pub fn renewal_margin(&self) -> Duration {
        self.renewal_margin
    }

    /// Returns the request validity window.
    #[must_use]
    pub fn request_window(&self) -> Duration {
        self.request_window
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the LoginCms endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Returns the persisted ticket directory, if enabled.
    #[must_use]
    pub fn cache_dir(&self) -> Option<&std::path::Path> {
        self.cache_dir.as_deref()
    }

    /// Returns the ticket cache capacity.
    #[must_use]
    pub fn cache_capacity(&self) -> u64 {
        self.cache_capacity
    }

    /// Returns whether TLS verification is disabled.
    #[must_use]
    pub fn accept_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }
}
