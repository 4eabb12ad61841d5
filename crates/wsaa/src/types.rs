//! Core value types: identities, environments, cache keys and tickets.

use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TicketError;

/// Tax identifier (CUIT) on whose behalf tickets are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Identity(u64);

impl Identity {
    /// Creates an identity, rejecting zero.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Config`] if `value` is zero.
    pub fn new(value: u64) -> Result<Self, TicketError> {
        if value == 0 {
            return Err(TicketError::Config("identity cannot be zero".into()));
        }
        Ok(Self(value))
    }

    /// Returns the numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Identity {
    type Error = TicketError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for u64 {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl FromStr for Identity {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u64>()
            .map_err(|_| TicketError::Config(format!("identity must be numeric, got {s:?}")))?;
        Self::new(value)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which authentication authority issues the ticket.
///
/// Tickets issued by one environment are never valid in the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Homologation (sandbox) authority.
    #[default]
    Testing,
    /// Production authority.
    Production,
}

impl Environment {
    /// Returns the lowercase name used in logs and file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Testing => "testing",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key: `(environment, service, identity)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TicketKey {
    environment: Environment,
    service: Arc<str>,
    identity: Identity,
}

impl TicketKey {
    /// Creates a key after validating the service name.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidRequest`] if `service` is empty or
    /// contains whitespace.
    pub fn new(
        environment: Environment,
        service: &str,
        identity: Identity,
    ) -> Result<Self, TicketError> {
        if service.is_empty() {
            return Err(TicketError::InvalidRequest("service name cannot be empty".into()));
        }
        if service.chars().any(char::is_whitespace) {
            return Err(TicketError::InvalidRequest(format!(
                "service name cannot contain whitespace: {service:?}"
            )));
        }
        Ok(Self { environment, service: Arc::from(service), identity })
    }

    /// Returns the environment.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Returns the downstream service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the identity.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.environment, self.service, self.identity)
    }
}

/// Access ticket issued by the authority.
///
/// `token`, `sign` and `identity` must be forwarded verbatim to the
/// downstream service. The [`Debug`] output never includes `token` or `sign`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Opaque token.
    pub token: String,
    /// Opaque signature accompanying the token.
    pub sign: String,
    /// Identity the ticket was issued for.
    pub identity: Identity,
    /// Issue time reported by the authority.
    pub issued_at: DateTime<Utc>,
    /// Expiration time reported by the authority.
    pub expires_at: DateTime<Utc>,
}

impl Ticket {
    /// Returns `true` if the ticket may be handed out at `now`.
    ///
    /// A ticket is usable while `now < expires_at - renewal_margin`, so a
    /// downstream call started just before expiry cannot outlive it.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>, renewal_margin: ChronoDuration) -> bool {
        self.expires_at.checked_sub_signed(renewal_margin).is_some_and(|deadline| now < deadline)
    }

    /// Returns `true` if the ticket has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("identity", &self.identity)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
