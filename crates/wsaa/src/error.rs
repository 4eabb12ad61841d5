//! Ticket acquisition error types.
//!
//! This module defines the errors that can occur while loading key material,
//! signing a ticket request, talking to the authentication authority, or
//! persisting issued tickets.
//!
//! # Retry Classification
//!
//! The subsystem never retries on its own. Callers decide whether to call
//! [`acquire`](crate::TicketManager::acquire) again, guided by
//! [`TicketError::is_transient`]:
//!
//! - [`TicketError::Transport`] and [`TicketError::Parse`] are transient; a fresh attempt with a
//!   freshly timed request may succeed.
//! - [`TicketError::AuthorityRejected`] is not retried with the same payload, but because every
//!   attempt builds a new request a later call may still succeed.
//! - [`TicketError::Key`] and [`TicketError::Signature`] will not go away without operator
//!   intervention.

use std::sync::Arc;

use thiserror::Error;

/// A shared error type for source chain tracking.
///
/// Sources are reference counted so that a single failed attempt can be
/// delivered to every caller waiting on it.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Fault code the authority returns when it already issued a ticket for the
/// requested service that has not expired yet.
pub const ALREADY_AUTHENTICATED_FAULT: &str = "coe.alreadyAuthenticated";

/// Errors produced by the ticket subsystem.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`: new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TicketError {
    /// Private key or certificate could not be loaded or parsed.
    #[error("Key material error: {message}")]
    Key {
        /// Description of the key material problem.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Building the CMS signature failed.
    #[error("Signature error: {message}")]
    Signature {
        /// Description of the signing failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The authority could not be reached, or answered without a usable
    /// SOAP document.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The authority answered with a SOAP fault.
    #[error("Authority rejected request: {code}: {message}")]
    AuthorityRejected {
        /// Fault code with any namespace prefix removed.
        code: String,
        /// Fault string as sent by the authority.
        message: String,
    },

    /// The response could not be decoded into a ticket.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the decoding failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller asked for something that can never be issued.
    #[error("Invalid ticket request: {0}")]
    InvalidRequest(String),

    /// Persistent ticket store I/O or decoding failure.
    #[error("Ticket store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// An authentication attempt ended without producing a result.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error categories used for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketErrorKind {
    /// [`TicketError::Key`].
    Key,
    /// [`TicketError::Signature`].
    Signature,
    /// [`TicketError::Transport`].
    Transport,
    /// [`TicketError::AuthorityRejected`].
    AuthorityRejected,
    /// [`TicketError::Parse`].
    Parse,
    /// Configuration, request validation, store and internal errors.
    Other,
}

impl TicketError {
    /// Creates a new `Key` error with the given message.
    #[must_use]
    pub fn key(message: impl Into<String>) -> Self {
        Self::Key { message: message.into(), source: None }
    }

    /// Creates a new `Key` error with a message and source error.
    #[must_use]
    pub fn key_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Key { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Signature` error with the given message.
    #[must_use]
    pub fn signature(message: impl Into<String>) -> Self {
        Self::Signature { message: message.into(), source: None }
    }

    /// Creates a new `Signature` error with a message and source error.
    #[must_use]
    pub fn signature_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Signature { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Transport` error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    /// Creates a new `Transport` error with a message and source error.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `AuthorityRejected` error.
    ///
    /// Any `prefix:` on the fault code is stripped.
    #[must_use]
    pub fn authority_rejected(code: impl AsRef<str>, message: impl Into<String>) -> Self {
        let code = code.as_ref().trim();
        let code = code.rsplit_once(':').map_or(code, |(_, local)| local);
        Self::AuthorityRejected { code: code.to_owned(), message: message.into() }
    }

    /// Creates a new `Parse` error with the given message.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into(), source: None }
    }

    /// Creates a new `Parse` error with a message and source error.
    #[must_use]
    pub fn parse_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Parse { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Store` error with a message and source error.
    #[must_use]
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` if a new attempt with a freshly built request may
    /// succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Parse { .. })
    }

    /// Returns `true` if the authority refused because a ticket for the same
    /// service is still active on its side.
    ///
    /// This typically happens after a restart without a persistent ticket
    /// store: the previous ticket is lost locally but still valid remotely.
    #[must_use]
    pub fn is_already_authenticated(&self) -> bool {
        matches!(self, Self::AuthorityRejected { code, .. } if code == ALREADY_AUTHENTICATED_FAULT)
    }

    /// Returns the metrics category of this error.
    #[must_use]
    pub fn kind(&self) -> TicketErrorKind {
        match self {
            Self::Key { .. } => TicketErrorKind::Key,
            Self::Signature { .. } => TicketErrorKind::Signature,
            Self::Transport { .. } => TicketErrorKind::Transport,
            Self::AuthorityRejected { .. } => TicketErrorKind::AuthorityRejected,
            Self::Parse { .. } => TicketErrorKind::Parse,
            Self::Config(_) | Self::InvalidRequest(_) | Self::Store { .. } | Self::Internal(_) => {
                TicketErrorKind::Other
            },
        }
    }
}

/// Result type alias for ticket operations.
pub type Result<T> = std::result::Result<T, TicketError>;
