//! # ARCA WSAA access tickets
//!
//! Acquisition and caching of the short-lived access tickets ("TA") issued
//! by the ARCA/AFIP authentication service (WSAA). Every call to a
//! downstream business service (`wsfe`, `wscoem`, ...) must carry a ticket
//! scoped to that service and to the caller's tax identifier.
//!
//! This crate provides:
//! - **Ticket manager**: single entry point with per-key single-flight renewal
//! - **CMS signer**: RSA/SHA-256 `SignedData` over the ticket request
//! - **LoginCms client**: SOAP transport to the authority
//! - **Ticket cache**: capacity-bounded, expiry-aware in-memory cache
//! - **Ticket store**: optional persistence across restarts
//!
//! ## Example
//!
//! ```no_run
//! use arca_wsaa::{Environment, Identity, TicketConfig, TicketManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TicketConfig::builder()
//!     .identity(Identity::new(20123456789)?)
//!     .private_key_file("keys/private.key")
//!     .certificate_file("keys/certificate.crt")
//!     .cache_dir("/var/lib/wsaa")
//!     .build()?;
//! let manager = TicketManager::from_config(&config)?;
//!
//! let ticket = manager.acquire(Environment::Testing, "wsfe", config.identity()).await?;
//! assert_eq!(ticket.identity, config.identity());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// In-memory ticket cache.
pub mod cache;
/// `LoginCms` authentication client.
pub mod client;
/// Wall-clock abstraction.
pub mod clock;
/// Configuration.
pub mod config;
/// Error types.
pub mod error;
/// Ticket manager.
pub mod manager;
/// Metrics.
pub mod metrics;
/// Ticket request construction.
pub mod request;
/// CMS signing.
pub mod signer;
/// SOAP framing and response decoding.
pub mod soap;
/// Persistent ticket storage.
pub mod store;
/// Test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Core value types.
pub mod types;

// Re-export key types for convenience
pub use cache::TicketCache;
pub use client::{Authenticator, LoginCmsClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_RENEWAL_MARGIN, DEFAULT_REQUEST_WINDOW, Endpoints,
    PRODUCTION_LOGIN_URL, TESTING_LOGIN_URL, TicketConfig,
};
pub use error::{ALREADY_AUTHENTICATED_FAULT, Result, TicketError, TicketErrorKind};
pub use manager::TicketManager;
pub use metrics::{TicketMetrics, TicketMetricsSnapshot};
pub use request::{RequestBuilder, SignedEnvelope, TicketRequest};
pub use signer::{CmsSigner, ContentMode, PayloadSigner};
pub use store::{FileTicketStore, TicketStore};
pub use types::{Environment, Identity, Ticket, TicketKey};
