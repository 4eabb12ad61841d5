//! Ticket request (`loginTicketRequest`) construction.
//!
//! Every authentication attempt builds a fresh, time-stamped request. The
//! authority rejects requests whose generation time is in the future or
//! whose expiration time has passed, so requests are never reused across
//! attempts.
//!
//! # Wire format
//!
//! ```text
//! <?xml version="1.0" encoding="UTF-8"?><loginTicketRequest version="1.0"><header><uniqueId>N</uniqueId><generationTime>T0</generationTime><expirationTime>T1</expirationTime></header><service>NAME</service></loginTicketRequest>
//! ```
//!
//! Times are RFC 3339 with whole seconds and an explicit `+00:00` offset.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde::Serialize;

use crate::{
    config::MAX_REQUEST_WINDOW,
    error::{Result, TicketError},
};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// A single `loginTicketRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    /// Identifier distinguishing concurrent requests.
    pub unique_id: u32,
    /// Time the request was built.
    pub generation_time: DateTime<Utc>,
    /// Time after which the authority must refuse the request.
    pub expiration_time: DateTime<Utc>,
    /// Downstream service the ticket is requested for.
    pub service: String,
}

#[derive(Serialize)]
struct LoginTicketRequest<'a> {
    #[serde(rename = "@version")]
    version: &'static str,
    header: RequestHeader,
    service: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestHeader {
    unique_id: u32,
    generation_time: String,
    expiration_time: String,
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, false)
}

impl TicketRequest {
    /// Serializes the request into its canonical XML document.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Signature`] if serialization fails, since a
    /// request that cannot be rendered can never be signed.
    pub fn to_xml(&self) -> Result<String> {
        let document = LoginTicketRequest {
            version: "1.0",
            header: RequestHeader {
                unique_id: self.unique_id,
                generation_time: format_time(self.generation_time),
                expiration_time: format_time(self.expiration_time),
            },
            service: &self.service,
        };
        let body = quick_xml::se::to_string_with_root("loginTicketRequest", &document)
            .map_err(|e| TicketError::signature_with_source("failed to serialize ticket request", e))?;
        Ok(format!("{XML_DECLARATION}{body}"))
    }
}

/// Builds [`TicketRequest`]s with a fixed validity window.
///
/// Unique ids come from a counter seeded with the wall-clock second at
/// construction. The counter wraps within the authority's 32-bit range.
#[derive(Debug)]
pub struct RequestBuilder {
    window: ChronoDuration,
    next_id: AtomicU32,
}

impl RequestBuilder {
    /// Creates a builder whose requests expire `window` after generation.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Config`] if `window` is zero or longer than
    /// 24 hours.
    pub fn new(window: Duration) -> Result<Self> {
        // Truncation to 32 bits is intended: only distinctness matters.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let seed = Utc::now().timestamp() as u32;
        Self::with_seed(window, seed)
    }

    /// Creates a builder whose first unique id is `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Config`] if `window` is zero or longer than
    /// 24 hours.
    pub fn with_seed(window: Duration, seed: u32) -> Result<Self> {
        if window.is_zero() {
            return Err(TicketError::Config("request window must be non-zero".into()));
        }
        if window > MAX_REQUEST_WINDOW {
            return Err(TicketError::Config(format!(
                "request window cannot exceed {}s",
                MAX_REQUEST_WINDOW.as_secs()
            )));
        }
        let window = ChronoDuration::from_std(window)
            .map_err(|_| TicketError::Config("request window out of range".into()))?;
        Ok(Self { window, next_id: AtomicU32::new(seed) })
    }

    /// Returns the validity window.
    #[must_use]
    pub fn window(&self) -> ChronoDuration {
        self.window
    }

    /// Builds a request for `service` generated at `now`.
    #[must_use]
    pub fn build(&self, service: &str, now: DateTime<Utc>) -> TicketRequest {
        let generation_time = truncate_to_seconds(now);
        TicketRequest {
            unique_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            generation_time,
            expiration_time: generation_time
                .checked_add_signed(self.window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            service: service.to_owned(),
        }
    }
}

fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or(time)
}

/// CMS `SignedData` over a serialized [`TicketRequest`], base64-encoded for
/// transport.
///
/// Created once per attempt and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope(String);

impl SignedEnvelope {
    /// Wraps DER-encoded CMS bytes.
    #[must_use]
    pub fn from_der(der: &[u8]) -> Self {
        Self(STANDARD.encode(der))
    }

    /// Returns the base64 (standard alphabet) encoding.
    #[must_use]
    pub fn as_base64(&self) -> &str {
        &self.0
    }
}
