//! Authentication client for the `LoginCms` operation.
//!
//! [`Authenticator`] is the seam between the [`TicketManager`](crate::TicketManager)
//! and the network. [`LoginCmsClient`] is the production implementation:
//! one SOAP 1.1 POST per call, no caching, no retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};

use crate::{
    config::{Endpoints, TicketConfig},
    error::{Result, TicketError},
    request::SignedEnvelope,
    soap,
    types::{Ticket, TicketKey},
};

/// Exchanges a signed ticket request for a [`Ticket`].
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Submits `envelope` to the authority of `key`'s environment.
    ///
    /// The returned ticket is issued for `key.identity()`.
    ///
    /// # Errors
    ///
    /// - [`TicketError::Transport`] on connection failures, timeouts, or non-success statuses
    ///   without a SOAP fault
    /// - [`TicketError::AuthorityRejected`] when the authority answers with a SOAP fault
    /// - [`TicketError::Parse`] when the response cannot be decoded
    async fn authenticate(&self, key: &TicketKey, envelope: &SignedEnvelope) -> Result<Ticket>;
}

/// `reqwest`-backed [`Authenticator`].
#[derive(Debug, Clone)]
pub struct LoginCmsClient {
    http: Client,
    endpoints: Endpoints,
}

#[bon::bon]
impl LoginCmsClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Config`] if an endpoint URL is invalid or the
    /// HTTP client cannot be built.
    #[builder]
    pub fn new(
        #[builder(default)] endpoints: Endpoints,
        #[builder(default = crate::config::DEFAULT_TIMEOUT)] timeout: Duration,
        #[builder(default = crate::config::DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        #[builder(default)] accept_invalid_certs: bool,
    ) -> Result<Self> {
        endpoints.validate()?;
        if accept_invalid_certs {
            tracing::warn!("TLS certificate verification is disabled for LoginCms requests");
        }
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TicketError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, endpoints })
    }

    /// Creates a client from the network settings of `config`.
    ///
    /// # Errors
    ///
    /// See [`LoginCmsClient::new`].
    pub fn from_config(config: &TicketConfig) -> Result<Self> {
        Self::builder()
            .endpoints(config.endpoints().clone())
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .accept_invalid_certs(config.accept_invalid_certs())
            .build()
    }

    /// Returns the configured endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

#[async_trait]
impl Authenticator for LoginCmsClient {
    #[tracing::instrument(
        name = "login_cms",
        skip(self, envelope),
        fields(key = %key, endpoint = self.endpoints.url_for(key.environment()))
    )]
    async fn authenticate(&self, key: &TicketKey, envelope: &SignedEnvelope) -> Result<Ticket> {
        let url = self.endpoints.url_for(key.environment());
        let response = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "\"\"")
            .body(soap::login_cms_request(envelope.as_base64()))
            .send()
            .await
            .map_err(|e| TicketError::transport_with_source("LoginCms request failed", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TicketError::transport_with_source("failed to read LoginCms response", e))?;

        let payload = match soap::parse_login_cms_response(&body) {
            Err(err @ TicketError::AuthorityRejected { .. }) => {
                tracing::warn!(error = %err, "LoginCms rejected the ticket request");
                return Err(err);
            },
            _ if !status.is_success() => {
                return Err(TicketError::transport(format!("LoginCms returned HTTP {status}")));
            },
            result => result?,
        };

        soap::parse_ticket_response(&payload, key.identity())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use httpmock::{Method::POST, MockServer};

    use super::*;
    use crate::{
        testutil::{login_cms_response, soap_fault, ticket_response_xml},
        types::{Environment, Identity},
    };

    const PATH: &str = "/ws/services/LoginCms";

    fn key(environment: Environment) -> TicketKey {
        TicketKey::new(environment, "wsfe", Identity::new(20_123_456_789).unwrap()).unwrap()
    }

    fn envelope() -> SignedEnvelope {
        SignedEnvelope::from_der(b"signed-request")
    }

    fn client_for(server: &MockServer) -> LoginCmsClient {
        LoginCmsClient::builder()
            .endpoints(Endpoints::single(server.url(PATH)))
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_authenticate_posts_soap_and_parses_ticket() {
        let server = MockServer::start_async().await;
        let issued = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let body = login_cms_response(&ticket_response_xml(
            "token-abc",
            "sign-xyz",
            issued,
            issued + ChronoDuration::hours(12),
        ));
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(PATH)
                    .header("content-type", "text/xml; charset=utf-8")
                    .header("soapaction", "\"\"")
                    .body_contains(format!("<wsaa:in0>{}</wsaa:in0>", envelope().as_base64()));
                then.status(200).header("content-type", "text/xml").body(body);
            })
            .await;

        let ticket = client_for(&server).authenticate(&key(Environment::Testing), &envelope()).await.unwrap();

        assert_eq!(ticket.token, "token-abc");
        assert_eq!(ticket.sign, "sign-xyz");
        assert_eq!(ticket.identity.get(), 20_123_456_789);
        assert_eq!(ticket.issued_at, issued);
        assert_eq!(ticket.expires_at, issued + ChronoDuration::hours(12));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_endpoint_follows_environment() {
        let server = MockServer::start_async().await;
        let issued = Utc::now();
        let body = login_cms_response(&ticket_response_xml(
            "prod-token",
            "prod-sign",
            issued,
            issued + ChronoDuration::hours(12),
        ));
        let production = server
            .mock_async(|when, then| {
                when.method(POST).path("/production");
                then.status(200).body(body);
            })
            .await;
        let client = LoginCmsClient::builder()
            .endpoints(Endpoints {
                testing: server.url("/testing"),
                production: server.url("/production"),
            })
            .build()
            .unwrap();

        let ticket = client.authenticate(&key(Environment::Production), &envelope()).await.unwrap();

        assert_eq!(ticket.token, "prod-token");
        production.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_soap_fault_on_http_500_is_authority_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(500).body(soap_fault(
                    "ns1:coe.alreadyAuthenticated",
                    "El CEE ya posee un TA valido para el acceso al WSN solicitado",
                ));
            })
            .await;

        let err = client_for(&server).authenticate(&key(Environment::Testing), &envelope()).await.unwrap_err();

        assert!(err.is_already_authenticated());
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_http_error_without_fault_is_transport() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(503).body("service unavailable");
            })
            .await;

        let err = client_for(&server).authenticate(&key(Environment::Testing), &envelope()).await.unwrap_err();

        assert!(matches!(err, TicketError::Transport { ref message, .. } if message.contains("503")));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_success_with_garbage_body_is_parse_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200).body(login_cms_response("<loginTicketResponse>"));
            })
            .await;

        let err = client_for(&server).authenticate(&key(Environment::Testing), &envelope()).await.unwrap_err();

        assert!(matches!(err, TicketError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_transport() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200).delay(Duration::from_secs(3)).body("late");
            })
            .await;

        let err = client_for(&server).authenticate(&key(Environment::Testing), &envelope()).await.unwrap_err();

        assert!(matches!(err, TicketError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport() {
        let client = LoginCmsClient::builder()
            .endpoints(Endpoints::single("http://127.0.0.1:9/ws/services/LoginCms"))
            .connect_timeout(Duration::from_millis(200))
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();

        let err = client.authenticate(&key(Environment::Testing), &envelope()).await.unwrap_err();

        assert!(err.is_transient());
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = LoginCmsClient::builder().endpoints(Endpoints::single("not a url")).build();
        assert!(matches!(result, Err(TicketError::Config(_))));
    }
}
