//! End-to-end acquisition against a stub authority.
//!
//! Requests are signed with a real [`CmsSigner`] and sent through
//! [`LoginCmsClient`] to an `httpmock` server that answers like WSAA.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use arca_wsaa::{
    CmsSigner, Endpoints, Environment, FileTicketStore, Identity, LoginCmsClient, TicketError,
    TicketKey, TicketManager,
    testutil::{login_cms_response, soap_fault, test_credentials, ticket_response_xml},
};
use chrono::{Duration as ChronoDuration, Utc};
use httpmock::{Method::POST, MockServer};

const TESTING_PATH: &str = "/homo/ws/services/LoginCms";
const PRODUCTION_PATH: &str = "/prod/ws/services/LoginCms";

fn identity() -> Identity {
    Identity::new(20_123_456_789).unwrap()
}

fn signer() -> Arc<CmsSigner> {
    let credentials = test_credentials();
    Arc::new(
        CmsSigner::from_pem(&credentials.private_key_pem, credentials.certificate_pem.as_bytes())
            .expect("signer from test credentials"),
    )
}

fn manager_for(server: &MockServer, store: Option<Arc<FileTicketStore>>) -> TicketManager {
    let client = LoginCmsClient::builder()
        .endpoints(Endpoints {
            testing: server.url(TESTING_PATH),
            production: server.url(PRODUCTION_PATH),
        })
        .timeout(Duration::from_secs(2))
        .build()
        .expect("client");
    let builder = TicketManager::builder().signer(signer()).authenticator(Arc::new(client));
    let manager = match store {
        Some(store) => builder.store(store).build(),
        None => builder.build(),
    };
    manager.expect("manager")
}

fn issued_ticket_body(token: &str) -> String {
    let issued = Utc::now() - ChronoDuration::seconds(5);
    login_cms_response(&ticket_response_xml(token, "sign", issued, issued + ChronoDuration::hours(12)))
}

#[tokio::test]
async fn acquire_signs_posts_and_caches() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(TESTING_PATH)
                .header("content-type", "text/xml; charset=utf-8")
                .body_contains("<wsaa:loginCms><wsaa:in0>MII");
            then.status(200).header("content-type", "text/xml").body(issued_ticket_body("homo-token"));
        })
        .await;
    let manager = manager_for(&server, None);

    let first = manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    let second = manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();

    assert_eq!(first.token, "homo-token");
    assert_eq!(first.identity, identity());
    assert_eq!(second, first);
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn production_requests_use_production_endpoint() {
    let server = MockServer::start_async().await;
    let production = server
        .mock_async(|when, then| {
            when.method(POST).path(PRODUCTION_PATH);
            then.status(200).body(issued_ticket_body("prod-token"));
        })
        .await;
    let testing = server
        .mock_async(|when, then| {
            when.method(POST).path(TESTING_PATH);
            then.status(200).body(issued_ticket_body("homo-token"));
        })
        .await;
    let manager = manager_for(&server, None);

    let ticket = manager.acquire(Environment::Production, "wsfe", identity()).await.unwrap();

    assert_eq!(ticket.token, "prod-token");
    production.assert_async().await;
    assert_eq!(testing.hits_async().await, 0);
}

#[tokio::test]
async fn already_authenticated_fault_is_not_cached() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path(TESTING_PATH);
            then.status(500).header("content-type", "text/xml").body(soap_fault(
                "ns1:coe.alreadyAuthenticated",
                "El CEE ya posee un TA valido para el acceso al WSN solicitado",
            ));
        })
        .await;
    let manager = manager_for(&server, None);

    let err = manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap_err();

    assert!(err.is_already_authenticated(), "unexpected error: {err}");
    assert!(matches!(err, TicketError::AuthorityRejected { ref code, .. } if code == "coe.alreadyAuthenticated"));
    let key = TicketKey::new(Environment::Testing, "wsfe", identity()).unwrap();
    assert!(manager.cache().peek(&key).is_none());
    assert_eq!(manager.metrics().snapshot().error_rejected, 1);

    // A second call goes back to the authority.
    assert!(manager.acquire(Environment::Testing, "wsfe", identity()).await.is_err());
    assert_eq!(mock.hits_async().await, 2);
}

#[tokio::test]
async fn persisted_ticket_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path(TESTING_PATH);
            then.status(200).body(issued_ticket_body("persisted-token"));
        })
        .await;

    let before = manager_for(&server, Some(Arc::new(FileTicketStore::new(dir.path()))))
        .acquire(Environment::Testing, "wsfe", identity())
        .await
        .unwrap();

    let restarted = manager_for(&server, Some(Arc::new(FileTicketStore::new(dir.path()))));
    let after = restarted.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();

    assert_eq!(after, before);
    assert_eq!(mock.hits_async().await, 1);
    assert_eq!(restarted.metrics().snapshot().store_hits, 1);
}
