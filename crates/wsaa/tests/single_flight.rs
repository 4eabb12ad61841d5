//! Concurrency and expiry properties of [`TicketManager`].
//!
//! Every test drives the manager with a [`ManualClock`] and a
//! [`ScriptedAuthenticator`], so authority round-trips can be counted and
//! held open while concurrent callers pile up.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use arca_wsaa::{
    Environment, Identity, ManualClock, Ticket, TicketError, TicketManager,
    testutil::{ScriptedAuthenticator, StaticSigner},
};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};

const CALLERS: usize = 32;

struct Harness {
    clock: ManualClock,
    authenticator: Arc<ScriptedAuthenticator>,
    manager: TicketManager,
}

fn harness(lifetime: ChronoDuration, renewal_margin: Duration) -> Harness {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
    let authenticator = Arc::new(ScriptedAuthenticator::new(Arc::new(clock.clone()), lifetime));
    let manager = TicketManager::builder()
        .signer(Arc::new(StaticSigner))
        .authenticator(authenticator.clone())
        .clock(Arc::new(clock.clone()))
        .renewal_margin(renewal_margin)
        .build()
        .expect("manager");
    Harness { clock, authenticator, manager }
}

fn default_harness() -> Harness {
    harness(ChronoDuration::hours(12), Duration::from_secs(120))
}

fn identity() -> Identity {
    Identity::new(20_123_456_789).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

fn spawn_callers(
    manager: &TicketManager,
    service: &'static str,
    count: usize,
) -> Vec<tokio::task::JoinHandle<Result<Ticket, TicketError>>> {
    (0..count)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire(Environment::Testing, service, identity()).await })
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_authentication() {
    let h = default_harness();
    h.authenticator.hold();

    let handles = spawn_callers(&h.manager, "wsfe", CALLERS);
    wait_until(|| h.manager.metrics().snapshot().joined_waiters == (CALLERS - 1) as u64).await;
    assert_eq!(h.authenticator.calls(), 1);
    h.authenticator.release();

    let mut tickets = Vec::new();
    for handle in handles {
        tickets.push(handle.await.unwrap().expect("every caller gets the ticket"));
    }

    assert_eq!(h.authenticator.calls(), 1);
    assert!(tickets.iter().all(|t| *t == tickets[0]));
    assert_eq!(h.manager.in_flight_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_failure() {
    let h = default_harness();
    h.authenticator.fail_next(TicketError::transport("connection reset by peer"));
    h.authenticator.hold();

    let handles = spawn_callers(&h.manager, "wsfe", CALLERS);
    wait_until(|| h.manager.metrics().snapshot().joined_waiters == (CALLERS - 1) as u64).await;
    h.authenticator.release();

    for handle in handles {
        let err = handle.await.unwrap().expect_err("every caller gets the error");
        assert!(matches!(err, TicketError::Transport { ref message, .. } if message == "connection reset by peer"));
    }

    assert_eq!(h.authenticator.calls(), 1);
    assert!(h.manager.cache().peek(&arca_wsaa::TicketKey::new(Environment::Testing, "wsfe", identity()).unwrap()).is_none());
    assert_eq!(h.manager.metrics().snapshot().error_transport, 1);
}

#[tokio::test]
async fn services_do_not_share_tickets() {
    let h = default_harness();

    let fe = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    let coem = h.manager.acquire(Environment::Testing, "wscoem", identity()).await.unwrap();

    assert_eq!(h.authenticator.calls(), 2);
    assert_ne!(fe.token, coem.token);
    assert!(fe.token.ends_with("-wsfe"));
    assert!(coem.token.ends_with("-wscoem"));
}

#[tokio::test]
async fn environments_do_not_share_tickets() {
    let h = default_harness();

    let testing = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    let production = h.manager.acquire(Environment::Production, "wsfe", identity()).await.unwrap();

    assert_eq!(h.authenticator.calls(), 2);
    assert_ne!(testing, production);
    let environments: Vec<_> = h.authenticator.keys().iter().map(|k| k.environment()).collect();
    assert_eq!(environments, vec![Environment::Testing, Environment::Production]);
}

#[tokio::test]
async fn identities_do_not_share_tickets() {
    let h = default_harness();
    let other = Identity::new(30_712_345_678).unwrap();

    let mine = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    let theirs = h.manager.acquire(Environment::Testing, "wsfe", other).await.unwrap();

    assert_eq!(h.authenticator.calls(), 2);
    assert_eq!(mine.identity, identity());
    assert_eq!(theirs.identity, other);
}

#[tokio::test]
async fn reacquisition_is_idempotent_while_valid() {
    let h = default_harness();

    let first = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    for _ in 0..10 {
        h.clock.advance(ChronoDuration::minutes(30));
        let again = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
        assert_eq!(again, first);
    }

    assert_eq!(h.authenticator.calls(), 1);
    let snapshot = h.manager.metrics().snapshot();
    assert_eq!(snapshot.cache_hits, 10);
    assert_eq!(snapshot.cache_misses, 1);
}

#[tokio::test]
async fn expired_ticket_is_never_returned() {
    let h = default_harness();

    let first = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    h.clock.set(first.expires_at + ChronoDuration::seconds(1));
    let renewed = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();

    assert_eq!(h.authenticator.calls(), 2);
    assert_ne!(renewed.token, first.token);
    assert!(!renewed.is_expired_at(h.clock_now()));
}

#[tokio::test]
async fn renewal_inside_margin_scenario() {
    // 720 s tickets, 2 min margin: valid at T=100, renewed at T=700.
    let h = harness(ChronoDuration::seconds(720), Duration::from_secs(120));
    let start = h.clock_now();

    let at_zero = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    assert_eq!(at_zero.expires_at, start + ChronoDuration::seconds(720));
    assert_eq!(h.authenticator.calls(), 1);

    h.clock.set(start + ChronoDuration::seconds(100));
    let at_hundred = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    assert_eq!(at_hundred, at_zero);
    assert_eq!(h.authenticator.calls(), 1);

    h.clock.set(start + ChronoDuration::seconds(700));
    let at_seven_hundred = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    assert_eq!(h.authenticator.calls(), 2);
    assert_ne!(at_seven_hundred.token, at_zero.token);
    assert_eq!(at_seven_hundred.expires_at, start + ChronoDuration::seconds(700 + 720));
}

#[tokio::test]
async fn transport_failure_then_retry_succeeds() {
    let h = default_harness();
    h.authenticator.fail_next(TicketError::transport("timed out"));

    let err = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap_err();
    assert!(err.is_transient());

    let ticket = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    assert_eq!(h.authenticator.calls(), 2);
    assert_eq!(ticket.token, "token-2-wsfe");
}

#[tokio::test]
async fn failed_renewal_keeps_previous_entry() {
    let h = harness(ChronoDuration::seconds(720), Duration::from_secs(120));
    let start = h.clock_now();
    let key = arca_wsaa::TicketKey::new(Environment::Testing, "wsfe", identity()).unwrap();

    let original = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();

    // Inside the renewal margin but before expiry.
    h.clock.set(start + ChronoDuration::seconds(650));
    h.authenticator.fail_next(TicketError::transport("connection refused"));
    let err = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap_err();
    assert!(matches!(err, TicketError::Transport { .. }));
    assert_eq!(h.authenticator.calls(), 2);

    assert_eq!(h.manager.cache().peek(&key), Some(original.clone()));
    assert!(h.manager.cache().get(&key).is_none());

    let renewed = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    assert_eq!(h.authenticator.calls(), 3);
    assert_ne!(renewed.token, original.token);
    assert_eq!(renewed.expires_at, start + ChronoDuration::seconds(650 + 720));
    assert_eq!(h.manager.cache().peek(&key), Some(renewed));
}

#[tokio::test]
async fn rejection_is_surfaced_and_not_cached() {
    let h = default_harness();
    h.authenticator.fail_next(TicketError::authority_rejected(
        "ns1:coe.alreadyAuthenticated",
        "El CEE ya posee un TA valido para el acceso al WSN solicitado",
    ));

    let err = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap_err();
    assert!(err.is_already_authenticated());
    assert_eq!(h.manager.metrics().snapshot().error_rejected, 1);

    h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    assert_eq!(h.authenticator.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_waiter_does_not_cancel_attempt() {
    let h = default_harness();
    h.authenticator.hold();

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        h.manager.acquire(Environment::Testing, "wsfe", identity()),
    )
    .await;
    assert!(result.is_err(), "caller should time out while the authority is held");

    h.authenticator.release();
    wait_until(|| h.manager.in_flight_count() == 0).await;

    let ticket = h.manager.acquire(Environment::Testing, "wsfe", identity()).await.unwrap();
    assert_eq!(h.authenticator.calls(), 1);
    assert_eq!(ticket.token, "token-1-wsfe");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_keys_authenticate_in_parallel() {
    let h = default_harness();
    h.authenticator.hold();

    let fe = spawn_callers(&h.manager, "wsfe", 4);
    let coem = spawn_callers(&h.manager, "wscoem", 4);
    wait_until(|| h.authenticator.calls() == 2).await;
    assert_eq!(h.manager.in_flight_count(), 2);
    h.authenticator.release();

    for handle in fe.into_iter().chain(coem) {
        handle.await.unwrap().expect("ticket");
    }
    assert_eq!(h.authenticator.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_authority_still_single_flight() {
    let h = default_harness();
    h.authenticator.set_delay(Duration::from_millis(100));

    let handles = spawn_callers(&h.manager, "wsfe", CALLERS);
    for handle in handles {
        handle.await.unwrap().expect("ticket");
    }

    assert_eq!(h.authenticator.calls(), 1);
}

impl Harness {
    fn clock_now(&self) -> chrono::DateTime<Utc> {
        use arca_wsaa::Clock;
        self.clock.now()
    }
}
