//! Shared test utilities for ticket acquisition testing.
//!
//! This module provides generated RSA credentials with a matching
//! self-signed certificate, deterministic signers, a scripted
//! [`Authenticator`], and builders for the SOAP documents the authority
//! returns. It is feature-gated behind `testutil` to prevent leaking into
//! production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! arca-wsaa = { path = ".", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use arca_wsaa::testutil::{ScriptedAuthenticator, StaticSigner, test_credentials};
//! ```

#![allow(clippy::expect_used, clippy::panic)]

use std::{
    collections::VecDeque,
    str::FromStr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use der::{EncodePem, pem::LineEnding};
use parking_lot::Mutex;
use rsa::{
    RsaPrivateKey,
    pkcs1::EncodeRsaPrivateKey,
    pkcs1v15::{Signature, SigningKey},
    pkcs8::EncodePrivateKey,
};
use sha2::Sha256;
use tokio::sync::watch;
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    name::Name,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::Validity,
};

use crate::{
    client::Authenticator,
    clock::Clock,
    error::{Result, TicketError},
    request::SignedEnvelope,
    signer::PayloadSigner,
    types::{Ticket, TicketKey},
};

/// RSA key pair with a matching self-signed certificate.
pub struct TestCredentials {
    /// The private key.
    pub private_key: RsaPrivateKey,
    /// PKCS#8 PEM encoding of `private_key`.
    pub private_key_pem: String,
    /// PKCS#1 PEM encoding of `private_key`.
    pub pkcs1_private_key_pem: String,
    /// PEM certificate for `private_key`.
    pub certificate_pem: String,
}

/// Generates fresh credentials.
///
/// Uses a 1024-bit key to keep test setup fast.
///
/// # Panics
///
/// Panics if key generation or certificate construction fails.
#[must_use]
pub fn generate_credentials() -> TestCredentials {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("generate RSA key");

    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let public_key = SubjectPublicKeyInfoOwned::from_key(private_key.to_public_key())
        .expect("encode public key");
    let subject = Name::from_str("CN=arca-wsaa test,O=Test,C=AR").expect("subject name");
    let validity = Validity::from_now(Duration::from_secs(365 * 24 * 60 * 60)).expect("validity");
    let serial = SerialNumber::new(&[0x01, 0x42]).expect("serial number");

    let builder =
        CertificateBuilder::new(Profile::Root, serial, validity, subject, public_key, &signing_key)
            .expect("certificate builder");
    let certificate = builder.build::<Signature>().expect("sign certificate");

    TestCredentials {
        private_key_pem: private_key.to_pkcs8_pem(LineEnding::LF).expect("PKCS#8 PEM").to_string(),
        pkcs1_private_key_pem: private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("PKCS#1 PEM")
            .to_string(),
        certificate_pem: certificate.to_pem(LineEnding::LF).expect("certificate PEM"),
        private_key,
    }
}

/// Returns process-wide credentials, generated on first use.
#[must_use]
pub fn test_credentials() -> &'static TestCredentials {
    static CREDENTIALS: OnceLock<TestCredentials> = OnceLock::new();
    CREDENTIALS.get_or_init(generate_credentials)
}

/// Signer that returns `signed:` followed by the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSigner;

impl PayloadSigner for StaticSigner {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut signed = b"signed:".to_vec();
        signed.extend_from_slice(payload);
        Ok(signed)
    }
}

/// Signer that always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSigner;

impl PayloadSigner for FailingSigner {
    fn sign(&self, _payload: &[u8]) -> Result<Vec<u8>> {
        Err(TicketError::signature("private key rejected by test signer"))
    }
}

/// Scripted [`Authenticator`].
///
/// Issues a ticket valid for `lifetime` from the clock's current time, with
/// token `token-{call}-{service}` and sign `sign-{call}`. Queued failures
/// are returned first, one per call. While held, calls wait until
/// [`release`](Self::release).
pub struct ScriptedAuthenticator {
    clock: Arc<dyn Clock>,
    lifetime: ChronoDuration,
    calls: AtomicUsize,
    failures: Mutex<VecDeque<TicketError>>,
    keys: Mutex<Vec<TicketKey>>,
    envelopes: Mutex<Vec<SignedEnvelope>>,
    gate: watch::Sender<bool>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedAuthenticator {
    /// Creates an authenticator issuing tickets valid for `lifetime`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, lifetime: ChronoDuration) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            clock,
            lifetime,
            calls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            keys: Mutex::new(Vec::new()),
            envelopes: Mutex::new(Vec::new()),
            gate,
            delay: Mutex::new(None),
        }
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: TicketError) {
        self.failures.lock().push_back(error);
    }

    /// Makes every call sleep for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Blocks calls until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Lets held and future calls proceed.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Returns the number of calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the keys of all calls received, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<TicketKey> {
        self.keys.lock().clone()
    }

    /// Returns the envelopes of all calls received, in order.
    #[must_use]
    pub fn envelopes(&self) -> Vec<SignedEnvelope> {
        self.envelopes.lock().clone()
    }
}

#[async_trait]
impl Authenticator for ScriptedAuthenticator {
    async fn authenticate(&self, key: &TicketKey, envelope: &SignedEnvelope) -> Result<Ticket> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.keys.lock().push(key.clone());
        self.envelopes.lock().push(envelope.clone());

        let mut gate = self.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.is_ok();
        if !opened {
            return Err(TicketError::transport("scripted authenticator dropped"));
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let issued_at = self.clock.now();
        Ok(Ticket {
            token: format!("token-{call}-{}", key.service()),
            sign: format!("sign-{call}"),
            identity: key.identity(),
            issued_at,
            expires_at: issued_at + self.lifetime,
        })
    }
}

/// Renders a `loginTicketResponse` document.
#[must_use]
pub fn ticket_response_xml(
    token: &str,
    sign: &str,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><loginTicketResponse version="1.0"><header><source>CN=wsaahomo, O=AFIP, C=AR, SERIALNUMBER=CUIT 33693450239</source><destination>SERIALNUMBER=CUIT 20123456789, CN=test</destination><uniqueId>1</uniqueId><generationTime>{}</generationTime><expirationTime>{}</expirationTime></header><credentials><token>{token}</token><sign>{sign}</sign></credentials></loginTicketResponse>"#,
        issued_at.to_rfc3339_opts(SecondsFormat::Secs, false),
        expires_at.to_rfc3339_opts(SecondsFormat::Secs, false),
    )
}

/// Wraps `payload` as the escaped `loginCmsReturn` of a SOAP response.
#[must_use]
pub fn login_cms_response(payload: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><soapenv:Body><loginCmsResponse xmlns="http://wsaa.view.sua.dvadac.desein.afip.gov"><loginCmsReturn>{}</loginCmsReturn></loginCmsResponse></soapenv:Body></soapenv:Envelope>"#,
        quick_xml::escape::escape(payload)
    )
}

/// Renders a SOAP fault as the authority sends it.
#[must_use]
pub fn soap_fault(code: &str, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><soapenv:Body><soapenv:Fault><faultcode xmlns:ns1="http://xml.apache.org/axis/">{}</faultcode><faultstring>{}</faultstring><detail><ns2:hostname xmlns:ns2="http://xml.apache.org/axis/">wsaaext0.homo.afip.gov.ar</ns2:hostname></detail></soapenv:Fault></soapenv:Body></soapenv:Envelope>"#,
        quick_xml::escape::escape(code),
        quick_xml::escape::escape(message),
    )
}
