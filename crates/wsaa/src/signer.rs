//! CMS (`PKCS#7`) signing of ticket requests.
//!
//! The authority only accepts a ticket request wrapped in a CMS
//! `SignedData` structure produced with the key registered for the
//! requesting identity. [`CmsSigner`] owns that key and its certificate,
//! loaded once at startup and never mutated afterwards.
//!
//! # Structure
//!
//! - `SignedData` version 1
//! - digest algorithm SHA-256
//! - signature algorithm `sha256WithRSAEncryption` (RSASSA-PKCS1-v1_5)
//! - signer identified by issuer and serial number
//! - signed attributes: content type and message digest
//! - signer certificate embedded

use std::{fmt, path::Path};

use chrono::{DateTime, Utc};
use cms::{
    builder::{SignedDataBuilder, SignerInfoBuilder},
    cert::{CertificateChoices, IssuerAndSerialNumber},
    signed_data::{EncapsulatedContentInfo, SignerIdentifier},
};
use const_oid::db::{rfc5911::ID_DATA, rfc5912::ID_SHA_256};
use der::{Any, Encode, Tag};
use rsa::{
    RsaPrivateKey,
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::{Signature, SigningKey},
    pkcs8::DecodePrivateKey,
};
use sha2::{Digest, Sha256};
use x509_cert::{
    Certificate,
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
};
use zeroize::Zeroizing;

use crate::error::{Result, TicketError};

/// Produces a signature envelope over an arbitrary payload.
///
/// Implementations must be safe for concurrent use.
pub trait PayloadSigner: Send + Sync + 'static {
    /// Signs `payload`, returning the DER-encoded envelope.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Signature`] if signing fails.
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Whether the signed payload travels inside the `SignedData`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentMode {
    /// Payload embedded as `eContent`. Required by the authority.
    #[default]
    Embedded,
    /// No `eContent`; the verifier must supply the payload.
    Detached,
}

/// RSA/SHA-256 CMS signer.
pub struct CmsSigner {
    signing_key: SigningKey<Sha256>,
    certificate: Certificate,
    mode: ContentMode,
}

impl fmt::Debug for CmsSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmsSigner")
            .field("subject", &self.certificate.tbs_certificate.subject.to_string())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl CmsSigner {
    /// Loads the private key and certificate from PEM files.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Key`] if either file cannot be read or parsed,
    /// or if the certificate does not belong to the private key.
    pub fn from_pem_files(key_path: impl AsRef<Path>, cert_path: impl AsRef<Path>) -> Result<Self> {
        let key_path = key_path.as_ref();
        let cert_path = cert_path.as_ref();
        let key_pem = std::fs::read_to_string(key_path).map(Zeroizing::new).map_err(|e| {
            TicketError::key_with_source(
                format!("failed to read private key {}", key_path.display()),
                e,
            )
        })?;
        let cert_pem = std::fs::read(cert_path).map_err(|e| {
            TicketError::key_with_source(
                format!("failed to read certificate {}", cert_path.display()),
                e,
            )
        })?;
        Self::from_pem(&key_pem, &cert_pem)
    }

    /// Parses a PEM private key (PKCS#8 or PKCS#1) and a PEM certificate
    /// chain whose first certificate is the signer's.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Key`] if either input cannot be parsed, or if
    /// the certificate does not belong to the private key.
    pub fn from_pem(key_pem: &str, cert_pem: &[u8]) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(key_pem))
            .map_err(|e| TicketError::key_with_source("failed to parse RSA private key", e))?;

        if cert_pem.trim_ascii().is_empty() {
            return Err(TicketError::key("no CERTIFICATE block found"));
        }
        let certificate = Certificate::load_pem_chain(cert_pem)
            .map_err(|e| TicketError::key_with_source("failed to parse certificate", e))?
            .into_iter()
            .next()
            .ok_or_else(|| TicketError::key("no CERTIFICATE block found"))?;

        let public_key = SubjectPublicKeyInfoOwned::from_key(private_key.to_public_key())
            .map_err(|e| TicketError::key(format!("failed to encode public key: {e}")))?;
        let cert_key = &certificate.tbs_certificate.subject_public_key_info;
        if cert_key.subject_public_key.raw_bytes() != public_key.subject_public_key.raw_bytes() {
            return Err(TicketError::key("certificate does not match private key"));
        }

        let not_after: DateTime<Utc> =
            certificate.tbs_certificate.validity.not_after.to_system_time().into();
        if not_after <= Utc::now() {
            tracing::warn!(
                subject = %certificate.tbs_certificate.subject,
                %not_after,
                "Signer certificate has expired; the authority will reject requests"
            );
        }

        Ok(Self {
            signing_key: SigningKey::<Sha256>::new(private_key),
            certificate,
            mode: ContentMode::default(),
        })
    }

    /// Sets the content mode.
    #[must_use]
    pub fn with_content_mode(mut self, mode: ContentMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the signer certificate.
    #[must_use]
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    fn signer_identifier(&self) -> SignerIdentifier {
        let tbs = &self.certificate.tbs_certificate;
        SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: tbs.issuer.clone(),
            serial_number: tbs.serial_number.clone(),
        })
    }
}

impl PayloadSigner for CmsSigner {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let digest_algorithm = AlgorithmIdentifierOwned { oid: ID_SHA_256, parameters: None };

        let (econtent, external_digest) = match self.mode {
            ContentMode::Embedded => {
                let content = Any::new(Tag::OctetString, payload.to_vec()).map_err(|e| {
                    TicketError::signature(format!("failed to encode content: {e}"))
                })?;
                (Some(content), None)
            },
            ContentMode::Detached => (None, Some(Sha256::digest(payload).to_vec())),
        };
        let content_info = EncapsulatedContentInfo { econtent_type: ID_DATA, econtent };

        let signer_info = SignerInfoBuilder::new(
            &self.signing_key,
            self.signer_identifier(),
            digest_algorithm.clone(),
            &content_info,
            external_digest.as_deref(),
        )
        .map_err(|e| TicketError::signature(format!("failed to prepare signer info: {e}")))?;

        let mut builder = SignedDataBuilder::new(&content_info);
        builder
            .add_digest_algorithm(digest_algorithm)
            .and_then(|b| b.add_certificate(CertificateChoices::Certificate(self.certificate.clone())))
            .and_then(|b| b.add_signer_info::<SigningKey<Sha256>, Signature>(signer_info))
            .map_err(|e| TicketError::signature(format!("failed to sign request: {e}")))?;

        builder
            .build()
            .map_err(|e| TicketError::signature(format!("failed to build SignedData: {e}")))?
            .to_der()
            .map_err(|e| TicketError::signature_with_source("failed to encode SignedData", e))
    }
}
