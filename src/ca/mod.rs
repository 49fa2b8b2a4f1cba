//! # Certificate Authority
//!
//! The signing interface the controller depends on, plus the key/CSR
//! generation used for workload certificates. The CA holds the signing key;
//! the controller only ever sees certificates and the public bundle.
//!
//! The controller treats every signing error as transient and retryable.
//! Configuration problems are surfaced when the authority is constructed,
//! never during signing.

use std::time::Duration;

use async_trait::async_trait;
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};
use thiserror::Error;

pub mod authority;

pub use authority::SelfSignedAuthority;

/// CA errors
#[derive(Debug, Error)]
pub enum CaError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// CSR or certificate material could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Signing failed
    #[error("signing failed: {0}")]
    Signing(String),
}

/// The CA's public material.
///
/// `cert_chain` holds any intermediates between issued leaves and the root;
/// it is empty when the CA signs directly off a self-signed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCertBundle {
    /// Root certificate, PEM
    pub root_cert: Vec<u8>,
    /// Intermediate chain, PEM, possibly empty
    pub cert_chain: Vec<u8>,
    /// Certificate of the signing CA itself, PEM
    pub ca_cert: Vec<u8>,
}

impl KeyCertBundle {
    /// Full chain for a freshly issued leaf: leaf first, then intermediates.
    pub fn chain_for(&self, leaf_cert: &[u8]) -> Vec<u8> {
        let mut chain = Vec::with_capacity(leaf_cert.len() + self.cert_chain.len());
        chain.extend_from_slice(leaf_cert);
        chain.extend_from_slice(&self.cert_chain);
        chain
    }
}

/// Options for one certificate issuance
#[derive(Debug, Clone)]
pub struct CertOptions {
    /// Workload identity URI, e.g. `spiffe://cluster.local/ns/prod/sa/api`
    pub subject_uri: String,
    /// Additional DNS SANs (webhook service names)
    pub dns_names: Vec<String>,
    /// Requested validity
    pub ttl: Duration,
}

impl CertOptions {
    pub fn new(subject_uri: String, ttl: Duration) -> Self {
        Self {
            subject_uri,
            dns_names: Vec::new(),
            ttl,
        }
    }
}

/// Signing interface.
///
/// Implementations own the CA key material and decide the final certificate
/// contents; the CSR proves possession of the workload key, while subject
/// and extensions are taken from `options`.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Sign a CSR into a leaf certificate (PEM)
    async fn sign(&self, csr_pem: &str, options: &CertOptions) -> Result<Vec<u8>, CaError>;

    /// Current public bundle
    fn key_cert_bundle(&self) -> KeyCertBundle;
}

/// A locally generated workload key pair and its CSR.
///
/// The private key never leaves this struct until the codec embeds it in the
/// workload's own secret.
pub struct WorkloadCsr {
    key_pem: String,
    csr_pem: String,
}

impl WorkloadCsr {
    /// Generate a fresh key pair and a CSR carrying the identity URI as CN
    pub fn generate(subject_uri: &str) -> Result<Self, CaError> {
        let key_pair = KeyPair::generate()
            .map_err(|e| CaError::KeyGeneration(format!("failed to generate workload key: {e}")))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(subject_uri.to_string()));
        params.distinguished_name = dn;

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| CaError::Signing(format!("failed to build CSR: {e}")))?;
        let csr_pem = csr
            .pem()
            .map_err(|e| CaError::Signing(format!("failed to serialize CSR: {e}")))?;

        Ok(Self {
            key_pem: key_pair.serialize_pem(),
            csr_pem,
        })
    }

    /// Private key, PEM
    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }

    /// CSR, PEM
    pub fn csr_pem(&self) -> &str {
        &self.csr_pem
    }
}

/// Parse PEM-encoded data and return the DER bytes of the first block
pub(crate) fn pem_to_der(pem_data: &[u8]) -> Result<Vec<u8>, CaError> {
    let blocks = ::pem::parse_many(pem_data)
        .map_err(|e| CaError::Parse(format!("failed to parse PEM: {e}")))?;
    blocks
        .first()
        .map(|block| block.contents().to_vec())
        .ok_or_else(|| CaError::Parse("no PEM block found".to_string()))
}
