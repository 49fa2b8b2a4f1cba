//! Self-signed certificate authority backed by rcgen.
//!
//! The authority either generates a fresh self-signed root at startup or
//! loads existing PEM material. Signing takes a CSR for proof of key
//! possession; subject and extensions always come from the controller's
//! issuance options. The signed leaf's validity is capped at the root's own
//! remaining lifetime.

use std::time::Duration;

use async_trait::async_trait;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams,
    CertificateSigningRequestParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use x509_parser::prelude::*;

use super::{pem_to_der, CaError, CertOptions, CertificateAuthority, KeyCertBundle};

/// A CA signing directly off a self-signed root.
///
/// `KeyPair` is not `Clone`, so key material is held as PEM and
/// deserialized per signing operation.
#[derive(Clone)]
pub struct SelfSignedAuthority {
    ca_key_pem: String,
    ca_cert_pem: String,
}

impl SelfSignedAuthority {
    /// Generate a new self-signed root for the given trust domain
    pub fn new(trust_domain: &str, ttl: Duration) -> Result<Self, CaError> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(format!("{trust_domain} workload root")),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(trust_domain.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let not_before = ::time::OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + signed_duration(ttl);

        let key_pair = KeyPair::generate()
            .map_err(|e| CaError::KeyGeneration(format!("failed to generate CA key: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CaError::Signing(format!("failed to self-sign CA cert: {e}")))?;

        Ok(Self {
            ca_key_pem: key_pair.serialize_pem(),
            ca_cert_pem: cert.pem(),
        })
    }

    /// Load an existing CA from PEM material, validating both halves parse
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaError> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| CaError::Parse(format!("failed to parse CA key: {e}")))?;
        pem_to_der(cert_pem.as_bytes())?;

        Ok(Self {
            ca_key_pem: key_pem.to_string(),
            ca_cert_pem: cert_pem.to_string(),
        })
    }

    /// CA certificate, PEM
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Expiry of the root certificate
    fn root_not_after(&self) -> Result<::time::OffsetDateTime, CaError> {
        let der = pem_to_der(self.ca_cert_pem.as_bytes())?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| CaError::Parse(format!("failed to parse CA cert: {e}")))?;
        ::time::OffsetDateTime::from_unix_timestamp(cert.validity().not_after.timestamp())
            .map_err(|e| CaError::Parse(format!("CA cert expiry out of range: {e}")))
    }
}

#[async_trait]
impl CertificateAuthority for SelfSignedAuthority {
    async fn sign(&self, csr_pem: &str, options: &CertOptions) -> Result<Vec<u8>, CaError> {
        let mut csr_params = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| CaError::Parse(format!("failed to parse CSR: {e}")))?;

        // The CSR only proves key possession. Subject and extensions are
        // dictated here so a workload cannot request arbitrary identities.
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(options.subject_uri.clone()),
        );
        csr_params.params.distinguished_name = dn;

        csr_params.params.is_ca = IsCa::NoCa;
        csr_params.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        csr_params.params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];

        let mut sans = vec![SanType::URI(
            Ia5String::try_from(options.subject_uri.clone())
                .map_err(|e| CaError::Signing(format!("invalid identity URI: {e}")))?,
        )];
        for dns in &options.dns_names {
            sans.push(SanType::DnsName(Ia5String::try_from(dns.clone()).map_err(
                |e| CaError::Signing(format!("invalid DNS name {dns:?}: {e}")),
            )?));
        }
        csr_params.params.subject_alt_names = sans;

        let not_before = ::time::OffsetDateTime::now_utc();
        let requested = not_before + signed_duration(options.ttl);
        csr_params.params.not_before = not_before;
        csr_params.params.not_after = requested.min(self.root_not_after()?);

        let ca_key = KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| CaError::Parse(format!("failed to parse CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| CaError::Parse(format!("failed to build issuer: {e}")))?;

        let cert = csr_params
            .signed_by(&issuer)
            .map_err(|e| CaError::Signing(format!("failed to sign certificate: {e}")))?;

        Ok(cert.pem().into_bytes())
    }

    fn key_cert_bundle(&self) -> KeyCertBundle {
        KeyCertBundle {
            root_cert: self.ca_cert_pem.clone().into_bytes(),
            cert_chain: Vec::new(),
            ca_cert: self.ca_cert_pem.clone().into_bytes(),
        }
    }
}

fn signed_duration(ttl: Duration) -> ::time::Duration {
    ::time::Duration::seconds(ttl.as_secs().min(i64::MAX as u64) as i64)
}
