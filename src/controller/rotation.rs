//! Rotation evaluator.
//!
//! Given a workload secret and the CA's current root, decide whether the
//! secret can stay or must be reissued. The grace window is
//! `max(ratio * total_ttl, min_grace_period)` before `notAfter`; a secret
//! whose remaining lifetime is inside the window rotates, and exact
//! equality rotates. Unparseable payloads and root-certificate drift also
//! rotate, so corrupted secrets heal themselves on the next pass.
//!
//! The current time is a parameter, never read from the clock here.

use std::fmt;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use x509_parser::prelude::*;

use crate::config::ConfigError;
use crate::controller::secrets::parse_secret;

/// Why a secret must be reissued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateReason {
    /// Payload missing keys or certificate unparseable
    Malformed,
    /// Remaining lifetime is inside the grace window (includes expired)
    InGracePeriod,
    /// Stored root differs from the CA's current root
    RootCertDrift,
}

impl fmt::Display for RotateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotateReason::Malformed => write!(f, "malformed payload"),
            RotateReason::InGracePeriod => write!(f, "inside grace period"),
            RotateReason::RootCertDrift => write!(f, "root certificate drift"),
        }
    }
}

/// Evaluator verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Rotate(RotateReason),
}

/// Rotation decision parameters
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    grace_period_ratio: f64,
    min_grace_period: Duration,
}

impl RotationPolicy {
    /// A ratio outside `[0, 1]` is a configuration error
    pub fn new(grace_period_ratio: f64, min_grace_period: Duration) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&grace_period_ratio) {
            return Err(ConfigError::InvalidGracePeriodRatio(grace_period_ratio));
        }
        Ok(Self {
            grace_period_ratio,
            min_grace_period,
        })
    }

    /// Decide the fate of `secret` as of `now`, against `current_root`
    pub fn evaluate(
        &self,
        secret: &Secret,
        current_root: &[u8],
        now: ::time::OffsetDateTime,
    ) -> Verdict {
        let payload = match parse_secret(secret) {
            Ok(payload) => payload,
            Err(_) => return Verdict::Rotate(RotateReason::Malformed),
        };

        let (not_before, not_after) = match leaf_validity(payload.cert_chain) {
            Some(validity) => validity,
            None => return Verdict::Rotate(RotateReason::Malformed),
        };

        let total = (not_after - not_before) as f64;
        let remaining = (not_after - now.unix_timestamp()) as f64;
        let grace = (self.grace_period_ratio * total).max(self.min_grace_period.as_secs_f64());
        if remaining <= grace {
            return Verdict::Rotate(RotateReason::InGracePeriod);
        }

        if payload.root_cert != current_root {
            return Verdict::Rotate(RotateReason::RootCertDrift);
        }

        Verdict::Keep
    }
}

/// `(notBefore, notAfter)` of the leaf (first) certificate in a PEM chain
fn leaf_validity(chain_pem: &[u8]) -> Option<(i64, i64)> {
    let blocks = ::pem::parse_many(chain_pem).ok()?;
    let leaf = blocks.first()?;
    let (_, cert) = X509Certificate::from_der(leaf.contents()).ok()?;
    Some((
        cert.validity().not_before.timestamp(),
        cert.validity().not_after.timestamp(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::secrets::{build_secret, SecretMaterial};
    use rcgen::{CertificateParams, KeyPair};

    const ROOT: &[u8] = b"current root cert";

    /// Self-signed cert whose validity spans `[now + start, now + end]`
    fn cert_pem(start_secs: i64, end_secs: i64) -> Vec<u8> {
        let now = ::time::OffsetDateTime::now_utc();
        let mut params = CertificateParams::default();
        params.not_before = now + ::time::Duration::seconds(start_secs);
        params.not_after = now + ::time::Duration::seconds(end_secs);
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem().into_bytes()
    }

    fn secret_with(chain: Vec<u8>, root: &[u8]) -> Secret {
        build_secret(
            "api",
            "prod",
            &SecretMaterial {
                cert_chain: chain,
                private_key: b"key".to_vec(),
                root_cert: root.to_vec(),
                ca_cert: root.to_vec(),
            },
        )
    }

    fn policy(ratio: f64, min_grace: Duration) -> RotationPolicy {
        RotationPolicy::new(ratio, min_grace).unwrap()
    }

    #[test]
    fn fresh_cert_is_kept() {
        let secret = secret_with(cert_pem(0, 3600), ROOT);
        let verdict = policy(0.5, Duration::from_secs(600)).evaluate(
            &secret,
            ROOT,
            ::time::OffsetDateTime::now_utc(),
        );
        assert_eq!(verdict, Verdict::Keep);
    }

    #[test]
    fn ratio_of_one_always_rotates() {
        let secret = secret_with(cert_pem(0, 3600), ROOT);
        let verdict = policy(1.0, Duration::from_secs(600)).evaluate(
            &secret,
            ROOT,
            ::time::OffsetDateTime::now_utc(),
        );
        assert_eq!(verdict, Verdict::Rotate(RotateReason::InGracePeriod));
    }

    #[test]
    fn min_grace_floor_dominates_short_ttls() {
        // 10 minute TTL against a 1 hour floor: always inside the window.
        let secret = secret_with(cert_pem(0, 600), ROOT);
        let verdict = policy(0.5, Duration::from_secs(3600)).evaluate(
            &secret,
            ROOT,
            ::time::OffsetDateTime::now_utc(),
        );
        assert_eq!(verdict, Verdict::Rotate(RotateReason::InGracePeriod));
    }

    #[test]
    fn expired_cert_rotates() {
        let secret = secret_with(cert_pem(0, -1), ROOT);
        let verdict = policy(0.5, Duration::from_secs(600)).evaluate(
            &secret,
            ROOT,
            ::time::OffsetDateTime::now_utc(),
        );
        assert_eq!(verdict, Verdict::Rotate(RotateReason::InGracePeriod));
    }

    #[test]
    fn exact_grace_boundary_rotates() {
        // 1 hour TTL, ratio 0.5: the window opens exactly half way through.
        let now = ::time::OffsetDateTime::now_utc();
        let secret = secret_with(cert_pem(-1800, 1800), ROOT);
        let verdict = policy(0.5, Duration::from_secs(0)).evaluate(&secret, ROOT, now);
        assert_eq!(verdict, Verdict::Rotate(RotateReason::InGracePeriod));
    }

    #[test]
    fn just_outside_grace_is_kept() {
        let now = ::time::OffsetDateTime::now_utc();
        let secret = secret_with(cert_pem(-60, 3540), ROOT);
        let verdict = policy(0.5, Duration::from_secs(0)).evaluate(&secret, ROOT, now);
        assert_eq!(verdict, Verdict::Keep);
    }

    #[test]
    fn root_drift_rotates() {
        let secret = secret_with(cert_pem(0, 3600), b"outdated root cert");
        let verdict = policy(0.5, Duration::from_secs(600)).evaluate(
            &secret,
            ROOT,
            ::time::OffsetDateTime::now_utc(),
        );
        assert_eq!(verdict, Verdict::Rotate(RotateReason::RootCertDrift));
    }

    #[test]
    fn unparseable_chain_rotates() {
        let secret = secret_with(b"not a certificate".to_vec(), ROOT);
        let verdict = policy(0.5, Duration::from_secs(600)).evaluate(
            &secret,
            ROOT,
            ::time::OffsetDateTime::now_utc(),
        );
        assert_eq!(verdict, Verdict::Rotate(RotateReason::Malformed));
    }

    #[test]
    fn missing_payload_keys_rotate() {
        let mut secret = secret_with(cert_pem(0, 3600), ROOT);
        secret.data.as_mut().unwrap().clear();
        let verdict = policy(0.5, Duration::from_secs(600)).evaluate(
            &secret,
            ROOT,
            ::time::OffsetDateTime::now_utc(),
        );
        assert_eq!(verdict, Verdict::Rotate(RotateReason::Malformed));
    }

    #[test]
    fn invalid_ratio_is_a_construction_error() {
        assert!(RotationPolicy::new(1.4, Duration::from_secs(600)).is_err());
        assert!(RotationPolicy::new(-0.2, Duration::from_secs(600)).is_err());
    }
}
