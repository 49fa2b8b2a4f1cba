//! Secret codec: the mapping between issued key/cert material and the
//! opaque Kubernetes secret payload.
//!
//! Key names and the secret type are external contract (`constants.rs`);
//! consumers mount these secrets and address entries by key. Every incoming
//! secret event must pass [`is_controller_secret`] before any other
//! processing so foreign secrets never reach the handlers.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use thiserror::Error;

use crate::constants::{
    CA_CERT_KEY, CERT_CHAIN_KEY, PRIVATE_KEY_KEY, ROOT_CERT_KEY, SECRET_NAME_PREFIX,
    SECRET_TYPE, SERVICE_ACCOUNT_ANNOTATION,
};

/// Codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretCodecError {
    #[error("secret has no data")]
    NoData,

    #[error("secret data is missing key {0:?}")]
    MissingKey(&'static str),
}

/// Issued material destined for one workload secret
#[derive(Debug, Clone)]
pub struct SecretMaterial {
    /// Leaf certificate followed by intermediates, PEM
    pub cert_chain: Vec<u8>,
    /// Workload private key, PEM
    pub private_key: Vec<u8>,
    /// Root certificate, PEM
    pub root_cert: Vec<u8>,
    /// Signing CA certificate, PEM
    pub ca_cert: Vec<u8>,
}

/// Parsed view of a workload secret's payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPayload<'a> {
    pub cert_chain: &'a [u8],
    pub private_key: &'a [u8],
    pub root_cert: &'a [u8],
}

/// Deterministic secret name for a service account
pub fn secret_name_for(service_account: &str) -> String {
    format!("{SECRET_NAME_PREFIX}.{service_account}")
}

/// Inverse of [`secret_name_for`]; `None` for names outside our prefix
pub fn service_account_for_secret(secret_name: &str) -> Option<&str> {
    secret_name
        .strip_prefix(SECRET_NAME_PREFIX)?
        .strip_prefix('.')
        .filter(|rest| !rest.is_empty())
}

/// Whether a secret carries the controller's type tag
pub fn is_controller_secret(secret: &Secret) -> bool {
    secret.type_.as_deref() == Some(SECRET_TYPE)
}

/// Assemble the workload secret for a service account
pub fn build_secret(
    service_account: &str,
    namespace: &str,
    material: &SecretMaterial,
) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        CERT_CHAIN_KEY.to_string(),
        ByteString(material.cert_chain.clone()),
    );
    data.insert(
        PRIVATE_KEY_KEY.to_string(),
        ByteString(material.private_key.clone()),
    );
    data.insert(
        ROOT_CERT_KEY.to_string(),
        ByteString(material.root_cert.clone()),
    );
    data.insert(CA_CERT_KEY.to_string(), ByteString(material.ca_cert.clone()));

    let mut annotations = BTreeMap::new();
    annotations.insert(
        SERVICE_ACCOUNT_ANNOTATION.to_string(),
        service_account.to_string(),
    );

    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name_for(service_account)),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            ..ObjectMeta::default()
        },
        data: Some(data),
        type_: Some(SECRET_TYPE.to_string()),
        ..Secret::default()
    }
}

/// Extract the consumer-facing payload from a workload secret
pub fn parse_secret(secret: &Secret) -> Result<SecretPayload<'_>, SecretCodecError> {
    let data = secret.data.as_ref().ok_or(SecretCodecError::NoData)?;
    let entry = |key: &'static str| {
        data.get(key)
            .map(|bytes| bytes.0.as_slice())
            .ok_or(SecretCodecError::MissingKey(key))
    };
    Ok(SecretPayload {
        cert_chain: entry(CERT_CHAIN_KEY)?,
        private_key: entry(PRIVATE_KEY_KEY)?,
        root_cert: entry(ROOT_CERT_KEY)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> SecretMaterial {
        SecretMaterial {
            cert_chain: b"fake cert chain".to_vec(),
            private_key: b"fake private key".to_vec(),
            root_cert: b"fake root cert".to_vec(),
            ca_cert: b"fake ca cert".to_vec(),
        }
    }

    #[test]
    fn secret_names_round_trip() {
        assert_eq!(secret_name_for("api"), "workload-cert.api");
        assert_eq!(service_account_for_secret("workload-cert.api"), Some("api"));
        assert_eq!(
            service_account_for_secret("workload-cert.api.v2"),
            Some("api.v2")
        );
    }

    #[test]
    fn foreign_secret_names_do_not_parse() {
        assert_eq!(service_account_for_secret("workload-cert."), None);
        assert_eq!(service_account_for_secret("workload-certx.api"), None);
        assert_eq!(service_account_for_secret("unrelated"), None);
    }

    #[test]
    fn built_secret_carries_contract_keys_and_type() {
        let secret = build_secret("api", "prod", &material());
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("workload-cert.api")
        );
        assert_eq!(secret.metadata.namespace.as_deref(), Some("prod"));
        assert_eq!(secret.type_.as_deref(), Some(SECRET_TYPE));
        assert!(is_controller_secret(&secret));

        let data = secret.data.as_ref().unwrap();
        assert_eq!(data[CERT_CHAIN_KEY].0, b"fake cert chain");
        assert_eq!(data[PRIVATE_KEY_KEY].0, b"fake private key");
        assert_eq!(data[ROOT_CERT_KEY].0, b"fake root cert");
        assert_eq!(data[CA_CERT_KEY].0, b"fake ca cert");
    }

    #[test]
    fn parse_recovers_the_payload() {
        let secret = build_secret("api", "prod", &material());
        let payload = parse_secret(&secret).unwrap();
        assert_eq!(payload.cert_chain, b"fake cert chain");
        assert_eq!(payload.private_key, b"fake private key");
        assert_eq!(payload.root_cert, b"fake root cert");
    }

    #[test]
    fn parse_rejects_incomplete_payloads() {
        let mut secret = build_secret("api", "prod", &material());
        secret
            .data
            .as_mut()
            .unwrap()
            .remove(PRIVATE_KEY_KEY);
        assert_eq!(
            parse_secret(&secret),
            Err(SecretCodecError::MissingKey(PRIVATE_KEY_KEY))
        );

        secret.data = None;
        assert_eq!(parse_secret(&secret), Err(SecretCodecError::NoData));
    }

    #[test]
    fn cluster_native_secret_is_not_ours() {
        let secret = Secret {
            type_: Some("kubernetes.io/service-account-token".to_string()),
            ..Secret::default()
        };
        assert!(!is_controller_secret(&secret));
    }
}
