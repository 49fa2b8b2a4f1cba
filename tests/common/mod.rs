//! Shared test doubles: an action-recording fake cluster API and a fake
//! certificate authority with injectable failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use workload_cert_controller::ca::{CaError, CertOptions, CertificateAuthority, KeyCertBundle};
use workload_cert_controller::cluster::ClusterApi;
use workload_cert_controller::config::ControllerConfig;
use workload_cert_controller::controller::secrets::{build_secret, SecretMaterial};

pub const FAKE_SIGNED_CERT: &[u8] = b"fake signed cert";
pub const FAKE_CERT_CHAIN: &[u8] = b"fake cert chain";
pub const FAKE_ROOT_CERT: &[u8] = b"fake root cert";
pub const FAKE_CA_CERT: &[u8] = b"fake ca cert";

/// Every cluster call the controller makes, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    GetNamespace(String),
    GetServiceAccount(String, String),
    ListServiceAccounts(String),
    CreateSecret(String, String),
    UpdateSecret(String, String),
    DeleteSecret(String, String),
}

/// In-memory cluster recording every call
#[derive(Default)]
pub struct FakeClusterApi {
    actions: Mutex<Vec<Action>>,
    namespaces: Mutex<HashMap<String, Namespace>>,
    service_accounts: Mutex<HashMap<(String, String), ServiceAccount>>,
    secrets: Mutex<HashMap<(String, String), Secret>>,
    create_failures: AtomicUsize,
    update_failures: AtomicUsize,
}

impl FakeClusterApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_namespace(&self, namespace: Namespace) {
        let name = namespace.metadata.name.clone().unwrap_or_default();
        self.namespaces.lock().unwrap().insert(name, namespace);
    }

    pub fn add_service_account(&self, account: ServiceAccount) {
        let key = (
            account.metadata.namespace.clone().unwrap_or_default(),
            account.metadata.name.clone().unwrap_or_default(),
        );
        self.service_accounts.lock().unwrap().insert(key, account);
    }

    /// Make the next `count` create calls fail
    pub fn fail_next_creates(&self, count: usize) {
        self.create_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` update calls fail
    pub fn fail_next_updates(&self, count: usize) {
        self.update_failures.store(count, Ordering::SeqCst);
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    pub fn clear_actions(&self) {
        self.actions.lock().unwrap().clear();
    }

    pub fn stored_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn record(&self, action: Action) {
        self.actions.lock().unwrap().push(action);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.record(Action::GetNamespace(name.to_string()));
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| namespace(name, &[])))
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>> {
        self.record(Action::GetServiceAccount(
            namespace.to_string(),
            name.to_string(),
        ));
        Ok(self
            .service_accounts
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_service_accounts(&self, namespace: &str) -> Result<Vec<ServiceAccount>> {
        self.record(Action::ListServiceAccounts(namespace.to_string()));
        Ok(self
            .service_accounts
            .lock()
            .unwrap()
            .values()
            .filter(|account| account.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.record(Action::CreateSecret(namespace.to_string(), name.clone()));
        if Self::take_failure(&self.create_failures) {
            return Err(anyhow!("injected create failure"));
        }
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), secret.clone());
        Ok(())
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.record(Action::UpdateSecret(namespace.to_string(), name.clone()));
        if Self::take_failure(&self.update_failures) {
            return Err(anyhow!("injected update failure"));
        }
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), secret.clone());
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(Action::DeleteSecret(
            namespace.to_string(),
            name.to_string(),
        ));
        self.secrets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

/// CA returning canned material, with injectable signing failures
pub struct FakeCa {
    bundle: KeyCertBundle,
    sign_failures: AtomicUsize,
    sign_calls: AtomicUsize,
    last_options: Mutex<Option<CertOptions>>,
}

impl FakeCa {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bundle: KeyCertBundle {
                root_cert: FAKE_ROOT_CERT.to_vec(),
                cert_chain: FAKE_CERT_CHAIN.to_vec(),
                ca_cert: FAKE_CA_CERT.to_vec(),
            },
            sign_failures: AtomicUsize::new(0),
            sign_calls: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        })
    }

    pub fn fail_next_signs(&self, count: usize) {
        self.sign_failures.store(count, Ordering::SeqCst);
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<CertOptions> {
        self.last_options.lock().unwrap().clone()
    }
}

#[async_trait]
impl CertificateAuthority for FakeCa {
    async fn sign(&self, _csr_pem: &str, options: &CertOptions) -> Result<Vec<u8>, CaError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options.clone());
        let failed = self
            .sign_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failed {
            return Err(CaError::Signing("injected signing failure".to_string()));
        }
        Ok(FAKE_SIGNED_CERT.to_vec())
    }

    fn key_cert_bundle(&self) -> KeyCertBundle {
        self.bundle.clone()
    }
}

pub fn service_account(name: &str, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        ..ServiceAccount::default()
    }
}

pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
    let labels: std::collections::BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: if labels.is_empty() { None } else { Some(labels) },
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

/// Config matching the standard test parameters: 1h TTL, ratio 0.5,
/// 10m minimum grace, namespaces managed by default
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        default_managed: true,
        cert_ttl: Duration::from_secs(3600),
        grace_period_ratio: 0.5,
        min_grace_period: Duration::from_secs(600),
        ..ControllerConfig::default()
    }
}

/// A workload secret with the given chain and root, named for `account`
pub fn workload_secret(account: &str, namespace: &str, chain: &[u8], root: &[u8]) -> Secret {
    build_secret(
        account,
        namespace,
        &SecretMaterial {
            cert_chain: chain.to_vec(),
            private_key: b"fake private key".to_vec(),
            root_cert: root.to_vec(),
            ca_cert: FAKE_CA_CERT.to_vec(),
        },
    )
}

/// Self-signed certificate PEM whose validity spans
/// `[now + start_secs, now + end_secs]`
pub fn cert_pem(start_secs: i64, end_secs: i64) -> Vec<u8> {
    let now = time::OffsetDateTime::now_utc();
    let mut params = rcgen::CertificateParams::default();
    params.not_before = now + time::Duration::seconds(start_secs);
    params.not_after = now + time::Duration::seconds(end_secs);
    let key = rcgen::KeyPair::generate().unwrap();
    params.self_signed(&key).unwrap().pem().into_bytes()
}
