//! # Reconciler
//!
//! Event handlers that keep the cluster's workload secrets converged with
//! its service accounts:
//!
//! - a service account appearing in a managed namespace gets a key/cert
//!   secret signed by the CA;
//! - a service account disappearing takes its secret with it;
//! - a secret deleted out from under a live service account is recreated;
//! - a secret whose certificate is stale, corrupt, or signed under an old
//!   root is reissued in place;
//! - a namespace becoming managed back-fills secrets for every service
//!   account already in it.
//!
//! All handlers run on a single worker (see `watch.rs`), so the local
//! caches need no locking and events for one key are processed in arrival
//! order. Cluster writes retry a bounded number of times within one handler
//! invocation; after that the failure is logged and the next event or scan
//! pass picks the work back up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use tracing::{debug, error, info, warn};

use crate::ca::{CertOptions, CertificateAuthority, WorkloadCsr};
use crate::cluster::ClusterApi;
use crate::config::{ConfigError, ControllerConfig};
use crate::constants::SECRET_WRITE_RETRIES;
use crate::controller::policy::namespace_is_managed;
use crate::controller::rotation::{RotateReason, RotationPolicy, Verdict};
use crate::controller::secrets::{
    build_secret, is_controller_secret, secret_name_for, service_account_for_secret,
    SecretMaterial,
};
use crate::observability::metrics;

enum WriteOp {
    Create,
    Update,
}

/// The controller state machine over one cluster.
///
/// Owned and driven by a single worker; handler methods take `&mut self`.
pub struct SecretController {
    config: ControllerConfig,
    ca: Arc<dyn CertificateAuthority>,
    cluster: Arc<dyn ClusterApi>,
    rotation: RotationPolicy,
    /// `(namespace, secret name)` -> last observed secret
    secrets: HashMap<(String, String), Secret>,
    /// last observed managed-ness per namespace, for transition detection
    namespace_managed: HashMap<String, bool>,
    shutting_down: Arc<AtomicBool>,
}

impl SecretController {
    /// Fails on invalid configuration; nothing touches the cluster before
    /// this returns.
    pub fn new(
        config: ControllerConfig,
        ca: Arc<dyn CertificateAuthority>,
        cluster: Arc<dyn ClusterApi>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let rotation = RotationPolicy::new(config.grace_period_ratio, config.min_grace_period)?;
        Ok(Self {
            config,
            ca,
            cluster,
            rotation,
            secrets: HashMap::new(),
            namespace_managed: HashMap::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Flag observed between retry attempts; set it to stop in-flight work
    /// after at most one more cluster round-trip.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutting_down.clone()
    }

    fn is_managed(&self, namespace: &Namespace) -> bool {
        namespace_is_managed(
            namespace,
            self.config.default_managed,
            &self.config.ca_storage_namespace,
        )
    }

    /// A service account appeared (or was listed at startup)
    pub async fn service_account_added(&mut self, account: &ServiceAccount) {
        let (Some(name), Some(namespace)) = (
            account.metadata.name.as_deref(),
            account.metadata.namespace.as_deref(),
        ) else {
            return;
        };

        let ns = match self.cluster.get_namespace(namespace).await {
            Ok(ns) => ns,
            Err(e) => {
                warn!(
                    service_account = name,
                    namespace, error = %e,
                    "failed to resolve namespace, skipping issuance"
                );
                return;
            }
        };
        if !self.is_managed(&ns) {
            metrics::increment_unmanaged_namespace_skips();
            debug!(service_account = name, namespace, "namespace not managed, skipping");
            return;
        }

        self.issue_secret(name, namespace).await;
    }

    /// A service account was removed; its secret goes with it
    pub async fn service_account_deleted(&mut self, account: &ServiceAccount) {
        let (Some(name), Some(namespace)) = (
            account.metadata.name.as_deref(),
            account.metadata.namespace.as_deref(),
        ) else {
            return;
        };

        let secret_name = secret_name_for(name);
        self.secrets
            .remove(&(namespace.to_string(), secret_name.clone()));
        metrics::set_cached_secrets(self.secrets.len() as i64);

        if let Err(e) = self.cluster.delete_secret(namespace, &secret_name).await {
            error!(
                secret = secret_name.as_str(),
                namespace, error = %e,
                "failed to delete secret for removed service account"
            );
        } else {
            info!(secret = secret_name.as_str(), namespace, "deleted workload secret");
        }
    }

    /// One of our secrets was observed (listed, created, or updated)
    pub async fn secret_applied(&mut self, secret: &Secret) {
        if !is_controller_secret(secret) {
            return;
        }
        let (Some(name), Some(namespace)) = (
            secret.metadata.name.as_deref(),
            secret.metadata.namespace.as_deref(),
        ) else {
            return;
        };

        self.secrets
            .insert((namespace.to_string(), name.to_string()), secret.clone());
        metrics::set_cached_secrets(self.secrets.len() as i64);

        let root = self.ca.key_cert_bundle().root_cert;
        if let Verdict::Rotate(reason) =
            self.rotation
                .evaluate(secret, &root, time::OffsetDateTime::now_utc())
        {
            self.rotate_secret(secret, reason).await;
        }
    }

    /// One of our secrets was deleted; recreate it if its service account
    /// still exists, otherwise it was an orphan and there is nothing to do.
    pub async fn secret_deleted(&mut self, secret: &Secret) {
        if !is_controller_secret(secret) {
            return;
        }
        let (Some(name), Some(namespace)) = (
            secret.metadata.name.as_deref(),
            secret.metadata.namespace.as_deref(),
        ) else {
            return;
        };
        let Some(account_name) = service_account_for_secret(name) else {
            return;
        };

        self.secrets
            .remove(&(namespace.to_string(), name.to_string()));
        metrics::set_cached_secrets(self.secrets.len() as i64);

        match self.cluster.get_service_account(namespace, account_name).await {
            Ok(Some(account)) => {
                info!(secret = name, namespace, "secret deleted but service account lives, recreating");
                self.service_account_added(&account).await;
            }
            Ok(None) => {
                metrics::increment_orphaned_secrets();
                debug!(secret = name, namespace, "deleted secret had no service account");
            }
            Err(e) => {
                warn!(secret = name, namespace, error = %e, "failed to look up service account");
            }
        }
    }

    /// A namespace changed; a transition into the managed state back-fills
    /// secrets for every service account already present. Leaving the
    /// managed state deletes nothing.
    pub async fn namespace_updated(&mut self, old: &Namespace, new: &Namespace) {
        let Some(name) = new.metadata.name.as_deref() else {
            return;
        };
        let old_managed = self.is_managed(old);
        let new_managed = self.is_managed(new);
        self.namespace_managed.insert(name.to_string(), new_managed);

        if !old_managed && new_managed {
            info!(namespace = name, "namespace became managed, back-filling");
            self.backfill_namespace(name).await;
        }
    }

    /// Watch-stream entry: derives the transition from the last observed
    /// state. The first sighting only records state; start-up issuance is
    /// covered by the service-account re-list.
    pub async fn namespace_applied(&mut self, new: &Namespace) {
        let Some(name) = new.metadata.name.as_deref() else {
            return;
        };
        let new_managed = self.is_managed(new);
        let previous = self
            .namespace_managed
            .insert(name.to_string(), new_managed);

        if previous == Some(false) && new_managed {
            info!(namespace = name, "namespace became managed, back-filling");
            self.backfill_namespace(name).await;
        }
    }

    /// A namespace is gone; forget its transition state. Its secrets and
    /// service accounts produce their own deletion events.
    pub fn namespace_deleted(&mut self, namespace: &Namespace) {
        if let Some(name) = namespace.metadata.name.as_deref() {
            self.namespace_managed.remove(name);
        }
    }

    /// Scheduler pass: re-evaluate every cached secret
    pub async fn scan(&mut self) {
        let cached: Vec<Secret> = self.secrets.values().cloned().collect();
        let root = self.ca.key_cert_bundle().root_cert;
        let now = time::OffsetDateTime::now_utc();
        for secret in cached {
            if let Verdict::Rotate(reason) = self.rotation.evaluate(&secret, &root, now) {
                self.rotate_secret(&secret, reason).await;
            }
        }
    }

    async fn backfill_namespace(&mut self, namespace: &str) {
        let accounts = match self.cluster.list_service_accounts(namespace).await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(namespace, error = %e, "failed to list service accounts for back-fill");
                return;
            }
        };
        for account in accounts {
            if let Some(name) = account.metadata.name.as_deref() {
                self.issue_secret(name, namespace).await;
            }
        }
    }

    /// Issue a fresh key/cert secret for a service account. A cached secret
    /// makes this a no-op, so repeated add events cost nothing.
    async fn issue_secret(&mut self, account_name: &str, namespace: &str) {
        let secret_name = secret_name_for(account_name);
        let key = (namespace.to_string(), secret_name.clone());
        if self.secrets.contains_key(&key) {
            debug!(secret = secret_name.as_str(), namespace, "secret already exists");
            return;
        }

        let Some(secret) = self.issue_material(account_name, namespace).await else {
            metrics::increment_secret_creation_failures();
            return;
        };

        match self
            .write_with_retry(WriteOp::Create, namespace, &secret)
            .await
        {
            Ok(()) => {
                metrics::increment_secrets_created();
                info!(secret = secret_name.as_str(), namespace, "created workload secret");
                self.secrets.insert(key, secret);
                metrics::set_cached_secrets(self.secrets.len() as i64);
            }
            Err(e) => {
                metrics::increment_secret_creation_failures();
                error!(
                    secret = secret_name.as_str(),
                    namespace, error = %e,
                    "abandoning secret creation, next reconciliation pass will retry"
                );
            }
        }
    }

    /// Reissue an existing secret in place
    async fn rotate_secret(&mut self, secret: &Secret, reason: RotateReason) {
        let (Some(name), Some(namespace)) = (
            secret.metadata.name.as_deref(),
            secret.metadata.namespace.as_deref(),
        ) else {
            return;
        };
        let Some(account_name) = service_account_for_secret(name) else {
            return;
        };
        let (name, namespace, account_name) = (
            name.to_string(),
            namespace.to_string(),
            account_name.to_string(),
        );

        // Unmanaged namespaces keep whatever secrets they have, but get no
        // fresh material.
        let ns = match self.cluster.get_namespace(&namespace).await {
            Ok(ns) => ns,
            Err(e) => {
                warn!(secret = name.as_str(), namespace = namespace.as_str(), error = %e, "failed to resolve namespace for rotation");
                return;
            }
        };
        if !self.is_managed(&ns) {
            metrics::increment_unmanaged_namespace_skips();
            return;
        }

        info!(
            secret = name.as_str(),
            namespace = namespace.as_str(),
            %reason,
            "rotating workload secret"
        );

        let Some(fresh) = self.issue_material(&account_name, &namespace).await else {
            metrics::increment_rotation_failures();
            return;
        };

        match self
            .write_with_retry(WriteOp::Update, &namespace, &fresh)
            .await
        {
            Ok(()) => {
                metrics::increment_secrets_rotated();
                self.secrets.insert((namespace, name), fresh);
                metrics::set_cached_secrets(self.secrets.len() as i64);
            }
            Err(e) => {
                metrics::increment_rotation_failures();
                error!(
                    secret = name.as_str(),
                    namespace = namespace.as_str(),
                    error = %e,
                    "abandoning rotation, next scan will retry"
                );
            }
        }
    }

    /// Generate a key pair, have the CA sign it, and assemble the secret.
    /// Signing errors are transient; they get the same retry bound as
    /// cluster writes.
    async fn issue_material(&self, account_name: &str, namespace: &str) -> Option<Secret> {
        let options = self.cert_options_for(account_name, namespace);

        let csr = match WorkloadCsr::generate(&options.subject_uri) {
            Ok(csr) => csr,
            Err(e) => {
                error!(service_account = account_name, namespace, error = %e, "failed to generate workload key");
                return None;
            }
        };

        let mut leaf = None;
        for attempt in 1..=SECRET_WRITE_RETRIES {
            match self.ca.sign(csr.csr_pem(), &options).await {
                Ok(cert) => {
                    leaf = Some(cert);
                    break;
                }
                Err(e) => {
                    warn!(
                        service_account = account_name,
                        namespace, attempt, error = %e,
                        "CA signing failed"
                    );
                    if self.shutting_down.load(Ordering::Relaxed) {
                        return None;
                    }
                }
            }
        }
        let leaf = leaf?;

        let bundle = self.ca.key_cert_bundle();
        let material = SecretMaterial {
            cert_chain: bundle.chain_for(&leaf),
            private_key: csr.private_key_pem().as_bytes().to_vec(),
            root_cert: bundle.root_cert,
            ca_cert: bundle.ca_cert,
        };
        Some(build_secret(account_name, namespace, &material))
    }

    fn cert_options_for(&self, account_name: &str, namespace: &str) -> CertOptions {
        let subject_uri = format!(
            "spiffe://{}/ns/{}/sa/{}",
            self.config.trust_domain, namespace, account_name
        );
        let mut options = CertOptions::new(subject_uri, self.config.cert_ttl);
        if let Some(entry) = self.config.webhook_dns_names.get(account_name) {
            options.dns_names = vec![
                format!("{}.{}", entry.service_name, entry.namespace),
                format!("{}.{}.svc", entry.service_name, entry.namespace),
            ];
        }
        options
    }

    async fn write_with_retry(
        &self,
        op: WriteOp,
        namespace: &str,
        secret: &Secret,
    ) -> anyhow::Result<()> {
        for attempt in 1..=SECRET_WRITE_RETRIES {
            let result = match op {
                WriteOp::Create => self.cluster.create_secret(namespace, secret).await,
                WriteOp::Update => self.cluster.update_secret(namespace, secret).await,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(namespace, attempt, error = %e, "secret write failed");
                    if attempt == SECRET_WRITE_RETRIES {
                        return Err(e);
                    }
                    if self.shutting_down.load(Ordering::Relaxed) {
                        return Err(anyhow!("shutting down, abandoning secret write"));
                    }
                }
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }
}
