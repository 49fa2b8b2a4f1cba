//! # Cluster API
//!
//! The narrow slice of the Kubernetes API the controller needs: namespaced
//! CRUD on secrets, namespace lookup for label resolution, and service
//! account get/list. Hidden behind a trait so tests can substitute an
//! action-recording fake.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;

/// Cluster operations used by the controller
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a namespace for label resolution
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;

    /// Fetch a service account; `None` when it does not exist
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>>;

    /// List all service accounts in a namespace
    async fn list_service_accounts(&self, namespace: &str) -> Result<Vec<ServiceAccount>>;

    /// Create a secret
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    /// Replace an existing secret
    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    /// Delete a secret. Deleting a secret that is already gone is not an
    /// error; the desired state is reached either way.
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Production implementation over a shared `kube::Client`
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        namespaces
            .get(name)
            .await
            .with_context(|| format!("failed to get namespace {name}"))
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        match accounts.get(name).await {
            Ok(account) => Ok(Some(account)),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("failed to get service account {namespace}/{name}"))
            }
        }
    }

    async fn list_service_accounts(&self, namespace: &str) -> Result<Vec<ServiceAccount>> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let list = accounts
            .list(&ListParams::default())
            .await
            .with_context(|| format!("failed to list service accounts in {namespace}"))?;
        Ok(list.items)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
            .with_context(|| format!("failed to create secret in {namespace}"))?;
        Ok(())
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret
            .metadata
            .name
            .as_deref()
            .context("secret has no name")?;
        self.secrets(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
            .with_context(|| format!("failed to update secret {namespace}/{name}"))?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to delete secret {namespace}/{name}"))
            }
        }
    }
}
