//! Controller entrypoint: configuration, tracing, metrics, the probe
//! server, CA bootstrap, and the watch loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use workload_cert_controller::ca::{CertificateAuthority, SelfSignedAuthority};
use workload_cert_controller::cluster::KubeClusterApi;
use workload_cert_controller::config::ControllerConfig;
use workload_cert_controller::constants::DEFAULT_CA_CERT_TTL_SECS;
use workload_cert_controller::controller::{watch, SecretController};
use workload_cert_controller::observability::metrics;
use workload_cert_controller::observability::probes::{self, Readiness};

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23+ needs a process-level crypto provider before any TLS
    // connection is attempted, including the Kubernetes client's.
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workload_cert_controller=info".into()),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Workload Cert Controller"
    );

    let config = ControllerConfig::from_env().context("invalid controller configuration")?;

    metrics::register_metrics()?;

    let readiness = Readiness::new();
    {
        let readiness = readiness.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = probes::serve(port, readiness).await {
                error!("probe server error: {}", e);
            }
        });
    }

    let ca = bootstrap_authority(&config).context("failed to bootstrap certificate authority")?;

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;
    let cluster = Arc::new(KubeClusterApi::new(client.clone()));

    let controller = SecretController::new(config, Arc::new(ca), cluster)
        .context("failed to construct controller")?;

    readiness.mark_ready();

    watch::run(controller, client, readiness).await?;

    info!("Controller stopped");
    Ok(())
}

/// Load CA material from the configured PEM files, or generate a
/// self-signed root when none is configured.
fn bootstrap_authority(config: &ControllerConfig) -> Result<SelfSignedAuthority> {
    let authority = match (&config.ca_cert_file, &config.ca_key_file) {
        (Some(cert_file), Some(key_file)) => {
            let cert = std::fs::read_to_string(cert_file)
                .with_context(|| format!("failed to read CA cert from {cert_file}"))?;
            let key = std::fs::read_to_string(key_file)
                .with_context(|| format!("failed to read CA key from {key_file}"))?;
            info!("Loaded CA material from {}", cert_file);
            SelfSignedAuthority::from_pem(&cert, &key)?
        }
        _ => {
            info!("No CA material configured, generating a self-signed root");
            SelfSignedAuthority::new(
                &config.trust_domain,
                Duration::from_secs(DEFAULT_CA_CERT_TTL_SECS),
            )?
        }
    };

    let bundle = authority.key_cert_bundle();
    info!(
        "CA ready, root certificate is {} bytes",
        bundle.root_cert.len()
    );
    Ok(authority)
}
