//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `workload_cert_secrets_created_total` - Secrets issued for service accounts
//! - `workload_cert_secret_creation_failures_total` - Issuance attempts abandoned after retry exhaustion
//! - `workload_cert_secrets_rotated_total` - Secrets reissued before expiry
//! - `workload_cert_rotation_failures_total` - Rotations abandoned after retry exhaustion
//! - `workload_cert_unmanaged_namespace_skips_total` - Events skipped because the namespace is unmanaged
//! - `workload_cert_orphaned_secrets_total` - Controller-typed secrets deleted with no matching service account
//! - `workload_cert_cached_secrets` - Current number of secrets in the local cache

use anyhow::Result;
use prometheus::{IntCounter, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static SECRETS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workload_cert_secrets_created_total",
        "Secrets issued for service accounts",
    )
    .expect("Failed to create SECRETS_CREATED_TOTAL metric - this should never happen")
});

static SECRET_CREATION_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workload_cert_secret_creation_failures_total",
        "Issuance attempts abandoned after retry exhaustion",
    )
    .expect("Failed to create SECRET_CREATION_FAILURES_TOTAL metric - this should never happen")
});

static SECRETS_ROTATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workload_cert_secrets_rotated_total",
        "Secrets reissued before expiry",
    )
    .expect("Failed to create SECRETS_ROTATED_TOTAL metric - this should never happen")
});

static ROTATION_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workload_cert_rotation_failures_total",
        "Rotations abandoned after retry exhaustion",
    )
    .expect("Failed to create ROTATION_FAILURES_TOTAL metric - this should never happen")
});

static UNMANAGED_NAMESPACE_SKIPS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workload_cert_unmanaged_namespace_skips_total",
        "Events skipped because the namespace is unmanaged",
    )
    .expect("Failed to create UNMANAGED_NAMESPACE_SKIPS_TOTAL metric - this should never happen")
});

static ORPHANED_SECRETS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "workload_cert_orphaned_secrets_total",
        "Controller-typed secrets deleted with no matching service account",
    )
    .expect("Failed to create ORPHANED_SECRETS_TOTAL metric - this should never happen")
});

static CACHED_SECRETS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "workload_cert_cached_secrets",
        "Current number of secrets in the local cache",
    )
    .expect("Failed to create CACHED_SECRETS metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SECRETS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_CREATION_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_ROTATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ROTATION_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNMANAGED_NAMESPACE_SKIPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ORPHANED_SECRETS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CACHED_SECRETS.clone()))?;

    Ok(())
}

pub fn increment_secrets_created() {
    SECRETS_CREATED_TOTAL.inc();
}

pub fn increment_secret_creation_failures() {
    SECRET_CREATION_FAILURES_TOTAL.inc();
}

pub fn increment_secrets_rotated() {
    SECRETS_ROTATED_TOTAL.inc();
}

pub fn increment_rotation_failures() {
    ROTATION_FAILURES_TOTAL.inc();
}

pub fn increment_unmanaged_namespace_skips() {
    UNMANAGED_NAMESPACE_SKIPS_TOTAL.inc();
}

pub fn increment_orphaned_secrets() {
    ORPHANED_SECRETS_TOTAL.inc();
}

pub fn set_cached_secrets(count: i64) {
    CACHED_SECRETS.set(count);
}
