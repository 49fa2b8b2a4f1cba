//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.
//!
//! All settings have defaults and can be overridden via environment
//! variables, which are populated from a ConfigMap using `envFrom` in the
//! deployment. Invalid combinations (a grace-period ratio outside `[0, 1]`,
//! a zero scan interval) are rejected before the controller starts; they are
//! never discovered at runtime.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::constants::*;

/// Configuration errors, fatal at construction time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("grace period ratio {0} is outside [0, 1]")]
    InvalidGracePeriodRatio(f64),

    #[error("certificate TTL must be positive")]
    InvalidCertTtl,

    #[error("scan interval must be positive")]
    InvalidScanInterval,

    #[error("malformed webhook DNS entry {0:?}, expected name=service.namespace")]
    InvalidWebhookEntry(String),
}

/// DNS name registration for a well-known webhook service account.
///
/// Certificates issued for these accounts carry additional DNS SANs so the
/// API server can verify the webhook's serving certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsNameEntry {
    /// Service fronting the webhook
    pub service_name: String,
    /// Namespace of that service
    pub namespace: String,
}

/// Controller-level configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Whether namespaces are managed unless they opt out
    pub default_managed: bool,
    /// TTL of issued workload certificates
    pub cert_ttl: Duration,
    /// Fraction of a certificate's TTL treated as rotation grace
    pub grace_period_ratio: f64,
    /// Absolute floor for the rotation grace window
    pub min_grace_period: Duration,
    /// Namespace holding the CA material; also the value the managed label
    /// must carry when `default_managed` is off
    pub ca_storage_namespace: String,
    /// Trust domain for workload identity URIs
    pub trust_domain: String,
    /// Namespaces to watch; empty means cluster-wide
    pub watched_namespaces: Vec<String>,
    /// Well-known webhook service accounts and their DNS names
    pub webhook_dns_names: HashMap<String, DnsNameEntry>,
    /// Interval between rotation scans of the cached secrets
    pub scan_interval: Duration,
    /// Port for the metrics/probe HTTP server
    pub metrics_port: u16,
    /// PEM file holding an existing CA certificate; a self-signed root is
    /// generated when unset
    pub ca_cert_file: Option<String>,
    /// PEM file holding the matching CA private key
    pub ca_key_file: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let min_grace_period = Duration::from_secs(DEFAULT_MIN_GRACE_PERIOD_SECS);
        Self {
            default_managed: true,
            cert_ttl: Duration::from_secs(DEFAULT_CERT_TTL_SECS),
            grace_period_ratio: DEFAULT_GRACE_PERIOD_RATIO,
            min_grace_period,
            ca_storage_namespace: DEFAULT_CA_STORAGE_NAMESPACE.to_string(),
            trust_domain: DEFAULT_TRUST_DOMAIN.to_string(),
            watched_namespaces: Vec::new(),
            webhook_dns_names: HashMap::new(),
            // Keeps the scan frequent enough to rotate inside the grace floor.
            scan_interval: min_grace_period / 2,
            metrics_port: DEFAULT_METRICS_PORT,
            ca_cert_file: None,
            ca_key_file: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults, and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let min_grace_period =
            Duration::from_secs(env_var_or_default("MIN_GRACE_PERIOD_SECS", DEFAULT_MIN_GRACE_PERIOD_SECS));
        let scan_interval_secs: u64 =
            env_var_or_default("SCAN_INTERVAL_SECS", (min_grace_period.as_secs() / 2).max(1));

        let config = Self {
            default_managed: env_var_or_default("MANAGE_NAMESPACES_BY_DEFAULT", true),
            cert_ttl: Duration::from_secs(env_var_or_default("CERT_TTL_SECS", DEFAULT_CERT_TTL_SECS)),
            grace_period_ratio: env_var_or_default("GRACE_PERIOD_RATIO", DEFAULT_GRACE_PERIOD_RATIO),
            min_grace_period,
            ca_storage_namespace: env_var_or_default(
                "CA_STORAGE_NAMESPACE",
                DEFAULT_CA_STORAGE_NAMESPACE.to_string(),
            ),
            trust_domain: env_var_or_default("TRUST_DOMAIN", DEFAULT_TRUST_DOMAIN.to_string()),
            watched_namespaces: parse_namespace_list(
                &std::env::var("WATCHED_NAMESPACES").unwrap_or_default(),
            ),
            webhook_dns_names: parse_webhook_entries(
                &std::env::var("WEBHOOK_DNS_NAMES").unwrap_or_default(),
            )?,
            scan_interval: Duration::from_secs(scan_interval_secs),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            ca_cert_file: std::env::var("CA_CERT_FILE").ok().filter(|v| !v.is_empty()),
            ca_key_file: std::env::var("CA_KEY_FILE").ok().filter(|v| !v.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate settings that would otherwise only fail mid-reconciliation
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.grace_period_ratio) {
            return Err(ConfigError::InvalidGracePeriodRatio(self.grace_period_ratio));
        }
        if self.cert_ttl.is_zero() {
            return Err(ConfigError::InvalidCertTtl);
        }
        if self.scan_interval.is_zero() {
            return Err(ConfigError::InvalidScanInterval);
        }
        Ok(())
    }

    /// Whether a namespace falls inside the watch scope.
    /// An empty list is the cluster-wide sentinel.
    pub fn watches_namespace(&self, namespace: &str) -> bool {
        self.watched_namespaces.is_empty()
            || self.watched_namespaces.iter().any(|ns| ns == namespace)
    }
}

fn env_var_or_default<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_namespace_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `sa-name=service.namespace` entries, comma separated
fn parse_webhook_entries(raw: &str) -> Result<HashMap<String, DnsNameEntry>, ConfigError> {
    let mut entries = HashMap::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (account, target) = part
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidWebhookEntry(part.to_string()))?;
        let (service, namespace) = target
            .split_once('.')
            .ok_or_else(|| ConfigError::InvalidWebhookEntry(part.to_string()))?;
        if account.is_empty() || service.is_empty() || namespace.is_empty() {
            return Err(ConfigError::InvalidWebhookEntry(part.to_string()));
        }
        entries.insert(
            account.to_string(),
            DnsNameEntry {
                service_name: service.to_string(),
                namespace: namespace.to_string(),
            },
        );
    }
    Ok(entries)
}
