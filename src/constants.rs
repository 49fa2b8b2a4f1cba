//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! The naming constants are part of the external contract: consumers mount
//! the generated secrets by name and key, and operators label namespaces
//! with the strings below. They must stay stable across versions.

/// Prefix for generated secret names: `workload-cert.<service-account-name>`
pub const SECRET_NAME_PREFIX: &str = "workload-cert";

/// Type tag on generated secrets, distinguishing them from cluster-native
/// secrets. Events on secrets with any other type are ignored.
pub const SECRET_TYPE: &str = "workload-cert.microscaler.io/key-and-cert";

/// Secret data key holding the root certificate
pub const ROOT_CERT_KEY: &str = "root-cert.pem";

/// Secret data key holding the certificate chain (leaf first)
pub const CERT_CHAIN_KEY: &str = "cert-chain.pem";

/// Secret data key holding the workload private key
pub const PRIVATE_KEY_KEY: &str = "key.pem";

/// Secret data key holding the signing CA certificate
pub const CA_CERT_KEY: &str = "ca-cert.pem";

/// Annotation recording which service account a secret was issued for
pub const SERVICE_ACCOUNT_ANNOTATION: &str =
    "workload-cert.microscaler.io/service-account.name";

/// Namespace label opting a namespace into management. When the controller
/// does not manage namespaces by default, the label value must equal the CA
/// storage namespace for the namespace to be managed.
pub const NAMESPACE_MANAGED_LABEL: &str = "workload-cert.microscaler.io/managed";

/// Namespace label overriding all other signals: the value `"false"` forces
/// the namespace unmanaged.
pub const NAMESPACE_OVERRIDE_LABEL: &str = "workload-cert.microscaler.io/override";

/// Number of attempts for a secret create/update before giving up and
/// waiting for the next reconciliation pass
pub const SECRET_WRITE_RETRIES: usize = 3;

/// Default workload certificate TTL (seconds)
pub const DEFAULT_CERT_TTL_SECS: u64 = 90 * 24 * 3600;

/// Default fraction of a certificate's TTL that counts as rotation grace
pub const DEFAULT_GRACE_PERIOD_RATIO: f64 = 0.5;

/// Default minimum rotation grace period (seconds)
pub const DEFAULT_MIN_GRACE_PERIOD_SECS: u64 = 10 * 60;

/// Default trust domain used in workload identity URIs
pub const DEFAULT_TRUST_DOMAIN: &str = "cluster.local";

/// Default namespace where the CA stores its material
pub const DEFAULT_CA_STORAGE_NAMESPACE: &str = "workload-cert-system";

/// Default validity of a generated self-signed root (seconds)
pub const DEFAULT_CA_CERT_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Depth of the event queue between the watch streams and the worker.
/// Producers await capacity, so backpressure reaches the watch streams
/// instead of dropping events.
pub const EVENT_QUEUE_DEPTH: usize = 1024;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Delay before restarting a watch stream after it ends (seconds)
pub const WATCH_RESTART_DELAY_SECS: u64 = 1;
