//! # Workload Cert Controller
//!
//! A Kubernetes controller that maintains an X.509 key/cert secret, signed
//! by an internal certificate authority, for every service account in every
//! managed namespace, and rotates those secrets before they expire.
//!
//! ## How it works
//!
//! 1. **Watching** - service accounts, workload secrets, and namespaces are
//!    watched cluster-wide (or over a configured namespace list)
//! 2. **Issuance** - a service account in a managed namespace gets a fresh
//!    key pair, a CA-signed certificate chain, and a typed secret named
//!    `workload-cert.<account>`
//! 3. **Rotation** - secrets rotate once their remaining certificate
//!    lifetime falls inside `max(ratio * ttl, min grace period)`, when
//!    their payload is corrupt, or when the CA root has changed
//! 4. **Self-healing** - deleting a secret whose service account still
//!    exists recreates it; labelling a namespace into management back-fills
//!    secrets for everything already in it
//!
//! Namespace management is label-driven: an override label opts out
//! unconditionally, and in default-off mode a namespace opts in by carrying
//! the managed label valued with the CA storage namespace.
//!
//! All reconciliation runs on a single worker fed by one event queue, so no
//! per-key locking is needed and events for one secret stay ordered.

pub mod ca;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
