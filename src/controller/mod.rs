//! # Controller
//!
//! Reconciliation of workload-identity secrets: the event handlers, the
//! namespace-management policy, the rotation evaluator, the periodic scan,
//! and the watch plumbing feeding them.

pub mod policy;
pub mod reconciler;
pub mod rotation;
pub mod scheduler;
pub mod secrets;
pub mod watch;

pub use reconciler::SecretController;
