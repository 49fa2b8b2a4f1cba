//! Namespace-management policy.
//!
//! A pure decision over a namespace's labels:
//!
//! - the override label valued `"false"` is a hard opt-out, regardless of
//!   mode;
//! - with default-on mode, everything else is managed;
//! - with default-off mode, only namespaces whose managed label equals the
//!   CA storage namespace are managed. Any other value, including the empty
//!   string, leaves the namespace unmanaged.

use k8s_openapi::api::core::v1::Namespace;

use crate::constants::{NAMESPACE_MANAGED_LABEL, NAMESPACE_OVERRIDE_LABEL};

/// Decide whether the controller writes secrets into `namespace`
pub fn namespace_is_managed(
    namespace: &Namespace,
    default_managed: bool,
    ca_storage_namespace: &str,
) -> bool {
    let labels = namespace.metadata.labels.as_ref();

    let override_value =
        labels.and_then(|labels| labels.get(NAMESPACE_OVERRIDE_LABEL).map(String::as_str));
    if override_value == Some("false") {
        return false;
    }

    if default_managed {
        return true;
    }

    labels
        .and_then(|labels| labels.get(NAMESPACE_MANAGED_LABEL))
        .is_some_and(|value| !value.is_empty() && value == ca_storage_namespace)
}
