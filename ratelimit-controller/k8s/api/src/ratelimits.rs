use crate::labels::Selector;
use std::collections::BTreeMap;

/// Requests that every workload whose pods match `selector` runs the
/// rate-limiting proxy sidecar.
#[derive(
    Clone,
    Debug,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "nginx.ratelimiter",
    version = "v1alpha1",
    kind = "RateLimits",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitsSpec {
    /// Selects the pods whose owning workloads receive the sidecar.
    pub selector: Selector,

    /// Environment for the sidecar container, e.g. `UPSTREAM_HOST`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,

    /// The proxy's rate limit configuration. Its structure is owned by the
    /// proxy and is passed through without interpretation.
    #[serde(default)]
    pub rate_limits: serde_json::Value,
}
