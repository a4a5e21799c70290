use ratelimit_controller_k8s_api::{ConfigMap, ObjectMeta, RateLimits, Resource, ResourceExt};

/// Name of the ConfigMap (and of the pod volume) that carries the proxy's
/// rate limit configuration.
pub const CONFIG_MAP_NAME: &str = "rl-config";

/// The ConfigMap key, also used as the mount's sub-path.
pub const CONFIG_KEY: &str = "ratelimits.yaml";

/// Re-encodes the policy's opaque rate limit document as YAML.
pub fn encode(rate_limits: &serde_json::Value) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(rate_limits)
}

/// Builds the shared configuration artifact for `policy`.
///
/// The ConfigMap is controlled by the policy so that it is garbage collected
/// when the policy is deleted.
pub fn config_map(policy: &RateLimits) -> Result<ConfigMap, serde_yaml::Error> {
    let data = encode(&policy.spec.rate_limits)?;
    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(CONFIG_MAP_NAME.to_string()),
            namespace: policy.namespace(),
            owner_references: policy.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..Default::default()
        },
        data: Some(Some((CONFIG_KEY.to_string(), data)).into_iter().collect()),
        ..Default::default()
    })
}
