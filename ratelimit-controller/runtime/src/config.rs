use crate::cluster::{self, Cluster};
use ratelimit_controller_core::config;
use ratelimit_controller_k8s_api::RateLimits;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to encode rate limits: {0}")]
    Encode(#[from] serde_yaml::Error),

    #[error(transparent)]
    Cluster(#[from] cluster::Error),
}

/// Publishes the policy's rate limits to the `rl-config` ConfigMap in its
/// namespace, creating the ConfigMap if needed.
///
/// The ConfigMap is owned by the policy, so it is garbage collected when the
/// policy is deleted.
pub async fn propagate<C: Cluster>(cluster: &C, policy: &RateLimits) -> Result<(), Error> {
    let config_map = config::config_map(policy)?;
    cluster.apply(&config_map).await?;
    Ok(())
}
