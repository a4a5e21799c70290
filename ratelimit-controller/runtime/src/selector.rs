//! Tracks the selector a policy was last reconciled with so that pods it no
//! longer selects can be found.

use crate::cluster::{Cluster, Error};
use ratelimit_controller_core::snapshot;
use ratelimit_controller_k8s_api::{Labels, Pod, RateLimits, ResourceExt, Selector};
use tracing::warn;

/// Returns the previously applied selector if it differs from the current one.
///
/// A missing snapshot yields `None`. So does one that cannot be parsed, which
/// is logged and treated as absent.
pub fn changed(policy: &RateLimits) -> Option<Selector> {
    let previous = match snapshot::last_applied(policy)? {
        Ok(previous) => previous,
        Err(error) => {
            warn!(%error, "Ignoring unparseable last-applied selector");
            return None;
        }
    };
    (previous != policy.spec.selector).then_some(previous)
}

/// Lists the live pods selected by `previous` that `current` no longer selects.
pub async fn unselected_pods<C: Cluster>(
    cluster: &C,
    namespace: &str,
    previous: &Selector,
    current: &Selector,
) -> Result<Vec<Pod>, Error> {
    let pods = cluster.list::<Pod>(namespace, Some(previous)).await?;
    Ok(pods
        .into_iter()
        .filter(|pod| !is_terminating(pod))
        .filter(|pod| !current.matches(&Labels::from(pod.metadata.labels.clone())))
        .collect())
}

/// Records the policy's current selector as the last applied one.
pub async fn persist<C: Cluster>(cluster: &C, policy: &RateLimits) -> Result<(), Error> {
    let patch = snapshot::patch(policy, &policy.spec.selector);
    let namespace = policy.namespace().unwrap_or_default();
    cluster
        .patch::<RateLimits>(&namespace, &policy.name_any(), &patch)
        .await?;
    Ok(())
}

/// Returns true if the snapshot already records the current selector.
pub fn is_current(policy: &RateLimits) -> bool {
    matches!(
        snapshot::last_applied(policy),
        Some(Ok(ref previous)) if *previous == policy.spec.selector
    )
}

pub(crate) fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}
