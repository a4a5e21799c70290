//! Removes sidecars that are no longer wanted.

use crate::cluster::{Cluster, Error};
use ratelimit_controller_core::Workload;
use ratelimit_controller_k8s_api::{Deployment, Labels, Selector, StatefulSet};

/// Lists every Deployment and StatefulSet in the namespace.
///
/// Used when a policy is deleted: without a selector there is no way to tell
/// which workloads it had selected, so all of them are candidates.
pub async fn namespace_workloads<C: Cluster>(
    cluster: &C,
    namespace: &str,
) -> Result<Vec<Workload>, Error> {
    let deployments = cluster.list::<Deployment>(namespace, None).await?;
    let statefulsets = cluster.list::<StatefulSet>(namespace, None).await?;
    Ok(deployments
        .into_iter()
        .map(Workload::from)
        .chain(statefulsets.into_iter().map(Workload::from))
        .collect())
}

/// Returns true if the workload's pod template is still selected.
///
/// Pods from an earlier rollout may carry labels the template has since
/// dropped; their workload keeps its sidecar.
pub fn still_selected(workload: &Workload, selector: &Selector) -> bool {
    let labels: Labels = workload
        .template()
        .and_then(|t| t.metadata.as_ref())
        .and_then(|m| m.labels.clone())
        .into();
    selector.matches(&labels)
}
