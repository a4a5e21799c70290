//! Resolves the workload that manages a pod.
//!
//! Deployments reach their pods through a ReplicaSet, so a pod is at most two
//! controller references away from the workload that owns its template:
//!
//! ```text
//! Pod -> ReplicaSet -> Deployment
//! Pod -> StatefulSet
//! ```
//!
//! Anything else (bare pods, Jobs, DaemonSets, ReplicaSets without a
//! Deployment) is not managed.

use crate::cluster::{Cluster, Object};
use ratelimit_controller_core::Workload;
use ratelimit_controller_k8s_api::{
    Deployment, ObjectMeta, OwnerReference, Pod, ReplicaSet, ResourceExt, StatefulSet,
};
use std::collections::HashSet;
use tracing::{debug, error};

/// The longest ownership chain that is followed.
const MAX_HOPS: usize = 2;

/// Returns the Deployment or StatefulSet that manages `pod`, if any.
///
/// Lookup failures are logged and treated as unresolvable so that a single
/// pod never fails a reconciliation pass.
pub async fn resolve<C: Cluster>(cluster: &C, pod: &Pod) -> Option<Workload> {
    let namespace = pod.namespace()?;
    let mut owner = controller_of(&pod.metadata)?.clone();

    for _ in 0..MAX_HOPS {
        match owner.kind.as_str() {
            "ReplicaSet" => {
                let rs = lookup::<ReplicaSet, _>(cluster, &namespace, &owner.name, pod).await?;
                owner = controller_of(&rs.metadata)?.clone();
            }
            "Deployment" => {
                return lookup::<Deployment, _>(cluster, &namespace, &owner.name, pod)
                    .await
                    .map(Into::into);
            }
            "StatefulSet" => {
                return lookup::<StatefulSet, _>(cluster, &namespace, &owner.name, pod)
                    .await
                    .map(Into::into);
            }
            kind => {
                debug!(pod = %pod.name_any(), %kind, "Pod is not managed by a supported workload");
                return None;
            }
        }
    }

    None
}

/// Resolves the distinct workloads that manage `pods`.
///
/// Pods whose owner cannot be resolved are skipped.
pub async fn resolve_distinct<C: Cluster>(cluster: &C, pods: &[Pod]) -> Vec<Workload> {
    let mut seen = HashSet::new();
    let mut workloads = Vec::new();
    for pod in pods {
        let Some(workload) = resolve(cluster, pod).await else {
            continue;
        };
        if seen.insert((workload.kind(), workload.name())) {
            workloads.push(workload);
        }
    }
    workloads
}

/// Returns the owner reference marked as the managing controller.
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .iter()
        .flatten()
        .find(|owner| owner.controller == Some(true))
}

async fn lookup<K: Object, C: Cluster>(
    cluster: &C,
    namespace: &str,
    name: &str,
    pod: &Pod,
) -> Option<K> {
    match cluster.get::<K>(namespace, name).await {
        Ok(Some(owner)) => Some(owner),
        Ok(None) => {
            debug!(pod = %pod.name_any(), kind = %K::kind(&()), %name, "Owner not found");
            None
        }
        Err(error) => {
            error!(pod = %pod.name_any(), kind = %K::kind(&()), %name, %error, "Failed to resolve pod owner");
            None
        }
    }
}
