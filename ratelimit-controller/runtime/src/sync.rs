use crate::cluster::{Cluster, Error};
use ratelimit_controller_core::{
    sidecar, workload::template_patch, Env, MissingEnv, PodTemplateWorkload, Sidecar, Workload,
};
use ratelimit_controller_k8s_api::{Container, RateLimits, ResourceExt};

/// The sidecar a policy wants in each selected pod template.
#[derive(Clone, Debug)]
pub struct Injection {
    hash: String,
    container: Container,
}

/// The result of converging a single workload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The workload already matched the desired state.
    Unchanged,
    /// A patch was written.
    Patched,
}

// === impl Injection ===

impl Injection {
    /// Resolves the policy's effective environment and content hash.
    ///
    /// Fails if any required environment variable has no value.
    pub fn new(sidecar: &Sidecar, policy: &RateLimits) -> Result<Self, MissingEnv> {
        let namespace = policy.namespace().unwrap_or_default();
        let env = Env::effective(&namespace, policy.spec.env.iter().flatten());
        env.validate()?;

        Ok(Self {
            hash: sidecar.content_hash(&policy.spec.rate_limits, &env),
            container: sidecar.container(&env),
        })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Ensures the workload's pod template carries the current sidecar.
///
/// A template whose hash annotation already matches is left alone, so
/// unrelated edits to the workload never cause a patch.
pub async fn inject<C: Cluster>(
    cluster: &C,
    workload: Workload,
    injection: &Injection,
) -> Result<Outcome, Error> {
    match workload {
        Workload::Deployment(w) => inject_into(cluster, w, injection).await,
        Workload::StatefulSet(w) => inject_into(cluster, w, injection).await,
    }
}

/// Removes the sidecar, its config volume, and the hash annotation.
pub async fn strip<C: Cluster>(cluster: &C, workload: Workload) -> Result<Outcome, Error> {
    match workload {
        Workload::Deployment(w) => strip_from(cluster, w).await,
        Workload::StatefulSet(w) => strip_from(cluster, w).await,
    }
}

async fn inject_into<C: Cluster, W: PodTemplateWorkload>(
    cluster: &C,
    workload: W,
    injection: &Injection,
) -> Result<Outcome, Error> {
    let mut modified = workload.clone();
    match modified.template_mut() {
        Some(template) if sidecar::needs_update(template, &injection.hash) => {
            sidecar::inject(template, injection.container.clone(), &injection.hash);
        }
        _ => return Ok(Outcome::Unchanged),
    }

    patch(cluster, &workload, &modified).await
}

async fn strip_from<C: Cluster, W: PodTemplateWorkload>(
    cluster: &C,
    workload: W,
) -> Result<Outcome, Error> {
    let mut modified = workload.clone();
    if !modified.template_mut().is_some_and(sidecar::strip) {
        return Ok(Outcome::Unchanged);
    }

    patch(cluster, &workload, &modified).await
}

async fn patch<C: Cluster, W: PodTemplateWorkload>(
    cluster: &C,
    original: &W,
    modified: &W,
) -> Result<Outcome, Error> {
    let Some(patch) = template_patch(original, modified)? else {
        return Ok(Outcome::Unchanged);
    };
    let namespace = original.namespace().unwrap_or_default();
    cluster
        .patch::<W>(&namespace, &original.name_any(), &patch)
        .await?;
    Ok(Outcome::Patched)
}
