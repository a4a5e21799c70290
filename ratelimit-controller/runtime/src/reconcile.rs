use crate::{
    cleanup,
    cluster::{self, Cluster},
    config,
    metrics::Metrics,
    owner, selector,
    sync::{self, Injection, Outcome},
};
use anyhow::Result;
use ratelimit_controller_core::{Sidecar, Workload};
use ratelimit_controller_k8s_api::{Pod, RateLimits, Selector};
use ratelimit_controller_k8s_index::ResourceId;
use tracing::{debug, error, info};

/// Converges the workloads selected by a single `RateLimits` policy.
#[derive(Clone)]
pub struct Reconciler<C> {
    cluster: C,
    sidecar: Sidecar,
    metrics: Metrics,
}

/// Whether a pass left work behind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pass {
    Complete,
    /// Some workload could not be converged and the policy should be
    /// reconciled again later.
    Incomplete,
}

// === impl Reconciler ===

impl<C: Cluster> Reconciler<C> {
    pub fn new(cluster: C, sidecar: Sidecar, metrics: Metrics) -> Self {
        Self {
            cluster,
            sidecar,
            metrics,
        }
    }

    /// Runs one reconciliation pass for the identified policy.
    ///
    /// A policy that no longer exists has its namespace cleaned up. Failures
    /// that affect a single workload are logged and do not fail the pass.
    #[tracing::instrument(skip_all, fields(namespace = %id.namespace, name = %id.name))]
    pub async fn reconcile(&self, id: &ResourceId) -> Result<Pass> {
        self.metrics.reconcile_started();
        let res = self.reconcile_id(id).await;
        if res.is_err() {
            self.metrics.error();
        }
        res
    }

    async fn reconcile_id(&self, id: &ResourceId) -> Result<Pass> {
        let ResourceId { namespace, name } = id;
        let Some(policy) = self.cluster.get::<RateLimits>(namespace, name).await? else {
            info!("RateLimits deleted; removing sidecars from namespace");
            let workloads = cleanup::namespace_workloads(&self.cluster, namespace).await?;
            return Ok(self.strip_all(workloads).await);
        };

        let current = &policy.spec.selector;
        if let Err(error) = current.validate() {
            error!(%error, "Invalid selector");
            return Ok(Pass::Complete);
        }

        let mut pass = Pass::Complete;
        if let Some(previous) = selector::changed(&policy) {
            info!(%previous, %current, "Selector changed");
            pass = pass.and(self.remove_unselected(namespace, &previous, current).await?);
        }

        match Injection::new(&self.sidecar, &policy) {
            Ok(injection) => {
                pass = pass.and(self.inject_selected(namespace, current, &injection).await?);
            }
            Err(error) => error!(%error, "Skipping sidecar injection"),
        }

        match config::propagate(&self.cluster, &policy).await {
            Ok(()) => debug!("Published rate limit config"),
            Err(config::Error::Cluster(error)) if error.is_conflict() => {
                info!("ConfigMap was modified concurrently; skipping");
                self.metrics.conflict();
            }
            Err(error) => return Err(error.into()),
        }

        // The recorded selector is the baseline for detecting future
        // narrowing, so it only advances once every removal has landed.
        if pass == Pass::Incomplete {
            info!("Deferring selector snapshot until all workloads converge");
            return Ok(pass);
        }
        if !selector::is_current(&policy) {
            match selector::persist(&self.cluster, &policy).await {
                Ok(()) => debug!(%current, "Recorded applied selector"),
                Err(error) if error.is_conflict() => {
                    info!("RateLimits was modified concurrently; skipping selector snapshot");
                    self.metrics.conflict();
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(pass)
    }

    async fn inject_selected(
        &self,
        namespace: &str,
        current: &Selector,
        injection: &Injection,
    ) -> Result<Pass, cluster::Error> {
        let pods = self
            .cluster
            .list::<Pod>(namespace, Some(current))
            .await?
            .into_iter()
            .filter(|pod| !selector::is_terminating(pod))
            .collect::<Vec<_>>();

        let mut pass = Pass::Complete;
        for workload in owner::resolve_distinct(&self.cluster, &pods).await {
            let (kind, name) = (workload.kind(), workload.name());
            let res = sync::inject(&self.cluster, workload, injection).await;
            // A conflicting write to the workload triggers this policy again.
            if let Err(error) = self.record("inject", kind, &name, res) {
                if !error.is_conflict() {
                    pass = Pass::Incomplete;
                }
            }
        }
        Ok(pass)
    }

    async fn remove_unselected(
        &self,
        namespace: &str,
        previous: &Selector,
        current: &Selector,
    ) -> Result<Pass, cluster::Error> {
        let pods = selector::unselected_pods(&self.cluster, namespace, previous, current).await?;
        let workloads = owner::resolve_distinct(&self.cluster, &pods)
            .await
            .into_iter()
            .filter(|workload| {
                let keep = cleanup::still_selected(workload, current);
                if keep {
                    debug!(kind = %workload.kind(), name = %workload.name(), "Workload template is still selected");
                }
                !keep
            })
            .collect();
        Ok(self.strip_all(workloads).await)
    }

    async fn strip_all(&self, workloads: Vec<Workload>) -> Pass {
        let mut pass = Pass::Complete;
        for workload in workloads {
            let (kind, name) = (workload.kind(), workload.name());
            let res = sync::strip(&self.cluster, workload).await;
            if self.record("strip", kind, &name, res).is_err() {
                pass = Pass::Incomplete;
            }
        }
        pass
    }

    fn record(
        &self,
        op: &'static str,
        kind: &'static str,
        name: &str,
        res: Result<Outcome, cluster::Error>,
    ) -> Result<(), cluster::Error> {
        match res {
            Ok(Outcome::Unchanged) => {
                debug!(%kind, %name, %op, "Workload is up to date");
                Ok(())
            }
            Ok(Outcome::Patched) => {
                info!(%kind, %name, %op, "Patched workload");
                self.metrics.workload_patched(kind, op);
                Ok(())
            }
            Err(error) if error.is_conflict() => {
                info!(%kind, %name, %op, "Workload was modified concurrently; skipping");
                self.metrics.conflict();
                Err(error)
            }
            Err(error) => {
                error!(%kind, %name, %op, %error, "Failed to patch workload");
                self.metrics.error();
                Err(error)
            }
        }
    }
}

// === impl Pass ===

impl Pass {
    fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Complete, Self::Complete) => Self::Complete,
            _ => Self::Incomplete,
        }
    }
}
