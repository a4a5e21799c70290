//! Trigger index
//!
//! Reconciliation is driven by policy identifiers. This index watches `RateLimits`,
//! `Deployment`, and `StatefulSet` resources and turns their changes into identifiers:
//!
//! - A policy that is created, updated, or deleted triggers itself. A deleted policy is not
//!   found when it is reconciled, which starts cleanup of its namespace.
//! - A workload that is created or updated triggers every policy in its namespace whose
//!   selector matches the workload's pod template labels.
//!
//! The index only retains each policy's selector; the reconciler reads everything else
//! from the API server.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod resource_id;


pub use self::resource_id::ResourceId;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use ratelimit_controller_core::PodTemplateWorkload;
use ratelimit_controller_k8s_api::{
    Deployment, Labels, RateLimits, ResourceExt, Selector, StatefulSet,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub type SharedIndex = Arc<RwLock<Index>>;

pub struct Index {
    /// Valid policy selectors, by namespace and policy name.
    selectors: HashMap<String, HashMap<String, Selector>>,

    triggers: UnboundedSender<ResourceId>,
}

// === impl Index ===

impl Index {
    pub fn shared(triggers: UnboundedSender<ResourceId>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            selectors: HashMap::new(),
            triggers,
        }))
    }

    /// Returns the policies in `namespace` whose selectors match `labels`.
    pub fn policies_selecting(&self, namespace: &str, labels: &Labels) -> Vec<ResourceId> {
        let mut ids = self
            .selectors
            .get(namespace)
            .into_iter()
            .flatten()
            .filter(|(_, selector)| selector.matches(labels))
            .map(|(name, _)| ResourceId::new(namespace.to_string(), name.clone()))
            .collect::<Vec<_>>();
        ids.sort_by(|a, b| a.name.cmp(&b.name));
        ids
    }

    fn trigger(&self, id: ResourceId) {
        tracing::trace!(%id, "Triggering reconciliation");
        if let Err(error) = self.triggers.send(id) {
            tracing::error!(id = %error.0, "Failed to trigger reconciliation");
        }
    }

    fn apply_workload<W: PodTemplateWorkload>(&mut self, workload: W) {
        let namespace = workload.namespace().expect("workload must have a namespace");
        let labels: Labels = workload
            .template()
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.labels.clone())
            .into();

        for id in self.policies_selecting(&namespace, &labels) {
            self.trigger(id);
        }
    }
}

impl kubert::index::IndexNamespacedResource<RateLimits> for Index {
    fn apply(&mut self, policy: RateLimits) {
        let namespace = policy.namespace().expect("RateLimits must have a namespace");
        let name = policy.name_unchecked();

        let selectors = self.selectors.entry(namespace.clone()).or_default();
        match policy.spec.selector.validate() {
            Ok(()) => {
                selectors.insert(name.clone(), policy.spec.selector);
            }
            Err(error) => {
                // The reconciler reports the invalid selector; it must not
                // match any workloads until it is fixed.
                tracing::debug!(%namespace, %name, %error, "Ignoring invalid selector");
                selectors.remove(&name);
            }
        }

        self.trigger(ResourceId::new(namespace, name));
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(selectors) = self.selectors.get_mut(&namespace) {
            selectors.remove(&name);
            if selectors.is_empty() {
                self.selectors.remove(&namespace);
            }
        }

        self.trigger(ResourceId::new(namespace, name));
    }

    // Since apply only reindexes a single policy at a time, there's no need
    // to handle resets specially.
}

impl kubert::index::IndexNamespacedResource<Deployment> for Index {
    fn apply(&mut self, deployment: Deployment) {
        self.apply_workload(deployment);
    }

    fn delete(&mut self, _namespace: String, _name: String) {}
}

impl kubert::index::IndexNamespacedResource<StatefulSet> for Index {
    fn apply(&mut self, statefulset: StatefulSet) {
        self.apply_workload(statefulset);
    }

    fn delete(&mut self, _namespace: String, _name: String) {}
}
