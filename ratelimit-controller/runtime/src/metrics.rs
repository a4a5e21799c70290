use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    reconciles: Counter,
    patches: Family<PatchLabels, Counter>,
    conflicts: Counter,
    errors: Counter,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct PatchLabels {
    kind: &'static str,
    op: &'static str,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Counter::default();
        reg.register(
            "reconciles",
            "Total number of RateLimits reconciliation passes",
            reconciles.clone(),
        );

        let patches = Family::<PatchLabels, Counter>::default();
        reg.register(
            "workload_patches",
            "Total number of workload pod templates patched",
            patches.clone(),
        );

        let conflicts = Counter::default();
        reg.register(
            "conflicts",
            "Total number of writes skipped due to a conflicting update",
            conflicts.clone(),
        );

        let errors = Counter::default();
        reg.register(
            "errors",
            "Total number of failed API operations",
            errors.clone(),
        );

        Self {
            reconciles,
            patches,
            conflicts,
            errors,
        }
    }

    pub(crate) fn reconcile_started(&self) {
        self.reconciles.inc();
    }

    pub(crate) fn workload_patched(&self, kind: &'static str, op: &'static str) {
        self.patches.get_or_create(&PatchLabels { kind, op }).inc();
    }

    pub(crate) fn conflict(&self) {
        self.conflicts.inc();
    }

    pub(crate) fn error(&self) {
        self.errors.inc();
    }
}
