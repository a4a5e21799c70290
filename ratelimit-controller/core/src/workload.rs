use ratelimit_controller_k8s_api::{
    Deployment, NamespaceResourceScope, PodTemplateSpec, Resource, ResourceExt, StatefulSet,
};
use serde::{de::DeserializeOwned, Serialize};

/// A namespaced workload that owns a pod template.
pub trait PodTemplateWorkload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn template(&self) -> Option<&PodTemplateSpec>;

    fn template_mut(&mut self) -> Option<&mut PodTemplateSpec>;
}

/// A workload reached by walking a pod's ownership chain.
#[derive(Clone, Debug)]
pub enum Workload {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
}

impl PodTemplateWorkload for Deployment {
    fn template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for StatefulSet {
    fn template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

// === impl Workload ===

impl Workload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deployment(_) => "Deployment",
            Self::StatefulSet(_) => "StatefulSet",
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Deployment(w) => w.name_any(),
            Self::StatefulSet(w) => w.name_any(),
        }
    }

    pub fn template(&self) -> Option<&PodTemplateSpec> {
        match self {
            Self::Deployment(w) => w.template(),
            Self::StatefulSet(w) => w.template(),
        }
    }
}

impl From<Deployment> for Workload {
    fn from(w: Deployment) -> Self {
        Self::Deployment(w)
    }
}

impl From<StatefulSet> for Workload {
    fn from(w: StatefulSet) -> Self {
        Self::StatefulSet(w)
    }
}

/// Computes a JSON merge patch that transforms `original` into `modified`.
///
/// Objects are diffed key by key; removed keys become `null`. Any other value
/// that differs, including arrays, is replaced wholesale.
pub fn merge_diff(original: &serde_json::Value, modified: &serde_json::Value) -> serde_json::Value {
    use serde_json::{Map, Value};

    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => {
            let mut patch = Map::new();
            for (k, v) in modi {
                match orig.get(k) {
                    Some(o) if o == v => {}
                    Some(o) if o.is_object() && v.is_object() => {
                        patch.insert(k.clone(), merge_diff(o, v));
                    }
                    _ => {
                        patch.insert(k.clone(), v.clone());
                    }
                }
            }
            for k in orig.keys() {
                if !modi.contains_key(k) {
                    patch.insert(k.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

/// Builds the merge patch that moves `original` to `modified`, locked to the
/// resource version `original` was read at.
///
/// Returns `None` when the two are identical.
pub fn template_patch<W: PodTemplateWorkload>(
    original: &W,
    modified: &W,
) -> Result<Option<serde_json::Value>, serde_json::Error> {
    let mut patch = merge_diff(
        &serde_json::to_value(original)?,
        &serde_json::to_value(modified)?,
    );
    if patch.as_object().is_some_and(|p| p.is_empty()) {
        return Ok(None);
    }
    if let Some(rv) = original.resource_version() {
        patch
            .as_object_mut()
            .expect("patch must be an object")
            .entry("metadata")
            .or_insert_with(|| serde_json::json!({}))
            .as_object_mut()
            .expect("metadata must be an object")
            .insert("resourceVersion".to_string(), rv.into());
    }
    Ok(Some(patch))
}
