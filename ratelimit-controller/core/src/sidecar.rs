use crate::config;
use ratelimit_controller_k8s_api::{
    api::core::v1::{
        ConfigMapVolumeSource, ContainerPort, EnvVar, ResourceRequirements, VolumeMount,
    },
    apimachinery::pkg::api::resource::Quantity,
    Container, PodTemplateSpec, Volume,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const SIDECAR_NAME: &str = "rl-proxy";
pub const SIDECAR_IMAGE: &str = "ghcr.io/omarfawzi/nginx-ratelimiter-proxy:kube-master";
pub const SIDECAR_PORT: i32 = 80;

/// Pod template annotation holding the content hash of the injected sidecar.
pub const HASH_ANNOTATION: &str = "rl-operator/hash";

pub const CONFIG_MOUNT_PATH: &str = "/usr/local/openresty/nginx/lua/ratelimits.yaml";

pub const CACHE_PREFIX: &str = "CACHE_PREFIX";

pub const REQUIRED_ENV: [&str; 8] = [
    "UPSTREAM_PORT",
    "UPSTREAM_HOST",
    "UPSTREAM_TYPE",
    "CACHE_HOST",
    "CACHE_PORT",
    "CACHE_PROVIDER",
    CACHE_PREFIX,
    "REMOTE_IP_KEY",
];

/// The sidecar's effective environment.
///
/// Keys are ordered so that the rendered container and the content hash do
/// not depend on the order in which overrides were declared.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Env(BTreeMap<String, String>);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("missing required sidecar environment: {}", .missing.join(", "))]
pub struct MissingEnv {
    pub missing: Vec<&'static str>,
}

/// Builds the rate-limiting proxy container.
#[derive(Clone, Debug)]
pub struct Sidecar {
    image: String,
}

// === impl Env ===

impl Env {
    /// Overlays the policy's overrides on the namespace-derived defaults.
    pub fn effective<'a>(
        namespace: &str,
        overrides: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        let mut env = BTreeMap::new();
        env.insert(CACHE_PREFIX.to_string(), namespace.to_string());
        env.extend(overrides.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(env)
    }

    /// Returns the required keys that are absent.
    pub fn missing(&self) -> Vec<&'static str> {
        REQUIRED_ENV
            .iter()
            .copied()
            .filter(|k| !self.0.contains_key(*k))
            .collect()
    }

    pub fn validate(&self) -> Result<(), MissingEnv> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingEnv { missing })
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn to_vars(&self) -> Vec<EnvVar> {
        self.0
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Env {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// === impl Sidecar ===

impl Default for Sidecar {
    fn default() -> Self {
        Self::new(SIDECAR_IMAGE)
    }
}

impl Sidecar {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }

    /// Computes the digest that gates sidecar updates.
    ///
    /// The digest covers the image, the opaque rate limit document, and the
    /// effective environment; the document and environment serialize with
    /// sorted object keys.
    pub fn content_hash(&self, rate_limits: &serde_json::Value, env: &Env) -> String {
        #[derive(Serialize)]
        struct Hashed<'a> {
            image: &'a str,
            env: &'a Env,
            ratelimits: &'a serde_json::Value,
        }

        let bytes = serde_json::to_vec(&Hashed {
            image: &self.image,
            env,
            ratelimits: rate_limits,
        })
        .expect("sidecar configuration must serialize");
        format!("{:x}", Sha256::digest(&bytes))
    }

    pub fn container(&self, env: &Env) -> Container {
        let quantities = |cpu: &str, memory: &str| {
            [
                ("cpu".to_string(), Quantity(cpu.to_string())),
                ("memory".to_string(), Quantity(memory.to_string())),
            ]
            .into_iter()
            .collect::<BTreeMap<_, _>>()
        };

        Container {
            name: SIDECAR_NAME.to_string(),
            image: Some(self.image.clone()),
            env: Some(env.to_vars()),
            resources: Some(ResourceRequirements {
                requests: Some(quantities("100m", "200Mi")),
                limits: Some(quantities("200m", "200Mi")),
                ..Default::default()
            }),
            ports: Some(vec![ContainerPort {
                name: Some(SIDECAR_NAME.to_string()),
                container_port: SIDECAR_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![VolumeMount {
                name: config::CONFIG_MAP_NAME.to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                sub_path: Some(config::CONFIG_KEY.to_string()),
                read_only: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }
}

// === pod templates ===

fn sidecar_index(template: &PodTemplateSpec) -> Option<usize> {
    template
        .spec
        .as_ref()?
        .containers
        .iter()
        .position(|c| c.name == SIDECAR_NAME)
}

pub fn has_sidecar(template: &PodTemplateSpec) -> bool {
    sidecar_index(template).is_some()
}

pub fn template_hash(template: &PodTemplateSpec) -> Option<&str> {
    template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(HASH_ANNOTATION)
        .map(String::as_str)
}

/// Indicates whether the template lacks the sidecar or carries a sidecar
/// built from different configuration.
pub fn needs_update(template: &PodTemplateSpec, hash: &str) -> bool {
    !has_sidecar(template) || template_hash(template) != Some(hash)
}

/// Installs `container` as the sidecar, mounts the shared configuration, and
/// records `hash` on the template.
pub fn inject(template: &mut PodTemplateSpec, container: Container, hash: &str) {
    let idx = sidecar_index(template);
    let spec = template.spec.get_or_insert_with(Default::default);
    match idx {
        Some(idx) => spec.containers[idx] = container,
        None => spec.containers.push(container),
    }

    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    if !volumes.iter().any(|v| v.name == config::CONFIG_MAP_NAME) {
        volumes.push(Volume {
            name: config::CONFIG_MAP_NAME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config::CONFIG_MAP_NAME.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(HASH_ANNOTATION.to_string(), hash.to_string());
}

/// Removes the sidecar, its configuration volume, and the hash annotation.
///
/// Returns false when the template has no sidecar, in which case it is left
/// untouched.
pub fn strip(template: &mut PodTemplateSpec) -> bool {
    if !has_sidecar(template) {
        return false;
    }

    if let Some(spec) = template.spec.as_mut() {
        spec.containers.retain(|c| c.name != SIDECAR_NAME);
        if let Some(volumes) = spec.volumes.as_mut() {
            volumes.retain(|v| v.name != config::CONFIG_MAP_NAME);
        }
        if spec.volumes.as_ref().is_some_and(Vec::is_empty) {
            spec.volumes = None;
        }
    }
    if let Some(annotations) = template
        .metadata
        .as_mut()
        .and_then(|m| m.annotations.as_mut())
    {
        annotations.remove(HASH_ANNOTATION);
    }
    true
}
