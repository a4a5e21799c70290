use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use ratelimit_controller_core::CONTROLLER_NAME;
use ratelimit_controller_k8s_api::{
    self as k8s, NamespaceResourceScope, Resource, ResourceExt, Selector,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// A namespaced resource that may be read and written through a [`Cluster`].
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> Object for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The object was modified after it was read.
    #[error("the object has been modified")]
    Conflict,

    #[error(transparent)]
    Kube(kube::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The API server operations the reconciler depends on.
#[async_trait]
pub trait Cluster: Clone + Send + Sync + 'static {
    /// Reads an object, returning `None` if it does not exist.
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>;

    /// Lists the objects in `namespace`, optionally restricted by a label selector.
    async fn list<K: Object>(
        &self,
        namespace: &str,
        selector: Option<&Selector>,
    ) -> Result<Vec<K>, Error>;

    /// Applies a JSON merge patch. A patch that names a stale
    /// `metadata.resourceVersion` fails with [`Error::Conflict`].
    async fn patch<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, Error>;

    /// Creates or replaces the fields this controller owns on `object`.
    async fn apply<K: Object>(&self, object: &K) -> Result<K, Error>;
}

/// A [`Cluster`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: k8s::Client,
}

// === impl Error ===

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 409 => Self::Conflict,
            error => Self::Kube(error),
        }
    }
}

// === impl KubeCluster ===

impl KubeCluster {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K: Object>(
        &self,
        namespace: &str,
        selector: Option<&Selector>,
    ) -> Result<Vec<K>, Error> {
        let params = match selector {
            Some(selector) => ListParams::default().labels(&selector.to_string()),
            None => ListParams::default(),
        };
        let list = self.api::<K>(namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn patch<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, Error> {
        let params = PatchParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        Ok(self
            .api::<K>(namespace)
            .patch(name, &params, &Patch::Merge(patch))
            .await?)
    }

    async fn apply<K: Object>(&self, object: &K) -> Result<K, Error> {
        let namespace = object.namespace().unwrap_or_default();
        let params = PatchParams::apply(CONTROLLER_NAME).force();
        Ok(self
            .api::<K>(&namespace)
            .patch(&object.name_any(), &params, &Patch::Apply(object))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "error".to_string(),
            reason: "Failure".to_string(),
            code,
        })
    }

    #[test]
    fn conflicts_are_distinguished_from_other_api_errors() {
        assert!(Error::from(api_error(409)).is_conflict());

        let error = Error::from(api_error(500));
        assert!(!error.is_conflict());
        assert!(matches!(error, Error::Kube(kube::Error::Api(ref e)) if e.code == 500));
    }
}
