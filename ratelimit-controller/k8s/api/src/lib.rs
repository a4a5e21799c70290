#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod ratelimits;

pub use self::{
    labels::{InvalidSelector, Labels, Selector},
    ratelimits::{RateLimits, RateLimitsSpec},
};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{Deployment, ReplicaSet, StatefulSet},
        core::v1::{ConfigMap, Container, Pod, PodSpec, PodTemplateSpec, Volume},
    },
    apimachinery::{self, pkg::apis::meta::v1::OwnerReference},
    NamespaceResourceScope,
};
pub use kube::{
    api::{ObjectMeta, Resource, ResourceExt},
    Client, Error,
};
