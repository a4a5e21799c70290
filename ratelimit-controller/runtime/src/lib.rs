//! Reconciles `RateLimits` policies against the workloads they select.
//!
//! Each pass is driven by a policy identifier and proceeds in order:
//!
//! 1. If the policy's selector narrowed since the last completed pass, the
//!    sidecar is removed from workloads that are no longer selected.
//! 2. Every Deployment or StatefulSet managing a selected pod is patched to
//!    carry the current sidecar.
//! 3. The policy's rate limits are published to the `rl-config` ConfigMap.
//! 4. The current selector is recorded on the policy.
//!
//! A policy that no longer exists has the sidecar removed from every workload
//! in its namespace.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use ratelimit_controller_core as core;
pub use ratelimit_controller_k8s_api as k8s;
pub use ratelimit_controller_k8s_index as index;

mod args;
pub mod cleanup;
pub mod cluster;
mod config;
mod controller;
mod metrics;
pub mod owner;
mod reconcile;
pub mod selector;
pub mod sync;

pub use self::{
    args::Args,
    cluster::{Cluster, KubeCluster},
    controller::Controller,
    metrics::Metrics,
    reconcile::{Pass, Reconciler},
};
