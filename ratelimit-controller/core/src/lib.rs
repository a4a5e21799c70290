//! Rate-limit sidecar injection
//!
//! A `RateLimits` policy selects pods by label. Every workload that owns a selected pod gets the
//! rate-limiting proxy injected into its pod template; workloads that fall out of selection have
//! it removed again.
//!
//! ```text
//! [ RateLimits ] --selects--> [ Pod ] --owned by--> [ ReplicaSet ] --owned by--> [ Deployment ]
//!                                     --owned by--> [ StatefulSet ]
//! ```
//!
//! This crate holds the decisions that do not require talking to the API server: the sidecar's
//! effective environment and content hash, pod template mutations, the shared configuration
//! artifact, and the persisted selector snapshot.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod sidecar;
pub mod snapshot;
pub mod workload;

pub use self::{
    sidecar::{Env, MissingEnv, Sidecar},
    workload::{PodTemplateWorkload, Workload},
};

pub const CONTROLLER_NAME: &str = "rl-operator";
