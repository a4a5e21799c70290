use crate::{
    cluster::KubeCluster,
    controller::Controller,
    index::Index,
    k8s::{self, Client, Resource},
    metrics::Metrics,
    reconcile::Reconciler,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use ratelimit_controller_core::{sidecar::SIDECAR_IMAGE, Sidecar};
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "ratelimit-controller",
    about = "Injects rate-limiting proxy sidecars into workloads selected by RateLimits policies"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "ratelimit=info,warn",
        env = "RATELIMIT_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The rate-limiting proxy image injected into selected pods.
    #[clap(long, default_value = SIDECAR_IMAGE)]
    sidecar_image: String,

    /// The maximum number of policies reconciled at once.
    #[clap(long, default_value = "4")]
    reconcile_concurrency: usize,

    /// How long to wait before reconciling a policy whose last pass failed.
    #[clap(long, default_value = "10000")]
    retry_delay_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            sidecar_image,
            reconcile_concurrency,
            retry_delay_ms,
        } = self;

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("ratelimit_controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        if !api_resource_exists::<k8s::RateLimits>(&runtime.client()).await {
            bail!("ratelimits.nginx.ratelimiter resource kind not found");
        }

        // Every change to a policy, or to a workload a policy selects, is
        // turned into a policy identifier for the controller to reconcile.
        let (triggers_tx, triggers_rx) = mpsc::unbounded_channel();
        let index = Index::shared(triggers_tx.clone());

        // Spawn resource watches.

        let policies = runtime.watch_all::<k8s::RateLimits>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), policies).instrument(info_span!("ratelimits")),
        );

        let deployments = runtime.watch_all::<k8s::Deployment>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), deployments)
                .instrument(info_span!("deployments")),
        );

        let statefulsets = runtime.watch_all::<k8s::StatefulSet>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index, statefulsets).instrument(info_span!("statefulsets")),
        );

        let reconciler = Reconciler::new(
            KubeCluster::new(runtime.client()),
            Sidecar::new(sidecar_image),
            metrics,
        );
        let controller = Controller::new(
            reconciler,
            triggers_tx,
            triggers_rx,
            reconcile_concurrency,
            Duration::from_millis(retry_delay_ms),
        );
        tokio::spawn(
            controller
                .run(runtime.shutdown_handle())
                .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
