use super::*;
use crate::Controller;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::{
    sync::{mpsc, Semaphore},
    time::Duration,
};

/// Holds every pass at its first read of the policy until the test opens
/// the gate, counting the passes that got that far.
#[derive(Clone)]
struct Gated {
    inner: FakeCluster,
    gate: Arc<Semaphore>,
    passes: Arc<AtomicUsize>,
}

impl Gated {
    fn new(inner: FakeCluster) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
            passes: Arc::default(),
        }
    }

    fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cluster for Gated {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error> {
        if K::kind(&()) == "RateLimits" {
            self.passes.fetch_add(1, Ordering::SeqCst);
            self.gate
                .acquire()
                .await
                .expect("gate must not be closed")
                .forget();
        }
        self.inner.get(namespace, name).await
    }

    async fn list<K: Object>(
        &self,
        namespace: &str,
        selector: Option<&Selector>,
    ) -> Result<Vec<K>, Error> {
        self.inner.list(namespace, selector).await
    }

    async fn patch<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, Error> {
        self.inner.patch(namespace, name, patch).await
    }

    async fn apply<K: Object>(&self, object: &K) -> Result<K, Error> {
        self.inner.apply(object).await
    }
}

fn web_selector() -> Selector {
    Selector::from_iter(Some(("app", "web")))
}

async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn controller_reconciles_triggered_policies() {
    let cluster = FakeCluster::default();
    add_deployment(&cluster, "web", &[("app", "web")]);
    cluster.insert(mk_policy("limits", web_selector(), complete_env()));

    let (tx, rx) = mpsc::unbounded_channel();
    let controller = Controller::new(
        mk_reconciler(&cluster),
        tx.clone(),
        rx,
        2,
        Duration::from_secs(10),
    );
    let (signal, watch) = drain::channel();
    let task = tokio::spawn(controller.run(watch));

    tx.send(policy_id("limits")).expect("controller must be running");
    for _ in 0..100 {
        if !cluster.writes_to::<RateLimits>().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(cluster.writes_to::<Deployment>(), vec!["web"]);
    assert_eq!(cluster.writes_to::<RateLimits>(), vec!["limits"]);

    signal.drain().await;
    task.await.expect("controller must not panic");
}

#[tokio::test]
async fn passes_for_one_policy_never_overlap() {
    let cluster = FakeCluster::default();
    add_deployment(&cluster, "web", &[("app", "web")]);
    cluster.insert(mk_policy("limits", web_selector(), complete_env()));
    cluster.insert(mk_policy(
        "other",
        Selector::from_iter(Some(("app", "batch"))),
        complete_env(),
    ));

    let gated = Gated::new(cluster.clone());
    let (tx, rx) = mpsc::unbounded_channel();
    let controller = Controller::new(
        Reconciler::new(gated.clone(), Sidecar::default(), Metrics::default()),
        tx.clone(),
        rx,
        4,
        Duration::from_secs(10),
    );
    let (signal, watch) = drain::channel();
    let task = tokio::spawn(controller.run(watch));

    for _ in 0..3 {
        tx.send(policy_id("limits")).expect("controller must be running");
    }
    tx.send(policy_id("other")).expect("controller must be running");
    settle().await;
    assert_eq!(
        gated.passes(),
        2,
        "one pass per policy may run while the first is still in progress"
    );

    gated.gate.add_permits(10);
    settle().await;
    assert_eq!(
        gated.passes(),
        3,
        "triggers received during a pass coalesce into a single rerun"
    );
    assert_eq!(cluster.writes_to::<Deployment>(), vec!["web"]);

    signal.drain().await;
    task.await.expect("controller must not panic");
}
