use super::*;
use crate::owner;
use ratelimit_controller_core::Workload;

fn resolved(workload: Option<Workload>) -> Option<(&'static str, String)> {
    workload.map(|w| (w.kind(), w.name()))
}

#[tokio::test]
async fn resolves_deployments_through_replicasets() {
    let cluster = FakeCluster::default();
    add_deployment(&cluster, "web", &[("app", "web")]);
    let pod = cluster.read::<Pod>(NS, "web-5d4f-x7k2p");

    assert_eq!(
        resolved(owner::resolve(&cluster, &pod).await),
        Some(("Deployment", "web".to_string())),
    );
}

#[tokio::test]
async fn resolves_statefulsets_directly() {
    let cluster = FakeCluster::default();
    add_statefulset(&cluster, "cache", &[("app", "cache")]);
    let pod = cluster.read::<Pod>(NS, "cache-0");

    assert_eq!(
        resolved(owner::resolve(&cluster, &pod).await),
        Some(("StatefulSet", "cache".to_string())),
    );
}

#[tokio::test]
async fn ignores_unmanaged_pods() {
    let cluster = FakeCluster::default();

    // A bare pod.
    let bare = mk_pod("bare", &[("app", "web")], None);
    assert!(owner::resolve(&cluster, &bare).await.is_none());

    // A ReplicaSet that is not controlled by a Deployment.
    cluster.insert(mk_replicaset("orphan", None));
    let orphaned = mk_pod("orphan-abc", &[], Some(("ReplicaSet", "orphan")));
    assert!(owner::resolve(&cluster, &orphaned).await.is_none());

    // Controllers that are not managed.
    let job = mk_pod("job-abc", &[], Some(("Job", "job")));
    assert!(owner::resolve(&cluster, &job).await.is_none());
    let ds = mk_pod("ds-abc", &[], Some(("DaemonSet", "ds")));
    assert!(owner::resolve(&cluster, &ds).await.is_none());

    // Owners that no longer exist.
    let gone = mk_pod("gone-abc", &[], Some(("ReplicaSet", "gone")));
    assert!(owner::resolve(&cluster, &gone).await.is_none());
    let gone = mk_pod("gone-0", &[], Some(("StatefulSet", "gone")));
    assert!(owner::resolve(&cluster, &gone).await.is_none());
}

#[tokio::test]
async fn only_follows_controller_references() {
    let cluster = FakeCluster::default();
    cluster.insert(mk_statefulset("cache", &[]));

    let mut pod = mk_pod("cache-0", &[], Some(("StatefulSet", "cache")));
    for owner in pod.metadata.owner_references.iter_mut().flatten() {
        owner.controller = None;
    }
    assert!(owner::resolve(&cluster, &pod).await.is_none());
}

#[tokio::test]
async fn stops_after_two_hops() {
    let cluster = FakeCluster::default();
    // A ReplicaSet controlled by another ReplicaSet is never followed to a
    // Deployment.
    let mut inner = mk_replicaset("inner", None);
    inner.metadata.owner_references = mk_pod("", &[], Some(("ReplicaSet", "outer")))
        .metadata
        .owner_references;
    cluster.insert(inner);
    cluster.insert(mk_replicaset("outer", Some("web")));
    cluster.insert(mk_deployment("web", &[]));

    let pod = mk_pod("inner-abc", &[], Some(("ReplicaSet", "inner")));
    assert!(owner::resolve(&cluster, &pod).await.is_none());
}

#[tokio::test]
async fn deduplicates_workloads() {
    let cluster = FakeCluster::default();
    add_deployment(&cluster, "web", &[("app", "web")]);
    cluster.insert(mk_pod(
        "web-5d4f-q9z8r",
        &[("app", "web")],
        Some(("ReplicaSet", "web-5d4f")),
    ));
    add_statefulset(&cluster, "cache", &[("app", "web")]);

    let pods = cluster
        .list::<Pod>(NS, None)
        .await
        .expect("pods must list");
    assert_eq!(pods.len(), 3);

    let workloads = owner::resolve_distinct(&cluster, &pods)
        .await
        .into_iter()
        .map(|w| (w.kind(), w.name()))
        .collect::<Vec<_>>();
    assert_eq!(
        workloads,
        vec![
            ("StatefulSet", "cache".to_string()),
            ("Deployment", "web".to_string()),
        ],
    );
}
