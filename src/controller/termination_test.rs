//! Tests for ownership hand-off on deletion

use std::sync::atomic::Ordering;

use super::termination::TerminationPolicyEngine;
use crate::crd::{
    ArchiverSpec, BucketSpec, MonitorAgent, MonitorSpec, SearchCluster, StorageProviders,
    TerminationPolicy,
};
use crate::error::Error;
use crate::ports::{OffshootKind, Selection};
use crate::testing::{sample_cluster, FakeWorld, OwnershipCall};

const SELECTOR: &str =
    "app.kubernetes.io/instance=logs,app.kubernetes.io/name=searchclusters.searchdb.dev";

fn cluster_with(policy: TerminationPolicy) -> SearchCluster {
    let mut cluster = sample_cluster("logs");
    cluster.spec.termination_policy = Some(policy);
    cluster
}

fn volumes() -> Selection {
    Selection::Selector(SELECTOR.to_string())
}

fn secrets(names: &[&str]) -> Selection {
    Selection::Names(names.iter().map(|n| n.to_string()).collect())
}

#[tokio::test]
async fn test_do_not_terminate_is_refused() {
    let world = FakeWorld::new();
    let engine = TerminationPolicyEngine::new(world.ports());

    let err = engine
        .terminate(&cluster_with(TerminationPolicy::DoNotTerminate))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PolicyViolation(_)));
    assert!(world.ownership.call_log().is_empty());
}

#[tokio::test]
async fn test_halt_and_pause_keep_volumes_and_secrets() {
    for policy in [TerminationPolicy::Halt, TerminationPolicy::Pause] {
        let world = FakeWorld::new();
        let engine = TerminationPolicyEngine::new(world.ports());

        engine.terminate(&cluster_with(policy)).await.unwrap();

        assert_eq!(
            world.ownership.call_log(),
            vec![
                OwnershipCall::Remove(OffshootKind::PersistentVolumeClaims, volumes()),
                OwnershipCall::Remove(OffshootKind::Secrets, secrets(&["logs-auth"])),
            ],
            "policy {policy}"
        );
    }
}

#[tokio::test]
async fn test_delete_keeps_secrets_and_drops_volumes() {
    let world = FakeWorld::new();
    let engine = TerminationPolicyEngine::new(world.ports());

    engine
        .terminate(&cluster_with(TerminationPolicy::Delete))
        .await
        .unwrap();

    assert_eq!(
        world.ownership.call_log(),
        vec![
            OwnershipCall::Remove(OffshootKind::Secrets, secrets(&["logs-auth"])),
            OwnershipCall::Ensure(OffshootKind::PersistentVolumeClaims, volumes()),
        ]
    );
}

#[tokio::test]
async fn test_wipe_out_drops_everything() {
    let world = FakeWorld::new();
    let engine = TerminationPolicyEngine::new(world.ports());
    let mut cluster = cluster_with(TerminationPolicy::WipeOut);
    cluster.spec.archiver = Some(ArchiverSpec {
        storage: Some(StorageProviders {
            s3: Some(BucketSpec {
                bucket: "backups".to_string(),
                prefix: None,
            }),
            storage_secret_name: Some("s3-creds".to_string()),
            ..Default::default()
        }),
    });

    engine.terminate(&cluster).await.unwrap();

    assert_eq!(
        world.ownership.call_log(),
        vec![
            OwnershipCall::Ensure(OffshootKind::Secrets, secrets(&["logs-auth", "s3-creds"])),
            OwnershipCall::Ensure(OffshootKind::PersistentVolumeClaims, volumes()),
        ]
    );
}

#[tokio::test]
async fn test_no_secret_calls_without_secret_references() {
    let world = FakeWorld::new();
    let engine = TerminationPolicyEngine::new(world.ports());
    let mut cluster = cluster_with(TerminationPolicy::Delete);
    cluster.spec.database_secret = None;

    engine.terminate(&cluster).await.unwrap();

    assert_eq!(
        world.ownership.call_log(),
        vec![OwnershipCall::Ensure(
            OffshootKind::PersistentVolumeClaims,
            volumes()
        )]
    );
}

#[tokio::test]
async fn test_monitor_removal_failure_is_logged_only() {
    let world = FakeWorld::new();
    world.monitor.fail.store(true, Ordering::SeqCst);
    let engine = TerminationPolicyEngine::new(world.ports());
    let mut cluster = cluster_with(TerminationPolicy::Delete);
    cluster.spec.monitor = Some(MonitorSpec {
        agent: MonitorAgent::PrometheusBuiltin,
        prometheus: None,
    });

    engine.terminate(&cluster).await.unwrap();

    assert_eq!(world.monitor.deleted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_monitor_untouched_when_not_configured() {
    let world = FakeWorld::new();
    let engine = TerminationPolicyEngine::new(world.ports());

    engine
        .terminate(&cluster_with(TerminationPolicy::WipeOut))
        .await
        .unwrap();

    assert_eq!(world.monitor.deleted.load(Ordering::SeqCst), 0);
}
