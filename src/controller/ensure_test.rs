//! Tests for the convergence engine

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::ensure::{aggregate, EnsureEngine, TopologyOutcome, Verb, SECRET_RETRY_DELAY};
use crate::crd::{NodeRoleSpec, Topology};
use crate::error::Error;
use crate::testing::{sample_cluster, FakeWorld};

fn engine(world: &FakeWorld) -> EnsureEngine {
    EnsureEngine::new(world.ports()).with_settle_interval(Duration::ZERO)
}

#[test]
fn test_aggregate_verbs() {
    use Verb::*;

    assert_eq!(aggregate(&[Created, Created, Created]), Created);
    assert_eq!(aggregate(&[Created, Unchanged]), Unchanged);
    assert_eq!(aggregate(&[Created, Patched]), Patched);
    assert_eq!(aggregate(&[Unchanged, Patched, Unchanged]), Patched);
    assert_eq!(aggregate(&[Unchanged, Unchanged]), Unchanged);
    assert_eq!(aggregate(&[]), Unchanged);
}

#[tokio::test]
async fn test_first_pass_creates_everything_in_order() {
    let world = FakeWorld::new();
    let cluster = sample_cluster("logs");

    let outcome = engine(&world).ensure_topology(&cluster).await.unwrap();

    assert_eq!(
        outcome,
        TopologyOutcome::Converged {
            service: Verb::Created,
            nodes: Verb::Created,
        }
    );
    assert_eq!(
        world.resources.call_log(),
        vec![
            "governing-service",
            "client-service",
            "certificate-secret",
            "database-secret",
            "secrets-available",
            "config",
            "rbac",
            "node-set/logs",
        ]
    );
}

#[tokio::test]
async fn test_second_pass_is_unchanged() {
    let world = FakeWorld::new();
    let cluster = sample_cluster("logs");
    let engine = engine(&world);

    engine.ensure_topology(&cluster).await.unwrap();
    let outcome = engine.ensure_topology(&cluster).await.unwrap();

    assert_eq!(
        outcome,
        TopologyOutcome::Converged {
            service: Verb::Unchanged,
            nodes: Verb::Unchanged,
        }
    );
}

#[tokio::test]
async fn test_spec_change_patches_node_set() {
    let world = FakeWorld::new();
    let mut cluster = sample_cluster("logs");
    let engine = engine(&world);

    engine.ensure_topology(&cluster).await.unwrap();
    cluster.spec.replicas = Some(3);
    let outcome = engine.ensure_topology(&cluster).await.unwrap();

    assert_eq!(outcome.verb(), Verb::Patched);
}

#[tokio::test]
async fn test_topology_node_sets_in_client_master_data_order() {
    let world = FakeWorld::new();
    let mut cluster = sample_cluster("logs");
    cluster.spec.replicas = None;
    cluster.spec.topology = Some(Topology {
        master: NodeRoleSpec {
            replicas: Some(3),
            ..Default::default()
        },
        data: NodeRoleSpec {
            replicas: Some(2),
            ..Default::default()
        },
        client: NodeRoleSpec {
            replicas: Some(1),
            ..Default::default()
        },
    });

    engine(&world).ensure_topology(&cluster).await.unwrap();

    let node_sets: Vec<String> = world
        .resources
        .call_log()
        .into_iter()
        .filter(|c| c.starts_with("node-set/"))
        .collect();
    assert_eq!(
        node_sets,
        vec!["node-set/client-logs", "node-set/master-logs", "node-set/data-logs"]
    );
}

#[tokio::test]
async fn test_custom_prefix_topology_second_pass_is_unchanged() {
    let world = FakeWorld::new();
    let mut cluster = sample_cluster("logs");
    cluster.spec.replicas = None;
    let mut topology = Topology::default();
    topology.client.prefix = Some("ingest".to_string());
    topology.data.prefix = Some("hot".to_string());
    cluster.spec.topology = Some(topology);
    let engine = engine(&world);

    engine.ensure_topology(&cluster).await.unwrap();
    let outcome = engine.ensure_topology(&cluster).await.unwrap();

    assert_eq!(
        outcome,
        TopologyOutcome::Converged {
            service: Verb::Unchanged,
            nodes: Verb::Unchanged,
        }
    );
    let node_sets: Vec<String> = world
        .resources
        .call_log()
        .into_iter()
        .filter(|c| c.starts_with("node-set/"))
        .take(3)
        .collect();
    assert_eq!(
        node_sets,
        vec!["node-set/ingest-logs", "node-set/master-logs", "node-set/hot-logs"]
    );
}

#[tokio::test]
async fn test_mixed_node_set_verbs_aggregate() {
    let world = FakeWorld::new();
    let mut cluster = sample_cluster("logs");
    cluster.spec.replicas = None;
    cluster.spec.topology = Some(Topology::default());
    world
        .resources
        .node_set_verbs
        .lock()
        .unwrap()
        .insert("data-logs".to_string(), Verb::Unchanged);

    let outcome = engine(&world).ensure_topology(&cluster).await.unwrap();

    assert_eq!(outcome.verb(), Verb::Unchanged);
}

#[tokio::test]
async fn test_missing_secrets_schedule_retry() {
    let world = FakeWorld::new();
    world.resources.secrets_ready.store(false, Ordering::SeqCst);
    let cluster = sample_cluster("logs");

    let outcome = engine(&world).ensure_topology(&cluster).await.unwrap();

    assert_eq!(outcome, TopologyOutcome::Pending);
    assert_eq!(
        *world.scheduler.scheduled.lock().unwrap(),
        vec![("default/logs".to_string(), SECRET_RETRY_DELAY)]
    );
    // Nothing past the secret check was touched.
    let calls = world.resources.call_log();
    assert_eq!(calls.last().map(String::as_str), Some("secrets-available"));
    assert!(!calls.iter().any(|c| c.starts_with("node-set/")));
}

#[tokio::test]
async fn test_generated_secret_flows_into_node_sets() {
    let world = FakeWorld::new();
    world.resources.generate_secret.store(true, Ordering::SeqCst);
    let mut cluster = sample_cluster("logs");
    cluster.spec.database_secret = None;

    let outcome = engine(&world).ensure_topology(&cluster).await.unwrap();

    assert_eq!(outcome.verb(), Verb::Created);
}

#[tokio::test]
async fn test_step_failure_stops_the_pass() {
    let world = FakeWorld::new();
    *world.resources.fail_step.lock().unwrap() = Some("rbac".to_string());
    let cluster = sample_cluster("logs");

    let err = engine(&world).ensure_topology(&cluster).await.unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));
    assert!(!world
        .resources
        .call_log()
        .iter()
        .any(|c| c.starts_with("node-set/")));
}

#[tokio::test]
async fn test_unknown_version_is_not_found() {
    let world = FakeWorld::new();
    let mut cluster = sample_cluster("logs");
    cluster.spec.version = "0.0.1".to_string();

    let err = engine(&world).ensure_topology(&cluster).await.unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_converged_pass_waits_for_settle_interval() {
    let world = FakeWorld::new();
    let cluster = sample_cluster("logs");
    let settle = Duration::from_secs(30);
    let engine = EnsureEngine::new(world.ports()).with_settle_interval(settle);

    let started = tokio::time::Instant::now();
    let outcome = engine.ensure_topology(&cluster).await.unwrap();
    assert_eq!(outcome.verb(), Verb::Created);
    assert!(started.elapsed() >= settle, "{:?}", started.elapsed());

    let started = tokio::time::Instant::now();
    let outcome = engine.ensure_topology(&cluster).await.unwrap();
    assert_eq!(outcome.verb(), Verb::Unchanged);
    assert!(started.elapsed() >= settle, "{:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_pending_pass_skips_settle_interval() {
    let world = FakeWorld::new();
    world.resources.secrets_ready.store(false, Ordering::SeqCst);
    let cluster = sample_cluster("logs");
    let engine = EnsureEngine::new(world.ports()).with_settle_interval(Duration::from_secs(30));

    let started = tokio::time::Instant::now();
    let outcome = engine.ensure_topology(&cluster).await.unwrap();

    assert_eq!(outcome, TopologyOutcome::Pending);
    assert!(started.elapsed() < Duration::from_secs(30));
}
