//! Main reconciler for SearchCluster resources
//!
//! Implements the controller pattern using kube-rs runtime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{error, info, instrument};

use super::finalizers::SEARCH_CLUSTER_FINALIZER;
use super::kube_ports::{kube_ports, RequeueSlot};
use super::lifecycle::{LifecycleStateMachine, PassOutcome};
use super::termination::TerminationPolicyEngine;
use crate::crd::SearchCluster;
use crate::error::{Error, Result};

/// Periodic resync of an otherwise quiet cluster.
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

#[cfg(feature = "metrics")]
const CONTROLLER_NAME: &str = "searchcluster";

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    lifecycle: LifecycleStateMachine,
    termination: TerminationPolicyEngine,
    requeue: Arc<RequeueSlot>,
}

impl ControllerState {
    pub fn new(client: Client, settle_interval: Duration) -> Self {
        let (ports, requeue) = kube_ports(client.clone());
        Self {
            client,
            lifecycle: LifecycleStateMachine::new(ports.clone(), settle_interval),
            termination: TerminationPolicyEngine::new(ports),
            requeue,
        }
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>, namespace: Option<String>) -> Result<()> {
    let client = state.client.clone();
    let clusters: Api<SearchCluster> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    info!("Starting SearchCluster controller");

    // Verify CRD exists
    match clusters.list(&Default::default()).await {
        Ok(_) => info!("SearchCluster CRD is available"),
        Err(e) => {
            error!(
                "SearchCluster CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "SearchCluster CRD not installed".to_string(),
            ));
        }
    }

    let (statefulsets, services): (Api<StatefulSet>, Api<Service>) = match namespace.as_deref() {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    Controller::new(clusters, Config::default())
        // Watch owned resources for changes
        .owns(statefulsets, Config::default())
        .owns(services, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - A SearchCluster is created, updated, or deleted
/// - An owned StatefulSet or Service changes
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<SearchCluster>, ctx: Arc<ControllerState>) -> Result<Action> {
    let started = Instant::now();
    let namespace = obj.namespace_or_default();
    let api: Api<SearchCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    info!("Reconciling SearchCluster {}", obj.key());

    let result = finalizer(&api, SEARCH_CLUSTER_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(cluster) => apply_cluster(&ctx, &cluster).await,
            FinalizerEvent::Cleanup(cluster) => cleanup_cluster(&ctx, &cluster).await,
        }
    })
    .await
    .map_err(Error::from);

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(
        CONTROLLER_NAME,
        started.elapsed().as_secs_f64(),
    );
    #[cfg(not(feature = "metrics"))]
    let _ = started;

    result
}

async fn apply_cluster(ctx: &ControllerState, cluster: &SearchCluster) -> Result<Action> {
    let outcome = ctx.lifecycle.reconcile(cluster).await?;
    info!("SearchCluster {} pass finished: {:?}", cluster.key(), outcome);

    // An explicit retry requested during the pass wins over the resync.
    if let Some(delay) = ctx.requeue.take(&cluster.key()) {
        return Ok(Action::requeue(delay));
    }
    Ok(match outcome {
        PassOutcome::Invalid => Action::await_change(),
        _ => Action::requeue(RESYNC_INTERVAL),
    })
}

async fn cleanup_cluster(ctx: &ControllerState, cluster: &SearchCluster) -> Result<Action> {
    info!("Cleaning up SearchCluster {}", cluster.key());
    ctx.lifecycle.mark_terminating(cluster).await;
    ctx.termination.terminate(cluster).await?;
    Ok(Action::await_change())
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(cluster: Arc<SearchCluster>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", cluster.name_any(), error);

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(CONTROLLER_NAME, error.kind());

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
