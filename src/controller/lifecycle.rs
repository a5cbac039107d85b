//! Lifecycle phase handling: create, restore wait, run, halt
//!
//! Phases move `Creating -> (Initializing) -> Running -> Halted` and back to
//! `Running` on resume. `Terminating` is written only from the cleanup path.

use std::time::Duration;

use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use super::ensure::{EnsureEngine, TopologyOutcome, Verb};
use crate::crd::{DatabasePhase, SearchCluster, SearchClusterStatus, TerminationPolicy};
use crate::error::{Error, Result};
use crate::ports::{EventType, Ports};
use crate::validation::SpecValidator;

pub const REASON_INVALID: &str = "Invalid";
pub const REASON_SUCCESSFUL: &str = "Successful";
pub const REASON_FAILED_TO_CREATE: &str = "FailedToCreate";
pub const REASON_HALTED: &str = "Halted";

/// Where a pass left the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// Spec failed strict validation; nothing was touched.
    Invalid,
    /// Waiting on secrets; a retry has been scheduled.
    Pending,
    /// Waiting on an external restore.
    Initializing,
    Running,
    Halted,
}

pub struct LifecycleStateMachine {
    ports: Ports,
    validator: SpecValidator,
    engine: EnsureEngine,
}

impl LifecycleStateMachine {
    pub fn new(ports: Ports, settle_interval: Duration) -> Self {
        let validator = SpecValidator::new(ports.catalog.clone(), ports.secrets.clone());
        let engine = EnsureEngine::new(ports.clone()).with_settle_interval(settle_interval);
        Self {
            ports,
            validator,
            engine,
        }
    }

    /// Route a pass: halt a running or halted cluster that asks for it,
    /// otherwise create or resume.
    pub async fn reconcile(&self, cluster: &SearchCluster) -> Result<PassOutcome> {
        let halt_requested = cluster.spec.halted
            && matches!(
                cluster.phase(),
                Some(DatabasePhase::Running | DatabasePhase::Halted)
            );
        if halt_requested {
            self.halt(cluster).await?;
            Ok(PassOutcome::Halted)
        } else {
            self.create(cluster).await
        }
    }

    #[instrument(skip(self, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
    pub async fn create(&self, cluster: &SearchCluster) -> Result<PassOutcome> {
        if let Err(e) = self.validator.validate(cluster, true).await {
            return match e {
                Error::ValidationError(_) | Error::NotFound { .. } => {
                    error!("SearchCluster {} is invalid: {}", cluster.key(), e);
                    self.ports
                        .events
                        .publish(cluster, EventType::Warning, REASON_INVALID, &e.to_string())
                        .await;
                    Ok(PassOutcome::Invalid)
                }
                other => Err(other),
            };
        }

        let mut current = cluster.clone();
        if current.phase().is_none() {
            current = self
                .transition(&current, DatabasePhase::Creating, false)
                .await?;
        }

        let (service, nodes) = match self.engine.ensure_topology(&current).await? {
            TopologyOutcome::Pending => return Ok(PassOutcome::Pending),
            TopologyOutcome::Converged { service, nodes } => (service, nodes),
        };

        if service == Verb::Created && nodes == Verb::Created {
            self.ports
                .events
                .publish(
                    &current,
                    EventType::Normal,
                    REASON_SUCCESSFUL,
                    "Successfully created SearchCluster",
                )
                .await;
        } else if service == Verb::Patched || nodes == Verb::Patched {
            self.ports
                .events
                .publish(
                    &current,
                    EventType::Normal,
                    REASON_SUCCESSFUL,
                    "Successfully patched SearchCluster",
                )
                .await;
        }

        if let Some(session) = current.spec.restore_session() {
            if !current.is_initialized() {
                if current.phase() != Some(DatabasePhase::Initializing) {
                    info!(
                        "SearchCluster {} waits for restore session {}",
                        current.key(),
                        session
                    );
                    self.transition(&current, DatabasePhase::Initializing, false)
                        .await?;
                }
                return Ok(PassOutcome::Initializing);
            }
        }

        current = self
            .transition(&current, DatabasePhase::Running, true)
            .await?;

        if current.spec.monitor.is_some() {
            if let Err(e) = self.ports.monitor.ensure_monitor(&current).await {
                warn!("Failed to set up monitoring for {}: {}", current.key(), e);
                self.ports
                    .events
                    .publish(
                        &current,
                        EventType::Warning,
                        REASON_FAILED_TO_CREATE,
                        &format!("Failed to manage monitoring system. Reason: {e}"),
                    )
                    .await;
            }
        }

        Ok(PassOutcome::Running)
    }

    /// Quiesce the workload and mark the cluster `Halted`. Only legal under
    /// the `Halt` termination policy.
    #[instrument(skip(self, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
    pub async fn halt(&self, cluster: &SearchCluster) -> Result<()> {
        if cluster.spec.termination_policy != Some(TerminationPolicy::Halt) {
            return Err(Error::PolicyViolation(
                "can't halt SearchCluster. 'spec.terminationPolicy' is not 'Halt'".to_string(),
            ));
        }
        if cluster.phase() == Some(DatabasePhase::Halted) {
            return Ok(());
        }
        if !DatabasePhase::can_transition(cluster.phase(), DatabasePhase::Halted) {
            return Err(invalid_transition(cluster.phase(), DatabasePhase::Halted));
        }

        info!("Halting SearchCluster {}", cluster.key());
        self.ports.quiescer.halt_database(cluster).await?;
        self.ports.quiescer.wait_until_paused(cluster).await?;

        info!("Updating status of SearchCluster {} to Halted", cluster.key());
        self.transition(cluster, DatabasePhase::Halted, false).await?;
        self.ports
            .events
            .publish(cluster, EventType::Normal, REASON_HALTED, "SearchCluster halted")
            .await;
        Ok(())
    }

    /// Best-effort `Terminating` stamp before cleanup runs.
    pub async fn mark_terminating(&self, cluster: &SearchCluster) {
        if let Err(e) = self
            .transition(cluster, DatabasePhase::Terminating, false)
            .await
        {
            warn!("Failed to mark {} as Terminating: {}", cluster.key(), e);
        }
    }

    async fn transition(
        &self,
        cluster: &SearchCluster,
        to: DatabasePhase,
        stamp_generation: bool,
    ) -> Result<SearchCluster> {
        let from = cluster.phase();
        if !DatabasePhase::can_transition(from, to) {
            return Err(invalid_transition(from, to));
        }
        let generation = cluster.metadata.generation;
        let mutate = move |status: &mut SearchClusterStatus| {
            status.phase = Some(to);
            status.reason = None;
            if stamp_generation {
                status.observed_generation = generation;
            }
        };
        self.ports.status.update_status(cluster, &mutate).await
    }
}

fn invalid_transition(from: Option<DatabasePhase>, to: DatabasePhase) -> Error {
    Error::InvalidTransition {
        from: from
            .map(|p| p.to_string())
            .unwrap_or_else(|| "<none>".to_string()),
        to: to.to_string(),
    }
}
