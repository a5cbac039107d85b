//! Idempotent convergence of a cluster's workloads
//!
//! Every step is a create-or-patch that reports a [`Verb`]. A pass may be
//! repeated from scratch at any time; nothing here relies on a previous pass
//! having completed.

use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::nodes::NodeSpecBuilder;
use crate::crd::SearchCluster;
use crate::error::Result;
use crate::ports::Ports;

/// Delay before re-checking secrets issued by another controller.
pub const SECRET_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Time given to freshly started nodes to form a cluster.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of one create-or-patch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Unchanged,
    Created,
    Patched,
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verb::Unchanged => write!(f, "Unchanged"),
            Verb::Created => write!(f, "Created"),
            Verb::Patched => write!(f, "Patched"),
        }
    }
}

/// `Created` only if every verb is `Created`, `Patched` if any is `Patched`,
/// otherwise `Unchanged`.
pub fn aggregate(verbs: &[Verb]) -> Verb {
    if !verbs.is_empty() && verbs.iter().all(|v| *v == Verb::Created) {
        Verb::Created
    } else if verbs.contains(&Verb::Patched) {
        Verb::Patched
    } else {
        Verb::Unchanged
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopologyOutcome {
    /// Required secrets are not readable yet; a retry has been scheduled.
    Pending,
    Converged { service: Verb, nodes: Verb },
}

impl TopologyOutcome {
    /// Aggregated node-set verb; a pending pass changed nothing.
    pub fn verb(&self) -> Verb {
        match self {
            TopologyOutcome::Pending => Verb::Unchanged,
            TopologyOutcome::Converged { nodes, .. } => *nodes,
        }
    }
}

pub struct EnsureEngine {
    ports: Ports,
    settle_interval: Duration,
}

impl EnsureEngine {
    pub fn new(ports: Ports) -> Self {
        Self {
            ports,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
        }
    }

    pub fn with_settle_interval(mut self, settle_interval: Duration) -> Self {
        self.settle_interval = settle_interval;
        self
    }

    /// Converge services, secrets, configuration, RBAC and node sets.
    #[instrument(skip(self, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
    pub async fn ensure_topology(&self, cluster: &SearchCluster) -> Result<TopologyOutcome> {
        let resources = &self.ports.resources;

        resources.ensure_governing_service(cluster).await?;
        let service = resources.ensure_client_service(cluster).await?;

        // Generated secret references are persisted by the ensurer; node
        // sets built in this pass must already see them.
        let mut working = cluster.clone();
        if let Some(cert) = resources.ensure_certificate_secret(&working).await? {
            working.spec.certificate_secret = Some(cert);
        }
        if let Some(auth) = resources.ensure_database_secret(&working).await? {
            working.spec.database_secret = Some(auth);
        }
        if !resources.secrets_available(&working).await? {
            info!(
                "Secrets for {} not available yet, retrying in {:?}",
                working.key(),
                SECRET_RETRY_DELAY
            );
            self.ports
                .scheduler
                .schedule_after(&working.key(), SECRET_RETRY_DELAY);
            return Ok(TopologyOutcome::Pending);
        }

        resources.ensure_default_config(&working).await?;
        resources.ensure_rbac(&working).await?;

        let version = self.ports.catalog.get_version(&working.spec.version).await?;
        let node_sets = NodeSpecBuilder::new(&working, &version.spec.version).node_sets();

        let mut verbs = Vec::with_capacity(node_sets.len());
        for node_set in &node_sets {
            let verb = resources.ensure_node_set(&working, node_set).await?;
            debug!("Node set {} ({}): {}", node_set.name, node_set.role, verb);
            #[cfg(feature = "metrics")]
            super::metrics::inc_ensure_verb(verb);
            verbs.push(verb);
        }
        let nodes = aggregate(&verbs);

        // Nodes need time to find each other before the pass reports success.
        if !self.settle_interval.is_zero() {
            info!(
                "Waiting {:?} for {} to form a cluster",
                self.settle_interval,
                working.key()
            );
            tokio::time::sleep(self.settle_interval).await;
        }

        Ok(TopologyOutcome::Converged { service, nodes })
    }
}
