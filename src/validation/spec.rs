//! Semantic validation of a SearchCluster spec
//!
//! Checks run in a fixed order and stop at the first failure. The same
//! validator backs admission (non-strict on create and update) and the
//! reconcile entry point (strict).

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, warn};

use crate::controller::nodes::{NodeRole, NodeSpecBuilder, ADMIN_PASSWORD_ENV, ADMIN_USERNAME_ENV};
use crate::crd::quantity::parse_quantity;
use crate::crd::{
    LeaderElectionConfig, MonitorAgent, MonitorSpec, SearchCluster, StorageProviders, StorageSpec,
    StorageType, TerminationPolicy, LEADER_ELECTION_JITTER_FACTOR,
};
use crate::error::{Error, Result};
use crate::ports::{SecretLookup, VersionCatalog};

/// Variables the operator injects itself.
pub const FORBIDDEN_ENV_VARS: &[&str] = &[ADMIN_USERNAME_ENV, ADMIN_PASSWORD_ENV];

const VALID_ACCESS_MODES: &[&str] = &[
    "ReadWriteOnce",
    "ReadOnlyMany",
    "ReadWriteMany",
    "ReadWriteOncePod",
];

fn invalid(msg: impl Into<String>) -> Error {
    Error::ValidationError(msg.into())
}

pub struct SpecValidator {
    catalog: Arc<dyn VersionCatalog>,
    secrets: Arc<dyn SecretLookup>,
}

impl SpecValidator {
    pub fn new(catalog: Arc<dyn VersionCatalog>, secrets: Arc<dyn SecretLookup>) -> Self {
        Self { catalog, secrets }
    }

    /// Validate `cluster`. `strict` adds the secret existence check and the
    /// version catalog deprecation and sanity checks.
    pub async fn validate(&self, cluster: &SearchCluster, strict: bool) -> Result<()> {
        let spec = &cluster.spec;
        let namespace = cluster.namespace_or_default();
        let name = cluster.name_any();
        debug!("Validating SearchCluster {}/{} (strict: {})", namespace, name, strict);

        if spec.version.is_empty() {
            return Err(invalid("'spec.version' is missing"));
        }
        let version = self.catalog.get_version(&spec.version).await?;

        validate_replicas(cluster)?;

        for env in &spec.pod_template.env {
            if FORBIDDEN_ENV_VARS.contains(&env.name.as_str()) {
                return Err(invalid(format!(
                    "environment variable {} is forbidden to use in SearchCluster spec",
                    env.name
                )));
            }
        }

        let storage_type = spec
            .storage_type
            .ok_or_else(|| invalid("'spec.storageType' is missing"))?;
        match &spec.topology {
            Some(topology) => {
                for (role, node) in [
                    ("master", &topology.master),
                    ("data", &topology.data),
                    ("client", &topology.client),
                ] {
                    validate_storage(storage_type, node.storage.as_ref())
                        .map_err(|e| invalid(format!("topology.{role}: {e}")))?;
                }
            }
            None => validate_storage(storage_type, spec.storage.as_ref()).map_err(invalid)?,
        }

        // Unknown replication modes are refused when the object is decoded;
        // legacy spellings are still accepted.
        if let Some(mode) = spec.standby.filter(|m| m.is_deprecated()) {
            warn!("SearchCluster {}/{} uses deprecated standby mode {:?}", namespace, name, mode);
        }
        if let Some(mode) = spec.streaming.filter(|m| m.is_deprecated()) {
            warn!("SearchCluster {}/{} uses deprecated streaming mode {:?}", namespace, name, mode);
        }

        if let Some(storage) = spec.archiver.as_ref().and_then(|a| a.storage.as_ref()) {
            require_provider(storage)?;
        }

        if strict {
            if let Some(secret) = &spec.database_secret {
                self.secrets.get_secret(&namespace, &secret.secret_name).await?;
            }
            if version.spec.deprecated {
                return Err(invalid(format!(
                    "SearchCluster {}/{} is using deprecated version {}. Skipped processing",
                    namespace,
                    name,
                    version.name_any()
                )));
            }
            version.spec.validate_specs().map_err(|reason| {
                invalid(format!(
                    "SearchCluster {}/{} is using invalid SearchClusterVersion {}. Skipped processing. reason: {}",
                    namespace,
                    name,
                    version.name_any(),
                    reason
                ))
            })?;
        }

        if let Some(lec) = &spec.leader_election {
            validate_leader_election(lec)?;
        }

        if let Some(session) = spec.restore_session() {
            if spec.database_secret.is_none() {
                return Err(invalid(format!(
                    "in StashRestore init, 'spec.databaseSecret.secretName' of {}/{} needs to be similar to older database of restoresession {}",
                    namespace, name, session
                )));
            }
        }

        if let Some(wal) = spec.init.as_ref().and_then(|i| i.wal.as_ref()) {
            require_provider(wal)?;
        }

        let policy = spec
            .termination_policy
            .ok_or_else(|| invalid("'spec.terminationPolicy' is missing"))?;
        if storage_type == StorageType::Ephemeral && policy == TerminationPolicy::Halt {
            return Err(invalid(
                "'spec.terminationPolicy: Halt' can not be used for 'Ephemeral' storage",
            ));
        }

        if let Some(monitor) = &spec.monitor {
            validate_monitor_spec(monitor).map_err(invalid)?;
        }

        Ok(())
    }
}

fn validate_replicas(cluster: &SearchCluster) -> Result<()> {
    match &cluster.spec.topology {
        Some(topology) => {
            for (role, node) in [
                ("master", &topology.master),
                ("data", &topology.data),
                ("client", &topology.client),
            ] {
                if let Some(replicas) = node.replicas.filter(|r| *r < 1) {
                    return Err(invalid(format!(
                        "spec.topology.{role}.replicas \"{replicas}\" invalid. Value must be greater than zero"
                    )));
                }
            }

            // Each role needs its own StatefulSet.
            let builder = NodeSpecBuilder::new(cluster, &cluster.spec.version);
            let client = builder.node_set_name(NodeRole::Client, &topology.client);
            let master = builder.node_set_name(NodeRole::Master, &topology.master);
            let data = builder.node_set_name(NodeRole::Data, &topology.data);
            for (a, a_name, b, b_name) in [
                ("client", &client, "master", &master),
                ("client", &client, "data", &data),
                ("master", &master, "data", &data),
            ] {
                if a_name == b_name {
                    return Err(invalid(format!("{a} & {b} node should not have same prefix")));
                }
            }
            Ok(())
        }
        None => match cluster.spec.replicas {
            Some(r) if r >= 1 => Ok(()),
            Some(r) => Err(invalid(format!(
                "spec.replicas \"{r}\" invalid. Value must be greater than zero"
            ))),
            None => Err(invalid(
                "spec.replicas \"<nil>\" invalid. Value must be greater than zero",
            )),
        },
    }
}

/// At least one provider; several at once are tolerated.
fn require_provider(providers: &StorageProviders) -> Result<()> {
    if providers.configured().is_empty() {
        return Err(invalid("no storage provider is configured"));
    }
    Ok(())
}

pub fn validate_leader_election(lec: &LeaderElectionConfig) -> Result<()> {
    if lec.lease_duration_seconds <= lec.renew_deadline_seconds {
        return Err(invalid("leaseDuration must be greater than renewDeadline"));
    }
    let jittered_retry = (LEADER_ELECTION_JITTER_FACTOR * lec.retry_period_seconds as f64) as i64;
    if lec.renew_deadline_seconds <= jittered_retry {
        return Err(invalid(
            "renewDeadline must be greater than retryPeriod*JitterFactor",
        ));
    }
    if lec.lease_duration_seconds < 1 {
        return Err(invalid("leaseDuration must be greater than zero"));
    }
    if lec.renew_deadline_seconds < 1 {
        return Err(invalid("renewDeadline must be greater than zero"));
    }
    if lec.retry_period_seconds < 1 {
        return Err(invalid("retryPeriod must be greater than zero"));
    }
    Ok(())
}

/// Volume request checks; only durable storage needs one.
pub fn validate_storage(
    storage_type: StorageType,
    storage: Option<&StorageSpec>,
) -> std::result::Result<(), String> {
    if storage_type == StorageType::Ephemeral {
        return Ok(());
    }
    let storage = storage.ok_or("'spec.storage' is missing for Durable storage type")?;

    let size = storage
        .size
        .as_deref()
        .ok_or("'spec.storage.size' is missing")?;
    match parse_quantity(size) {
        Some(bytes) if bytes > 0 => {}
        _ => return Err(format!("'spec.storage.size' {size:?} is not a valid positive quantity")),
    }

    if let Some(mode) = storage
        .access_modes
        .iter()
        .find(|m| !VALID_ACCESS_MODES.contains(&m.as_str()))
    {
        return Err(format!("'spec.storage.accessModes' contains invalid mode {mode:?}"));
    }
    Ok(())
}

pub fn validate_monitor_spec(monitor: &MonitorSpec) -> std::result::Result<(), String> {
    if let Some(port) = monitor.prometheus.as_ref().and_then(|p| p.port) {
        if !(1..=65535).contains(&port) {
            return Err(format!("'spec.monitor.prometheus.port' {port} is out of range"));
        }
    }
    if monitor.agent == MonitorAgent::PrometheusOperator
        && monitor
            .prometheus
            .as_ref()
            .and_then(|p| p.service_monitor.as_ref())
            .is_none()
    {
        return Err(
            "'spec.monitor.prometheus.serviceMonitor' is required for PrometheusOperator agent"
                .to_string(),
        );
    }
    Ok(())
}
