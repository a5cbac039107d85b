//! Shared types for SearchCluster specifications
//!
//! # Type Hierarchy
//!
//! - [`Topology`] / [`NodeRoleSpec`] - discrete master/data/client node sets
//! - [`StorageType`] / [`StorageSpec`] - volume requirements
//! - [`TerminationPolicy`] - data-retention contract at delete/halt time
//! - [`StandbyMode`] / [`StreamingMode`] - replication modes, including legacy spellings
//! - [`ArchiverSpec`] / [`InitSpec`] / [`StorageProviders`] - backup and restore sources
//! - [`LeaderElectionConfig`] - in-cluster leader election timings
//! - [`MonitorSpec`] - metrics exporter configuration
//! - [`DatabasePhase`] - lifecycle phase reported in status

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether node data lives on persistent volumes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum StorageType {
    /// Backed by PersistentVolumeClaims
    Durable,
    /// `emptyDir`, lost when the pod goes away
    Ephemeral,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::Durable => write!(f, "Durable"),
            StorageType::Ephemeral => write!(f, "Ephemeral"),
        }
    }
}

/// Data-retention contract applied when the cluster is deleted or halted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum TerminationPolicy {
    /// Deletion is rejected outright
    DoNotTerminate,
    /// Workloads go away, volumes and secrets stay for a later resume
    Halt,
    /// Deprecated spelling of `Halt`
    Pause,
    /// Volumes are deleted, secrets are kept
    Delete,
    /// Everything, including secrets, is deleted
    WipeOut,
}

impl std::fmt::Display for TerminationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationPolicy::DoNotTerminate => write!(f, "DoNotTerminate"),
            TerminationPolicy::Halt => write!(f, "Halt"),
            TerminationPolicy::Pause => write!(f, "Pause"),
            TerminationPolicy::Delete => write!(f, "Delete"),
            TerminationPolicy::WipeOut => write!(f, "WipeOut"),
        }
    }
}

/// Standby node behaviour
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum StandbyMode {
    Hot,
    Warm,
    /// Lower-case spelling accepted from older manifests
    #[serde(rename = "hot")]
    LegacyHot,
    #[serde(rename = "warm")]
    LegacyWarm,
}

impl StandbyMode {
    pub fn is_deprecated(&self) -> bool {
        matches!(self, StandbyMode::LegacyHot | StandbyMode::LegacyWarm)
    }
}

/// Replication streaming mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum StreamingMode {
    Asynchronous,
    Synchronous,
    /// Lower-case spelling accepted from older manifests
    #[serde(rename = "asynchronous")]
    LegacyAsynchronous,
}

impl StreamingMode {
    pub fn is_deprecated(&self) -> bool {
        matches!(self, StreamingMode::LegacyAsynchronous)
    }
}

/// Volume request for a node set
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,
    /// Requested size as a Kubernetes quantity, e.g. `10Gi`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// One role of a discrete topology
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeRoleSpec {
    /// Overrides the role's default name prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub max_unavailable: Option<IntOrString>,
}

/// Discrete master/data/client layout
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub master: NodeRoleSpec,
    pub data: NodeRoleSpec,
    pub client: NodeRoleSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub secret_name: String,
}

/// Backup storage backends. At least one must be set where a provider is
/// required.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageProviders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<BucketSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<BucketSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<BucketSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift: Option<BucketSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSpec>,
    /// Secret holding the backend credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_secret_name: Option<String>,
}

impl StorageProviders {
    /// Names of every provider that is set.
    pub fn configured(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.s3.is_some() {
            out.push("s3");
        }
        if self.gcs.is_some() {
            out.push("gcs");
        }
        if self.azure.is_some() {
            out.push("azure");
        }
        if self.swift.is_some() {
            out.push("swift");
        }
        if self.local.is_some() {
            out.push("local");
        }
        out
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalSpec {
    pub mount_path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchiverSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageProviders>,
}

/// Restore session managed by an external backup controller
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSessionRef {
    pub name: String,
}

/// Initial data sources
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stash_restore_session: Option<RestoreSessionRef>,
    /// Replay from write-ahead-log archives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wal: Option<StorageProviders>,
}

/// Jitter applied to the retry period when checking renew deadlines
pub const LEADER_ELECTION_JITTER_FACTOR: f64 = 1.2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionConfig {
    pub lease_duration_seconds: i64,
    pub renew_deadline_seconds: i64,
    pub retry_period_seconds: i64,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration_seconds: 15,
            renew_deadline_seconds: 10,
            retry_period_seconds: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum MonitorAgent {
    /// Scraped through pod annotations
    PrometheusBuiltin,
    /// Scraped through a `ServiceMonitor`
    PrometheusOperator,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSpec {
    pub agent: MonitorAgent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusSpec>,
}

impl MonitorSpec {
    pub fn port(&self) -> i32 {
        self.prometheus
            .as_ref()
            .and_then(|p| p.port)
            .unwrap_or(DEFAULT_EXPORTER_PORT)
    }
}

pub const DEFAULT_EXPORTER_PORT: i32 = 56790;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor: Option<ServiceMonitorSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// Pod-level overrides applied to every node set
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    /// Extra environment; wins over computed variables of the same name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub env: Vec<EnvVar>,
    /// Resources of the combined node set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub resources: Option<ResourceRequirements>,
}

/// Lifecycle phase of a SearchCluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum DatabasePhase {
    Creating,
    Initializing,
    Running,
    Halted,
    Terminating,
}

impl DatabasePhase {
    /// Whether `to` may follow `from`. `None` is a fresh object.
    pub fn can_transition(from: Option<DatabasePhase>, to: DatabasePhase) -> bool {
        use DatabasePhase::*;
        match (from, to) {
            (_, Terminating) => true,
            (None, Creating) => true,
            (None, _) => false,
            (Some(Creating), Creating | Initializing | Running) => true,
            (Some(Initializing), Initializing | Running) => true,
            (Some(Running), Running | Halted) => true,
            (Some(Halted), Halted | Running) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DatabasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabasePhase::Creating => write!(f, "Creating"),
            DatabasePhase::Initializing => write!(f, "Initializing"),
            DatabasePhase::Running => write!(f, "Running"),
            DatabasePhase::Halted => write!(f, "Halted"),
            DatabasePhase::Terminating => write!(f, "Terminating"),
        }
    }
}
