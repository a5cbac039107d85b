//! SearchCluster Custom Resource Definition
//!
//! A SearchCluster is a distributed search engine deployed either as a single
//! combined node set or as discrete master, data and client node sets.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    ArchiverSpec, DatabasePhase, InitSpec, LeaderElectionConfig, MonitorSpec, PodTemplate,
    SecretReference, StandbyMode, StorageSpec, StorageType, StreamingMode, TerminationPolicy,
    Topology,
};

/// Annotation stamped once a restore from backup has completed
pub const INITIALIZED_ANNOTATION: &str = "searchdb.dev/initialized";

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const OPERATOR_NAME: &str = "searchdb-operator";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "searchdb.dev",
    version = "v1alpha1",
    kind = "SearchCluster",
    plural = "searchclusters",
    namespaced,
    status = "SearchClusterStatus",
    shortname = "sc",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SearchClusterSpec {
    /// Name of a SearchClusterVersion
    pub version: String,

    /// Replica count in combined mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Discrete node roles; when set, combined mode is not used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,

    /// Defaults to `Durable` through the CRD schema
    #[serde(default = "default_storage_type", skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<StorageType>,

    /// Volume request of the combined node set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    /// PodDisruptionBudget of the combined node set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub max_unavailable: Option<IntOrString>,

    /// Credentials secret. Generated when unset; may be assigned once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_secret: Option<SecretReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_secret: Option<SecretReference>,

    #[serde(default)]
    pub enable_ssl: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby: Option<StandbyMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<StreamingMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archiver: Option<ArchiverSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<InitSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_election: Option<LeaderElectionConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSpec>,

    #[serde(default)]
    pub pod_template: PodTemplate,

    /// Defaults to `Delete` through the CRD schema
    #[serde(default = "default_termination_policy", skip_serializing_if = "Option::is_none")]
    pub termination_policy: Option<TerminationPolicy>,

    /// Request to stop all workloads while keeping data
    #[serde(default)]
    pub halted: bool,
}

fn default_storage_type() -> Option<StorageType> {
    Some(StorageType::Durable)
}

fn default_termination_policy() -> Option<TerminationPolicy> {
    Some(TerminationPolicy::Delete)
}

impl SearchClusterSpec {
    /// Fill in values the API server would otherwise leave empty.
    pub fn set_defaults(&mut self) {
        if self.storage_type.is_none() {
            self.storage_type = default_storage_type();
        }
        if self.termination_policy.is_none() {
            self.termination_policy = default_termination_policy();
        }
        if self.topology.is_none() && self.replicas.is_none() {
            self.replicas = Some(1);
        }
    }

    pub fn restore_session(&self) -> Option<&str> {
        self.init
            .as_ref()
            .and_then(|i| i.stash_restore_session.as_ref())
            .map(|r| r.name.as_str())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DatabasePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SearchCluster {
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// `namespace/name`, the key used for requeues.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace_or_default(), self.name_any())
    }

    pub fn offshoot_name(&self) -> String {
        self.name_any()
    }

    /// Headless service backing the StatefulSets
    pub fn governing_service_name(&self) -> String {
        format!("{}-pods", self.offshoot_name())
    }

    pub fn client_service_name(&self) -> String {
        self.offshoot_name()
    }

    pub fn stats_service_name(&self) -> String {
        format!("{}-stats", self.offshoot_name())
    }

    pub fn config_secret_name(&self) -> String {
        format!("{}-config", self.offshoot_name())
    }

    pub fn generated_auth_secret_name(&self) -> String {
        format!("{}-auth", self.offshoot_name())
    }

    pub fn generated_cert_secret_name(&self) -> String {
        format!("{}-cert", self.offshoot_name())
    }

    /// Labels every offshoot can be selected by.
    pub fn offshoot_selectors(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (NAME_LABEL.to_string(), "searchclusters.searchdb.dev".to_string()),
            (INSTANCE_LABEL.to_string(), self.offshoot_name()),
        ])
    }

    pub fn offshoot_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.offshoot_selectors();
        labels.insert(MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string());
        labels
    }

    /// Selectors rendered for a list call, e.g. `a=b,c=d`.
    pub fn offshoot_selector_string(&self) -> String {
        self.offshoot_selectors()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn phase(&self) -> Option<DatabasePhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// A restore is complete once the annotation is present, whatever its
    /// value (restore controllers may stamp a timestamp).
    pub fn is_initialized(&self) -> bool {
        self.annotations().contains_key(INITIALIZED_ANNOTATION)
    }

    /// Every secret the spec refers to by name.
    pub fn referenced_secret_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(s) = &self.spec.database_secret {
            names.push(s.secret_name.clone());
        }
        if let Some(s) = &self.spec.certificate_secret {
            names.push(s.secret_name.clone());
        }
        let providers = [
            self.spec.archiver.as_ref().and_then(|a| a.storage.as_ref()),
            self.spec.init.as_ref().and_then(|i| i.wal.as_ref()),
        ];
        for p in providers.into_iter().flatten() {
            if let Some(name) = &p.storage_secret_name {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }
}
