//! Collaborator interfaces
//!
//! Validation, convergence and termination only talk to the outside world
//! through these traits. The controller wires kube-backed implementations
//! (see `controller::kube_ports`); tests use the in-memory fakes in
//! `crate::testing`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::controller::{NodeSet, Verb};
use crate::crd::{SearchCluster, SearchClusterStatus, SearchClusterVersion, SecretReference};
use crate::error::Result;

/// Version catalog lookup. A missing entry is `Error::NotFound`.
#[async_trait]
pub trait VersionCatalog: Send + Sync {
    async fn get_version(&self, name: &str) -> Result<SearchClusterVersion>;
}

#[async_trait]
pub trait SecretLookup: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;
}

#[async_trait]
pub trait ClusterLookup: Send + Sync {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<SearchCluster>>;
}

/// Create-or-patch of the low-level objects making up a cluster.
///
/// Every method must be idempotent: the engine may call any of them again
/// from scratch after a partial failure.
#[async_trait]
pub trait ResourceEnsurer: Send + Sync {
    /// Headless service giving StatefulSet pods stable DNS names.
    async fn ensure_governing_service(&self, cluster: &SearchCluster) -> Result<Verb>;

    async fn ensure_client_service(&self, cluster: &SearchCluster) -> Result<Verb>;

    /// Returns the reference it generated, if `spec.certificateSecret` was
    /// empty and TLS is enabled.
    async fn ensure_certificate_secret(
        &self,
        cluster: &SearchCluster,
    ) -> Result<Option<SecretReference>>;

    /// Returns the reference it generated, if `spec.databaseSecret` was empty.
    async fn ensure_database_secret(
        &self,
        cluster: &SearchCluster,
    ) -> Result<Option<SecretReference>>;

    /// Whether every secret the cluster needs can be read.
    async fn secrets_available(&self, cluster: &SearchCluster) -> Result<bool>;

    async fn ensure_default_config(&self, cluster: &SearchCluster) -> Result<Verb>;

    /// Service account, role and role binding.
    async fn ensure_rbac(&self, cluster: &SearchCluster) -> Result<()>;

    async fn ensure_node_set(&self, cluster: &SearchCluster, node_set: &NodeSet) -> Result<Verb>;
}

/// Delayed re-delivery of a reconcile key.
pub trait Scheduler: Send + Sync {
    fn schedule_after(&self, key: &str, delay: Duration);
}

pub type StatusMutation<'a> = &'a (dyn Fn(&mut SearchClusterStatus) + Send + Sync);

/// Read-modify-write of the status subresource against the latest stored
/// object.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn update_status(
        &self,
        cluster: &SearchCluster,
        mutate: StatusMutation<'_>,
    ) -> Result<SearchCluster>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// Fire-and-forget events; implementations log their own failures.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn publish(&self, cluster: &SearchCluster, event_type: EventType, reason: &str, message: &str);
}

/// Offshoot resource classes whose ownership changes on termination
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OffshootKind {
    PersistentVolumeClaims,
    Secrets,
}

impl std::fmt::Display for OffshootKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OffshootKind::PersistentVolumeClaims => write!(f, "persistentvolumeclaims"),
            OffshootKind::Secrets => write!(f, "secrets"),
        }
    }
}

/// Which objects an ownership change applies to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Label selector, e.g. `app.kubernetes.io/instance=logs`
    Selector(String),
    /// Explicit object names
    Names(Vec<String>),
}

#[async_trait]
pub trait OwnershipManager: Send + Sync {
    async fn remove_owner_reference(
        &self,
        kind: OffshootKind,
        namespace: &str,
        selection: &Selection,
        owner: &OwnerReference,
    ) -> Result<()>;

    /// Adds `owner` so garbage collection deletes the objects with the cluster.
    async fn ensure_owner_reference(
        &self,
        kind: OffshootKind,
        namespace: &str,
        selection: &Selection,
        owner: &OwnerReference,
    ) -> Result<()>;
}

#[async_trait]
pub trait MonitorManager: Send + Sync {
    async fn ensure_monitor(&self, cluster: &SearchCluster) -> Result<()>;
    async fn delete_monitor(&self, cluster: &SearchCluster) -> Result<()>;
}

/// Stops a running cluster without touching its data.
#[async_trait]
pub trait Quiescer: Send + Sync {
    async fn halt_database(&self, cluster: &SearchCluster) -> Result<()>;
    async fn wait_until_paused(&self, cluster: &SearchCluster) -> Result<()>;
}

/// Everything the reconcile path needs, bundled for cheap cloning.
#[derive(Clone)]
pub struct Ports {
    pub catalog: Arc<dyn VersionCatalog>,
    pub secrets: Arc<dyn SecretLookup>,
    pub resources: Arc<dyn ResourceEnsurer>,
    pub scheduler: Arc<dyn Scheduler>,
    pub status: Arc<dyn StatusWriter>,
    pub events: Arc<dyn EventRecorder>,
    pub ownership: Arc<dyn OwnershipManager>,
    pub monitor: Arc<dyn MonitorManager>,
    pub quiescer: Arc<dyn Quiescer>,
}
