//! In-memory stand-ins for every collaborator port, plus fixtures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::controller::{NodeSet, Verb};
use crate::crd::{
    DatabasePhase, ImageRef, SearchCluster, SearchClusterSpec, SearchClusterVersion,
    SearchClusterVersionSpec, SecretReference, StorageSpec, StorageType, TerminationPolicy,
};
use crate::error::{Error, Result};
use crate::ports::{
    ClusterLookup, EventRecorder, EventType, MonitorManager, OffshootKind, OwnershipManager, Ports,
    Quiescer, ResourceEnsurer, Scheduler, SecretLookup, Selection, StatusMutation, StatusWriter,
    VersionCatalog,
};

pub const SAMPLE_VERSION: &str = "7.10.2";

/// A valid combined-mode cluster in the `default` namespace.
pub fn sample_cluster(name: &str) -> SearchCluster {
    let mut cluster = SearchCluster::new(
        name,
        SearchClusterSpec {
            version: SAMPLE_VERSION.to_string(),
            replicas: Some(1),
            storage_type: Some(StorageType::Durable),
            storage: Some(StorageSpec {
                storage_class_name: Some("standard".to_string()),
                access_modes: vec!["ReadWriteOnce".to_string()],
                size: Some("1Gi".to_string()),
            }),
            database_secret: Some(SecretReference {
                secret_name: format!("{name}-auth"),
            }),
            termination_policy: Some(TerminationPolicy::Delete),
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some("default".to_string());
    cluster.metadata.uid = Some(format!("uid-{name}"));
    cluster.metadata.generation = Some(1);
    cluster
}

pub fn sample_version(name: &str, deprecated: bool) -> SearchClusterVersion {
    SearchClusterVersion::new(
        name,
        SearchClusterVersionSpec {
            version: name.to_string(),
            db: ImageRef {
                image: format!("searchdb/engine:{name}"),
            },
            init_container: ImageRef {
                image: "searchdb/config-merger:0.3".to_string(),
            },
            exporter: ImageRef {
                image: "searchdb/exporter:1.1".to_string(),
            },
            deprecated,
        },
    )
}

#[derive(Default)]
pub struct FakeCatalog {
    pub versions: Mutex<HashMap<String, SearchClusterVersion>>,
}

impl FakeCatalog {
    pub fn with(versions: impl IntoIterator<Item = SearchClusterVersion>) -> Self {
        let map = versions
            .into_iter()
            .map(|v| (v.name_any(), v))
            .collect();
        Self {
            versions: Mutex::new(map),
        }
    }
}

#[async_trait]
impl VersionCatalog for FakeCatalog {
    async fn get_version(&self, name: &str) -> Result<SearchClusterVersion> {
        self.versions
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("SearchClusterVersion", name))
    }
}

#[derive(Default)]
pub struct FakeSecrets {
    pub present: Mutex<HashSet<(String, String)>>,
}

impl FakeSecrets {
    pub fn with(names: &[(&str, &str)]) -> Self {
        let present = names
            .iter()
            .map(|(ns, n)| (ns.to_string(), n.to_string()))
            .collect();
        Self {
            present: Mutex::new(present),
        }
    }
}

#[async_trait]
impl SecretLookup for FakeSecrets {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        if self
            .present
            .lock()
            .unwrap()
            .contains(&(namespace.to_string(), name.to_string()))
        {
            Ok(Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
        } else {
            Err(Error::not_found("Secret", format!("{namespace}/{name}")))
        }
    }
}

#[derive(Default)]
pub struct FakeClusters {
    pub clusters: Mutex<HashMap<(String, String), SearchCluster>>,
    pub fail: AtomicBool,
}

impl FakeClusters {
    pub fn insert(&self, cluster: SearchCluster) {
        self.clusters.lock().unwrap().insert(
            (cluster.namespace_or_default(), cluster.name_any()),
            cluster,
        );
    }
}

#[async_trait]
impl ClusterLookup for FakeClusters {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<SearchCluster>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Timeout("cluster lookup".to_string()));
        }
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Keeps the last desired state per object and reports the verb a real
/// create-or-patch would.
pub struct FakeResources {
    objects: Mutex<BTreeMap<String, String>>,
    pub calls: Mutex<Vec<String>>,
    pub secrets_ready: AtomicBool,
    /// Step name that should fail, e.g. `rbac`
    pub fail_step: Mutex<Option<String>>,
    /// Forced verbs for node sets, by name
    pub node_set_verbs: Mutex<HashMap<String, Verb>>,
    pub generate_secret: AtomicBool,
}

impl Default for FakeResources {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            secrets_ready: AtomicBool::new(true),
            fail_step: Mutex::new(None),
            node_set_verbs: Mutex::new(HashMap::new()),
            generate_secret: AtomicBool::new(false),
        }
    }
}

impl FakeResources {
    fn step(&self, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.fail_step.lock().unwrap().as_deref() == Some(name) {
            return Err(Error::Timeout(format!("{name} failed")));
        }
        Ok(())
    }

    fn store(&self, key: String, desired: String) -> Verb {
        let mut objects = self.objects.lock().unwrap();
        match objects.insert(key, desired.clone()) {
            None => Verb::Created,
            Some(previous) if previous == desired => Verb::Unchanged,
            Some(_) => Verb::Patched,
        }
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceEnsurer for FakeResources {
    async fn ensure_governing_service(&self, cluster: &SearchCluster) -> Result<Verb> {
        self.step("governing-service")?;
        Ok(self.store(cluster.governing_service_name(), cluster.name_any()))
    }

    async fn ensure_client_service(&self, cluster: &SearchCluster) -> Result<Verb> {
        self.step("client-service")?;
        Ok(self.store(
            format!("svc/{}", cluster.client_service_name()),
            format!("{:?}", cluster.spec.monitor),
        ))
    }

    async fn ensure_certificate_secret(
        &self,
        _cluster: &SearchCluster,
    ) -> Result<Option<SecretReference>> {
        self.step("certificate-secret")?;
        Ok(None)
    }

    async fn ensure_database_secret(
        &self,
        cluster: &SearchCluster,
    ) -> Result<Option<SecretReference>> {
        self.step("database-secret")?;
        if cluster.spec.database_secret.is_none() && self.generate_secret.load(Ordering::SeqCst) {
            return Ok(Some(SecretReference {
                secret_name: cluster.generated_auth_secret_name(),
            }));
        }
        Ok(None)
    }

    async fn secrets_available(&self, _cluster: &SearchCluster) -> Result<bool> {
        self.step("secrets-available")?;
        Ok(self.secrets_ready.load(Ordering::SeqCst))
    }

    async fn ensure_default_config(&self, cluster: &SearchCluster) -> Result<Verb> {
        self.step("config")?;
        Ok(self.store(cluster.config_secret_name(), cluster.spec.version.clone()))
    }

    async fn ensure_rbac(&self, _cluster: &SearchCluster) -> Result<()> {
        self.step("rbac")
    }

    async fn ensure_node_set(&self, _cluster: &SearchCluster, node_set: &NodeSet) -> Result<Verb> {
        self.step(&format!("node-set/{}", node_set.name))?;
        let verb = self.store(format!("sts/{}", node_set.name), format!("{node_set:?}"));
        Ok(self
            .node_set_verbs
            .lock()
            .unwrap()
            .get(&node_set.name)
            .copied()
            .unwrap_or(verb))
    }
}

#[derive(Default)]
pub struct FakeScheduler {
    pub scheduled: Mutex<Vec<(String, Duration)>>,
}

impl Scheduler for FakeScheduler {
    fn schedule_after(&self, key: &str, delay: Duration) {
        self.scheduled.lock().unwrap().push((key.to_string(), delay));
    }
}

/// Stores the latest status per object and the order phases were written.
#[derive(Default)]
pub struct FakeStatus {
    pub latest: Mutex<HashMap<String, SearchCluster>>,
    pub phases: Mutex<Vec<DatabasePhase>>,
    pub fail: AtomicBool,
}

impl FakeStatus {
    pub fn phase_log(&self) -> Vec<DatabasePhase> {
        self.phases.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusWriter for FakeStatus {
    async fn update_status(
        &self,
        cluster: &SearchCluster,
        mutate: StatusMutation<'_>,
    ) -> Result<SearchCluster> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Timeout("status update".to_string()));
        }
        let mut latest = self.latest.lock().unwrap();
        let current = latest
            .entry(cluster.key())
            .or_insert_with(|| cluster.clone());
        current.metadata = cluster.metadata.clone();
        let mut status = current.status.clone().unwrap_or_default();
        mutate(&mut status);
        if let Some(phase) = status.phase {
            self.phases.lock().unwrap().push(phase);
        }
        current.status = Some(status);
        Ok(current.clone())
    }
}

#[derive(Default)]
pub struct FakeEvents {
    pub events: Mutex<Vec<(EventType, String, String)>>,
}

impl FakeEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventRecorder for FakeEvents {
    async fn publish(&self, _cluster: &SearchCluster, event_type: EventType, reason: &str, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push((event_type, reason.to_string(), message.to_string()));
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnershipCall {
    Remove(OffshootKind, Selection),
    Ensure(OffshootKind, Selection),
}

#[derive(Default)]
pub struct FakeOwnership {
    pub calls: Mutex<Vec<OwnershipCall>>,
}

impl FakeOwnership {
    pub fn call_log(&self) -> Vec<OwnershipCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OwnershipManager for FakeOwnership {
    async fn remove_owner_reference(
        &self,
        kind: OffshootKind,
        _namespace: &str,
        selection: &Selection,
        _owner: &OwnerReference,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(OwnershipCall::Remove(kind, selection.clone()));
        Ok(())
    }

    async fn ensure_owner_reference(
        &self,
        kind: OffshootKind,
        _namespace: &str,
        selection: &Selection,
        _owner: &OwnerReference,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(OwnershipCall::Ensure(kind, selection.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMonitor {
    pub ensured: AtomicUsize,
    pub deleted: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl MonitorManager for FakeMonitor {
    async fn ensure_monitor(&self, _cluster: &SearchCluster) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Timeout("service monitor".to_string()));
        }
        self.ensured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_monitor(&self, _cluster: &SearchCluster) -> Result<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Timeout("service monitor".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeQuiescer {
    pub calls: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl Quiescer for FakeQuiescer {
    async fn halt_database(&self, _cluster: &SearchCluster) -> Result<()> {
        self.calls.lock().unwrap().push("halt");
        Ok(())
    }

    async fn wait_until_paused(&self, _cluster: &SearchCluster) -> Result<()> {
        self.calls.lock().unwrap().push("wait");
        Ok(())
    }
}

/// All fakes at once, with handles kept for assertions.
pub struct FakeWorld {
    pub catalog: Arc<FakeCatalog>,
    pub secrets: Arc<FakeSecrets>,
    pub resources: Arc<FakeResources>,
    pub scheduler: Arc<FakeScheduler>,
    pub status: Arc<FakeStatus>,
    pub events: Arc<FakeEvents>,
    pub ownership: Arc<FakeOwnership>,
    pub monitor: Arc<FakeMonitor>,
    pub quiescer: Arc<FakeQuiescer>,
}

impl FakeWorld {
    /// Catalog with the sample version; the sample cluster's secret exists.
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(FakeCatalog::with([sample_version(SAMPLE_VERSION, false)])),
            secrets: Arc::new(FakeSecrets::with(&[("default", "logs-auth")])),
            resources: Arc::new(FakeResources::default()),
            scheduler: Arc::new(FakeScheduler::default()),
            status: Arc::new(FakeStatus::default()),
            events: Arc::new(FakeEvents::default()),
            ownership: Arc::new(FakeOwnership::default()),
            monitor: Arc::new(FakeMonitor::default()),
            quiescer: Arc::new(FakeQuiescer::default()),
        }
    }

    pub fn ports(&self) -> Ports {
        Ports {
            catalog: self.catalog.clone(),
            secrets: self.secrets.clone(),
            resources: self.resources.clone(),
            scheduler: self.scheduler.clone(),
            status: self.status.clone(),
            events: self.events.clone(),
            ownership: self.ownership.clone(),
            monitor: self.monitor.clone(),
            quiescer: self.quiescer.clone(),
        }
    }
}
