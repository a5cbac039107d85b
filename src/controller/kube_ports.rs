//! Kubernetes-backed implementations of the collaborator ports

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Event, PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, ObjectMeta, Patch, PatchParams, PostParams,
};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::ensure::Verb;
use super::nodes::NodeSet;
use super::resources;
use crate::crd::{
    SearchCluster, SearchClusterStatus, SearchClusterVersion, SecretReference, OPERATOR_NAME,
};
use crate::error::{Error, Result};
use crate::ports::{
    ClusterLookup, EventRecorder, EventType, MonitorManager, OffshootKind, OwnershipManager,
    Ports, Quiescer, ResourceEnsurer, Scheduler, SecretLookup, Selection, StatusMutation,
    StatusWriter, VersionCatalog,
};

const STATUS_UPDATE_ATTEMPTS: usize = 3;
const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const PAUSE_TIMEOUT: Duration = Duration::from_secs(300);

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == code)
}

/// Server-side apply `desired` and report what happened.
///
/// Applying an unchanged object does not bump its resourceVersion, which is
/// how `Unchanged` and `Patched` are told apart.
async fn ensure_object<K>(api: &Api<K>, desired: &K) -> Result<Verb>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::ConfigError("object to apply has no name".to_string()))?;
    let existing = api.get_opt(&name).await?;
    let applied = api
        .patch(
            &name,
            &PatchParams::apply(OPERATOR_NAME).force(),
            &Patch::Apply(desired),
        )
        .await?;

    Ok(match existing {
        None => Verb::Created,
        Some(before) if before.meta().resource_version != applied.meta().resource_version => {
            Verb::Patched
        }
        Some(_) => Verb::Unchanged,
    })
}

/// Create `desired` unless an object of that name already exists. Generated
/// credentials must never be regenerated on a later pass.
async fn create_if_absent<K>(api: &Api<K>, desired: &K) -> Result<Verb>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    match api.create(&PostParams::default(), desired).await {
        Ok(_) => Ok(Verb::Created),
        Err(e) if is_status(&e, 409) => Ok(Verb::Unchanged),
        Err(e) => Err(e.into()),
    }
}

async fn delete_ignoring_missing<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) if is_status(&e, 404) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Lookups
// ============================================================================

pub struct KubeCatalog {
    client: Client,
}

#[async_trait]
impl VersionCatalog for KubeCatalog {
    async fn get_version(&self, name: &str) -> Result<SearchClusterVersion> {
        let api: Api<SearchClusterVersion> = Api::all(self.client.clone());
        api.get_opt(name)
            .await?
            .ok_or_else(|| Error::not_found("SearchClusterVersion", name))
    }
}

pub struct KubeSecrets {
    client: Client,
}

#[async_trait]
impl SecretLookup for KubeSecrets {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await?
            .ok_or_else(|| Error::not_found("Secret", format!("{namespace}/{name}")))
    }
}

pub struct KubeClusters {
    client: Client,
}

impl KubeClusters {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterLookup for KubeClusters {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<SearchCluster>> {
        let api: Api<SearchCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

// ============================================================================
// Resource ensurer
// ============================================================================

pub struct KubeResourceEnsurer {
    client: Client,
    catalog: Arc<dyn VersionCatalog>,
}

impl KubeResourceEnsurer {
    fn api<K>(&self, cluster: &SearchCluster) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &cluster.namespace_or_default())
    }

    /// Record a generated secret reference on the cluster spec.
    async fn persist_secret_ref(
        &self,
        cluster: &SearchCluster,
        field: &str,
        reference: &SecretReference,
    ) -> Result<()> {
        let api: Api<SearchCluster> = self.api(cluster);
        let mut spec = serde_json::Map::new();
        spec.insert(field.to_string(), serde_json::to_value(reference)?);
        let patch = json!({ "spec": spec });
        api.patch(
            &cluster.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceEnsurer for KubeResourceEnsurer {
    async fn ensure_governing_service(&self, cluster: &SearchCluster) -> Result<Verb> {
        ensure_object(&self.api::<Service>(cluster), &resources::build_governing_service(cluster))
            .await
    }

    async fn ensure_client_service(&self, cluster: &SearchCluster) -> Result<Verb> {
        ensure_object(&self.api::<Service>(cluster), &resources::build_client_service(cluster)).await
    }

    async fn ensure_certificate_secret(
        &self,
        cluster: &SearchCluster,
    ) -> Result<Option<SecretReference>> {
        if !cluster.spec.enable_ssl || cluster.spec.certificate_secret.is_some() {
            return Ok(None);
        }
        let secret = resources::build_certificate_secret(cluster)?;
        let verb = create_if_absent(&self.api::<Secret>(cluster), &secret).await?;
        debug!("Certificate secret for {}: {}", cluster.key(), verb);

        let reference = SecretReference {
            secret_name: cluster.generated_cert_secret_name(),
        };
        self.persist_secret_ref(cluster, "certificateSecret", &reference)
            .await?;
        Ok(Some(reference))
    }

    async fn ensure_database_secret(
        &self,
        cluster: &SearchCluster,
    ) -> Result<Option<SecretReference>> {
        if cluster.spec.database_secret.is_some() {
            return Ok(None);
        }
        let secret = resources::build_database_secret(cluster);
        let verb = create_if_absent(&self.api::<Secret>(cluster), &secret).await?;
        debug!("Database secret for {}: {}", cluster.key(), verb);

        let reference = SecretReference {
            secret_name: cluster.generated_auth_secret_name(),
        };
        self.persist_secret_ref(cluster, "databaseSecret", &reference)
            .await?;
        Ok(Some(reference))
    }

    async fn secrets_available(&self, cluster: &SearchCluster) -> Result<bool> {
        let api: Api<Secret> = self.api(cluster);
        let wanted = [
            cluster.spec.database_secret.as_ref(),
            cluster
                .spec
                .certificate_secret
                .as_ref()
                .filter(|_| cluster.spec.enable_ssl),
        ];
        for reference in wanted.into_iter().flatten() {
            if api.get_opt(&reference.secret_name).await?.is_none() {
                debug!("Secret {} not found yet", reference.secret_name);
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn ensure_default_config(&self, cluster: &SearchCluster) -> Result<Verb> {
        ensure_object(&self.api::<Secret>(cluster), &resources::build_config_secret(cluster)).await
    }

    async fn ensure_rbac(&self, cluster: &SearchCluster) -> Result<()> {
        ensure_object(&self.api(cluster), &resources::build_service_account(cluster)).await?;
        ensure_object(&self.api(cluster), &resources::build_role(cluster)).await?;
        ensure_object(&self.api(cluster), &resources::build_role_binding(cluster)).await?;
        Ok(())
    }

    async fn ensure_node_set(&self, cluster: &SearchCluster, node_set: &NodeSet) -> Result<Verb> {
        let version = self.catalog.get_version(&cluster.spec.version).await?;
        let statefulset = resources::build_statefulset(cluster, node_set, &version);
        let verb = ensure_object(&self.api::<StatefulSet>(cluster), &statefulset).await?;

        if let Some(pdb) = resources::build_pdb(cluster, node_set) {
            ensure_object(&self.api::<PodDisruptionBudget>(cluster), &pdb).await?;
        }
        Ok(verb)
    }
}

// ============================================================================
// Scheduling
// ============================================================================

/// Explicit retry delays requested during a pass, picked up by the
/// controller when it decides the pass's requeue action.
#[derive(Default)]
pub struct RequeueSlot {
    pending: Mutex<HashMap<String, Duration>>,
}

impl RequeueSlot {
    pub fn take(&self, key: &str) -> Option<Duration> {
        self.pending.lock().ok()?.remove(key)
    }
}

impl Scheduler for RequeueSlot {
    fn schedule_after(&self, key: &str, delay: Duration) {
        if let Ok(mut pending) = self.pending.lock() {
            // Keep the earliest request if several arrive in one pass.
            let slot = pending.entry(key.to_string()).or_insert(delay);
            if delay < *slot {
                *slot = delay;
            }
        }
    }
}

// ============================================================================
// Status and events
// ============================================================================

/// Merge patch replacing the status. Unset fields are sent as explicit
/// nulls, since a merge patch leaves absent keys untouched.
fn status_patch(
    resource_version: Option<String>,
    status: &SearchClusterStatus,
) -> Result<serde_json::Value> {
    let mut body = serde_json::to_value(status)?;
    if let Some(fields) = body.as_object_mut() {
        for key in ["phase", "observedGeneration", "reason"] {
            fields.entry(key).or_insert(serde_json::Value::Null);
        }
    }
    // resourceVersion turns the merge patch into a compare-and-swap.
    Ok(json!({
        "metadata": { "resourceVersion": resource_version },
        "status": body,
    }))
}

pub struct KubeStatusWriter {
    client: Client,
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn update_status(
        &self,
        cluster: &SearchCluster,
        mutate: StatusMutation<'_>,
    ) -> Result<SearchCluster> {
        let api: Api<SearchCluster> =
            Api::namespaced(self.client.clone(), &cluster.namespace_or_default());
        let name = cluster.name_any();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let latest = api.get_status(&name).await?;
            let mut status: SearchClusterStatus = latest.status.clone().unwrap_or_default();
            mutate(&mut status);

            let patch = status_patch(latest.resource_version(), &status)?;
            match api
                .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(e) if is_status(&e, 409) && attempt < STATUS_UPDATE_ATTEMPTS => {
                    debug!("Status conflict on {}, retrying", cluster.key());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

pub struct KubeEventRecorder {
    client: Client,
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(
        &self,
        cluster: &SearchCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let events: Api<Event> =
            Api::namespaced(self.client.clone(), &cluster.namespace_or_default());

        let time = chrono::Utc::now();
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", cluster.name_any())),
                ..Default::default()
            },
            type_: Some(event_type.to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: cluster.object_ref(&()),
            reporting_component: Some(OPERATOR_NAME.to_string()),
            first_timestamp: Some(Time(time)),
            last_timestamp: Some(Time(time)),
            count: Some(1),
            ..Default::default()
        };

        if let Err(e) = events.create(&PostParams::default(), &event).await {
            warn!("Failed to record {} event for {}: {}", reason, cluster.key(), e);
        }
    }
}

// ============================================================================
// Ownership
// ============================================================================

pub struct KubeOwnership {
    client: Client,
}

impl KubeOwnership {
    async fn metas(
        &self,
        kind: OffshootKind,
        namespace: &str,
        selection: &Selection,
    ) -> Result<Vec<ObjectMeta>> {
        match kind {
            OffshootKind::PersistentVolumeClaims => {
                let api: Api<PersistentVolumeClaim> =
                    Api::namespaced(self.client.clone(), namespace);
                select(&api, selection).await
            }
            OffshootKind::Secrets => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                select(&api, selection).await
            }
        }
    }

    async fn set_owner_references(
        &self,
        kind: OffshootKind,
        namespace: &str,
        name: &str,
        owners: Vec<OwnerReference>,
    ) -> Result<()> {
        let patch = json!({ "metadata": { "ownerReferences": owners } });
        let params = PatchParams::default();
        match kind {
            OffshootKind::PersistentVolumeClaims => {
                let api: Api<PersistentVolumeClaim> =
                    Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await?;
            }
            OffshootKind::Secrets => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await?;
            }
        }
        Ok(())
    }

    async fn rewrite_owners<F>(
        &self,
        kind: OffshootKind,
        namespace: &str,
        selection: &Selection,
        rewrite: F,
    ) -> Result<()>
    where
        F: Fn(Vec<OwnerReference>) -> Option<Vec<OwnerReference>> + Send + Sync,
    {
        for meta in self.metas(kind, namespace, selection).await? {
            let Some(name) = meta.name else { continue };
            let current = meta.owner_references.unwrap_or_default();
            if let Some(updated) = rewrite(current) {
                debug!("Updating owners of {} {}/{}", kind, namespace, name);
                self.set_owner_references(kind, namespace, &name, updated)
                    .await?;
            }
        }
        Ok(())
    }
}

async fn select<K>(api: &Api<K>, selection: &Selection) -> Result<Vec<ObjectMeta>>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    match selection {
        Selection::Selector(selector) => {
            let list = api.list(&ListParams::default().labels(selector)).await?;
            Ok(list.items.into_iter().map(|o| o.meta().clone()).collect())
        }
        Selection::Names(names) => {
            let mut metas = Vec::with_capacity(names.len());
            for name in names {
                if let Some(obj) = api.get_opt(name).await? {
                    metas.push(obj.meta().clone());
                }
            }
            Ok(metas)
        }
    }
}

#[async_trait]
impl OwnershipManager for KubeOwnership {
    async fn remove_owner_reference(
        &self,
        kind: OffshootKind,
        namespace: &str,
        selection: &Selection,
        owner: &OwnerReference,
    ) -> Result<()> {
        self.rewrite_owners(kind, namespace, selection, |owners| {
            let before = owners.len();
            let kept: Vec<_> = owners.into_iter().filter(|o| o.uid != owner.uid).collect();
            (kept.len() != before).then_some(kept)
        })
        .await
    }

    async fn ensure_owner_reference(
        &self,
        kind: OffshootKind,
        namespace: &str,
        selection: &Selection,
        owner: &OwnerReference,
    ) -> Result<()> {
        self.rewrite_owners(kind, namespace, selection, |mut owners| {
            if owners.iter().any(|o| o.uid == owner.uid) {
                return None;
            }
            // Only one controller reference is allowed per object.
            let mut added = owner.clone();
            if owners.iter().any(|o| o.controller == Some(true)) {
                added.controller = Some(false);
            }
            owners.push(added);
            Some(owners)
        })
        .await
    }
}

// ============================================================================
// Monitoring
// ============================================================================

pub struct KubeMonitor {
    client: Client,
}

#[async_trait]
impl MonitorManager for KubeMonitor {
    async fn ensure_monitor(&self, cluster: &SearchCluster) -> Result<()> {
        let namespace = cluster.namespace_or_default();
        if let Some(service) = resources::build_stats_service(cluster) {
            let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
            ensure_object(&api, &service).await?;
        }
        if let Some(monitor) = resources::build_service_monitor(cluster) {
            let api: Api<DynamicObject> = Api::namespaced_with(
                self.client.clone(),
                &namespace,
                &resources::service_monitor_resource(),
            );
            api.patch(
                &cluster.stats_service_name(),
                &PatchParams::apply(OPERATOR_NAME).force(),
                &Patch::Apply(&monitor),
            )
            .await?;
        }
        Ok(())
    }

    async fn delete_monitor(&self, cluster: &SearchCluster) -> Result<()> {
        let namespace = cluster.namespace_or_default();
        let name = cluster.stats_service_name();

        let services: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        delete_ignoring_missing(&services, &name).await?;

        let monitors: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            &namespace,
            &resources::service_monitor_resource(),
        );
        delete_ignoring_missing(&monitors, &name).await
    }
}

// ============================================================================
// Halting
// ============================================================================

pub struct KubeQuiescer {
    client: Client,
    ownership: Arc<KubeOwnership>,
}

#[async_trait]
impl Quiescer for KubeQuiescer {
    /// Detach data and credentials from the cluster, then delete every
    /// workload and service. Volumes and secrets survive for a later resume.
    async fn halt_database(&self, cluster: &SearchCluster) -> Result<()> {
        let namespace = cluster.namespace_or_default();
        let owner = resources::owner_reference(cluster);
        let selector = cluster.offshoot_selector_string();

        self.ownership
            .remove_owner_reference(
                OffshootKind::PersistentVolumeClaims,
                &namespace,
                &Selection::Selector(selector.clone()),
                &owner,
            )
            .await?;
        let secrets = cluster.referenced_secret_names();
        if !secrets.is_empty() {
            self.ownership
                .remove_owner_reference(
                    OffshootKind::Secrets,
                    &namespace,
                    &Selection::Names(secrets),
                    &owner,
                )
                .await?;
        }

        let lp = ListParams::default().labels(&selector);
        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace);
        statefulsets
            .delete_collection(&DeleteParams::default(), &lp)
            .await?;
        let pdbs: Api<PodDisruptionBudget> = Api::namespaced(self.client.clone(), &namespace);
        pdbs.delete_collection(&DeleteParams::default(), &lp).await?;

        let services: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        for name in [
            cluster.client_service_name(),
            cluster.governing_service_name(),
            cluster.stats_service_name(),
        ] {
            delete_ignoring_missing(&services, &name).await?;
        }
        info!("Deleted workloads of {}", cluster.key());
        Ok(())
    }

    async fn wait_until_paused(&self, cluster: &SearchCluster) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &cluster.namespace_or_default());
        let lp = ListParams::default().labels(&cluster.offshoot_selector_string());

        let wait = async {
            loop {
                let remaining = pods.list(&lp).await?.items.len();
                if remaining == 0 {
                    return Ok::<(), Error>(());
                }
                debug!("{} pods of {} still running", remaining, cluster.key());
                tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(PAUSE_TIMEOUT, wait)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "pods of {} still running after {:?}",
                    cluster.key(),
                    PAUSE_TIMEOUT
                ))
            })?
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Build the kube-backed ports. The returned slot is the scheduler; the
/// controller drains it after every pass.
pub fn kube_ports(client: Client) -> (Ports, Arc<RequeueSlot>) {
    let catalog: Arc<dyn VersionCatalog> = Arc::new(KubeCatalog {
        client: client.clone(),
    });
    let ownership = Arc::new(KubeOwnership {
        client: client.clone(),
    });
    let slot = Arc::new(RequeueSlot::default());

    let ports = Ports {
        catalog: catalog.clone(),
        secrets: Arc::new(KubeSecrets {
            client: client.clone(),
        }),
        resources: Arc::new(KubeResourceEnsurer {
            client: client.clone(),
            catalog,
        }),
        scheduler: slot.clone(),
        status: Arc::new(KubeStatusWriter {
            client: client.clone(),
        }),
        events: Arc::new(KubeEventRecorder {
            client: client.clone(),
        }),
        ownership: ownership.clone(),
        monitor: Arc::new(KubeMonitor {
            client: client.clone(),
        }),
        quiescer: Arc::new(KubeQuiescer { client, ownership }),
    };
    (ports, slot)
}
