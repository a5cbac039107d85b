//! Kubernetes object builders for SearchCluster offshoots
//!
//! Pure functions from a cluster (and node set) to the desired objects.
//! Applying them is done by `kube_ports`.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EmptyDirVolumeSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec,
    Secret, SecretVolumeSource, Service, ServiceAccount, ServicePort, ServiceSpec, Volume,
    VolumeMount, VolumeResourceRequirements, WeightedPodAffinityTerm,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Resource, ResourceExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use sha2::{Digest, Sha256};

use super::nodes::{NodeSet, NODE_ROLE_CLIENT, NODE_ROLE_SET};
use crate::crd::{MonitorAgent, SearchCluster, SearchClusterVersion, StorageType};
use crate::error::{Error, Result};

pub const HTTP_PORT: i32 = 9200;
pub const TRANSPORT_PORT: i32 = 9300;
pub const CONFIG_FILE: &str = "searchdb.yml";
pub const CONFIG_HASH_ANNOTATION: &str = "searchdb.dev/config-hash";
pub const DATA_VOLUME: &str = "data";
pub const DATA_MOUNT_PATH: &str = "/usr/share/searchdb/data";
const CONFIG_VOLUME: &str = "config";
const CONFIG_MOUNT_PATH: &str = "/usr/share/searchdb/config/custom";
const CERT_VOLUME: &str = "certs";
const CERT_MOUNT_PATH: &str = "/usr/share/searchdb/config/certs";
const GENERATED_USERNAME: &str = "admin";
const PASSWORD_LENGTH: usize = 16;

/// Create an OwnerReference for garbage collection
pub fn owner_reference(cluster: &SearchCluster) -> OwnerReference {
    OwnerReference {
        api_version: SearchCluster::api_version(&()).to_string(),
        kind: SearchCluster::kind(&()).to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn object_meta(cluster: &SearchCluster, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(cluster.offshoot_labels()),
        owner_references: Some(vec![owner_reference(cluster)]),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

// ============================================================================
// Services
// ============================================================================

/// Headless service giving every node a stable DNS name
pub fn build_governing_service(cluster: &SearchCluster) -> Service {
    Service {
        metadata: object_meta(cluster, cluster.governing_service_name()),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(cluster.offshoot_selectors()),
            publish_not_ready_addresses: Some(true),
            ports: Some(vec![service_port("transport", TRANSPORT_PORT)]),
            ..Default::default()
        }),
        status: None,
    }
}

/// HTTP entry point, backed by nodes that accept client traffic
pub fn build_client_service(cluster: &SearchCluster) -> Service {
    let mut selector = cluster.offshoot_selectors();
    selector.insert(NODE_ROLE_CLIENT.to_string(), NODE_ROLE_SET.to_string());

    Service {
        metadata: object_meta(cluster, cluster.client_service_name()),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(vec![service_port("http", HTTP_PORT)]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Service exposing the metrics exporter
pub fn build_stats_service(cluster: &SearchCluster) -> Option<Service> {
    let monitor = cluster.spec.monitor.as_ref()?;
    let mut meta = object_meta(cluster, cluster.stats_service_name());
    if let Some(labels) = meta.labels.as_mut() {
        labels.insert("searchdb.dev/role".to_string(), "stats".to_string());
    }
    Some(Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            selector: Some(cluster.offshoot_selectors()),
            ports: Some(vec![service_port("prom-http", monitor.port())]),
            ..Default::default()
        }),
        status: None,
    })
}

pub fn service_monitor_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "monitoring.coreos.com",
        "v1",
        "ServiceMonitor",
    ))
}

/// Prometheus-operator ServiceMonitor scraping the stats service
pub fn build_service_monitor(cluster: &SearchCluster) -> Option<DynamicObject> {
    let monitor = cluster.spec.monitor.as_ref()?;
    if monitor.agent != MonitorAgent::PrometheusOperator {
        return None;
    }
    let sm = monitor
        .prometheus
        .as_ref()
        .and_then(|p| p.service_monitor.as_ref())?;

    let mut labels = cluster.offshoot_labels();
    labels.extend(sm.labels.clone());

    let mut obj = DynamicObject::new(&cluster.stats_service_name(), &service_monitor_resource());
    obj.metadata.namespace = cluster.namespace();
    obj.metadata.labels = Some(labels);
    obj.metadata.owner_references = Some(vec![owner_reference(cluster)]);
    obj.data = serde_json::json!({
        "spec": {
            "namespaceSelector": { "matchNames": [cluster.namespace_or_default()] },
            "selector": {
                "matchLabels": {
                    "app.kubernetes.io/instance": cluster.offshoot_name(),
                    "searchdb.dev/role": "stats",
                }
            },
            "endpoints": [{
                "port": "prom-http",
                "interval": sm.interval.clone().unwrap_or_else(|| "30s".to_string()),
            }],
        }
    });
    Some(obj)
}

// ============================================================================
// Secrets
// ============================================================================

pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Credentials secret with a fresh random password
pub fn build_database_secret(cluster: &SearchCluster) -> Secret {
    let data = BTreeMap::from([
        (
            "username".to_string(),
            ByteString(GENERATED_USERNAME.as_bytes().to_vec()),
        ),
        (
            "password".to_string(),
            ByteString(generate_password().into_bytes()),
        ),
    ]);
    Secret {
        metadata: object_meta(cluster, cluster.generated_auth_secret_name()),
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

fn tls_error(e: rcgen::Error) -> Error {
    Error::ConfigError(format!("failed to generate certificate: {e}"))
}

/// Self-signed CA plus a node certificate valid for every in-cluster name
pub fn build_certificate_secret(cluster: &SearchCluster) -> Result<Secret> {
    let ca_key = KeyPair::generate().map_err(tls_error)?;
    let mut ca_params = CertificateParams::default();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.distinguished_name = DistinguishedName::new();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, format!("{}-ca", cluster.name_any()));
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let ca_cert = ca_params.self_signed(&ca_key).map_err(tls_error)?;

    let namespace = cluster.namespace_or_default();
    let governing = cluster.governing_service_name();
    let client = cluster.client_service_name();
    let sans = vec![
        "localhost".to_string(),
        client.clone(),
        format!("{client}.{namespace}.svc"),
        format!("*.{governing}.{namespace}.svc"),
        format!("*.{governing}.{namespace}.svc.cluster.local"),
    ];
    let mut node_params = CertificateParams::new(sans).map_err(tls_error)?;
    node_params
        .distinguished_name
        .push(DnType::CommonName, cluster.name_any());
    let node_key = KeyPair::generate().map_err(tls_error)?;
    let node_cert = node_params
        .signed_by(&node_key, &ca_cert, &ca_key)
        .map_err(tls_error)?;

    let data = BTreeMap::from([
        ("ca.crt".to_string(), ByteString(ca_cert.pem().into_bytes())),
        ("tls.crt".to_string(), ByteString(node_cert.pem().into_bytes())),
        (
            "tls.key".to_string(),
            ByteString(node_key.serialize_pem().into_bytes()),
        ),
    ]);
    Ok(Secret {
        metadata: object_meta(cluster, cluster.generated_cert_secret_name()),
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}

// ============================================================================
// Configuration
// ============================================================================

/// Engine configuration shared by every node
pub fn default_config(cluster: &SearchCluster) -> String {
    let mut lines = vec![
        format!("cluster.name: {}", cluster.name_any()),
        "network.host: 0.0.0.0".to_string(),
        format!("discovery.seed_hosts: {}", cluster.governing_service_name()),
        format!("path.data: {DATA_MOUNT_PATH}"),
        format!("http.port: {HTTP_PORT}"),
        format!("transport.port: {TRANSPORT_PORT}"),
    ];
    if cluster.spec.enable_ssl {
        lines.push("security.ssl.http.enabled: true".to_string());
        lines.push(format!("security.ssl.http.pemcert_filepath: {CERT_MOUNT_PATH}/tls.crt"));
        lines.push(format!("security.ssl.http.pemkey_filepath: {CERT_MOUNT_PATH}/tls.key"));
        lines.push(format!(
            "security.ssl.http.pemtrustedcas_filepath: {CERT_MOUNT_PATH}/ca.crt"
        ));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// SHA-256 of the configuration, stamped on pod templates so config changes
/// roll the pods.
pub fn config_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

pub fn build_config_secret(cluster: &SearchCluster) -> Secret {
    let content = default_config(cluster);
    let mut meta = object_meta(cluster, cluster.config_secret_name());
    meta.annotations = Some(BTreeMap::from([(
        CONFIG_HASH_ANNOTATION.to_string(),
        config_hash(&content),
    )]));
    Secret {
        metadata: meta,
        data: Some(BTreeMap::from([(
            CONFIG_FILE.to_string(),
            ByteString(content.into_bytes()),
        )])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

// ============================================================================
// RBAC
// ============================================================================

pub fn build_service_account(cluster: &SearchCluster) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(cluster, cluster.offshoot_name()),
        ..Default::default()
    }
}

/// Nodes only need to read their own cluster's secrets and discover peers.
pub fn build_role(cluster: &SearchCluster) -> Role {
    Role {
        metadata: object_meta(cluster, cluster.offshoot_name()),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["secrets".to_string()]),
                resource_names: Some(cluster.referenced_secret_names()),
                verbs: vec!["get".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["pods".to_string(), "endpoints".to_string()]),
                verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
                ..Default::default()
            },
        ]),
    }
}

pub fn build_role_binding(cluster: &SearchCluster) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(cluster, cluster.offshoot_name()),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: cluster.offshoot_name(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: cluster.offshoot_name(),
            namespace: cluster.namespace(),
            ..Default::default()
        }]),
    }
}

// ============================================================================
// Node sets
// ============================================================================

fn node_set_labels(cluster: &SearchCluster, node_set: &NodeSet) -> BTreeMap<String, String> {
    let mut labels = cluster.offshoot_labels();
    labels.extend(node_set.labels.clone());
    labels
}

fn node_set_selector(cluster: &SearchCluster, node_set: &NodeSet) -> BTreeMap<String, String> {
    let mut selector = cluster.offshoot_selectors();
    selector.extend(node_set.labels.clone());
    selector
}

fn anti_affinity(cluster: &SearchCluster, node_set: &NodeSet) -> Affinity {
    let mut match_labels = cluster.offshoot_selectors();
    match_labels.insert(
        node_set.role.affinity_label().to_string(),
        NODE_ROLE_SET.to_string(),
    );
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_labels: Some(match_labels),
                            ..Default::default()
                        }),
                        topology_key: "kubernetes.io/hostname".to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn data_claim_template(cluster: &SearchCluster, node_set: &NodeSet) -> PersistentVolumeClaim {
    let storage = node_set.storage.clone().unwrap_or_default();
    let size = storage.size.unwrap_or_else(|| "1Gi".to_string());
    let access_modes = if storage.access_modes.is_empty() {
        vec!["ReadWriteOnce".to_string()]
    } else {
        storage.access_modes
    };
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            labels: Some(node_set_labels(cluster, node_set)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: storage.storage_class_name,
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), Quantity(size))])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

fn volume_mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret: String) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_pod_template(
    cluster: &SearchCluster,
    node_set: &NodeSet,
    version: &SearchClusterVersion,
) -> PodTemplateSpec {
    let mut mounts = vec![
        volume_mount(DATA_VOLUME, DATA_MOUNT_PATH, false),
        volume_mount(CONFIG_VOLUME, CONFIG_MOUNT_PATH, true),
    ];
    let mut volumes = vec![secret_volume(CONFIG_VOLUME, cluster.config_secret_name())];

    if cluster.spec.storage_type == Some(StorageType::Ephemeral) {
        volumes.push(Volume {
            name: DATA_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }
    if let Some(cert) = cluster
        .spec
        .certificate_secret
        .as_ref()
        .filter(|_| cluster.spec.enable_ssl)
    {
        mounts.push(volume_mount(CERT_VOLUME, CERT_MOUNT_PATH, true));
        volumes.push(secret_volume(CERT_VOLUME, cert.secret_name.clone()));
    }

    let init_container = Container {
        name: "config-merger".to_string(),
        image: Some(version.spec.init_container.image.clone()),
        env: Some(node_set.init_env.clone()),
        volume_mounts: Some(vec![
            volume_mount(DATA_VOLUME, DATA_MOUNT_PATH, false),
            volume_mount(CONFIG_VOLUME, CONFIG_MOUNT_PATH, true),
        ]),
        ..Default::default()
    };

    let container = Container {
        name: "searchdb".to_string(),
        image: Some(version.spec.db.image.clone()),
        env: Some(node_set.env.clone()),
        resources: node_set.resources.clone(),
        ports: Some(vec![
            ContainerPort {
                name: Some("http".to_string()),
                container_port: HTTP_PORT,
                ..Default::default()
            },
            ContainerPort {
                name: Some("transport".to_string()),
                container_port: TRANSPORT_PORT,
                ..Default::default()
            },
        ]),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(node_set_labels(cluster, node_set)),
            annotations: Some(BTreeMap::from([(
                CONFIG_HASH_ANNOTATION.to_string(),
                config_hash(&default_config(cluster)),
            )])),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(cluster.offshoot_name()),
            init_containers: Some(vec![init_container]),
            containers: vec![container],
            volumes: Some(volumes),
            affinity: Some(anti_affinity(cluster, node_set)),
            ..Default::default()
        }),
    }
}

pub fn build_statefulset(
    cluster: &SearchCluster,
    node_set: &NodeSet,
    version: &SearchClusterVersion,
) -> StatefulSet {
    let durable = cluster.spec.storage_type != Some(StorageType::Ephemeral);
    StatefulSet {
        metadata: ObjectMeta {
            labels: Some(node_set_labels(cluster, node_set)),
            ..object_meta(cluster, node_set.name.clone())
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(node_set.replicas),
            selector: LabelSelector {
                match_labels: Some(node_set_selector(cluster, node_set)),
                ..Default::default()
            },
            service_name: cluster.governing_service_name(),
            pod_management_policy: Some("Parallel".to_string()),
            template: build_pod_template(cluster, node_set, version),
            volume_claim_templates: durable.then(|| vec![data_claim_template(cluster, node_set)]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Disruption budget for a node set that declares `maxUnavailable`
pub fn build_pdb(cluster: &SearchCluster, node_set: &NodeSet) -> Option<PodDisruptionBudget> {
    let max_unavailable = node_set.max_unavailable.clone()?;
    Some(PodDisruptionBudget {
        metadata: object_meta(cluster, node_set.name.clone()),
        spec: Some(PodDisruptionBudgetSpec {
            selector: Some(LabelSelector {
                match_labels: Some(node_set_selector(cluster, node_set)),
                ..Default::default()
            }),
            max_unavailable: Some(max_unavailable),
            ..Default::default()
        }),
        status: None,
    })
}
