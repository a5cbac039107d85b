//! Per-role node set derivation
//!
//! Turns a SearchCluster into the node sets that back it: one per role in a
//! discrete topology, or a single combined set. Each [`NodeSet`] carries
//! everything needed to render its StatefulSet; rendering itself lives in
//! `resources`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, ObjectFieldSelector, ResourceRequirements, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::heap::{heap_bytes, java_opts, memory_request};
use crate::crd::{NodeRoleSpec, SearchCluster, StorageSpec};

pub const NODE_ROLE_MASTER: &str = "node.role.master";
pub const NODE_ROLE_CLIENT: &str = "node.role.client";
pub const NODE_ROLE_DATA: &str = "node.role.data";
pub const NODE_ROLE_SET: &str = "set";

pub const ADMIN_USERNAME_ENV: &str = "ADMIN_USERNAME";
pub const ADMIN_PASSWORD_ENV: &str = "ADMIN_PASSWORD";

/// Versions starting with this prefix bootstrap from an explicit master list.
const INITIAL_MASTER_LIST_VERSION_PREFIX: &str = "1.";

/// Role a node set plays in the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Master,
    Data,
    Client,
    /// Master, data and client at once
    Combined,
}

impl NodeRole {
    fn default_prefix(&self) -> Option<&'static str> {
        match self {
            NodeRole::Master => Some("master"),
            NodeRole::Data => Some("data"),
            NodeRole::Client => Some("client"),
            NodeRole::Combined => None,
        }
    }

    /// `(ingest, master, data)`
    fn flags(&self) -> (bool, bool, bool) {
        match self {
            NodeRole::Master => (false, true, false),
            NodeRole::Data => (false, false, true),
            NodeRole::Client => (true, false, false),
            NodeRole::Combined => (true, true, true),
        }
    }

    fn role_labels(&self) -> &'static [&'static str] {
        match self {
            NodeRole::Master => &[NODE_ROLE_MASTER],
            NodeRole::Data => &[NODE_ROLE_DATA],
            NodeRole::Client => &[NODE_ROLE_CLIENT],
            NodeRole::Combined => &[NODE_ROLE_MASTER, NODE_ROLE_DATA, NODE_ROLE_CLIENT],
        }
    }

    /// Label whose value drives pod anti-affinity for this role.
    pub fn affinity_label(&self) -> &'static str {
        match self {
            NodeRole::Master => NODE_ROLE_MASTER,
            NodeRole::Data => NODE_ROLE_DATA,
            NodeRole::Client | NodeRole::Combined => NODE_ROLE_CLIENT,
        }
    }

    /// Whether this role takes part in master election.
    pub fn is_master_eligible(&self) -> bool {
        matches!(self, NodeRole::Master | NodeRole::Combined)
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Data => write!(f, "data"),
            NodeRole::Client => write!(f, "client"),
            NodeRole::Combined => write!(f, "combined"),
        }
    }
}

/// Desired state of one StatefulSet
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSet {
    pub role: NodeRole,
    pub name: String,
    /// Role labels, added on top of the cluster's offshoot labels
    pub labels: BTreeMap<String, String>,
    pub replicas: i32,
    pub heap_bytes: i64,
    /// Main container environment, user overrides already applied
    pub env: Vec<EnvVar>,
    /// Environment of the `config-merger` init container
    pub init_env: Vec<EnvVar>,
    pub resources: Option<ResourceRequirements>,
    pub storage: Option<StorageSpec>,
    pub max_unavailable: Option<IntOrString>,
}

impl NodeSet {
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }
}

/// Replace variables with the same name in place, append the rest.
pub fn upsert_env_vars(mut env: Vec<EnvVar>, updates: impl IntoIterator<Item = EnvVar>) -> Vec<EnvVar> {
    for update in updates {
        match env.iter_mut().find(|e| e.name == update.name) {
            Some(existing) => *existing = update,
            None => env.push(update),
        }
    }
    env
}

fn plain_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.to_string()),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Derives node sets for one cluster at one engine version.
pub struct NodeSpecBuilder<'a> {
    cluster: &'a SearchCluster,
    version: &'a str,
}

impl<'a> NodeSpecBuilder<'a> {
    pub fn new(cluster: &'a SearchCluster, version: &'a str) -> Self {
        Self { cluster, version }
    }

    /// Node sets in convergence order: client, master, data; or the single
    /// combined set.
    pub fn node_sets(&self) -> Vec<NodeSet> {
        match &self.cluster.spec.topology {
            Some(topology) => vec![
                self.build(NodeRole::Client, &topology.client),
                self.build(NodeRole::Master, &topology.master),
                self.build(NodeRole::Data, &topology.data),
            ],
            None => vec![self.build(NodeRole::Combined, &self.combined_spec())],
        }
    }

    /// Combined mode reads its sizing from the top-level spec.
    fn combined_spec(&self) -> NodeRoleSpec {
        let spec = &self.cluster.spec;
        NodeRoleSpec {
            prefix: None,
            replicas: spec.replicas,
            resources: spec.pod_template.resources.clone(),
            storage: spec.storage.clone(),
            max_unavailable: spec.max_unavailable.clone(),
        }
    }

    pub fn node_set_name(&self, role: NodeRole, node: &NodeRoleSpec) -> String {
        let base = self.cluster.offshoot_name();
        let prefix = node
            .prefix
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(role.default_prefix());
        match prefix {
            Some(prefix) => format!("{prefix}-{base}"),
            None => base,
        }
    }

    pub fn build(&self, role: NodeRole, node: &NodeRoleSpec) -> NodeSet {
        let name = self.node_set_name(role, node);
        let replicas = node.replicas.unwrap_or(1);
        let heap = heap_bytes(memory_request(node.resources.as_ref()));
        let (ingest, master, data) = role.flags();

        let mut env = vec![
            plain_env("ES_JAVA_OPTS", java_opts(heap)),
            plain_env("node.ingest", ingest.to_string()),
            plain_env("node.master", master.to_string()),
            plain_env("node.data", data.to_string()),
        ];

        if role.is_master_eligible() {
            let bootstrap = if self.version.starts_with(INITIAL_MASTER_LIST_VERSION_PREFIX) {
                plain_env(
                    "cluster.initial_master_nodes",
                    self.initial_master_nodes(),
                )
            } else {
                plain_env(
                    "discovery.zen.minimum_master_nodes",
                    (replicas / 2 + 1).to_string(),
                )
            };
            env = upsert_env_vars(env, [bootstrap]);
        }

        env = upsert_env_vars(env, self.common_env());
        env = upsert_env_vars(env, self.cluster.spec.pod_template.env.iter().cloned());

        let init_env = vec![
            plain_env("NODE_MASTER", master.to_string()),
            plain_env("NODE_DATA", data.to_string()),
            plain_env("NODE_INGEST", ingest.to_string()),
        ];

        let labels = role
            .role_labels()
            .iter()
            .map(|l| (l.to_string(), NODE_ROLE_SET.to_string()))
            .collect();

        NodeSet {
            role,
            name,
            labels,
            replicas,
            heap_bytes: heap,
            env,
            init_env,
            resources: node.resources.clone(),
            storage: node.storage.clone(),
            max_unavailable: node.max_unavailable.clone(),
        }
    }

    /// Pod names of every master-eligible replica.
    fn initial_master_nodes(&self) -> String {
        let (set_name, replicas) = match &self.cluster.spec.topology {
            Some(topology) => (
                self.node_set_name(NodeRole::Master, &topology.master),
                topology.master.replicas.unwrap_or(1),
            ),
            None => (
                self.cluster.offshoot_name(),
                self.cluster.spec.replicas.unwrap_or(1),
            ),
        };
        (0..replicas.max(1))
            .map(|i| format!("{set_name}-{i}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Variables shared by every node set.
    fn common_env(&self) -> Vec<EnvVar> {
        let mut env = vec![
            plain_env("cluster.name", self.cluster.name_any()),
            EnvVar {
                name: "node.name".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.name".to_string(),
                        api_version: None,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            plain_env("network.host", "0.0.0.0"),
            plain_env("discovery.seed_hosts", self.cluster.governing_service_name()),
        ];
        if let Some(secret) = &self.cluster.spec.database_secret {
            env.push(secret_env(ADMIN_USERNAME_ENV, &secret.secret_name, "username"));
            env.push(secret_env(ADMIN_PASSWORD_ENV, &secret.secret_name, "password"));
        }
        env
    }
}
