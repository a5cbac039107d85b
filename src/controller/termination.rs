//! Ownership hand-off of volumes and secrets on deletion
//!
//! Garbage collection deletes whatever still carries the cluster's owner
//! reference. Termination therefore decides per policy which offshoots keep
//! or gain that reference and which lose it.

use kube::ResourceExt;
use tracing::{error, info, instrument};

use super::resources::owner_reference;
use crate::crd::{SearchCluster, TerminationPolicy};
use crate::error::{Error, Result};
use crate::ports::{OffshootKind, Ports, Selection};

pub struct TerminationPolicyEngine {
    ports: Ports,
}

impl TerminationPolicyEngine {
    pub fn new(ports: Ports) -> Self {
        Self { ports }
    }

    #[instrument(skip(self, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
    pub async fn terminate(&self, cluster: &SearchCluster) -> Result<()> {
        let owner = owner_reference(cluster);
        let namespace = cluster.namespace_or_default();
        let volumes = Selection::Selector(cluster.offshoot_selector_string());
        let secrets = Selection::Names(cluster.referenced_secret_names());
        let has_secrets = !cluster.referenced_secret_names().is_empty();
        let ownership = &self.ports.ownership;

        let policy = cluster
            .spec
            .termination_policy
            .unwrap_or(TerminationPolicy::Delete);
        info!("Terminating {} with policy {}", cluster.key(), policy);

        match policy {
            TerminationPolicy::DoNotTerminate => {
                return Err(Error::PolicyViolation(format!(
                    "SearchCluster \"{}\" can't be terminated. To delete, change spec.terminationPolicy",
                    cluster.key()
                )));
            }
            TerminationPolicy::Halt | TerminationPolicy::Pause => {
                ownership
                    .remove_owner_reference(
                        OffshootKind::PersistentVolumeClaims,
                        &namespace,
                        &volumes,
                        &owner,
                    )
                    .await?;
                if has_secrets {
                    ownership
                        .remove_owner_reference(OffshootKind::Secrets, &namespace, &secrets, &owner)
                        .await?;
                }
            }
            TerminationPolicy::WipeOut => {
                if has_secrets {
                    ownership
                        .ensure_owner_reference(OffshootKind::Secrets, &namespace, &secrets, &owner)
                        .await?;
                }
                ownership
                    .ensure_owner_reference(
                        OffshootKind::PersistentVolumeClaims,
                        &namespace,
                        &volumes,
                        &owner,
                    )
                    .await?;
            }
            TerminationPolicy::Delete => {
                if has_secrets {
                    ownership
                        .remove_owner_reference(OffshootKind::Secrets, &namespace, &secrets, &owner)
                        .await?;
                }
                ownership
                    .ensure_owner_reference(
                        OffshootKind::PersistentVolumeClaims,
                        &namespace,
                        &volumes,
                        &owner,
                    )
                    .await?;
            }
        }

        if cluster.spec.monitor.is_some() {
            if let Err(e) = self.ports.monitor.delete_monitor(cluster).await {
                error!("Failed to delete monitoring for {}: {}", cluster.key(), e);
            }
        }
        Ok(())
    }
}
