//! SearchClusterVersion Custom Resource Definition
//!
//! Cluster-scoped catalog entries, one per supported engine release. A
//! SearchCluster refers to an entry by name through `spec.version`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "searchdb.dev",
    version = "v1alpha1",
    kind = "SearchClusterVersion",
    plural = "searchclusterversions",
    shortname = "scv",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Deprecated","type":"boolean","jsonPath":".spec.deprecated"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SearchClusterVersionSpec {
    /// Engine release, e.g. `7.10.2` or `1.13.2`
    pub version: String,
    #[serde(default)]
    pub db: ImageRef,
    #[serde(default)]
    pub init_container: ImageRef,
    #[serde(default)]
    pub exporter: ImageRef,
    /// Deprecated entries are refused for new clusters
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ImageRef {
    #[serde(default)]
    pub image: String,
}

impl SearchClusterVersionSpec {
    /// Reject entries missing any required field.
    pub fn validate_specs(&self) -> Result<(), String> {
        let missing = [
            ("spec.version", self.version.as_str()),
            ("spec.db.image", self.db.image.as_str()),
            ("spec.initContainer.image", self.init_container.image.as_str()),
            ("spec.exporter.image", self.exporter.image.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "SearchClusterVersion is missing required fields: {}",
                missing.join(", ")
            ))
        }
    }
}
