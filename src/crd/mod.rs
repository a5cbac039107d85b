//! Custom Resource Definitions for the SearchDB operator

pub mod quantity;
mod search_cluster;
mod search_version;
pub mod types;

#[cfg(test)]
mod tests;

pub use search_cluster::{
    SearchCluster, SearchClusterSpec, SearchClusterStatus, INITIALIZED_ANNOTATION,
    INSTANCE_LABEL, MANAGED_BY_LABEL, NAME_LABEL, OPERATOR_NAME,
};
pub use search_version::{ImageRef, SearchClusterVersion, SearchClusterVersionSpec};
pub use types::*;
