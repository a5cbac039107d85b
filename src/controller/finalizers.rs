//! Finalizer guarding SearchCluster deletion
//!
//! While the finalizer is present the API server keeps the object around, so
//! the cleanup pass can hand volumes and secrets over (or not) according to
//! `spec.terminationPolicy` before garbage collection runs.

/// Added on the first Apply pass by `kube::runtime::finalizer`.
pub const SEARCH_CLUSTER_FINALIZER: &str = "searchclusters.searchdb.dev/finalizer";
