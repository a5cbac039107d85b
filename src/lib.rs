//! searchdb-operator: Kubernetes operator for role-partitioned search clusters
//!
//! This crate reconciles `SearchCluster` objects into StatefulSets, Services
//! and Secrets, and validates them through an admission webhook.

pub mod controller;
pub mod crd;
pub mod error;
pub mod ports;
pub mod telemetry;
pub mod validation;

#[cfg(feature = "admission-webhook")]
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::error::{Error, Result};
