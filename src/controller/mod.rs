//! Controller module for SearchCluster reconciliation
//!
//! Holds the pure planning pieces (heap sizing, node-set construction), the
//! engines driving a pass (ensure, lifecycle, termination) and the kube-rs
//! controller loop wiring them to the API server.

mod ensure;
#[cfg(test)]
mod ensure_test;
mod finalizers;
pub mod heap;
mod kube_ports;
mod lifecycle;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod nodes;
mod reconciler;
pub mod resources;
mod termination;
#[cfg(test)]
mod termination_test;

pub use ensure::{
    aggregate, EnsureEngine, TopologyOutcome, Verb, DEFAULT_SETTLE_INTERVAL, SECRET_RETRY_DELAY,
};
pub use finalizers::SEARCH_CLUSTER_FINALIZER;
pub use kube_ports::{kube_ports, KubeClusters, RequeueSlot};
pub use lifecycle::{
    LifecycleStateMachine, PassOutcome, REASON_FAILED_TO_CREATE, REASON_HALTED, REASON_INVALID,
    REASON_SUCCESSFUL,
};
pub use nodes::{NodeRole, NodeSet, NodeSpecBuilder};
pub use reconciler::{run_controller, ControllerState};
pub use termination::TerminationPolicyEngine;
