//! Admission-time and reconcile-time validation of SearchCluster objects

mod spec;
mod update;

pub use spec::{
    validate_leader_election, validate_monitor_spec, validate_storage, SpecValidator,
    FORBIDDEN_ENV_VARS,
};
pub use update::{check_update, protected_fields_message, PROTECTED_SPEC_FIELDS};
