//! Immutable-field enforcement on update

use serde_json::Value;

use crate::crd::SearchCluster;
use crate::error::{Error, Result};

/// Object-level keys that may never change.
const PROTECTED_OBJECT_PATHS: &[(&str, &str)] = &[
    ("apiVersion", "/apiVersion"),
    ("kind", "/kind"),
    ("name", "/metadata/name"),
    ("namespace", "/metadata/namespace"),
];

/// Spec sub-trees that may never change once set.
pub const PROTECTED_SPEC_FIELDS: &[&str] = &[
    "spec.standby",
    "spec.streaming",
    "spec.archiver",
    "spec.databaseSecret",
    "spec.storageType",
    "spec.storage",
    "spec.init",
];

fn pointer_for(field: &str) -> String {
    format!("/{}", field.replace('.', "/"))
}

/// Full list of protected fields, in the order they are reported.
pub fn protected_fields_message() -> String {
    let mut lines = vec!["At least one of the following was changed:".to_string()];
    lines.extend(PROTECTED_OBJECT_PATHS.iter().map(|(label, _)| label.to_string()));
    lines.extend(PROTECTED_SPEC_FIELDS.iter().map(|f| f.to_string()));
    lines.join("\n\t")
}

/// Reject updates that touch a protected field.
///
/// A database secret may be assigned once: when `old` has none, the new
/// value is accepted as-is. The error lists every protected field, not only
/// the ones that changed.
pub fn check_update(old: &SearchCluster, new: &SearchCluster) -> Result<()> {
    let mut old = old.clone();
    if old.spec.database_secret.is_none() {
        old.spec.database_secret = new.spec.database_secret.clone();
    }

    let old_json = serde_json::to_value(&old)?;
    let new_json = serde_json::to_value(new)?;

    let changed = changed_paths(&old_json, &new_json);
    if changed.is_empty() {
        return Ok(());
    }
    Err(Error::PreconditionViolation(format!(
        "precondition failed for: {}.{}",
        changed.join(", "),
        protected_fields_message()
    )))
}

fn changed_paths(old: &Value, new: &Value) -> Vec<String> {
    let object_paths = PROTECTED_OBJECT_PATHS
        .iter()
        .map(|(label, pointer)| (label.to_string(), pointer.to_string()));
    let spec_paths = PROTECTED_SPEC_FIELDS
        .iter()
        .map(|field| (field.to_string(), pointer_for(field)));

    object_paths
        .chain(spec_paths)
        .filter(|(_, pointer)| old.pointer(pointer) != new.pointer(pointer))
        .map(|(label, _)| label)
        .collect()
}
