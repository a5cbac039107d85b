//! Admission decisions for SearchCluster objects
//!
//! Create and update requests are validated (update additionally checks
//! immutable fields); delete requests are refused under `DoNotTerminate`.
//! Requests for other kinds, sub-resources or operations pass untouched.

use std::sync::Arc;

use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use kube::core::DynamicObject;
use tracing::{debug, info, warn};

use crate::crd::{SearchCluster, TerminationPolicy};
use crate::error::Error;
use crate::ports::{ClusterLookup, SecretLookup, VersionCatalog};
use crate::validation::{check_update, SpecValidator};

const GROUP: &str = "searchdb.dev";
const KIND: &str = "SearchCluster";

/// Rejection categories reported in `status.reason`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Denial {
    BadRequest,
    Forbidden,
    InternalServerError,
    Uninitialized,
}

impl Denial {
    pub fn code(&self) -> u16 {
        match self {
            Denial::BadRequest => 400,
            Denial::Forbidden => 403,
            Denial::InternalServerError | Denial::Uninitialized => 500,
        }
    }
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::BadRequest => write!(f, "BadRequest"),
            Denial::Forbidden => write!(f, "Forbidden"),
            Denial::InternalServerError => write!(f, "InternalError"),
            Denial::Uninitialized => write!(f, "Uninitialized"),
        }
    }
}

/// Client handles admission needs
#[derive(Clone)]
pub struct AdmissionHandles {
    pub catalog: Arc<dyn VersionCatalog>,
    pub secrets: Arc<dyn SecretLookup>,
    pub clusters: Arc<dyn ClusterLookup>,
}

/// Built once at startup and shared read-only by every request.
#[derive(Clone, Default)]
pub enum AdmissionState {
    #[default]
    Uninitialized,
    Ready(AdmissionHandles),
}

/// Outcome of one admission request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(Denial, String),
}

impl Decision {
    fn denied(denial: Denial, message: impl Into<String>) -> Self {
        Decision::Denied(denial, message.into())
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Render into an admission response for `req`.
    pub fn into_response(self, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        match self {
            Decision::Allowed => AdmissionResponse::from(req),
            Decision::Denied(denial, message) => {
                let mut response = AdmissionResponse::from(req).deny(message);
                response.result.code = denial.code();
                response.result.reason = denial.to_string();
                response
            }
        }
    }
}

fn parse(obj: Option<&DynamicObject>, which: &str) -> Result<SearchCluster, String> {
    let obj = obj.ok_or_else(|| format!("admission request carries no {which} object"))?;
    let value = serde_json::to_value(obj).map_err(|e| e.to_string())?;
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn operation_name(op: &Operation) -> &'static str {
    match op {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}

/// Decide an admission request.
pub async fn admit(state: &AdmissionState, req: &AdmissionRequest<DynamicObject>) -> Decision {
    let decision = decide(state, req).await;

    #[cfg(feature = "metrics")]
    crate::controller::metrics::inc_admission_decision(
        operation_name(&req.operation),
        decision.is_allowed(),
    );

    match &decision {
        Decision::Allowed => debug!(
            "Admitted {} of {}/{}",
            operation_name(&req.operation),
            req.namespace.as_deref().unwrap_or_default(),
            req.name
        ),
        Decision::Denied(denial, message) => info!(
            "Denied {} of {}/{} ({}): {}",
            operation_name(&req.operation),
            req.namespace.as_deref().unwrap_or_default(),
            req.name,
            denial,
            message
        ),
    }
    decision
}

async fn decide(state: &AdmissionState, req: &AdmissionRequest<DynamicObject>) -> Decision {
    let handled = matches!(
        req.operation,
        Operation::Create | Operation::Update | Operation::Delete
    );
    let is_sub_resource = req.sub_resource.as_deref().is_some_and(|s| !s.is_empty());
    if !handled || is_sub_resource || req.kind.group != GROUP || req.kind.kind != KIND {
        return Decision::Allowed;
    }

    let handles = match state {
        AdmissionState::Ready(handles) => handles,
        AdmissionState::Uninitialized => {
            return Decision::denied(Denial::Uninitialized, "not initialized");
        }
    };

    match req.operation {
        Operation::Delete => admit_delete(handles, req).await,
        _ => admit_write(handles, req).await,
    }
}

async fn admit_delete(
    handles: &AdmissionHandles,
    req: &AdmissionRequest<DynamicObject>,
) -> Decision {
    if req.name.is_empty() {
        return Decision::Allowed;
    }
    let namespace = req.namespace.clone().unwrap_or_default();
    match handles.clusters.get_cluster(&namespace, &req.name).await {
        Ok(Some(cluster))
            if cluster.spec.termination_policy == Some(TerminationPolicy::DoNotTerminate) =>
        {
            Decision::denied(
                Denial::BadRequest,
                format!(
                    "SearchCluster \"{}/{}\" can't be terminated. To delete, change spec.terminationPolicy",
                    namespace, req.name
                ),
            )
        }
        Ok(_) => Decision::Allowed,
        Err(e) if e.is_not_found() => Decision::Allowed,
        Err(e) => Decision::denied(Denial::InternalServerError, e.to_string()),
    }
}

async fn admit_write(
    handles: &AdmissionHandles,
    req: &AdmissionRequest<DynamicObject>,
) -> Decision {
    let cluster = match parse(req.object.as_ref(), "new") {
        Ok(cluster) => cluster,
        Err(e) => return Decision::denied(Denial::BadRequest, e),
    };

    if matches!(req.operation, Operation::Update) {
        let mut old = match parse(req.old_object.as_ref(), "old") {
            Ok(old) => old,
            Err(e) => return Decision::denied(Denial::BadRequest, e),
        };
        old.spec.set_defaults();
        if let Err(e) = check_update(&old, &cluster) {
            return Decision::denied(Denial::BadRequest, message_of(e));
        }
    }

    let validator = SpecValidator::new(handles.catalog.clone(), handles.secrets.clone());
    if let Err(e) = validator.validate(&cluster, false).await {
        warn!("SearchCluster {} rejected: {}", cluster.key(), e);
        return Decision::denied(Denial::Forbidden, message_of(e));
    }
    Decision::Allowed
}

/// Strip the error-kind prefix; submitters only see the reason.
fn message_of(err: Error) -> String {
    match err {
        Error::ValidationError(msg)
        | Error::PreconditionViolation(msg)
        | Error::PolicyViolation(msg) => msg,
        other => other.to_string(),
    }
}
