//! Error types for the SearchDB operator
//!
//! A single crate-wide error enum is shared by admission, reconciliation and
//! the collaborator ports so that `?` flows across module boundaries.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Malformed or inadmissible spec. Terminal, never retried.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Update touched an immutable field.
    #[error("Precondition violation: {0}")]
    PreconditionViolation(String),

    /// Operation forbidden by the declared termination policy.
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl Error {
    /// Whether the reconcile loop should retry quickly.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_) | Error::Timeout(_) | Error::FinalizerError(_)
        )
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::ValidationError(_) => "validation",
            Error::PreconditionViolation(_) => "precondition",
            Error::PolicyViolation(_) => "policy",
            Error::NotFound { .. } => "not_found",
            Error::InvalidTransition { .. } => "transition",
            Error::ConfigError(_) => "config",
            Error::SerializationError(_) => "serialization",
            Error::FinalizerError(_) => "finalizer",
            Error::Timeout(_) => "timeout",
        }
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        use kube::runtime::finalizer::Error as FinalizerError;
        match err {
            FinalizerError::ApplyFailed(inner) | FinalizerError::CleanupFailed(inner) => inner,
            FinalizerError::AddFinalizer(e) | FinalizerError::RemoveFinalizer(e) => {
                Error::KubeError(e)
            }
            FinalizerError::UnnamedObject => {
                Error::FinalizerError("object has no name".to_string())
            }
            FinalizerError::InvalidFinalizer => {
                Error::FinalizerError("invalid finalizer name".to_string())
            }
        }
    }
}
