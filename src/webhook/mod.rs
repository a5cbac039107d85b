//! Webhook Module
//!
//! ValidatingAdmissionWebhook for SearchCluster objects.
//!
//! # Example
//!
//! ```rust,ignore
//! use searchdb_operator::webhook::{AdmissionHandles, AdmissionState, WebhookServer};
//!
//! let state = AdmissionState::Ready(AdmissionHandles { catalog, secrets, clusters });
//! WebhookServer::new(state)
//!     .with_tls("/certs/tls.crt".into(), "/certs/tls.key".into())
//!     .start("0.0.0.0:8443".parse()?)
//!     .await?;
//! ```

pub mod admission;
pub mod server;

pub use admission::{admit, AdmissionHandles, AdmissionState, Decision, Denial};
pub use server::{HealthResponse, TlsConfig, WebhookServer};
