//! Admission Webhook Server
//!
//! Serves the ValidatingAdmissionWebhook endpoint for SearchCluster objects,
//! plus health and metrics.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use opentelemetry::{global, propagation::Extractor};
use serde::Serialize;
use tracing::{error, info, instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::admission::{admit, AdmissionState};
use crate::error::{Error, Result};

struct HeaderExtractor<'a>(&'a HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v: &HeaderValue| v.to_str().ok())
    }
    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k: &HeaderName| k.as_str()).collect()
    }
}

async fn extract_trace_context(request: Request, next: Next) -> Response {
    let parent_cx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(request.headers()))
    });
    tracing::Span::current().set_parent(parent_cx);
    next.run(request).await
}

/// TLS configuration for the webhook server
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// Webhook server state
pub struct WebhookServer {
    state: AdmissionState,
    tls_config: Option<TlsConfig>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub initialized: bool,
}

impl WebhookServer {
    pub fn new(state: AdmissionState) -> Self {
        Self {
            state,
            tls_config: None,
        }
    }

    pub fn with_tls(mut self, cert_path: String, key_path: String) -> Self {
        self.tls_config = Some(TlsConfig {
            cert_path,
            key_path,
        });
        self
    }

    pub fn router(self) -> Router {
        let state = Arc::new(self.state);

        let router = Router::new()
            .route("/healthz", get(health_handler))
            .route("/validate", post(validate_handler));
        #[cfg(feature = "metrics")]
        let router = router.route("/metrics", get(metrics_handler));

        router
            .layer(middleware::from_fn(extract_trace_context))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the webhook server
    pub async fn start(self, addr: SocketAddr) -> Result<()> {
        let tls = self.tls_config.clone();
        let app = self.router();

        match tls {
            Some(tls) => {
                info!("Starting webhook server on {} (TLS)", addr);
                let config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                    .await
                    .map_err(|e| {
                        Error::ConfigError(format!(
                            "Failed to load webhook certificate {}: {e}",
                            tls.cert_path
                        ))
                    })?;
                axum_server::bind_rustls(addr, config)
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| Error::ConfigError(format!("Webhook server error: {e}")))?;
            }
            None => {
                info!("Starting webhook server on {} (plain HTTP)", addr);
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .map_err(|e| Error::ConfigError(format!("Failed to bind to {addr}: {e}")))?;
                axum::serve(listener, app)
                    .await
                    .map_err(|e| Error::ConfigError(format!("Webhook server error: {e}")))?;
            }
        }
        Ok(())
    }
}

// HTTP Handlers

async fn health_handler(State(state): State<Arc<AdmissionState>>) -> impl IntoResponse {
    let initialized = matches!(*state, AdmissionState::Ready(_));
    Json(HealthResponse {
        status: "healthy".to_string(),
        initialized,
    })
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> impl IntoResponse {
    match crate::controller::metrics::encode_registry() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[instrument(skip_all)]
async fn validate_handler(
    State(state): State<Arc<AdmissionState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> impl IntoResponse {
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!("Failed to parse admission request: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid admission request: {e}"))
                        .into_review(),
                ),
            );
        }
    };

    let decision = admit(&state, &req).await;
    (StatusCode::OK, Json(decision.into_response(&req).into_review()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(kind: &str) -> AdmissionReview<DynamicObject> {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "0df28fbd-5f5f-11e8-bc74-36e6bb280816",
                "kind": { "group": "searchdb.dev", "version": "v1alpha1", "kind": kind },
                "resource": { "group": "searchdb.dev", "version": "v1alpha1", "resource": "searchclusters" },
                "operation": "CREATE",
                "userInfo": { "username": "admin" },
                "name": "logs",
                "namespace": "default",
                "object": {
                    "apiVersion": "searchdb.dev/v1alpha1",
                    "kind": kind,
                    "metadata": { "name": "logs", "namespace": "default" },
                    "spec": { "version": "7.10.2" }
                }
            }
        }))
        .unwrap()
    }

    async fn allowed(state: AdmissionState, review: AdmissionReview<DynamicObject>) -> bool {
        let response = validate_handler(State(Arc::new(state)), Json(review))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        value["response"]["allowed"].as_bool().unwrap()
    }

    #[tokio::test]
    async fn test_uninitialized_server_denies_search_clusters() {
        assert!(!allowed(AdmissionState::Uninitialized, review("SearchCluster")).await);
    }

    #[tokio::test]
    async fn test_other_kinds_pass_through() {
        assert!(allowed(AdmissionState::Uninitialized, review("SearchClusterVersion")).await);
    }

    #[tokio::test]
    async fn test_health_reports_initialization() {
        let response = health_handler(State(Arc::new(AdmissionState::Uninitialized)))
            .await
            .into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["status"], "healthy");
        assert_eq!(value["initialized"], false);
    }

    #[test]
    fn test_router_builds() {
        let _router = WebhookServer::new(AdmissionState::Uninitialized)
            .with_tls("tls.crt".to_string(), "tls.key".to_string())
            .router();
    }
}
