//! Request pipeline: admission control, then forwarding.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::proxy::Forwarder;
use crate::ratelimit::{build_controller, Admission, AdmissionController, CounterStore};

/// Composes the admission controller and the forwarder behind one mount
/// prefix. Paths outside the prefix go to the static site collaborator.
pub struct Gateway {
    admission: AdmissionController,
    forwarder: Forwarder,
    mount_prefix: String,
    static_dir: Option<PathBuf>,
}

impl Gateway {
    /// Rebinds the controller to `mount_prefix`.
    pub fn new(
        admission: AdmissionController,
        forwarder: Forwarder,
        mount_prefix: impl Into<String>,
    ) -> Self {
        let mount_prefix = mount_prefix.into();
        Self {
            admission: admission.with_mount_prefix(mount_prefix.clone()),
            forwarder,
            mount_prefix,
            static_dir: None,
        }
    }

    /// Serve files from `dir` for paths outside the mount prefix.
    pub fn with_static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Assemble a gateway from configuration and an optional counter store.
    pub fn from_config(
        config: &GatewayConfig,
        store: Option<Arc<dyn CounterStore>>,
    ) -> Result<Self> {
        let prefix = config.server.mount_prefix.clone();
        let admission = build_controller(&config.rate_limiting, &prefix, store);
        let forwarder =
            Forwarder::new(config.upstream.clone(), config.cors.clone(), prefix.clone())?;

        Ok(Self::new(admission, forwarder, prefix)
            .with_static_dir(config.server.static_dir.clone()))
    }

    /// Run one request through the pipeline.
    #[instrument(skip(self, req), fields(method = %req.method(), path = %req.uri().path()))]
    pub async fn handle(&self, req: Request) -> Response {
        let path = req.uri().path().to_string();

        if !path.starts_with(&self.mount_prefix) {
            return self.serve_static(req).await;
        }

        // Preflights are answered before admission so they are never counted
        // or rejected.
        if req.method() == Method::OPTIONS {
            return self.forwarder.preflight(req.headers(), req.uri());
        }

        let admission = match self.admission.check(&path, req.headers()).await {
            Ok(admission) => admission,
            Err(e) => return store_unavailable(&e),
        };

        match admission {
            Admission::Denied(quota) => quota.rejection_response(),
            Admission::Admitted(quota) => {
                let mut response = self.forwarder.forward(req).await;
                quota.apply_headers(response.headers_mut());
                response
            }
            Admission::Bypass | Admission::Unlimited | Admission::FailOpen => {
                debug!(?admission, "Forwarding without quota headers");
                self.forwarder.forward(req).await
            }
        }
    }

    async fn serve_static(&self, req: Request) -> Response {
        let Some(dir) = &self.static_dir else {
            return not_found();
        };

        match ServeDir::new(dir).oneshot(req).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        }
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not Found" })),
    )
        .into_response()
}

/// The `503` returned when a configured counter store fails.
fn store_unavailable(err: &GatewayError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "error": "Rate limiter unavailable",
            "detail": err.to_string(),
        })),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn dispatch(State(gateway): State<Arc<Gateway>>, req: Request<Body>) -> Response {
    gateway.handle(req).await
}

/// Build the HTTP router for a gateway.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}
