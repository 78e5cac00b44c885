//! `warden serve`: the authorization API plus health and metrics.
//!
//! Routes:
//! - `GET /healthz`: [`HealthReport`](warden_runtime::HealthReport) as JSON
//! - `GET /metrics`: Prometheus text exposition
//! - `POST /v1/authorize`: decide and audit one request
//! - `POST /v1/policy/reload`: move to a new policy version
//!
//! Ctrl-C stops accepting connections, then drains the audit pipeline.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use warden_core::WardenConfig;
use warden_core::decision::DecisionRequest;
use warden_runtime::Runtime;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Body of `POST /v1/authorize`.
#[derive(Debug, Deserialize)]
pub struct AuthorizeBody {
    #[serde(flatten)]
    pub request: DecisionRequest,

    /// Extra audit context (request id, client address, ...).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/v1/authorize", post(authorize))
        .route("/v1/policy/reload", post(reload_policy))
        .layer(TraceLayer::new_for_http())
        .with_state(runtime)
}

pub async fn run(config: WardenConfig, bind: Option<String>) -> Result<()> {
    let addr = bind.unwrap_or_else(|| config.observability.bind.clone());
    let runtime = Arc::new(Runtime::from_config(config).context("Failed to start runtime")?);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("warden listening on {}", addr);

    let served = axum::serve(listener, router(runtime.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Drain even when the server failed, so buffered events are not lost.
    if !runtime.shutdown().await {
        tracing::warn!("Audit drain timed out; undelivered batches were dead-lettered");
    }
    served.context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

async fn healthz(State(runtime): State<Arc<Runtime>>) -> Json<warden_runtime::HealthReport> {
    Json(runtime.health())
}

async fn metrics(State(runtime): State<Arc<Runtime>>) -> Response {
    match runtime.metrics().encode() {
        Ok(body) => ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn authorize(
    State(runtime): State<Arc<Runtime>>,
    Json(body): Json<AuthorizeBody>,
) -> Json<warden_core::DecisionResult> {
    Json(
        runtime
            .authorizer()
            .authorize(&body.request, body.context)
            .await,
    )
}

async fn reload_policy(State(runtime): State<Arc<Runtime>>) -> Json<serde_json::Value> {
    Json(json!({ "policy_version": runtime.reload_policy() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use warden_core::decision::DecisionResult;
    use warden_policy::{EvaluationError, PolicyEvaluator, PolicyVerdict};

    /// Allows reads, denies everything else.
    struct ReadOnly;

    #[async_trait]
    impl PolicyEvaluator for ReadOnly {
        async fn evaluate(&self, request: &DecisionRequest) -> Result<PolicyVerdict, EvaluationError> {
            if request.action == "read" {
                Ok(PolicyVerdict::allow("read-only role"))
            } else {
                Ok(PolicyVerdict::deny("read-only role"))
            }
        }
    }

    fn runtime() -> Arc<Runtime> {
        Arc::new(
            Runtime::with_components(WardenConfig::default(), Arc::new(ReadOnly), Vec::new())
                .unwrap(),
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn authorize_request(action: &str) -> Request<Body> {
        let body = json!({
            "subject": "agent:summarizer",
            "action": action,
            "resource": "dataset:tickets",
            "sensitivity": "high",
            "context": { "request_id": "r-1" }
        });
        Request::post("/v1/authorize")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_authorize_route() {
        let runtime = runtime();
        let app = router(runtime.clone());

        let response = app.clone().oneshot(authorize_request("read")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let decision: DecisionResult = serde_json::from_value(body_json(response).await).unwrap();
        assert!(decision.allow);

        let response = app.oneshot(authorize_request("delete")).await.unwrap();
        let decision = body_json(response).await;
        assert_eq!(decision["allow"], false);
        assert_eq!(decision["sensitivity"], "high");

        assert_eq!(runtime.metrics().audit_enqueued(), 2);
        assert!(runtime.shutdown().await);
    }

    #[tokio::test]
    async fn test_malformed_authorize_body_is_rejected() {
        let request = Request::post("/v1/authorize")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"subject": "x"}"#))
            .unwrap();
        let response = router(runtime()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_healthz_and_reload() {
        let app = router(runtime());

        let response = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let health = body_json(response).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["policy_version"], 0);
        assert_eq!(health["evaluator"]["state"], "closed");

        let response = app
            .clone()
            .oneshot(Request::post("/v1/policy/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["policy_version"], 1);

        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["policy_version"], 1);
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let runtime = runtime();
        let app = router(runtime.clone());
        app.clone().oneshot(authorize_request("read")).await.unwrap();
        app.clone().oneshot(authorize_request("read")).await.unwrap();

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            OPENMETRICS_CONTENT_TYPE
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("warden_cache_hits_total 1"));
        assert!(text.contains("warden_cache_misses_total 1"));
    }
}
