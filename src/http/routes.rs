use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::header::{HeaderName, AUTHORIZATION};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::replay::{FlushOutcome, PipelineStats, TelemetryPipeline};
use crate::telemetry::{LifecyclePhase, TelemetrySnapshot};

use super::sse;

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct DebugHttpState {
    pub pipeline: Arc<TelemetryPipeline>,
    token: Arc<String>,
}

impl DebugHttpState {
    pub fn new(pipeline: Arc<TelemetryPipeline>, token: String) -> Self {
        Self {
            pipeline,
            token: Arc::new(token),
        }
    }

    fn authorize(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<(), HttpServerError> {
        let provided = extract_token(headers, query_token);
        match provided {
            Some(value) if value == *self.token => Ok(()),
            _ => Err(HttpServerError::Unauthorized),
        }
    }
}

/// Extractor that rejects requests without the debug token.
pub struct Authorized;

#[axum::async_trait]
impl FromRequestParts<DebugHttpState> for Authorized {
    type Rejection = HttpServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &DebugHttpState,
    ) -> Result<Self, Self::Rejection> {
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();
        state.authorize(&parts.headers, query.token.as_deref())?;
        Ok(Authorized)
    }
}

/// `?token=` fallback for clients that cannot set headers (EventSource).
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// HTTP error variants mapped to JSON responses.
#[derive(Debug)]
pub enum HttpServerError {
    Unauthorized,
    ServiceUnavailable(&'static str),
}

impl IntoResponse for HttpServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "missing or invalid token"),
            Self::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Health endpoint response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub enabled: bool,
    pub lifecycle: LifecyclePhase,
    pub session_id: String,
    pub queue_len: usize,
}

/// Metrics endpoint response payload.
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub stats: PipelineStats,
    pub diagnostics: TelemetrySnapshot,
}

/// Build the Axum router with all handlers.
pub fn build_router(state: DebugHttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/metrics-stream", get(metrics_stream_handler))
        .route("/flush", post(flush))
        .with_state(state)
}

/// Run the HTTP server loop.
pub async fn run_http_server(state: DebugHttpState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding debug HTTP listener")?;
    let router = build_router(state);
    axum::serve(listener, router)
        .await
        .context("serving debug HTTP router")?;
    Ok(())
}

pub async fn health(
    _auth: Authorized,
    State(state): State<DebugHttpState>,
) -> Json<HealthResponse> {
    let pipeline = &state.pipeline;
    Json(HealthResponse {
        status: "ok",
        enabled: pipeline.is_enabled(),
        lifecycle: pipeline.lifecycle(),
        session_id: pipeline.session_id().to_string(),
        queue_len: pipeline.queue_len(),
    })
}

pub async fn metrics(
    _auth: Authorized,
    State(state): State<DebugHttpState>,
) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        stats: state.pipeline.stats(),
        diagnostics: state.pipeline.hub().snapshot(),
    })
}

pub async fn metrics_stream_handler(
    _auth: Authorized,
    State(state): State<DebugHttpState>,
) -> sse::MetricStream {
    sse::pipeline_metrics(&state.pipeline)
}

/// Run one flush immediately instead of waiting for the timer.
pub async fn flush(
    _auth: Authorized,
    State(state): State<DebugHttpState>,
) -> Result<Json<FlushOutcome>, HttpServerError> {
    if !state.pipeline.is_enabled() {
        return Err(HttpServerError::ServiceUnavailable("replay pipeline disabled"));
    }
    Ok(Json(state.pipeline.flush().await))
}

fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(token) = query_token {
        return Some(token.to_string());
    }

    static X_DEBUG_TOKEN: HeaderName = HeaderName::from_static("x-debug-token");

    headers
        .get(&X_DEBUG_TOKEN)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| raw.strip_prefix("Bearer ").map(|v| v.to_string()))
        })
}

#[cfg(all(test, feature = "debug_http"))]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::replay::{InMemorySessionStore, LoopbackCapture, MemorySink, PipelineDeps};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    const TOKEN: &str = "smoke-token";

    fn router_for(config: PipelineConfig) -> Router {
        let pipeline = TelemetryPipeline::new(
            config,
            PipelineDeps {
                capture: Arc::new(LoopbackCapture::new()),
                sink: Arc::new(MemorySink::new()),
                session_store: Arc::new(InMemorySessionStore::new()),
            },
        );
        build_router(DebugHttpState::new(pipeline, TOKEN.to_string()))
    }

    /// Send one request and decode the JSON body.
    async fn call(router: Router, method: Method, uri: &str, bearer: bool) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {TOKEN}"));
        }
        let response = router
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("router call");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        (status, serde_json::from_slice(&bytes).expect("JSON body"))
    }

    #[tokio::test]
    async fn health_requires_token() {
        let (status, json) =
            call(router_for(PipelineConfig::default()), Method::GET, "/health", false).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "missing or invalid token");

        let (status, _) = call(
            router_for(PipelineConfig::default()),
            Method::GET,
            "/health?token=wrong",
            false,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_reports_idle_pipeline() {
        let (status, json) =
            call(router_for(PipelineConfig::default()), Method::GET, "/health", true).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["enabled"], true);
        assert_eq!(json["lifecycle"], "uninitialized");
        assert_eq!(json["queue_len"], 0);
    }

    #[tokio::test]
    async fn metrics_accepts_query_token() {
        let uri = format!("/metrics?token={TOKEN}");
        let (status, json) =
            call(router_for(PipelineConfig::default()), Method::GET, &uri, false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stats"]["admitted"], 0);
        assert!(json["diagnostics"]["recent"].is_array());
    }

    #[tokio::test]
    async fn manual_flush_reports_outcome() {
        let (status, json) =
            call(router_for(PipelineConfig::default()), Method::POST, "/flush", true).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stop"], "drained");
        assert_eq!(json["chunks_sent"], 0);
    }

    #[tokio::test]
    async fn manual_flush_unavailable_when_disabled() {
        let config = PipelineConfig {
            enabled: false,
            ..PipelineConfig::default()
        };
        let (status, json) = call(router_for(config), Method::POST, "/flush", true).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"], "replay pipeline disabled");
    }
}
