// SPDX-License-Identifier: MIT
//! HTTP surface of the broker.
//!
//! # Routes
//! * `GET /health` – liveness probe.
//! * `GET /` – banner.
//! * `POST /cluster` – group board nodes.
//! * `POST /outline` – outline a cluster.
//!
//! Each business handler opens a span, computes its result, writes a
//! [`TraceRecord`] through the [`TraceLogger`] and returns. The span guard ends
//! the span on every path, including validation failures.
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::broker;
use crate::models::{ClusterRequest, ClusterResponse, OutlineRequest, OutlineResponse};
use crate::telemetry::Telemetry;
use crate::trace_log::{TraceAction, TraceLogger, TraceRecord};

pub const BANNER: &str = "CollabCanvas AI Broker ready to serve /cluster and /outline";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub telemetry: Arc<Telemetry>,
    pub trace_logger: Arc<dyn TraceLogger>,
}

impl AppState {
    pub fn new(telemetry: Arc<Telemetry>, trace_logger: Arc<dyn TraceLogger>) -> Self {
        Self {
            telemetry,
            trace_logger,
        }
    }
}

/// Errors returned to API clients as `{"detail": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidBody(#[from] JsonRejection),
    #[error("{0}")]
    Validation(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidBody(rejection) => rejection.status(),
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Build the router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/cluster", post(cluster))
        .route("/outline", post(outline))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl+C.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP server starting");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": BANNER }))
}

async fn cluster(
    State(state): State<AppState>,
    payload: Result<Json<ClusterRequest>, JsonRejection>,
) -> Result<Json<ClusterResponse>, ApiError> {
    let mut span = state.telemetry.tracer().start_span("broker.cluster");
    let Json(req) = payload.inspect_err(|e| span.set_error(e.body_text()))?;
    span.set_attribute("board.id", req.board_id.clone());
    if req.node_ids.is_empty() {
        let err = ApiError::Validation("nodeIds must contain at least one entry");
        span.set_error(err.to_string());
        return Err(err);
    }

    let start = Instant::now();
    let assignments = broker::assign_clusters(&req.node_ids);
    let embeddings_ms = broker::mock_latency_ms(broker::EMBEDDING_LATENCY_MS);
    let usage = broker::cluster_usage(req.node_ids.len());
    let record = TraceRecord::new(
        TraceAction::Cluster,
        start.elapsed(),
        usage.tokens_in,
        usage.tokens_out,
    );

    span.set_attribute("cluster.node_count", req.node_ids.len() as i64);
    span.set_attribute(
        "cluster.count",
        broker::cluster_count(req.node_ids.len()) as i64,
    );
    span.set_attribute("cluster.embeddings_ms", embeddings_ms as i64);
    log_trace(&state, &mut span, "/cluster", &record, &req);

    Ok(Json(ClusterResponse {
        assignments,
        embeddings_ms,
    }))
}

async fn outline(
    State(state): State<AppState>,
    payload: Result<Json<OutlineRequest>, JsonRejection>,
) -> Result<Json<OutlineResponse>, ApiError> {
    let mut span = state.telemetry.tracer().start_span("broker.outline");
    let Json(req) = payload.inspect_err(|e| span.set_error(e.body_text()))?;
    span.set_attribute("board.id", req.board_id.clone());
    span.set_attribute("cluster.id", req.cluster_id.clone());
    if let Some(style) = req.style {
        span.set_attribute("outline.style", style.as_str());
    }

    let start = Instant::now();
    let outline_nodes = broker::outline_nodes(&req.cluster_id);
    let usage = broker::outline_usage();
    let record = TraceRecord::new(
        TraceAction::Outline,
        start.elapsed(),
        usage.tokens_in,
        usage.tokens_out,
    );
    log_trace(&state, &mut span, "/outline", &record, &req);

    let latency_ms = broker::mock_latency_ms(broker::OUTLINE_LATENCY_MS);
    span.set_attribute("outline.latency_ms", latency_ms as i64);
    Ok(Json(OutlineResponse {
        outline_nodes,
        latency_ms,
    }))
}

fn log_trace<T: Serialize>(
    state: &AppState,
    span: &mut crate::telemetry::Span,
    endpoint: &str,
    record: &TraceRecord,
    request: &T,
) {
    span.set_attribute("broker.trace_id", record.trace_id.clone());
    span.set_attribute("broker.model", record.model.clone());
    span.set_attribute("broker.tokens_in", record.tokens_in as i64);
    span.set_attribute("broker.tokens_out", record.tokens_out as i64);
    let request = serde_json::to_value(request).unwrap_or_default();
    state.trace_logger.emit(endpoint, record, &request);
}
