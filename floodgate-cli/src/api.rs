// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! HTTP control API.
//!
//! Thin adapter over [`BenchmarkService`]: every handler answers from a
//! snapshot or a non-blocking service call, so the API stays responsive
//! while a run saturates the producers.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use floodgate_core::{
    BenchmarkService, ConfigOverrides, FloodError, FloodResult, Port, RunPhase,
};

use crate::metrics;

/// Build the router over a shared service.
pub fn router(service: BenchmarkService) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/report", get(report))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Serve the API until Ctrl+C.
pub async fn serve(
    port: Port,
    service: BenchmarkService,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.value()));
    tracing::info!("Floodgate listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Start a run and fold it into the metrics once it finishes.
pub fn launch(service: &BenchmarkService, overrides: &ConfigOverrides) -> FloodResult<u64> {
    let started = service.start(overrides)?;
    let run_id = started.run_id;

    let service = service.clone();
    tokio::spawn(async move {
        if let Err(e) = started.handle.await {
            tracing::error!(run_id, error = %e, "Benchmark task aborted");
        }
        metrics::record_finished(&service.snapshot());
    });

    Ok(run_id)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Shutdown signal received");
}

async fn health(State(service): State<BenchmarkService>) -> impl IntoResponse {
    Json(service.snapshot())
}

async fn start(State(service): State<BenchmarkService>, body: Bytes) -> Response {
    if service.state().phase() == RunPhase::Running {
        return bad_request("already running");
    }

    let overrides = match parse_overrides(&body) {
        Ok(overrides) => overrides,
        Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
    };

    match launch(&service, &overrides) {
        Ok(run_id) => {
            tracing::info!(run_id, overrides = ?overrides, "Benchmark started");
            (StatusCode::OK, Json(json!({ "status": "started" }))).into_response()
        }
        Err(FloodError::Busy) => bad_request("already running"),
        Err(e) => bad_request(&e.to_string()),
    }
}

async fn stop(State(service): State<BenchmarkService>) -> Response {
    match service.stop() {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "stopping" }))).into_response(),
        Err(_) => bad_request("not running"),
    }
}

async fn report(State(service): State<BenchmarkService>) -> impl IntoResponse {
    Json(service.report())
}

async fn metrics_handler(State(service): State<BenchmarkService>) -> impl IntoResponse {
    metrics::observe(&service.snapshot());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

/// Empty body or JSON `null` means no overrides.
fn parse_overrides(body: &[u8]) -> Result<ConfigOverrides, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ConfigOverrides::default());
    }
    let parsed: Option<ConfigOverrides> = serde_json::from_slice(body)?;
    Ok(parsed.unwrap_or_default())
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}
