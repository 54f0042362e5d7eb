//! HTTP health surface.
//!
//! Small read-only API for liveness probes and operational visibility:
//! pool occupancy, database reachability, supported languages, and the
//! tasks-processed counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use crate::languages;
use crate::pool::SandboxPool;
use crate::repository::Repository;

#[derive(Clone)]
pub struct ApiState {
    pub started_at: Instant,
    pub pool: Arc<SandboxPool>,
    pub repo: Arc<Repository>,
    pub tasks_processed: Arc<AtomicU64>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    supported_languages: Vec<String>,
    pool_size: usize,
    pool_available: usize,
    database_status: &'static str,
    tasks_processed: u64,
}

#[derive(Serialize)]
struct LanguageInfo {
    language: String,
    file_extension: String,
    time_multiplier: f64,
    memory_multiplier: f64,
    memory_overhead_kb: u32,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/languages", get(languages_info))
        .with_state(state)
}

/// Bind and serve the surface until the process exits.
pub async fn serve(state: ApiState, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind API port {}", port))?;
    info!("health API listening on port {}", port);
    axum::serve(listener, router(state))
        .await
        .context("health API server failed")
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let database_status = if state.repo.ping().await {
        "connected"
    } else {
        "unreachable"
    };

    Json(HealthResponse {
        status: if database_status == "connected" {
            "healthy"
        } else {
            "degraded"
        },
        uptime_seconds: state.started_at.elapsed().as_secs(),
        supported_languages: languages::supported_languages(),
        pool_size: state.pool.size().await,
        pool_available: state.pool.available(),
        database_status,
        tasks_processed: state.tasks_processed.load(Ordering::Relaxed),
    })
}

async fn languages_info() -> Json<Vec<LanguageInfo>> {
    let info = languages::supported_languages()
        .into_iter()
        .filter_map(|name| languages::get_profile(&name))
        .map(|p| LanguageInfo {
            language: p.name,
            file_extension: p.file_extension,
            time_multiplier: p.time_multiplier,
            memory_multiplier: p.memory_multiplier,
            memory_overhead_kb: p.memory_overhead_kb,
        })
        .collect();
    Json(info)
}
