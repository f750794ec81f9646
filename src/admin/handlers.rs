use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AdminState;
use crate::cache::{CacheKey, CacheStats};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub open_connections: u64,
    pub accepted_connections: u64,
    pub healthy_backends: usize,
    pub total_backends: usize,
}

#[derive(Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub address: String,
    pub healthy: bool,
    pub consecutive_failures: usize,
}

#[derive(Deserialize)]
pub struct PurgeParams {
    pub key: String,
}

#[derive(Serialize)]
pub struct PurgeResult {
    pub key: String,
    pub evicted: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let pool = state.engine.pool();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        open_connections: state.tracker.active_count(),
        accepted_connections: state.tracker.accepted_count(),
        healthy_backends: pool.healthy_count(),
        total_backends: pool.len(),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let statuses = state
        .engine
        .pool()
        .backends()
        .iter()
        .map(|b| BackendStatus {
            name: b.name.clone(),
            address: b.addr.clone(),
            healthy: b.is_healthy(),
            consecutive_failures: b.consecutive_failures(),
        })
        .collect();

    Json(statuses)
}

/// 404 when caching is disabled.
pub async fn get_cache(State(state): State<AdminState>) -> Result<Json<CacheStats>, StatusCode> {
    let cache = state.engine.cache().ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(cache.stats()))
}

pub async fn purge_cache(
    State(state): State<AdminState>,
    Query(params): Query<PurgeParams>,
) -> Result<Json<PurgeResult>, StatusCode> {
    let cache = state.engine.cache().ok_or(StatusCode::NOT_FOUND)?;
    let evicted = cache.evict(&CacheKey::new(params.key.as_str()));
    tracing::info!(key = %params.key, evicted, "Cache purge requested");

    Ok(Json(PurgeResult {
        key: params.key,
        evicted,
    }))
}
