//! Health-check configuration, probe results and stats handlers

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::Result;
use crate::models::{ContainerStats, HealthCheck, HealthCheckResult};
use crate::monitor::stats::RETENTION_HOURS;
use crate::server::applications::find_app;
use crate::server::auth::AuthUser;
use crate::server::state::SharedState;
use crate::store::{ContainerStatsRepository, HealthCheckRepository};

#[derive(Debug, Deserialize)]
pub struct UpsertHealthCheckRequest {
    pub path: Option<String>,
    pub interval_seconds: Option<i64>,
    pub timeout_seconds: Option<i64>,
    pub healthy_threshold: Option<i64>,
    pub unhealthy_threshold: Option<i64>,
}

pub async fn upsert(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<UpsertHealthCheckRequest>,
) -> Result<Json<HealthCheck>> {
    let app = find_app(&state, &id).await?;
    let defaults = HealthCheck::defaults_for(&app.id);

    let check = HealthCheckRepository::new(state.pool.clone())
        .upsert(
            &app.id,
            req.path.as_deref().unwrap_or(&defaults.path),
            req.interval_seconds.unwrap_or(defaults.interval_seconds),
            req.timeout_seconds.unwrap_or(defaults.timeout_seconds),
            req.healthy_threshold.unwrap_or(defaults.healthy_threshold),
            req.unhealthy_threshold
                .unwrap_or(defaults.unhealthy_threshold),
        )
        .await?;

    Ok(Json(check))
}

/// Effective probe configuration; defaults when none is stored.
pub async fn get(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<HealthCheck>> {
    let app = find_app(&state, &id).await?;

    let check = HealthCheckRepository::new(state.pool.clone())
        .find_for_app(&app.id)
        .await?
        .unwrap_or_else(|| HealthCheck::defaults_for(&app.id));

    Ok(Json(check))
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub limit: Option<i64>,
}

pub async fn results(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<HealthCheckResult>>> {
    let app = find_app(&state, &id).await?;

    let results = HealthCheckRepository::new(state.pool.clone())
        .recent_results(&app.id, query.limit.unwrap_or(50).clamp(1, 500))
        .await?;

    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub hours: Option<i64>,
}

pub async fn stats(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<ContainerStats>>> {
    let app = find_app(&state, &id).await?;

    let hours = query.hours.unwrap_or(1).clamp(1, RETENTION_HOURS);
    let stats = ContainerStatsRepository::new(state.pool.clone())
        .list_for_app(&app.id, hours)
        .await?;

    Ok(Json(stats))
}
