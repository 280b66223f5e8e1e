//! Analytics API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::{
    aggregate_clicks, normalize_rate, time_series_at, ClickEvent, ClickMetrics, Granularity,
    NormalizedRate, QueryWindow, RollupEntry, TimeSeriesDataPoint,
};
use crate::storage::{ClickQuery, ClickScope};

use super::handlers::{error_response, storage_failure, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    /// Lookback in days (default from config, clamped to the max lookback)
    pub days: Option<u32>,
}

/// Cache key for metrics responses
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricsKey {
    pub scope: ClickScope,
    pub days: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub window_days: u32,
    /// The fetch hit the row cap, so counts cover only the newest events
    pub truncated: bool,
    pub metrics: ClickMetrics,
    pub rate: NormalizedRate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesResponse {
    pub window_days: u32,
    pub granularity: Granularity,
    /// The fetch hit the row cap, so early buckets may be undercounted
    pub truncated: bool,
    pub points: Vec<TimeSeriesDataPoint>,
}

#[derive(Debug, Deserialize)]
pub struct RollupParams {
    pub granularity: Option<String>,
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupResponse {
    pub granularity: Granularity,
    pub rollups: Vec<RollupEntry>,
}

async fn fetch_window(
    state: &AppState,
    scope: ClickScope,
    window: &QueryWindow,
) -> Result<(Vec<ClickEvent>, bool), ApiError> {
    let events = state
        .storage
        .fetch_clicks(&ClickQuery {
            scope,
            since: window.start,
            until: window.end,
            limit: window.limit,
        })
        .await
        .map_err(|e| storage_failure("Failed to retrieve clicks", e))?;

    let truncated = window.is_truncated(events.len());
    if truncated {
        tracing::warn!(
            "Click fetch hit the {} row cap for a {}-day window",
            window.limit,
            window.days
        );
    }

    Ok((events, truncated))
}

async fn metrics_for(
    state: &AppState,
    scope: ClickScope,
    days: Option<u32>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let window = QueryWindow::resolve(days, &state.analytics, Utc::now());
    let key = MetricsKey {
        scope: scope.clone(),
        days: window.days,
    };

    if let Some(cached) = state.metrics_cache.get(&key).await {
        return Ok(Json(cached.as_ref().clone()));
    }

    let (events, truncated) = fetch_window(state, scope, &window).await?;
    let metrics = aggregate_clicks(&events);
    let rate = normalize_rate(metrics.total_clicks, window.start, window.end);

    let response = Arc::new(MetricsResponse {
        window_days: window.days,
        truncated,
        metrics,
        rate,
    });
    state.metrics_cache.insert(key, Arc::clone(&response)).await;

    Ok(Json(response.as_ref().clone()))
}

async fn time_series_for(
    state: &AppState,
    scope: ClickScope,
    days: Option<u32>,
) -> Result<Json<TimeSeriesResponse>, ApiError> {
    let now = Utc::now();
    let window = QueryWindow::resolve(days, &state.analytics, now);
    let (events, truncated) = fetch_window(state, scope, &window).await?;

    Ok(Json(TimeSeriesResponse {
        window_days: window.days,
        granularity: Granularity::for_window(window.days),
        truncated,
        points: time_series_at(&events, window.days, now),
    }))
}

/// Summary metrics for a link
pub async fn get_link_metrics(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Json<MetricsResponse>, ApiError> {
    metrics_for(&state, ClickScope::Link(link_id), params.days).await
}

/// Click time series for a link
pub async fn get_link_timeseries(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Json<TimeSeriesResponse>, ApiError> {
    time_series_for(&state, ClickScope::Link(link_id), params.days).await
}

/// Summary metrics across a workspace
pub async fn get_workspace_metrics(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Json<MetricsResponse>, ApiError> {
    metrics_for(&state, ClickScope::Workspace(workspace_id), params.days).await
}

/// Click time series across a workspace
pub async fn get_workspace_timeseries(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Json<TimeSeriesResponse>, ApiError> {
    time_series_for(&state, ClickScope::Workspace(workspace_id), params.days).await
}

/// Stored rollup buckets for a link
pub async fn get_link_rollups(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<String>,
    Query(params): Query<RollupParams>,
) -> Result<Json<RollupResponse>, ApiError> {
    let granularity = match params.granularity.as_deref() {
        Some(raw) => raw
            .parse::<Granularity>()
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?,
        None => Granularity::Day,
    };

    let window = QueryWindow::resolve(params.days, &state.analytics, Utc::now());
    let since_bucket = granularity.label(granularity.floor(window.start));

    let rollups = state
        .storage
        .get_rollups(&link_id, granularity, &since_bucket)
        .await
        .map_err(|e| storage_failure("Failed to retrieve rollups", e))?;

    Ok(Json(RollupResponse {
        granularity,
        rollups,
    }))
}
