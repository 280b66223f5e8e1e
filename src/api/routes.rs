use axum::{
    routing::{get, post},
    Router,
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::analytics::ClickRecorder;
use crate::config::{AnalyticsConfig, CacheConfig};
use crate::storage::Storage;

use super::analytics::{
    get_link_metrics, get_link_rollups, get_link_timeseries, get_workspace_metrics,
    get_workspace_timeseries,
};
use super::handlers::{classify, health_check, list_clicks, record_click, AppState};

pub fn create_api_router(
    storage: Arc<dyn Storage>,
    analytics: AnalyticsConfig,
    cache: &CacheConfig,
) -> anyhow::Result<Router> {
    let metrics_cache = Cache::builder()
        .max_capacity(cache.max_entries)
        .time_to_live(Duration::from_secs(cache.ttl_secs.max(1)))
        .build();

    let state = Arc::new(AppState {
        storage,
        recorder: ClickRecorder::new(analytics.clone())?,
        analytics,
        metrics_cache,
    });

    let api_routes = Router::new()
        .route("/clicks", post(record_click))
        .route("/links/{link_id}/metrics", get(get_link_metrics))
        .route("/links/{link_id}/timeseries", get(get_link_timeseries))
        .route("/links/{link_id}/clicks", get(list_clicks))
        .route("/links/{link_id}/rollups", get(get_link_rollups))
        .route("/workspaces/{workspace_id}/metrics", get(get_workspace_metrics))
        .route(
            "/workspaces/{workspace_id}/timeseries",
            get(get_workspace_timeseries),
        )
        .route("/referrers/classify", get(classify))
        .with_state(state);

    Ok(Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}
