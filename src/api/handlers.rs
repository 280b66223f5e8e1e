use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::analytics::{classify_referrer, ClickEvent, ClickRecorder, ParsedReferrer, RawClick};
use crate::config::AnalyticsConfig;
use crate::cursor::{create_cursor, verify_cursor, CursorData};
use crate::storage::{Storage, StorageError};

use super::analytics::{MetricsKey, MetricsResponse};

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub recorder: ClickRecorder,
    pub analytics: AnalyticsConfig,
    pub metrics_cache: Cache<MetricsKey, Arc<MetricsResponse>>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Log a storage failure and map it to a 500
pub fn storage_failure(context: &str, e: StorageError) -> ApiError {
    tracing::error!("{}: {}", context, e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, context)
}

/// Peer address of the connection, unspecified when the server was not
/// started with connect info (e.g. in-process tests)
pub struct ClientAddr(pub IpAddr);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        Ok(ClientAddr(ip))
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Record a click
pub async fn record_click(
    State(state): State<Arc<AppState>>,
    ClientAddr(socket_ip): ClientAddr,
    headers: HeaderMap,
    Json(payload): Json<RawClick>,
) -> Result<(StatusCode, Json<ClickEvent>), ApiError> {
    if payload.link_id.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "linkId cannot be empty",
        ));
    }

    let click = state.recorder.prepare(payload, socket_ip, &headers);

    let event = state
        .storage
        .insert_click(&click)
        .await
        .map_err(|e| storage_failure("Failed to record click", e))?;

    tracing::debug!(
        "Recorded click {} for link {} ({})",
        event.id,
        event.link_id,
        click.referrer_type.as_str()
    );

    Ok((StatusCode::CREATED, Json(event)))
}

#[derive(Deserialize)]
pub struct ClassifyQuery {
    pub referrer: Option<String>,
    pub destination: Option<String>,
}

/// Classify a referrer without recording anything
pub async fn classify(Query(params): Query<ClassifyQuery>) -> Json<ParsedReferrer> {
    Json(classify_referrer(
        params.referrer.as_deref(),
        params.destination.as_deref(),
    ))
}

#[derive(Deserialize)]
pub struct ClickPageQuery {
    #[serde(default = "default_page_limit")]
    pub limit: i64,
    pub cursor: Option<String>,
}

fn default_page_limit() -> i64 {
    50
}

const MAX_PAGE_LIMIT: i64 = 500;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickPageResponse {
    pub clicks: Vec<ClickEvent>,
    pub next_cursor: Option<String>,
}

/// Raw clicks for a link, newest first, with cursor pagination
pub async fn list_clicks(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<String>,
    Query(params): Query<ClickPageQuery>,
) -> Result<Json<ClickPageResponse>, ApiError> {
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);

    let cursor = match params.cursor.as_deref() {
        Some(raw) => Some(
            verify_cursor(raw)
                .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?,
        ),
        None => None,
    };

    let clicks = state
        .storage
        .list_clicks_page(&link_id, limit, cursor.as_ref())
        .await
        .map_err(|e| storage_failure("Failed to list clicks", e))?;

    let next_cursor = if clicks.len() as i64 == limit {
        clicks
            .last()
            .map(|last| {
                create_cursor(&CursorData {
                    timestamp: last.timestamp.timestamp(),
                    id: last.id,
                })
            })
            .transpose()
            .map_err(|e| {
                tracing::error!("Failed to create cursor: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create cursor")
            })?
    } else {
        None
    };

    Ok(Json(ClickPageResponse {
        clicks,
        next_cursor,
    }))
}
