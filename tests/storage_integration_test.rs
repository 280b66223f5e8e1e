//! Integration tests for click and rollup storage
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests (needs DATABASE_URL)
//! - By default, both backends are tested

use chrono::{DateTime, Duration, TimeZone, Utc};
use clickstats::analytics::{
    time_series_at, Device, Granularity, NewClick, ReferrerType, RollupEntry, UtmParams,
};
use clickstats::cursor::CursorData;
use clickstats::storage::{ClickQuery, ClickScope, PostgresStorage, SqliteStorage, Storage};
use std::sync::Arc;

fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true,
    }
}

/// In-memory SQLite must stay on a single connection, each connection gets its own database
async fn create_sqlite_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

async fn create_postgres_storage() -> Option<Arc<dyn Storage>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    let storage = PostgresStorage::new(&db_url, 5).await.ok()?;
    storage.init().await.ok()?;
    Some(Arc::new(storage))
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn new_click(link_id: &str, workspace: Option<&str>, timestamp: DateTime<Utc>, ip: &str) -> NewClick {
    NewClick {
        link_id: link_id.to_string(),
        workspace_id: workspace.map(str::to_string),
        timestamp,
        ip_hash: ip.to_string(),
        device: Device::Desktop,
        browser: "Chrome".to_string(),
        os: "Linux".to_string(),
        referrer: Some("https://www.google.com/search?q=rust".to_string()),
        country: Some("DE".to_string()),
        referrer_type: ReferrerType::Search,
        referrer_source: Some("google".to_string()),
        utm: None,
    }
}

fn window(scope: ClickScope, limit: i64) -> ClickQuery {
    ClickQuery {
        scope,
        since: base_time() - Duration::days(7),
        until: base_time() + Duration::days(1),
        limit,
    }
}

/// Persistent backends keep rows between runs, so each run uses its own link
fn unique_link_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

async fn check_insert_and_fetch(storage: Arc<dyn Storage>) {
    let link_id = unique_link_id("insert-link");
    let mut click = new_click(&link_id, Some("ws"), base_time(), "hash-a");
    click.device = Device::Tablet;
    click.utm = Some(UtmParams {
        source: Some("newsletter".to_string()),
        medium: Some("email".to_string()),
        ..UtmParams::default()
    });

    let stored = storage.insert_click(&click).await.unwrap();
    assert!(stored.id > 0);
    assert_eq!(stored.link_id, link_id);
    assert_eq!(stored.timestamp, base_time());
    assert_eq!(stored.device, Device::Tablet);
    assert_eq!(stored.country.as_deref(), Some("DE"));

    let fetched = storage
        .fetch_clicks(&window(ClickScope::Link(link_id.clone()), 100))
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0], stored);
}

#[tokio::test]
async fn test_insert_and_fetch_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_insert_and_fetch(create_sqlite_storage().await).await;
}

#[tokio::test]
async fn test_insert_and_fetch_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(storage) = create_postgres_storage().await else {
        return;
    };
    check_insert_and_fetch(storage).await;
}

#[tokio::test]
async fn test_fetch_respects_window_and_limit() {
    let storage = create_sqlite_storage().await;

    // Two clicks outside the window, five inside
    storage
        .insert_click(&new_click("windowed", None, base_time() - Duration::days(30), "old"))
        .await
        .unwrap();
    storage
        .insert_click(&new_click("windowed", None, base_time() + Duration::days(5), "future"))
        .await
        .unwrap();
    for i in 0..5 {
        storage
            .insert_click(&new_click(
                "windowed",
                None,
                base_time() - Duration::hours(i),
                &format!("visitor-{}", i),
            ))
            .await
            .unwrap();
    }

    let all = storage
        .fetch_clicks(&window(ClickScope::Link("windowed".to_string()), 100))
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
    // Oldest first
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(all[0].ip_hash, "visitor-4");

    let capped = storage
        .fetch_clicks(&window(ClickScope::Link("windowed".to_string()), 3))
        .await
        .unwrap();
    // The cap keeps the newest rows, still returned oldest first
    assert_eq!(
        capped.iter().map(|c| c.ip_hash.as_str()).collect::<Vec<_>>(),
        vec!["visitor-2", "visitor-1", "visitor-0"]
    );
}

#[tokio::test]
async fn test_capped_fetch_keeps_recent_buckets() {
    let storage = create_sqlite_storage().await;
    let now = base_time();

    for i in 0..3 {
        storage
            .insert_click(&new_click("bursty", None, now - Duration::days(5), &format!("old-{}", i)))
            .await
            .unwrap();
        storage
            .insert_click(&new_click(
                "bursty",
                None,
                now - Duration::minutes(i + 1),
                &format!("new-{}", i),
            ))
            .await
            .unwrap();
    }

    let events = storage
        .fetch_clicks(&ClickQuery {
            scope: ClickScope::Link("bursty".to_string()),
            since: now - Duration::days(7),
            until: now,
            limit: 3,
        })
        .await
        .unwrap();
    assert!(events.iter().all(|e| e.ip_hash.starts_with("new-")));

    let series = time_series_at(&events, 7, now);
    assert_eq!(series.last().unwrap().clicks, 3);
}

#[tokio::test]
async fn test_workspace_scope_spans_links() {
    let storage = create_sqlite_storage().await;

    storage
        .insert_click(&new_click("ws-link-1", Some("acme"), base_time(), "a"))
        .await
        .unwrap();
    storage
        .insert_click(&new_click("ws-link-2", Some("acme"), base_time(), "b"))
        .await
        .unwrap();
    storage
        .insert_click(&new_click("other-link", Some("globex"), base_time(), "c"))
        .await
        .unwrap();

    let clicks = storage
        .fetch_clicks(&window(ClickScope::Workspace("acme".to_string()), 100))
        .await
        .unwrap();
    assert_eq!(clicks.len(), 2);
    assert!(clicks.iter().all(|c| c.link_id.starts_with("ws-link")));
}

#[tokio::test]
async fn test_click_pagination_newest_first() {
    let storage = create_sqlite_storage().await;

    for i in 0..5 {
        storage
            .insert_click(&new_click(
                "paged",
                None,
                base_time() + Duration::minutes(i),
                &format!("v{}", i),
            ))
            .await
            .unwrap();
    }

    let first = storage.list_clicks_page("paged", 2, None).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].ip_hash, "v4");
    assert_eq!(first[1].ip_hash, "v3");

    let last = first.last().unwrap();
    let cursor = CursorData {
        timestamp: last.timestamp.timestamp(),
        id: last.id,
    };
    let second = storage
        .list_clicks_page("paged", 2, Some(&cursor))
        .await
        .unwrap();
    assert_eq!(
        second.iter().map(|c| c.ip_hash.as_str()).collect::<Vec<_>>(),
        vec!["v2", "v1"]
    );

    let last = second.last().unwrap();
    let cursor = CursorData {
        timestamp: last.timestamp.timestamp(),
        id: last.id,
    };
    let third = storage
        .list_clicks_page("paged", 2, Some(&cursor))
        .await
        .unwrap();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].ip_hash, "v0");
}

#[tokio::test]
async fn test_pagination_breaks_timestamp_ties_by_id() {
    let storage = create_sqlite_storage().await;

    for i in 0..3 {
        storage
            .insert_click(&new_click("tied", None, base_time(), &format!("t{}", i)))
            .await
            .unwrap();
    }

    let first = storage.list_clicks_page("tied", 2, None).await.unwrap();
    let last = first.last().unwrap();
    let rest = storage
        .list_clicks_page(
            "tied",
            2,
            Some(&CursorData {
                timestamp: last.timestamp.timestamp(),
                id: last.id,
            }),
        )
        .await
        .unwrap();

    assert_eq!(first.len() + rest.len(), 3);
    assert_eq!(rest[0].ip_hash, "t0");
}

#[tokio::test]
async fn test_active_links() {
    let storage = create_sqlite_storage().await;

    storage
        .insert_click(&new_click("recent", None, base_time(), "a"))
        .await
        .unwrap();
    storage
        .insert_click(&new_click("recent", None, base_time(), "b"))
        .await
        .unwrap();
    storage
        .insert_click(&new_click("stale", None, base_time() - Duration::days(40), "c"))
        .await
        .unwrap();

    let links = storage
        .active_links(base_time() - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(links, vec!["recent".to_string()]);
}

#[tokio::test]
async fn test_rollup_upsert_replaces_buckets() {
    let storage = create_sqlite_storage().await;

    let entry = |bucket: &str, clicks: u64| RollupEntry {
        link_id: "rolled".to_string(),
        granularity: Granularity::Day,
        bucket: bucket.to_string(),
        clicks,
        unique_clicks: clicks / 2,
    };

    let written = storage
        .upsert_rollups(&[entry("2026-03-08", 4), entry("2026-03-09", 6)])
        .await
        .unwrap();
    assert_eq!(written, 2);

    // Re-running a pass overwrites the existing bucket rather than duplicating it
    storage
        .upsert_rollups(&[entry("2026-03-09", 10)])
        .await
        .unwrap();

    let rollups = storage
        .get_rollups("rolled", Granularity::Day, "2026-03-01")
        .await
        .unwrap();
    assert_eq!(rollups.len(), 2);
    assert_eq!(rollups[0].bucket, "2026-03-08");
    assert_eq!(rollups[1].clicks, 10);
    assert_eq!(rollups[1].unique_clicks, 5);

    let later = storage
        .get_rollups("rolled", Granularity::Day, "2026-03-09")
        .await
        .unwrap();
    assert_eq!(later.len(), 1);

    let hourly = storage
        .get_rollups("rolled", Granularity::Hour, "2026-03-01")
        .await
        .unwrap();
    assert!(hourly.is_empty());
}

#[tokio::test]
async fn test_upsert_empty_batch() {
    let storage = create_sqlite_storage().await;
    assert_eq!(storage.upsert_rollups(&[]).await.unwrap(), 0);
}
