use crate::analytics::models::{ClickEvent, Granularity, NewClick, RollupEntry};
use crate::cursor::CursorData;
use crate::storage::rows::{
    inserted_event, rows_to_events, rows_to_rollups, ClickRow, RollupRow, CLICK_COLUMNS,
};
use crate::storage::{ClickQuery, ClickScope, Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clicks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id TEXT NOT NULL,
                workspace_id TEXT,
                timestamp INTEGER NOT NULL,
                ip_hash TEXT NOT NULL,
                device TEXT NOT NULL,
                browser TEXT NOT NULL,
                os TEXT NOT NULL,
                referrer TEXT,
                referrer_type TEXT NOT NULL,
                referrer_source TEXT,
                country TEXT,
                utm_source TEXT,
                utm_medium TEXT,
                utm_campaign TEXT,
                utm_term TEXT,
                utm_content TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_clicks_link_time ON clicks(link_id, timestamp)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_workspace_time ON clicks(workspace_id, timestamp)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_rollups (
                link_id TEXT NOT NULL,
                granularity TEXT NOT NULL,
                bucket TEXT NOT NULL,
                clicks INTEGER NOT NULL,
                unique_clicks INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (link_id, granularity, bucket)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn insert_click(&self, click: &NewClick) -> StorageResult<ClickEvent> {
        let utm = click.utm.clone().unwrap_or_default();

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO clicks (
                link_id, workspace_id, timestamp, ip_hash, device, browser, os,
                referrer, referrer_type, referrer_source, country,
                utm_source, utm_medium, utm_campaign, utm_term, utm_content
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&click.link_id)
        .bind(&click.workspace_id)
        .bind(click.timestamp.timestamp())
        .bind(&click.ip_hash)
        .bind(click.device.as_str())
        .bind(&click.browser)
        .bind(&click.os)
        .bind(&click.referrer)
        .bind(click.referrer_type.as_str())
        .bind(&click.referrer_source)
        .bind(&click.country)
        .bind(&utm.source)
        .bind(&utm.medium)
        .bind(&utm.campaign)
        .bind(&utm.term)
        .bind(&utm.content)
        .fetch_one(self.pool.as_ref())
        .await?;

        inserted_event(id, click)
    }

    async fn fetch_clicks(&self, query: &ClickQuery) -> StorageResult<Vec<ClickEvent>> {
        let (column, key) = match &query.scope {
            ClickScope::Link(id) => ("link_id", id),
            ClickScope::Workspace(id) => ("workspace_id", id),
        };

        let sql = format!(
            "SELECT {CLICK_COLUMNS} FROM clicks \
             WHERE {column} = ? AND timestamp >= ? AND timestamp <= ? \
             ORDER BY timestamp DESC, id DESC \
             LIMIT ?"
        );

        let rows = sqlx::query_as::<_, ClickRow>(&sql)
            .bind(key)
            .bind(query.since.timestamp())
            .bind(query.until.timestamp())
            .bind(query.limit)
            .fetch_all(self.pool.as_ref())
            .await?;

        // Newest rows win the cap, callers get them oldest first
        let mut events = rows_to_events(rows)?;
        events.reverse();
        Ok(events)
    }

    async fn list_clicks_page(
        &self,
        link_id: &str,
        limit: i64,
        cursor: Option<&CursorData>,
    ) -> StorageResult<Vec<ClickEvent>> {
        let rows = match cursor {
            Some(cursor) => {
                let sql = format!(
                    "SELECT {CLICK_COLUMNS} FROM clicks \
                     WHERE link_id = ? AND (timestamp < ? OR (timestamp = ? AND id < ?)) \
                     ORDER BY timestamp DESC, id DESC \
                     LIMIT ?"
                );
                sqlx::query_as::<_, ClickRow>(&sql)
                    .bind(link_id)
                    .bind(cursor.timestamp)
                    .bind(cursor.timestamp)
                    .bind(cursor.id)
                    .bind(limit)
                    .fetch_all(self.pool.as_ref())
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {CLICK_COLUMNS} FROM clicks \
                     WHERE link_id = ? \
                     ORDER BY timestamp DESC, id DESC \
                     LIMIT ?"
                );
                sqlx::query_as::<_, ClickRow>(&sql)
                    .bind(link_id)
                    .bind(limit)
                    .fetch_all(self.pool.as_ref())
                    .await?
            }
        };

        rows_to_events(rows)
    }

    async fn active_links(&self, since: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let links = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT link_id FROM clicks
            WHERE timestamp >= ?
            ORDER BY link_id
            "#,
        )
        .bind(since.timestamp())
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(links)
    }

    async fn upsert_rollups(&self, entries: &[RollupEntry]) -> StorageResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO click_rollups (link_id, granularity, bucket, clicks, unique_clicks, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (link_id, granularity, bucket) DO UPDATE SET
                    clicks = excluded.clicks,
                    unique_clicks = excluded.unique_clicks,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&entry.link_id)
            .bind(entry.granularity.as_str())
            .bind(&entry.bucket)
            .bind(entry.clicks as i64)
            .bind(entry.unique_clicks as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(entries.len())
    }

    async fn get_rollups(
        &self,
        link_id: &str,
        granularity: Granularity,
        since_bucket: &str,
    ) -> StorageResult<Vec<RollupEntry>> {
        let rows = sqlx::query_as::<_, RollupRow>(
            r#"
            SELECT link_id, granularity, bucket, clicks, unique_clicks
            FROM click_rollups
            WHERE link_id = ? AND granularity = ? AND bucket >= ?
            ORDER BY bucket ASC
            "#,
        )
        .bind(link_id)
        .bind(granularity.as_str())
        .bind(since_bucket)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows_to_rollups(rows)
    }
}
