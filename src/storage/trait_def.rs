use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::analytics::models::{ClickEvent, Granularity, NewClick, RollupEntry};
use crate::cursor::CursorData;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Other(e.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Which clicks a query covers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClickScope {
    Link(String),
    Workspace(String),
}

/// Time-bounded, capped click fetch
#[derive(Debug, Clone)]
pub struct ClickQuery {
    pub scope: ClickScope,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub limit: i64,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Persist a new click and return it with its assigned id
    async fn insert_click(&self, click: &NewClick) -> StorageResult<ClickEvent>;

    /// Clicks in `[since, until]`, oldest first. When more than `limit`
    /// rows match, the newest `limit` are returned.
    async fn fetch_clicks(&self, query: &ClickQuery) -> StorageResult<Vec<ClickEvent>>;

    /// A page of clicks for a link, newest first, strictly after `cursor`
    async fn list_clicks_page(
        &self,
        link_id: &str,
        limit: i64,
        cursor: Option<&CursorData>,
    ) -> StorageResult<Vec<ClickEvent>>;

    /// Links with at least one click since `since`
    async fn active_links(&self, since: DateTime<Utc>) -> StorageResult<Vec<String>>;

    /// Insert or replace rollup buckets, returns the number of rows written
    async fn upsert_rollups(&self, entries: &[RollupEntry]) -> StorageResult<usize>;

    /// Stored rollups for a link with bucket labels at or after `since_bucket`
    async fn get_rollups(
        &self,
        link_id: &str,
        granularity: Granularity,
        since_bucket: &str,
    ) -> StorageResult<Vec<RollupEntry>>;
}
