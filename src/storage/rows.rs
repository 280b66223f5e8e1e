//! Database row shapes shared by the SQL backends

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::analytics::models::{ClickEvent, Device, Granularity, NewClick, RollupEntry};
use crate::storage::StorageError;

#[derive(Debug, FromRow)]
pub(crate) struct ClickRow {
    pub id: i64,
    pub link_id: String,
    pub timestamp: i64,
    pub ip_hash: String,
    pub device: String,
    pub browser: String,
    pub os: String,
    pub referrer: Option<String>,
    pub country: Option<String>,
}

pub(crate) const CLICK_COLUMNS: &str =
    "id, link_id, timestamp, ip_hash, device, browser, os, referrer, country";

fn to_datetime(timestamp: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| StorageError::InvalidRecord(format!("timestamp {timestamp} out of range")))
}

impl TryFrom<ClickRow> for ClickEvent {
    type Error = StorageError;

    fn try_from(row: ClickRow) -> Result<Self, Self::Error> {
        let device = row
            .device
            .parse::<Device>()
            .map_err(|e| StorageError::InvalidRecord(format!("click {}: {}", row.id, e)))?;

        Ok(ClickEvent {
            id: row.id,
            link_id: row.link_id,
            timestamp: to_datetime(row.timestamp)?,
            ip_hash: row.ip_hash,
            device,
            browser: row.browser,
            os: row.os,
            referrer: row.referrer,
            country: row.country,
        })
    }
}

pub(crate) fn rows_to_events(rows: Vec<ClickRow>) -> Result<Vec<ClickEvent>, StorageError> {
    rows.into_iter().map(ClickEvent::try_from).collect()
}

/// The event as it reads back after insertion (second precision)
pub(crate) fn inserted_event(id: i64, click: &NewClick) -> Result<ClickEvent, StorageError> {
    Ok(ClickEvent {
        id,
        link_id: click.link_id.clone(),
        timestamp: to_datetime(click.timestamp.timestamp())?,
        ip_hash: click.ip_hash.clone(),
        device: click.device,
        browser: click.browser.clone(),
        os: click.os.clone(),
        referrer: click.referrer.clone(),
        country: click.country.clone(),
    })
}

#[derive(Debug, FromRow)]
pub(crate) struct RollupRow {
    pub link_id: String,
    pub granularity: String,
    pub bucket: String,
    pub clicks: i64,
    pub unique_clicks: i64,
}

impl TryFrom<RollupRow> for RollupEntry {
    type Error = StorageError;

    fn try_from(row: RollupRow) -> Result<Self, Self::Error> {
        let granularity = row
            .granularity
            .parse::<Granularity>()
            .map_err(StorageError::InvalidRecord)?;

        Ok(RollupEntry {
            link_id: row.link_id,
            granularity,
            bucket: row.bucket,
            clicks: row.clicks.max(0) as u64,
            unique_clicks: row.unique_clicks.max(0) as u64,
        })
    }
}

pub(crate) fn rows_to_rollups(rows: Vec<RollupRow>) -> Result<Vec<RollupEntry>, StorageError> {
    rows.into_iter().map(RollupEntry::try_from).collect()
}
