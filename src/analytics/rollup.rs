//! Scheduled click rollups
//!
//! Periodically re-aggregates recent clicks into hourly and daily buckets and
//! persists them to the summary table, so long-range charts do not have to
//! rescan raw events. The bucketing is the same [`time_series_at`] used by
//! the query API.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::analytics::aggregator::{
    time_series_at, window_start, HOURLY_WINDOW_MAX_DAYS, MAX_WINDOW_DAYS,
};
use crate::analytics::models::{Granularity, RollupEntry};
use crate::config::{AnalyticsConfig, RollupConfig};
use crate::storage::{ClickQuery, ClickScope, Storage, StorageResult};

/// Outcome of a single rollup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupReport {
    pub links: usize,
    pub rows_written: usize,
    /// Links whose fetch hit the row cap
    pub truncated_links: usize,
}

pub struct RollupService {
    storage: Arc<dyn Storage>,
    daily_window_days: u32,
    max_events_per_query: i64,
    shutdown_tx: watch::Sender<bool>,
}

impl RollupService {
    pub fn new(storage: Arc<dyn Storage>, rollup: &RollupConfig, analytics: &AnalyticsConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        // Daily buckets need a window longer than the hourly threshold, and
        // never reach further back than queries may
        let min_days = HOURLY_WINDOW_MAX_DAYS + 1;
        let max_days = analytics.max_lookback_days.clamp(min_days, MAX_WINDOW_DAYS);

        Self {
            storage,
            daily_window_days: rollup.daily_window_days.clamp(min_days, max_days),
            max_events_per_query: analytics.max_events_per_query.max(1),
            shutdown_tx,
        }
    }

    /// Roll up every link with clicks in the daily window ending at `now`.
    ///
    /// The fetch starts at midnight of the oldest daily bucket, so every
    /// bucket written covers its whole day or hour.
    pub async fn run_once(&self, now: DateTime<Utc>) -> StorageResult<RollupReport> {
        let since = Granularity::Day.floor(window_start(now, self.daily_window_days));
        let links = self.storage.active_links(since).await?;

        let mut report = RollupReport {
            links: links.len(),
            ..RollupReport::default()
        };

        for link_id in links {
            let events = self
                .storage
                .fetch_clicks(&ClickQuery {
                    scope: ClickScope::Link(link_id.clone()),
                    since,
                    until: now,
                    limit: self.max_events_per_query,
                })
                .await?;

            // A capped fetch keeps the newest events, so the bucket holding
            // the oldest fetched event may be missing clicks
            let partial_before = if events.len() as i64 >= self.max_events_per_query {
                report.truncated_links += 1;
                events.first().map(|event| event.timestamp)
            } else {
                None
            };

            let mut entries = Vec::new();
            for (window_days, granularity) in [
                (HOURLY_WINDOW_MAX_DAYS, Granularity::Hour),
                (self.daily_window_days, Granularity::Day),
            ] {
                entries.extend(
                    time_series_at(&events, window_days, now)
                        .into_iter()
                        .filter(|point| point.clicks > 0)
                        .filter(|point| match partial_before {
                            Some(oldest) => point.timestamp > granularity.label(oldest),
                            None => true,
                        })
                        .map(|point| RollupEntry {
                            link_id: link_id.clone(),
                            granularity,
                            bucket: point.timestamp,
                            clicks: point.clicks,
                            unique_clicks: point.unique_clicks,
                        }),
                );
            }

            report.rows_written += self.storage.upsert_rollups(&entries).await?;
            debug!("Rolled up {} buckets for link {}", entries.len(), link_id);
        }

        Ok(report)
    }

    /// Spawn the periodic rollup task
    pub fn start(self: &Arc<Self>, interval_secs: u64) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match service.run_once(Utc::now()).await {
                            Ok(report) => info!(
                                "Rollup complete: {} links, {} rows written, {} truncated",
                                report.links, report.rows_written, report.truncated_links
                            ),
                            Err(e) => error!("Rollup failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Rollup task shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Signal the periodic task to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
