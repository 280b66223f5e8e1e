//! Query window policy
//!
//! Bounds how much raw click data a single aggregation may scan.

use chrono::{DateTime, Utc};

use crate::analytics::aggregator::{window_start, MAX_WINDOW_DAYS};
use crate::config::AnalyticsConfig;

/// A resolved lookback window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub days: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Maximum number of events fetched for this window
    pub limit: i64,
}

impl QueryWindow {
    /// Resolve a requested window ending at `now`.
    ///
    /// Missing values fall back to the configured default; everything is
    /// clamped to `[1, max_lookback_days]`, and the lookback itself never
    /// exceeds [`MAX_WINDOW_DAYS`].
    pub fn resolve(requested_days: Option<u32>, config: &AnalyticsConfig, now: DateTime<Utc>) -> Self {
        let max_days = config.max_lookback_days.clamp(1, MAX_WINDOW_DAYS);
        let days = requested_days
            .unwrap_or(config.default_window_days)
            .clamp(1, max_days);

        Self {
            days,
            start: window_start(now, days),
            end: now,
            limit: config.max_events_per_query.max(1),
        }
    }

    /// Whether a fetch of `fetched` rows hit the row cap
    pub fn is_truncated(&self, fetched: usize) -> bool {
        fetched as i64 >= self.limit
    }
}
