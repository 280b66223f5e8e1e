//! Click aggregation
//!
//! Pure, single-pass rollups over a slice of click events: totals, unique
//! visitors (by IP hash), device/browser/OS breakdowns, top referrers and
//! countries, and dense time-bucketed series.
//!
//! All bucketing is done in UTC.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::analytics::models::{
    ClickEvent, ClickMetrics, DeviceBreakdown, Granularity, RankedValue, TimeSeriesDataPoint,
};

/// Number of entries kept in top-N lists
pub const TOP_N: usize = 5;

/// Windows up to this many days are bucketed by hour, longer ones by day
pub const HOURLY_WINDOW_MAX_DAYS: u32 = 2;

/// Longest window any series or query may span (about ten years)
pub const MAX_WINDOW_DAYS: u32 = 3660;

/// Start of a window of `window_days` ending at `now`.
///
/// Windows are capped at [`MAX_WINDOW_DAYS`]; the subtraction saturates at
/// the earliest representable instant instead of overflowing.
pub fn window_start(now: DateTime<Utc>, window_days: u32) -> DateTime<Utc> {
    let days = i64::from(window_days.min(MAX_WINDOW_DAYS));
    TimeDelta::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl Granularity {
    /// Granularity used for a window of `window_days`
    pub fn for_window(window_days: u32) -> Self {
        if window_days <= HOURLY_WINDOW_MAX_DAYS {
            Granularity::Hour
        } else {
            Granularity::Day
        }
    }

    fn step(self) -> TimeDelta {
        match self {
            Granularity::Hour => TimeDelta::hours(1),
            Granularity::Day => TimeDelta::days(1),
        }
    }

    /// Truncate an instant to the start of its bucket
    pub fn floor(self, instant: DateTime<Utc>) -> DateTime<Utc> {
        // Truncation only fails for instants near the representable limits
        instant.duration_trunc(self.step()).unwrap_or(instant)
    }

    /// Bucket label for an instant
    pub fn label(self, instant: DateTime<Utc>) -> String {
        instant.format(self.label_format()).to_string()
    }
}

/// Occurrence counter that remembers first-seen order for stable ranking
#[derive(Default)]
struct Tally {
    index: HashMap<String, usize>,
    entries: Vec<RankedValue>,
}

impl Tally {
    fn add(&mut self, value: &str) {
        match self.index.get(value) {
            Some(&i) => self.entries[i].count += 1,
            None => {
                self.index.insert(value.to_string(), self.entries.len());
                self.entries.push(RankedValue {
                    value: value.to_string(),
                    count: 1,
                });
            }
        }
    }

    /// Highest counts first; `sort_by` is stable so ties keep first-seen order
    fn top(mut self, n: usize) -> Vec<RankedValue> {
        self.entries.sort_by(|a, b| b.count.cmp(&a.count));
        self.entries.truncate(n);
        self.entries
    }
}

/// Compute summary metrics for a set of click events.
///
/// Empty input yields zero counts with all three device classes present.
pub fn aggregate_clicks(events: &[ClickEvent]) -> ClickMetrics {
    let mut visitors: HashSet<&str> = HashSet::new();
    let mut device_breakdown = DeviceBreakdown::default();
    let mut browser_breakdown: BTreeMap<String, u64> = BTreeMap::new();
    let mut os_breakdown: BTreeMap<String, u64> = BTreeMap::new();
    let mut referrers = Tally::default();
    let mut countries = Tally::default();

    for event in events {
        visitors.insert(event.ip_hash.as_str());
        device_breakdown.increment(event.device);
        *browser_breakdown.entry(event.browser.clone()).or_insert(0) += 1;
        *os_breakdown.entry(event.os.clone()).or_insert(0) += 1;

        if let Some(referrer) = event.referrer.as_deref().filter(|r| !r.is_empty()) {
            referrers.add(referrer);
        }
        if let Some(country) = event.country.as_deref().filter(|c| !c.is_empty()) {
            countries.add(country);
        }
    }

    ClickMetrics {
        total_clicks: events.len() as u64,
        unique_clicks: visitors.len() as u64,
        device_breakdown,
        browser_breakdown,
        os_breakdown,
        top_referrers: referrers.top(TOP_N),
        top_countries: countries.top(TOP_N),
    }
}

/// Time series ending now. See [`time_series_at`].
pub fn time_series(events: &[ClickEvent], window_days: u32) -> Vec<TimeSeriesDataPoint> {
    time_series_at(events, window_days, Utc::now())
}

/// Bucket click events over the `window_days` preceding `now`.
///
/// Every bucket from `now - window_days` to `now` (inclusive) is present,
/// including empty ones. Events outside that range are ignored. An empty
/// event slice yields an empty series. Windows longer than
/// [`MAX_WINDOW_DAYS`] are capped.
pub fn time_series_at(
    events: &[ClickEvent],
    window_days: u32,
    now: DateTime<Utc>,
) -> Vec<TimeSeriesDataPoint> {
    if events.is_empty() {
        return Vec::new();
    }

    let window_days = window_days.min(MAX_WINDOW_DAYS);
    let granularity = Granularity::for_window(window_days);
    let start = granularity.floor(window_start(now, window_days));
    let end = granularity.floor(now);

    // Labels sort chronologically, so the BTreeMap yields buckets in order
    let mut buckets: BTreeMap<String, (u64, HashSet<&str>)> = BTreeMap::new();
    let mut cursor = start;
    while cursor <= end {
        buckets.insert(granularity.label(cursor), (0, HashSet::new()));
        cursor += granularity.step();
    }

    let mut dropped = 0usize;
    for event in events {
        match buckets.get_mut(&granularity.label(event.timestamp)) {
            Some((clicks, visitors)) => {
                *clicks += 1;
                visitors.insert(event.ip_hash.as_str());
            }
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(
            "Dropped {} click events outside the {}-day window",
            dropped, window_days
        );
    }

    buckets
        .into_iter()
        .map(|(timestamp, (clicks, visitors))| TimeSeriesDataPoint {
            timestamp,
            clicks,
            unique_clicks: visitors.len() as u64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::models::Device;
    use chrono::{Duration, TimeZone};

    fn event(id: i64, ip_hash: &str, timestamp: DateTime<Utc>) -> ClickEvent {
        ClickEvent {
            id,
            link_id: "link1".to_string(),
            timestamp,
            ip_hash: ip_hash.to_string(),
            device: Device::Desktop,
            browser: "Chrome".to_string(),
            os: "Windows".to_string(),
            referrer: None,
            country: None,
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_aggregate_empty() {
        let metrics = aggregate_clicks(&[]);
        assert_eq!(metrics.total_clicks, 0);
        assert_eq!(metrics.unique_clicks, 0);
        assert_eq!(metrics.device_breakdown, DeviceBreakdown::default());
        assert!(metrics.browser_breakdown.is_empty());
        assert!(metrics.os_breakdown.is_empty());
        assert!(metrics.top_referrers.is_empty());
        assert!(metrics.top_countries.is_empty());

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(
            json["deviceBreakdown"],
            serde_json::json!({"mobile": 0, "desktop": 0, "tablet": 0})
        );
    }

    #[test]
    fn test_aggregate_counts_and_uniques() {
        let now = fixed_now();
        let mut events = vec![
            event(1, "a", now),
            event(2, "a", now),
            event(3, "b", now),
            event(4, "c", now),
        ];
        events[1].device = Device::Mobile;
        events[2].device = Device::Tablet;
        events[3].browser = "Firefox".to_string();
        events[3].os = "Linux".to_string();

        let metrics = aggregate_clicks(&events);
        assert_eq!(metrics.total_clicks, 4);
        assert_eq!(metrics.unique_clicks, 3);
        assert_eq!(
            metrics.device_breakdown,
            DeviceBreakdown {
                mobile: 1,
                desktop: 2,
                tablet: 1
            }
        );
        assert_eq!(metrics.browser_breakdown.get("Chrome"), Some(&3));
        assert_eq!(metrics.browser_breakdown.get("Firefox"), Some(&1));
        assert_eq!(metrics.os_breakdown.get("Linux"), Some(&1));
        assert_eq!(metrics.os_breakdown.len(), 2);
    }

    #[test]
    fn test_top_referrers_sorted_truncated_and_stable() {
        let now = fixed_now();
        let referrers = [
            "https://a.com", "https://b.com", "https://b.com", "https://c.com",
            "https://d.com", "https://e.com", "https://f.com", "https://f.com",
            "https://f.com",
        ];
        let mut events: Vec<ClickEvent> = referrers
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut e = event(i as i64, "x", now);
                e.referrer = Some(r.to_string());
                e
            })
            .collect();
        // Missing and empty referrers are excluded from the ranking
        events.push(event(100, "y", now));
        let mut empty = event(101, "z", now);
        empty.referrer = Some(String::new());
        events.push(empty);

        let metrics = aggregate_clicks(&events);
        assert_eq!(metrics.total_clicks, 11);

        let top: Vec<(&str, u64)> = metrics
            .top_referrers
            .iter()
            .map(|r| (r.value.as_str(), r.count))
            .collect();
        assert_eq!(
            top,
            vec![
                ("https://f.com", 3),
                ("https://b.com", 2),
                ("https://a.com", 1),
                ("https://c.com", 1),
                ("https://d.com", 1),
            ]
        );
    }

    #[test]
    fn test_top_countries() {
        let now = fixed_now();
        let countries = [Some("US"), Some("DE"), None, Some("US")];
        let events: Vec<ClickEvent> = countries
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut e = event(i as i64, "x", now);
                e.country = c.map(str::to_string);
                e
            })
            .collect();

        let metrics = aggregate_clicks(&events);
        assert_eq!(metrics.top_countries.len(), 2);
        assert_eq!(metrics.top_countries[0].value, "US");
        assert_eq!(metrics.top_countries[0].count, 2);
        assert_eq!(metrics.top_countries[1].value, "DE");
    }

    #[test]
    fn test_time_series_empty_input() {
        assert!(time_series_at(&[], 7, fixed_now()).is_empty());
        assert!(time_series(&[], 1).is_empty());
    }

    #[test]
    fn test_time_series_daily_is_dense() {
        let now = fixed_now();
        let events = vec![
            event(1, "a", now - Duration::days(3)),
            event(2, "a", now - Duration::days(3)),
            event(3, "b", now - Duration::days(3)),
            event(4, "c", now),
        ];

        let series = time_series_at(&events, 7, now);
        assert_eq!(series.len(), 8);
        assert_eq!(series[0].timestamp, "2024-03-08");
        assert_eq!(series[7].timestamp, "2024-03-15");

        let labels: HashSet<&str> = series.iter().map(|p| p.timestamp.as_str()).collect();
        assert_eq!(labels.len(), 8, "each day appears exactly once");

        let day = series.iter().find(|p| p.timestamp == "2024-03-12").unwrap();
        assert_eq!(day.clicks, 3);
        assert_eq!(day.unique_clicks, 2);

        let today = series.last().unwrap();
        assert_eq!(today.clicks, 1);
        assert_eq!(today.unique_clicks, 1);

        let total: u64 = series.iter().map(|p| p.clicks).sum();
        assert_eq!(total, 4);
        assert!(series.iter().filter(|p| p.clicks == 0).count() >= 6);
    }

    #[test]
    fn test_time_series_hourly_labels() {
        let now = fixed_now();
        let events = vec![event(1, "a", now - Duration::minutes(20))];

        let series = time_series_at(&events, 1, now);
        assert_eq!(series.len(), 25);
        assert_eq!(series[0].timestamp, "2024-03-14 14:00");
        assert_eq!(series[24].timestamp, "2024-03-15 14:00");
        assert_eq!(series[24].clicks, 1);

        let two_days = time_series_at(&events, 2, now);
        assert_eq!(two_days.len(), 49);
        assert!(two_days.iter().all(|p| p.timestamp.ends_with(":00")));

        let three_days = time_series_at(&events, 3, now);
        assert_eq!(three_days.len(), 4);
        assert!(three_days.iter().all(|p| p.timestamp.len() == 10));
    }

    #[test]
    fn test_time_series_drops_out_of_window_events() {
        let now = fixed_now();
        let events = vec![
            event(1, "a", now - Duration::days(30)),
            event(2, "b", now + Duration::days(2)),
            event(3, "c", now),
        ];

        let series = time_series_at(&events, 7, now);
        let total: u64 = series.iter().map(|p| p.clicks).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_time_series_buckets_at_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 0, 5, 0).unwrap();
        let before_midnight = Utc.with_ymd_and_hms(2024, 3, 14, 23, 59, 59).unwrap();
        let events = vec![event(1, "a", before_midnight), event(2, "b", now)];

        let series = time_series_at(&events, 7, now);
        let day = |label: &str| series.iter().find(|p| p.timestamp == label).unwrap().clicks;
        assert_eq!(day("2024-03-14"), 1);
        assert_eq!(day("2024-03-15"), 1);
    }

    #[test]
    fn test_time_series_caps_huge_windows() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let events = vec![event(1, "a", now - Duration::days(1))];

        let series = time_series_at(&events, u32::MAX, now);
        assert_eq!(series.len(), MAX_WINDOW_DAYS as usize + 1);
        assert_eq!(series.iter().map(|p| p.clicks).sum::<u64>(), 1);
        assert_eq!(series.last().unwrap().timestamp, "2024-03-15");
    }

    #[test]
    fn test_window_start_saturates() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        assert_eq!(window_start(now, 7), now - Duration::days(7));
        assert_eq!(
            window_start(now, u32::MAX),
            now - Duration::days(i64::from(MAX_WINDOW_DAYS))
        );
        assert_eq!(
            window_start(DateTime::<Utc>::MIN_UTC, 1),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[test]
    fn test_granularity_for_window() {
        assert_eq!(Granularity::for_window(0), Granularity::Hour);
        assert_eq!(Granularity::for_window(2), Granularity::Hour);
        assert_eq!(Granularity::for_window(3), Granularity::Day);
        assert_eq!(Granularity::for_window(90), Granularity::Day);
    }
}
