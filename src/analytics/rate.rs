//! Click rate normalization

use chrono::{DateTime, Utc};

use crate::analytics::models::{NormalizedRate, RatePeriod};

const DAYS_PER_MONTH: f64 = 30.0;

/// Express `total_clicks` over `[start, end]` as a per-hour, per-day or
/// per-month rate depending on the span length.
///
/// The elapsed time is clamped to at least one hour, so identical (or
/// reversed) bounds never divide by zero.
pub fn normalize_rate(total_clicks: u64, start: DateTime<Utc>, end: DateTime<Utc>) -> NormalizedRate {
    let elapsed_hours = ((end - start).num_seconds() as f64 / 3600.0).max(1.0);
    let elapsed_days = elapsed_hours / 24.0;
    let clicks = total_clicks as f64;

    if elapsed_days < 1.0 {
        NormalizedRate {
            rate: clicks / elapsed_hours,
            period: RatePeriod::PerHour,
        }
    } else if elapsed_days < DAYS_PER_MONTH {
        NormalizedRate {
            rate: clicks / elapsed_days,
            period: RatePeriod::PerDay,
        }
    } else {
        NormalizedRate {
            rate: clicks / elapsed_days * DAYS_PER_MONTH,
            period: RatePeriod::PerMonth,
        }
    }
}
