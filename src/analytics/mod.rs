//! Click analytics
//!
//! The pure core (`referrer`, `aggregator`, `rate`) takes click events and
//! returns derived metrics without any I/O. `ingest` and `rollup` connect
//! that core to request handling and to storage.

pub mod aggregator;
pub mod ingest;
pub mod ip_extractor;
pub mod models;
pub mod rate;
pub mod referrer;
pub mod rollup;
pub mod window;

pub use aggregator::{
    aggregate_clicks, time_series, time_series_at, window_start, MAX_WINDOW_DAYS,
};
pub use ingest::{ClickRecorder, IpHasher, RawClick};
pub use ip_extractor::extract_client_ip;
pub use models::{
    ClickEvent, ClickMetrics, Device, DeviceBreakdown, Granularity, NewClick, NormalizedRate,
    ParsedReferrer, RankedValue, RatePeriod, ReferrerType, RollupEntry, TimeSeriesDataPoint,
    UtmParams,
};
pub use rate::normalize_rate;
pub use referrer::classify_referrer;
pub use rollup::{RollupReport, RollupService};
pub use window::QueryWindow;
