//! Data models for click analytics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Device class reported for a click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Mobile,
    Desktop,
    Tablet,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Mobile => "mobile",
            Device::Desktop => "desktop",
            Device::Tablet => "tablet",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile" => Ok(Device::Mobile),
            "desktop" => Ok(Device::Desktop),
            "tablet" => Ok(Device::Tablet),
            other => Err(format!("unknown device '{other}'")),
        }
    }
}

/// A single recorded click, as read back from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub id: i64,

    /// Link the click belongs to (opaque)
    pub link_id: String,

    pub timestamp: DateTime<Utc>,

    /// One-way hash of the visitor IP, used only for de-duplication
    pub ip_hash: String,

    pub device: Device,
    pub browser: String,
    pub os: String,

    /// Raw HTTP referrer; `None` or empty for direct traffic
    pub referrer: Option<String>,

    pub country: Option<String>,
}

/// Click counts for each device class. All three are always reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBreakdown {
    pub mobile: u64,
    pub desktop: u64,
    pub tablet: u64,
}

impl DeviceBreakdown {
    pub fn increment(&mut self, device: Device) {
        match device {
            Device::Mobile => self.mobile += 1,
            Device::Desktop => self.desktop += 1,
            Device::Tablet => self.tablet += 1,
        }
    }
}

/// A value with its occurrence count, used for top-N lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedValue {
    pub value: String,
    pub count: u64,
}

/// Metrics derived from a set of click events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickMetrics {
    pub total_clicks: u64,
    pub unique_clicks: u64,
    pub device_breakdown: DeviceBreakdown,
    pub browser_breakdown: BTreeMap<String, u64>,
    pub os_breakdown: BTreeMap<String, u64>,
    pub top_referrers: Vec<RankedValue>,
    pub top_countries: Vec<RankedValue>,
}

/// One bucket of a click time series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesDataPoint {
    /// Bucket label (`YYYY-MM-DD HH:00` or `YYYY-MM-DD`)
    pub timestamp: String,
    pub clicks: u64,
    pub unique_clicks: u64,
}

/// Time bucket granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        }
    }

    pub(crate) const fn label_format(self) -> &'static str {
        match self {
            Granularity::Hour => "%Y-%m-%d %H:00",
            Granularity::Day => "%Y-%m-%d",
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" | "hourly" => Ok(Granularity::Hour),
            "day" | "daily" => Ok(Granularity::Day),
            other => Err(format!("unknown granularity '{other}'")),
        }
    }
}

/// Traffic category of a referrer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferrerType {
    Search,
    Social,
    Direct,
    External,
}

impl ReferrerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferrerType::Search => "search",
            ReferrerType::Social => "social",
            ReferrerType::Direct => "direct",
            ReferrerType::External => "external",
        }
    }
}

/// UTM attribution read from a destination URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmParams {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub term: Option<String>,
    pub content: Option<String>,
}

impl UtmParams {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.medium.is_none()
            && self.campaign.is_none()
            && self.term.is_none()
            && self.content.is_none()
    }
}

/// Result of classifying a referrer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedReferrer {
    #[serde(rename = "type")]
    pub referrer_type: ReferrerType,
    pub source: Option<String>,
    pub search_keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_params: Option<UtmParams>,
}

impl ParsedReferrer {
    pub fn direct() -> Self {
        Self {
            referrer_type: ReferrerType::Direct,
            source: None,
            search_keywords: None,
            utm_params: None,
        }
    }
}

/// Unit a normalized rate is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatePeriod {
    #[serde(rename = "per hour")]
    PerHour,
    #[serde(rename = "per day")]
    PerDay,
    #[serde(rename = "per month")]
    PerMonth,
}

impl fmt::Display for RatePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RatePeriod::PerHour => "per hour",
            RatePeriod::PerDay => "per day",
            RatePeriod::PerMonth => "per month",
        })
    }
}

/// Click rate expressed in the most readable unit for its time span
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRate {
    pub rate: f64,
    pub period: RatePeriod,
}

/// Click data ready to be persisted (IP already hashed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewClick {
    pub link_id: String,
    pub workspace_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub ip_hash: String,
    pub device: Device,
    pub browser: String,
    pub os: String,
    pub referrer: Option<String>,
    pub country: Option<String>,

    /// Classification computed at ingestion time
    pub referrer_type: ReferrerType,
    pub referrer_source: Option<String>,
    pub utm: Option<UtmParams>,
}

/// Persisted rollup bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupEntry {
    pub link_id: String,
    pub granularity: Granularity,
    pub bucket: String,
    pub clicks: u64,
    pub unique_clicks: u64,
}
