use anyhow::Context;
use ipnet::IpNet;

use crate::analytics::MAX_WINDOW_DAYS;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub analytics: AnalyticsConfig,
    pub rollup: RollupConfig,
    pub cache: CacheConfig,
    pub pagination: PaginationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Which request headers are trusted to carry the client IP
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only
    #[default]
    None,
    /// `Forwarded` / `X-Forwarded-For`, validated against the trust settings
    Standard,
    /// `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub trusted_proxy_mode: TrustedProxyMode,

    /// Proxy networks skipped when walking X-Forwarded-For from the right
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,

    /// Fixed number of proxy hops in front of the service
    #[serde(default)]
    pub num_trusted_proxies: Option<usize>,

    /// Truncate IPs to their network prefix before hashing
    pub ip_anonymization: bool,

    /// Key for IP hashing. If None, a random key is generated at startup
    /// and unique-visitor counts will not line up across restarts.
    #[serde(default)]
    pub ip_hash_secret: Option<String>,

    /// Row cap for a single aggregation fetch
    pub max_events_per_query: i64,

    /// Longest window a query may request
    pub max_lookback_days: u32,

    /// Window used when a request does not specify one
    pub default_window_days: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
            ip_anonymization: false,
            ip_hash_secret: None,
            max_events_per_query: 10_000,
            max_lookback_days: 90,
            default_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Window of the daily rollup (the hourly rollup always covers two days)
    pub daily_window_days: u32,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            daily_window_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached metrics responses
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// HMAC secret for signing pagination cursors
    /// If None, a random key is generated (cursors won't survive restarts)
    pub cursor_hmac_secret: Option<String>,
}

fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{value}'")),
        Err(_) => Ok(default),
    }
}

fn parse_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

/// Reject day counts outside `[1, MAX_WINDOW_DAYS]`
fn check_window_days(key: &str, days: u32) -> anyhow::Result<u32> {
    if (1..=MAX_WINDOW_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(anyhow::anyhow!("got {days}, expected 1 to {MAX_WINDOW_DAYS}"))
            .with_context(|| format!("{key} is out of range"))
    }
}

fn parse_days(key: &str, default: u32) -> anyhow::Result<u32> {
    check_window_days(key, parse_env(key, default)?)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./clickstats.db?mode=rwc".to_string());
        let max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = parse_env("API_PORT", 8080u16)?;

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = std::env::var("TRUSTED_PROXIES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpNet>()
                    .with_context(|| format!("TRUSTED_PROXIES contains an invalid CIDR '{s}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let num_trusted_proxies = match std::env::var("NUM_TRUSTED_PROXIES") {
            Ok(v) => Some(
                v.trim()
                    .parse::<usize>()
                    .context("NUM_TRUSTED_PROXIES must be a non-negative integer")?,
            ),
            Err(_) => None,
        };

        let analytics_defaults = AnalyticsConfig::default();
        let analytics = AnalyticsConfig {
            trusted_proxy_mode,
            trusted_proxies,
            num_trusted_proxies,
            ip_anonymization: parse_flag("IP_ANONYMIZATION", false),
            ip_hash_secret: std::env::var("IP_HASH_SECRET").ok(),
            max_events_per_query: parse_env(
                "MAX_EVENTS_PER_QUERY",
                analytics_defaults.max_events_per_query,
            )?,
            max_lookback_days: parse_days("MAX_LOOKBACK_DAYS", analytics_defaults.max_lookback_days)?,
            default_window_days: parse_days(
                "DEFAULT_WINDOW_DAYS",
                analytics_defaults.default_window_days,
            )?,
        };

        let rollup_defaults = RollupConfig::default();
        let rollup = RollupConfig {
            enabled: parse_flag("ROLLUP_ENABLED", rollup_defaults.enabled),
            interval_secs: parse_env("ROLLUP_INTERVAL_SECS", rollup_defaults.interval_secs)?,
            daily_window_days: parse_days(
                "ROLLUP_DAILY_WINDOW_DAYS",
                rollup_defaults.daily_window_days,
            )?,
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            max_entries: parse_env("METRICS_CACHE_MAX_ENTRIES", cache_defaults.max_entries)?,
            ttl_secs: parse_env("METRICS_CACHE_TTL_SECS", cache_defaults.ttl_secs)?,
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            analytics,
            rollup,
            cache,
            pagination: PaginationConfig {
                cursor_hmac_secret: std::env::var("CURSOR_HMAC_SECRET").ok(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_days_bounds() {
        assert_eq!(check_window_days("MAX_LOOKBACK_DAYS", 90).unwrap(), 90);
        assert_eq!(
            check_window_days("MAX_LOOKBACK_DAYS", MAX_WINDOW_DAYS).unwrap(),
            MAX_WINDOW_DAYS
        );
        assert!(check_window_days("MAX_LOOKBACK_DAYS", 0).is_err());

        let err = check_window_days("ROLLUP_DAILY_WINDOW_DAYS", u32::MAX).unwrap_err();
        assert!(format!("{err:#}").contains("ROLLUP_DAILY_WINDOW_DAYS is out of range"));
    }
}
