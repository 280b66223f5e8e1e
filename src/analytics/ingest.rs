//! Ingestion-time enrichment
//!
//! Turns raw request metadata into a [`NewClick`]: the client IP is hashed
//! (and optionally truncated first), the user agent is parsed into device,
//! browser and OS, and the referrer is classified so stored rows carry their
//! traffic category.
//!
//! Raw IP addresses never leave this module.

use axum::http::HeaderMap;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::net::IpAddr;
use tracing::warn;
use woothee::parser::Parser;

use crate::analytics::ip_extractor::{anonymize_ip, extract_client_ip};
use crate::analytics::models::{Device, NewClick};
use crate::analytics::referrer::classify_referrer;
use crate::config::AnalyticsConfig;

const UNKNOWN: &str = "Unknown";

/// Country headers set by common edge networks
const COUNTRY_HEADERS: &[&str] = &["cf-ipcountry", "x-vercel-ip-country"];

/// Keyed one-way hash for visitor IPs
#[derive(Clone)]
pub struct IpHasher {
    mac: Hmac<Sha256>,
    anonymize: bool,
}

impl IpHasher {
    pub fn new(secret: Option<&str>, anonymize: bool) -> anyhow::Result<Self> {
        let key = match secret {
            Some(s) if !s.is_empty() => s.as_bytes().to_vec(),
            _ => {
                warn!("IP_HASH_SECRET not set, using a random key; unique visitor counts will reset on restart");
                rand::random::<[u8; 32]>().to_vec()
            }
        };

        let mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|e| anyhow::anyhow!("Failed to create HMAC: {}", e))?;

        Ok(Self { mac, anonymize })
    }

    pub fn from_config(config: &AnalyticsConfig) -> anyhow::Result<Self> {
        Self::new(config.ip_hash_secret.as_deref(), config.ip_anonymization)
    }

    pub fn hash(&self, ip: IpAddr) -> String {
        let ip = if self.anonymize { anonymize_ip(ip) } else { ip };

        let mut mac = self.mac.clone();
        mac.update(ip.to_string().as_bytes());
        BASE64_URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

/// Parse a User-Agent string using woothee into `(device, browser, os)`.
///
/// Unknown values become `"Unknown"`; unknown devices count as desktop.
pub fn parse_user_agent(ua: Option<&str>) -> (Device, String, String) {
    let ua = match ua {
        Some(s) if !s.trim().is_empty() => s,
        _ => return (Device::Desktop, UNKNOWN.to_string(), UNKNOWN.to_string()),
    };

    let known = |value: &str| {
        if value.is_empty() || value == "UNKNOWN" {
            UNKNOWN.to_string()
        } else {
            value.to_string()
        }
    };

    let parser = Parser::new();
    let (category, browser, os) = match parser.parse(ua) {
        Some(result) => (result.category, known(result.name), known(result.os)),
        None => ("", UNKNOWN.to_string(), UNKNOWN.to_string()),
    };

    let device = if is_tablet(ua) {
        Device::Tablet
    } else if matches!(category, "smartphone" | "mobilephone") {
        Device::Mobile
    } else {
        Device::Desktop
    };

    (device, browser, os)
}

/// woothee reports tablets as smartphones
fn is_tablet(ua: &str) -> bool {
    ua.contains("iPad")
        || ua.contains("Tablet")
        || (ua.contains("Android") && !ua.contains("Mobile"))
}

/// Country from edge-network headers; `XX` and `T1` (Tor) mean unknown
pub fn country_from_headers(headers: &HeaderMap) -> Option<String> {
    COUNTRY_HEADERS.iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?.trim();
        match value {
            "" | "XX" | "T1" => None,
            code => Some(code.to_uppercase()),
        }
    })
}

/// Click as reported by the caller, before enrichment
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClick {
    pub link_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub destination_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Builds storable clicks from raw request data
#[derive(Clone)]
pub struct ClickRecorder {
    hasher: IpHasher,
    config: AnalyticsConfig,
}

impl ClickRecorder {
    pub fn new(config: AnalyticsConfig) -> anyhow::Result<Self> {
        Ok(Self {
            hasher: IpHasher::from_config(&config)?,
            config,
        })
    }

    /// Enrich a raw click.
    ///
    /// `socket_ip` is the peer address; forwarded headers are honoured
    /// according to the trusted proxy configuration. When the body does not
    /// carry a user agent or country, the request headers are used.
    pub fn prepare(&self, raw: RawClick, socket_ip: IpAddr, headers: &HeaderMap) -> NewClick {
        let client_ip = extract_client_ip(headers, socket_ip, &self.config);

        let user_agent = raw.user_agent.or_else(|| {
            headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        });
        let (device, browser, os) = parse_user_agent(user_agent.as_deref());

        let referrer = raw.referrer.filter(|r| !r.is_empty());
        let parsed = classify_referrer(referrer.as_deref(), raw.destination_url.as_deref());

        let country = raw
            .country
            .filter(|c| !c.trim().is_empty())
            .or_else(|| country_from_headers(headers));

        NewClick {
            link_id: raw.link_id,
            workspace_id: raw.workspace_id,
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
            ip_hash: self.hasher.hash(client_ip),
            device,
            browser,
            os,
            referrer,
            country,
            referrer_type: parsed.referrer_type,
            referrer_source: parsed.source,
            utm: parsed.utm_params,
        }
    }
}
