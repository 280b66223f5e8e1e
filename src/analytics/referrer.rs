//! Referrer classification
//!
//! Maps a raw HTTP referrer (and optionally the destination URL of the link)
//! onto a traffic category, a named source, search keywords and UTM
//! attribution. Classification never fails: anything that cannot be parsed
//! is reported as direct traffic.
//!
//! Rules are evaluated in a fixed order: search engines first, then social
//! networks, then the external catch-all.

use url::Url;

use crate::analytics::models::{ParsedReferrer, ReferrerType, UtmParams};

/// A search provider: canonical name, known domains, keyword query parameters
struct SearchEngine {
    name: &'static str,
    domains: &'static [&'static str],
    keyword_params: &'static [&'static str],
}

static SEARCH_ENGINES: &[SearchEngine] = &[
    SearchEngine {
        name: "google",
        domains: &[
            "google.com",
            "google.co.uk",
            "google.ca",
            "google.com.au",
            "google.de",
            "google.fr",
            "google.es",
            "google.it",
            "google.nl",
            "google.co.in",
            "google.co.jp",
            "google.com.br",
        ],
        keyword_params: &["q", "query"],
    },
    SearchEngine {
        name: "bing",
        domains: &["bing.com"],
        keyword_params: &["q"],
    },
    SearchEngine {
        name: "yahoo",
        domains: &["yahoo.com", "search.yahoo.com", "yahoo.co.jp"],
        keyword_params: &["p", "q"],
    },
    SearchEngine {
        name: "duckduckgo",
        domains: &["duckduckgo.com"],
        keyword_params: &["q"],
    },
    SearchEngine {
        name: "baidu",
        domains: &["baidu.com"],
        keyword_params: &["wd", "word"],
    },
    SearchEngine {
        name: "yandex",
        domains: &["yandex.com", "yandex.ru"],
        keyword_params: &["text"],
    },
    SearchEngine {
        name: "ecosia",
        domains: &["ecosia.org"],
        keyword_params: &["q"],
    },
    SearchEngine {
        name: "brave",
        domains: &["search.brave.com"],
        keyword_params: &["q"],
    },
    SearchEngine {
        name: "ask",
        domains: &["ask.com"],
        keyword_params: &["q"],
    },
];

static SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "fb.com",
    "fb.me",
    "twitter.com",
    "t.co",
    "x.com",
    "linkedin.com",
    "lnkd.in",
    "instagram.com",
    "pinterest.com",
    "pin.it",
    "reddit.com",
    "youtube.com",
    "youtu.be",
    "tiktok.com",
    "snapchat.com",
    "whatsapp.com",
    "wa.me",
    "telegram.org",
    "t.me",
    "discord.com",
    "discord.gg",
    "threads.net",
    "tumblr.com",
    "quora.com",
    "mastodon.social",
];

/// How a social hostname is matched against a canonical name
enum HostRule {
    /// Hostname contains the pattern
    Contains(&'static str),
    /// Hostname equals the pattern
    Exact(&'static str),
}

/// Canonical social source names. First match wins.
static SOCIAL_CANONICAL: &[(HostRule, &str)] = &[
    (HostRule::Contains("facebook.com"), "facebook"),
    (HostRule::Exact("fb.com"), "facebook"),
    (HostRule::Exact("fb.me"), "facebook"),
    (HostRule::Contains("twitter.com"), "twitter"),
    (HostRule::Exact("t.co"), "twitter"),
    (HostRule::Exact("x.com"), "twitter"),
    (HostRule::Contains("linkedin.com"), "linkedin"),
    (HostRule::Exact("lnkd.in"), "linkedin"),
    (HostRule::Contains("instagram.com"), "instagram"),
    (HostRule::Contains("pinterest.com"), "pinterest"),
    (HostRule::Exact("pin.it"), "pinterest"),
    (HostRule::Contains("reddit.com"), "reddit"),
    (HostRule::Contains("youtube.com"), "youtube"),
    (HostRule::Exact("youtu.be"), "youtube"),
    (HostRule::Contains("tiktok.com"), "tiktok"),
    (HostRule::Contains("snapchat.com"), "snapchat"),
    (HostRule::Contains("whatsapp.com"), "whatsapp"),
    (HostRule::Exact("wa.me"), "whatsapp"),
    (HostRule::Contains("telegram.org"), "telegram"),
    (HostRule::Exact("t.me"), "telegram"),
    (HostRule::Contains("discord.com"), "discord"),
    (HostRule::Exact("discord.gg"), "discord"),
];

impl HostRule {
    fn matches(&self, host: &str) -> bool {
        match self {
            HostRule::Contains(pattern) => host.contains(pattern),
            HostRule::Exact(pattern) => host == *pattern,
        }
    }
}

/// Classify a referrer.
///
/// `destination_url` is the URL the visitor was sent to; when it carries any
/// `utm_*` parameter the result includes all five UTM fields.
pub fn classify_referrer(referrer: Option<&str>, destination_url: Option<&str>) -> ParsedReferrer {
    let Some(referrer) = referrer.filter(|r| !r.is_empty()) else {
        return ParsedReferrer::direct();
    };

    // Malformed referrers are reported as direct traffic
    let Ok(referrer_url) = Url::parse(referrer) else {
        return ParsedReferrer::direct();
    };
    let Some(host) = referrer_url.host_str() else {
        return ParsedReferrer::direct();
    };
    let host = normalize_host(host);

    let utm_params = destination_url.and_then(extract_utm_params);

    if let Some(engine) = match_search_engine(&host) {
        return ParsedReferrer {
            referrer_type: ReferrerType::Search,
            source: Some(engine.name.to_string()),
            search_keywords: extract_keywords(&referrer_url, engine.keyword_params),
            utm_params,
        };
    }

    if is_social_host(&host) {
        return ParsedReferrer {
            referrer_type: ReferrerType::Social,
            source: Some(social_source(&host)),
            search_keywords: None,
            utm_params,
        };
    }

    ParsedReferrer {
        referrer_type: ReferrerType::External,
        source: Some(host),
        search_keywords: None,
        utm_params,
    }
}

/// Lowercase and strip a leading `www.`
fn normalize_host(host: &str) -> String {
    let host = host.to_lowercase();
    match host.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => host,
    }
}

/// Exact domain match or subdomain of it
fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn match_search_engine(host: &str) -> Option<&'static SearchEngine> {
    SEARCH_ENGINES
        .iter()
        .find(|engine| engine.domains.iter().any(|d| host_matches(host, d)))
}

fn is_social_host(host: &str) -> bool {
    SOCIAL_DOMAINS.iter().any(|d| host_matches(host, d))
}

fn social_source(host: &str) -> String {
    SOCIAL_CANONICAL
        .iter()
        .find(|(rule, _)| rule.matches(host))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| host.to_string())
}

/// First non-empty value among `params`, in order
fn extract_keywords(url: &Url, params: &[&str]) -> Option<String> {
    params.iter().find_map(|param| {
        url.query_pairs()
            .find(|(key, value)| key == param && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    })
}

fn extract_utm_params(destination_url: &str) -> Option<UtmParams> {
    let url = Url::parse(destination_url).ok()?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    };

    let utm = UtmParams {
        source: param("utm_source"),
        medium: param("utm_medium"),
        campaign: param("utm_campaign"),
        term: param("utm_term"),
        content: param("utm_content"),
    };

    if utm.is_empty() {
        None
    } else {
        Some(utm)
    }
}
