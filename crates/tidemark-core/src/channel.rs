use std::collections::BTreeMap;

/// Marketing channel of a pageview, derived from referrer, query string, and
/// the page's own hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Direct,
    Internal,
    OrganicSearch,
    PaidSearch,
    OrganicSocial,
    PaidSocial,
    Email,
    Affiliate,
    Display,
    Video,
    Sms,
    Referral,
    Unknown,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Direct => "Direct",
            Channel::Internal => "Internal",
            Channel::OrganicSearch => "Organic Search",
            Channel::PaidSearch => "Paid Search",
            Channel::OrganicSocial => "Organic Social",
            Channel::PaidSocial => "Paid Social",
            Channel::Email => "Email",
            Channel::Affiliate => "Affiliate",
            Channel::Display => "Display",
            Channel::Video => "Video",
            Channel::Sms => "SMS",
            Channel::Referral => "Referral",
            Channel::Unknown => "Unknown",
        }
    }
}

const SEARCH_ENGINES: &[&str] = &[
    "google", "bing", "yahoo", "duckduckgo", "baidu", "yandex", "ecosia", "qwant", "startpage",
    "brave", "naver", "seznam", "kagi",
];

const SOCIAL_NETWORKS: &[&str] = &[
    "facebook", "instagram", "twitter", "linkedin", "lnkd", "reddit", "pinterest",
    "tiktok", "snapchat", "mastodon", "threads", "bsky", "tumblr", "vk", "quora",
    "ycombinator", "discord", "telegram", "whatsapp",
];

/// Social hosts whose brand label is too short to match on its own.
const SOCIAL_SHORT_HOSTS: &[&str] = &["x.com", "t.co", "x"];

const VIDEO_SITES: &[&str] = &["youtube", "youtu", "vimeo", "twitch", "dailymotion"];

const WEBMAIL_HOSTS: &[&str] = &[
    "mail.google.com",
    "outlook.live.com",
    "outlook.office.com",
    "mail.yahoo.com",
    "mail.proton.me",
];

const PAID_SEARCH_CLICK_IDS: &[&str] = &["gclid", "gbraid", "wbraid", "msclkid", "dclid"];
const PAID_SOCIAL_CLICK_IDS: &[&str] = &["ttclid", "twclid", "li_fat_id", "epik", "rdt_cid"];

/// Extract the lower-cased host from a referrer URL, tolerating a missing
/// scheme. Returns `None` for empty or host-less input.
pub fn referrer_host(referrer: &str) -> Option<String> {
    let referrer = referrer.trim();
    if referrer.is_empty() {
        return None;
    }
    if let Ok(parsed) = url::Url::parse(referrer) {
        if let Some(host) = parsed.host_str() {
            return Some(host.to_lowercase());
        }
    }
    let stripped = referrer
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("//");
    let host = stripped.split(['/', '?', '#']).next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Whether `referrer` points at the same site as `hostname`, ignoring a
/// leading `www.`.
pub fn is_self_referral(referrer: &str, hostname: &str) -> bool {
    match referrer_host(referrer) {
        Some(host) => {
            !hostname.is_empty() && strip_www(&host) == strip_www(&hostname.to_lowercase())
        }
        None => false,
    }
}

/// Blank out referrers that point back at the tracked site.
pub fn strip_self_referral(referrer: String, hostname: &str) -> String {
    if is_self_referral(&referrer, hostname) {
        String::new()
    } else {
        referrer
    }
}

/// Decode a query string (with or without the leading `?`) into a map. Later
/// duplicates of a key win.
pub fn parse_query_params(querystring: &str) -> BTreeMap<String, String> {
    let raw = querystring.trim().trim_start_matches('?');
    url::form_urlencoded::parse(raw.as_bytes())
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// Whether any dot-separated label of `host` (ignoring the TLD) is one of
/// `names`. `news.google.co.uk` matches `google`.
fn host_matches(host: &str, names: &[&str]) -> bool {
    let labels: Vec<&str> = strip_www(host).split('.').collect();
    if labels.len() < 2 {
        return names.contains(&labels[0]);
    }
    labels[..labels.len() - 1]
        .iter()
        .any(|label| names.contains(label))
}

fn is_social_host(host: &str) -> bool {
    host_matches(host, SOCIAL_NETWORKS) || SOCIAL_SHORT_HOSTS.contains(&strip_www(host))
}

fn is_paid_medium(medium: &str) -> bool {
    matches!(
        medium,
        "cpc" | "ppc" | "paid" | "paidsearch" | "paid_search" | "paid-search" | "retargeting"
            | "paid_social" | "paid-social" | "paidsocial" | "cpa" | "cpv"
    )
}

/// Classify the acquisition channel of one event.
pub fn classify_channel(referrer: &str, querystring: &str, hostname: &str) -> Channel {
    let params = parse_query_params(querystring);
    let utm_source = params
        .get("utm_source")
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    let utm_medium = params
        .get("utm_medium")
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    let ref_host = referrer_host(referrer);

    if let Some(host) = ref_host.as_deref() {
        if is_self_referral(referrer, hostname) && utm_source.is_empty() {
            return Channel::Internal;
        }
        if WEBMAIL_HOSTS.contains(&host) && utm_medium.is_empty() {
            return Channel::Email;
        }
    }

    let has_click_id = |ids: &[&str]| ids.iter().any(|id| params.contains_key(*id));
    let source_or_ref_matches = |names: &[&str]| {
        host_matches(&utm_source, names)
            || ref_host.as_deref().is_some_and(|h| host_matches(h, names))
    };
    let social = is_social_host(&utm_source) || ref_host.as_deref().is_some_and(is_social_host);

    if has_click_id(PAID_SEARCH_CLICK_IDS) {
        return Channel::PaidSearch;
    }
    if has_click_id(PAID_SOCIAL_CLICK_IDS) {
        return Channel::PaidSocial;
    }

    if is_paid_medium(&utm_medium) {
        if social || utm_medium.contains("social") {
            return Channel::PaidSocial;
        }
        return Channel::PaidSearch;
    }

    match utm_medium.as_str() {
        "email" | "e-mail" | "e_mail" | "newsletter" => return Channel::Email,
        "affiliate" | "affiliates" | "partner" => return Channel::Affiliate,
        "display" | "banner" | "cpm" | "expandable" | "interstitial" => return Channel::Display,
        "sms" | "text" => return Channel::Sms,
        "video" => return Channel::Video,
        "social" | "social-network" | "social_network" | "social-media" | "sm" => {
            return Channel::OrganicSocial
        }
        "organic" => {
            if source_or_ref_matches(SEARCH_ENGINES) {
                return Channel::OrganicSearch;
            }
        }
        _ => {}
    }
    if matches!(utm_source.as_str(), "email" | "newsletter") {
        return Channel::Email;
    }
    if utm_source == "sms" {
        return Channel::Sms;
    }

    if source_or_ref_matches(SEARCH_ENGINES) {
        return Channel::OrganicSearch;
    }
    if source_or_ref_matches(VIDEO_SITES) {
        return Channel::Video;
    }
    if social || params.contains_key("fbclid") {
        return Channel::OrganicSocial;
    }

    match (ref_host, utm_source.is_empty() && utm_medium.is_empty()) {
        (Some(_), _) => Channel::Referral,
        (None, true) => Channel::Direct,
        (None, false) => Channel::Unknown,
    }
}
