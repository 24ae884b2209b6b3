use chrono::{DateTime, Utc};

use tidemark_core::channel::{classify_channel, parse_query_params, strip_self_referral};
use tidemark_core::event::{CanonicalEvent, EventType};
use tidemark_core::import::ImportSource;

use super::derive::{
    device_type, format_timestamp, normalize_browser, normalize_os, parse_timestamp,
    parse_user_agent,
};
use super::fields::{FieldRule, FieldSpec, SourceRow};
use super::{SourceMapper, TransformContext};

const fn text(max: usize) -> FieldRule {
    FieldRule::Text { max }
}

const PIXELS: FieldRule = FieldRule::UnsignedInt { max: 100_000 };

/// Columns of a SimpleAnalytics data export.
static SIMPLE_ANALYTICS_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("added_iso", FieldRule::Timestamp),
    FieldSpec::optional("added_unix", FieldRule::UnsignedInt { max: u64::MAX }),
    FieldSpec::optional("browser_name", text(50)),
    FieldSpec::optional("browser_version", text(30)),
    FieldSpec::optional("country_code", FieldRule::CountryCode),
    FieldSpec::required("datapoint", text(100)),
    FieldSpec::optional(
        "device_type",
        FieldRule::OneOf(&["desktop", "mobile", "tablet", "tv"]),
    ),
    FieldSpec::optional("document_referrer", text(1000)),
    FieldSpec::required("hostname", text(100)),
    FieldSpec::optional("hostname_original", text(100)),
    FieldSpec::optional("is_robot", FieldRule::OneOf(&["true", "false"])),
    FieldSpec::optional("lang_language", text(10)),
    FieldSpec::optional("lang_region", text(10)),
    FieldSpec::optional("os_name", text(50)),
    FieldSpec::optional("os_version", text(30)),
    FieldSpec::required("path", text(500)),
    FieldSpec::optional("query", text(500)),
    FieldSpec::optional("referrer_hostname", text(255)),
    FieldSpec::optional("screen_height", PIXELS),
    FieldSpec::optional("screen_width", PIXELS),
    FieldSpec::required("session_id", FieldRule::Uuid),
    FieldSpec::optional("utm_campaign", text(255)),
    FieldSpec::optional("utm_content", text(255)),
    FieldSpec::optional("utm_medium", text(255)),
    FieldSpec::optional("utm_source", text(255)),
    FieldSpec::optional("utm_term", text(255)),
    FieldSpec::required("uuid", FieldRule::Uuid),
    FieldSpec::optional("viewport_height", PIXELS),
    FieldSpec::optional("viewport_width", PIXELS),
    FieldSpec::optional("user_agent", text(1000)),
];

/// SimpleAnalytics stores pageviews and events in one free-text column.
const SIMPLE_ANALYTICS_PAGEVIEW: &str = "pageview";

pub struct SimpleAnalyticsMapper;

/// The export strips the `?`; utm values live in their own columns.
fn querystring(row: &SourceRow) -> String {
    let mut query = row.get("query").trim_start_matches('?').to_string();
    for key in [
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_content",
        "utm_term",
    ] {
        let value = row.get(key);
        if value.is_empty() || parse_query_params(&query).contains_key(key) {
            continue;
        }
        let pair: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(key, value)
            .finish();
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&pair);
    }
    if query.is_empty() {
        query
    } else {
        format!("?{query}")
    }
}

fn referrer(row: &SourceRow) -> String {
    match (row.get("document_referrer"), row.get("referrer_hostname")) {
        ("", "") => String::new(),
        ("", host) => format!("https://{host}"),
        (full, _) => full.to_string(),
    }
}

fn language(row: &SourceRow) -> String {
    match (row.get("lang_language"), row.get("lang_region")) {
        ("", _) => String::new(),
        (lang, "") => lang.to_string(),
        (lang, region) => format!("{lang}-{}", region.to_uppercase()),
    }
}

impl SourceMapper for SimpleAnalyticsMapper {
    fn source(&self) -> ImportSource {
        ImportSource::SimpleAnalytics
    }

    fn fields(&self) -> &'static [FieldSpec] {
        SIMPLE_ANALYTICS_FIELDS
    }

    fn timestamp(&self, row: &SourceRow) -> Option<DateTime<Utc>> {
        parse_timestamp(row.get("added_iso"))
    }

    fn transform(&self, row: &SourceRow, ctx: &TransformContext) -> Option<CanonicalEvent> {
        if !row.is_valid() || row.get("is_robot") == "true" {
            return None;
        }
        let timestamp = self.timestamp(row)?;

        let datapoint = row.get("datapoint");
        let (event_type, event_name) = if datapoint == SIMPLE_ANALYTICS_PAGEVIEW {
            (EventType::Pageview, String::new())
        } else {
            (EventType::CustomEvent, datapoint.to_string())
        };

        let hostname = row.get("hostname").to_lowercase();
        let querystring = querystring(row);
        let raw_referrer = referrer(row);
        let channel = classify_channel(&raw_referrer, &querystring, &hostname);
        let referrer = strip_self_referral(raw_referrer, &hostname);

        let ua = parse_user_agent(row.get("user_agent")).unwrap_or_default();
        let (browser, browser_version) = match row.get("browser_name") {
            "" => (ua.browser, ua.browser_version),
            name => (
                normalize_browser(name),
                row.get("browser_version").to_string(),
            ),
        };
        let (operating_system, operating_system_version) = match row.get("os_name") {
            "" => (ua.os, ua.os_version),
            name => {
                let (os, embedded) = normalize_os(name);
                match row.get("os_version") {
                    "" => (os, embedded),
                    version => (os, version.to_string()),
                }
            }
        };

        let screen_width = row.get("screen_width").parse().unwrap_or(0);
        let screen_height = row.get("screen_height").parse().unwrap_or(0);
        let device_type = device_type(row.get("device_type"), &operating_system, screen_width);

        let session_id = row.get("session_id").to_string();

        Some(CanonicalEvent {
            site_id: ctx.site_id.clone(),
            timestamp: format_timestamp(&timestamp),
            user_id: session_id.clone(),
            session_id,
            hostname,
            pathname: row.get("path").to_string(),
            url_parameters: parse_query_params(&querystring),
            querystring,
            page_title: String::new(),
            referrer,
            channel: channel.as_str().to_string(),
            browser,
            browser_version,
            operating_system,
            operating_system_version,
            language: language(row),
            country: row.get("country_code").to_uppercase(),
            region: String::new(),
            city: String::new(),
            screen_width,
            screen_height,
            device_type,
            event_type,
            event_name,
            props: serde_json::Map::new(),
            import_id: ctx.import_id.clone(),
        })
    }
}
