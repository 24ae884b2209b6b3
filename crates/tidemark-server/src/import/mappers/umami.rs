use chrono::{DateTime, Utc};

use tidemark_core::channel::{classify_channel, parse_query_params, strip_self_referral};
use tidemark_core::event::{CanonicalEvent, EventType};
use tidemark_core::import::ImportSource;

use super::derive::{
    device_type, format_timestamp, normalize_browser, normalize_os, parse_screen, parse_timestamp,
};
use super::fields::{FieldRule, FieldSpec, SourceRow};
use super::{SourceMapper, TransformContext};

const UUID: FieldRule = FieldRule::Uuid;
const fn text(max: usize) -> FieldRule {
    FieldRule::Text { max }
}

/// Columns of the Umami `website_event` CSV export.
static UMAMI_FIELDS: &[FieldSpec] = &[
    FieldSpec::optional("website_id", UUID),
    FieldSpec::required("session_id", UUID),
    FieldSpec::optional("visit_id", UUID),
    FieldSpec::optional("event_id", UUID),
    FieldSpec::required("hostname", text(100)),
    FieldSpec::optional("browser", text(20)),
    FieldSpec::optional("os", text(20)),
    FieldSpec::optional("device", text(20)),
    FieldSpec::optional("screen", FieldRule::Screen),
    FieldSpec::optional("language", text(35)),
    FieldSpec::optional("country", FieldRule::CountryCode),
    FieldSpec::optional("subdivision1", text(20)),
    FieldSpec::optional("subdivision2", text(50)),
    FieldSpec::optional("city", text(50)),
    FieldSpec::required("url_path", text(500)),
    FieldSpec::optional("url_query", text(500)),
    FieldSpec::optional("utm_source", text(255)),
    FieldSpec::optional("utm_medium", text(255)),
    FieldSpec::optional("utm_campaign", text(255)),
    FieldSpec::optional("utm_content", text(255)),
    FieldSpec::optional("utm_term", text(255)),
    FieldSpec::optional("referrer_path", text(500)),
    FieldSpec::optional("referrer_query", text(500)),
    FieldSpec::optional("referrer_domain", text(500)),
    FieldSpec::optional("page_title", text(500)),
    FieldSpec::optional("gclid", text(255)),
    FieldSpec::optional("fbclid", text(255)),
    FieldSpec::optional("msclkid", text(255)),
    FieldSpec::optional("ttclid", text(255)),
    FieldSpec::optional("li_fat_id", text(255)),
    FieldSpec::optional("twclid", text(255)),
    FieldSpec::required("event_type", FieldRule::OneOf(&["1", "2"])),
    FieldSpec::optional("event_name", text(50)),
    FieldSpec::optional("tag", text(50)),
    FieldSpec::optional("distinct_id", text(50)),
    FieldSpec::required("created_at", FieldRule::Timestamp),
    FieldSpec::optional("job_id", UUID),
];

/// Umami marks pageviews with `event_type = 1` and custom events with `2`.
const UMAMI_PAGEVIEW: &str = "1";

pub struct UmamiMapper;

fn with_question_mark(query: &str) -> String {
    let query = query.trim().trim_start_matches('?');
    if query.is_empty() {
        String::new()
    } else {
        format!("?{query}")
    }
}

fn referrer_url(row: &SourceRow) -> String {
    let domain = row.get("referrer_domain");
    if domain.is_empty() {
        return String::new();
    }
    let path = row.get("referrer_path");
    let path = if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    format!(
        "https://{domain}{path}{}",
        with_question_mark(row.get("referrer_query"))
    )
}

impl SourceMapper for UmamiMapper {
    fn source(&self) -> ImportSource {
        ImportSource::Umami
    }

    fn fields(&self) -> &'static [FieldSpec] {
        UMAMI_FIELDS
    }

    fn timestamp(&self, row: &SourceRow) -> Option<DateTime<Utc>> {
        parse_timestamp(row.get("created_at"))
    }

    fn transform(&self, row: &SourceRow, ctx: &TransformContext) -> Option<CanonicalEvent> {
        if !row.is_valid() {
            return None;
        }
        let timestamp = self.timestamp(row)?;

        let (event_type, event_name) = if row.get("event_type") == UMAMI_PAGEVIEW {
            (EventType::Pageview, String::new())
        } else {
            let name = row.get("event_name");
            if name.is_empty() {
                return None;
            }
            (EventType::CustomEvent, name.to_string())
        };

        let hostname = row.get("hostname").to_lowercase();
        let querystring = with_question_mark(row.get("url_query"));
        let raw_referrer = referrer_url(row);
        let channel = classify_channel(&raw_referrer, &querystring, &hostname);
        let referrer = strip_self_referral(raw_referrer, &hostname);

        let (screen_width, screen_height) = parse_screen(row.get("screen"));
        let (operating_system, operating_system_version) = normalize_os(row.get("os"));
        let device_type = device_type(row.get("device"), &operating_system, screen_width);

        let country = row.get("country").to_uppercase();
        let region = match (country.as_str(), row.get("subdivision1")) {
            (_, "") => String::new(),
            ("", sub) => sub.to_string(),
            (c, sub) if sub.starts_with(c) => sub.to_string(),
            (c, sub) => format!("{c}-{sub}"),
        };

        let session_id = row.get("session_id").to_string();
        let user_id = match row.get("distinct_id") {
            "" => session_id.clone(),
            distinct => distinct.to_string(),
        };

        let mut props = serde_json::Map::new();
        if event_type == EventType::CustomEvent && !row.get("tag").is_empty() {
            props.insert("tag".to_string(), row.get("tag").into());
        }

        Some(CanonicalEvent {
            site_id: ctx.site_id.clone(),
            timestamp: format_timestamp(&timestamp),
            session_id,
            user_id,
            hostname,
            pathname: row.get("url_path").to_string(),
            url_parameters: parse_query_params(&querystring),
            querystring,
            page_title: row.get("page_title").to_string(),
            referrer,
            channel: channel.as_str().to_string(),
            browser: normalize_browser(row.get("browser")),
            browser_version: String::new(),
            operating_system,
            operating_system_version,
            language: row.get("language").to_string(),
            country,
            region,
            city: row.get("city").to_string(),
            screen_width,
            screen_height,
            device_type,
            event_type,
            event_name,
            props,
            import_id: ctx.import_id.clone(),
        })
    }
}
