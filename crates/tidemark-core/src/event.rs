use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Timestamp layout stored in `events.timestamp`, always UTC.
pub const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Event kinds produced by imports. Wire values match the `events.type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Pageview,
    CustomEvent,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Pageview => "pageview",
            EventType::CustomEvent => "custom_event",
        }
    }
}

/// The normalized event row shared by live tracking and imports.
/// Mirrors the DuckDB `events` table columns exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub site_id: String,
    /// `yyyy-MM-dd HH:mm:ss`, UTC.
    pub timestamp: String,
    pub session_id: String,
    pub user_id: String,
    pub hostname: String,
    pub pathname: String,
    /// Either empty or starts with `?`.
    pub querystring: String,
    pub url_parameters: BTreeMap<String, String>,
    pub page_title: String,
    /// Empty for direct traffic and self-referrals.
    pub referrer: String,
    pub channel: String,
    pub browser: String,
    pub browser_version: String,
    pub operating_system: String,
    pub operating_system_version: String,
    pub language: String,
    /// ISO 3166-1 alpha-2, upper case, or empty.
    pub country: String,
    pub region: String,
    pub city: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub device_type: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub event_name: String,
    pub props: serde_json::Map<String, serde_json::Value>,
    pub import_id: String,
}

impl CanonicalEvent {
    /// `event_name` must be empty exactly when the event is a pageview.
    pub fn has_consistent_name(&self) -> bool {
        self.event_name.is_empty() == (self.event_type == EventType::Pageview)
    }

    /// Serialized `props` for VARCHAR storage.
    pub fn props_json(&self) -> String {
        serde_json::Value::Object(self.props.clone()).to_string()
    }

    /// Serialized `url_parameters` for VARCHAR storage.
    pub fn url_parameters_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.url_parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pageview() -> CanonicalEvent {
        CanonicalEvent {
            site_id: "site_a".to_string(),
            timestamp: "2024-03-01 12:00:00".to_string(),
            session_id: "s".to_string(),
            user_id: "u".to_string(),
            hostname: "example.com".to_string(),
            pathname: "/".to_string(),
            querystring: String::new(),
            url_parameters: BTreeMap::new(),
            page_title: String::new(),
            referrer: String::new(),
            channel: "Direct".to_string(),
            browser: String::new(),
            browser_version: String::new(),
            operating_system: String::new(),
            operating_system_version: String::new(),
            language: String::new(),
            country: String::new(),
            region: String::new(),
            city: String::new(),
            screen_width: 0,
            screen_height: 0,
            device_type: "Desktop".to_string(),
            event_type: EventType::Pageview,
            event_name: String::new(),
            props: serde_json::Map::new(),
            import_id: "imp".to_string(),
        }
    }

    #[test]
    fn event_type_serializes_as_column_value() {
        let json = serde_json::to_value(pageview()).expect("serialize");
        assert_eq!(json["type"], "pageview");
        assert_eq!(EventType::CustomEvent.as_str(), "custom_event");
    }

    #[test]
    fn name_consistency_tracks_event_type() {
        let mut event = pageview();
        assert!(event.has_consistent_name());

        event.event_name = "signup".to_string();
        assert!(!event.has_consistent_name());

        event.event_type = EventType::CustomEvent;
        assert!(event.has_consistent_name());

        event.event_name.clear();
        assert!(!event.has_consistent_name());
    }
}
