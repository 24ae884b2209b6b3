//! Derived-field logic shared by every source mapper.

use chrono::{DateTime, NaiveDateTime, Utc};

use tidemark_core::event::CANONICAL_TIMESTAMP_FORMAT;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse an export timestamp. Offset-less values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let raw = raw.strip_suffix(" UTC").unwrap_or(raw);
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(CANONICAL_TIMESTAMP_FORMAT).to_string()
}

/// Browser and OS fields recovered from a `User-Agent` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgentInfo {
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
}

fn known(value: &str) -> String {
    if value.is_empty() || value.eq_ignore_ascii_case("UNKNOWN") {
        String::new()
    } else {
        value.to_string()
    }
}

/// Parse a `User-Agent` string via the `woothee` crate.
///
/// Returns `None` if the UA string is empty or `woothee` cannot classify it.
pub fn parse_user_agent(user_agent: &str) -> Option<UserAgentInfo> {
    if user_agent.trim().is_empty() {
        return None;
    }
    let result = woothee::parser::Parser::new().parse(user_agent)?;
    let (os, os_version) = normalize_os(&known(&result.os));
    Some(UserAgentInfo {
        browser: normalize_browser(&known(&result.name)),
        browser_version: known(&result.version),
        os,
        os_version: if os_version.is_empty() {
            known(&result.os_version)
        } else {
            os_version
        },
    })
}

/// Map browser identifiers of various exporters onto display names.
pub fn normalize_browser(raw: &str) -> String {
    let raw = raw.trim();
    let name = match raw.to_ascii_lowercase().as_str() {
        "" => "",
        "chrome" | "crios" | "chromium-webview" => "Chrome",
        "firefox" | "fxios" => "Firefox",
        "safari" | "ios" | "ios-webview" | "mobile safari" => "Safari",
        "edge" | "edge-chromium" | "edge-ios" | "edg" => "Edge",
        "opera" | "opera-mini" => "Opera",
        "samsung" | "samsung internet" => "Samsung Internet",
        "yandexbrowser" | "yandex" => "Yandex",
        "android" => "Android Browser",
        "ie" | "internet explorer" => "Internet Explorer",
        "facebook" => "Facebook",
        "instagram" => "Instagram",
        "silk" => "Silk",
        "brave" => "Brave",
        "vivaldi" => "Vivaldi",
        _ => return capitalize(raw),
    };
    name.to_string()
}

/// Split an OS label such as `"Windows 10"` into name and version and
/// normalize the name.
pub fn normalize_os(raw: &str) -> (String, String) {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    let (name, version) = match lower.as_str() {
        "" => ("", ""),
        "mac os" | "mac osx" | "mac os x" | "macos" => ("macOS", ""),
        "ios" | "iphone" | "ipad" | "ipod" => ("iOS", ""),
        "android os" | "android" => ("Android", ""),
        "chrome os" | "chromeos" => ("Chrome OS", ""),
        "linux" => ("Linux", ""),
        "windows mobile" | "windows phone" => ("Windows Phone", ""),
        _ => {
            if let Some(version) = lower.strip_prefix("windows ") {
                let version = version.trim();
                let version = match version {
                    "nt 10.0" => "10",
                    "nt 6.3" => "8.1",
                    "nt 6.2" => "8",
                    "nt 6.1" => "7",
                    other => other,
                };
                return ("Windows".to_string(), version.to_string());
            }
            if lower == "windows" {
                ("Windows", "")
            } else {
                return (raw.to_string(), String::new());
            }
        }
    };
    (name.to_string(), version.to_string())
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Split a `WIDTHxHEIGHT` string. Anything else yields `(0, 0)`.
pub fn parse_screen(raw: &str) -> (u32, u32) {
    raw.split_once('x')
        .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)))
        .unwrap_or((0, 0))
}

/// Classify a device from its OS family, falling back to screen width.
pub fn classify_device(os: &str, screen_width: u32) -> &'static str {
    let os = os.to_ascii_lowercase();
    if os.contains("ipad") {
        return "Tablet";
    }
    if os.contains("ios") || os.contains("android") || os.contains("windows phone") {
        return if screen_width >= 768 { "Tablet" } else { "Mobile" };
    }
    match screen_width {
        0 => "Desktop",
        w if w < 768 => "Mobile",
        w if w < 1024 => "Tablet",
        _ => "Desktop",
    }
}

/// Normalize an exporter's own device label, or derive one when it is empty
/// or unrecognized.
pub fn device_type(label: &str, os: &str, screen_width: u32) -> String {
    match label.trim().to_ascii_lowercase().as_str() {
        "desktop" | "laptop" | "pc" => "Desktop",
        "mobile" | "smartphone" | "phone" => "Mobile",
        "tablet" => "Tablet",
        _ => classify_device(os, screen_width),
    }
    .to_string()
}
