//! Declared field lists of source exports.
//!
//! Each mapper declares one `&'static [FieldSpec]`. The same list configures
//! the CSV reader (expected headers) and validates every row, so the two can
//! never drift apart.

use std::sync::OnceLock;

use regex::Regex;

use super::derive::parse_timestamp;

/// Validation rule of a single column.
#[derive(Debug, Clone, Copy)]
pub enum FieldRule {
    /// Free text up to `max` characters.
    Text { max: usize },
    /// Hyphenated UUID, any case.
    Uuid,
    /// ISO 3166-1 alpha-2 country code.
    CountryCode,
    /// Screen resolution in `WIDTHxHEIGHT` form.
    Screen,
    /// Non-negative integer up to `max`.
    UnsignedInt { max: u64 },
    /// One of a fixed set of values.
    OneOf(&'static [&'static str]),
    /// A timestamp accepted by [`parse_timestamp`].
    Timestamp,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub rule: FieldRule,
    /// Whether an empty value fails validation.
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, rule: FieldRule) -> Self {
        Self {
            name,
            rule,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, rule: FieldRule) -> Self {
        Self {
            name,
            rule,
            required: false,
        }
    }

    fn accepts(&self, value: &str) -> bool {
        if value.is_empty() {
            return !self.required;
        }
        match self.rule {
            FieldRule::Text { max } => value.chars().count() <= max,
            FieldRule::Uuid => uuid_re().is_match(value),
            FieldRule::CountryCode => country_re().is_match(value),
            FieldRule::Screen => screen_re().is_match(value),
            FieldRule::UnsignedInt { max } => value.parse::<u64>().is_ok_and(|v| v <= max),
            FieldRule::OneOf(allowed) => allowed.contains(&value),
            FieldRule::Timestamp => parse_timestamp(value).is_some(),
        }
    }
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

fn country_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z]{2}$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

fn screen_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{1,5}x\d{1,5}$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Header names of a field list, in declaration order.
pub fn header_names(fields: &[FieldSpec]) -> Vec<&'static str> {
    fields.iter().map(|f| f.name).collect()
}

/// One CSV record projected onto a mapper's declared fields.
///
/// Columns the export lacks read as empty strings; columns the mapper does
/// not declare are never stored.
#[derive(Debug, Clone)]
pub struct SourceRow {
    fields: &'static [FieldSpec],
    values: Vec<String>,
}

impl SourceRow {
    /// `values` must be aligned with `fields`.
    pub fn new(fields: &'static [FieldSpec], values: Vec<String>) -> Self {
        debug_assert_eq!(fields.len(), values.len());
        Self { fields, values }
    }

    /// Build a row from `(name, value)` pairs; undeclared names are ignored.
    pub fn from_pairs(fields: &'static [FieldSpec], pairs: &[(&str, &str)]) -> Self {
        let values = fields
            .iter()
            .map(|f| {
                pairs
                    .iter()
                    .find(|(name, _)| *name == f.name)
                    .map(|(_, v)| v.trim().to_string())
                    .unwrap_or_default()
            })
            .collect();
        Self { fields, values }
    }

    pub fn get(&self, name: &str) -> &str {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .and_then(|idx| self.values.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Every declared field passes its rule.
    pub fn is_valid(&self) -> bool {
        self.fields
            .iter()
            .zip(&self.values)
            .all(|(spec, value)| spec.accepts(value))
    }
}
