use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A calendar month, ordered chronologically. Rendered as `YYYY-MM`; stored
/// and keyed as the integer `YYYYMM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn of<D: Datelike>(date: &D) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn yyyymm(&self) -> u32 {
        (self.year.max(0) as u32) * 100 + self.month
    }

    pub fn from_yyyymm(value: u32) -> Result<Self, CoreError> {
        Self::new((value / 100) as i32, value % 100)
            .ok_or_else(|| CoreError::InvalidMonth(value.to_string()))
    }

    fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    fn from_ordinal(ordinal: i64) -> Self {
        Self {
            year: ordinal.div_euclid(12) as i32,
            month: (ordinal.rem_euclid(12) + 1) as u32,
        }
    }

    pub fn minus_months(&self, months: u32) -> Self {
        Self::from_ordinal(self.ordinal() - i64::from(months))
    }

    pub fn next(&self) -> Self {
        Self::from_ordinal(self.ordinal() + 1)
    }

    /// Number of months from `self` through `end`, both inclusive. Zero when
    /// `end` precedes `self`.
    pub fn months_through(&self, end: MonthKey) -> u32 {
        (end.ordinal() - self.ordinal() + 1).max(0) as u32
    }

    /// First calendar day of the month.
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = CoreError;

    /// Parses the `YYYYMM` form produced by DuckDB `strftime(ts, '%Y%m')`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidMonth(s.to_string()))?;
        Self::from_yyyymm(value)
    }
}

/// Subscription tiers, stored in `organizations.plan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Standard,
    Pro,
    Enterprise,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Standard => "standard",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }

    /// Built-in limits of the tier before per-organization overrides.
    pub fn default_limits(&self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits {
                monthly_event_limit: Some(3_000),
                historical_window_months: Some(6),
            },
            Plan::Standard => PlanLimits {
                monthly_event_limit: Some(100_000),
                historical_window_months: Some(24),
            },
            Plan::Pro => PlanLimits {
                monthly_event_limit: Some(1_000_000),
                historical_window_months: Some(60),
            },
            Plan::Enterprise => PlanLimits {
                monthly_event_limit: Some(10_000_000),
                historical_window_months: Some(60),
            },
        }
    }
}

impl FromStr for Plan {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "standard" => Ok(Plan::Standard),
            "pro" => Ok(Plan::Pro),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(CoreError::UnknownPlan(other.to_string())),
        }
    }
}

/// `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub monthly_event_limit: Option<u64>,
    pub historical_window_months: Option<u32>,
}

/// The effective subscription of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: Plan,
    pub limits: PlanLimits,
}

impl Subscription {
    /// No monthly cap and no lookback window. Used by self-hosted installs and
    /// quota-exempt organizations.
    pub fn unlimited(plan: Plan) -> Self {
        Self {
            plan,
            limits: PlanLimits {
                monthly_event_limit: None,
                historical_window_months: None,
            },
        }
    }

    /// Resolve the tier defaults, then apply the organization's override and
    /// exemption flag.
    pub fn resolve(plan: Plan, monthly_limit_override: Option<u64>, exempt: bool) -> Self {
        if exempt {
            return Self::unlimited(plan);
        }
        let mut limits = plan.default_limits();
        if let Some(limit) = monthly_limit_override {
            limits.monthly_event_limit = Some(limit);
        }
        Self { plan, limits }
    }
}
