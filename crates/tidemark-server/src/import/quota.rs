//! Per-job monthly quota and historical-window admission.

use std::collections::HashMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};

use tidemark_core::billing::{MonthKey, PlanLimits};

use crate::metadata::{EventWarehouse, SubscriptionSource};

/// Monthly event budget of one organization, seeded once per job.
///
/// Provisional acceptances are folded into the committed usage only after a
/// whole batch is scanned, so the first-come order inside a batch decides who
/// gets the remaining headroom.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    monthly_limit: Option<u64>,
    oldest_allowed: Option<MonthKey>,
    usage: HashMap<MonthKey, u64>,
    now: DateTime<Utc>,
}

impl QuotaTracker {
    pub async fn load(
        subscriptions: &dyn SubscriptionSource,
        warehouse: &dyn EventWarehouse,
        organization_id: &str,
    ) -> anyhow::Result<Self> {
        Self::load_at(subscriptions, warehouse, organization_id, Utc::now()).await
    }

    pub async fn load_at(
        subscriptions: &dyn SubscriptionSource,
        warehouse: &dyn EventWarehouse,
        organization_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let subscription = subscriptions
            .subscription_for(organization_id)
            .await?
            .ok_or_else(|| anyhow!("organization {organization_id} not found"))?;
        let mut tracker = Self::new(subscription.limits, HashMap::new(), now);
        if tracker.monthly_limit.is_some() {
            tracker.usage = warehouse
                .monthly_usage(organization_id, tracker.oldest_allowed)
                .await?;
        }
        Ok(tracker)
    }

    pub fn new(limits: PlanLimits, usage: HashMap<MonthKey, u64>, now: DateTime<Utc>) -> Self {
        let oldest_allowed = limits
            .historical_window_months
            .map(|months| MonthKey::of(&now).minus_months(months));
        Self {
            monthly_limit: limits.monthly_event_limit,
            oldest_allowed,
            usage,
            now,
        }
    }

    pub fn monthly_limit(&self) -> Option<u64> {
        self.monthly_limit
    }

    /// Earliest month this organization may import into; `None` when unbounded.
    pub fn oldest_allowed_month(&self) -> Option<MonthKey> {
        self.oldest_allowed
    }

    pub fn used(&self, month: MonthKey) -> u64 {
        self.usage.get(&month).copied().unwrap_or(0)
    }

    fn in_window(&self, ts: &DateTime<Utc>) -> bool {
        if *ts > self.now {
            return false;
        }
        match self.oldest_allowed {
            Some(oldest) => MonthKey::of(ts) >= oldest,
            None => true,
        }
    }

    /// Indices of the admitted timestamps, in input order.
    ///
    /// `None` entries (unparseable timestamps), future timestamps, and months
    /// before the historical window are never admitted.
    pub fn can_import_batch(&mut self, timestamps: &[Option<DateTime<Utc>>]) -> Vec<usize> {
        let mut provisional: HashMap<MonthKey, u64> = HashMap::new();
        let mut accepted = Vec::with_capacity(timestamps.len());

        for (idx, ts) in timestamps.iter().enumerate() {
            let Some(ts) = ts else { continue };
            if !self.in_window(ts) {
                continue;
            }
            let month = MonthKey::of(ts);
            let pending = provisional.get(&month).copied().unwrap_or(0);
            let admitted = match self.monthly_limit {
                Some(limit) => self.used(month) + pending < limit,
                None => true,
            };
            if admitted {
                *provisional.entry(month).or_insert(0) += 1;
                accepted.push(idx);
            }
        }

        for (month, count) in provisional {
            *self.usage.entry(month).or_insert(0) += count;
        }
        accepted
    }

    /// Single-event form of [`Self::can_import_batch`].
    pub fn admit(&mut self, ts: DateTime<Utc>) -> bool {
        !self.can_import_batch(&[Some(ts)]).is_empty()
    }

    /// Months of the window (oldest allowed through the current month) and
    /// how many of them are at capacity. `None` when either bound is missing.
    pub fn window_capacity(&self) -> Option<(u32, u32)> {
        let limit = self.monthly_limit?;
        let oldest = self.oldest_allowed?;
        let current = MonthKey::of(&self.now);
        let total = oldest.months_through(current);
        let mut full = 0;
        let mut month = oldest;
        while month <= current {
            if self.used(month) >= limit {
                full += 1;
            }
            month = month.next();
        }
        Some((full, total))
    }

    /// Whether any month of the window still has room.
    pub fn has_headroom(&self) -> bool {
        match (self.monthly_limit, self.window_capacity()) {
            (None, _) => true,
            (Some(_), Some((full, total))) => full < total,
            // Limited but no window: only the current month is known full or not.
            (Some(limit), None) => self.used(MonthKey::of(&self.now)) < limit,
        }
    }

    /// User-facing description of the exhausted quota.
    pub fn capacity_summary(&self) -> String {
        let limit = self.monthly_limit.unwrap_or(0);
        match (self.window_capacity(), self.oldest_allowed) {
            (Some((full, total)), Some(oldest)) => format!(
                "Monthly event quota of {limit} is exhausted for {full} of {total} month(s) \
                 in the importable window (since {oldest})"
            ),
            _ => format!("Monthly event quota of {limit} is exhausted"),
        }
    }
}
