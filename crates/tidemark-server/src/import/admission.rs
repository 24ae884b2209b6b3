//! Pre-flight checks run by the upload path before any file is stored.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use tidemark_core::import::{JobAdmission, NewImportJob};

use super::quota::QuotaTracker;
use crate::metadata::{EventWarehouse, ImportLedger, SubscriptionSource};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("site {0} not found")]
    SiteNotFound(String),

    #[error("organization {0} not found")]
    OrganizationNotFound(String),

    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
}

/// Outcome of the advisory concurrency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub organization_id: String,
}

pub struct AdmissionController {
    ledger: Arc<dyn ImportLedger>,
    subscriptions: Arc<dyn SubscriptionSource>,
    warehouse: Arc<dyn EventWarehouse>,
    max_active: u32,
}

impl AdmissionController {
    pub fn new(
        ledger: Arc<dyn ImportLedger>,
        subscriptions: Arc<dyn SubscriptionSource>,
        warehouse: Arc<dyn EventWarehouse>,
        max_active: u32,
    ) -> Self {
        Self {
            ledger,
            subscriptions,
            warehouse,
            max_active,
        }
    }

    /// Whether the site's organization is below its concurrent-import limit.
    ///
    /// Advisory only: a concurrent upload may pass the same check.
    /// [`Self::create_job_atomic`] is authoritative.
    pub async fn check_concurrent_limit(
        &self,
        site_id: &str,
    ) -> Result<ConcurrencyCheck, AdmissionError> {
        let organization_id = self
            .ledger
            .organization_for_site(site_id)
            .await?
            .ok_or_else(|| AdmissionError::SiteNotFound(site_id.to_string()))?;

        let active = self.ledger.count_active_imports(&organization_id).await?;
        let allowed = active < u64::from(self.max_active);
        let reason = (!allowed).then(|| {
            format!(
                "Organization already has {active} import(s) in progress (limit {})",
                self.max_active
            )
        });
        debug!(site_id, %organization_id, active, allowed, "Concurrent import check");
        Ok(ConcurrencyCheck {
            allowed,
            reason,
            organization_id,
        })
    }

    /// Re-check the limit and insert the job in one transaction.
    pub async fn create_job_atomic(&self, job: &NewImportJob) -> anyhow::Result<JobAdmission> {
        let admission = self
            .ledger
            .create_import_job_atomic(job, self.max_active)
            .await?;
        if !admission.success {
            debug!(import_id = %job.id, reason = ?admission.reason, "Import job rejected at insert");
        }
        Ok(admission)
    }

    /// `Some(message)` when every month the organization may import into is
    /// already at its limit.
    pub async fn check_quota_headroom(
        &self,
        organization_id: &str,
    ) -> Result<Option<String>, AdmissionError> {
        if self
            .subscriptions
            .subscription_for(organization_id)
            .await?
            .is_none()
        {
            return Err(AdmissionError::OrganizationNotFound(
                organization_id.to_string(),
            ));
        }
        let tracker = QuotaTracker::load(
            self.subscriptions.as_ref(),
            self.warehouse.as_ref(),
            organization_id,
        )
        .await?;
        Ok((!tracker.has_headroom()).then(|| tracker.capacity_summary()))
    }
}
