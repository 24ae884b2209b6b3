use std::collections::HashMap;

use async_trait::async_trait;

use tidemark_core::billing::{MonthKey, Plan, Subscription};
use tidemark_core::event::CanonicalEvent;
use tidemark_core::import::{
    ImportDeletion, ImportJob, ImportProgress, ImportStatus, JobAdmission, NewImportJob,
};

/// Persisted import job state machine plus the site/organization lookups that
/// admission control needs.
///
/// Self-hosted and cloud deployments both use the DuckDB implementation today;
/// the trait keeps route handlers and the worker independent of it.
#[async_trait]
pub trait ImportLedger: Send + Sync + 'static {
    /// Owning organization of a site; `None` when the site is unknown.
    async fn organization_for_site(&self, site_id: &str) -> anyhow::Result<Option<String>>;

    /// Pending or processing jobs across every site of the organization.
    async fn count_active_imports(&self, organization_id: &str) -> anyhow::Result<u64>;

    /// Re-validate the concurrency limit and insert the job atomically.
    async fn create_import_job_atomic(
        &self,
        job: &NewImportJob,
        max_active: u32,
    ) -> anyhow::Result<JobAdmission>;

    async fn get_import_job(&self, import_id: &str) -> anyhow::Result<Option<ImportJob>>;

    async fn list_import_jobs(&self, site_id: &str) -> anyhow::Result<Vec<ImportJob>>;

    /// Pending or processing jobs of every organization.
    async fn list_active_imports(&self) -> anyhow::Result<Vec<ImportJob>>;

    /// Returns `false` when the job is missing or already terminal.
    async fn update_status(
        &self,
        import_id: &str,
        status: ImportStatus,
        message: Option<&str>,
    ) -> anyhow::Result<bool>;

    async fn update_progress(
        &self,
        import_id: &str,
        progress: &ImportProgress,
    ) -> anyhow::Result<()>;

    async fn delete_import(&self, import_id: &str) -> anyhow::Result<ImportDeletion>;
}

/// Read/write access to the canonical event store.
#[async_trait]
pub trait EventWarehouse: Send + Sync + 'static {
    /// Billable events per month for an organization, months ≥ `since`.
    async fn monthly_usage(
        &self,
        organization_id: &str,
        since: Option<MonthKey>,
    ) -> anyhow::Result<HashMap<MonthKey, u64>>;

    async fn insert_events(&self, events: &[CanonicalEvent]) -> anyhow::Result<()>;
}

/// Resolves an organization's effective subscription.
#[async_trait]
pub trait SubscriptionSource: Send + Sync + 'static {
    /// `None` when the organization does not exist.
    async fn subscription_for(&self, organization_id: &str)
        -> anyhow::Result<Option<Subscription>>;
}

/// Treats every organization as unmetered. Used in self-hosted mode.
pub struct UnlimitedSubscriptions;

#[async_trait]
impl SubscriptionSource for UnlimitedSubscriptions {
    async fn subscription_for(
        &self,
        _organization_id: &str,
    ) -> anyhow::Result<Option<Subscription>> {
        Ok(Some(Subscription::unlimited(Plan::Enterprise)))
    }
}
