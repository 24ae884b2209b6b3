use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tidemark_core::billing::{MonthKey, Plan, Subscription};
use tidemark_core::event::CanonicalEvent;
use tidemark_core::import::{
    ImportDeletion, ImportJob, ImportProgress, ImportStatus, JobAdmission, NewImportJob,
};
use tidemark_duckdb::DuckDbBackend;

use super::{EventWarehouse, ImportLedger, SubscriptionSource};

/// DuckDB-backed implementation of the ledger, warehouse, and subscription
/// seams.
pub struct DuckDbMetadataStore {
    db: Arc<DuckDbBackend>,
}

impl DuckDbMetadataStore {
    pub fn new(db: Arc<DuckDbBackend>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ImportLedger for DuckDbMetadataStore {
    async fn organization_for_site(&self, site_id: &str) -> anyhow::Result<Option<String>> {
        self.db.organization_for_site(site_id).await
    }

    async fn count_active_imports(&self, organization_id: &str) -> anyhow::Result<u64> {
        self.db.count_active_imports(organization_id).await
    }

    async fn create_import_job_atomic(
        &self,
        job: &NewImportJob,
        max_active: u32,
    ) -> anyhow::Result<JobAdmission> {
        self.db.create_import_job_atomic(job, max_active).await
    }

    async fn get_import_job(&self, import_id: &str) -> anyhow::Result<Option<ImportJob>> {
        self.db.get_import_job(import_id).await
    }

    async fn list_import_jobs(&self, site_id: &str) -> anyhow::Result<Vec<ImportJob>> {
        self.db.list_import_jobs(site_id).await
    }

    async fn list_active_imports(&self) -> anyhow::Result<Vec<ImportJob>> {
        self.db.list_active_import_jobs().await
    }

    async fn update_status(
        &self,
        import_id: &str,
        status: ImportStatus,
        message: Option<&str>,
    ) -> anyhow::Result<bool> {
        self.db.update_import_status(import_id, status, message).await
    }

    async fn update_progress(
        &self,
        import_id: &str,
        progress: &ImportProgress,
    ) -> anyhow::Result<()> {
        self.db.update_import_progress(import_id, progress).await
    }

    async fn delete_import(&self, import_id: &str) -> anyhow::Result<ImportDeletion> {
        self.db.delete_import(import_id).await
    }
}

#[async_trait]
impl EventWarehouse for DuckDbMetadataStore {
    async fn monthly_usage(
        &self,
        organization_id: &str,
        since: Option<MonthKey>,
    ) -> anyhow::Result<HashMap<MonthKey, u64>> {
        self.db.monthly_event_usage(organization_id, since).await
    }

    async fn insert_events(&self, events: &[CanonicalEvent]) -> anyhow::Result<()> {
        self.db.insert_canonical_events(events).await
    }
}

#[async_trait]
impl SubscriptionSource for DuckDbMetadataStore {
    async fn subscription_for(
        &self,
        organization_id: &str,
    ) -> anyhow::Result<Option<Subscription>> {
        let Some(row) = self.db.get_organization_plan(organization_id).await? else {
            return Ok(None);
        };
        let plan = row.plan.parse::<Plan>().unwrap_or_else(|_| {
            tracing::warn!(organization_id, plan = %row.plan, "Unknown plan, using free tier");
            Plan::Free
        });
        Ok(Some(Subscription::resolve(
            plan,
            row.monthly_event_limit,
            row.quota_exempt,
        )))
    }
}
