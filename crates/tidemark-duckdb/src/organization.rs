use anyhow::Result;

use crate::DuckDbBackend;

/// Billing-relevant columns of an `organizations` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationPlanRow {
    pub plan: String,
    pub monthly_event_limit: Option<u64>,
    pub quota_exempt: bool,
}

impl DuckDbBackend {
    /// Return the owning organization of `site_id`, or `None` when the site
    /// does not exist.
    pub async fn organization_for_site(&self, site_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT organization_id FROM sites WHERE id = ?1")?;
        let mut rows = stmt.query_map(duckdb::params![site_id], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(org) => Ok(Some(org?)),
            None => Ok(None),
        }
    }

    pub async fn get_organization_plan(
        &self,
        organization_id: &str,
    ) -> Result<Option<OrganizationPlanRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT plan, monthly_event_limit, quota_exempt FROM organizations WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(duckdb::params![organization_id], |row| {
            let limit: Option<i64> = row.get(1)?;
            Ok(OrganizationPlanRow {
                plan: row.get(0)?,
                monthly_event_limit: limit.map(|v| v.max(0) as u64),
                quota_exempt: row.get(2)?,
            })
        })?;
        match rows.next() {
            Some(plan) => Ok(Some(plan?)),
            None => Ok(None),
        }
    }
}
