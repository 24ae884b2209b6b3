use std::sync::Arc;

use anyhow::Result;
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::schema::init_sql;

/// A DuckDB backend for Tidemark.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// cause contention. The connection lives behind `Arc<Mutex<_>>` so the async
/// runtime serialises every statement while the struct stays cheap to share
/// across handlers and workers.
///
/// Memory and thread limits are enforced by [`init_sql`] at open time.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an **in-memory** DuckDB database.
    ///
    /// Intended for tests only; data is discarded when the struct is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to verify stored data.
    /// Production code should use the typed methods.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Insert or update an organization row.
    ///
    /// Used by startup seeding and test fixtures. Safe to call repeatedly.
    pub async fn seed_organization(
        &self,
        id: &str,
        plan: &str,
        monthly_event_limit: Option<u64>,
        quota_exempt: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let limit = monthly_event_limit.map(|v| v as i64);
        conn.execute(
            r#"INSERT INTO organizations (id, name, plan, monthly_event_limit, quota_exempt, created_at)
               VALUES (?1, ?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
               ON CONFLICT (id) DO UPDATE SET
                   plan = EXCLUDED.plan,
                   monthly_event_limit = EXCLUDED.monthly_event_limit,
                   quota_exempt = EXCLUDED.quota_exempt"#,
            duckdb::params![id, plan, limit, quota_exempt],
        )?;
        Ok(())
    }

    /// Insert or update a site row owned by `organization_id`.
    pub async fn seed_site(
        &self,
        id: &str,
        organization_id: &str,
        domain: &str,
        legacy_billing: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO sites (id, organization_id, name, domain, legacy_billing, created_at)
               VALUES (?1, ?2, ?3, ?3, ?4, CURRENT_TIMESTAMP)
               ON CONFLICT (id) DO UPDATE SET
                   organization_id = EXCLUDED.organization_id,
                   domain = EXCLUDED.domain,
                   legacy_billing = EXCLUDED.legacy_billing"#,
            duckdb::params![id, organization_id, domain, legacy_billing],
        )?;
        Ok(())
    }
}
