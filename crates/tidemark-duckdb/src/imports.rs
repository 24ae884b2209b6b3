use anyhow::{anyhow, Result};

use tidemark_core::import::{
    ImportDeletion, ImportJob, ImportProgress, ImportStatus, JobAdmission, NewImportJob,
};

use crate::DuckDbBackend;

const SELECT_IMPORT_JOB: &str = r#"
    SELECT id, site_id, organization_id, source, status, file_name, error_message,
           accepted_events, skipped_quota, skipped_invalid_timestamp,
           filtered_out_of_range, invalid_rows,
           CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)
    FROM import_jobs
"#;

/// Raw column values; `source` and `status` are parsed after the row is read
/// so a bad value surfaces as an error instead of a driver conversion panic.
struct ImportJobRow {
    id: String,
    site_id: String,
    organization_id: String,
    source: String,
    status: String,
    file_name: String,
    error_message: Option<String>,
    counters: [i64; 5],
    created_at: String,
    updated_at: String,
}

fn map_import_job_row(row: &duckdb::Row<'_>) -> Result<ImportJobRow, duckdb::Error> {
    Ok(ImportJobRow {
        id: row.get(0)?,
        site_id: row.get(1)?,
        organization_id: row.get(2)?,
        source: row.get(3)?,
        status: row.get(4)?,
        file_name: row.get(5)?,
        error_message: row.get(6)?,
        counters: [
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
            row.get(10)?,
            row.get(11)?,
        ],
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl TryFrom<ImportJobRow> for ImportJob {
    type Error = anyhow::Error;

    fn try_from(row: ImportJobRow) -> Result<Self> {
        let [accepted, quota, timestamp, range, invalid] = row.counters.map(|v| v.max(0) as u64);
        Ok(ImportJob {
            source: row.source.parse()?,
            status: row.status.parse()?,
            id: row.id,
            site_id: row.site_id,
            organization_id: row.organization_id,
            file_name: row.file_name,
            error_message: row.error_message,
            progress: ImportProgress {
                accepted_events: accepted,
                skipped_quota: quota,
                skipped_invalid_timestamp: timestamp,
                filtered_out_of_range: range,
                invalid_rows: invalid,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn count_active(conn: &duckdb::Connection, organization_id: &str) -> Result<u64> {
    let count: i64 = conn
        .prepare(
            "SELECT COUNT(*) FROM import_jobs \
             WHERE organization_id = ?1 AND status IN (?2, ?3)",
        )?
        .query_row(
            duckdb::params![
                organization_id,
                ImportStatus::ACTIVE[0].as_str(),
                ImportStatus::ACTIVE[1].as_str()
            ],
            |row| row.get(0),
        )?;
    Ok(count.max(0) as u64)
}

impl DuckDbBackend {
    /// Number of pending or processing import jobs across every site of the
    /// organization.
    pub async fn count_active_imports(&self, organization_id: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        count_active(&conn, organization_id)
    }

    /// Re-check the per-organization concurrency limit and insert the job in
    /// one transaction.
    ///
    /// The connection mutex already serialises callers; the transaction makes
    /// the count and the insert a single unit against other connections to the
    /// same file.
    pub async fn create_import_job_atomic(
        &self,
        job: &NewImportJob,
        max_active: u32,
    ) -> Result<JobAdmission> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let active = count_active(&tx, &job.organization_id)?;
        if active >= u64::from(max_active) {
            tx.rollback()?;
            return Ok(JobAdmission::rejected(format!(
                "Organization already has {active} import(s) in progress (limit {max_active})"
            )));
        }

        tx.execute(
            r#"INSERT INTO import_jobs (
                id, site_id, organization_id, source, status, file_name,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)"#,
            duckdb::params![
                job.id,
                job.site_id,
                job.organization_id,
                job.source.as_str(),
                ImportStatus::Pending.as_str(),
                job.file_name
            ],
        )?;
        tx.commit()?;
        tracing::info!(
            import_id = %job.id,
            organization_id = %job.organization_id,
            "Import job created"
        );
        Ok(JobAdmission::admitted())
    }

    pub async fn get_import_job(&self, import_id: &str) -> Result<Option<ImportJob>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("{SELECT_IMPORT_JOB} WHERE id = ?1"))?;
        let mut rows = stmt.query_map(duckdb::params![import_id], map_import_job_row)?;
        match rows.next() {
            Some(row) => Ok(Some(ImportJob::try_from(row?)?)),
            None => Ok(None),
        }
    }

    /// All import jobs of a site, newest first.
    pub async fn list_import_jobs(&self, site_id: &str) -> Result<Vec<ImportJob>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_IMPORT_JOB} WHERE site_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(duckdb::params![site_id], map_import_job_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(ImportJob::try_from(row?)?);
        }
        Ok(out)
    }

    /// Every pending or processing job, oldest first.
    pub async fn list_active_import_jobs(&self) -> Result<Vec<ImportJob>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_IMPORT_JOB} WHERE status IN (?1, ?2) ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(
            duckdb::params![
                ImportStatus::ACTIVE[0].as_str(),
                ImportStatus::ACTIVE[1].as_str()
            ],
            map_import_job_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(ImportJob::try_from(row?)?);
        }
        Ok(out)
    }

    /// Move a job to `status`.
    ///
    /// Returns `false` without writing when the job is missing or the
    /// transition is not allowed (terminal jobs never change again).
    pub async fn update_import_status(
        &self,
        import_id: &str,
        status: ImportStatus,
        message: Option<&str>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let current: Option<String> = {
            let mut stmt = tx.prepare("SELECT status FROM import_jobs WHERE id = ?1")?;
            let mut rows = stmt.query_map(duckdb::params![import_id], |row| row.get(0))?;
            match rows.next() {
                Some(status) => Some(status?),
                None => None,
            }
        };
        let Some(current) = current else {
            tx.rollback()?;
            return Ok(false);
        };
        let current: ImportStatus = current
            .parse()
            .map_err(|e| anyhow!("import {import_id} has corrupt status: {e}"))?;
        if !current.can_transition_to(status) {
            tx.rollback()?;
            return Ok(false);
        }

        tx.execute(
            "UPDATE import_jobs SET status = ?1, error_message = ?2, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?3",
            duckdb::params![status.as_str(), message, import_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub async fn update_import_progress(
        &self,
        import_id: &str,
        progress: &ImportProgress,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"UPDATE import_jobs SET
                accepted_events = ?1,
                skipped_quota = ?2,
                skipped_invalid_timestamp = ?3,
                filtered_out_of_range = ?4,
                invalid_rows = ?5,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?6"#,
            duckdb::params![
                progress.accepted_events as i64,
                progress.skipped_quota as i64,
                progress.skipped_invalid_timestamp as i64,
                progress.filtered_out_of_range as i64,
                progress.invalid_rows as i64,
                import_id
            ],
        )?;
        Ok(())
    }

    /// Delete a finished import together with every event it produced.
    pub async fn delete_import(&self, import_id: &str) -> Result<ImportDeletion> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let status: Option<String> = {
            let mut stmt = tx.prepare("SELECT status FROM import_jobs WHERE id = ?1")?;
            let mut rows = stmt.query_map(duckdb::params![import_id], |row| row.get(0))?;
            match rows.next() {
                Some(status) => Some(status?),
                None => None,
            }
        };
        let Some(status) = status else {
            tx.rollback()?;
            return Ok(ImportDeletion::NotFound);
        };
        let status: ImportStatus = status.parse()?;
        if !status.is_terminal() {
            tx.rollback()?;
            return Ok(ImportDeletion::StillActive);
        }

        let events_removed = tx.execute(
            "DELETE FROM events WHERE import_id = ?1",
            duckdb::params![import_id],
        )?;
        tx.execute(
            "DELETE FROM import_jobs WHERE id = ?1",
            duckdb::params![import_id],
        )?;
        tx.commit()?;
        Ok(ImportDeletion::Deleted {
            events_removed: events_removed as u64,
        })
    }
}
