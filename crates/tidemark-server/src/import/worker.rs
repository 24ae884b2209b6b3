//! Parse & normalize worker: drives one import job from `pending` to a
//! terminal status.

use std::sync::{Arc, OnceLock};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use tidemark_core::config::ImportLimits;
use tidemark_core::event::CanonicalEvent;
use tidemark_core::import::{ChunkMessage, ImportProgress, ImportSource, ImportStatus, ParseImportJob};

use super::mappers::{MapperRegistry, TransformContext};
use super::quota::QuotaTracker;
use super::rows::{spawn_row_reader, RowItem};
use crate::metadata::{EventWarehouse, ImportLedger, SubscriptionSource};
use crate::queue::{JobHandler, JobQueue, INSERT_QUEUE};
use crate::storage::{import_location, ImportStorage};

/// Upper bound of a failure message stored on the job.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Stored on jobs that a previous process left unfinished.
pub const INTERRUPTED_MESSAGE: &str = "Import interrupted by a server restart";

/// Conditions that end a job as `failed`. `Display` is the user-facing text
/// before sanitizing.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Import exceeded the maximum of {0} rows")]
    RowLimit(u64),

    #[error("Import timed out after {0} seconds")]
    Deadline(u64),

    #[error("{0}. No events were imported.")]
    QuotaExhausted(String),

    #[error("Failed to read import file: {0}")]
    Stream(String),

    #[error("No importer is registered for source {0}")]
    UnsupportedSource(ImportSource),

    #[error("Import failed: {0:#}")]
    Infrastructure(#[from] anyhow::Error),
}

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Multi-segment paths (absolute or relative), then single-segment
        // absolute paths that do not follow a word character.
        Regex::new(
            r"(?:[A-Za-z]:)?[\\/]?[\w.\-]+(?:[\\/][\w.\-]+)+[\\/]?|\B[\\/][\w.\-]+",
        )
        .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Strip filesystem paths and bound the length of a failure message.
pub fn sanitize_error_message(raw: &str) -> String {
    let cleaned = path_re().replace_all(raw, "[path]");
    cleaned.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

fn in_date_range(ts: &DateTime<Utc>, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    let day = ts.date_naive();
    start.map_or(true, |s| day >= s) && end.map_or(true, |e| day <= e)
}

/// Consumes [`ParseImportJob`] payloads from the parse queue.
#[derive(Clone)]
pub struct ImportWorker {
    ledger: Arc<dyn ImportLedger>,
    warehouse: Arc<dyn EventWarehouse>,
    subscriptions: Arc<dyn SubscriptionSource>,
    storage: Arc<dyn ImportStorage>,
    queue: Arc<dyn JobQueue>,
    mappers: Arc<MapperRegistry>,
    limits: ImportLimits,
}

impl ImportWorker {
    pub fn new(
        ledger: Arc<dyn ImportLedger>,
        warehouse: Arc<dyn EventWarehouse>,
        subscriptions: Arc<dyn SubscriptionSource>,
        storage: Arc<dyn ImportStorage>,
        queue: Arc<dyn JobQueue>,
        mappers: Arc<MapperRegistry>,
        limits: ImportLimits,
    ) -> Self {
        Self {
            ledger,
            warehouse,
            subscriptions,
            storage,
            queue,
            mappers,
            limits,
        }
    }

    /// Run one job to a terminal status.
    ///
    /// Job-level failures, panics included, end up on the ledger; only ledger
    /// errors themselves are returned.
    #[tracing::instrument(skip(self, job), fields(import_id = %job.import_id, site_id = %job.site_id))]
    pub async fn process(&self, job: ParseImportJob) -> anyhow::Result<()> {
        match self.ledger.get_import_job(&job.import_id).await? {
            None => {
                warn!("Import job no longer exists, dropping payload");
                self.cleanup(&job).await;
                return Ok(());
            }
            Some(existing) if existing.status.is_terminal() => {
                info!(status = %existing.status, "Import job already finished, skipping redelivery");
                return Ok(());
            }
            Some(_) => {}
        }
        if !self
            .ledger
            .update_status(&job.import_id, ImportStatus::Processing, None)
            .await?
        {
            info!("Import job could not enter processing, skipping");
            return Ok(());
        }
        info!(source = %job.source, "Import started");

        let worker = self.clone();
        let task_job = job.clone();
        let joined = tokio::spawn(async move {
            let mut progress = ImportProgress::default();
            let result = worker.run(&task_job, &mut progress).await;
            (progress, result)
        })
        .await;

        self.cleanup(&job).await;

        let (status, message) = match joined {
            Ok((progress, result)) => {
                self.ledger
                    .update_progress(&job.import_id, &progress)
                    .await?;
                match result {
                    Ok(()) => {
                        info!(
                            accepted = progress.accepted_events,
                            skipped_quota = progress.skipped_quota,
                            skipped_invalid_timestamp = progress.skipped_invalid_timestamp,
                            filtered_out_of_range = progress.filtered_out_of_range,
                            invalid_rows = progress.invalid_rows,
                            "Import completed"
                        );
                        (ImportStatus::Completed, None)
                    }
                    Err(e) => {
                        warn!(error = %e, accepted = progress.accepted_events, "Import failed");
                        (ImportStatus::Failed, Some(sanitize_error_message(&e.to_string())))
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Import task panicked");
                (
                    ImportStatus::Failed,
                    Some("Import failed unexpectedly".to_string()),
                )
            }
        };

        self.ledger
            .update_status(&job.import_id, status, message.as_deref())
            .await?;
        Ok(())
    }

    /// Fail every job a previous process left pending or processing and
    /// remove its stored file.
    ///
    /// Parse payloads only live in the in-process queue, so nothing will
    /// redeliver them. Must run before the parse worker attaches.
    pub async fn recover_interrupted(&self) -> anyhow::Result<usize> {
        let mut recovered = 0;
        for job in self.ledger.list_active_imports().await? {
            if self
                .ledger
                .update_status(&job.id, ImportStatus::Failed, Some(INTERRUPTED_MESSAGE))
                .await?
            {
                recovered += 1;
            }
            let outcome = self
                .storage
                .delete(&import_location(&job.site_id, &job.id))
                .await;
            if !outcome.success {
                warn!(
                    import_id = %job.id,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Failed to delete stored file of interrupted import"
                );
            }
        }
        if recovered > 0 {
            warn!(recovered, "Marked interrupted imports as failed");
        }
        Ok(recovered)
    }

    async fn run(
        &self,
        job: &ParseImportJob,
        progress: &mut ImportProgress,
    ) -> Result<(), ImportError> {
        let deadline = Instant::now() + self.limits.timeout();
        let mapper = self
            .mappers
            .get(job.source)
            .ok_or(ImportError::UnsupportedSource(job.source))?;

        let mut quota = QuotaTracker::load(
            self.subscriptions.as_ref(),
            self.warehouse.as_ref(),
            &job.organization_id,
        )
        .await?;

        let reader = self
            .storage
            .read_stream(&job.storage_location)
            .await
            .map_err(|e| ImportError::Stream(format!("{e:#}")))?;
        let mut rows = spawn_row_reader(reader, mapper.fields());

        let ctx = TransformContext {
            site_id: job.site_id.clone(),
            import_id: job.import_id.clone(),
        };
        let chunk_size = self.limits.chunk_size.max(1);
        let mut chunk: Vec<CanonicalEvent> = Vec::with_capacity(chunk_size);
        let mut chunks_sent: u64 = 0;
        let mut rows_read: u64 = 0;

        loop {
            let next = timeout_at(deadline, rows.recv())
                .await
                .map_err(|_| ImportError::Deadline(self.limits.timeout_secs))?;
            let Some(item) = next else { break };
            let item = item.map_err(|e| ImportError::Stream(e.to_string()))?;

            rows_read += 1;
            if rows_read > self.limits.max_rows {
                return Err(ImportError::RowLimit(self.limits.max_rows));
            }
            if Instant::now() >= deadline {
                return Err(ImportError::Deadline(self.limits.timeout_secs));
            }

            let row = match item {
                RowItem::Row(row) => row,
                RowItem::Malformed => {
                    progress.invalid_rows += 1;
                    continue;
                }
            };
            let Some(ts) = mapper.timestamp(&row) else {
                progress.skipped_invalid_timestamp += 1;
                continue;
            };
            if !in_date_range(&ts, job.start_date, job.end_date) {
                progress.filtered_out_of_range += 1;
                continue;
            }
            // Quota is spent before mapping: a row dropped by the mapper
            // below keeps the unit it was admitted with.
            if !quota.admit(ts) {
                progress.skipped_quota += 1;
                continue;
            }
            let Some(event) = mapper.transform(&row, &ctx) else {
                progress.invalid_rows += 1;
                continue;
            };

            chunk.push(event);
            progress.accepted_events += 1;
            if chunk.len() >= chunk_size {
                chunks_sent += 1;
                self.send_chunk(job, std::mem::take(&mut chunk), chunks_sent)
                    .await?;
                self.ledger
                    .update_progress(&job.import_id, progress)
                    .await?;
            }
        }
        drop(rows);

        if progress.accepted_events == 0 && progress.skipped_quota > 0 {
            return Err(ImportError::QuotaExhausted(quota.capacity_summary()));
        }

        if !chunk.is_empty() {
            chunks_sent += 1;
            self.send_chunk(job, chunk, chunks_sent).await?;
        }
        self.send_message(&ChunkMessage {
            site: job.site_id.clone(),
            import_id: job.import_id.clone(),
            source: job.source,
            chunk: Vec::new(),
            chunk_number: chunks_sent + 1,
            all_chunks_sent: true,
            total_chunks: Some(chunks_sent),
        })
        .await
    }

    async fn send_chunk(
        &self,
        job: &ParseImportJob,
        chunk: Vec<CanonicalEvent>,
        chunk_number: u64,
    ) -> Result<(), ImportError> {
        self.send_message(&ChunkMessage {
            site: job.site_id.clone(),
            import_id: job.import_id.clone(),
            source: job.source,
            chunk,
            chunk_number,
            all_chunks_sent: false,
            total_chunks: None,
        })
        .await
    }

    async fn send_message(&self, message: &ChunkMessage) -> Result<(), ImportError> {
        let payload = serde_json::to_value(message).context("failed to encode chunk message")?;
        self.queue
            .send(INSERT_QUEUE, payload)
            .await
            .context("failed to enqueue chunk")?;
        Ok(())
    }

    async fn cleanup(&self, job: &ParseImportJob) {
        let outcome = self.storage.delete(&job.storage_location).await;
        if !outcome.success {
            warn!(
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Failed to delete stored import file"
            );
        }
    }
}

#[async_trait]
impl JobHandler for ImportWorker {
    async fn handle(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let job: ParseImportJob =
            serde_json::from_value(payload).context("invalid parse job payload")?;
        self.process(job).await
    }
}
