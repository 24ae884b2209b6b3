use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::event::CanonicalEvent;

/// Platform tag of an uploaded export. Wire values are used in the upload
/// form, queue payloads, and the `import_jobs.source` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportSource {
    Umami,
    SimpleAnalytics,
}

impl ImportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportSource::Umami => "umami",
            ImportSource::SimpleAnalytics => "simple_analytics",
        }
    }
}

impl fmt::Display for ImportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "umami" => Ok(ImportSource::Umami),
            "simple_analytics" | "simpleanalytics" => Ok(ImportSource::SimpleAnalytics),
            other => Err(CoreError::UnknownSource(other.to_string())),
        }
    }
}

/// Import job lifecycle: `pending → processing → {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub const ACTIVE: [ImportStatus; 2] = [ImportStatus::Pending, ImportStatus::Processing];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Completed | ImportStatus::Failed)
    }

    /// Whether the ledger may move a job from `self` to `next`.
    pub fn can_transition_to(&self, next: ImportStatus) -> bool {
        match (self, next) {
            (ImportStatus::Pending, ImportStatus::Processing) => true,
            (ImportStatus::Pending | ImportStatus::Processing, ImportStatus::Completed) => true,
            (ImportStatus::Pending | ImportStatus::Processing, ImportStatus::Failed) => true,
            // Redelivered parse jobs restart a job that crashed mid-run.
            (ImportStatus::Processing, ImportStatus::Processing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImportStatus::Pending),
            "processing" => Ok(ImportStatus::Processing),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Per-job row counters polled by clients alongside the status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub accepted_events: u64,
    pub skipped_quota: u64,
    pub skipped_invalid_timestamp: u64,
    pub filtered_out_of_range: u64,
    pub invalid_rows: u64,
}

impl ImportProgress {
    pub fn rows_seen(&self) -> u64 {
        self.accepted_events
            + self.skipped_quota
            + self.skipped_invalid_timestamp
            + self.filtered_out_of_range
            + self.invalid_rows
    }
}

/// A persisted row of the `import_jobs` table.
#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub id: String,
    pub site_id: String,
    pub organization_id: String,
    pub source: ImportSource,
    pub status: ImportStatus,
    pub file_name: String,
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub progress: ImportProgress,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields the upload path supplies when creating a job.
#[derive(Debug, Clone)]
pub struct NewImportJob {
    pub id: String,
    pub site_id: String,
    pub organization_id: String,
    pub source: ImportSource,
    pub file_name: String,
}

/// Outcome of an admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobAdmission {
    pub success: bool,
    pub reason: Option<String>,
}

impl JobAdmission {
    pub fn admitted() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }
}

/// Payload of the parse queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseImportJob {
    pub import_id: String,
    pub site_id: String,
    pub organization_id: String,
    pub source: ImportSource,
    pub storage_location: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Payload of the insertion queue.
///
/// The terminal message of a job carries an empty `chunk`,
/// `all_chunks_sent = true`, and `total_chunks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMessage {
    pub site: String,
    pub import_id: String,
    pub source: ImportSource,
    pub chunk: Vec<CanonicalEvent>,
    pub chunk_number: u64,
    pub all_chunks_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_chunks: Option<u64>,
}

impl ChunkMessage {
    pub fn is_terminal(&self) -> bool {
        self.all_chunks_sent
    }
}

/// Result of deleting an import together with its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDeletion {
    NotFound,
    /// The job is still pending or processing.
    StillActive,
    Deleted { events_removed: u64 },
}
