use std::io::Read;

use async_trait::async_trait;
use axum::body::Bytes;

pub mod local;

pub use local::LocalDiskStorage;

/// Result of [`ImportStorage::delete`]. Deletion failures are reported, never
/// raised, so cleanup paths can log and move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl DeleteOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Backend-agnostic home of uploaded import files.
///
/// `location` is a relative key such as `site_x/imp_y.csv`; backends map it
/// onto their own namespace and must reject keys that escape it.
#[async_trait]
pub trait ImportStorage: Send + Sync + 'static {
    async fn store(&self, location: &str, data: Bytes) -> anyhow::Result<()>;

    /// Open the stored file for sequential reading. The reader is consumed on
    /// a blocking thread by the CSV parser.
    async fn read_stream(&self, location: &str) -> anyhow::Result<Box<dyn Read + Send>>;

    async fn delete(&self, location: &str) -> DeleteOutcome;
}

/// Storage key of an uploaded file.
pub fn import_location(site_id: &str, import_id: &str) -> String {
    format!("{site_id}/{import_id}.csv")
}
