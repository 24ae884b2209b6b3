use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use tidemark_core::import::ChunkMessage;

use crate::metadata::EventWarehouse;
use crate::queue::JobHandler;

/// Writes chunk messages from the insert queue into the event store.
pub struct InsertWorker {
    warehouse: Arc<dyn EventWarehouse>,
}

impl InsertWorker {
    pub fn new(warehouse: Arc<dyn EventWarehouse>) -> Self {
        Self { warehouse }
    }

    #[tracing::instrument(skip(self, message), fields(import_id = %message.import_id, chunk = message.chunk_number))]
    pub async fn insert(&self, message: ChunkMessage) -> anyhow::Result<()> {
        if message.is_terminal() {
            info!(
                total_chunks = message.total_chunks.unwrap_or(0),
                "All import chunks delivered"
            );
            return Ok(());
        }
        self.warehouse
            .insert_events(&message.chunk)
            .await
            .context("failed to insert import chunk")?;
        debug!(events = message.chunk.len(), "Import chunk inserted");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for InsertWorker {
    async fn handle(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let message: ChunkMessage =
            serde_json::from_value(payload).context("invalid chunk message payload")?;
        self.insert(message).await
    }
}
