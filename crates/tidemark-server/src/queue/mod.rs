use std::sync::Arc;

use async_trait::async_trait;

pub mod memory;

pub use memory::InProcessQueue;

/// Queue carrying [`tidemark_core::import::ParseImportJob`] payloads.
pub const PARSE_QUEUE: &str = "import-parse";
/// Queue carrying [`tidemark_core::import::ChunkMessage`] payloads.
pub const INSERT_QUEUE: &str = "import-insert";

#[derive(Debug, Clone, Copy)]
pub struct WorkOptions {
    /// Payloads handled at the same time. Each payload is handled start to
    /// finish by one invocation.
    pub concurrency: usize,
}

impl Default for WorkOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Consumer side of a queue.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// Job-queue transport. Delivery is at-least-once: handlers must tolerate
/// seeing the same payload twice.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn send(&self, queue: &str, payload: serde_json::Value) -> anyhow::Result<()>;

    /// Attach `handler` to `queue`. Returns once the consumer is running.
    async fn work(
        &self,
        queue: &str,
        options: WorkOptions,
        handler: Arc<dyn JobHandler>,
    ) -> anyhow::Result<()>;
}
