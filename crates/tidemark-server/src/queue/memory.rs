use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{error, warn};

use super::{JobHandler, JobQueue, WorkOptions};

struct QueueChannel {
    tx: mpsc::UnboundedSender<serde_json::Value>,
    /// Taken by the first `work` call.
    rx: Option<mpsc::UnboundedReceiver<serde_json::Value>>,
}

impl QueueChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// Single-process queue on tokio channels.
///
/// Payloads sent before a worker attaches are buffered. Each payload runs in
/// its own task, so a failing or panicking handler never stops the consumer.
#[derive(Default)]
pub struct InProcessQueue {
    queues: Mutex<HashMap<String, QueueChannel>>,
}

impl InProcessQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InProcessQueue {
    async fn send(&self, queue: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        let mut queues = self.queues.lock().await;
        let channel = queues
            .entry(queue.to_string())
            .or_insert_with(QueueChannel::new);
        channel
            .tx
            .send(payload)
            .map_err(|_| anyhow!("queue {queue} is closed"))
    }

    async fn work(
        &self,
        queue: &str,
        options: WorkOptions,
        handler: Arc<dyn JobHandler>,
    ) -> anyhow::Result<()> {
        let mut rx = {
            let mut queues = self.queues.lock().await;
            let channel = queues
                .entry(queue.to_string())
                .or_insert_with(QueueChannel::new);
            channel
                .rx
                .take()
                .ok_or_else(|| anyhow!("queue {queue} already has a worker"))?
        };

        let queue_name = queue.to_string();
        let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    warn!(queue = %queue_name, "Worker semaphore closed, stopping consumer");
                    break;
                };
                let handler = Arc::clone(&handler);
                let queue_name = queue_name.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let outcome = tokio::spawn(async move { handler.handle(payload).await }).await;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(queue = %queue_name, error = %e, "Job handler failed"),
                        Err(e) => error!(queue = %queue_name, error = %e, "Job handler panicked"),
                    }
                });
            }
        });
        Ok(())
    }
}
