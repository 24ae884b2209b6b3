use std::sync::Arc;

use tracing::info;

use tidemark_core::config::{AppMode, Config};
use tidemark_duckdb::DuckDbBackend;

use crate::import::{AdmissionController, ImportWorker, InsertWorker, MapperRegistry};
use crate::metadata::duckdb::DuckDbMetadataStore;
use crate::metadata::{EventWarehouse, ImportLedger, SubscriptionSource, UnlimitedSubscriptions};
use crate::queue::{InProcessQueue, JobQueue, WorkOptions, INSERT_QUEUE, PARSE_QUEUE};
use crate::storage::{ImportStorage, LocalDiskStorage};

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// Every collaborator is owned here and handed to the workers at
/// [`AppState::start_workers`]; nothing lives in module-level statics.
pub struct AppState {
    /// The DuckDB backend. Internally uses `Arc<tokio::sync::Mutex<Connection>>`
    /// so it is already cheap to clone and async-safe.
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    pub ledger: Arc<dyn ImportLedger>,
    pub warehouse: Arc<dyn EventWarehouse>,

    /// Unlimited in self-hosted mode; plan-driven in cloud mode.
    pub subscriptions: Arc<dyn SubscriptionSource>,

    pub storage: Arc<dyn ImportStorage>,
    pub queue: Arc<dyn JobQueue>,
    pub mappers: Arc<MapperRegistry>,
}

impl AppState {
    /// Construct a new `AppState` wrapping the given backend and config.
    pub fn new(db: DuckDbBackend, config: Config) -> Self {
        let db = Arc::new(db);
        let store = Arc::new(DuckDbMetadataStore::new(Arc::clone(&db)));
        let subscriptions: Arc<dyn SubscriptionSource> = match config.mode {
            AppMode::SelfHosted => Arc::new(UnlimitedSubscriptions),
            AppMode::Cloud => store.clone(),
        };
        let storage = Arc::new(LocalDiskStorage::new(&config.import.storage_dir));
        Self {
            db,
            config: Arc::new(config),
            ledger: store.clone(),
            warehouse: store,
            subscriptions,
            storage,
            queue: Arc::new(InProcessQueue::new()),
            mappers: Arc::new(MapperRegistry::default()),
        }
    }

    /// Replace the subscription source. Used by embedders that resolve plans
    /// elsewhere.
    pub fn with_subscriptions(mut self, subscriptions: Arc<dyn SubscriptionSource>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = queue;
        self
    }

    pub fn admission(&self) -> AdmissionController {
        AdmissionController::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.warehouse),
            self.config.import.max_concurrent_per_org,
        )
    }

    pub fn import_worker(&self) -> ImportWorker {
        ImportWorker::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.warehouse),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.storage),
            Arc::clone(&self.queue),
            Arc::clone(&self.mappers),
            self.config.import.clone(),
        )
    }

    /// Fail jobs left unfinished by a previous process, then attach the parse
    /// and insert workers to their queues.
    ///
    /// Parse jobs for different organizations may run side by side; chunk
    /// inserts run one at a time so a job's chunks land in emission order.
    pub async fn start_workers(&self) -> anyhow::Result<()> {
        let parse_concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .clamp(1, 4);
        let worker = self.import_worker();
        worker.recover_interrupted().await?;
        self.queue
            .work(
                PARSE_QUEUE,
                WorkOptions {
                    concurrency: parse_concurrency,
                },
                Arc::new(worker),
            )
            .await?;
        self.queue
            .work(
                INSERT_QUEUE,
                WorkOptions { concurrency: 1 },
                Arc::new(InsertWorker::new(Arc::clone(&self.warehouse))),
            )
            .await?;
        info!(parse_concurrency, "Import workers started");
        Ok(())
    }
}
