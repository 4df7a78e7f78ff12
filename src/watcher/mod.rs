//! The chain-watching pipeline: shard discovery feeding a queue of pending
//! blocks, and a processor draining it. Each runs in its own periodic loop.

pub mod processor;
pub mod runner;
pub mod sync;

use crate::{
    chain::ResilientClient,
    config::Config,
    error::WatcherResult,
    event::EventPublisher,
    filter::AddressFilter,
    lock::DistributedLock,
    repo::WatchStore,
};
use std::{fmt::Debug, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use processor::{BlockProcessor, ProcessReport, ProcessorSettings};
pub use runner::{StepLock, run_periodic};
pub use sync::{ShardSync, SyncReport};

pub const SYNC_LOCK: &str = "shard-sync";
pub const PROCESS_LOCK: &str = "block-processor";

/// Outcome of one engine step, as seen by the runner.
pub trait StepReport: Debug + Send {
    /// Nothing happened worth an info line.
    fn is_quiet(&self) -> bool;

    fn has_backlog(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct Schedule {
    pub sync_interval: Duration,
    pub process_interval: Duration,
    pub lock_wait: Duration,
}

/// Both engines wired to the shared client, store and filter.
pub struct Watcher {
    sync: ShardSync,
    processor: BlockProcessor,
    store: Arc<dyn WatchStore>,
    filter: Arc<AddressFilter>,
    lock: Option<Arc<dyn DistributedLock>>,
    schedule: Schedule,
}

impl Watcher {
    pub fn new(
        client: Arc<ResilientClient>,
        store: Arc<dyn WatchStore>,
        filter: Arc<AddressFilter>,
        publisher: Arc<dyn EventPublisher>,
        lock: Option<Arc<dyn DistributedLock>>,
        settings: ProcessorSettings,
        schedule: Schedule,
    ) -> Self {
        Self {
            sync: ShardSync::new(client.clone(), store.clone()),
            processor: BlockProcessor::new(
                client,
                store.clone(),
                filter.clone(),
                publisher,
                settings,
            ),
            store,
            filter,
            lock,
            schedule,
        }
    }

    pub fn from_config(
        config: &Config,
        client: Arc<ResilientClient>,
        store: Arc<dyn WatchStore>,
        filter: Arc<AddressFilter>,
        publisher: Arc<dyn EventPublisher>,
        lock: Option<Arc<dyn DistributedLock>>,
    ) -> Self {
        let engine = &config.engine;
        Self::new(
            client,
            store,
            filter,
            publisher,
            lock,
            ProcessorSettings {
                batch_size: engine.batch_size,
                tx_fetch_limit: engine.tx_fetch_limit,
                tx_retry_limit: engine.tx_retry_limit,
                log_filter_hits: config.flags.log_filter_hits,
            },
            Schedule {
                sync_interval: engine.sync_interval,
                process_interval: engine.process_interval,
                lock_wait: config.lock.wait,
            },
        )
    }

    pub fn sync(&self) -> &ShardSync {
        &self.sync
    }

    pub fn processor(&self) -> &BlockProcessor {
        &self.processor
    }

    fn step_lock(&self, resource: &str) -> Option<StepLock> {
        self.lock.as_ref().map(|lock| StepLock {
            lock: lock.clone(),
            resource: resource.to_string(),
            wait: self.schedule.lock_wait,
        })
    }
}

/// Loads every active tracked address into `filter`. Returns how many were
/// added.
pub async fn warm_filter(
    store: &dyn WatchStore,
    filter: &AddressFilter,
) -> WatcherResult<usize> {
    let active = store.list_active_tracked_addresses().await?;
    filter.extend(active.iter().map(|t| &t.fingerprint));
    info!(
        addresses = active.len(),
        bits = filter.num_bits(),
        hashes = filter.num_hashes(),
        "address filter warmed"
    );
    Ok(active.len())
}

/// Warms the filter, then runs both engines until `cancel` fires. A filter
/// that cannot be loaded is fatal: processing against it would drop matches.
pub async fn listen_chain(
    watcher: Watcher,
    cancel: CancellationToken,
) -> WatcherResult<()> {
    warm_filter(watcher.store.as_ref(), &watcher.filter).await?;

    let sync_lock = watcher.step_lock(SYNC_LOCK);
    let process_lock = watcher.step_lock(PROCESS_LOCK);
    let sync = run_periodic(
        "shard-sync",
        watcher.schedule.sync_interval,
        cancel.clone(),
        sync_lock,
        || watcher.sync.step(),
    );
    let process = run_periodic(
        "block-processor",
        watcher.schedule.process_interval,
        cancel.clone(),
        process_lock,
        || watcher.processor.step(&cancel),
    );
    tokio::join!(sync, process);
    Ok(())
}
