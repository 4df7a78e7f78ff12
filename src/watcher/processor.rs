use super::StepReport;
use crate::{
    chain::{BlockRef, BlockTransaction, ResilientClient},
    error::{RpcError, WatcherError, WatcherResult},
    event::{EventPublisher, MatchEvent},
    filter::AddressFilter,
    repo::{ShardBlock, WatchStore},
    utils::AccountAddress,
};
use chrono::Utc;
use std::{collections::HashSet, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub batch_size: usize,
    pub tx_fetch_limit: u32,
    pub tx_retry_limit: u32,
    pub log_filter_hits: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            tx_fetch_limit: 10_000,
            tx_retry_limit: 100_000,
            log_filter_hits: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub fetched: usize,
    /// Transactions read from processed blocks.
    pub scanned: usize,
    pub processed: usize,
    pub deferred: usize,
    pub events: usize,
    /// The batch was full and made progress, so more work is likely queued.
    pub backlog: bool,
}

impl StepReport for ProcessReport {
    fn is_quiet(&self) -> bool {
        self.fetched == 0
    }

    fn has_backlog(&self) -> bool {
        self.backlog
    }
}

enum BlockOutcome {
    Processed { txs: usize, events: usize },
    Deferred,
}

/// Drains pending shard blocks, matches their transactions against the
/// tracked set and publishes confirmed hits.
///
/// A block is marked processed only after every transaction was scanned and
/// its events were handed to the publisher. If marking fails the block is
/// scanned again later and its events are published again; consumers
/// de-duplicate by `tx_hash`.
pub struct BlockProcessor {
    client: Arc<ResilientClient>,
    store: Arc<dyn WatchStore>,
    filter: Arc<AddressFilter>,
    publisher: Arc<dyn EventPublisher>,
    settings: ProcessorSettings,
}

impl BlockProcessor {
    pub fn new(
        client: Arc<ResilientClient>,
        store: Arc<dyn WatchStore>,
        filter: Arc<AddressFilter>,
        publisher: Arc<dyn EventPublisher>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            client,
            store,
            filter,
            publisher,
            settings,
        }
    }

    /// Processes one batch. Stops between blocks once `cancel` fires. When a
    /// block is deferred, later blocks of the same shard wait for the next
    /// step so a shard's events are never published out of order.
    pub async fn step(
        &self,
        cancel: &CancellationToken,
    ) -> WatcherResult<ProcessReport> {
        let blocks =
            self.store.list_unprocessed(self.settings.batch_size).await?;
        let mut report = ProcessReport {
            fetched: blocks.len(),
            ..Default::default()
        };
        let mut stalled: HashSet<(i32, i64)> = HashSet::new();

        for block in &blocks {
            if cancel.is_cancelled() {
                debug!("processor cancelled between blocks");
                break;
            }
            if stalled.contains(&(block.workchain, block.shard)) {
                report.deferred += 1;
                continue;
            }
            match self.process_block(block).await {
                Ok(BlockOutcome::Processed { txs, events }) => {
                    report.processed += 1;
                    report.scanned += txs;
                    report.events += events;
                    if events > 0 {
                        info!(
                            shard = block.shard,
                            seqno = block.seqno,
                            events,
                            "block matched tracked addresses"
                        );
                    }
                }
                Ok(BlockOutcome::Deferred) => {
                    report.deferred += 1;
                    stalled.insert((block.workchain, block.shard));
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        workchain = block.workchain,
                        shard = block.shard,
                        seqno = block.seqno,
                        error = %e,
                        "block processing failed, will retry"
                    );
                    report.deferred += 1;
                    stalled.insert((block.workchain, block.shard));
                }
                Err(e) => {
                    error!(
                        workchain = block.workchain,
                        shard = block.shard,
                        seqno = block.seqno,
                        error = %e,
                        "block processing failed, will retry"
                    );
                    report.deferred += 1;
                    stalled.insert((block.workchain, block.shard));
                }
            }
        }
        report.backlog =
            report.fetched == self.settings.batch_size && report.processed > 0;
        Ok(report)
    }

    async fn process_block(
        &self,
        block: &ShardBlock,
    ) -> WatcherResult<BlockOutcome> {
        let block_ref = match self
            .client
            .lookup_block(block.workchain, block.shard, block.seqno)
            .await
        {
            Ok(r) => r,
            Err(RpcError::NotFound) => {
                debug!(
                    shard = block.shard,
                    seqno = block.seqno,
                    "block not available yet"
                );
                return Ok(BlockOutcome::Deferred);
            }
            Err(e) => return Err(WatcherError::rpc("lookupBlock")(e)),
        };

        let Some(txs) = self.fetch_transactions(&block_ref).await? else {
            return Ok(BlockOutcome::Deferred);
        };

        let events = if txs.is_empty() {
            Vec::new()
        } else {
            self.scan(&block_ref, &txs).await?
        };
        for event in &events {
            if let Err(e) = self.publisher.publish(event).await {
                warn!(
                    address = %event.address,
                    tx_hash = %event.tx_hash,
                    error = %e,
                    "failed to publish match event"
                );
            }
        }

        if !self.store.mark_processed(block.id).await? {
            debug!(id = block.id, "block was already marked processed");
        }
        Ok(BlockOutcome::Processed {
            txs: txs.len(),
            events: events.len(),
        })
    }

    /// `None` when the list stays truncated even at the retry limit.
    async fn fetch_transactions(
        &self,
        block: &BlockRef,
    ) -> WatcherResult<Option<Vec<BlockTransaction>>> {
        let op = "listBlockTransactions";
        match self
            .client
            .get_block_transactions(block, self.settings.tx_fetch_limit)
            .await
        {
            Ok(txs) => return Ok(Some(txs)),
            Err(RpcError::Incomplete { .. }) => {}
            Err(e) => return Err(WatcherError::rpc(op)(e)),
        }
        match self
            .client
            .get_block_transactions(block, self.settings.tx_retry_limit)
            .await
        {
            Ok(txs) => Ok(Some(txs)),
            Err(RpcError::Incomplete { returned }) => {
                warn!(
                    shard = block.shard,
                    seqno = block.seqno,
                    returned,
                    limit = self.settings.tx_retry_limit,
                    "transaction list still incomplete, deferring block"
                );
                Ok(None)
            }
            Err(e) => Err(WatcherError::rpc(op)(e)),
        }
    }

    async fn scan(
        &self,
        block: &BlockRef,
        txs: &[BlockTransaction],
    ) -> WatcherResult<Vec<MatchEvent>> {
        let mut events = Vec::new();
        for tx in txs {
            if !self.filter.might_contain(&tx.account) {
                continue;
            }
            let tracked = self
                .store
                .find_tracked_address(block.workchain, &tx.account)
                .await?;
            if self.settings.log_filter_hits {
                info!(
                    account = %tx.account,
                    confirmed = tracked.as_ref().is_some_and(|t| t.active),
                    "filter hit"
                );
            }
            // unknown or disabled: a false positive or stale filter bit
            if !tracked.is_some_and(|t| t.active) {
                continue;
            }
            events.push(MatchEvent {
                address: AccountAddress::new(block.workchain, tx.account),
                tx_hash: hex::encode(tx.hash),
                lt: tx.lt,
                workchain: block.workchain,
                shard: block.shard,
                seqno: block.seqno,
                detected_at: Utc::now(),
            });
        }
        Ok(events)
    }
}
