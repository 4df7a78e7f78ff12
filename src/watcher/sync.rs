use super::StepReport;
use crate::{
    chain::{ResilientClient, ShardDecoder, ShardDescriptor},
    error::{WatcherError, WatcherResult},
    repo::{NewShardBlock, WatchStore},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub head_seqno: u32,
    pub shards: usize,
    pub inserted: usize,
}

impl StepReport for SyncReport {
    fn is_quiet(&self) -> bool {
        self.inserted == 0
    }
}

/// Discovers new shard blocks and records them as pending work.
pub struct ShardSync {
    client: Arc<ResilientClient>,
    store: Arc<dyn WatchStore>,
    decoder: ShardDecoder,
}

impl ShardSync {
    pub fn new(
        client: Arc<ResilientClient>,
        store: Arc<dyn WatchStore>,
    ) -> Self {
        Self {
            client,
            store,
            decoder: ShardDecoder::default(),
        }
    }

    /// One discovery pass. RPC and decode failures happen before the first
    /// insert; inserts per shard are ascending, so a store failure midway
    /// leaves a contiguous prefix that the next pass extends.
    pub async fn step(&self) -> WatcherResult<SyncReport> {
        let head = self
            .client
            .get_chain_head()
            .await
            .map_err(WatcherError::rpc("getMasterchainInfo"))?;
        let bytes = self
            .client
            .get_shards(&head)
            .await
            .map_err(WatcherError::rpc("getAllShardsInfo"))?;
        let shards = self.decoder.decode(&bytes).inspect_err(|e| {
            warn!(head = head.seqno, error = %e, "shard list rejected");
        })?;

        let mut report = SyncReport {
            head_seqno: head.seqno,
            shards: shards.len(),
            inserted: 0,
        };
        if shards.is_empty() {
            debug!(head = head.seqno, "shard list is empty");
            return Ok(report);
        }
        for shard in &shards {
            report.inserted += self.sync_shard(shard).await?;
        }
        Ok(report)
    }

    async fn sync_shard(&self, d: &ShardDescriptor) -> WatcherResult<usize> {
        let watermark = self
            .store
            .get_watermark(d.workchain, d.shard)
            .await
            .inspect_err(|e| {
                warn!(
                    workchain = d.workchain,
                    shard = d.shard,
                    op = "get_watermark",
                    error = %e,
                    "store failure"
                );
            })?;
        // first sighting starts at the current block, never at genesis
        let first = match watermark {
            Some(w) => match w.checked_add(1) {
                Some(next) => next,
                None => return Ok(0),
            },
            None => d.seqno,
        };
        if first > d.seqno {
            return Ok(0);
        }
        if d.seqno - first >= 1_000 {
            info!(
                workchain = d.workchain,
                shard = d.shard,
                from = first,
                to = d.seqno,
                "catching up on shard"
            );
        }

        let mut inserted = 0;
        for seqno in first..=d.seqno {
            let block = NewShardBlock {
                workchain: d.workchain,
                shard: d.shard,
                seqno,
            };
            let fresh = self
                .store
                .insert_block_if_absent(&block)
                .await
                .inspect_err(|e| {
                    warn!(
                        workchain = d.workchain,
                        shard = d.shard,
                        seqno,
                        op = "insert_block",
                        error = %e,
                        "store failure"
                    );
                })?;
            if fresh {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
