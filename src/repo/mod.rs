pub mod memory_store;
pub mod pg_store;

use crate::{
    error::StoreError,
    utils::{AccountAddress, Fingerprint},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub use memory_store::MemoryStore;
pub use pg_store::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedAddress {
    pub id: Uuid,
    pub workchain: i32,
    pub fingerprint: Fingerprint,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedAddress {
    pub fn address(&self) -> AccountAddress {
        AccountAddress::new(self.workchain, self.fingerprint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardBlock {
    pub id: i64,
    pub workchain: i32,
    pub shard: i64,
    pub seqno: u32,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewShardBlock {
    pub workchain: i32,
    pub shard: i64,
    pub seqno: u32,
}

/// Durable state shared by the engines and the tracking service.
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Highest recorded seqno for the shard, `None` if never seen.
    async fn get_watermark(
        &self,
        workchain: i32,
        shard: i64,
    ) -> StoreResult<Option<u32>>;

    /// Returns `false` when the (workchain, shard, seqno) row already exists.
    async fn insert_block_if_absent(
        &self,
        block: &NewShardBlock,
    ) -> StoreResult<bool>;

    /// Unprocessed blocks taken round-robin across shards: the oldest block
    /// of every shard, then the second oldest of every shard, and so on.
    /// Seqnos of one shard always come out ascending.
    async fn list_unprocessed(&self, limit: usize)
    -> StoreResult<Vec<ShardBlock>>;

    /// Flips `processed` once; `false` if the block was already processed
    /// or does not exist.
    async fn mark_processed(&self, id: i64) -> StoreResult<bool>;

    async fn count_unprocessed(&self) -> StoreResult<u64>;

    async fn find_tracked_address(
        &self,
        workchain: i32,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<TrackedAddress>>;

    async fn list_active_tracked_addresses(
        &self,
    ) -> StoreResult<Vec<TrackedAddress>>;

    /// Inserts an active record. A record for the same address, active or
    /// not, is a [`StoreError::Conflict`].
    async fn insert_tracked_address(
        &self,
        workchain: i32,
        fingerprint: &Fingerprint,
    ) -> StoreResult<TrackedAddress>;

    /// Active to inactive; `false` if absent or already inactive.
    async fn deactivate_tracked_address(&self, id: Uuid) -> StoreResult<bool>;

    /// Inactive to active; `false` if absent or already active.
    async fn reactivate_tracked_address(&self, id: Uuid) -> StoreResult<bool>;
}
