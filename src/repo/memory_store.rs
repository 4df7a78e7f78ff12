use super::{
    NewShardBlock, ShardBlock, StoreResult, TrackedAddress, WatchStore,
};
use crate::{error::StoreError, utils::Fingerprint};
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

#[derive(Default)]
struct State {
    next_block_id: i64,
    // keyed like the unique index, so iteration order is the queue order
    blocks: BTreeMap<(i32, i64, u32), ShardBlock>,
    tracked: HashMap<(i32, Fingerprint), TrackedAddress>,
}

/// In-process [`WatchStore`] with the same uniqueness and ordering rules as
/// the Postgres schema. Used by tests and local runs without a database.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` tracked-address lookups fail with a database
    /// error.
    pub fn fail_next_lookups(&self, n: usize) {
        self.failing_lookups.store(n, Ordering::SeqCst);
    }

    pub fn blocks(&self) -> Vec<ShardBlock> {
        self.lock().blocks.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // poisoning is ignored
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl WatchStore for MemoryStore {
    async fn get_watermark(
        &self,
        workchain: i32,
        shard: i64,
    ) -> StoreResult<Option<u32>> {
        let state = self.lock();
        Ok(state
            .blocks
            .range((workchain, shard, 0)..=(workchain, shard, u32::MAX))
            .next_back()
            .map(|(_, b)| b.seqno))
    }

    async fn insert_block_if_absent(
        &self,
        block: &NewShardBlock,
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        let key = (block.workchain, block.shard, block.seqno);
        if state.blocks.contains_key(&key) {
            return Ok(false);
        }
        state.next_block_id += 1;
        let id = state.next_block_id;
        state.blocks.insert(
            key,
            ShardBlock {
                id,
                workchain: block.workchain,
                shard: block.shard,
                seqno: block.seqno,
                processed: false,
                processed_at: None,
            },
        );
        Ok(true)
    }

    async fn list_unprocessed(
        &self,
        limit: usize,
    ) -> StoreResult<Vec<ShardBlock>> {
        let state = self.lock();
        let mut turns: HashMap<(i32, i64), usize> = HashMap::new();
        let mut pending: Vec<(usize, &ShardBlock)> = state
            .blocks
            .values()
            .filter(|b| !b.processed)
            .map(|b| {
                let turn = turns.entry((b.workchain, b.shard)).or_default();
                *turn += 1;
                (*turn, b)
            })
            .collect();
        pending.sort_by_key(|(turn, b)| (*turn, b.workchain, b.shard));
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|(_, b)| b.clone())
            .collect())
    }

    async fn mark_processed(&self, id: i64) -> StoreResult<bool> {
        let mut state = self.lock();
        match state
            .blocks
            .values_mut()
            .find(|b| b.id == id && !b.processed)
        {
            Some(block) => {
                block.processed = true;
                block.processed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_unprocessed(&self) -> StoreResult<u64> {
        let state = self.lock();
        Ok(state.blocks.values().filter(|b| !b.processed).count() as u64)
    }

    async fn find_tracked_address(
        &self,
        workchain: i32,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<TrackedAddress>> {
        let failing = self.failing_lookups.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_lookups.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let state = self.lock();
        Ok(state.tracked.get(&(workchain, *fingerprint)).cloned())
    }

    async fn list_active_tracked_addresses(
        &self,
    ) -> StoreResult<Vec<TrackedAddress>> {
        let state = self.lock();
        let mut active: Vec<_> =
            state.tracked.values().filter(|t| t.active).cloned().collect();
        active.sort_by_key(|t| t.created_at);
        Ok(active)
    }

    async fn insert_tracked_address(
        &self,
        workchain: i32,
        fingerprint: &Fingerprint,
    ) -> StoreResult<TrackedAddress> {
        let mut state = self.lock();
        let key = (workchain, *fingerprint);
        if state.tracked.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "{workchain}:{fingerprint} is already registered"
            )));
        }
        let now = Utc::now();
        let record = TrackedAddress {
            id: Uuid::new_v4(),
            workchain,
            fingerprint: *fingerprint,
            active: true,
            created_at: now,
            updated_at: now,
        };
        state.tracked.insert(key, record.clone());
        Ok(record)
    }

    async fn deactivate_tracked_address(&self, id: Uuid) -> StoreResult<bool> {
        Ok(set_active(&mut self.lock(), id, false))
    }

    async fn reactivate_tracked_address(&self, id: Uuid) -> StoreResult<bool> {
        Ok(set_active(&mut self.lock(), id, true))
    }
}

fn set_active(state: &mut State, id: Uuid, active: bool) -> bool {
    match state
        .tracked
        .values_mut()
        .find(|t| t.id == id && t.active != active)
    {
        Some(record) => {
            record.active = active;
            record.updated_at = Utc::now();
            true
        }
        None => false,
    }
}
