//! Shared fixtures for unit tests: a scripted lite-server transport and
//! builders for blocks, transactions and shard lists.

use crate::{
    chain::{
        BlockRef, BlockTransaction, LiteTransport, TransactionPage,
        shards::{ShardDescriptor, ShardTree, encode_shard_list},
    },
    error::RpcError,
    utils::Fingerprint,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

type BlockKey = (i32, i64, u32);

pub fn block_ref(workchain: i32, shard: i64, seqno: u32) -> BlockRef {
    BlockRef {
        workchain,
        shard,
        seqno,
        root_hash: [seqno as u8; 32],
        file_hash: [seqno.wrapping_add(1) as u8; 32],
    }
}

pub fn tx(account: Fingerprint, lt: u64) -> BlockTransaction {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&lt.to_be_bytes());
    hash[8..16].copy_from_slice(&account.0[..8]);
    BlockTransaction { account, lt, hash }
}

pub fn fingerprint(seed: u8) -> Fingerprint {
    let mut fp = [seed; 32];
    fp[31] = seed.wrapping_mul(31).wrapping_add(7);
    Fingerprint(fp)
}

/// Shard-list payload for workchain 0 with one leaf per `(shard, seqno)`,
/// nested as a right-leaning chain of forks.
pub fn shard_list(shards: &[(i64, u32)]) -> Vec<u8> {
    let leaf = |(shard, seqno): (i64, u32)| {
        ShardTree::Leaf(ShardDescriptor {
            workchain: 0,
            shard,
            seqno,
            root_hash: [1; 32],
            file_hash: [2; 32],
        })
    };
    let mut iter = shards.iter().rev().copied();
    let Some(last) = iter.next() else {
        return Vec::new();
    };
    let tree = iter.fold(leaf(last), |acc, s| ShardTree::fork(leaf(s), acc));
    encode_shard_list(0, &tree).unwrap()
}

#[derive(Default)]
pub struct MockTransport {
    pub connects: AtomicUsize,
    pub head_calls: AtomicUsize,
    pub shards_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
    pub tx_calls: AtomicUsize,
    /// Number of upcoming data calls that fail with a transport error.
    pub fail_transport: AtomicUsize,
    pub connect_delay: Duration,
    pub call_delay: Duration,
    pub head_seqno: AtomicUsize,
    pub shards: Mutex<Option<Vec<u8>>>,
    pub blocks: Mutex<HashMap<BlockKey, BlockRef>>,
    pub transactions: Mutex<HashMap<BlockKey, Vec<BlockTransaction>>>,
    /// Requested counts, in call order.
    pub tx_limits: Mutex<Vec<u32>>,
}

impl MockTransport {
    pub fn add_block(&self, block: BlockRef) {
        self.blocks.lock().unwrap().insert(
            (block.workchain, block.shard, block.seqno),
            block,
        );
    }

    pub fn set_shards(&self, bytes: Vec<u8>) {
        *self.shards.lock().unwrap() = Some(bytes);
    }

    pub fn set_transactions(&self, block: &BlockRef, count: usize) {
        let txs = (0..count)
            .map(|i| tx(fingerprint(200u8.wrapping_add(i as u8)), i as u64))
            .collect();
        self.set_transaction_list(block, txs);
    }

    pub fn set_transaction_list(
        &self,
        block: &BlockRef,
        txs: Vec<BlockTransaction>,
    ) {
        self.transactions
            .lock()
            .unwrap()
            .insert((block.workchain, block.shard, block.seqno), txs);
    }

    pub fn rpc_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
            + self.shards_calls.load(Ordering::SeqCst)
            + self.lookup_calls.load(Ordering::SeqCst)
            + self.tx_calls.load(Ordering::SeqCst)
    }

    async fn data_call(&self, counter: &AtomicUsize) -> Result<(), RpcError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        let failing = self.fail_transport.load(Ordering::SeqCst);
        if failing > 0 {
            self.fail_transport.store(failing - 1, Ordering::SeqCst);
            return Err(RpcError::Transport("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LiteTransport for MockTransport {
    async fn connect(&self) -> Result<(), RpcError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        Ok(())
    }

    async fn masterchain_info(&self) -> Result<BlockRef, RpcError> {
        self.data_call(&self.head_calls).await?;
        let seqno = self.head_seqno.load(Ordering::SeqCst) as u32;
        Ok(block_ref(-1, i64::MIN, seqno))
    }

    async fn all_shards_info(
        &self,
        _head: &BlockRef,
    ) -> Result<Vec<u8>, RpcError> {
        self.data_call(&self.shards_calls).await?;
        self.shards
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RpcError::Protocol("no shard list scripted".into()))
    }

    async fn lookup_block(
        &self,
        workchain: i32,
        shard: i64,
        seqno: u32,
    ) -> Result<BlockRef, RpcError> {
        self.data_call(&self.lookup_calls).await?;
        self.blocks
            .lock()
            .unwrap()
            .get(&(workchain, shard, seqno))
            .cloned()
            .ok_or(RpcError::NotFound)
    }

    async fn list_block_transactions(
        &self,
        block: &BlockRef,
        count: u32,
    ) -> Result<TransactionPage, RpcError> {
        self.data_call(&self.tx_calls).await?;
        self.tx_limits.lock().unwrap().push(count);
        let all = self
            .transactions
            .lock()
            .unwrap()
            .get(&(block.workchain, block.shard, block.seqno))
            .cloned()
            .unwrap_or_default();
        let incomplete = all.len() > count as usize;
        Ok(TransactionPage {
            transactions: all.into_iter().take(count as usize).collect(),
            incomplete,
        })
    }
}
