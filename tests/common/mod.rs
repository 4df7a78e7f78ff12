#![allow(dead_code)]

use async_trait::async_trait;
use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::{Arc, Mutex},
};
use ton_watcher::{
    api::AppState,
    chain::{
        BlockRef, BlockTransaction, ClientSettings, LiteTransport,
        ResilientClient, TransactionPage,
        shards::{ShardDescriptor, ShardTree, encode_shard_list},
    },
    error::RpcError,
    filter::AddressFilter,
    repo::MemoryStore,
    tracking::TrackingService,
    utils::Fingerprint,
};

type Key = (i32, i64, u32);

#[derive(Default)]
struct ChainState {
    head: u32,
    shards: Vec<(i64, u32)>,
    blocks: HashMap<Key, BlockRef>,
    transactions: HashMap<Key, Vec<BlockTransaction>>,
}

/// Scripted lite-server: the test decides which shards exist and which
/// blocks and transactions the node already knows.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

pub fn block(shard: i64, seqno: u32) -> BlockRef {
    BlockRef {
        workchain: 0,
        shard,
        seqno,
        root_hash: [seqno as u8; 32],
        file_hash: [0xfe; 32],
    }
}

pub fn fingerprint(seed: u8) -> Fingerprint {
    Fingerprint([seed; 32])
}

impl FakeChain {
    /// Sets the shard tips and registers every block up to each tip.
    pub fn advance(&self, head: u32, shards: &[(i64, u32)]) {
        let mut st = self.state.lock().unwrap();
        st.head = head;
        st.shards = shards.to_vec();
        for &(shard, seqno) in shards {
            for s in seqno.saturating_sub(16)..=seqno {
                st.blocks.entry((0, shard, s)).or_insert(block(shard, s));
            }
        }
    }

    pub fn add_transaction(
        &self,
        shard: i64,
        seqno: u32,
        account: Fingerprint,
        lt: u64,
    ) {
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&lt.to_be_bytes());
        hash[31] = account.0[0];
        self.state
            .lock()
            .unwrap()
            .transactions
            .entry((0, shard, seqno))
            .or_default()
            .push(BlockTransaction { account, lt, hash });
    }

    fn shard_list(&self) -> Vec<u8> {
        let st = self.state.lock().unwrap();
        let mut leaves = st.shards.iter().rev().map(|&(shard, seqno)| {
            ShardTree::Leaf(ShardDescriptor {
                workchain: 0,
                shard,
                seqno,
                root_hash: [1; 32],
                file_hash: [2; 32],
            })
        });
        let last = leaves.next().expect("at least one shard");
        let tree = leaves.fold(last, |acc, leaf| ShardTree::fork(leaf, acc));
        encode_shard_list(0, &tree).unwrap()
    }
}

#[async_trait]
impl LiteTransport for FakeChain {
    async fn connect(&self) -> Result<(), RpcError> {
        Ok(())
    }

    async fn masterchain_info(&self) -> Result<BlockRef, RpcError> {
        let head = self.state.lock().unwrap().head;
        Ok(BlockRef {
            workchain: -1,
            shard: i64::MIN,
            seqno: head,
            root_hash: [0; 32],
            file_hash: [0; 32],
        })
    }

    async fn all_shards_info(
        &self,
        _head: &BlockRef,
    ) -> Result<Vec<u8>, RpcError> {
        Ok(self.shard_list())
    }

    async fn lookup_block(
        &self,
        workchain: i32,
        shard: i64,
        seqno: u32,
    ) -> Result<BlockRef, RpcError> {
        self.state
            .lock()
            .unwrap()
            .blocks
            .get(&(workchain, shard, seqno))
            .cloned()
            .ok_or(RpcError::NotFound)
    }

    async fn list_block_transactions(
        &self,
        block: &BlockRef,
        count: u32,
    ) -> Result<TransactionPage, RpcError> {
        let all = self
            .state
            .lock()
            .unwrap()
            .transactions
            .get(&(block.workchain, block.shard, block.seqno))
            .cloned()
            .unwrap_or_default();
        Ok(TransactionPage {
            incomplete: all.len() > count as usize,
            transactions: all.into_iter().take(count as usize).collect(),
        })
    }
}

pub struct Harness {
    pub chain: Arc<FakeChain>,
    pub store: Arc<MemoryStore>,
    pub filter: Arc<AddressFilter>,
    pub client: Arc<ResilientClient>,
}

impl Harness {
    pub fn new() -> Self {
        let chain = Arc::new(FakeChain::default());
        chain.advance(1, &[(i64::MIN, 1)]);
        let settings = ClientSettings {
            rate_per_sec: NonZeroU32::new(1_000).unwrap(),
            ..ClientSettings::default()
        };
        let client = Arc::new(ResilientClient::new(chain.clone(), settings));
        Self {
            chain,
            store: Arc::new(MemoryStore::new()),
            filter: Arc::new(AddressFilter::new(1_000, 0.001)),
            client,
        }
    }

    pub fn tracking(&self) -> TrackingService {
        TrackingService::new(self.store.clone(), self.filter.clone())
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            tracking: self.tracking(),
            store: self.store.clone(),
            client: self.client.clone(),
        }
    }
}
