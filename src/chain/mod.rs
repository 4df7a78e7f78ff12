pub mod boc;
pub mod client;
pub mod http;
pub mod providers;
pub mod shards;

use crate::{error::RpcError, utils::Fingerprint};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::{ClientSettings, ConnectionState, ResilientClient};
pub use shards::{ShardDecoder, ShardDescriptor, decode_shards};

/// Fully resolved block id as returned by the lite-server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub workchain: i32,
    pub shard: i64,
    pub seqno: u32,
    #[serde(with = "b64_hash")]
    pub root_hash: [u8; 32],
    #[serde(with = "b64_hash")]
    pub file_hash: [u8; 32],
}

/// One entry of a block's transaction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTransaction {
    pub account: Fingerprint,
    pub lt: u64,
    pub hash: [u8; 32],
}

/// Raw `listBlockTransactions` page; `incomplete` means the server stopped
/// at the requested count.
#[derive(Debug, Clone, Default)]
pub struct TransactionPage {
    pub transactions: Vec<BlockTransaction>,
    pub incomplete: bool,
}

/// Wire access to a lite-server. Implementations report failures with the
/// [`RpcError`] taxonomy and never retry on their own.
#[async_trait]
pub trait LiteTransport: Send + Sync {
    /// Establishes (or re-establishes) the underlying connection.
    async fn connect(&self) -> Result<(), RpcError>;

    async fn masterchain_info(&self) -> Result<BlockRef, RpcError>;

    async fn all_shards_info(&self, head: &BlockRef)
    -> Result<Vec<u8>, RpcError>;

    async fn lookup_block(
        &self,
        workchain: i32,
        shard: i64,
        seqno: u32,
    ) -> Result<BlockRef, RpcError>;

    async fn list_block_transactions(
        &self,
        block: &BlockRef,
        count: u32,
    ) -> Result<TransactionPage, RpcError>;
}

pub(crate) mod b64_hash {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        let bytes = STANDARD.decode(s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|v: Vec<u8>| {
            serde::de::Error::custom(format!(
                "expected 32 bytes, got {}",
                v.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_ref_json_shape() {
        let block = BlockRef {
            workchain: 0,
            shard: i64::MIN,
            seqno: 42,
            root_hash: [1; 32],
            file_hash: [2; 32],
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["shard"], i64::MIN);
        assert_eq!(json["seqno"], 42);
        assert_eq!(
            json["root_hash"],
            "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE="
        );
        let back: BlockRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_short_hash_rejected() {
        let json = serde_json::json!({
            "workchain": 0, "shard": 0, "seqno": 1,
            "root_hash": "AQID", "file_hash": "AQID"
        });
        assert!(serde_json::from_value::<BlockRef>(json).is_err());
    }
}
