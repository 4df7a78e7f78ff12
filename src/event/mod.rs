pub mod publisher;

use crate::{error::PublishError, utils::AccountAddress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use publisher::{LogPublisher, MemoryPublisher, RedisStreamPublisher};

/// A confirmed transaction on a tracked, active address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchEvent {
    pub address: AccountAddress,
    /// Lowercase hex, also the de-duplication key for consumers.
    pub tx_hash: String,
    pub lt: u64,
    pub workchain: i32,
    pub shard: i64,
    pub seqno: u32,
    pub detected_at: DateTime<Utc>,
}

/// Outbound sink for match events. The pipeline logs failures and moves on.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &MatchEvent) -> Result<(), PublishError>;
}
