use super::{EventPublisher, MatchEvent};
use crate::error::PublishError;
use async_trait::async_trait;
use redis::{AsyncCommands, streams::StreamMaxlen};
use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

/// Appends each event as JSON in the `data` field of a Redis stream entry.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: redis::aio::MultiplexedConnection,
    stream_key: String,
    max_len: usize,
}

impl RedisStreamPublisher {
    pub fn new(
        conn: redis::aio::MultiplexedConnection,
        stream_key: impl Into<String>,
        max_len: usize,
    ) -> Self {
        Self {
            conn,
            stream_key: stream_key.into(),
            max_len,
        }
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, event: &MatchEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let entry_id: String = conn
            .xadd_maxlen(
                &self.stream_key,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &[("data", payload)],
            )
            .await?;
        tracing::debug!(stream = %self.stream_key, %entry_id, "event appended");
        Ok(())
    }
}

/// Writes events to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &MatchEvent) -> Result<(), PublishError> {
        tracing::info!(
            address = %event.address,
            tx_hash = %event.tx_hash,
            lt = event.lt,
            shard = event.shard,
            seqno = event.seqno,
            "transaction matched"
        );
        Ok(())
    }
}

/// Keeps published events in memory; can be switched to fail.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<MatchEvent>>,
    failing: AtomicBool,
}

impl MemoryPublisher {
    pub fn events(&self) -> Vec<MatchEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, event: &MatchEvent) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected("publisher is failing".into()));
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}
