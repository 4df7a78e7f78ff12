//! Rate-limited lite-server client with single-flight reconnection.
//!
//! Every call is admitted by [`RateGate`] first, then waits for the
//! connection to be ready, then runs under the per-call timeout. Transport
//! failures drop the connection back to `Disconnected`; the next admitted
//! call reconnects.

use super::{BlockRef, BlockTransaction, LiteTransport};
use crate::error::RpcError;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::{
    future::Future,
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, Semaphore},
    time::{Instant, sleep, timeout},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub rate_per_sec: NonZeroU32,
    /// Callers allowed to wait for a permit; the next one is rejected.
    pub queue_limit: usize,
    pub call_timeout: Duration,
    pub reconnect_wait: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            rate_per_sec: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            queue_limit: 10_000,
            call_timeout: Duration::from_secs(30),
            reconnect_wait: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Ready = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Ready,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
        }
    }
}

/// Token bucket plus a bounded wait queue.
struct RateGate {
    limiter: DefaultDirectRateLimiter,
    queue: Semaphore,
}

impl RateGate {
    fn new(rate_per_sec: NonZeroU32, queue_limit: usize) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate_per_sec)),
            queue: Semaphore::new(queue_limit),
        }
    }

    async fn admit(&self) -> Result<(), RpcError> {
        if self.limiter.check().is_ok() {
            return Ok(());
        }
        // holding a queue slot for the whole wait bounds the waiters
        let _slot =
            self.queue.try_acquire().map_err(|_| RpcError::RateLimited)?;
        self.limiter.until_ready().await;
        Ok(())
    }

    fn waiting(&self, queue_limit: usize) -> usize {
        queue_limit.saturating_sub(self.queue.available_permits())
    }
}

pub struct ResilientClient {
    transport: Arc<dyn LiteTransport>,
    gate: RateGate,
    state: AtomicU8,
    reconnect: Mutex<()>,
    settings: ClientSettings,
}

impl ResilientClient {
    pub fn new(
        transport: Arc<dyn LiteTransport>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            transport,
            gate: RateGate::new(settings.rate_per_sec, settings.queue_limit),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            reconnect: Mutex::new(()),
            settings,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Callers currently parked in the rate-limit queue.
    pub fn queued(&self) -> usize {
        self.gate.waiting(self.settings.queue_limit)
    }

    pub async fn get_chain_head(&self) -> Result<BlockRef, RpcError> {
        self.call("getMasterchainInfo", self.transport.masterchain_info())
            .await
    }

    /// Serialized shard list for `head`, input to the shard decoder.
    pub async fn get_shards(
        &self,
        head: &BlockRef,
    ) -> Result<Vec<u8>, RpcError> {
        self.call("getAllShardsInfo", self.transport.all_shards_info(head))
            .await
    }

    pub async fn lookup_block(
        &self,
        workchain: i32,
        shard: i64,
        seqno: u32,
    ) -> Result<BlockRef, RpcError> {
        self.call(
            "lookupBlock",
            self.transport.lookup_block(workchain, shard, seqno),
        )
        .await
    }

    /// Lists up to `limit` transactions of `block`. A truncated page is
    /// reported as [`RpcError::Incomplete`] rather than returned partially.
    pub async fn get_block_transactions(
        &self,
        block: &BlockRef,
        limit: u32,
    ) -> Result<Vec<BlockTransaction>, RpcError> {
        let page = self
            .call(
                "listBlockTransactions",
                self.transport.list_block_transactions(block, limit),
            )
            .await?;
        if page.incomplete {
            return Err(RpcError::Incomplete {
                returned: page.transactions.len(),
            });
        }
        Ok(page.transactions)
    }

    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, RpcError>>,
    ) -> Result<T, RpcError> {
        self.gate.admit().await?;
        self.ensure_ready().await?;
        let result = match timeout(self.settings.call_timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(RpcError::Timeout(self.settings.call_timeout)),
        };
        match &result {
            Err(RpcError::Transport(msg)) => {
                warn!(op, error = %msg, "transport failure, disconnecting");
                self.set_state(ConnectionState::Disconnected);
            }
            Err(RpcError::Timeout(after)) => {
                debug!(op, ?after, "rpc call timed out");
            }
            _ => {}
        }
        result
    }

    /// Waits until the connection is ready. Only the caller holding the
    /// reconnect guard dials; everyone else polls until it finishes.
    async fn ensure_ready(&self) -> Result<(), RpcError> {
        let deadline = Instant::now() + self.settings.call_timeout;
        loop {
            if self.state() == ConnectionState::Ready {
                return Ok(());
            }
            if let Ok(_guard) = self.reconnect.try_lock() {
                if self.state() == ConnectionState::Ready {
                    return Ok(());
                }
                return self.reconnect_locked().await;
            }
            if Instant::now() >= deadline {
                return Err(RpcError::Timeout(self.settings.call_timeout));
            }
            sleep(self.settings.reconnect_wait).await;
        }
    }

    async fn reconnect_locked(&self) -> Result<(), RpcError> {
        self.set_state(ConnectionState::Connecting);
        let outcome =
            match timeout(self.settings.call_timeout, self.transport.connect())
                .await
            {
                Ok(r) => r,
                Err(_) => Err(RpcError::Timeout(self.settings.call_timeout)),
            };
        match outcome {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                info!("lite-server connection ready");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(error = %e, "lite-server connect failed");
                Err(e)
            }
        }
    }
}
