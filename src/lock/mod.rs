//! Cross-instance mutual exclusion for engine steps.
//!
//! A single instance never needs a lock; when one is configured, a step that
//! cannot get it within the wait budget is skipped for that tick.

pub mod redis_lock;

use crate::error::LockError;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};
use tokio::time::{Instant, sleep};
use uuid::Uuid;

pub use redis_lock::RedisLock;

/// Delay between acquisition attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Proof of ownership; releasing compares `token` before deleting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub resource: String,
    pub token: String,
}

impl LockHandle {
    fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            token: Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Retries until `timeout` elapses; `None` means someone else holds it.
    async fn acquire(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> Result<Option<LockHandle>, LockError>;

    /// Returns `false` when the lock already expired or changed owner;
    /// that is not an error.
    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError>;

    /// Resets the expiry to a full ttl if `handle` still owns the lock.
    async fn extend(&self, handle: &LockHandle) -> Result<bool, LockError>;

    /// Expiry applied on acquire and on every extend.
    fn ttl(&self) -> Duration;
}

/// Process-local lock with expiry, for single-host setups and tests.
pub struct LocalLock {
    ttl: Duration,
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl LocalLock {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            held: Mutex::new(HashMap::new()),
        }
    }

    fn try_take(&self, handle: &LockHandle) -> bool {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        match held.get(&handle.resource) {
            Some((_, expires)) if *expires > now => false,
            _ => {
                held.insert(
                    handle.resource.clone(),
                    (handle.token.clone(), now + self.ttl),
                );
                true
            }
        }
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn acquire(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> Result<Option<LockHandle>, LockError> {
        let handle = LockHandle::new(resource);
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_take(&handle) {
                return Ok(Some(handle));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(RETRY_DELAY).await;
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        match held.get(&handle.resource) {
            Some((token, _)) if *token == handle.token => {
                held.remove(&handle.resource);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        match held.get_mut(&handle.resource) {
            Some((token, expires))
                if *token == handle.token && *expires > now =>
            {
                *expires = now + self.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
