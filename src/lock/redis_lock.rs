use super::{DistributedLock, LockHandle, RETRY_DELAY};
use crate::{db::redis_conn::lock_key, error::LockError};
use async_trait::async_trait;
use redis::Script;
use std::{sync::LazyLock, time::Duration};
use tokio::time::{Instant, sleep};

// Deletes the key only while it still holds our token.
static RELEASE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call("GET", KEYS[1]) == ARGV[1] then
            return redis.call("DEL", KEYS[1])
        else
            return 0
        end
    "#,
    )
});

// Pushes the expiry out only while the key still holds our token.
static EXTEND: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call("GET", KEYS[1]) == ARGV[1] then
            return redis.call("PEXPIRE", KEYS[1], ARGV[2])
        else
            return 0
        end
    "#,
    )
});

/// `SET key token NX PX ttl` lock with compare-and-delete release.
#[derive(Clone)]
pub struct RedisLock {
    conn: redis::aio::MultiplexedConnection,
    ttl: Duration,
}

impl RedisLock {
    pub fn new(conn: redis::aio::MultiplexedConnection, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    async fn try_set(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(lock_key(&handle.resource))
            .arg(&handle.token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> Result<Option<LockHandle>, LockError> {
        let handle = LockHandle::new(resource);
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_set(&handle).await? {
                tracing::debug!(resource, "lock acquired");
                return Ok(Some(handle));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(RETRY_DELAY).await;
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = RELEASE
            .key(lock_key(&handle.resource))
            .arg(&handle.token)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            tracing::warn!(
                resource = %handle.resource,
                "lock expired or changed owner before release"
            );
        }
        Ok(deleted == 1)
    }

    async fn extend(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let extended: i64 = EXTEND
            .key(lock_key(&handle.resource))
            .arg(&handle.token)
            .arg(self.ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
