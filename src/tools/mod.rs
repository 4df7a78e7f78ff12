//! Bootstrap helpers shared by the service binary and `dev-tools`.

use crate::{
    config::{Config, PublisherKind},
    db::{Db, redis_conn::get_redis_connection},
    event::{EventPublisher, LogPublisher, RedisStreamPublisher},
    filter::AddressFilter,
    lock::{DistributedLock, RedisLock},
    repo::{PgStore, WatchStore},
};
use eyre::Result;
use std::sync::Arc;

/// Connects Postgres, applies migrations and wraps the pool in a store.
pub async fn connect_store(config: &Config) -> Result<Arc<dyn WatchStore>> {
    let db = Db::connect(&config.database_url, config.db_max_connections)
        .await?;
    crate::db::run_migrations(db.pool()).await?;
    Ok(Arc::new(PgStore::new(db)))
}

pub fn build_filter(config: &Config) -> Arc<AddressFilter> {
    let filter = AddressFilter::new(
        config.filter.expected_items,
        config.filter.fp_rate,
    );
    tracing::info!(
        bits = filter.num_bits(),
        hashes = filter.num_hashes(),
        "address filter sized"
    );
    Arc::new(filter)
}

/// Redis-backed publisher and lock as configured. The connection is shared.
pub async fn build_outputs(
    config: &Config,
) -> Result<(Arc<dyn EventPublisher>, Option<Arc<dyn DistributedLock>>)> {
    let conn = match &config.redis_url {
        Some(url) => Some(get_redis_connection(url).await?),
        None => None,
    };
    let publisher: Arc<dyn EventPublisher> = match (config.publisher, &conn) {
        (PublisherKind::Redis, Some(conn)) => Arc::new(
            RedisStreamPublisher::new(
                conn.clone(),
                config.redis_stream_key.clone(),
                config.redis_stream_maxlen,
            ),
        ),
        (PublisherKind::Redis, None) => {
            eyre::bail!("redis publisher selected without REDIS_URL")
        }
        (PublisherKind::Log, _) => Arc::new(LogPublisher),
    };
    let lock: Option<Arc<dyn DistributedLock>> =
        match (config.lock.enabled, conn) {
            (true, Some(conn)) => {
                Some(Arc::new(RedisLock::new(conn, config.lock.ttl)))
            }
            (true, None) => eyre::bail!("LOCK_ENABLED=1 requires REDIS_URL"),
            (false, _) => None,
        };
    Ok((publisher, lock))
}
