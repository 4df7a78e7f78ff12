use eyre::Result;

/// Key under which the lock for `resource` is stored.
pub fn lock_key(resource: &str) -> String {
    format!("ton-watcher:lock:{}", resource)
}

pub async fn get_redis_connection(
    redis_url: &str,
) -> Result<redis::aio::MultiplexedConnection> {
    let client = redis::Client::open(redis_url)?;
    let conn = client.get_multiplexed_async_connection().await?;
    tracing::info!("connected to redis");
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_namespaced() {
        assert_eq!(lock_key("shard-sync"), "ton-watcher:lock:shard-sync");
        assert_ne!(lock_key("a"), lock_key("b"));
    }
}
