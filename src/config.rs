use std::sync::OnceLock;
use std::{env, net::SocketAddr, num::NonZeroU32, str::FromStr, time::Duration};

use dotenv::dotenv;

#[derive(Clone, Debug)]
pub struct FeatureFlags {
    /// Log every filter hit at info, including ones the store rejects.
    pub log_filter_hits: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherKind {
    Redis,
    Log,
}

#[derive(Clone, Debug)]
pub struct RpcSettings {
    pub rate_limit: NonZeroU32,
    pub queue_limit: usize,
    pub call_timeout: Duration,
    pub reconnect_wait: Duration,
}

#[derive(Clone, Debug)]
pub struct LockSettings {
    pub enabled: bool,
    /// Extended every third of its length while a step holds the lock.
    pub ttl: Duration,
    pub wait: Duration,
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub sync_interval: Duration,
    pub process_interval: Duration,
    pub batch_size: usize,
    pub tx_fetch_limit: u32,
    pub tx_retry_limit: u32,
}

#[derive(Clone, Debug)]
pub struct FilterSettings {
    pub expected_items: usize,
    pub fp_rate: f64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub lite_rpc_url: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub redis_url: Option<String>,
    pub publisher: PublisherKind,
    pub redis_stream_key: String,
    pub redis_stream_maxlen: usize,
    pub rpc: RpcSettings,
    pub lock: LockSettings,
    pub engine: EngineSettings,
    pub filter: FilterSettings,
    pub api_bind: SocketAddr,
    pub api_enabled: bool,
    pub flags: FeatureFlags,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> eyre::Result<T> {
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| eyre::eyre!("{} has an invalid value: {}", name, v)),
        None => Ok(default),
    }
}

fn flag_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: bool,
) -> eyre::Result<bool> {
    match lookup(name).as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some("1") | Some("true") => Ok(true),
        Some("0") | Some("false") => Ok(false),
        Some(v) => eyre::bail!("{} must be 0 or 1, got: {}", name, v),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> eyre::Result<Duration> {
    parse_or(lookup, name, default).map(Duration::from_millis)
}

impl Config {
    /// Reads the process environment. `dotenv` is applied by
    /// [`init_from_env`], not here.
    pub fn load() -> eyre::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> eyre::Result<Self> {
        let lite_rpc_url = lookup("LITE_RPC_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8081/jsonRPC".to_string());
        if !(lite_rpc_url.starts_with("http://")
            || lite_rpc_url.starts_with("https://"))
        {
            eyre::bail!(
                "LITE_RPC_URL must start with http:// or https://, got: {}",
                lite_rpc_url
            );
        }
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| eyre::eyre!("DATABASE_URL is required"))?;
        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?;

        let redis_url = lookup("REDIS_URL").filter(|v| !v.trim().is_empty());
        let publisher = match lookup("PUBLISHER").as_deref().map(str::trim) {
            None | Some("") if redis_url.is_some() => PublisherKind::Redis,
            None | Some("") => PublisherKind::Log,
            Some("redis") => PublisherKind::Redis,
            Some("log") => PublisherKind::Log,
            Some(other) => {
                eyre::bail!("PUBLISHER must be redis or log, got: {}", other)
            }
        };
        if publisher == PublisherKind::Redis && redis_url.is_none() {
            eyre::bail!("PUBLISHER=redis requires REDIS_URL");
        }
        let redis_stream_key = lookup("REDIS_STREAM_KEY")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "ton-transactions".to_string());
        let redis_stream_maxlen =
            parse_or(&lookup, "REDIS_STREAM_MAXLEN", 100_000)?;

        let rpc = RpcSettings {
            rate_limit: parse_or(
                &lookup,
                "RPC_RATE_LIMIT",
                NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            )?,
            queue_limit: parse_or(&lookup, "RPC_QUEUE_LIMIT", 10_000)?,
            call_timeout: millis_or(&lookup, "RPC_CALL_TIMEOUT_MS", 30_000)?,
            reconnect_wait: millis_or(&lookup, "RPC_RECONNECT_WAIT_MS", 200)?,
        };

        let lock = LockSettings {
            enabled: flag_or(&lookup, "LOCK_ENABLED", false)?,
            ttl: millis_or(&lookup, "LOCK_TTL_MS", 30_000)?,
            wait: millis_or(&lookup, "LOCK_WAIT_MS", 100)?,
        };
        if lock.enabled && redis_url.is_none() {
            eyre::bail!("LOCK_ENABLED=1 requires REDIS_URL");
        }

        let engine = EngineSettings {
            sync_interval: millis_or(&lookup, "SYNC_INTERVAL_MS", 100)?,
            process_interval: millis_or(&lookup, "PROCESS_INTERVAL_MS", 100)?,
            batch_size: parse_or(&lookup, "PROCESS_BATCH_SIZE", 100)?,
            tx_fetch_limit: parse_or(&lookup, "TX_FETCH_LIMIT", 10_000)?,
            tx_retry_limit: parse_or(&lookup, "TX_RETRY_LIMIT", 100_000)?,
        };
        if engine.batch_size == 0 {
            eyre::bail!("PROCESS_BATCH_SIZE must be positive");
        }
        if engine.tx_fetch_limit == 0
            || engine.tx_retry_limit < engine.tx_fetch_limit
        {
            eyre::bail!(
                "TX_FETCH_LIMIT must be positive and not above TX_RETRY_LIMIT \
                 ({} > {})",
                engine.tx_fetch_limit,
                engine.tx_retry_limit
            );
        }

        let filter = FilterSettings {
            expected_items: parse_or(
                &lookup,
                "FILTER_EXPECTED_ITEMS",
                1_000_000,
            )?,
            fp_rate: parse_or(&lookup, "FILTER_FP_RATE", 0.001)?,
        };
        if filter.expected_items == 0 {
            eyre::bail!("FILTER_EXPECTED_ITEMS must be positive");
        }
        if !(filter.fp_rate > 0.0 && filter.fp_rate < 1.0) {
            eyre::bail!(
                "FILTER_FP_RATE must be in (0, 1), got: {}",
                filter.fp_rate
            );
        }

        let api_bind = parse_or(
            &lookup,
            "API_BIND",
            SocketAddr::from(([127, 0, 0, 1], 3000)),
        )?;

        Ok(Self {
            lite_rpc_url,
            database_url,
            db_max_connections,
            redis_url,
            publisher,
            redis_stream_key,
            redis_stream_maxlen,
            rpc,
            lock,
            engine,
            filter,
            api_bind,
            api_enabled: flag_or(&lookup, "API_ENABLED", true)?,
            flags: FeatureFlags {
                log_filter_hits: flag_or(&lookup, "LOG_FILTER_HITS", false)?,
            },
        })
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Loads `.env`, then the environment, into the global config. Call once at
/// startup.
pub fn init_from_env() -> eyre::Result<&'static Config> {
    dotenv().ok();
    let cfg = Config::load()?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("config must be initialized"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(
        pairs: &[(&str, &str)],
    ) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[(
            "DATABASE_URL",
            "postgres://x",
        )]))
        .unwrap();
        assert_eq!(cfg.lite_rpc_url, "http://127.0.0.1:8081/jsonRPC");
        assert_eq!(cfg.publisher, PublisherKind::Log);
        assert_eq!(cfg.redis_stream_key, "ton-transactions");
        assert_eq!(cfg.rpc.rate_limit.get(), 10);
        assert_eq!(cfg.rpc.call_timeout, Duration::from_secs(30));
        assert_eq!(cfg.engine.batch_size, 100);
        assert_eq!(cfg.engine.tx_retry_limit, 100_000);
        assert_eq!(cfg.api_bind.port(), 3000);
        assert!(cfg.api_enabled);
        assert!(!cfg.lock.enabled);
    }

    #[test]
    fn test_database_url_required() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn test_redis_url_selects_redis_publisher() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("REDIS_URL", "redis://127.0.0.1/"),
        ]))
        .unwrap();
        assert_eq!(cfg.publisher, PublisherKind::Redis);

        let cfg = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("REDIS_URL", "redis://127.0.0.1/"),
            ("PUBLISHER", "log"),
        ]))
        .unwrap();
        assert_eq!(cfg.publisher, PublisherKind::Log);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        for (k, v) in [
            ("LITE_RPC_URL", "ws://node"),
            ("RPC_RATE_LIMIT", "0"),
            ("PROCESS_BATCH_SIZE", "0"),
            ("FILTER_FP_RATE", "1.5"),
            ("TX_RETRY_LIMIT", "5"),
            ("LOCK_ENABLED", "1"),
            ("PUBLISHER", "redis"),
            ("API_ENABLED", "maybe"),
            ("SYNC_INTERVAL_MS", "soon"),
        ] {
            let res = Config::from_lookup(lookup_from(&[
                ("DATABASE_URL", "postgres://x"),
                (k, v),
            ]));
            assert!(res.is_err(), "{k}={v} should be rejected");
        }
    }
}
