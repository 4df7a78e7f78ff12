use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the lite-server client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Block or lookup miss. Expected while a shard block is not yet
    /// available on the node.
    #[error("not found")]
    NotFound,
    /// Server truncated the result at the requested limit.
    #[error("incomplete result ({returned} items returned)")]
    Incomplete { returned: usize },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    /// Rate-limit wait queue is full.
    #[error("rate limited: wait queue is full")]
    RateLimited,
    #[error("malformed response: {0}")]
    Protocol(String),
}

impl RpcError {
    /// Transient failures leave the unit of work pending for the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Incomplete { .. }
                | RpcError::Timeout(_)
                | RpcError::Transport(_)
                | RpcError::RateLimited
        )
    }
}

/// Shard-list and bag-of-cells decoding failures. Always fatal for the
/// response being decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown bag-of-cells magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("unexpected end of data at byte {0}")]
    UnexpectedEof(usize),
    #[error("invalid header: {0}")]
    Header(String),
    #[error("crc32c mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    Checksum { expected: u32, actual: u32 },
    #[error("invalid cell {index}: {reason}")]
    Cell { index: usize, reason: String },
    #[error("cell {cell} reference {target} is not a later cell")]
    BadReference { cell: usize, target: usize },
    #[error("cell underflow: wanted {wanted} bits, {left} left")]
    BitUnderflow { wanted: usize, left: usize },
    #[error("cell underflow: no reference left")]
    RefUnderflow,
    #[error("dictionary has no entry for key {0}")]
    MissingKey(i64),
    #[error("invalid dictionary: {0}")]
    Dictionary(String),
    #[error("not a shard descriptor (tag 0x{0:x})")]
    BadTag(u64),
    #[error("bin-tree deeper than {0} levels")]
    TooDeep(usize),
    #[error("bin-tree reaches cell {0} more than once")]
    SharedCell(usize),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Umbrella error for one engine step.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("rpc {op}: {source}")]
    Rpc {
        op: &'static str,
        #[source]
        source: RpcError,
    },
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("lock: {0}")]
    Lock(#[from] LockError),
}

impl WatcherError {
    /// Timeouts and dropped connections; everything else points at bad data
    /// or a broken dependency.
    pub fn is_transient(&self) -> bool {
        match self {
            WatcherError::Rpc { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub fn rpc(op: &'static str) -> impl FnOnce(RpcError) -> WatcherError {
        move |source| WatcherError::Rpc { op, source }
    }
}

pub type WatcherResult<T> = Result<T, WatcherError>;
