use super::{BlockRef, BlockTransaction, LiteTransport, TransactionPage};
use crate::{error::RpcError, utils::Fingerprint};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Lite-server error code for blocks the node does not have (yet).
const LITE_SERVER_NOT_FOUND: i64 = 651;

/// JSON-RPC 2.0 over HTTP POST.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    request_timeout: Duration,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct MasterchainInfo {
    last: BlockRef,
}

#[derive(Debug, Deserialize)]
struct ShardsInfo {
    data: String,
}

#[derive(Debug, Deserialize)]
struct TxList {
    #[serde(default)]
    incomplete: bool,
    ids: Vec<TxId>,
}

#[derive(Debug, Deserialize)]
struct TxId {
    account: String,
    lt: LogicalTime,
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LogicalTime {
    Text(String),
    Number(u64),
}

impl HttpTransport {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            request_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    fn map_reqwest(&self, e: reqwest::Error) -> RpcError {
        if e.is_timeout() {
            RpcError::Timeout(self.request_timeout)
        } else if e.is_decode() {
            RpcError::Protocol(e.to_string())
        } else {
            RpcError::Transport(e.to_string())
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(RpcError::Transport(format!("http status {status}")));
        }
        let envelope: RpcEnvelope =
            resp.json().await.map_err(|e| self.map_reqwest(e))?;
        parse_envelope(envelope)
    }
}

fn parse_envelope<T: DeserializeOwned>(
    envelope: RpcEnvelope,
) -> Result<T, RpcError> {
    if let Some(err) = envelope.error {
        return Err(classify_error(err.code, &err.message));
    }
    let result = envelope
        .result
        .ok_or_else(|| RpcError::Protocol("missing result".into()))?;
    serde_json::from_value(result)
        .map_err(|e| RpcError::Protocol(e.to_string()))
}

fn classify_error(code: i64, message: &str) -> RpcError {
    let lower = message.to_ascii_lowercase();
    if code == LITE_SERVER_NOT_FOUND
        || lower.contains("not found")
        || lower.contains("not in db")
    {
        RpcError::NotFound
    } else {
        RpcError::Protocol(format!("{code}: {message}"))
    }
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, RpcError> {
    STANDARD
        .decode(value)
        .map_err(|e| RpcError::Protocol(format!("{field}: {e}")))
}

fn decode_tx(id: TxId) -> Result<BlockTransaction, RpcError> {
    let account = Fingerprint::from_slice(&decode_b64("account", &id.account)?)
        .map_err(|e| RpcError::Protocol(e.to_string()))?;
    let lt = match id.lt {
        LogicalTime::Number(n) => n,
        LogicalTime::Text(s) => s
            .parse()
            .map_err(|_| RpcError::Protocol(format!("lt: {s}")))?,
    };
    let hash: [u8; 32] =
        decode_b64("hash", &id.hash)?.try_into().map_err(|v: Vec<u8>| {
            RpcError::Protocol(format!("hash: {} bytes", v.len()))
        })?;
    Ok(BlockTransaction { account, lt, hash })
}

#[async_trait]
impl LiteTransport for HttpTransport {
    /// HTTP is connectionless; a head query doubles as the health check.
    async fn connect(&self) -> Result<(), RpcError> {
        self.masterchain_info().await.map(|_| ())
    }

    async fn masterchain_info(&self) -> Result<BlockRef, RpcError> {
        let info: MasterchainInfo =
            self.request("getMasterchainInfo", json!({})).await?;
        Ok(info.last)
    }

    async fn all_shards_info(
        &self,
        head: &BlockRef,
    ) -> Result<Vec<u8>, RpcError> {
        let info: ShardsInfo =
            self.request("getAllShardsInfo", json!({ "id": head })).await?;
        decode_b64("data", &info.data)
    }

    async fn lookup_block(
        &self,
        workchain: i32,
        shard: i64,
        seqno: u32,
    ) -> Result<BlockRef, RpcError> {
        self.request(
            "lookupBlock",
            json!({ "workchain": workchain, "shard": shard, "seqno": seqno }),
        )
        .await
    }

    async fn list_block_transactions(
        &self,
        block: &BlockRef,
        count: u32,
    ) -> Result<TransactionPage, RpcError> {
        let list: TxList = self
            .request(
                "listBlockTransactions",
                json!({ "id": block, "count": count }),
            )
            .await?;
        let transactions = list
            .ids
            .into_iter()
            .map(decode_tx)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TransactionPage {
            transactions,
            incomplete: list.incomplete,
        })
    }
}
