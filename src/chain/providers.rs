use super::{ClientSettings, ResilientClient, http::HttpTransport};
use crate::config::{Config, RpcSettings};
use eyre::Result;
use std::sync::Arc;

impl From<&RpcSettings> for ClientSettings {
    fn from(rpc: &RpcSettings) -> Self {
        ClientSettings {
            rate_per_sec: rpc.rate_limit,
            queue_limit: rpc.queue_limit,
            call_timeout: rpc.call_timeout,
            reconnect_wait: rpc.reconnect_wait,
        }
    }
}

/// Builds the single shared lite-server client. Both engines and the status
/// endpoint must use this instance so that all calls pass one rate gate.
pub fn build_client(config: &Config) -> Result<Arc<ResilientClient>> {
    let transport =
        HttpTransport::new(&config.lite_rpc_url, config.rpc.call_timeout)?;
    tracing::info!(url = %config.lite_rpc_url, "lite-server client configured");
    Ok(Arc::new(ResilientClient::new(
        Arc::new(transport),
        ClientSettings::from(&config.rpc),
    )))
}
