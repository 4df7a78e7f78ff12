use eyre::Result;
use std::sync::Arc;
use ton_watcher::{
    api::{AppState, listen_app},
    chain::providers,
    tools,
    tracking::TrackingService,
    watcher::{Watcher, listen_chain},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ton_watcher::config::init_from_env()?;
    ton_watcher::logging::init();

    let store = tools::connect_store(config).await?;
    let filter = tools::build_filter(config);
    let (publisher, lock) = tools::build_outputs(config).await?;
    let client = providers::build_client(config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!("received Ctrl+C, shutting down");
            }
            cancel.cancel();
        });
    }

    let api = config.api_enabled.then(|| {
        let state = AppState {
            tracking: TrackingService::new(store.clone(), filter.clone()),
            store: store.clone(),
            client: client.clone(),
        };
        tokio::spawn(listen_app(config.api_bind, state, cancel.clone()))
    });

    let watcher =
        Watcher::from_config(config, client, store, filter, publisher, lock);
    let chain = listen_chain(watcher, cancel.clone()).await;
    // a dead pipeline takes the api down with it
    cancel.cancel();
    if let Some(api) = api {
        match api.await {
            Ok(Err(e)) => tracing::error!(error = ?e, "api failed"),
            Err(e) => tracing::error!(error = %e, "api task panicked"),
            Ok(Ok(())) => {}
        }
    }
    chain?;
    tracing::info!("shutdown complete");
    Ok(())
}
