//! Insider watcher orchestration and stream loop.

use std::{sync::Arc, time::Duration};

use alloy::{
    providers::{DynProvider, ProviderBuilder},
    rpc::client::RpcClient,
    transports::layers::RetryBackoffLayer,
};
use insider_watch::{
    Chain,
    classify::ClassificationObserver,
    persist::{CheckpointFile, FileStore},
    pipeline::{Pipeline, PipelineBuilder, PipelineConfig},
    stream,
    types::{FIXED_POINT_SCALE, TraderId, TraderWindowEntry},
    window::Windowed,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{config::EnvConfig, error::Result};

/// Delay before the fill stream is restarted after it failed.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Logs classification decisions.
struct LogObserver;

impl ClassificationObserver for LogObserver {
    fn on_insider(&mut self, trader: &TraderId, entry: &TraderWindowEntry) {
        info!(
            %trader,
            volume_usdc = entry.volume() / FIXED_POINT_SCALE,
            trades = entry.trade_count(),
            assets = entry.assets().len(),
            first_seen = entry.first_seen(),
            "Insider detected"
        );
    }

    fn on_not_insider(&mut self, trader: &TraderId, entry: &TraderWindowEntry) {
        debug!(
            %trader,
            volume_usdc = entry.volume() / FIXED_POINT_SCALE,
            trades = entry.trade_count(),
            "Trader classified as not insider"
        );
    }
}

/// Insider watcher.
#[derive(Debug)]
pub struct InsiderWatcher {
    provider: DynProvider,
    chain: Chain,
    pipeline: Pipeline,
}

impl InsiderWatcher {
    /// Connects to the node and restores classification state.
    pub async fn try_new(env: &EnvConfig, config: PipelineConfig) -> Result<Self> {
        let node_url = Url::parse(&env.node_rpc_url)?;
        let chain = match (env.chain_id, env.exchange_addresses()?) {
            (None, None) => Chain::polygon(),
            (chain_id, exchanges) => Chain::custom(
                chain_id.unwrap_or(Chain::polygon().chain_id()),
                exchanges.unwrap_or_else(|| Chain::polygon().exchanges().to_vec()),
            ),
        };
        info!(
            chain_id = chain.chain_id(),
            exchanges = ?chain.exchanges(),
            window_secs = config.window.as_secs(),
            volume_threshold = config.volume_threshold,
            min_price_bps = config.min_price_bps,
            "Initializing Insider Watcher"
        );

        let client = RpcClient::builder()
            .layer(RetryBackoffLayer::new(10, 100, 200))
            .http(node_url);
        client.set_poll_interval(env.poll_interval());
        let provider = DynProvider::new(ProviderBuilder::new().connect_client(client));

        let store = FileStore::open(&env.snapshot_dir).await?;
        let mut builder = PipelineBuilder::new(config, Arc::new(store)).with_observer(LogObserver);
        if let Some(path) = &env.checkpoint_path {
            builder = builder.with_checkpoint(CheckpointFile::new(path));
        }
        let pipeline = builder.build().await;

        Ok(Self {
            provider,
            chain,
            pipeline,
        })
    }

    /// Feeds the fill stream into the pipeline, restarting the stream from the
    /// last processed block whenever it fails.
    pub async fn run(&mut self) {
        loop {
            let from_block = self.pipeline.resume_from();
            info!(from_block, "Starting fill stream");

            let fills = stream::fills(
                &self.chain,
                self.provider.clone(),
                from_block,
                tokio::time::sleep,
            );
            match self.pipeline.run(fills).await {
                Ok(()) => warn!("Fill stream closed unexpectedly, restarting..."),
                Err(e) => error!(?e, "Error in fill stream, will auto-restart"),
            }

            let status = self.pipeline.persistor_status().await;
            debug!(?status, "Snapshot writer status");
            tokio::time::sleep(RESTART_DELAY).await;
        }
    }

    /// Saves the final snapshot and waits for it to be written.
    pub async fn shutdown(self) {
        let counts = self.pipeline.shutdown().await;
        info!(
            insiders = counts.insider,
            not_insiders = counts.not_insider,
            "Insider Watcher stopped"
        );
    }
}
