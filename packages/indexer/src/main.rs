//! lpwatch
//!
//! Runs the scan loop and the market-cap loop until Ctrl-C or SIGTERM.

use std::sync::Arc;

use lpwatch_indexer::config::IndexerConfig;
use lpwatch_indexer::context::IndexerContext;
use lpwatch_indexer::ledger::AlloyLedger;
use lpwatch_indexer::notifier::HttpWebhook;
use lpwatch_indexer::redis_store::RedisStore;
use lpwatch_indexer::rpc::{RpcConfig, RpcConnection};
use lpwatch_indexer::scheduler::Scheduler;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = IndexerConfig::from_env()?;
    info!(
        network = config.network.name(),
        namespace = %config.namespace,
        contract = %config.scan.contract,
        "Starting lpwatch"
    );

    let store = RedisStore::new(&config.redis_url)?;
    // An unreachable Redis is not fatal: each iteration reconnects and fails on its own.
    if let Err(e) = store.ping().await {
        warn!("Redis is not reachable yet: {}", e);
    }

    // Nor is an unreachable node: retry until it answers or a shutdown arrives.
    let mut rpc = RpcConnection::new(RpcConfig::new(config.rpc_url.clone()).unbounded());
    let provider = tokio::select! {
        provider = rpc.connect_with_retry() => provider?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received before the node connected");
            return Ok(());
        }
    };

    let webhook = Arc::new(HttpWebhook::new(config.alert.webhook_url.clone())?);
    let scan_interval = config.scan.interval;
    let aggregate_interval = config.pricing.interval;

    let ctx = IndexerContext::new(config, Arc::new(store), Arc::new(AlloyLedger::new(provider)));
    let scanner = Arc::new(ctx.scanner()?);
    let market_cap = Arc::new(ctx.market_cap_job(webhook));

    let mut scheduler = Scheduler::new();
    scheduler.spawn(scanner, scan_interval);
    scheduler.spawn(market_cap, aggregate_interval);

    shutdown_signal().await;
    info!("Shutdown signal received, stopping jobs");
    scheduler.shutdown().await;
    drop(ctx);
    info!("Stopped");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
