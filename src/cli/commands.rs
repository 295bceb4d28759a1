//! CLI command implementations

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::TxCache;
use crate::config::Config;
use crate::executor::{ExecutionOrchestrator, LogSink};
use crate::pool::ConnectionPool;
use crate::sender::{PrioritySender, RelayClient};

/// Start the execution pipeline
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    if dry_run {
        warn!("Running in DRY-RUN mode - nothing will be broadcast");
    }

    info!("Starting emergency execution pipeline...");

    // Connection pools: primary carries normal traffic, backup is reserved
    // for critical-urgency strategies
    let pool = Arc::new(ConnectionPool::new(
        &config.endpoints.primary,
        &config.endpoints,
    ));
    let backup_pool = if config.endpoints.backup.is_empty() {
        None
    } else {
        Some(Arc::new(ConnectionPool::new(
            &config.endpoints.backup,
            &config.endpoints,
        )))
    };

    pool.clone().start_health_checks();
    if let Some(backup) = &backup_pool {
        backup.clone().start_health_checks();
    }

    // Protected relay client
    let relay = if config.relay.enabled {
        Some(RelayClient::new(config.relay.clone())?)
    } else {
        info!("relay submission disabled by configuration");
        None
    };

    // Precomputed transaction cache
    let cache = Arc::new(TxCache::open(&config.cache));

    // Priority sender over the pools
    let mut sender = PrioritySender::new(pool.clone(), backup_pool.clone(), relay);
    if dry_run {
        sender = sender.dry_run();
    }
    let sender = Arc::new(sender);

    // Orchestrator on top
    let orchestrator = Arc::new(ExecutionOrchestrator::new(
        cache,
        sender,
        Arc::new(LogSink),
        config.executor.clone(),
        config.fees.clone(),
    ));
    orchestrator.clone().start();

    info!(
        endpoints = config.endpoints.primary.len(),
        backup = config.endpoints.backup.len(),
        max_concurrent = config.executor.max_concurrent,
        "pipeline running, waiting for execution requests"
    );

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    orchestrator.shutdown();
    pool.shutdown();
    if let Some(backup) = &backup_pool {
        backup.shutdown();
    }

    let stats = orchestrator.stats();
    info!(
        processed = stats.processed,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "final statistics"
    );

    Ok(())
}

/// Probe every configured endpoint once and print the health snapshot
pub async fn health(config: &Config) -> Result<()> {
    info!("Checking endpoint health...");

    let pool = Arc::new(ConnectionPool::new(
        &config.endpoints.primary,
        &config.endpoints,
    ));
    pool.probe_all().await;

    let snapshot = pool.stats().await;
    println!("Endpoints healthy: {}/{}", snapshot.healthy, snapshot.total);
    for ep in &snapshot.endpoints {
        println!(
            "  {} - {} (latency {}ms, errors {}, requests {})",
            ep.url,
            if ep.healthy { "healthy" } else { "UNHEALTHY" },
            ep.latency_ms,
            ep.error_count,
            ep.request_count,
        );
        if let Some(err) = &ep.last_error {
            println!("      last error: {}", err);
        }
    }

    if !config.endpoints.backup.is_empty() {
        let backup = Arc::new(ConnectionPool::new(
            &config.endpoints.backup,
            &config.endpoints,
        ));
        backup.probe_all().await;
        let snapshot = backup.stats().await;
        println!(
            "Backup endpoints healthy: {}/{}",
            snapshot.healthy, snapshot.total
        );
    }

    Ok(())
}

/// Print the effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{:#?}", config);
    Ok(())
}
