//! Health-aware RPC connection pool
//!
//! Keeps a set of endpoints with per-endpoint health statistics, hands out
//! connections round-robin among the healthy ones, and runs a periodic
//! liveness probe as a cancellable background task. Unhealthy endpoints are
//! skipped until probe successes decay their error count back under the
//! threshold.

pub mod endpoint;

pub use endpoint::{EndpointHealth, PooledEndpoint, FAILURE_THRESHOLD};

use futures::stream::{self, StreamExt};
use solana_client::nonblocking::rpc_client::RpcClient;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EndpointsConfig;
use crate::error::{Error, Result};

/// Delay unit for the linear retry backoff inside `execute`
const RETRY_BACKOFF_MS: u64 = 100;

/// Health notifications published by the pool
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// An endpoint crossed the failure threshold, or recovered
    HealthChanged { url: String, healthy: bool },
    /// Aggregate snapshot emitted after each probe round
    Snapshot(PoolHealthSnapshot),
}

/// Aggregate pool health at a point in time
#[derive(Debug, Clone)]
pub struct PoolHealthSnapshot {
    pub healthy: usize,
    pub total: usize,
    pub endpoints: Vec<EndpointHealth>,
}

/// Options for a single `execute` call
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Retry attempts after the first (pool default when None)
    pub retries: Option<u32>,
    /// Route to the lowest-latency healthy endpoint instead of round-robin
    pub priority: bool,
}

/// Options for `batch_execute`
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    pub fail_fast: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 4,
            fail_fast: false,
        }
    }
}

/// Health-aware, round-robin RPC endpoint pool
pub struct ConnectionPool {
    endpoints: RwLock<Vec<Arc<PooledEndpoint>>>,
    cursor: AtomicUsize,
    request_timeout: Duration,
    max_retries: u32,
    health_check_interval: Duration,
    load_balancing: bool,
    events_tx: broadcast::Sender<PoolEvent>,
    cancel: CancellationToken,
}

impl ConnectionPool {
    pub fn new(urls: &[String], config: &EndpointsConfig) -> Self {
        let request_timeout = config.request_timeout();
        let endpoints = urls
            .iter()
            .map(|url| Arc::new(PooledEndpoint::new(url.clone(), request_timeout)))
            .collect();

        let (events_tx, _) = broadcast::channel(64);

        Self {
            endpoints: RwLock::new(endpoints),
            cursor: AtomicUsize::new(0),
            request_timeout,
            max_retries: config.max_retries,
            health_check_interval: config.health_check_interval(),
            load_balancing: config.load_balancing,
            events_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to health change events and probe snapshots
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events_tx.subscribe()
    }

    /// Pick the next healthy endpoint, round-robin with wrap-around.
    /// Fails with `NoHealthyEndpoint` when every endpoint is down.
    pub async fn get_connection(&self) -> Result<Arc<PooledEndpoint>> {
        self.select(false).await
    }

    async fn select(&self, priority: bool) -> Result<Arc<PooledEndpoint>> {
        let endpoints = self.endpoints.read().await;
        let total = endpoints.len();
        if total == 0 {
            return Err(Error::NoHealthyEndpoint {
                total: 0,
                unhealthy: 0,
            });
        }

        if priority {
            // Latency-priority routing: cheapest healthy endpoint wins
            if let Some(ep) = endpoints
                .iter()
                .filter(|ep| ep.is_healthy())
                .min_by_key(|ep| ep.health().latency_ms)
            {
                return Ok(ep.clone());
            }
        } else {
            let start = if self.load_balancing {
                self.cursor.fetch_add(1, Ordering::Relaxed)
            } else {
                0
            };

            for i in 0..total {
                let ep = &endpoints[(start + i) % total];
                if ep.is_healthy() {
                    return Ok(ep.clone());
                }
            }
        }

        let unhealthy = endpoints.iter().filter(|ep| !ep.is_healthy()).count();
        Err(Error::NoHealthyEndpoint { total, unhealthy })
    }

    /// Run an operation against a pool endpoint with retry and failover.
    ///
    /// Each failure moves on to the next endpoint after a linearly growing
    /// backoff; the last error surfaces once attempts are exhausted.
    pub async fn execute<T, F, Fut>(&self, op: F, opts: ExecuteOptions) -> Result<T>
    where
        F: Fn(Arc<RpcClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retries = opts.retries.unwrap_or(self.max_retries);
        let mut last_err: Option<Error> = None;

        for attempt in 0..=retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
            }

            let endpoint = match self.select(opts.priority).await {
                Ok(ep) => ep,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };

            let started = Instant::now();
            match tokio::time::timeout(self.request_timeout, op(endpoint.client())).await {
                Ok(Ok(value)) => {
                    let latency = started.elapsed().as_millis() as u64;
                    if endpoint.record_success(latency) {
                        self.emit_health_change(&endpoint, true);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    debug!(url = endpoint.url(), attempt, error = %e, "request failed");
                    if endpoint.record_failure(&e.to_string()) {
                        self.emit_health_change(&endpoint, false);
                    }
                    last_err = Some(e);
                }
                Err(_) => {
                    let e = Error::RpcTimeout(self.request_timeout.as_millis() as u64);
                    if endpoint.record_failure(&e.to_string()) {
                        self.emit_health_change(&endpoint, false);
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Internal("execute exhausted without attempts".into())))
    }

    /// Run many operations in bounded batches.
    ///
    /// Operations are partitioned into `batch_size` chunks with at most
    /// `concurrency` in flight. Each operation gets a single attempt; with
    /// `fail_fast` the first failure aborts the remaining batches, otherwise
    /// failures are collected in place.
    pub async fn batch_execute<T, F, Fut>(
        &self,
        ops: Vec<F>,
        opts: BatchOptions,
    ) -> Result<Vec<Result<T>>>
    where
        F: Fn(Arc<RpcClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let batch_size = opts.batch_size.max(1);
        let concurrency = opts.concurrency.max(1);
        let mut results: Vec<Result<T>> = Vec::with_capacity(ops.len());

        let mut ops = ops.into_iter().peekable();
        while ops.peek().is_some() {
            let chunk: Vec<F> = ops.by_ref().take(batch_size).collect();

            let mut batch: Vec<(usize, Result<T>)> = stream::iter(chunk.into_iter().enumerate())
                .map(|(i, op)| async move {
                    let single = ExecuteOptions {
                        retries: Some(0),
                        priority: false,
                    };
                    (i, self.execute(op, single).await)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            batch.sort_by_key(|(i, _)| *i);

            let mut failed = None;
            for (_, result) in batch {
                if result.is_err() && failed.is_none() {
                    failed = Some(results.len());
                }
                results.push(result);
            }

            if opts.fail_fast {
                if let Some(idx) = failed {
                    let err = match results.remove(idx) {
                        Err(e) => e,
                        Ok(_) => Error::Internal("batch bookkeeping out of sync".into()),
                    };
                    return Err(err);
                }
            }
        }

        Ok(results)
    }

    /// Add an endpoint; a URL already in the pool is a no-op
    pub async fn add_endpoint(&self, url: &str) {
        let mut endpoints = self.endpoints.write().await;
        if endpoints.iter().any(|ep| ep.url() == url) {
            return;
        }
        endpoints.push(Arc::new(PooledEndpoint::new(
            url.to_string(),
            self.request_timeout,
        )));
        info!(url, "endpoint added to pool");
    }

    /// Remove an endpoint; an unknown URL is a no-op
    pub async fn remove_endpoint(&self, url: &str) {
        let mut endpoints = self.endpoints.write().await;
        let before = endpoints.len();
        endpoints.retain(|ep| ep.url() != url);
        if endpoints.len() != before {
            info!(url, "endpoint removed from pool");
        }
    }

    /// Start the periodic liveness probe. Stopped via `shutdown`.
    pub fn start_health_checks(self: Arc<Self>) {
        let token = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.health_check_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("health probe stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.probe_all().await;
                    }
                }
            }
        });
    }

    /// Cancel the probe task
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Probe every endpoint once with a lightweight liveness call and emit
    /// an aggregate snapshot
    pub async fn probe_all(&self) {
        let endpoints: Vec<Arc<PooledEndpoint>> = self.endpoints.read().await.clone();

        for endpoint in &endpoints {
            let started = Instant::now();
            let result =
                tokio::time::timeout(self.request_timeout, endpoint.client().get_slot()).await;
            endpoint.touch_check();

            match result {
                Ok(Ok(slot)) => {
                    let latency = started.elapsed().as_millis() as u64;
                    debug!(url = endpoint.url(), slot, latency_ms = latency, "probe ok");
                    if endpoint.record_success(latency) {
                        self.emit_health_change(endpoint, true);
                    }
                }
                Ok(Err(e)) => {
                    warn!(url = endpoint.url(), error = %e, "probe failed");
                    if endpoint.record_failure(&e.to_string()) {
                        self.emit_health_change(endpoint, false);
                    }
                }
                Err(_) => {
                    warn!(url = endpoint.url(), "probe timed out");
                    if endpoint.record_failure("probe timeout") {
                        self.emit_health_change(endpoint, false);
                    }
                }
            }
        }

        let snapshot = self.stats().await;
        info!(
            healthy = snapshot.healthy,
            total = snapshot.total,
            "pool health snapshot"
        );
        let _ = self.events_tx.send(PoolEvent::Snapshot(snapshot));
    }

    /// Aggregate health snapshot for the stats surface
    pub async fn stats(&self) -> PoolHealthSnapshot {
        let endpoints = self.endpoints.read().await;
        let details: Vec<EndpointHealth> = endpoints.iter().map(|ep| ep.health()).collect();
        PoolHealthSnapshot {
            healthy: details.iter().filter(|h| h.healthy).count(),
            total: details.len(),
            endpoints: details,
        }
    }

    fn emit_health_change(&self, endpoint: &PooledEndpoint, healthy: bool) {
        if healthy {
            info!(url = endpoint.url(), "endpoint recovered");
        } else {
            warn!(url = endpoint.url(), "endpoint marked unhealthy");
        }
        let _ = self.events_tx.send(PoolEvent::HealthChanged {
            url: endpoint.url().to_string(),
            healthy,
        });
    }
}
