//! Per-endpoint liveness, latency and error tracking

use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Consecutive-failure count at which an endpoint is flagged unhealthy
pub const FAILURE_THRESHOLD: u64 = 5;

/// One RPC endpoint with its health statistics.
///
/// Counters are atomics and the text/time fields sit behind a lock, so the
/// same endpoint can be hammered by concurrent `execute` calls and the
/// periodic probe without coordination.
pub struct PooledEndpoint {
    url: String,
    client: Arc<RpcClient>,
    healthy: AtomicBool,
    latency_ms: AtomicU64,
    error_count: AtomicU64,
    request_count: AtomicU64,
    last_error: RwLock<Option<String>>,
    last_check: RwLock<DateTime<Utc>>,
}

impl PooledEndpoint {
    pub fn new(url: String, request_timeout: Duration) -> Self {
        let client = Arc::new(RpcClient::new_with_timeout(url.clone(), request_timeout));
        Self {
            url,
            client,
            healthy: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
            last_error: RwLock::new(None),
            last_check: RwLock::new(Utc::now()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client(&self) -> Arc<RpcClient> {
        self.client.clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Record a successful request. The error count decays by exactly one,
    /// never resetting outright, so a flapping endpoint has to earn its way
    /// back. Returns true when this success flipped the endpoint healthy.
    pub fn record_success(&self, latency_ms: u64) -> bool {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.latency_ms.store(latency_ms, Ordering::Relaxed);

        let _ = self
            .error_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                Some(count.saturating_sub(1))
            });

        let below = self.error_count.load(Ordering::Relaxed) < FAILURE_THRESHOLD;
        below && !self.healthy.swap(below, Ordering::Relaxed)
    }

    /// Record a failed request. Returns true when this failure crossed the
    /// threshold and flipped the endpoint unhealthy.
    pub fn record_failure(&self, error: &str) -> bool {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let count = self.error_count.fetch_add(1, Ordering::Relaxed) + 1;

        if let Ok(mut last) = self.last_error.write() {
            *last = Some(error.to_string());
        }

        if count >= FAILURE_THRESHOLD {
            // swap returns the previous value; only the transition reports true
            self.healthy.swap(false, Ordering::Relaxed)
        } else {
            false
        }
    }

    /// Stamp the time of the latest health probe
    pub fn touch_check(&self) {
        if let Ok(mut check) = self.last_check.write() {
            *check = Utc::now();
        }
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of this endpoint's statistics
    pub fn health(&self) -> EndpointHealth {
        EndpointHealth {
            url: self.url.clone(),
            healthy: self.is_healthy(),
            latency_ms: self.latency_ms.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            request_count: self.request_count.load(Ordering::Relaxed),
            last_error: self.last_error.read().ok().and_then(|e| e.clone()),
            last_check: self.last_check.read().map(|c| *c).unwrap_or_else(|_| Utc::now()),
        }
    }
}

impl std::fmt::Debug for PooledEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledEndpoint")
            .field("url", &self.url)
            .field("healthy", &self.is_healthy())
            .field("error_count", &self.error_count())
            .finish_non_exhaustive()
    }
}

/// Serializable endpoint statistics, emitted with health snapshots
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub url: String,
    pub healthy: bool,
    pub latency_ms: u64,
    pub error_count: u64,
    pub request_count: u64,
    pub last_error: Option<String>,
    pub last_check: DateTime<Utc>,
}
