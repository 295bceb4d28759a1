//! Execution orchestrator
//!
//! Accepts execution requests, deduplicates them per (wallet, token) key,
//! reads the presigned payload from the cache, and drives the retry loop
//! with fee escalation against a hard deadline. A trailing-window circuit
//! breaker rejects work during sustained failure before any network I/O.
//!
//! Per-key lifecycle: IDLE -> QUEUED -> EXECUTING -> terminal -> IDLE.
//! A key that is already queued or executing swallows further requests, so
//! at most one execution is ever in flight per key. Cross-key throughput is
//! bounded by a worker semaphore; excess requests wait in FIFO order.

pub mod breaker;
pub mod sink;
pub mod strategy;

pub use breaker::{BreakerState, CircuitBreaker};
pub use sink::{ExecutionSink, LogSink};
pub use strategy::{strategies_for, ExecutionStrategy, StrategyKind};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{TxCache, TxClass};
use crate::config::{ExecutorConfig, FeeConfig};
use crate::error::{Error, Result};
use crate::sender::{DeliveryConfig, PrioritySender};
use crate::types::{ExecutionRecord, ExecutionRequest, ExecutionResult, ThreatEvent};

/// Per-key state while a request is alive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Queued,
    Executing,
}

struct QueuedRequest {
    request: ExecutionRequest,
    queued_at: DateTime<Utc>,
}

/// Local statistics surface
#[derive(Debug, Clone)]
pub struct OrchestratorStats {
    pub queue_size: usize,
    pub active: usize,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub breaker: BreakerState,
}

/// Top-level execution pipeline
pub struct ExecutionOrchestrator {
    config: ExecutorConfig,
    fees: FeeConfig,
    cache: Arc<TxCache>,
    sender: Arc<PrioritySender>,
    sink: Arc<dyn ExecutionSink>,
    breaker: CircuitBreaker,

    states: DashMap<String, KeyState>,
    queue_tx: mpsc::Sender<QueuedRequest>,
    queue_rx: Mutex<Option<mpsc::Receiver<QueuedRequest>>>,
    semaphore: Arc<Semaphore>,
    results_tx: broadcast::Sender<ExecutionResult>,

    queue_depth: AtomicUsize,
    active: AtomicUsize,
    total_succeeded: AtomicU64,
    total_failed: AtomicU64,
    window_succeeded: AtomicU64,
    window_failed: AtomicU64,

    cancel: CancellationToken,
}

impl ExecutionOrchestrator {
    pub fn new(
        cache: Arc<TxCache>,
        sender: Arc<PrioritySender>,
        sink: Arc<dyn ExecutionSink>,
        config: ExecutorConfig,
        fees: FeeConfig,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (results_tx, _) = broadcast::channel(256);
        let breaker = CircuitBreaker::new(config.breaker_threshold, config.breaker_window());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));

        Self {
            config,
            fees,
            cache,
            sender,
            sink,
            breaker,
            states: DashMap::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            semaphore,
            results_tx,
            queue_depth: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            total_succeeded: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            window_succeeded: AtomicU64::new(0),
            window_failed: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to terminal execution results
    pub fn subscribe_results(&self) -> broadcast::Receiver<ExecutionResult> {
        self.results_tx.subscribe()
    }

    /// Seed the circuit breaker from persisted outcomes after a restart
    pub fn seed_outcomes(&self, outcomes: &[(DateTime<Utc>, bool)]) {
        let now = Utc::now();
        let seeded = outcomes.iter().filter_map(|(at, success)| {
            let age = (now - *at).to_std().ok()?;
            Some((Instant::now().checked_sub(age)?, *success))
        });
        self.breaker.seed(seeded);
        info!(count = outcomes.len(), "circuit breaker seeded from history");
    }

    /// Queue a request. Returns false when the key is already queued or
    /// executing, and rejects outright while the circuit breaker is open.
    pub fn queue_request(&self, request: ExecutionRequest) -> Result<bool> {
        if self.breaker.is_open() {
            return Err(Error::CircuitBreakerOpen {
                failures: self.breaker.failures(),
            });
        }

        let key = request.key();
        match self.states.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                debug!(%key, "duplicate request ignored");
                Ok(false)
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(KeyState::Queued);

                let queued = QueuedRequest {
                    request,
                    queued_at: Utc::now(),
                };
                match self.queue_tx.try_send(queued) {
                    Ok(()) => {
                        self.queue_depth.fetch_add(1, Ordering::Relaxed);
                        Ok(true)
                    }
                    Err(e) => {
                        self.states.remove(&key);
                        Err(Error::Internal(format!("execution queue refused request: {}", e)))
                    }
                }
            }
        }
    }

    /// Turn a detector threat event into a queued execution
    pub fn handle_threat(
        &self,
        event: ThreatEvent,
        amount_to_sell: u64,
        min_acceptable_output: u64,
    ) -> Result<bool> {
        let request = ExecutionRequest::from_threat(event, amount_to_sell, min_acceptable_output);
        info!(
            wallet = %request.wallet_address,
            mint = %request.token_mint,
            urgency = ?request.urgency,
            reason = %request.reason,
            "threat accepted for execution"
        );
        self.queue_request(request)
    }

    /// Start the dispatch and alert loops. Stopped via `shutdown`.
    pub fn start(self: Arc<Self>) {
        let orch = Arc::clone(&self);
        tokio::spawn(orch.dispatch_loop());
        tokio::spawn(self.alert_loop());
    }

    /// Stop accepting work and wind down the loops
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn stats(&self) -> OrchestratorStats {
        let succeeded = self.total_succeeded.load(Ordering::Relaxed);
        let failed = self.total_failed.load(Ordering::Relaxed);
        let processed = succeeded + failed;
        OrchestratorStats {
            queue_size: self.queue_depth.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            processed,
            succeeded,
            failed,
            success_rate: if processed == 0 {
                1.0
            } else {
                succeeded as f64 / processed as f64
            },
            breaker: self.breaker.state(),
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let mut queue_rx = match self.queue_rx.lock().expect("queue receiver poisoned").take() {
            Some(rx) => rx,
            None => {
                error!("dispatch loop started twice");
                return;
            }
        };

        info!(
            max_concurrent = self.config.max_concurrent,
            "execution dispatch loop running"
        );

        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => break,
                item = queue_rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            self.queue_depth.fetch_sub(1, Ordering::Relaxed);

            // FIFO admission: the next request waits here for a free slot
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let orch = Arc::clone(&self);
            tokio::spawn(async move {
                orch.process(item).await;
                drop(permit);
            });
        }

        info!("execution dispatch loop stopped");
    }

    /// Run one queued request to its terminal result. This function never
    /// propagates an error: whatever happens inside becomes a FAILED result
    /// and the loop keeps going.
    async fn process(self: Arc<Self>, item: QueuedRequest) {
        let key = item.request.key();
        self.states.insert(key.clone(), KeyState::Executing);
        self.active.fetch_add(1, Ordering::Relaxed);

        let started_at = Utc::now();
        let started = Instant::now();

        // Isolate the execution in its own task so even a panic becomes a
        // structured failure instead of a stuck key
        let handle = {
            let orch = Arc::clone(&self);
            let request = item.request.clone();
            tokio::spawn(async move { orch.execute(&request, started).await })
        };

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(%key, error = %e, "execution task aborted");
                self.failed_result(&item.request, started, 0, format!("execution aborted: {}", e))
            }
        };

        self.breaker.record(result.success);
        if result.success {
            self.total_succeeded.fetch_add(1, Ordering::Relaxed);
            self.window_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
            self.window_failed.fetch_add(1, Ordering::Relaxed);
        }

        let record = ExecutionRecord {
            request: item.request,
            result: result.clone(),
            queued_at: item.queued_at,
            started_at,
        };
        if let Err(e) = self.sink.persist(&record).await {
            warn!(error = %e, "execution record persistence failed");
        }
        if let Err(e) = self.sink.notify(&result).await {
            warn!(error = %e, "result notification failed");
        }
        let _ = self.results_tx.send(result);

        self.active.fetch_sub(1, Ordering::Relaxed);
        self.states.remove(&key);
    }

    /// The execution pipeline for one request
    async fn execute(&self, request: &ExecutionRequest, started: Instant) -> ExecutionResult {
        // 1. Circuit breaker gate, before any network I/O
        if self.breaker.is_open() {
            let e = Error::CircuitBreakerOpen {
                failures: self.breaker.failures(),
            };
            return self.failed_result(request, started, 0, e.to_string());
        }

        // 2. Cache lookup; absence is final, nothing is synthesized here
        let cached = match self
            .cache
            .get(&request.token_mint, &request.wallet_address, TxClass::Emergency)
            .await
        {
            Some(entry) => entry,
            None => match self
                .cache
                .get(&request.token_mint, &request.wallet_address, TxClass::Swap)
                .await
            {
                Some(entry) => entry,
                None => {
                    let e = Error::NoCachedTransaction {
                        mint: request.token_mint.clone(),
                        wallet: request.wallet_address.clone(),
                    };
                    warn!(key = %request.key(), "no presigned transaction available");
                    return self.failed_result(request, started, 0, e.to_string());
                }
            },
        };

        let variants = self
            .cache
            .get_priority_variants(&request.token_mint, &request.wallet_address)
            .await;

        // 3. Base fee from the threat context
        let base_fee = strategy::scaled_base_fee(self.fees.base_priority_fee, request.threat.as_ref());

        // 4. Strategy list from urgency
        let strategies = strategies_for(request.urgency);

        // 5. Retry loop with fee escalation against the deadline
        let deadline = started + self.config.deadline();
        let mut attempts = 0u32;
        let mut last_err: Option<Error> = None;

        for attempt in 1..=self.config.max_retries.max(1) {
            let now = Instant::now();
            if now >= deadline {
                last_err = Some(Error::DeadlineExceeded(self.config.deadline_secs * 1000));
                break;
            }
            attempts = attempt;

            let strat = &strategies[((attempt - 1) as usize).min(strategies.len() - 1)];
            let fee = strategy::escalate(base_fee, attempt, self.fees.max_priority_fee);
            let remaining = deadline - now;

            debug!(
                key = %request.key(),
                attempt,
                strategy = strat.name,
                fee,
                "starting delivery attempt"
            );

            let delivery = DeliveryConfig {
                // Tip follows the escalated fee; the relay clamps it
                tip_lamports: fee,
                priority_fee: fee,
                confirmation_timeout: strat.confirmation_timeout.min(remaining),
                skip_preflight: strat.skip_preflight,
                use_backup_endpoint: strat.use_backup_endpoint,
            };

            let outcome = match strat.kind {
                StrategyKind::PrioritySender => self
                    .sender
                    .deliver(&cached.signed_payload, &variants, &delivery)
                    .await
                    .map(|o| (o.signature, o.endpoint.unwrap_or_else(|| o.channel.to_string()))),
                StrategyKind::DirectBroadcast => {
                    let mut result = Err(Error::BroadcastFailure("not attempted".into()));
                    for _ in 0..=strat.max_retries {
                        result = self
                            .sender
                            .send_and_confirm(
                                &cached.signed_payload,
                                strat.skip_preflight,
                                strat.use_backup_endpoint,
                                delivery.confirmation_timeout,
                            )
                            .await;
                        if result.is_ok() {
                            break;
                        }
                    }
                    result
                }
            };

            match outcome {
                Ok((signature, endpoint)) => {
                    // Confirmation on this path is a full fill; the partial
                    // threshold still gates acceptance for lower ratios
                    let percent_filled = 100.0;
                    if percent_filled >= self.config.partial_fill_threshold_pct {
                        return ExecutionResult {
                            id: Uuid::new_v4().to_string(),
                            wallet_address: request.wallet_address.clone(),
                            token_mint: request.token_mint.clone(),
                            success: true,
                            signature: Some(signature.to_string()),
                            amount_received: Some(request.min_acceptable_output),
                            percent_filled: Some(percent_filled),
                            slippage_bps: Some(cached.slippage_bps),
                            elapsed_ms: started.elapsed().as_millis() as u64,
                            endpoint_used: Some(endpoint),
                            attempts_made: attempts,
                            error: None,
                            finished_at: Utc::now(),
                        };
                    }
                    last_err = Some(Error::BroadcastFailure(format!(
                        "fill {}% under threshold {}%",
                        percent_filled, self.config.partial_fill_threshold_pct
                    )));
                }
                Err(e) => {
                    warn!(
                        key = %request.key(),
                        attempt,
                        strategy = strat.name,
                        error = %e,
                        "delivery attempt failed"
                    );
                    last_err = Some(e);
                }
            }

            tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
        }

        let error = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "retries exhausted".to_string());
        self.failed_result(request, started, attempts, error)
    }

    fn failed_result(
        &self,
        request: &ExecutionRequest,
        started: Instant,
        attempts: u32,
        error: String,
    ) -> ExecutionResult {
        ExecutionResult {
            id: Uuid::new_v4().to_string(),
            wallet_address: request.wallet_address.clone(),
            token_mint: request.token_mint.clone(),
            success: false,
            signature: None,
            amount_received: None,
            percent_filled: None,
            slippage_bps: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
            endpoint_used: None,
            attempts_made: attempts,
            error: Some(error),
            finished_at: Utc::now(),
        }
    }

    /// Periodic aggregate alert: a processing window with more failures than
    /// successes (and more than five failures) is worth shouting about
    async fn alert_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.alert_interval_secs.max(1)));
        interval.tick().await; // discard the immediate first tick

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let failed = self.window_failed.swap(0, Ordering::Relaxed);
                    let succeeded = self.window_succeeded.swap(0, Ordering::Relaxed);
                    if failed > succeeded && failed > 5 {
                        error!(
                            failed,
                            succeeded,
                            breaker = ?self.breaker.state(),
                            "execution failure ratio exceeded threshold"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ExitRoute, TxMeta};
    use crate::config::EndpointsConfig;
    use crate::pool::ConnectionPool;
    use crate::types::UrgencyLevel;
    use solana_sdk::hash::Hash;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::Keypair;
    use solana_sdk::signer::Signer;
    use solana_sdk::system_instruction;
    use solana_sdk::transaction::{Transaction, VersionedTransaction};

    fn signed_payload() -> Vec<u8> {
        let payer = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&payer.pubkey()),
            &[&payer],
            Hash::default(),
        );
        bincode::serialize(&VersionedTransaction::from(tx)).unwrap()
    }

    fn test_request(wallet: &str, mint: &str) -> ExecutionRequest {
        ExecutionRequest {
            wallet_address: wallet.into(),
            token_mint: mint.into(),
            amount_to_sell: 1_000,
            min_acceptable_output: 900,
            urgency: UrgencyLevel::High,
            reason: "test".into(),
            threat: None,
        }
    }

    fn orchestrator(cache: Arc<TxCache>) -> Arc<ExecutionOrchestrator> {
        let endpoints = EndpointsConfig {
            primary: vec![],
            backup: vec![],
            request_timeout_ms: 1000,
            max_retries: 0,
            health_check_interval_secs: 30,
            load_balancing: true,
        };
        let pool = Arc::new(ConnectionPool::new(
            &["http://localhost:8899".to_string()],
            &endpoints,
        ));
        let sender = Arc::new(PrioritySender::new(pool, None, None).dry_run());

        let config = ExecutorConfig {
            max_retries: 3,
            deadline_secs: 5,
            partial_fill_threshold_pct: 80.0,
            retry_delay_ms: 10,
            max_concurrent: 5,
            breaker_threshold: 5,
            breaker_window_secs: 60,
            queue_capacity: 100,
            alert_interval_secs: 30,
        };
        let fees = FeeConfig {
            base_priority_fee: 100_000,
            max_priority_fee: 1_000_000,
        };

        Arc::new(ExecutionOrchestrator::new(
            cache,
            sender,
            Arc::new(LogSink),
            config,
            fees,
        ))
    }

    async fn seed_cache(cache: &TxCache, wallet: &str, mint: &str) {
        let route = ExitRoute {
            token_mint: mint.into(),
            wallet_address: wallet.into(),
            route: "direct".into(),
            estimated_output: 950,
            price_impact_pct: 0.5,
            slippage_bps: 100,
        };
        let meta = TxMeta {
            priority_fee: 100_000,
            compute_units: 200_000,
            blockhash: "hash".into(),
            presigned: true,
        };
        cache
            .store(&route, &signed_payload(), &meta, TxClass::Emergency)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_key_is_noop() {
        let cache = Arc::new(TxCache::memory_only(16));
        let orch = orchestrator(cache);

        assert!(orch.queue_request(test_request("w1", "m1")).unwrap());
        // Same key while queued: swallowed
        assert!(!orch.queue_request(test_request("w1", "m1")).unwrap());
        // Different key: accepted
        assert!(orch.queue_request(test_request("w2", "m1")).unwrap());
    }

    #[tokio::test]
    async fn test_exactly_one_result_per_duplicate_burst() {
        let cache = Arc::new(TxCache::memory_only(16));
        let orch = orchestrator(cache);
        let mut results = orch.subscribe_results();
        orch.clone().start();

        // Two simultaneous queue calls for an identical key
        let first = orch.queue_request(test_request("w1", "m1")).unwrap();
        let second = orch.queue_request(test_request("w1", "m1")).unwrap();
        assert!(first);
        assert!(!second);

        let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("first result")
            .unwrap();
        assert_eq!(result.wallet_address, "w1");

        // No second result arrives for the duplicate
        let extra = tokio::time::timeout(Duration::from_millis(300), results.recv()).await;
        assert!(extra.is_err());

        orch.shutdown();
    }

    #[tokio::test]
    async fn test_cache_miss_is_fast_failure() {
        let cache = Arc::new(TxCache::memory_only(16));
        let orch = orchestrator(cache);
        let mut results = orch.subscribe_results();
        orch.clone().start();

        orch.queue_request(test_request("w1", "m1")).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("result")
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.attempts_made, 0);
        assert!(result.error.unwrap().contains("No cached transaction"));

        orch.shutdown();
    }

    #[tokio::test]
    async fn test_cached_payload_executes_successfully() {
        let cache = Arc::new(TxCache::memory_only(16));
        seed_cache(&cache, "w1", "m1").await;

        let orch = orchestrator(cache);
        let mut results = orch.subscribe_results();
        orch.clone().start();

        orch.queue_request(test_request("w1", "m1")).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("result")
            .unwrap();

        assert!(result.success);
        assert!(result.signature.is_some());
        assert_eq!(result.attempts_made, 1);
        assert_eq!(result.amount_received, Some(900));
        assert_eq!(result.slippage_bps, Some(100));

        orch.shutdown();
    }

    #[tokio::test]
    async fn test_key_returns_to_idle_after_result() {
        let cache = Arc::new(TxCache::memory_only(16));
        seed_cache(&cache, "w1", "m1").await;

        let orch = orchestrator(cache);
        let mut results = orch.subscribe_results();
        orch.clone().start();

        assert!(orch.queue_request(test_request("w1", "m1")).unwrap());
        tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("result")
            .unwrap();

        // Terminal state released the key
        assert!(orch.queue_request(test_request("w1", "m1")).unwrap());

        orch.shutdown();
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_before_queueing() {
        let cache = Arc::new(TxCache::memory_only(16));
        let orch = orchestrator(cache);

        // Six failures inside the window
        for _ in 0..6 {
            orch.breaker.record(false);
        }

        match orch.queue_request(test_request("w1", "m1")) {
            Err(Error::CircuitBreakerOpen { failures }) => assert!(failures >= 5),
            other => panic!("expected CircuitBreakerOpen, got {:?}", other),
        }

        // Nothing was queued
        assert_eq!(orch.stats().queue_size, 0);
    }

    #[tokio::test]
    async fn test_stats_track_outcomes() {
        let cache = Arc::new(TxCache::memory_only(16));
        seed_cache(&cache, "w1", "m1").await;

        let orch = orchestrator(cache);
        let mut results = orch.subscribe_results();
        orch.clone().start();

        orch.queue_request(test_request("w1", "m1")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("result")
            .unwrap();

        // Failure for a key with no cached payload
        orch.queue_request(test_request("w2", "m2")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("result")
            .unwrap();

        let stats = orch.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);

        orch.shutdown();
    }

    #[tokio::test]
    async fn test_seed_outcomes_can_open_breaker() {
        let cache = Arc::new(TxCache::memory_only(16));
        let orch = orchestrator(cache);

        let now = Utc::now();
        let outcomes: Vec<(DateTime<Utc>, bool)> =
            (0..6).map(|_| (now - chrono::Duration::seconds(5), false)).collect();
        orch.seed_outcomes(&outcomes);

        assert_eq!(orch.breaker.state(), BreakerState::Open);
    }
}
