//! Priority delivery of presigned payloads
//!
//! Three delivery channels, tried in order, stopping at the first
//! confirmation:
//! 1. Protected relay (bundled with a tip, front-running resistant)
//! 2. Direct broadcast through the connection pool
//! 3. Burst race: every precomputed fee variant at once, preflight skipped
//!
//! Racing duplicates is safe: the network deduplicates by signature, so a
//! transaction that lands twice is the same transaction.

pub mod fees;
pub mod relay;

pub use fees::FeeEstimator;
pub use relay::{payload_signature, RelayClient};

use futures::stream::{FuturesUnordered, StreamExt};
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::CachedTransaction;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, ExecuteOptions};
use crate::types::{DeliveryChannel, UrgencyLevel};

/// Poll cadence while waiting for a confirmation
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Per-delivery settings decided by the orchestrator
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Relay tip in lamports; zero disables bundling
    pub tip_lamports: u64,
    /// Current (possibly escalated) priority fee, for logging and tips
    pub priority_fee: u64,
    pub confirmation_timeout: Duration,
    pub skip_preflight: bool,
    pub use_backup_endpoint: bool,
}

/// A confirmed delivery
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub channel: DeliveryChannel,
    pub signature: Signature,
    pub elapsed_ms: u64,
    /// Endpoint URL for direct sends, None for relay bundles
    pub endpoint: Option<String>,
}

/// Multi-channel transmitter for presigned payloads
pub struct PrioritySender {
    pool: Arc<ConnectionPool>,
    backup_pool: Option<Arc<ConnectionPool>>,
    relay: Option<RelayClient>,
    estimator: FeeEstimator,
    dry_run: bool,
}

impl PrioritySender {
    pub fn new(
        pool: Arc<ConnectionPool>,
        backup_pool: Option<Arc<ConnectionPool>>,
        relay: Option<RelayClient>,
    ) -> Self {
        let estimator = FeeEstimator::new(pool.clone());
        Self {
            pool,
            backup_pool,
            relay,
            estimator,
            dry_run: false,
        }
    }

    /// Process requests end to end but skip all network transmission
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Deliver one payload through the ordered channels, returning the first
    /// confirmation. `variants` are the precomputed fee-level copies used by
    /// the burst channel; an empty slice skips that channel.
    pub async fn deliver(
        &self,
        payload: &[u8],
        variants: &[CachedTransaction],
        config: &DeliveryConfig,
    ) -> Result<DeliveryOutcome> {
        let started = Instant::now();

        if self.dry_run {
            let signature = payload_signature(payload)?;
            warn!(%signature, "dry-run: skipping delivery");
            return Ok(DeliveryOutcome {
                channel: DeliveryChannel::Standard,
                signature,
                elapsed_ms: 0,
                endpoint: None,
            });
        }

        let mut last_err: Option<Error> = None;

        // Channel 1: protected relay
        if let Some(relay) = &self.relay {
            match self.deliver_via_relay(relay, payload, config).await {
                Ok(signature) => {
                    return Ok(DeliveryOutcome {
                        channel: DeliveryChannel::Relay,
                        signature,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        endpoint: None,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "relay delivery failed, falling through");
                    last_err = Some(e);
                }
            }
        }

        // Channel 2: direct broadcast
        match self
            .send_and_confirm(
                payload,
                config.skip_preflight,
                config.use_backup_endpoint,
                config.confirmation_timeout,
            )
            .await
        {
            Ok((signature, endpoint)) => {
                return Ok(DeliveryOutcome {
                    channel: DeliveryChannel::Standard,
                    signature,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    endpoint: Some(endpoint),
                });
            }
            Err(e) => {
                warn!(error = %e, "direct broadcast failed, falling through");
                last_err = Some(e);
            }
        }

        // Channel 3: burst race across fee variants
        if !variants.is_empty() {
            match self.burst_race(variants, config.confirmation_timeout).await {
                Ok((signature, endpoint)) => {
                    return Ok(DeliveryOutcome {
                        channel: DeliveryChannel::Burst,
                        signature,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        endpoint: Some(endpoint),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "burst race failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::BroadcastFailure("no delivery channel available".into())))
    }

    async fn deliver_via_relay(
        &self,
        relay: &RelayClient,
        payload: &[u8],
        config: &DeliveryConfig,
    ) -> Result<Signature> {
        let blockhash = self
            .pool
            .execute(
                |client| async move { client.get_latest_blockhash().await.map_err(Into::into) },
                ExecuteOptions {
                    retries: Some(1),
                    priority: true,
                },
            )
            .await?;

        relay.submit(payload, config.tip_lamports, blockhash).await
    }

    /// Broadcast a payload to one pool endpoint and wait for confirmation.
    /// Returns the signature and the endpoint URL that carried it.
    pub async fn send_and_confirm(
        &self,
        payload: &[u8],
        skip_preflight: bool,
        use_backup: bool,
        confirmation_timeout: Duration,
    ) -> Result<(Signature, String)> {
        let pool = self.route_pool(use_backup);
        let tx: VersionedTransaction = bincode::deserialize(payload)
            .map_err(|e| Error::Serialization(format!("unreadable payload: {}", e)))?;

        let endpoint = pool.get_connection().await?;
        let send_config = RpcSendTransactionConfig {
            skip_preflight,
            ..Default::default()
        };

        let started = Instant::now();
        let signature = match endpoint
            .client()
            .send_transaction_with_config(&tx, send_config)
            .await
        {
            Ok(signature) => {
                endpoint.record_success(started.elapsed().as_millis() as u64);
                signature
            }
            Err(e) => {
                endpoint.record_failure(&e.to_string());
                return Err(Error::BroadcastFailure(e.to_string()));
            }
        };

        debug!(%signature, url = endpoint.url(), "payload broadcast");
        self.confirm(pool, &signature, confirmation_timeout).await?;

        info!(%signature, url = endpoint.url(), "delivery confirmed");
        Ok((signature, endpoint.url().to_string()))
    }

    /// Submit every fee variant concurrently and race for the first
    /// confirmation; the losers are abandoned, not cancelled on-chain.
    async fn burst_race(
        &self,
        variants: &[CachedTransaction],
        confirmation_timeout: Duration,
    ) -> Result<(Signature, String)> {
        info!(count = variants.len(), "burst racing fee variants");

        let mut races: FuturesUnordered<_> = variants
            .iter()
            .map(|variant| {
                let payload = variant.signed_payload.clone();
                async move {
                    self.send_and_confirm(&payload, true, false, confirmation_timeout)
                        .await
                }
            })
            .collect();

        let mut last_err: Option<Error> = None;
        while let Some(result) = races.next().await {
            match result {
                Ok(won) => return Ok(won),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::BroadcastFailure("no variants raced".into())))
    }

    /// Poll signature status until confirmed, failed, or timed out
    async fn confirm(
        &self,
        pool: &ConnectionPool,
        signature: &Signature,
        timeout: Duration,
    ) -> Result<()> {
        use solana_transaction_status::TransactionConfirmationStatus;

        let deadline = Instant::now() + timeout;
        let signature = *signature;

        while Instant::now() < deadline {
            let statuses = pool
                .execute(
                    |client| {
                        let signatures = [signature];
                        async move {
                            client
                                .get_signature_statuses(&signatures)
                                .await
                                .map(|r| r.value)
                                .map_err(Into::into)
                        }
                    },
                    ExecuteOptions {
                        retries: Some(0),
                        priority: false,
                    },
                )
                .await;

            if let Ok(statuses) = statuses {
                if let Some(Some(status)) = statuses.first() {
                    if let Some(err) = &status.err {
                        return Err(Error::BroadcastFailure(format!(
                            "transaction failed on-chain: {}",
                            err
                        )));
                    }
                    if matches!(
                        status.confirmation_status,
                        Some(TransactionConfirmationStatus::Confirmed)
                            | Some(TransactionConfirmationStatus::Finalized)
                    ) {
                        return Ok(());
                    }
                }
            }

            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }

        Err(Error::ConfirmationTimeout(timeout.as_millis() as u64))
    }

    /// Estimate a priority fee for an urgency level from recent samples
    pub async fn estimate_priority_fee(&self, urgency: UrgencyLevel) -> u64 {
        self.estimator.estimate(urgency).await
    }

    fn route_pool(&self, use_backup: bool) -> &ConnectionPool {
        if use_backup {
            if let Some(backup) = &self.backup_pool {
                return backup;
            }
            debug!("backup endpoint requested but none configured, using primary");
        }
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointsConfig;
    use solana_sdk::hash::Hash;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::Keypair;
    use solana_sdk::signer::Signer;
    use solana_sdk::system_instruction;
    use solana_sdk::transaction::Transaction;

    fn test_pool() -> Arc<ConnectionPool> {
        let config = EndpointsConfig {
            primary: vec![],
            backup: vec![],
            request_timeout_ms: 5000,
            max_retries: 1,
            health_check_interval_secs: 30,
            load_balancing: true,
        };
        Arc::new(ConnectionPool::new(
            &["http://localhost:8899".to_string()],
            &config,
        ))
    }

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

    #[tokio::test]
    async fn test_dry_run_skips_delivery() {
        let sender = PrioritySender::new(test_pool(), None, None).dry_run();
        let payload = signed_payload();

        let config = DeliveryConfig {
            tip_lamports: 0,
            priority_fee: 100_000,
            confirmation_timeout: Duration::from_secs(2),
            skip_preflight: true,
            use_backup_endpoint: false,
        };

        let outcome = sender.deliver(&payload, &[], &config).await.unwrap();
        assert_eq!(outcome.channel, DeliveryChannel::Standard);
        assert_eq!(outcome.signature, payload_signature(&payload).unwrap());
        assert_eq!(outcome.elapsed_ms, 0);
    }

    #[tokio::test]
    async fn test_unreadable_payload_rejected_before_send() {
        let sender = PrioritySender::new(test_pool(), None, None);

        let result = sender
            .send_and_confirm(&[1, 2, 3], true, false, Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_backup_routing_falls_back_to_primary() {
        let sender = PrioritySender::new(test_pool(), None, None);
        // No backup configured: routing must not panic, just use primary
        let pool = sender.route_pool(true);
        assert_eq!(pool.stats().await.total, 1);
    }
}
