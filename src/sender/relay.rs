//! Protected-relay bundle submission
//!
//! Sends the presigned exit payload to front-running-resistant relay
//! endpoints, tipping a relay account so the bundle is attractive to
//! include. Submission fans out to every configured regional endpoint in
//! parallel and the first accepted bundle id wins; status is then polled
//! until the bundle lands or the window closes.

use backoff::{future::retry, ExponentialBackoff};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::future;
use rand::Rng;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::system_instruction;
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{Error, Result};

/// Relay tip accounts - pay one of these inside the bundle.
/// Tip must ride in the LAST transaction of the bundle.
pub const RELAY_TIP_ACCOUNTS: [&str; 8] = [
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

/// Extract the first signature from a presigned payload
pub fn payload_signature(payload: &[u8]) -> Result<Signature> {
    let tx: VersionedTransaction = bincode::deserialize(payload)
        .map_err(|e| Error::Serialization(format!("unreadable payload: {}", e)))?;
    tx.signatures
        .first()
        .copied()
        .ok_or_else(|| Error::Serialization("payload carries no signature".into()))
}

/// Client for protected-relay bundle submission
pub struct RelayClient {
    config: RelayConfig,
    http: reqwest::Client,
    tip_accounts: Vec<Pubkey>,
    tip_payer: Option<Arc<Keypair>>,
}

impl RelayClient {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let tip_accounts = RELAY_TIP_ACCOUNTS
            .iter()
            .map(|s| Pubkey::from_str(s))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("Invalid tip account: {}", e)))?;

        let tip_payer = if config.tip_payer_path.is_empty() {
            None
        } else {
            Some(Arc::new(load_keypair(&config.tip_payer_path)?))
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        info!(
            endpoints = config.endpoints.len(),
            tipping = tip_payer.is_some(),
            "relay client initialized"
        );

        Ok(Self {
            config,
            http,
            tip_accounts,
            tip_payer,
        })
    }

    /// Pick a random tip account
    pub fn tip_account(&self) -> Pubkey {
        let idx = rand::thread_rng().gen_range(0..self.tip_accounts.len());
        self.tip_accounts[idx]
    }

    /// Clamp a tip to the configured bounds
    pub fn clamp_tip(&self, tip: u64) -> u64 {
        tip.clamp(self.config.min_tip_lamports, self.config.max_tip_lamports)
    }

    /// Submit the payload through the relay and wait for it to land.
    ///
    /// With a tip configured the payload rides in a two-transaction bundle
    /// (payload first, tip last); without one the payload goes to the relay
    /// transaction endpoint directly.
    pub async fn submit(
        &self,
        payload: &[u8],
        tip_lamports: u64,
        recent_blockhash: Hash,
    ) -> Result<Signature> {
        let signature = payload_signature(payload)?;

        match (&self.tip_payer, tip_lamports) {
            (Some(payer), tip) if tip > 0 => {
                let tip = self.clamp_tip(tip);
                let tip_tx = self.build_tip_tx(payer, tip, recent_blockhash);
                let encoded = vec![
                    BASE64.encode(payload),
                    BASE64.encode(bincode::serialize(&tip_tx)?),
                ];

                let bundle_id = self.submit_bundle_with_retry(encoded).await?;
                debug!(%bundle_id, tip, "bundle accepted, polling status");
                self.poll_bundle(&bundle_id).await?;
            }
            _ => {
                if tip_lamports > 0 && self.tip_payer.is_none() {
                    warn!("tip requested but no tip payer configured, submitting untipped");
                }
                self.submit_transaction(BASE64.encode(payload)).await?;
                debug!(%signature, "payload submitted to relay without bundle");
            }
        }

        Ok(signature)
    }

    fn build_tip_tx(&self, payer: &Keypair, tip: u64, recent_blockhash: Hash) -> Transaction {
        let tip_ix = system_instruction::transfer(&payer.pubkey(), &self.tip_account(), tip);
        Transaction::new_signed_with_payer(
            &[tip_ix],
            Some(&payer.pubkey()),
            &[payer],
            recent_blockhash,
        )
    }

    async fn submit_bundle_with_retry(&self, encoded: Vec<String>) -> Result<String> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.retry_base_delay_ms),
            max_interval: Duration::from_millis(self.config.retry_base_delay_ms * 4),
            max_elapsed_time: Some(Duration::from_millis(
                self.config.retry_base_delay_ms * 10 * self.config.retry_attempts.max(1) as u64,
            )),
            ..Default::default()
        };

        retry(backoff, || async {
            match self.submit_bundle_once(&encoded).await {
                Ok(id) => Ok(id),
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "retryable relay error");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    /// Fan the bundle out to every regional endpoint; first acceptance wins
    async fn submit_bundle_once(&self, encoded: &[String]) -> Result<String> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [encoded, {"encoding": "base64"}],
        });

        let submissions = self.config.endpoints.iter().map(|endpoint| {
            let url = format!("{}/api/v1/bundles", endpoint);
            let body = body.clone();
            Box::pin(async move {
                let value = self.call(&url, &body).await?;
                value["result"]
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| Error::RelayRejected(value["error"]["message"]
                        .as_str()
                        .unwrap_or("bundle not accepted")
                        .to_string()))
            })
        });

        match future::select_ok(submissions).await {
            Ok((bundle_id, _)) => Ok(bundle_id),
            Err(e) => Err(e),
        }
    }

    /// Untipped path: relay transaction endpoint instead of a bundle
    async fn submit_transaction(&self, encoded: String) -> Result<()> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendTransaction",
            "params": [encoded, {"encoding": "base64"}],
        });

        let submissions = self.config.endpoints.iter().map(|endpoint| {
            let url = format!("{}/api/v1/transactions", endpoint);
            let body = body.clone();
            Box::pin(async move {
                let value = self.call(&url, &body).await?;
                if value.get("error").map(|e| !e.is_null()).unwrap_or(false) {
                    return Err(Error::RelayRejected(
                        value["error"]["message"]
                            .as_str()
                            .unwrap_or("transaction not accepted")
                            .to_string(),
                    ));
                }
                Ok(())
            })
        });

        future::select_ok(submissions).await.map(|_| ())
    }

    /// Poll bundle status until it lands or the window closes
    async fn poll_bundle(&self, bundle_id: &str) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(self.config.bundle_timeout_secs);
        let poll_interval = Duration::from_millis(self.config.status_poll_interval_ms);

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBundleStatuses",
            "params": [[bundle_id]],
        });

        while Instant::now() < deadline {
            for endpoint in &self.config.endpoints {
                let url = format!("{}/api/v1/bundles", endpoint);
                let value = match self.call(&url, &body).await {
                    Ok(value) => value,
                    Err(e) => {
                        debug!(endpoint = %endpoint, error = %e, "bundle status query failed");
                        continue;
                    }
                };

                let status = &value["result"]["value"][0];
                if status.is_null() {
                    continue;
                }

                if let Some("confirmed") | Some("finalized") =
                    status["confirmation_status"].as_str()
                {
                    info!(bundle_id, "bundle landed");
                    return Ok(());
                }

                let err = &status["err"];
                let failed =
                    !err.is_null() && err.get("Ok").is_none() && err.as_str() != Some("Ok");
                if failed {
                    return Err(Error::RelayRejected(err.to_string()));
                }

                break; // seen but pending; wait out the interval
            }

            tokio::time::sleep(poll_interval).await;
        }

        Err(Error::ConfirmationTimeout(
            self.config.bundle_timeout_secs * 1000,
        ))
    }

    async fn call(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self.http.post(url).json(body).send().await?;
        Ok(response.json::<serde_json::Value>().await?)
    }
}

fn load_keypair(path: &str) -> Result<Keypair> {
    let data = std::fs::read_to_string(path)?;
    let secret: Vec<u8> = serde_json::from_str(&data)?;
    Keypair::from_bytes(&secret).map_err(|e| Error::InvalidKeypair(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn test_config() -> RelayConfig {
        RelayConfig {
            enabled: true,
            endpoints: vec!["https://ny.mainnet.block-engine.jito.wtf".into()],
            min_tip_lamports: 10_000,
            max_tip_lamports: 1_000_000,
            bundle_timeout_secs: 30,
            status_poll_interval_ms: 500,
            retry_attempts: 3,
            retry_base_delay_ms: 50,
            tip_payer_path: String::new(),
        }
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

    #[test]
    fn test_client_creation_parses_tip_accounts() {
        let client = RelayClient::new(test_config()).unwrap();
        assert_eq!(client.tip_accounts.len(), 8);
        assert!(client.tip_payer.is_none());
    }

    #[test]
    fn test_tip_clamping() {
        let client = RelayClient::new(test_config()).unwrap();
        assert_eq!(client.clamp_tip(5_000), 10_000);
        assert_eq!(client.clamp_tip(50_000), 50_000);
        assert_eq!(client.clamp_tip(2_000_000), 1_000_000);
    }

    #[test]
    fn test_payload_signature_extraction() {
        let payload = signed_payload();
        let signature = payload_signature(&payload).unwrap();
        assert_ne!(signature, Signature::default());
    }

    #[test]
    fn test_payload_signature_rejects_garbage() {
        assert!(payload_signature(&[0xde, 0xad]).is_err());
    }

    #[test]
    fn test_tip_tx_pays_a_known_account() {
        let client = RelayClient::new(test_config()).unwrap();
        let payer = Keypair::new();
        let tx = client.build_tip_tx(&payer, 20_000, Hash::default());

        // One transfer instruction, signed by the payer
        assert_eq!(tx.message.instructions.len(), 1);
        assert_eq!(tx.signatures.len(), 1);
        let tip_target = tx.message.account_keys[1];
        assert!(client.tip_accounts.contains(&tip_target));
    }
}
