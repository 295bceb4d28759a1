//! Priority fee estimation from recent network fee statistics

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::pool::{ConnectionPool, ExecuteOptions};
use crate::types::UrgencyLevel;

/// Fallback fees (microlamports per compute unit) when the network returns
/// no samples
const DEFAULT_FEE_LOW: u64 = 10_000;
const DEFAULT_FEE_MEDIUM: u64 = 100_000;
const DEFAULT_FEE_HIGH: u64 = 500_000;
const DEFAULT_FEE_CRITICAL: u64 = 2_000_000;

/// Samples recent prioritization fees and buckets them by percentile
pub struct FeeEstimator {
    pool: Arc<ConnectionPool>,
}

impl FeeEstimator {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Estimate the priority fee for an urgency level from recent network
    /// samples, falling back to fixed defaults when none are available.
    pub async fn estimate(&self, urgency: UrgencyLevel) -> u64 {
        let samples = match self.fetch_samples().await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "fee sampling failed, using defaults");
                Vec::new()
            }
        };

        if samples.is_empty() {
            return default_fee(urgency);
        }

        let mut fees = samples;
        fees.sort_unstable();
        let fee = percentile(&fees, urgency.fee_percentile());

        debug!(
            urgency = ?urgency,
            samples = fees.len(),
            fee,
            "estimated priority fee"
        );

        // Zero-fee slots dominate quiet periods; never bid zero
        fee.max(DEFAULT_FEE_LOW)
    }

    async fn fetch_samples(&self) -> Result<Vec<u64>> {
        let fees = self
            .pool
            .execute(
                |client| async move {
                    client
                        .get_recent_prioritization_fees(&[])
                        .await
                        .map_err(Into::into)
                },
                ExecuteOptions {
                    retries: Some(1),
                    priority: false,
                },
            )
            .await?;

        Ok(fees.into_iter().map(|f| f.prioritization_fee).collect())
    }
}

/// Value at the given percentile of an ascending-sorted slice
fn percentile(sorted: &[u64], pct: u32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() - 1) as u64 * pct as u64 / 100) as usize;
    sorted[idx]
}

fn default_fee(urgency: UrgencyLevel) -> u64 {
    match urgency {
        UrgencyLevel::Low => DEFAULT_FEE_LOW,
        UrgencyLevel::Medium => DEFAULT_FEE_MEDIUM,
        UrgencyLevel::High => DEFAULT_FEE_HIGH,
        UrgencyLevel::Critical => DEFAULT_FEE_CRITICAL,
    }
}
