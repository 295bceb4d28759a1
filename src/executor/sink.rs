//! Outbound seam to the external persistence and notification collaborators

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::types::{ExecutionRecord, ExecutionResult};

/// Receives every terminal execution outcome.
///
/// Delivery is at-least-once: the orchestrator retries nothing here, but it
/// calls both hooks for every result and logs (rather than propagates) their
/// failures, so a flaky sink cannot stall the processing loop.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Persist the full request/result record for audit
    async fn persist(&self, record: &ExecutionRecord) -> Result<()>;

    /// Notify downstream consumers of the outcome
    async fn notify(&self, result: &ExecutionResult) -> Result<()>;
}

/// Default sink: structured logs only
pub struct LogSink;

#[async_trait]
impl ExecutionSink for LogSink {
    async fn persist(&self, record: &ExecutionRecord) -> Result<()> {
        info!(
            id = %record.result.id,
            wallet = %record.request.wallet_address,
            mint = %record.request.token_mint,
            success = record.result.success,
            "execution record"
        );
        Ok(())
    }

    async fn notify(&self, result: &ExecutionResult) -> Result<()> {
        if result.success {
            info!(
                id = %result.id,
                signature = ?result.signature,
                elapsed_ms = result.elapsed_ms,
                "exit landed"
            );
        } else {
            info!(
                id = %result.id,
                error = ?result.error,
                attempts = result.attempts_made,
                "exit failed"
            );
        }
        Ok(())
    }
}
