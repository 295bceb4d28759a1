//! Core domain types shared across the pipeline
//!
//! Requests come in from the external threat detector, results go out to the
//! external persistence and notification collaborators. Everything in between
//! (cached payloads, delivery outcomes) lives in its owning module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How fast an exit needs to land
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl UrgencyLevel {
    /// Percentile used when sampling recent prioritization fees
    pub fn fee_percentile(&self) -> u32 {
        match self {
            UrgencyLevel::Low => 50,
            UrgencyLevel::Medium => 75,
            UrgencyLevel::High => 90,
            UrgencyLevel::Critical => 99,
        }
    }
}

/// Risk classification attached to a threat by the external detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    /// Map risk to the urgency of the exit it should trigger
    pub fn urgency(&self) -> UrgencyLevel {
        match self {
            RiskLevel::Low => UrgencyLevel::Low,
            RiskLevel::Moderate => UrgencyLevel::Medium,
            RiskLevel::High => UrgencyLevel::High,
            RiskLevel::Critical => UrgencyLevel::Critical,
        }
    }
}

/// Analysis payload carried by a threat event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAnalysis {
    /// Detector-specific threat type label (e.g. "liquidity_pull")
    pub threat_type: String,
    pub risk_level: RiskLevel,
    /// Detector confidence in [0.0, 1.0]
    pub confidence: f64,
}

/// Inbound event from the external threat detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatEvent {
    pub token_mint: String,
    pub wallet_address: String,
    pub analysis: ThreatAnalysis,
    /// Detector-requested extra fee multiplier (1.0 = none)
    pub priority_fee_multiplier: f64,
}

/// Threat context carried into an execution for fee computation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThreatContext {
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub fee_multiplier: f64,
}

/// A single protection trigger: sell this token from this wallet, now
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub wallet_address: String,
    pub token_mint: String,
    /// Token amount to sell, in base units
    pub amount_to_sell: u64,
    /// Minimum acceptable output in lamports (presigned floor)
    pub min_acceptable_output: u64,
    pub urgency: UrgencyLevel,
    /// Human-readable trigger reason, for audit
    pub reason: String,
    /// Present when the request originated from a threat event
    pub threat: Option<ThreatContext>,
}

impl ExecutionRequest {
    /// Deduplication key: one in-flight execution per (wallet, token)
    pub fn key(&self) -> String {
        format!("{}:{}", self.wallet_address, self.token_mint)
    }

    /// Build a request from a detector threat event
    pub fn from_threat(event: ThreatEvent, amount_to_sell: u64, min_acceptable_output: u64) -> Self {
        let urgency = event.analysis.risk_level.urgency();
        Self {
            wallet_address: event.wallet_address,
            token_mint: event.token_mint,
            amount_to_sell,
            min_acceptable_output,
            urgency,
            reason: format!("threat:{}", event.analysis.threat_type),
            threat: Some(ThreatContext {
                risk_level: event.analysis.risk_level,
                confidence: event.analysis.confidence,
                fee_multiplier: event.priority_fee_multiplier,
            }),
        }
    }
}

/// Which delivery channel confirmed the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Relay,
    Standard,
    Burst,
}

impl std::fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryChannel::Relay => write!(f, "relay"),
            DeliveryChannel::Standard => write!(f, "standard"),
            DeliveryChannel::Burst => write!(f, "burst"),
        }
    }
}

/// Terminal outcome of one execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Unique execution id, for audit correlation
    pub id: String,
    pub wallet_address: String,
    pub token_mint: String,
    pub success: bool,
    pub signature: Option<String>,
    /// On success this is the presigned minimum-output floor, not a measured
    /// balance delta; confirmation is not parsed for the realized amount.
    pub amount_received: Option<u64>,
    pub percent_filled: Option<f64>,
    pub slippage_bps: Option<u32>,
    pub elapsed_ms: u64,
    /// Channel or endpoint that carried the confirmed transaction
    pub endpoint_used: Option<String>,
    pub attempts_made: u32,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// One record per execution attempt, handed to the external store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub request: ExecutionRequest,
    pub result: ExecutionResult,
    pub queued_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgency_ordering() {
        assert!(UrgencyLevel::Low < UrgencyLevel::Medium);
        assert!(UrgencyLevel::Medium < UrgencyLevel::High);
        assert!(UrgencyLevel::High < UrgencyLevel::Critical);
    }

    #[test]
    fn test_risk_maps_to_urgency() {
        assert_eq!(RiskLevel::Critical.urgency(), UrgencyLevel::Critical);
        assert_eq!(RiskLevel::Moderate.urgency(), UrgencyLevel::Medium);
    }

    #[test]
    fn test_request_key() {
        let req = ExecutionRequest {
            wallet_address: "wallet1".into(),
            token_mint: "mint1".into(),
            amount_to_sell: 100,
            min_acceptable_output: 90,
            urgency: UrgencyLevel::High,
            reason: "test".into(),
            threat: None,
        };
        assert_eq!(req.key(), "wallet1:mint1");
    }

    #[test]
    fn test_from_threat_carries_context() {
        let event = ThreatEvent {
            token_mint: "mint1".into(),
            wallet_address: "wallet1".into(),
            analysis: ThreatAnalysis {
                threat_type: "liquidity_pull".into(),
                risk_level: RiskLevel::Critical,
                confidence: 0.9,
            },
            priority_fee_multiplier: 1.5,
        };

        let req = ExecutionRequest::from_threat(event, 1_000, 900);
        assert_eq!(req.urgency, UrgencyLevel::Critical);
        let threat = req.threat.unwrap();
        assert_eq!(threat.fee_multiplier, 1.5);
        assert_eq!(threat.confidence, 0.9);
        assert!(req.reason.contains("liquidity_pull"));
    }
}
