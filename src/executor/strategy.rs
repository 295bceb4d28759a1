//! Strategy selection and fee arithmetic
//!
//! Everything here is pure: the strategy list for an urgency level is a
//! deterministic function of the urgency alone, and the fee helpers are
//! plain arithmetic, so the orchestrator can recompute them freely.

use std::time::Duration;

use crate::types::{RiskLevel, ThreatContext, UrgencyLevel};

/// How a strategy moves the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Full channel cascade through the priority sender
    PrioritySender,
    /// Single-channel direct broadcast
    DirectBroadcast,
}

/// One entry in the ordered strategy list for an execution
#[derive(Debug, Clone)]
pub struct ExecutionStrategy {
    pub name: &'static str,
    pub kind: StrategyKind,
    pub confirmation_timeout: Duration,
    /// Extra in-strategy send retries (direct broadcast only)
    pub max_retries: u32,
    pub skip_preflight: bool,
    pub use_backup_endpoint: bool,
}

/// Deterministic strategy list for an urgency level.
///
/// Every urgency starts with the full priority-sender cascade; critical
/// urgency appends a backup-endpoint broadcast and a last-ditch
/// skip-preflight direct send.
pub fn strategies_for(urgency: UrgencyLevel) -> Vec<ExecutionStrategy> {
    let mut strategies = vec![ExecutionStrategy {
        name: "priority-delivery",
        kind: StrategyKind::PrioritySender,
        confirmation_timeout: Duration::from_secs(5),
        max_retries: 0,
        skip_preflight: false,
        use_backup_endpoint: false,
    }];

    if urgency == UrgencyLevel::Critical {
        strategies.push(ExecutionStrategy {
            name: "backup-broadcast",
            kind: StrategyKind::DirectBroadcast,
            confirmation_timeout: Duration::from_secs(3),
            max_retries: 1,
            skip_preflight: true,
            use_backup_endpoint: true,
        });
        strategies.push(ExecutionStrategy {
            name: "immediate-direct",
            kind: StrategyKind::DirectBroadcast,
            confirmation_timeout: Duration::from_secs(2),
            max_retries: 0,
            skip_preflight: true,
            use_backup_endpoint: false,
        });
    }

    strategies
}

/// Risk-level component of the fee scaling
pub fn risk_multiplier(risk: RiskLevel) -> f64 {
    match risk {
        RiskLevel::Critical => 2.0,
        RiskLevel::High => 1.5,
        RiskLevel::Moderate => 1.2,
        RiskLevel::Low => 1.0,
    }
}

/// Detector confidence component: 1.0 at zero confidence, 1.5 at full
pub fn confidence_multiplier(confidence: f64) -> f64 {
    1.0 + 0.5 * confidence.clamp(0.0, 1.0)
}

/// Base fee scaled by the threat context, when there is one
pub fn scaled_base_fee(base: u64, threat: Option<&ThreatContext>) -> u64 {
    match threat {
        None => base,
        Some(t) => {
            let scaled = base as f64
                * t.fee_multiplier
                * risk_multiplier(t.risk_level)
                * confidence_multiplier(t.confidence);
            scaled.round() as u64
        }
    }
}

/// Fee for attempt `attempt` (1-based): doubles each attempt, capped
pub fn escalate(base: u64, attempt: u32, max_fee: u64) -> u64 {
    let shift = attempt.saturating_sub(1).min(32);
    base.saturating_mul(1u64 << shift).min(max_fee)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_list_deterministic() {
        for urgency in [
            UrgencyLevel::Low,
            UrgencyLevel::Medium,
            UrgencyLevel::High,
            UrgencyLevel::Critical,
        ] {
            let a = strategies_for(urgency);
            let b = strategies_for(urgency);
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(b.iter()) {
                assert_eq!(x.name, y.name);
                assert_eq!(x.kind, y.kind);
            }
        }
    }

    #[test]
    fn test_non_critical_gets_base_list() {
        for urgency in [UrgencyLevel::Low, UrgencyLevel::Medium, UrgencyLevel::High] {
            let strategies = strategies_for(urgency);
            assert_eq!(strategies.len(), 1);
            assert_eq!(strategies[0].name, "priority-delivery");
            assert_eq!(strategies[0].kind, StrategyKind::PrioritySender);
        }
    }

    #[test]
    fn test_critical_appends_fallbacks() {
        let strategies = strategies_for(UrgencyLevel::Critical);
        assert_eq!(strategies.len(), 3);

        assert_eq!(strategies[1].name, "backup-broadcast");
        assert!(strategies[1].use_backup_endpoint);
        assert!(strategies[1].skip_preflight);
        assert_eq!(strategies[1].max_retries, 1);

        assert_eq!(strategies[2].name, "immediate-direct");
        assert!(strategies[2].skip_preflight);
        assert!(!strategies[2].use_backup_endpoint);
    }

    #[test]
    fn test_escalation_sequence() {
        let base = 100_000;
        let max = 1_000_000;

        // fee(i) = min(base * 2^(i-1), max)
        assert_eq!(escalate(base, 1, max), 100_000);
        assert_eq!(escalate(base, 2, max), 200_000);
        assert_eq!(escalate(base, 3, max), 400_000);
        assert_eq!(escalate(base, 4, max), 800_000);
        assert_eq!(escalate(base, 5, max), 1_000_000);
        assert_eq!(escalate(base, 6, max), 1_000_000);

        // Monotone non-decreasing and bounded
        let mut prev = 0;
        for attempt in 1..=12 {
            let fee = escalate(base, attempt, max);
            assert!(fee >= prev);
            assert!(fee <= max);
            prev = fee;
        }
    }

    #[test]
    fn test_escalation_does_not_overflow() {
        let fee = escalate(u64::MAX / 2, 40, u64::MAX);
        assert_eq!(fee, u64::MAX);
    }

    #[test]
    fn test_risk_multipliers() {
        assert_eq!(risk_multiplier(RiskLevel::Critical), 2.0);
        assert_eq!(risk_multiplier(RiskLevel::High), 1.5);
        assert_eq!(risk_multiplier(RiskLevel::Moderate), 1.2);
        assert_eq!(risk_multiplier(RiskLevel::Low), 1.0);
    }

    #[test]
    fn test_confidence_multiplier_bounds() {
        assert_eq!(confidence_multiplier(0.0), 1.0);
        assert_eq!(confidence_multiplier(1.0), 1.5);
        assert_eq!(confidence_multiplier(5.0), 1.5);
        assert_eq!(confidence_multiplier(-1.0), 1.0);
    }

    #[test]
    fn test_scaled_base_fee() {
        let threat = ThreatContext {
            risk_level: RiskLevel::Critical,
            confidence: 1.0,
            fee_multiplier: 1.0,
        };
        // 100k * 1.0 * 2.0 * 1.5
        assert_eq!(scaled_base_fee(100_000, Some(&threat)), 300_000);
        assert_eq!(scaled_base_fee(100_000, None), 100_000);
    }
}
