//! Cached transaction records and key derivation

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Current record layout version, bumped on incompatible changes
pub const SCHEMA_VERSION: u32 = 1;

/// TTL for routine swap entries
pub const SWAP_TTL_SECS: i64 = 300;
/// TTL for emergency exit entries; short because an emergency payload is
/// only useful while its recorded blockhash is still valid
pub const EMERGENCY_TTL_SECS: i64 = 60;

/// Canonical fee ladder for presigned burst variants
pub const BURST_FEE_MULTIPLIERS: [u32; 5] = [1, 2, 5, 10, 20];

/// Cache class of a precomputed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxClass {
    Swap,
    Emergency,
}

impl TxClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxClass::Swap => "swap",
            TxClass::Emergency => "emergency",
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            TxClass::Swap => Duration::seconds(SWAP_TTL_SECS),
            TxClass::Emergency => Duration::seconds(EMERGENCY_TTL_SECS),
        }
    }
}

/// Route description produced by the external precomputation collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRoute {
    pub token_mint: String,
    pub wallet_address: String,
    /// Human-readable route summary (venue hops)
    pub route: String,
    /// Expected output in lamports
    pub estimated_output: u64,
    pub price_impact_pct: f64,
    pub slippage_bps: u32,
}

/// Execution metadata recorded alongside the signed payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxMeta {
    pub priority_fee: u64,
    pub compute_units: u32,
    /// Blockhash the payload was signed against
    pub blockhash: String,
    pub presigned: bool,
}

/// A fee-level variant of one logical transaction, presigned at a discrete
/// multiplier of the base priority fee
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeVariant {
    pub multiplier: u32,
    pub priority_fee: u64,
    pub signed_payload: Vec<u8>,
}

/// A precomputed, already-signed transaction ready to broadcast.
///
/// The read path never signs anything: these bytes were produced ahead of
/// time by the external precomputation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTransaction {
    pub schema_version: u32,
    pub token_mint: String,
    pub wallet_address: String,
    pub class: TxClass,
    pub signed_payload: Vec<u8>,
    pub route: String,
    pub estimated_output: u64,
    pub price_impact_pct: f64,
    pub slippage_bps: u32,
    pub priority_fee: u64,
    pub compute_units: u32,
    pub presigned: bool,
    pub blockhash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedTransaction {
    pub fn new(route: &ExitRoute, signed_payload: &[u8], meta: &TxMeta, class: TxClass) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            token_mint: route.token_mint.clone(),
            wallet_address: route.wallet_address.clone(),
            class,
            signed_payload: signed_payload.to_vec(),
            route: route.route.clone(),
            estimated_output: route.estimated_output,
            price_impact_pct: route.price_impact_pct,
            slippage_bps: route.slippage_bps,
            priority_fee: meta.priority_fee,
            compute_units: meta.compute_units,
            presigned: meta.presigned,
            blockhash: meta.blockhash.clone(),
            created_at: now,
            expires_at: now + class.ttl(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn key(&self) -> String {
        cache_key(&self.token_mint, &self.wallet_address, self.class)
    }
}

/// Index of the fee multipliers stored for one (token, wallet) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantIndex {
    pub schema_version: u32,
    pub multipliers: Vec<u32>,
    pub expires_at: DateTime<Utc>,
}

impl VariantIndex {
    pub fn new(mut multipliers: Vec<u32>) -> Self {
        multipliers.sort_unstable();
        Self {
            schema_version: SCHEMA_VERSION,
            multipliers,
            expires_at: Utc::now() + TxClass::Emergency.ttl(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

pub fn cache_key(mint: &str, wallet: &str, class: TxClass) -> String {
    format!("tx:{}:{}:{}", mint, wallet, class.as_str())
}

pub fn variant_key(mint: &str, wallet: &str, multiplier: u32) -> String {
    format!("tx:{}:{}:emergency:fee:{}", mint, wallet, multiplier)
}

pub fn variant_index_key(mint: &str, wallet: &str) -> String {
    format!("tx:{}:{}:emergency:fees", mint, wallet)
}

/// Prefix matching every key for a token, or for a (token, wallet) pair
pub fn invalidation_prefix(mint: &str, wallet: Option<&str>) -> String {
    match wallet {
        Some(wallet) => format!("tx:{}:{}:", mint, wallet),
        None => format!("tx:{}:", mint),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> ExitRoute {
        ExitRoute {
            token_mint: "mint1".into(),
            wallet_address: "wallet1".into(),
            route: "direct".into(),
            estimated_output: 1_000_000,
            price_impact_pct: 0.5,
            slippage_bps: 100,
        }
    }

    fn meta() -> TxMeta {
        TxMeta {
            priority_fee: 100_000,
            compute_units: 200_000,
            blockhash: "hash".into(),
            presigned: true,
        }
    }

    #[test]
    fn test_ttl_by_class() {
        let swap = CachedTransaction::new(&route(), &[1, 2, 3], &meta(), TxClass::Swap);
        let emergency = CachedTransaction::new(&route(), &[1, 2, 3], &meta(), TxClass::Emergency);

        assert_eq!((swap.expires_at - swap.created_at).num_seconds(), SWAP_TTL_SECS);
        assert_eq!(
            (emergency.expires_at - emergency.created_at).num_seconds(),
            EMERGENCY_TTL_SECS
        );
        assert!(swap.expires_at > swap.created_at);
    }

    #[test]
    fn test_fresh_entry_not_expired() {
        let entry = CachedTransaction::new(&route(), &[1], &meta(), TxClass::Emergency);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_key_derivation() {
        assert_eq!(
            cache_key("mint1", "wallet1", TxClass::Swap),
            "tx:mint1:wallet1:swap"
        );
        assert_eq!(
            variant_key("mint1", "wallet1", 5),
            "tx:mint1:wallet1:emergency:fee:5"
        );
        assert_eq!(
            variant_index_key("mint1", "wallet1"),
            "tx:mint1:wallet1:emergency:fees"
        );
    }

    #[test]
    fn test_invalidation_prefixes() {
        assert_eq!(invalidation_prefix("mint1", None), "tx:mint1:");
        assert_eq!(
            invalidation_prefix("mint1", Some("wallet1")),
            "tx:mint1:wallet1:"
        );

        let key = cache_key("mint1", "wallet1", TxClass::Emergency);
        assert!(key.starts_with(&invalidation_prefix("mint1", None)));
        assert!(key.starts_with(&invalidation_prefix("mint1", Some("wallet1"))));
    }

    #[test]
    fn test_variant_index_sorted() {
        let index = VariantIndex::new(vec![10, 1, 5, 20, 2]);
        assert_eq!(index.multipliers, vec![1, 2, 5, 10, 20]);
    }
}
