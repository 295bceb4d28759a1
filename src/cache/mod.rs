//! Two-tier cache of precomputed signed transactions
//!
//! The whole point of this cache is that nothing has to be computed at the
//! moment of emergency: the read path deserializes already-signed bytes and
//! does no cryptography. Entries live in a durable sled tier shared across
//! restarts, with a bounded in-process LRU absorbing traffic whenever the
//! durable tier misbehaves. Expiry is lazy: an entry read at or past its
//! deadline is deleted and reported as a miss.

pub mod entry;
pub mod memory;

pub use entry::{
    CachedTransaction, ExitRoute, FeeVariant, TxClass, TxMeta, BURST_FEE_MULTIPLIERS,
    EMERGENCY_TTL_SECS, SWAP_TTL_SECS,
};

use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::Result;
use entry::{cache_key, invalidation_prefix, variant_index_key, variant_key, VariantIndex};
use memory::MemoryTier;

/// Two-tier precomputed transaction cache
pub struct TxCache {
    db: Option<sled::Db>,
    memory: MemoryTier,
}

impl TxCache {
    /// Open the durable tier at the configured path. When the store cannot
    /// be opened the cache degrades to the in-process tier only.
    pub fn open(config: &CacheConfig) -> Self {
        let db = match sled::open(&config.path) {
            Ok(db) => Some(db),
            Err(e) => {
                warn!(path = %config.path, error = %e, "durable cache tier unavailable, running in-process only");
                None
            }
        };

        Self {
            db,
            memory: MemoryTier::new(config.memory_capacity),
        }
    }

    /// In-process-only cache, for environments without a writable disk
    pub fn memory_only(capacity: usize) -> Self {
        Self {
            db: None,
            memory: MemoryTier::new(capacity),
        }
    }

    /// Store one precomputed transaction under its (token, wallet, class)
    /// key. Called only by the external precomputation collaborator.
    pub async fn store(
        &self,
        route: &ExitRoute,
        signed_payload: &[u8],
        meta: &TxMeta,
        class: TxClass,
    ) -> Result<()> {
        let entry = CachedTransaction::new(route, signed_payload, meta, class);
        self.store_entry(entry)
    }

    /// Fetch the cached transaction for a key. A miss — absent, expired, or
    /// unreadable — is `None`, never an error.
    pub async fn get(
        &self,
        token_mint: &str,
        wallet_address: &str,
        class: TxClass,
    ) -> Option<CachedTransaction> {
        let key = cache_key(token_mint, wallet_address, class);
        self.load_entry(&key)
    }

    /// Store several fee-level variants of one logical transaction, plus an
    /// index of the available levels. Everything shares the emergency TTL.
    pub async fn store_priority_variants(
        &self,
        route: &ExitRoute,
        meta: &TxMeta,
        variants: &[FeeVariant],
    ) -> Result<()> {
        for variant in variants {
            let variant_meta = TxMeta {
                priority_fee: variant.priority_fee,
                ..meta.clone()
            };
            let entry = CachedTransaction::new(
                route,
                &variant.signed_payload,
                &variant_meta,
                TxClass::Emergency,
            );
            // Variants live under derived sub-keys, not the main class key
            let key = variant_key(&route.token_mint, &route.wallet_address, variant.multiplier);
            let bytes = bincode::serialize(&entry)?;
            self.put_bytes(&key, bytes);
        }

        let index = VariantIndex::new(variants.iter().map(|v| v.multiplier).collect());
        let bytes = bincode::serialize(&index)?;
        self.put_bytes(
            &variant_index_key(&route.token_mint, &route.wallet_address),
            bytes,
        );

        debug!(
            mint = %route.token_mint,
            wallet = %route.wallet_address,
            count = variants.len(),
            "stored priority fee variants"
        );
        Ok(())
    }

    /// Reconstruct the stored fee variants in ascending fee order. Missing,
    /// expired or unreadable variants are skipped.
    pub async fn get_priority_variants(
        &self,
        token_mint: &str,
        wallet_address: &str,
    ) -> Vec<CachedTransaction> {
        let index_key = variant_index_key(token_mint, wallet_address);
        let Some(bytes) = self.get_bytes(&index_key) else {
            return Vec::new();
        };

        let index: VariantIndex = match bincode::deserialize(&bytes) {
            Ok(index) => index,
            Err(e) => {
                warn!(key = %index_key, error = %e, "unreadable variant index dropped");
                self.delete(&index_key);
                return Vec::new();
            }
        };

        if index.is_expired() {
            self.delete(&index_key);
            return Vec::new();
        }

        index
            .multipliers
            .iter()
            .filter_map(|m| self.load_entry(&variant_key(token_mint, wallet_address, *m)))
            .collect()
    }

    /// Remove every entry for a token, or for one (token, wallet) pair,
    /// from both tiers
    pub async fn invalidate(&self, token_mint: &str, wallet_address: Option<&str>) -> usize {
        let prefix = invalidation_prefix(token_mint, wallet_address);
        let mut removed = 0;

        if let Some(db) = &self.db {
            let doomed: Vec<sled::IVec> = db
                .scan_prefix(prefix.as_bytes())
                .keys()
                .filter_map(|k| k.ok())
                .collect();
            for key in doomed {
                match db.remove(&key) {
                    Ok(Some(_)) => removed += 1,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "durable tier remove failed during invalidation"),
                }
            }
        }

        removed += self.memory.remove_prefix(&prefix);

        debug!(mint = token_mint, wallet = ?wallet_address, removed, "cache invalidated");
        removed
    }

    /// Entries currently held in the in-process tier (stats surface)
    pub fn fallback_len(&self) -> usize {
        self.memory.len()
    }

    // Internal: typed load with lazy expiry and codec-error tolerance
    fn load_entry(&self, key: &str) -> Option<CachedTransaction> {
        let bytes = self.get_bytes(key)?;

        let entry: CachedTransaction = match bincode::deserialize(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                // Corrupt entries are a miss, not an error
                warn!(key, error = %e, "unreadable cache entry dropped");
                self.delete(key);
                return None;
            }
        };

        if entry.is_expired() {
            debug!(key, "cache entry expired on read");
            self.delete(key);
            return None;
        }

        Some(entry)
    }

    pub(crate) fn store_entry(&self, entry: CachedTransaction) -> Result<()> {
        let key = entry.key();
        let bytes = bincode::serialize(&entry)?;
        self.put_bytes(&key, bytes);
        debug!(%key, class = entry.class.as_str(), "cache entry stored");
        Ok(())
    }

    // Durable tier first; the in-process tier only sees writes the durable
    // tier refused
    fn put_bytes(&self, key: &str, bytes: Vec<u8>) {
        if let Some(db) = &self.db {
            match db.insert(key.as_bytes(), bytes.clone()) {
                Ok(_) => {
                    // Writes happen at precompute time, so a synchronous
                    // flush here costs nothing on the emergency read path
                    if let Err(e) = db.flush() {
                        warn!(key, error = %e, "durable tier flush failed");
                    }
                    return;
                }
                Err(e) => {
                    warn!(key, error = %e, "durable tier write failed, using fallback");
                }
            }
        }
        self.memory.insert(key, bytes);
    }

    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(db) = &self.db {
            match db.get(key.as_bytes()) {
                Ok(Some(bytes)) => return Some(bytes.to_vec()),
                Ok(None) => {}
                Err(e) => {
                    warn!(key, error = %e, "durable tier read failed, trying fallback");
                }
            }
        }
        self.memory.get(key)
    }

    fn delete(&self, key: &str) {
        if let Some(db) = &self.db {
            if let Err(e) = db.remove(key.as_bytes()) {
                warn!(key, error = %e, "durable tier delete failed");
            }
        }
        self.memory.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

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

    fn durable_cache(dir: &TempDir) -> TxCache {
        TxCache::open(&crate::config::CacheConfig {
            path: dir.path().join("txcache").to_string_lossy().into_owned(),
            memory_capacity: 16,
        })
    }

    #[tokio::test]
    async fn test_store_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = durable_cache(&dir);

        cache
            .store(&route(), &[9, 9, 9], &meta(), TxClass::Emergency)
            .await
            .unwrap();

        let entry = cache.get("mint1", "wallet1", TxClass::Emergency).await.unwrap();
        assert_eq!(entry.signed_payload, vec![9, 9, 9]);
        assert!(entry.presigned);

        // Different class is a different key
        assert!(cache.get("mint1", "wallet1", TxClass::Swap).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_deleted() {
        let dir = TempDir::new().unwrap();
        let cache = durable_cache(&dir);

        // Emergency entry stored at t=0 with a 60s TTL, read at t=61s
        let mut entry = CachedTransaction::new(&route(), &[1], &meta(), TxClass::Emergency);
        entry.created_at = Utc::now() - Duration::seconds(61);
        entry.expires_at = entry.created_at + Duration::seconds(EMERGENCY_TTL_SECS);
        cache.store_entry(entry.clone()).unwrap();

        assert!(cache.get("mint1", "wallet1", TxClass::Emergency).await.is_none());

        // The expired entry was removed, not just skipped
        assert!(cache.get_bytes(&entry.key()).is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = durable_cache(&dir);

        let key = entry::cache_key("mint1", "wallet1", TxClass::Swap);
        cache.put_bytes(&key, vec![0xde, 0xad, 0xbe, 0xef]);

        assert!(cache.get("mint1", "wallet1", TxClass::Swap).await.is_none());
        assert!(cache.get_bytes(&key).is_none());
    }

    #[tokio::test]
    async fn test_memory_only_fallback() {
        let cache = TxCache::memory_only(8);

        cache
            .store(&route(), &[5], &meta(), TxClass::Swap)
            .await
            .unwrap();

        assert_eq!(cache.fallback_len(), 1);
        let entry = cache.get("mint1", "wallet1", TxClass::Swap).await.unwrap();
        assert_eq!(entry.signed_payload, vec![5]);
    }

    #[tokio::test]
    async fn test_priority_variants_in_fee_order() {
        let dir = TempDir::new().unwrap();
        let cache = durable_cache(&dir);

        // Store the canonical ladder out of order
        let base_fee = 100_000u64;
        let mut variants: Vec<FeeVariant> = BURST_FEE_MULTIPLIERS
            .iter()
            .map(|&m| FeeVariant {
                multiplier: m,
                priority_fee: base_fee * m as u64,
                signed_payload: vec![m as u8],
            })
            .collect();
        variants.reverse();

        cache
            .store_priority_variants(&route(), &meta(), &variants)
            .await
            .unwrap();

        let loaded = cache.get_priority_variants("mint1", "wallet1").await;
        assert_eq!(loaded.len(), BURST_FEE_MULTIPLIERS.len());
        let fees: Vec<u64> = loaded.iter().map(|v| v.priority_fee).collect();
        assert_eq!(
            fees,
            vec![100_000, 200_000, 500_000, 1_000_000, 2_000_000],
            "reconstructed in ascending fee order"
        );
    }

    #[tokio::test]
    async fn test_invalidate_by_token() {
        let dir = TempDir::new().unwrap();
        let cache = durable_cache(&dir);

        cache
            .store(&route(), &[1], &meta(), TxClass::Swap)
            .await
            .unwrap();
        cache
            .store(&route(), &[2], &meta(), TxClass::Emergency)
            .await
            .unwrap();

        let other = ExitRoute {
            token_mint: "mint2".into(),
            ..route()
        };
        cache
            .store(&other, &[3], &meta(), TxClass::Swap)
            .await
            .unwrap();

        let removed = cache.invalidate("mint1", None).await;
        assert_eq!(removed, 2);

        assert!(cache.get("mint1", "wallet1", TxClass::Swap).await.is_none());
        assert!(cache.get("mint1", "wallet1", TxClass::Emergency).await.is_none());
        assert!(cache.get("mint2", "wallet1", TxClass::Swap).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_by_wallet() {
        let cache = TxCache::memory_only(8);

        cache.store(&route(), &[1], &meta(), TxClass::Swap).await.unwrap();

        let other_wallet = ExitRoute {
            wallet_address: "wallet2".into(),
            ..route()
        };
        cache
            .store(&other_wallet, &[2], &meta(), TxClass::Swap)
            .await
            .unwrap();

        let removed = cache.invalidate("mint1", Some("wallet1")).await;
        assert_eq!(removed, 1);
        assert!(cache.get("mint1", "wallet2", TxClass::Swap).await.is_some());
    }

    #[tokio::test]
    async fn test_durable_tier_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = durable_cache(&dir);
            cache
                .store(&route(), &[7], &meta(), TxClass::Swap)
                .await
                .unwrap();
        }

        let cache = durable_cache(&dir);
        let entry = cache.get("mint1", "wallet1", TxClass::Swap).await.unwrap();
        assert_eq!(entry.signed_payload, vec![7]);
    }
}
