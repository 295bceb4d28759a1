//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// RPC endpoint pools: primary carries normal traffic, backup is reserved
/// for critical-urgency strategies.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_primary_endpoints")]
    pub primary: Vec<String>,
    #[serde(default)]
    pub backup: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_true")]
    pub load_balancing: bool,
}

impl EndpointsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

/// Protected-relay (bundle) submission settings
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_relay_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_min_tip")]
    pub min_tip_lamports: u64,
    #[serde(default = "default_max_tip")]
    pub max_tip_lamports: u64,
    #[serde(default = "default_bundle_timeout_secs")]
    pub bundle_timeout_secs: u64,
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Path to the keypair funding relay tips. Only this key is ever used
    /// for signing inside the pipeline; exit payloads arrive presigned.
    #[serde(default)]
    pub tip_payer_path: String,
}

/// Priority fee bounds for escalation
#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    #[serde(default = "default_base_priority_fee")]
    pub base_priority_fee: u64,
    #[serde(default = "default_max_priority_fee")]
    pub max_priority_fee: u64,
}

/// Two-tier transaction cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: String,
    /// Capacity of the in-process fallback tier
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

/// Execution orchestrator settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_executor_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_partial_fill_threshold")]
    pub partial_fill_threshold_pct: f64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: usize,
    #[serde(default = "default_breaker_window_secs")]
    pub breaker_window_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_alert_interval_secs")]
    pub alert_interval_secs: u64,
}

impl ExecutorConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn breaker_window(&self) -> Duration {
        Duration::from_secs(self.breaker_window_secs)
    }
}

// Default value functions
fn default_primary_endpoints() -> Vec<String> {
    vec![std::env::var("RPC_ENDPOINT")
        .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())]
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_relay_endpoints() -> Vec<String> {
    vec![
        "https://ny.mainnet.block-engine.jito.wtf".into(),
        "https://amsterdam.mainnet.block-engine.jito.wtf".into(),
        "https://frankfurt.mainnet.block-engine.jito.wtf".into(),
        "https://tokyo.mainnet.block-engine.jito.wtf".into(),
    ]
}

fn default_min_tip() -> u64 {
    10000
}

fn default_max_tip() -> u64 {
    1000000
}

fn default_bundle_timeout_secs() -> u64 {
    30
}

fn default_status_poll_interval_ms() -> u64 {
    500
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

fn default_base_priority_fee() -> u64 {
    100000
}

fn default_max_priority_fee() -> u64 {
    10000000
}

fn default_cache_path() -> String {
    "data/txcache".to_string()
}

fn default_memory_capacity() -> usize {
    256
}

fn default_executor_max_retries() -> u32 {
    3
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_partial_fill_threshold() -> f64 {
    80.0
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_max_concurrent() -> usize {
    5
}

fn default_breaker_threshold() -> usize {
    5
}

fn default_breaker_window_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_alert_interval_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix EXITGUARD_)
            .add_source(
                config::Environment::with_prefix("EXITGUARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.endpoints.primary.is_empty() {
            anyhow::bail!("at least one primary RPC endpoint is required");
        }

        for url in self.endpoints.primary.iter().chain(self.endpoints.backup.iter()) {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("invalid RPC endpoint URL: {}", url);
            }
        }

        if self.relay.enabled && self.relay.endpoints.is_empty() {
            anyhow::bail!("relay is enabled but no relay endpoints are configured");
        }

        if self.relay.min_tip_lamports > self.relay.max_tip_lamports {
            anyhow::bail!(
                "min_tip_lamports ({}) exceeds max_tip_lamports ({})",
                self.relay.min_tip_lamports,
                self.relay.max_tip_lamports
            );
        }

        if self.fees.base_priority_fee == 0 {
            anyhow::bail!("base_priority_fee must be positive");
        }

        if self.fees.base_priority_fee > self.fees.max_priority_fee {
            anyhow::bail!(
                "base_priority_fee ({}) exceeds max_priority_fee ({})",
                self.fees.base_priority_fee,
                self.fees.max_priority_fee
            );
        }

        if !(0.0..=100.0).contains(&self.executor.partial_fill_threshold_pct) {
            anyhow::bail!("partial_fill_threshold_pct must be between 0 and 100");
        }

        if self.executor.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }

        if self.executor.breaker_threshold == 0 {
            anyhow::bail!("breaker_threshold must be at least 1");
        }

        if self.cache.memory_capacity == 0 {
            anyhow::bail!("cache memory_capacity must be at least 1");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: EndpointsConfig::default(),
            relay: RelayConfig::default(),
            fees: FeeConfig::default(),
            cache: CacheConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_endpoints(),
            backup: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            health_check_interval_secs: default_health_check_interval_secs(),
            load_balancing: true,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoints: default_relay_endpoints(),
            min_tip_lamports: default_min_tip(),
            max_tip_lamports: default_max_tip(),
            bundle_timeout_secs: default_bundle_timeout_secs(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            tip_payer_path: String::new(),
        }
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            base_priority_fee: default_base_priority_fee(),
            max_priority_fee: default_max_priority_fee(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_executor_max_retries(),
            deadline_secs: default_deadline_secs(),
            partial_fill_threshold_pct: default_partial_fill_threshold(),
            retry_delay_ms: default_retry_delay_ms(),
            max_concurrent: default_max_concurrent(),
            breaker_threshold: default_breaker_threshold(),
            breaker_window_secs: default_breaker_window_secs(),
            queue_capacity: default_queue_capacity(),
            alert_interval_secs: default_alert_interval_secs(),
        }
    }
}
