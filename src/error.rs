//! Error types for the exit guard

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the exit guard
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("No healthy endpoint available ({unhealthy}/{total} unhealthy)")]
    NoHealthyEndpoint { total: usize, unhealthy: usize },

    // Cache errors
    #[error("No cached transaction for token {mint}, wallet {wallet}")]
    NoCachedTransaction { mint: String, wallet: String },

    #[error("Cache codec error: {0}")]
    CacheCodec(String),

    #[error("Cache storage error: {0}")]
    CacheStorage(String),

    // Delivery errors
    #[error("Broadcast failed: {0}")]
    BroadcastFailure(String),

    #[error("No confirmation within {0}ms")]
    ConfirmationTimeout(u64),

    #[error("Relay submission failed: {0}")]
    RelaySubmission(String),

    #[error("Relay bundle rejected: {0}")]
    RelayRejected(String),

    // Orchestration errors
    #[error("Circuit breaker open: {failures} failures in trailing window")]
    CircuitBreakerOpen { failures: usize },

    #[error("Execution deadline of {0}ms exceeded")]
    DeadlineExceeded(u64),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_)
                | Error::RpcTimeout(_)
                | Error::NoHealthyEndpoint { .. }
                | Error::BroadcastFailure(_)
                | Error::ConfirmationTimeout(_)
                | Error::RelaySubmission(_)
        )
    }

    /// Check if this error terminates an execution immediately, with no
    /// further attempts
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::NoCachedTransaction { .. }
                | Error::CircuitBreakerOpen { .. }
                | Error::DeadlineExceeded(_)
                | Error::Config(_)
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from bincode errors
impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from reqwest errors (relay HTTP)
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::RelaySubmission(e.to_string())
    }
}
