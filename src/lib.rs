//! Exit Guard Library
//!
//! Emergency execution and priority delivery pipeline: when the external
//! threat detector flags a token, the precomputed presigned exit transaction
//! is pulled from the cache and raced onto the network through protected
//! relays, direct broadcast, and multi-fee bursts.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod pool;
pub mod sender;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
