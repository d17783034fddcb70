//! Configuration for the pending transaction pool.

use {
    std::time::Duration,
    tessera_ledger_api::{Address, Network},
    thiserror::Error,
};

/// Admission limits and worker sizing for [`crate::PendingPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Network transactions must be signed for.
    pub network: Network,

    /// Maximum distance between a transaction timestamp and the local clock.
    /// Default: 2 hours.
    pub max_timestamp_drift: Duration,

    /// Largest accepted gap between a transaction nonce and the sender's
    /// next expected nonce. Transactions further ahead are rejected.
    pub max_nonce_gap: u64,

    /// Total nonce-gap transactions held across all senders. The oldest
    /// staged entry is evicted when full.
    pub max_staged: usize,

    /// How long a nonce-gap transaction may wait for its predecessors.
    pub staged_expiry: Duration,

    /// Capacity of the asynchronous admission queue. Peer submissions are
    /// dropped when it is full.
    pub queue_capacity: usize,

    /// Minimum fee a transaction must carry.
    pub min_fee: u64,

    /// Maximum size of the transaction data field in bytes.
    pub max_data_size: usize,

    /// Recipients that may never receive transactions.
    pub reserved_addresses: Vec<Address>,

    /// How long `stop` waits for the worker to drain.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            max_timestamp_drift: Duration::from_secs(2 * 60 * 60),
            max_nonce_gap: 8_192,
            max_staged: 100 * 1_024,
            staged_expiry: Duration::from_secs(10 * 60),
            queue_capacity: 65_536,
            min_fee: 5_000_000,
            max_data_size: 128,
            reserved_addresses: vec![Address::ZERO],
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Create a config suitable for local testing.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            network: Network::Devnet,
            min_fee: 1,
            queue_capacity: 10_000,
            shutdown_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_timestamp_drift.is_zero() {
            return Err(ConfigError::ZeroTimestampDrift);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.max_staged == 0 || self.max_nonce_gap == 0 {
            return Err(ConfigError::ZeroStagingCapacity);
        }
        Ok(())
    }
}

/// Errors from [`PoolConfig::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_timestamp_drift must be > 0")]
    ZeroTimestampDrift,

    #[error("queue_capacity must be > 0")]
    ZeroQueueCapacity,

    #[error("max_staged and max_nonce_gap must be > 0")]
    ZeroStagingCapacity,
}
