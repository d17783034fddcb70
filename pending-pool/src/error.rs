//! Error types for the pending pool.

use {tessera_ledger_api::LedgerError, thiserror::Error};

/// Reason a transaction was refused admission.
///
/// Local submissions receive one of these in their
/// [`crate::ProcessingResult`]; peer submissions are only counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    /// Signed for a different network.
    #[error("transaction is for another network")]
    InvalidNetwork,

    /// Data field exceeds the configured maximum.
    #[error("data field too large: {size} bytes (max {max})")]
    DataTooLarge { size: usize, max: usize },

    /// Fee below the configured minimum.
    #[error("fee too low: {fee} (min {min})")]
    FeeTooLow { fee: u64, min: u64 },

    /// Signature does not verify against the embedded public key.
    #[error("invalid signature")]
    InvalidSignature,

    /// Already on chain or already in the pool.
    #[error("duplicated transaction")]
    DuplicatedHash,

    /// Recipient is a reserved address.
    #[error("recipient is a reserved address")]
    ReservedRecipient,

    /// Timestamp outside the allowed drift window.
    #[error("timestamp out of range")]
    InvalidTimestamp,

    /// Nonce already used by the sender.
    #[error("nonce {actual} already used (next {expected})")]
    NonceTooLow { expected: u64, actual: u64 },

    /// Nonce too far ahead of the sender's next nonce.
    #[error("nonce {actual} too far ahead of {expected}")]
    NonceGapTooLarge { expected: u64, actual: u64 },

    /// Another transaction already waits on this nonce.
    #[error("nonce {0} already staged")]
    NonceAlreadyStaged(u64),

    /// Not enough balance for the declared operation.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(LedgerError),

    /// The pool is shutting down.
    #[error("pool is shut down")]
    ShutDown,
}

/// Errors from the pool front end.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The worker thread could not be spawned.
    #[error("failed to spawn pool worker: {0}")]
    Spawn(String),

    /// The worker did not drain within the shutdown timeout.
    #[error("pool worker did not stop within {0:?}")]
    ShutdownTimeout(std::time::Duration),

    /// Invalid configuration.
    #[error("invalid pool config: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Convenience result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
