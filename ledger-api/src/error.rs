//! Error types for the ledger API.

use thiserror::Error;

/// Errors raised while decoding identities or applying transactions to an
/// account view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A hex string did not decode to the expected number of bytes.
    #[error("invalid hex: expected {expected} bytes")]
    InvalidHex {
        /// Expected decoded length.
        expected: usize,
    },

    /// Unknown network name or id.
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    /// Secret key material was rejected by the signature backend.
    #[error("invalid key material")]
    InvalidKey,

    /// Transaction nonce does not match the account's next nonce.
    #[error("nonce mismatch: expected {expected}, got {actual}")]
    NonceMismatch {
        /// The account's next expected nonce.
        expected: u64,
        /// Nonce carried by the transaction.
        actual: u64,
    },

    /// Not enough available balance to cover value and fee.
    #[error("insufficient available balance: need {needed}, have {available}")]
    InsufficientAvailable {
        /// Amount the transaction debits.
        needed: u64,
        /// Amount currently available.
        available: u64,
    },

    /// Not enough locked balance to unvote.
    #[error("insufficient locked balance: need {needed}, have {locked}")]
    InsufficientLocked {
        /// Amount the transaction unlocks.
        needed: u64,
        /// Amount currently locked.
        locked: u64,
    },

    /// A delegate registration did not burn the required amount.
    #[error("delegate registration must burn at least {0}")]
    InvalidDelegateBurn(u64),
}

/// Convenience result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
