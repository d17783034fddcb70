//! The ledger collaborator interface.
//!
//! Networking and the pending pool only ever read chain state through
//! [`Ledger`]; block import and storage live elsewhere.

use {
    crate::{
        account::AccountState,
        transaction::Transaction,
        types::{Address, TxHash},
    },
    std::collections::BTreeSet,
};

/// Read-only view of the canonical chain.
pub trait Ledger: Send + Sync {
    /// Number of the latest committed block.
    fn latest_block_number(&self) -> u64;

    /// Peer ids (hex addresses) of the current validator set.
    fn validators(&self) -> Vec<String>;

    /// Whether a transaction with this hash is already on chain.
    fn has_transaction(&self, hash: &TxHash) -> bool;

    /// Confirmed state of `address`. Unknown accounts are all-zero.
    fn account(&self, address: &Address) -> AccountState;

    /// Encoded block at `number`, if stored.
    fn block(&self, number: u64) -> Option<Vec<u8>>;

    /// Encoded block header at `number`, if stored.
    fn block_header(&self, number: u64) -> Option<Vec<u8>>;
}

/// Notification that a block was appended to the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCommit {
    pub number: u64,
    pub transactions: Vec<Transaction>,
}

impl BlockCommit {
    /// Every account whose confirmed state the block may have changed.
    pub fn affected_accounts(&self) -> BTreeSet<Address> {
        self.transactions
            .iter()
            .flat_map(|tx| [tx.sender(), tx.to])
            .collect()
    }
}
