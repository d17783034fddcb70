//! Tessera ledger API
//!
//! Types shared between the networking layer and the pending transaction
//! pool, plus the [`Ledger`] trait through which both consult chain state.
//! Persistent block and account storage lives behind that trait and is not
//! part of this crate; [`MemoryLedger`] is an in-process implementation used
//! by the node binary and by tests.
//!
//! ## Crate modules
//!
//! | Module          | Purpose |
//! |-----------------|---------|
//! | [`types`]       | `Network`, `Address`, `TxHash` |
//! | [`key`]         | ed25519 signing identity |
//! | [`transaction`] | Signed transaction and its hash |
//! | [`account`]     | Account view and per-type balance effects |
//! | [`ledger`]      | `Ledger` collaborator trait, `BlockCommit` |
//! | [`memory`]      | `MemoryLedger` |
//! | [`error`]       | Crate-wide error enum |

pub mod account;
pub mod error;
pub mod key;
pub mod ledger;
pub mod memory;
pub mod transaction;
pub mod types;

pub use {
    account::AccountState,
    error::{LedgerError, Result},
    key::Key,
    ledger::{BlockCommit, Ledger},
    memory::MemoryLedger,
    transaction::{Transaction, TransactionType},
    types::{Address, Network, TxHash},
};
