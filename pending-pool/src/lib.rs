//! Tessera pending transaction pool
//!
//! Admission control for transactions that have not yet been included in a
//! block. Each sender's transactions become visible as *pending* strictly in
//! nonce order; a transaction that arrives ahead of its predecessors is
//! staged until the gap closes.
//!
//! ## Architecture
//!
//! ```text
//!  ┌────────────────────────┐    ┌─────────────────────────┐
//!  │ session handler (p2p)  │    │ local wallet / API      │
//!  │ add_transaction        │    │ add_transaction_sync    │
//!  └───────────┬────────────┘    └────────────┬────────────┘
//!              │  crossbeam channels          │
//!  ┌───────────▼──────────────────────────────▼────────────┐
//!  │ worker thread: Admission                              │
//!  │  • structural / duplicate / reserved / time checks    │
//!  │  • per-sender projected account + staged nonces       │
//!  │  • re-base on BlockCommit                             │
//!  └───────────┬──────────────────────────────┬────────────┘
//!              │                              │
//!  ┌───────────▼────────────┐    ┌────────────▼────────────┐
//!  │ PendingSet (RwLock)    │    │ TransactionRelay        │
//!  │ ordered snapshot       │    │ gossip to peers         │
//!  └────────────────────────┘    └─────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module        | Purpose |
//! |---------------|---------|
//! | [`config`]    | `PoolConfig` defaults and validation |
//! | [`pool`]      | `PendingPool` front end, worker, counters |
//! | [`admission`] | Per-sender nonce ordering and staging |
//! | [`error`]     | Admission codes and pool errors |

pub mod admission;
pub mod config;
pub mod error;
pub mod pool;

pub use {
    admission::PendingTransaction,
    config::PoolConfig,
    error::{PoolError, TxError},
    pool::{now_ms, PendingPool, PoolStatsSnapshot, ProcessingResult, TransactionRelay},
};
