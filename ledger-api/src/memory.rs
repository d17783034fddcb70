//! In-process [`Ledger`] implementation.
//!
//! Keeps accounts, transaction hashes and encoded blocks in memory. Blocks
//! are produced by [`MemoryLedger::commit_block`], which applies each
//! transaction and returns the [`BlockCommit`] notification for the pool.

use {
    crate::{
        account::AccountState,
        ledger::{BlockCommit, Ledger},
        transaction::{Transaction, TransactionType},
        types::{Address, TxHash},
    },
    log::{debug, warn},
    parking_lot::RwLock,
    serde::Serialize,
    std::collections::{HashMap, HashSet},
};

#[derive(Serialize)]
struct StoredHeader {
    number: u64,
    parent: TxHash,
    transactions_root: TxHash,
    transaction_count: u32,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Address, AccountState>,
    transactions: HashSet<TxHash>,
    /// (header, block) encodings indexed by block number.
    blocks: Vec<(Vec<u8>, Vec<u8>)>,
    validators: Vec<String>,
}

/// Thread-safe in-memory chain.
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<State>,
}

impl MemoryLedger {
    /// Create a ledger holding only an empty genesis block.
    pub fn new() -> Self {
        let ledger = Self::default();
        ledger.commit_block(Vec::new());
        ledger
    }

    /// Credit `available` to an account, creating it if needed.
    pub fn fund(&self, address: Address, available: u64) {
        let mut state = self.state.write();
        let account = state.accounts.entry(address).or_default();
        account.available = account.available.saturating_add(available);
    }

    pub fn set_account(&self, address: Address, account: AccountState) {
        self.state.write().accounts.insert(address, account);
    }

    pub fn set_validators(&self, validators: Vec<String>) {
        self.state.write().validators = validators;
    }

    /// Append a block holding every transaction in `transactions` that
    /// applies cleanly, in order. Returns the commit notification listing
    /// the included transactions.
    pub fn commit_block(&self, transactions: Vec<Transaction>) -> BlockCommit {
        let mut state = self.state.write();
        let number = state.blocks.len() as u64;

        let mut included = Vec::with_capacity(transactions.len());
        for tx in transactions {
            let hash = tx.hash();
            if state.transactions.contains(&hash) {
                warn!("skipping duplicate transaction {hash} in block {number}");
                continue;
            }
            let sender = tx.sender();
            let mut account = state.accounts.get(&sender).copied().unwrap_or_default();
            if let Err(e) = account.apply_as_sender(&tx) {
                warn!("skipping transaction {hash} in block {number}: {e}");
                continue;
            }
            state.accounts.insert(sender, account);
            if tx.kind == TransactionType::Transfer {
                let recipient = state.accounts.entry(tx.to).or_default();
                recipient.available = recipient.available.saturating_add(tx.value);
            }
            state.transactions.insert(hash);
            included.push(tx);
        }

        let parent = state
            .blocks
            .last()
            .map(|(header, _)| TxHash::digest(header))
            .unwrap_or_default();
        let hashes: Vec<u8> = included.iter().flat_map(|tx| tx.hash().0).collect();
        let header = StoredHeader {
            number,
            parent,
            transactions_root: TxHash::digest(&hashes),
            transaction_count: u32::try_from(included.len()).unwrap_or(u32::MAX),
        };
        let header = bincode::serialize(&header).unwrap_or_default();
        let block = bincode::serialize(&(&header, &included)).unwrap_or_default();
        state.blocks.push((header, block));
        debug!("committed block {number} with {} transactions", included.len());

        BlockCommit {
            number,
            transactions: included,
        }
    }
}

impl Ledger for MemoryLedger {
    fn latest_block_number(&self) -> u64 {
        (self.state.read().blocks.len() as u64).saturating_sub(1)
    }

    fn validators(&self) -> Vec<String> {
        self.state.read().validators.clone()
    }

    fn has_transaction(&self, hash: &TxHash) -> bool {
        self.state.read().transactions.contains(hash)
    }

    fn account(&self, address: &Address) -> AccountState {
        self.state
            .read()
            .accounts
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    fn block(&self, number: u64) -> Option<Vec<u8>> {
        let index = usize::try_from(number).ok()?;
        self.state.read().blocks.get(index).map(|(_, b)| b.clone())
    }

    fn block_header(&self, number: u64) -> Option<Vec<u8>> {
        let index = usize::try_from(number).ok()?;
        self.state.read().blocks.get(index).map(|(h, _)| h.clone())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{key::Key, types::Network},
    };

    fn transfer(key: &Key, to: Address, value: u64, nonce: u64) -> Transaction {
        Transaction::new_signed(
            key,
            Network::Devnet,
            TransactionType::Transfer,
            to,
            value,
            1,
            nonce,
            0,
            vec![],
        )
    }

    #[test]
    fn test_genesis_only() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.latest_block_number(), 0);
        assert!(ledger.block(0).is_some());
        assert!(ledger.block_header(0).is_some());
        assert!(ledger.block(1).is_none());
    }

    #[test]
    fn test_commit_applies_and_skips_invalid() {
        let ledger = MemoryLedger::new();
        let alice = Key::from_seed(&[1u8; 32]).unwrap();
        let bob = Address([9u8; 20]);
        ledger.fund(alice.address(), 100);

        let good = transfer(&alice, bob, 10, 0);
        let bad_nonce = transfer(&alice, bob, 10, 5);
        let commit = ledger.commit_block(vec![good.clone(), bad_nonce, good.clone()]);

        assert_eq!(commit.number, 1);
        assert_eq!(commit.transactions, vec![good.clone()]);
        assert!(ledger.has_transaction(&good.hash()));
        assert_eq!(ledger.account(&alice.address()), AccountState::new(1, 89, 0));
        assert_eq!(ledger.account(&bob).available, 10);
        assert!(commit.affected_accounts().contains(&bob));
        assert_eq!(ledger.latest_block_number(), 1);
    }
}
