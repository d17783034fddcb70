//! Account view and the balance effect of each transaction type.

use {
    crate::{
        error::{LedgerError, Result},
        transaction::{Transaction, TransactionType},
    },
    serde::{Deserialize, Serialize},
};

/// Amount a delegate registration must burn.
pub const DELEGATE_BURN_AMOUNT: u64 = 1_000_000_000_000;

/// Confirmed state of one account as seen by the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Next nonce the account may use.
    pub nonce: u64,
    /// Spendable balance.
    pub available: u64,
    /// Balance locked in votes.
    pub locked: u64,
}

impl AccountState {
    pub fn new(nonce: u64, available: u64, locked: u64) -> Self {
        Self {
            nonce,
            available,
            locked,
        }
    }

    /// Apply `tx` as its sender, debiting fees and moving value between the
    /// available and locked balances. Leaves `self` untouched on error.
    ///
    /// Credits to the recipient are not modelled here.
    pub fn apply_as_sender(&mut self, tx: &Transaction) -> Result<()> {
        if tx.nonce != self.nonce {
            return Err(LedgerError::NonceMismatch {
                expected: self.nonce,
                actual: tx.nonce,
            });
        }

        let mut next = *self;
        match tx.kind {
            TransactionType::Transfer => {
                next.available = debit(next.available, tx.value.saturating_add(tx.fee))?;
            }
            TransactionType::Delegate => {
                if tx.value < DELEGATE_BURN_AMOUNT {
                    return Err(LedgerError::InvalidDelegateBurn(DELEGATE_BURN_AMOUNT));
                }
                next.available = debit(next.available, tx.value.saturating_add(tx.fee))?;
            }
            TransactionType::Vote => {
                next.available = debit(next.available, tx.value.saturating_add(tx.fee))?;
                next.locked = next.locked.saturating_add(tx.value);
            }
            TransactionType::Unvote => {
                next.locked = next.locked.checked_sub(tx.value).ok_or(
                    LedgerError::InsufficientLocked {
                        needed: tx.value,
                        locked: next.locked,
                    },
                )?;
                next.available = debit(next.available, tx.fee)?.saturating_add(tx.value);
            }
        }
        next.nonce = next.nonce.saturating_add(1);
        *self = next;
        Ok(())
    }
}

fn debit(available: u64, needed: u64) -> Result<u64> {
    available
        .checked_sub(needed)
        .ok_or(LedgerError::InsufficientAvailable { needed, available })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{key::Key, types::Network, Address},
        assert_matches::assert_matches,
    };

    fn tx(kind: TransactionType, value: u64, nonce: u64) -> Transaction {
        let key = Key::from_seed(&[2u8; 32]).unwrap();
        Transaction::new_signed(
            &key,
            Network::Devnet,
            kind,
            Address([1u8; 20]),
            value,
            5,
            nonce,
            0,
            vec![],
        )
    }

    #[test]
    fn test_transfer_debits_value_and_fee() {
        let mut account = AccountState::new(0, 100, 0);
        account
            .apply_as_sender(&tx(TransactionType::Transfer, 50, 0))
            .unwrap();
        assert_eq!(account, AccountState::new(1, 45, 0));
    }

    #[test]
    fn test_vote_then_unvote() {
        let mut account = AccountState::new(3, 100, 0);
        account.apply_as_sender(&tx(TransactionType::Vote, 40, 3)).unwrap();
        assert_eq!(account, AccountState::new(4, 55, 40));
        account
            .apply_as_sender(&tx(TransactionType::Unvote, 40, 4))
            .unwrap();
        assert_eq!(account, AccountState::new(5, 90, 0));
    }

    #[test]
    fn test_failures_leave_state_untouched() {
        let mut account = AccountState::new(0, 10, 0);
        assert_matches!(
            account.apply_as_sender(&tx(TransactionType::Transfer, 50, 0)),
            Err(LedgerError::InsufficientAvailable { needed: 55, available: 10 })
        );
        assert_matches!(
            account.apply_as_sender(&tx(TransactionType::Unvote, 1, 0)),
            Err(LedgerError::InsufficientLocked { .. })
        );
        assert_matches!(
            account.apply_as_sender(&tx(TransactionType::Transfer, 1, 7)),
            Err(LedgerError::NonceMismatch { expected: 0, actual: 7 })
        );
        assert_matches!(
            account.apply_as_sender(&tx(TransactionType::Delegate, 1, 0)),
            Err(LedgerError::InvalidDelegateBurn(_))
        );
        assert_eq!(account, AccountState::new(0, 10, 0));
    }
}
