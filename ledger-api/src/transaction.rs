//! Signed transactions.

use {
    crate::{
        key::{self, Key},
        types::{Address, Network, TxHash},
    },
    serde::{Deserialize, Serialize},
};

/// Operation a transaction performs on the sender's account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Move `value` from the sender to `to`.
    Transfer,
    /// Register the sender as a delegate, burning `value`.
    Delegate,
    /// Lock `value` as a vote for the delegate at `to`.
    Vote,
    /// Release `value` previously locked as a vote for `to`.
    Unvote,
}

/// A signed transaction.
///
/// The hash covers every field except the public key and signature; the
/// signature covers the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub network: Network,
    pub kind: TransactionType,
    pub to: Address,
    pub value: u64,
    pub fee: u64,
    pub nonce: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub data: Vec<u8>,
    pub public_key: [u8; 32],
    pub signature: Vec<u8>,
}

/// The signed portion of a transaction.
#[derive(Serialize)]
struct TransactionBody<'a> {
    network: u8,
    kind: TransactionType,
    to: &'a Address,
    value: u64,
    fee: u64,
    nonce: u64,
    timestamp: u64,
    data: &'a [u8],
}

impl Transaction {
    /// Build and sign a transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn new_signed(
        key: &Key,
        network: Network,
        kind: TransactionType,
        to: Address,
        value: u64,
        fee: u64,
        nonce: u64,
        timestamp: u64,
        data: Vec<u8>,
    ) -> Self {
        let mut tx = Self {
            network,
            kind,
            to,
            value,
            fee,
            nonce,
            timestamp,
            data,
            public_key: key.public_key(),
            signature: Vec::new(),
        };
        tx.signature = key.sign(&tx.hash().0);
        tx
    }

    pub fn hash(&self) -> TxHash {
        let body = TransactionBody {
            network: self.network.id(),
            kind: self.kind,
            to: &self.to,
            value: self.value,
            fee: self.fee,
            nonce: self.nonce,
            timestamp: self.timestamp,
            data: &self.data,
        };
        // Serializing plain integers and byte slices cannot fail.
        let bytes = bincode::serialize(&body).unwrap_or_default();
        TxHash::digest(&bytes)
    }

    /// The account that pays for this transaction.
    pub fn sender(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    pub fn verify_signature(&self) -> bool {
        key::verify(&self.public_key, &self.hash().0, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(key: &Key, nonce: u64) -> Transaction {
        Transaction::new_signed(
            key,
            Network::Devnet,
            TransactionType::Transfer,
            Address([3u8; 20]),
            10,
            1,
            nonce,
            1_700_000_000_000,
            b"memo".to_vec(),
        )
    }

    #[test]
    fn test_signed_transaction_verifies() {
        let key = Key::from_seed(&[5u8; 32]).unwrap();
        let tx = transfer(&key, 0);
        assert!(tx.verify_signature());
        assert_eq!(tx.sender(), key.address());
    }

    #[test]
    fn test_tampering_breaks_signature() {
        let key = Key::from_seed(&[5u8; 32]).unwrap();
        let mut tx = transfer(&key, 0);
        tx.value = 1_000;
        assert!(!tx.verify_signature());

        let mut tx = transfer(&key, 0);
        tx.public_key = Key::from_seed(&[6u8; 32]).unwrap().public_key();
        assert!(!tx.verify_signature());
    }

    #[test]
    fn test_hash_depends_on_nonce() {
        let key = Key::from_seed(&[5u8; 32]).unwrap();
        assert_ne!(transfer(&key, 0).hash(), transfer(&key, 1).hash());
        assert_eq!(transfer(&key, 1).hash(), transfer(&key, 1).hash());
    }
}
