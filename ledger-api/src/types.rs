//! Identifiers shared across the node.

use {
    crate::error::{LedgerError, Result},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    std::{fmt, str::FromStr},
};

/// Length of an account address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Length of a transaction hash in bytes.
pub const HASH_LEN: usize = 32;

// ── Network ─────────────────────────────────────────────────────────────────

/// The chain a node (or a transaction) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl Network {
    /// Wire identifier.
    pub fn id(self) -> u8 {
        match self {
            Self::Mainnet => 0,
            Self::Testnet => 1,
            Self::Devnet => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Mainnet),
            1 => Some(Self::Testnet),
            2 => Some(Self::Devnet),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Devnet => "devnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "devnet" => Ok(Self::Devnet),
            other => Err(LedgerError::UnknownNetwork(other.to_string())),
        }
    }
}

// ── Address ─────────────────────────────────────────────────────────────────

/// A 20-byte account address: the trailing 20 bytes of SHA-256 over an
/// ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// The all-zero address. Value sent here is unrecoverable.
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = Sha256::digest(public_key);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[HASH_LEN.saturating_sub(ADDRESS_LEN)..]);
        Self(bytes)
    }

    /// Lowercase hex, 40 characters. Used as the peer id on the wire.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let expected = ADDRESS_LEN;
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| LedgerError::InvalidHex { expected })?;
        let bytes: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| LedgerError::InvalidHex { expected })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

// ── Transaction hash ────────────────────────────────────────────────────────

/// SHA-256 digest identifying a transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TxHash(pub [u8; HASH_LEN]);

impl TxHash {
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "TxHash({}..)", hex::encode(&self.0[..6]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_ids_roundtrip() {
        for network in [Network::Mainnet, Network::Testnet, Network::Devnet] {
            assert_eq!(Network::from_id(network.id()), Some(network));
            assert_eq!(network.name().parse::<Network>().unwrap(), network);
        }
        assert_eq!(Network::from_id(9), None);
        assert!("moonnet".parse::<Network>().is_err());
    }

    #[test]
    fn test_address_hex() {
        let address = Address::from_public_key(&[7u8; 32]);
        let hex = address.to_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(Address::from_hex(&hex).unwrap(), address);
        assert_eq!(format!("0x{hex}").parse::<Address>().unwrap(), address);
        assert_eq!(
            Address::from_hex("abcd"),
            Err(LedgerError::InvalidHex { expected: 20 })
        );
    }
}
