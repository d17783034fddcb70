//! ed25519 signing identity.
//!
//! A node's coinbase key signs its handshakes; wallet keys sign
//! transactions. Both derive their [`Address`] the same way.

use {
    crate::{
        error::{LedgerError, Result},
        types::Address,
    },
    ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier},
    std::fmt,
};

/// Length of an encoded signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// An ed25519 keypair plus its derived address.
pub struct Key {
    keypair: Keypair,
    address: Address,
}

impl Key {
    /// Build a key from a 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_bytes(seed).map_err(|_| LedgerError::InvalidKey)?;
        let public = PublicKey::from(&secret);
        let address = Address::from_public_key(public.as_bytes());
        Ok(Self {
            keypair: Keypair { secret, public },
            address,
        })
    }

    /// Generate a fresh random key.
    pub fn new_random() -> Self {
        let seed: [u8; 32] = rand::random();
        // Any 32 bytes form a valid ed25519 secret.
        Self::from_seed(&seed).expect("32-byte seed is always a valid secret key")
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keypair.sign(message).to_bytes().to_vec()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key").field("address", &self.address).finish()
    }
}

/// Verify `signature` over `message` against a raw public key.
///
/// Malformed keys or signatures simply fail verification.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> bool {
    if signature.len() != SIGNATURE_LEN {
        return false;
    }
    let Ok(public) = PublicKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    public.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = Key::from_seed(&[1u8; 32]).unwrap();
        let sig = key.sign(b"hello");
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(verify(&key.public_key(), b"hello", &sig));
        assert!(!verify(&key.public_key(), b"hellO", &sig));
        assert!(!verify(&key.public_key(), b"hello", &sig[..10]));
    }

    #[test]
    fn test_address_is_stable_per_seed() {
        let a = Key::from_seed(&[9u8; 32]).unwrap();
        let b = Key::from_seed(&[9u8; 32]).unwrap();
        assert_eq!(a.address(), b.address());
        assert_ne!(a.address(), Key::new_random().address());
    }
}
