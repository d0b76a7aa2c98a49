use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::hash_bytes;

pub mod keys;

pub use keys::{PrivateKey, PublicKey, Signature};

pub const ADDRESS_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid private key bytes")]
    InvalidPrivateKey,
    #[error("public key recovery failed")]
    RecoveryFailed,
    #[error("signing failed")]
    SigningFailed,
    #[error("byte slice length {0} should match address length {ADDRESS_SIZE}")]
    BadAddressLength(usize),
    #[error("invalid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
}

/// Public account identity: the BLAKE2b-256 digest of a public key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    /// An address owns a public key iff it is that key's digest.
    pub fn is_owner(&self, pk: &PublicKey) -> bool {
        hash_bytes(pk.as_bytes()).0 == self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, CryptoError> {
        if b.len() != ADDRESS_SIZE {
            return Err(CryptoError::BadAddressLength(b.len()));
        }
        let mut out = [0u8; ADDRESS_SIZE];
        out.copy_from_slice(b);
        Ok(Self(out))
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&hex::decode(s)?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_owns_its_key() {
        let key = PrivateKey::generate();
        let pk = key.public_key();
        let addr = pk.address();
        assert!(addr.is_owner(&pk));

        let other = PrivateKey::generate().public_key();
        assert!(!addr.is_owner(&other));
    }

    #[test]
    fn address_hex_round_trip() {
        let addr = PrivateKey::generate().public_key().address();
        assert_eq!(Address::from_hex(&addr.to_hex()).unwrap(), addr);
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert!(Address::from_bytes(&[1u8; 20]).is_err());
    }
}
