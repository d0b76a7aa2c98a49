//! ECDSA over secp256k1 with public-key recovery.
//!
//! Signatures are produced over 32-byte digests and serialized as
//! 64 bytes of (r, s) followed by a single recovery-id byte. Recovery is
//! a pure function of (signature, digest): tampering with either yields a
//! different key, so verification is "recover and compare".

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use super::{Address, CryptoError};
use crate::types::{hash_bytes, Hash};

/// Compressed SEC1 public key length.
pub const PUBLIC_KEY_SIZE: usize = 33;
/// (r, s) plus one recovery-id byte.
pub const SIGNATURE_SIZE: usize = 65;

/// Signing half of a keypair. Never serialized.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

impl PrivateKey {
    /// Generates a keypair from OS entropy.
    pub fn generate() -> Self {
        Self { key: SigningKey::random(&mut OsRng) }
    }

    /// Builds a key from a fixed 32-byte scalar, for deterministic tests.
    pub fn from_bytes(b: &[u8]) -> Result<Self, CryptoError> {
        let key = SigningKey::from_slice(b).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { key })
    }

    pub fn public_key(&self) -> PublicKey {
        let point = self.key.verifying_key().to_encoded_point(true);
        PublicKey(point.as_bytes().to_vec())
    }

    /// Signs a 32-byte digest (RFC6979 deterministic nonce).
    pub fn sign(&self, digest: &Hash) -> Result<Signature, CryptoError> {
        let (sig, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest.as_bytes())
            .map_err(|_| CryptoError::SigningFailed)?;
        let mut bytes = Vec::with_capacity(SIGNATURE_SIZE);
        bytes.extend_from_slice(sig.to_bytes().as_ref());
        bytes.push(recovery_id.to_byte());
        Ok(Signature(bytes))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Compressed SEC1 public key bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn address(&self) -> Address {
        Address(hash_bytes(&self.0).0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Short hex prefix for request ids and log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4.min(self.0.len())])
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A recoverable signature bound to the digest it was produced over.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Recovers the public key that produced this signature over `digest`.
    ///
    /// Well-formed inputs always recover *some* key; callers must compare
    /// the result against the claimed identity.
    pub fn recover(&self, digest: &Hash) -> Result<PublicKey, CryptoError> {
        if self.0.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignature);
        }
        let sig = EcdsaSignature::from_slice(&self.0[..64])
            .map_err(|_| CryptoError::InvalidSignature)?;
        let recovery_id =
            RecoveryId::from_byte(self.0[64]).ok_or(CryptoError::InvalidSignature)?;
        let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recovery_id)
            .map_err(|_| CryptoError::RecoveryFailed)?;
        Ok(PublicKey(key.to_encoded_point(true).as_bytes().to_vec()))
    }

    /// Recover-and-compare verification against an expected signer.
    pub fn verify(&self, expected: &PublicKey, digest: &Hash) -> bool {
        match self.recover(digest) {
            Ok(recovered) => recovered == *expected,
            Err(_) => false,
        }
    }
}
