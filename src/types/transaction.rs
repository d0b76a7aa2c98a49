use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{Address, CryptoError, PrivateKey, PublicKey, Signature};
use crate::random::random_i64_below;
use crate::types::{Hash, Hasher, TxHasher};

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("the verified transaction has no signature")]
    MissingSignature,
    #[error("tx [{hash}] signature verification failed")]
    BadSigner { hash: Hash },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A value transfer with an opaque payload.
///
/// The canonical signing domain covers `to || value || from || nonce ||
/// data` in that order, so `from` must be set before the hash is taken;
/// `sign` does both.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub data: Vec<u8>,
    pub to: Address,
    pub value: u64,
    pub from: PublicKey,
    pub nonce: i64,
    pub signature: Option<Signature>,

    #[serde(skip)]
    hash: Hash,
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        // The cached hash is derived state, not identity.
        self.data == other.data
            && self.to == other.to
            && self.value == other.value
            && self.from == other.from
            && self.nonce == other.nonce
            && self.signature == other.signature
    }
}

impl Eq for Transaction {}

impl Transaction {
    /// Nonce is random until nonce queries against chain state exist.
    pub fn new(data: Vec<u8>, to: Address, value: u64) -> Self {
        let nonce = random_i64_below(i64::MAX).unwrap_or(0);
        Self {
            data,
            to,
            value,
            from: PublicKey(Vec::new()),
            nonce,
            signature: None,
            hash: Hash::zero(),
        }
    }

    /// Canonical signing bytes: length-prefixed little-endian layout.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(32 + 8 + 2 + self.from.0.len() + 8 + 4 + self.data.len());
        buf.extend_from_slice(self.to.as_bytes());
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&(self.from.0.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.from.0);
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Cached canonical hash; recomputed when unset or invalidated.
    pub fn hash<H: Hasher<Transaction>>(&mut self, hasher: H) -> Hash {
        if self.hash.is_zero() {
            self.hash = hasher.hash(self);
        }
        self.hash
    }

    pub fn invalidate_hash(&mut self) {
        self.hash = Hash::zero();
    }

    /// Sets `from`, invalidates the cached hash, and signs the canonical
    /// hash.
    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), TransactionError> {
        self.from = key.public_key();
        self.invalidate_hash();
        let hash = self.hash(TxHasher);
        self.signature = Some(key.sign(&hash)?);
        Ok(())
    }

    /// Recovers the public key of whoever signed the canonical hash.
    /// Verification is implicit: callers compare the result to `from` (or
    /// to an expected sender).
    pub fn signer(&self) -> Result<PublicKey, TransactionError> {
        let sig = self.signature.as_ref().ok_or(TransactionError::MissingSignature)?;
        let hash = TxHasher.hash(self);
        Ok(sig.recover(&hash)?)
    }

    /// Recover-and-compare check against the declared sender.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let signer = self.signer()?;
        if signer != self.from {
            return Err(TransactionError::BadSigner { hash: TxHasher.hash(self) });
        }
        Ok(())
    }
}
