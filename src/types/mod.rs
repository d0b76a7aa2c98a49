use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod block;
pub mod encoding;
pub mod poi;
pub mod transaction;

pub use block::{Block, Header, PROTOCOL_VERSION};
pub use poi::{Difficulty, ProofOfInteraction};
pub use transaction::Transaction;

/// BLAKE2b with a 256-bit output, the protocol hash for every domain
/// (header hashes, transaction hashes, addresses, tour chaining).
pub type Blake2b256 = Blake2b<U32>;

pub const HASH_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("byte slice length {0} should match hash length {HASH_SIZE}")]
    BadLength(usize),
    #[error("invalid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
}

/// A 32-byte digest. The all-zero value is the sentinel for "unset or
/// invalidated" and never occurs as a real BLAKE2b output in practice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    pub fn zero() -> Self {
        Self([0u8; HASH_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, HashError> {
        if b.len() != HASH_SIZE {
            return Err(HashError::BadLength(b.len()));
        }
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(b);
        Ok(Self(out))
    }

    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        Self::from_bytes(&hex::decode(s)?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// BLAKE2b-256 of a byte slice.
pub fn hash_bytes(b: &[u8]) -> Hash {
    let mut hasher = Blake2b256::new();
    hasher.update(b);
    let out = hasher.finalize();
    let mut digest = [0u8; HASH_SIZE];
    digest.copy_from_slice(&out);
    Hash(digest)
}

/// BLAKE2b-256 over the concatenation of two byte slices.
pub fn hash_concat(a: &[u8], b: &[u8]) -> Hash {
    let mut hasher = Blake2b256::new();
    hasher.update(a);
    hasher.update(b);
    let out = hasher.finalize();
    let mut digest = [0u8; HASH_SIZE];
    digest.copy_from_slice(&out);
    Hash(digest)
}

/// Computes the canonical digest of a `T`. Implemented for headers and
/// transactions so consensus code can stay generic over what it hashes.
pub trait Hasher<T> {
    fn hash(&self, value: &T) -> Hash;
}

/// Hashes a block header over its canonical byte encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderHasher;

impl Hasher<Header> for HeaderHasher {
    fn hash(&self, header: &Header) -> Hash {
        hash_bytes(&header.canonical_bytes())
    }
}

/// Hashes a transaction over its canonical signing domain.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxHasher;

impl Hasher<Transaction> for TxHasher {
    fn hash(&self, tx: &Transaction) -> Hash {
        hash_bytes(&tx.canonical_bytes())
    }
}
