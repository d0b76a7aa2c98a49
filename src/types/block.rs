use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{CryptoError, PrivateKey, PublicKey, Signature};
use crate::types::encoding::{BincodeEncoder, CodecError, Encoder};
use crate::types::poi::{Difficulty, ProofOfInteraction};
use crate::types::transaction::{Transaction, TransactionError};
use crate::types::{hash_bytes, Hash, Hasher, HeaderHasher};

/// Version byte carried in every header's canonical encoding.
pub const PROTOCOL_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("the verified block has neither a signature nor a proof")]
    MissingSeal,
    #[error("block [{hash}] data hash verification failed")]
    DataHashMismatch { hash: Hash },
    #[error("block [{hash}] header signature public key recovery failed")]
    SignerRecovery { hash: Hash },
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub data_hash: Hash,
    pub prev_block_hash: Hash,
    pub height: u32,
    /// Unix timestamp in nanoseconds.
    pub timestamp: i64,
    pub difficulty: Difficulty,
}

impl Header {
    /// Canonical header bytes, hashed for the block id. Fixed-width
    /// little-endian layout; every node must agree byte-for-byte.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 32 + 32 + 4 + 8 + 4 + 4);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.data_hash.as_bytes());
        buf.extend_from_slice(self.prev_block_hash.as_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.difficulty.min.to_le_bytes());
        buf.extend_from_slice(&self.difficulty.max.to_le_bytes());
        buf
    }
}

/// A header, its transactions, and exactly one seal: a legacy signature
/// over the header hash (genesis and bootstrap only) or a
/// Proof-of-Interaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub signature: Option<Signature>,
    pub proof: Option<ProofOfInteraction>,

    #[serde(skip)]
    header_hash: Hash,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header
            && self.transactions == other.transactions
            && self.signature == other.signature
            && self.proof == other.proof
    }
}

impl Eq for Block {}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions, signature: None, proof: None, header_hash: Hash::zero() }
    }

    /// Builds an unsealed child block on top of `prev`.
    pub fn from_prev_header(
        prev: &Header,
        transactions: Vec<Transaction>,
        difficulty: Difficulty,
    ) -> Result<Self, BlockError> {
        let header = Header {
            version: PROTOCOL_VERSION,
            data_hash: compute_data_hash(&transactions)?,
            prev_block_hash: HeaderHasher.hash(prev),
            height: prev.height + 1,
            timestamp: unix_nanos(),
            difficulty,
        };
        Ok(Self::new(header, transactions))
    }

    /// Appends a transaction and recomputes the data hash. Never touches
    /// `prev_block_hash` or `height`.
    pub fn add_tx(&mut self, tx: Transaction) -> Result<(), BlockError> {
        self.transactions.push(tx);
        self.header.data_hash = compute_data_hash(&self.transactions)?;
        self.invalidate_header_hash();
        Ok(())
    }

    pub fn add_txs(&mut self, txs: Vec<Transaction>) -> Result<(), BlockError> {
        self.transactions.extend(txs);
        self.header.data_hash = compute_data_hash(&self.transactions)?;
        self.invalidate_header_hash();
        Ok(())
    }

    /// Legacy seal: signs the header hash directly. Consensus blocks carry
    /// a proof instead.
    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), BlockError> {
        let hash = self.header_hash(HeaderHasher);
        self.signature = Some(key.sign(&hash)?);
        Ok(())
    }

    pub fn set_proof(&mut self, proof: ProofOfInteraction) {
        self.proof = Some(proof);
    }

    /// Recovers the signer of the legacy header signature.
    pub fn signer(&self) -> Result<PublicKey, BlockError> {
        let sig = self.signature.as_ref().ok_or(BlockError::MissingSeal)?;
        let hash = HeaderHasher.hash(&self.header);
        sig.recover(&hash).map_err(|_| BlockError::SignerRecovery { hash })
    }

    /// Cached header hash; recomputed when unset or invalidated. Mutating
    /// methods call `invalidate_header_hash`.
    pub fn header_hash<H: Hasher<Header>>(&mut self, hasher: H) -> Hash {
        if self.header_hash.is_zero() {
            self.header_hash = hasher.hash(&self.header);
        }
        self.header_hash
    }

    pub fn invalidate_header_hash(&mut self) {
        self.header_hash = Hash::zero();
    }

    /// Checks the block body: a seal must be present, every transaction
    /// signature must recover, and the recomputed data hash must match the
    /// header.
    pub fn verify_data(&self) -> Result<(), BlockError> {
        if self.signature.is_none() && self.proof.is_none() {
            return Err(BlockError::MissingSeal);
        }

        for tx in &self.transactions {
            tx.signer()?;
        }

        let computed = compute_data_hash(&self.transactions)?;
        if computed != self.header.data_hash {
            return Err(BlockError::DataHashMismatch { hash: HeaderHasher.hash(&self.header) });
        }

        Ok(())
    }
}

/// Hash of all transactions: BLAKE2b-256 over their concatenated
/// structured encodings.
pub fn compute_data_hash(txs: &[Transaction]) -> Result<Hash, BlockError> {
    let mut buf = Vec::new();
    let mut enc = BincodeEncoder::new(&mut buf);
    for tx in txs {
        enc.encode(tx)?;
    }
    Ok(hash_bytes(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Address;
    use crate::types::encoding::{BincodeDecoder, Decoder};

    fn signed_tx(key: &PrivateKey, value: u64) -> Transaction {
        let to = PrivateKey::generate().public_key().address();
        let mut tx = Transaction::new(b"tx data".to_vec(), to, value);
        tx.sign(key).unwrap();
        tx
    }

    fn test_block(txs: Vec<Transaction>) -> Block {
        let prev = Header {
            version: PROTOCOL_VERSION,
            data_hash: Hash::zero(),
            prev_block_hash: Hash::zero(),
            height: 0,
            timestamp: 1,
            difficulty: Difficulty::new(5, 15),
        };
        Block::from_prev_header(&prev, txs, Difficulty::new(5, 15)).unwrap()
    }

    #[test]
    fn add_tx_recomputes_data_hash_and_invalidates_cache() {
        let key = PrivateKey::generate();
        let mut block = test_block(vec![]);
        let before = block.header_hash(HeaderHasher);

        block.add_tx(signed_tx(&key, 10)).unwrap();
        let after = block.header_hash(HeaderHasher);

        assert_ne!(before, after);
        assert_eq!(block.header.data_hash, compute_data_hash(&block.transactions).unwrap());
    }

    #[test]
    fn verify_data_requires_a_seal() {
        let block = test_block(vec![]);
        assert!(matches!(block.verify_data(), Err(BlockError::MissingSeal)));
    }

    #[test]
    fn signed_block_verifies_and_recovers_signer() {
        let key = PrivateKey::generate();
        let mut block = test_block(vec![signed_tx(&key, 7)]);
        block.sign(&key).unwrap();

        block.verify_data().unwrap();
        assert_eq!(block.signer().unwrap(), key.public_key());
    }

    #[test]
    fn verify_data_detects_data_hash_mismatch() {
        let key = PrivateKey::generate();
        let mut block = test_block(vec![signed_tx(&key, 7)]);
        block.sign(&key).unwrap();

        block.header.data_hash = hash_bytes(b"forged");
        assert!(matches!(block.verify_data(), Err(BlockError::DataHashMismatch { .. })));
    }

    #[test]
    fn tampered_tx_changes_recovered_signer() {
        let key = PrivateKey::generate();
        let mut block = test_block(vec![signed_tx(&key, 7)]);
        block.sign(&key).unwrap();

        block.transactions[0].to = Address([0xAB; 32]);
        block.transactions[0].invalidate_hash();
        let recovered = block.transactions[0].signer().unwrap();
        assert_ne!(recovered, key.public_key());
    }

    #[test]
    fn block_round_trips_through_codec() {
        let key = PrivateKey::generate();
        let mut block = test_block(vec![signed_tx(&key, 3), signed_tx(&key, 4)]);
        block.sign(&key).unwrap();

        let mut buf = Vec::new();
        BincodeEncoder::new(&mut buf).encode(&block).unwrap();
        let decoded: Block = BincodeDecoder::new(buf.as_slice()).decode().unwrap();

        assert_eq!(decoded, block);
    }

    #[test]
    fn proof_sealed_block_round_trips_through_codec() {
        let key = PrivateKey::generate();
        let mut block = test_block(vec![signed_tx(&key, 3)]);
        let sig = |tag: &[u8]| key.sign(&hash_bytes(tag)).unwrap();
        block.set_proof(ProofOfInteraction {
            initial: sig(b"s0"),
            tour_sigs: vec![sig(b"s1"), sig(b"s1'"), sig(b"s2"), sig(b"s2'")],
        });

        let mut buf = Vec::new();
        BincodeEncoder::new(&mut buf).encode(&block).unwrap();
        let decoded: Block = BincodeDecoder::new(buf.as_slice()).decode().unwrap();

        assert_eq!(decoded, block);
        assert_eq!(decoded.proof.as_ref().map(|p| p.len()), Some(2));
    }

    #[test]
    fn header_mutation_invalidates_cached_hash() {
        let mut block = test_block(vec![]);
        let first = block.header_hash(HeaderHasher);

        block.header.timestamp += 1;
        block.invalidate_header_hash();
        assert_ne!(block.header_hash(HeaderHasher), first);
    }
}
