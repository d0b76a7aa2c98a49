//! Blockchain state: block index, longest-chain tracking, difficulty
//! retargeting, and the validation pipeline.
//!
//! Single-writer discipline: `add_block` holds the write lock across
//! validate-then-insert; readers see a consistent snapshot under the read
//! lock. Validation never suspends, so no lock is ever held across an
//! await point.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::consensus::poi::{
    adjust_difficulty, check_poi, generate_poi, PoiContext, PoiError, SignatureRequest,
};
use crate::consensus::tracker::{DoubleTouring, MessageTracker, TourTracker};
use crate::crypto::{Address, CryptoError, PrivateKey, PublicKey, Signature};
use crate::ledger::Ledger;
use crate::types::block::BlockError;
use crate::types::poi::InvalidDifficulty;
use crate::types::{Block, Difficulty, Hash, Hasher, HeaderHasher};

/// Retarget once per this many blocks on the longest chain.
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u32 = 2016;

/// Tracker entries keyed by dependencies older than this many blocks
/// behind the head are pruned.
pub const TRACKER_PRUNE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("genesis block must have height 0, got {0}")]
    BadGenesisHeight(u32),
    #[error("block {0} already exists in chain")]
    BlockAlreadyExists(Hash),
    #[error("block {0} not found")]
    UnknownBlock(Hash),
    #[error("block {hash} at height {height} carries no proof")]
    MissingProof { hash: Hash, height: u32 },
    #[error(
        "block {hash} declares difficulty ({declared_min},{declared_max}), \
         expected ({expected_min},{expected_max}) at height {height}"
    )]
    DifficultyMismatch {
        hash: Hash,
        height: u32,
        declared_min: u32,
        declared_max: u32,
        expected_min: u32,
        expected_max: u32,
    },
    #[error("invalid dependency {0}: not on longest chain")]
    InvalidDependency(Hash),
    #[error(transparent)]
    DoubleTouring(#[from] DoubleTouring),
    #[error(transparent)]
    InvalidDifficulty(#[from] InvalidDifficulty),
    #[error("block {hash} data verification failed: {source}")]
    BadBlockData { hash: Hash, source: BlockError },
    #[error("block {hash} proof verification failed: {source}")]
    BadProof { hash: Hash, source: PoiError },
    #[error(transparent)]
    Poi(#[from] PoiError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Clone, Debug)]
pub struct BlockchainConfig {
    /// Known network nodes, in the order shared by every participant.
    pub nodes: Vec<PublicKey>,
    /// Initial difficulty; also applied to a genesis block that carries
    /// none.
    pub difficulty: Difficulty,
    pub target_block_time_secs: f64,
}

struct ChainState {
    /// Header hash -> block.
    blocks: HashMap<Hash, Block>,
    /// Height -> every indexed block at that height (fork tolerance).
    by_height: HashMap<u32, Vec<Hash>>,
    /// Header hashes of the held longest chain; index equals height.
    longest: Vec<Hash>,
    height: u32,
    nodes: Vec<PublicKey>,
    difficulty: Difficulty,
    /// `(from_height, difficulty)` appended at every retarget; the last
    /// entry with `from_height <= h` is the expected difficulty at `h`.
    schedule: Vec<(u32, Difficulty)>,
    target_block_time_secs: f64,
}

impl ChainState {
    fn expected_difficulty_at(&self, height: u32) -> Difficulty {
        let mut expected = self.difficulty;
        for (from, difficulty) in self.schedule.iter().rev() {
            if *from <= height {
                expected = *difficulty;
                break;
            }
        }
        expected
    }
}

pub struct Blockchain {
    state: RwLock<ChainState>,
    ledger: Ledger,
    tracker: Arc<dyn MessageTracker>,
}

impl Blockchain {
    pub fn new(config: BlockchainConfig, genesis: Block) -> Result<Self, ChainError> {
        Self::with_tracker(config, genesis, Arc::new(TourTracker::new()))
    }

    pub fn with_tracker(
        config: BlockchainConfig,
        mut genesis: Block,
        tracker: Arc<dyn MessageTracker>,
    ) -> Result<Self, ChainError> {
        config.difficulty.validate()?;
        if genesis.header.height != 0 {
            return Err(ChainError::BadGenesisHeight(genesis.header.height));
        }

        if genesis.header.difficulty.is_unset() {
            genesis.header.difficulty = config.difficulty;
            genesis.invalidate_header_hash();
        }

        let genesis_hash = genesis.header_hash(HeaderHasher);
        let mut blocks = HashMap::new();
        blocks.insert(genesis_hash, genesis);
        let mut by_height = HashMap::new();
        by_height.insert(0, vec![genesis_hash]);

        Ok(Self {
            state: RwLock::new(ChainState {
                blocks,
                by_height,
                longest: vec![genesis_hash],
                height: 0,
                nodes: config.nodes,
                difficulty: config.difficulty,
                schedule: vec![(0, config.difficulty)],
                target_block_time_secs: config.target_block_time_secs,
            }),
            ledger: Ledger::new(),
            tracker,
        })
    }

    pub fn height(&self) -> u32 {
        self.state.read().height
    }

    pub fn difficulty(&self) -> Difficulty {
        self.state.read().difficulty
    }

    pub fn nodes(&self) -> Vec<PublicKey> {
        self.state.read().nodes.clone()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn last_block(&self) -> Block {
        let state = self.state.read();
        let head = state.longest[state.longest.len() - 1];
        state.blocks[&head].clone()
    }

    pub fn last_block_hash(&self) -> Hash {
        let state = self.state.read();
        state.longest[state.longest.len() - 1]
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Block, ChainError> {
        self.state
            .read()
            .blocks
            .get(hash)
            .cloned()
            .ok_or(ChainError::UnknownBlock(*hash))
    }

    /// Every indexed block at `height`; more than one under a fork.
    pub fn blocks_at_height(&self, height: u32) -> Vec<Block> {
        let state = self.state.read();
        state
            .by_height
            .get(&height)
            .map(|hashes| hashes.iter().filter_map(|h| state.blocks.get(h).cloned()).collect())
            .unwrap_or_default()
    }

    /// Builds the next block on the current head and walks a PoI tour for
    /// it. The chain snapshot (head, nodes, difficulty) is taken under the
    /// read lock, which is released before the first suspension.
    pub async fn generate_block<F, Fut>(
        &self,
        initiator: &PrivateKey,
        transactions: Vec<crate::types::Transaction>,
        request_sig: F,
    ) -> Result<Block, ChainError>
    where
        F: FnMut(SignatureRequest, PublicKey) -> Fut,
        Fut: Future<Output = Result<Signature, String>>,
    {
        let (prev_header, nodes, difficulty) = {
            let state = self.state.read();
            let head = state.longest[state.longest.len() - 1];
            (state.blocks[&head].header.clone(), state.nodes.clone(), state.difficulty)
        };

        let mut block = Block::from_prev_header(&prev_header, transactions, difficulty)?;
        let dependency = block.header.prev_block_hash;
        let message = block.header.data_hash;

        let ctx = PoiContext { nodes, difficulty };
        let proof = generate_poi(initiator, dependency, message, &ctx, request_sig).await?;
        block.set_proof(proof);

        Ok(block)
    }

    /// Validation pipeline: structure, duplicate, declared difficulty
    /// against the schedule, body (data hash + transaction signers), and
    /// the proof itself.
    fn validate_with(state: &ChainState, block: &Block) -> Result<Hash, ChainError> {
        let hash = HeaderHasher.hash(&block.header);

        if state.blocks.contains_key(&hash) {
            return Err(ChainError::BlockAlreadyExists(hash));
        }

        // Legacy signature-only seals are a genesis/bootstrap artifact.
        if block.proof.is_none() && block.header.height > 0 {
            return Err(ChainError::MissingProof { hash, height: block.header.height });
        }

        let expected = state.expected_difficulty_at(block.header.height);
        if block.header.difficulty != expected {
            return Err(ChainError::DifficultyMismatch {
                hash,
                height: block.header.height,
                declared_min: block.header.difficulty.min,
                declared_max: block.header.difficulty.max,
                expected_min: expected.min,
                expected_max: expected.max,
            });
        }

        block
            .verify_data()
            .map_err(|source| ChainError::BadBlockData { hash, source })?;

        if let Some(proof) = &block.proof {
            let initiator = proof
                .initial
                .recover(&block.header.prev_block_hash)
                .map_err(|source| ChainError::BadProof { hash, source: PoiError::InitialSignature(source) })?;
            let ctx = PoiContext {
                nodes: state.nodes.clone(),
                difficulty: block.header.difficulty,
            };
            check_poi(
                proof,
                &initiator,
                block.header.prev_block_hash,
                block.header.data_hash,
                &ctx,
            )
            .map_err(|source| ChainError::BadProof { hash, source })?;
        }

        Ok(hash)
    }

    pub fn validate_block(&self, block: &Block) -> Result<(), ChainError> {
        Self::validate_with(&self.state.read(), block).map(|_| ())
    }

    /// Validates and indexes a block, extending the longest chain when it
    /// exceeds the current height. Validation errors leave the chain
    /// untouched.
    pub fn add_block(&self, block: Block) -> Result<(), ChainError> {
        let mut state = self.state.write();
        let hash = Self::validate_with(&state, &block)?;

        let height = block.header.height;
        let prev = block.header.prev_block_hash;
        state.blocks.insert(hash, block);
        state.by_height.entry(height).or_default().push(hash);

        if height > state.height {
            state.longest.push(hash);
            state.height = height;
            info!(height, block = %hash.short(), "longest chain extended");

            if height % DIFFICULTY_ADJUSTMENT_INTERVAL == 0 && height > 0 {
                Self::retarget(&mut state);
            }

            // The dependency this block consumed is settled; drop its
            // equivocation entries, along with anything that fell out of
            // the recency window.
            self.tracker.clear(&prev);
            if state.longest.len() > TRACKER_PRUNE_DEPTH {
                let expired = state.longest[state.longest.len() - TRACKER_PRUNE_DEPTH - 1];
                self.tracker.clear(&expired);
            }
        }

        Ok(())
    }

    fn retarget(state: &mut ChainState) {
        if state.height < DIFFICULTY_ADJUSTMENT_INTERVAL {
            return;
        }

        let start_idx = (state.height - DIFFICULTY_ADJUSTMENT_INTERVAL) as usize;
        let (Some(start), Some(end)) = (
            state.blocks.get(&state.longest[start_idx]),
            state.blocks.get(&state.longest[state.height as usize]),
        ) else {
            warn!(height = state.height, "retarget skipped: interval endpoints missing");
            return;
        };

        let span_secs = (end.header.timestamp - start.header.timestamp) as f64 / 1e9;
        let actual = span_secs / f64::from(DIFFICULTY_ADJUSTMENT_INTERVAL);

        let new = adjust_difficulty(
            state.difficulty,
            state.target_block_time_secs,
            actual,
            state.nodes.len(),
        );
        info!(
            height = state.height,
            min = new.min,
            max = new.max,
            "difficulty retargeted"
        );
        state.difficulty = new;
        state.schedule.push((state.height + 1, new));
    }

    /// Accepts a tour message iff its dependency is a header hash on the
    /// current longest chain and the `(sender, dependency)` pair has not
    /// already committed to a different message.
    pub fn check_message(
        &self,
        from: Address,
        dependency: Hash,
        message: Hash,
    ) -> Result<(), ChainError> {
        {
            let state = self.state.read();
            if !state.longest.iter().rev().any(|h| *h == dependency) {
                return Err(ChainError::InvalidDependency(dependency));
            }
        }

        self.tracker.check_and_record(from, dependency, message)?;
        Ok(())
    }

    /// Serves one PoI tour hop: vet the request, then sign its digest.
    pub fn handle_signature_request(
        &self,
        req: &SignatureRequest,
        node_key: &PrivateKey,
    ) -> Result<Signature, ChainError> {
        self.check_message(req.from, req.dependency, req.message)?;
        Ok(node_key.sign(&req.digest())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{hash_bytes, Header, Transaction, PROTOCOL_VERSION};
    use std::collections::HashMap as StdHashMap;

    fn genesis_block(key: &PrivateKey, difficulty: Difficulty) -> Block {
        let header = Header {
            version: PROTOCOL_VERSION,
            data_hash: crate::types::block::compute_data_hash(&[]).unwrap(),
            prev_block_hash: Hash::zero(),
            height: 0,
            timestamp: 0,
            difficulty,
        };
        let mut block = Block::new(header, vec![]);
        block.sign(key).unwrap();
        block
    }

    struct TestNet {
        nodes: Vec<PublicKey>,
        keys: Arc<StdHashMap<PublicKey, PrivateKey>>,
    }

    fn test_net(n: usize) -> TestNet {
        let mut nodes = Vec::new();
        let mut keys = StdHashMap::new();
        for _ in 0..n {
            let key = PrivateKey::generate();
            nodes.push(key.public_key());
            keys.insert(key.public_key(), key);
        }
        TestNet { nodes, keys: Arc::new(keys) }
    }

    fn test_chain(net: &TestNet) -> Blockchain {
        let key = PrivateKey::generate();
        let difficulty = Difficulty::new(2, 4);
        let config = BlockchainConfig {
            nodes: net.nodes.clone(),
            difficulty,
            target_block_time_secs: 10.0,
        };
        Blockchain::new(config, genesis_block(&key, difficulty)).unwrap()
    }

    fn local_provider(
        chain: Arc<Blockchain>,
        keys: Arc<StdHashMap<PublicKey, PrivateKey>>,
    ) -> impl FnMut(
        SignatureRequest,
        PublicKey,
    ) -> std::pin::Pin<
        Box<dyn Future<Output = Result<Signature, String>>>,
    > {
        move |req, service| {
            let chain = chain.clone();
            let keys = keys.clone();
            Box::pin(async move {
                let key = keys.get(&service).ok_or_else(|| "unknown service".to_string())?;
                chain
                    .handle_signature_request(&req, key)
                    .map_err(|e| e.to_string())
            })
        }
    }

    async fn produce_block(chain: &Arc<Blockchain>, net: &TestNet, txs: Vec<Transaction>) -> Block {
        let initiator = PrivateKey::generate();
        chain
            .generate_block(&initiator, txs, local_provider(chain.clone(), net.keys.clone()))
            .await
            .unwrap()
    }

    #[test]
    fn genesis_is_indexed_at_height_zero() {
        let net = test_net(8);
        let chain = test_chain(&net);
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.blocks_at_height(0).len(), 1);
        assert_eq!(chain.last_block().header.height, 0);
    }

    #[test]
    fn genesis_must_sit_at_height_zero() {
        let net = test_net(8);
        let key = PrivateKey::generate();
        let mut genesis = genesis_block(&key, Difficulty::new(2, 4));
        genesis.header.height = 3;
        genesis.invalidate_header_hash();
        let config = BlockchainConfig {
            nodes: net.nodes.clone(),
            difficulty: Difficulty::new(2, 4),
            target_block_time_secs: 10.0,
        };
        assert!(matches!(
            Blockchain::new(config, genesis),
            Err(ChainError::BadGenesisHeight(3))
        ));
    }

    #[tokio::test]
    async fn generated_block_validates_and_extends_the_chain() {
        let net = test_net(10);
        let chain = Arc::new(test_chain(&net));

        let block = produce_block(&chain, &net, vec![]).await;
        assert_eq!(block.header.height, 1);

        chain.add_block(block.clone()).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.last_block(), block);
    }

    #[tokio::test]
    async fn duplicate_blocks_are_rejected() {
        let net = test_net(10);
        let chain = Arc::new(test_chain(&net));

        let block = produce_block(&chain, &net, vec![]).await;
        chain.add_block(block.clone()).unwrap();
        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::BlockAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn proofless_non_genesis_blocks_are_rejected() {
        let net = test_net(10);
        let chain = Arc::new(test_chain(&net));

        let key = PrivateKey::generate();
        let mut block =
            Block::from_prev_header(&chain.last_block().header, vec![], chain.difficulty())
                .unwrap();
        block.sign(&key).unwrap();

        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::MissingProof { height: 1, .. })
        ));
    }

    #[tokio::test]
    async fn fabricated_difficulty_is_rejected() {
        let net = test_net(10);
        let chain = Arc::new(test_chain(&net));

        let initiator = PrivateKey::generate();
        let prev = chain.last_block().header;
        let claimed = Difficulty::new(1, 1);
        let mut block = Block::from_prev_header(&prev, vec![], claimed).unwrap();

        let ctx = PoiContext { nodes: chain.nodes(), difficulty: claimed };
        let proof = generate_poi(
            &initiator,
            block.header.prev_block_hash,
            block.header.data_hash,
            &ctx,
            local_provider(chain.clone(), net.keys.clone()),
        )
        .await
        .unwrap();
        block.set_proof(proof);

        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::DifficultyMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn equal_height_fork_is_indexed_but_not_adopted() {
        let net = test_net(10);
        let chain = Arc::new(test_chain(&net));

        let first = produce_block(&chain, &net, vec![]).await;
        let second = produce_block(&chain, &net, vec![]).await;

        chain.add_block(first.clone()).unwrap();
        let head = chain.last_block_hash();

        chain.add_block(second).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.last_block_hash(), head);
        assert_eq!(chain.blocks_at_height(1).len(), 2);
    }

    #[test]
    fn check_message_requires_longest_chain_dependency() {
        let net = test_net(10);
        let chain = test_chain(&net);
        let from = PrivateKey::generate().public_key().address();

        let err = chain
            .check_message(from, hash_bytes(b"unknown"), hash_bytes(b"m"))
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidDependency(_)));

        let head = chain.last_block_hash();
        chain.check_message(from, head, hash_bytes(b"m1")).unwrap();
        let err = chain.check_message(from, head, hash_bytes(b"m2")).unwrap_err();
        assert!(matches!(err, ChainError::DoubleTouring(_)));
    }

    #[test]
    fn signature_request_signs_the_request_digest() {
        let net = test_net(10);
        let chain = test_chain(&net);
        let node_key = PrivateKey::generate();

        let req = SignatureRequest {
            hash: hash_bytes(b"tour"),
            dependency: chain.last_block_hash(),
            message: hash_bytes(b"m"),
            from: PrivateKey::generate().public_key().address(),
        };

        let sig = chain.handle_signature_request(&req, &node_key).unwrap();
        assert_eq!(sig.recover(&req.digest()).unwrap(), node_key.public_key());
    }
}
