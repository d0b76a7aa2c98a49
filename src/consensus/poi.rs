//! Proof-of-Interaction: service sampling, tour construction, and
//! verification.
//!
//! Both sides of the protocol derive the service subset and the tour
//! length from the initiator's seed signature with the same deterministic
//! generator, so a verifier recomputes exactly the tour the producer
//! walked.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{Address, CryptoError, PrivateKey, PublicKey, Signature};
use crate::types::poi::{Difficulty, InvalidDifficulty, ProofOfInteraction};
use crate::types::{hash_bytes, hash_concat, Hash};

/// Cap on the service subset size; the effective size is
/// `min(DEFAULT_SERVICE_SIZE, n/2, n)`.
pub const DEFAULT_SERVICE_SIZE: usize = 20;

#[derive(Debug, Error)]
pub enum PoiError {
    #[error("node list cannot be empty")]
    EmptyNodeList,
    #[error(transparent)]
    InvalidDifficulty(#[from] InvalidDifficulty),
    #[error("proof length does not match expected tour length: expected {expected}, got {actual}")]
    InvalidLength { expected: u32, actual: u32 },
    #[error("invalid initial signature: {0}")]
    InitialSignature(#[source] CryptoError),
    #[error("initial signature not from claimed initiator")]
    InitiatorMismatch,
    #[error("invalid service signature at step {step}: {source}")]
    ServiceSignature { step: u32, source: CryptoError },
    #[error("unexpected service node at step {step}: expected {expected}, got {got}")]
    ServiceMismatch { step: u32, expected: PublicKey, got: PublicKey },
    #[error("invalid initiator signature at step {step}: {source}")]
    InitiatorSignature { step: u32, source: CryptoError },
    #[error("initiator signature at step {step} not from claimed initiator")]
    InitiatorStepMismatch { step: u32 },
    #[error("signature request failed at step {step}: {reason}")]
    SignatureRequest { step: u32, reason: String },
    #[error("signing failed: {0}")]
    Signing(#[source] CryptoError),
}

/// Everything a node needs to generate or verify a proof.
#[derive(Clone, Debug)]
pub struct PoiContext {
    /// All nodes in the network, in the shared configuration order.
    pub nodes: Vec<PublicKey>,
    pub difficulty: Difficulty,
}

/// One hop's worth of request state, signed by the service node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    /// Current tour hash `h_i`.
    pub hash: Hash,
    /// Previous block header hash the tour is bound to.
    pub dependency: Hash,
    /// Data hash of the block under construction.
    pub message: Hash,
    /// Address of the initiator.
    pub from: Address,
}

impl SignatureRequest {
    /// The digest the service node signs: `H(hash || dependency || message)`.
    ///
    /// This single function is shared by the signer node, the generator,
    /// and the verifier; the two protocol sides must hash identically.
    pub fn digest(&self) -> Hash {
        let mut buf = Vec::with_capacity(96);
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(self.dependency.as_bytes());
        buf.extend_from_slice(self.message.as_bytes());
        hash_bytes(&buf)
    }
}

/// SplitMix64: deterministic, seedable with any value including zero.
struct DetRng {
    state: u64,
}

impl DetRng {
    fn new(seed: i64) -> Self {
        Self { state: seed as u64 }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn next_below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }
}

/// Reduces a seed signature to the signed low-64-bit form of its digest.
fn seed_from_signature(seed: &Signature) -> i64 {
    let digest = hash_bytes(seed.as_bytes());
    let mut low = [0u8; 8];
    low.copy_from_slice(&digest.as_bytes()[24..32]);
    i64::from_be_bytes(low)
}

/// Index into a service list from the leading 8 bytes of a tour hash.
fn hash_to_index(hash: &Hash, n: usize) -> usize {
    let mut lead = [0u8; 8];
    lead.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_be_bytes(lead) % n as u64) as usize
}

/// Deterministic pseudo-random service subset of size `min(20, n/2, n)`:
/// a seeded Fisher-Yates shuffle over a copy of `nodes`, truncated.
pub fn create_services(nodes: &[PublicKey], seed: &Signature) -> Vec<PublicKey> {
    if nodes.is_empty() {
        return Vec::new();
    }

    let size = (nodes.len() / 2).min(DEFAULT_SERVICE_SIZE).min(nodes.len());

    let mut rng = DetRng::new(seed_from_signature(seed));
    let mut shuffled = nodes.to_vec();
    for i in (1..shuffled.len()).rev() {
        let j = rng.next_below(i as u64 + 1) as usize;
        shuffled.swap(i, j);
    }

    shuffled.truncate(size);
    shuffled
}

/// Tour length sampled uniformly from `[min, max]` by the deterministic
/// generator seeded from `seed`.
pub fn tour_length(difficulty: Difficulty, seed: &Signature) -> Result<u32, PoiError> {
    difficulty.validate()?;

    let mut rng = DetRng::new(seed_from_signature(seed));
    let span = (difficulty.max - difficulty.min + 1) as u64;
    Ok(difficulty.min + rng.next_below(span) as u32)
}

/// Walks the tour, collecting one service signature per hop through
/// `request_sig` and counter-signing each response.
///
/// The tour is inherently sequential: hop `i + 1` is selected from the
/// hash of hop `i`'s counter-signature. Every `request_sig` call suspends
/// until the remote node answers or the caller-side timeout fires.
pub async fn generate_poi<F, Fut>(
    initiator: &PrivateKey,
    dependency: Hash,
    message: Hash,
    ctx: &PoiContext,
    mut request_sig: F,
) -> Result<ProofOfInteraction, PoiError>
where
    F: FnMut(SignatureRequest, PublicKey) -> Fut,
    Fut: Future<Output = Result<Signature, String>>,
{
    if ctx.nodes.is_empty() {
        return Err(PoiError::EmptyNodeList);
    }

    let initial = initiator.sign(&dependency).map_err(PoiError::Signing)?;

    let services = create_services(&ctx.nodes, &initial);
    if services.is_empty() {
        return Err(PoiError::EmptyNodeList);
    }

    let length = tour_length(ctx.difficulty, &initial)?;
    let initiator_addr = initiator.public_key().address();

    let mut tour_sigs = Vec::with_capacity(length as usize * 2);
    let mut current = hash_concat(initial.as_bytes(), message.as_bytes());

    for step in 0..length {
        let target = services[hash_to_index(&current, services.len())].clone();

        let req = SignatureRequest {
            hash: current,
            dependency,
            message,
            from: initiator_addr,
        };

        let service_sig = request_sig(req, target)
            .await
            .map_err(|reason| PoiError::SignatureRequest { step, reason })?;

        let counter_sig = initiator
            .sign(&hash_bytes(service_sig.as_bytes()))
            .map_err(PoiError::Signing)?;

        current = hash_bytes(counter_sig.as_bytes());
        tour_sigs.push(service_sig);
        tour_sigs.push(counter_sig);
    }

    Ok(ProofOfInteraction { initial, tour_sigs })
}

/// Verifies a proof against the initiator, chain position, block message,
/// and node set. Any mismatch at any step is fatal.
pub fn check_poi(
    proof: &ProofOfInteraction,
    initiator: &PublicKey,
    dependency: Hash,
    message: Hash,
    ctx: &PoiContext,
) -> Result<(), PoiError> {
    let seed_signer = proof
        .initial
        .recover(&dependency)
        .map_err(PoiError::InitialSignature)?;
    if seed_signer != *initiator {
        return Err(PoiError::InitiatorMismatch);
    }

    let services = create_services(&ctx.nodes, &proof.initial);
    if services.is_empty() {
        return Err(PoiError::EmptyNodeList);
    }

    let expected = tour_length(ctx.difficulty, &proof.initial)?;
    let actual = (proof.tour_sigs.len() / 2) as u32;
    if actual != expected || proof.tour_sigs.len() % 2 != 0 {
        return Err(PoiError::InvalidLength { expected, actual });
    }

    let initiator_addr = initiator.address();
    let mut current = hash_concat(proof.initial.as_bytes(), message.as_bytes());

    for step in 0..expected {
        let service_sig = &proof.tour_sigs[step as usize * 2];
        let counter_sig = &proof.tour_sigs[step as usize * 2 + 1];

        let expected_service = &services[hash_to_index(&current, services.len())];

        // The service signed its view of the request; rebuild that exact
        // digest here.
        let req = SignatureRequest {
            hash: current,
            dependency,
            message,
            from: initiator_addr,
        };
        let service_signer = service_sig
            .recover(&req.digest())
            .map_err(|source| PoiError::ServiceSignature { step, source })?;
        if service_signer != *expected_service {
            return Err(PoiError::ServiceMismatch {
                step,
                expected: expected_service.clone(),
                got: service_signer,
            });
        }

        let counter_signer = counter_sig
            .recover(&hash_bytes(service_sig.as_bytes()))
            .map_err(|source| PoiError::InitiatorSignature { step, source })?;
        if counter_signer != *initiator {
            return Err(PoiError::InitiatorStepMismatch { step });
        }

        current = hash_bytes(counter_sig.as_bytes());
    }

    Ok(())
}

/// Expected seconds per block: `2 * mean * communication_delay`.
pub fn estimated_block_time(difficulty: Difficulty, comm_delay_secs: f64) -> f64 {
    2.0 * f64::from(difficulty.mean()) * comm_delay_secs
}

/// Retargets the tour-length distribution toward `target_block_time_secs`,
/// preserving the distribution width. Out-of-range inputs leave the
/// difficulty unchanged.
pub fn adjust_difficulty(
    current: Difficulty,
    target_block_time_secs: f64,
    actual_block_time_secs: f64,
    _num_nodes: usize,
) -> Difficulty {
    if actual_block_time_secs <= 0.0 || target_block_time_secs <= 0.0 {
        return current;
    }

    let ratio = actual_block_time_secs / target_block_time_secs;
    let new_mean = ((f64::from(current.mean()) / ratio) as u32).max(1);

    let width = current.max - current.min;
    let new_min = new_mean.saturating_sub(width / 2).max(1);
    let new_max = new_min + width;

    Difficulty { min: new_min, max: new_max }
}
