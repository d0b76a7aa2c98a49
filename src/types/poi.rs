use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Signature;

#[derive(Debug, Error)]
#[error("invalid difficulty parameters: min={min} max={max}")]
pub struct InvalidDifficulty {
    pub min: u32,
    pub max: u32,
}

/// Parameters of the uniform tour-length distribution. Expected block time
/// is roughly `2 * mean * round_trip_delay`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Difficulty {
    pub min: u32,
    pub max: u32,
}

impl Difficulty {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn mean(&self) -> u32 {
        (self.min + self.max) / 2
    }

    /// A difficulty is usable iff `1 <= min <= max`.
    pub fn validate(&self) -> Result<(), InvalidDifficulty> {
        if self.min == 0 || self.max == 0 || self.min > self.max {
            return Err(InvalidDifficulty { min: self.min, max: self.max });
        }
        Ok(())
    }

    pub fn is_unset(&self) -> bool {
        self.min == 0 && self.max == 0
    }
}

/// A complete Proof-of-Interaction.
///
/// `initial` is the initiator's signature over the dependency (the parent
/// header hash). `tour_sigs` holds, per tour step, the service node's
/// signature followed by the initiator's counter-signature over its hash:
/// `[s_1, s'_1, s_2, s'_2, ..., s_L, s'_L]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfInteraction {
    pub initial: Signature,
    pub tour_sigs: Vec<Signature>,
}

impl ProofOfInteraction {
    /// Number of tour steps encoded in the proof.
    pub fn len(&self) -> usize {
        self.tour_sigs.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.tour_sigs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_validation() {
        assert!(Difficulty::new(10, 100).validate().is_ok());
        assert!(Difficulty::new(0, 100).validate().is_err());
        assert!(Difficulty::new(10, 0).validate().is_err());
        assert!(Difficulty::new(100, 10).validate().is_err());
    }

    #[test]
    fn difficulty_mean() {
        assert_eq!(Difficulty::new(10, 100).mean(), 55);
        assert_eq!(Difficulty::new(5, 15).mean(), 10);
    }

    #[test]
    fn proof_len_counts_steps() {
        let sig = Signature(vec![0u8; 65]);
        let proof = ProofOfInteraction {
            initial: sig.clone(),
            tour_sigs: vec![sig.clone(), sig.clone(), sig.clone(), sig],
        };
        assert_eq!(proof.len(), 2);
    }
}
