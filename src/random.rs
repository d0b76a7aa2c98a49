//! Cryptographically secure random values.

use rand::rngs::OsRng;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RandomError {
    #[error("random upper bound should be > 0, got {0}")]
    InvalidUpperBound(i64),
}

/// Uniform random i64 in `[0, upper)` from OS entropy.
pub fn random_i64_below(upper: i64) -> Result<i64, RandomError> {
    if upper <= 0 {
        return Err(RandomError::InvalidUpperBound(upper));
    }
    Ok(OsRng.gen_range(0..upper))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_stay_in_range() {
        for _ in 0..100 {
            let v = random_i64_below(10).unwrap();
            assert!((0..10).contains(&v));
        }
    }

    #[test]
    fn rejects_non_positive_bound() {
        assert!(random_i64_below(0).is_err());
        assert!(random_i64_below(-5).is_err());
    }
}
