//! Outcome draws
//!
//! A draw is a uniform integer in `[0, 10000)`. Raw 32-bit words are taken
//! from the OS CSPRNG and rejection sampled so no residue class is favoured.
//! Only a digest of the consumed entropy is ever persisted.

use crate::errors::{WagerError, WagerResult};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use uuid::Uuid;

pub const DRAW_BOUND: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    pub value: u16,
    /// hex(sha256(entry_id || consumed words))
    pub audit: String,
}

pub trait RandomnessSource: Send + Sync {
    fn draw(&self, entry_id: &Uuid) -> WagerResult<Draw>;
}

/// Largest multiple of `bound` that fits in a u32; words at or above it are discarded.
pub fn rejection_limit(bound: u32) -> u32 {
    (u32::MAX / bound) * bound
}

/// Draw below `bound` from a word source, returning the value and every word consumed
pub fn sample_below<F>(bound: u32, mut next_word: F) -> WagerResult<(u32, Vec<u32>)>
where
    F: FnMut() -> WagerResult<u32>,
{
    let limit = rejection_limit(bound);
    let mut consumed = Vec::with_capacity(1);
    loop {
        let word = next_word()?;
        consumed.push(word);
        if word < limit {
            return Ok((word % bound, consumed));
        }
    }
}

fn audit_digest(entry_id: &Uuid, consumed: &[u32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry_id.as_bytes());
    for word in consumed {
        hasher.update(word.to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Operating system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomness;

impl RandomnessSource for OsRandomness {
    fn draw(&self, entry_id: &Uuid) -> WagerResult<Draw> {
        let (value, consumed) = sample_below(DRAW_BOUND, || {
            let mut buf = [0u8; 4];
            OsRng
                .try_fill_bytes(&mut buf)
                .map_err(|e| WagerError::Internal(format!("entropy source failed: {}", e)))?;
            Ok(u32::from_be_bytes(buf))
        })?;

        Ok(Draw {
            value: value as u16,
            audit: audit_digest(entry_id, &consumed),
        })
    }
}

/// Replays a fixed sequence of draw values, repeating the last one.
/// Used to force outcomes in tests and drills.
#[derive(Debug)]
pub struct FixedRandomness {
    values: Mutex<Vec<u16>>,
}

impl FixedRandomness {
    pub fn new(value: u16) -> Self {
        Self::sequence(vec![value])
    }

    pub fn sequence(mut values: Vec<u16>) -> Self {
        values.reverse();
        Self {
            values: Mutex::new(values),
        }
    }
}

impl RandomnessSource for FixedRandomness {
    fn draw(&self, entry_id: &Uuid) -> WagerResult<Draw> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| WagerError::Internal("fixed randomness poisoned".to_string()))?;
        let value = if values.len() > 1 {
            values.pop()
        } else {
            values.last().copied()
        }
        .ok_or_else(|| WagerError::Internal("fixed randomness exhausted".to_string()))?;

        if value as u32 >= DRAW_BOUND {
            return Err(WagerError::Internal(format!("fixed draw {} out of range", value)));
        }

        Ok(Draw {
            value,
            audit: audit_digest(entry_id, &[value as u32]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_limit() {
        let limit = rejection_limit(DRAW_BOUND);
        assert_eq!(limit % DRAW_BOUND, 0);
        assert!(u32::MAX - limit < DRAW_BOUND);
    }

    #[test]
    fn test_words_above_limit_are_discarded() {
        let limit = rejection_limit(DRAW_BOUND);
        let mut words = vec![limit + 5, u32::MAX, 12_345].into_iter();
        let (value, consumed) = sample_below(DRAW_BOUND, || Ok(words.next().unwrap())).unwrap();
        assert_eq!(value, 2_345);
        assert_eq!(consumed.len(), 3);
    }

    #[test]
    fn test_draws_in_range_with_unique_audit() {
        let source = OsRandomness;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for _ in 0..1_000 {
            let draw = source.draw(&a).unwrap();
            assert!((draw.value as u32) < DRAW_BOUND);
            assert_eq!(draw.audit.len(), 64);
        }
        assert_ne!(source.draw(&a).unwrap().audit, source.draw(&b).unwrap().audit);
    }

    #[test]
    fn test_win_rate_at_2000_bps() {
        let source = OsRandomness;
        let id = Uuid::new_v4();
        let trials = 100_000;
        let wins = (0..trials)
            .filter(|_| source.draw(&id).unwrap().value < 2_000)
            .count();

        // sigma is about 0.00126; one point either side is far outside noise
        let rate = wins as f64 / trials as f64;
        assert!((0.19..=0.21).contains(&rate), "win rate {} out of range", rate);
    }

    #[test]
    fn test_fixed_sequence() {
        let source = FixedRandomness::sequence(vec![1, 9_999]);
        let id = Uuid::new_v4();
        assert_eq!(source.draw(&id).unwrap().value, 1);
        assert_eq!(source.draw(&id).unwrap().value, 9_999);
        assert_eq!(source.draw(&id).unwrap().value, 9_999);

        let bad = FixedRandomness::new(10_000);
        assert!(bad.draw(&id).is_err());
    }
}
