// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Mutex;

use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use thiserror::Error;

/// ChaCha20-based random source shared by all operations of a provider.
///
/// Seeded from the operating system by default. Tests can pin the seed to get reproducible key
/// material.
#[derive(Debug)]
pub struct Rng(Mutex<ChaCha20Rng>);

impl Default for Rng {
    fn default() -> Self {
        Self(Mutex::new(ChaCha20Rng::from_os_rng()))
    }
}

impl Rng {
    #[cfg(any(test, feature = "test_utils"))]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(Mutex::new(ChaCha20Rng::from_seed(seed)))
    }

    /// Fills the given buffer with random bytes.
    pub fn fill(&self, dest: &mut [u8]) -> Result<(), RngError> {
        self.0
            .lock()
            .map_err(|_| RngError::LockPoisoned)?
            .try_fill_bytes(dest)
            .map_err(|_| RngError::NotEnoughRandomness)
    }

    pub fn random_array<const N: usize>(&self) -> Result<[u8; N], RngError> {
        let mut out = [0u8; N];
        self.fill(&mut out)?;
        Ok(out)
    }
}

#[derive(Debug, Error)]
pub enum RngError {
    #[error("rng lock is poisoned")]
    LockPoisoned,

    #[error("unable to collect enough randomness")]
    NotEnoughRandomness,
}

#[cfg(test)]
mod tests {
    use super::Rng;

    #[test]
    fn seeded_rng_is_reproducible() {
        let first: [u8; 64] = Rng::from_seed([7; 32]).random_array().unwrap();
        let second: [u8; 64] = Rng::from_seed([7; 32]).random_array().unwrap();
        assert_eq!(first, second);

        let other: [u8; 64] = Rng::from_seed([8; 32]).random_array().unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn consecutive_draws_differ() {
        let rng = Rng::from_seed([7; 32]);
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        rng.fill(&mut a).unwrap();
        rng.fill(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
