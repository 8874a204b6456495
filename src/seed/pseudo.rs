//! Deterministic seed material for tests and reproducible runs.

use std::sync::{Mutex, PoisonError};

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

use super::{SeedError, SeedSource};

/// Seed source that draws from a ChaCha20 stream.
///
/// Provides no real entropy. Two sources built from the same seed produce
/// the same bytes, which makes scheduler behavior reproducible.
pub struct PseudorandomSeedSource {
    rng: Mutex<ChaCha20Rng>,
    name: String,
}

impl PseudorandomSeedSource {
    /// Creates a source from a 32-byte ChaCha20 seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::from_seed(seed)),
            name: "pseudorandom".to_string(),
        }
    }

    /// Creates a source from a 64-bit seed.
    pub fn from_u64(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
            name: format!("pseudorandom-{:x}", seed),
        }
    }
}

impl SeedSource for PseudorandomSeedSource {
    fn fill_seed(&self, out: &mut [u8]) -> Result<(), SeedError> {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(out);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for PseudorandomSeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudorandomSeedSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
