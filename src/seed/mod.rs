//! Seed material sources.
//!
//! Everything that needs fresh seed bytes goes through [`SeedSource`]:
//! produce N bytes, or fail. Sources may also hint that a request is not
//! worth making right now, which lets the reseed scheduler skip a pass
//! instead of blocking on a source in cooldown.

mod cooldown;
mod os;
mod pseudo;

pub use cooldown::CooldownSource;
pub use os::OsSeedSource;
pub use pseudo::PseudorandomSeedSource;

use std::time::Duration;
use thiserror::Error;

/// Errors from seed sources.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("seed generation failed: {0}")]
    GenerationFailed(String),
    #[error("seed source is cooling down for another {remaining:?}")]
    CoolingDown { remaining: Duration },
}

/// A capability that supplies raw seed bytes.
pub trait SeedSource: Send + Sync {
    /// Fills `out` completely with seed material.
    fn fill_seed(&self, out: &mut [u8]) -> Result<(), SeedError>;

    /// Hint that a request is likely to succeed soon enough to be worth making.
    fn is_worth_trying(&self) -> bool {
        true
    }

    /// Short description used in logs and worker thread names.
    fn name(&self) -> &str;

    /// Returns `len` bytes of seed material.
    fn generate_seed(&self, len: usize) -> Result<Vec<u8>, SeedError> {
        let mut seed = vec![0u8; len];
        self.fill_seed(&mut seed)?;
        Ok(seed)
    }
}
