//! Operating system entropy.

use rand_core::{OsRng, RngCore};

use super::{SeedError, SeedSource};

/// Seed source backed by the operating system's random device.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSeedSource;

impl OsSeedSource {
    /// Creates the source.
    pub fn new() -> Self {
        Self
    }
}

impl SeedSource for OsSeedSource {
    fn fill_seed(&self, out: &mut [u8]) -> Result<(), SeedError> {
        OsRng
            .try_fill_bytes(out)
            .map_err(|e| SeedError::GenerationFailed(e.to_string()))
    }

    fn name(&self) -> &str {
        "os"
    }
}
