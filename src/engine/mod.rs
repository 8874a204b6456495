//! Counter-mode generation engines.
//!
//! This module provides the cipher-parametric [`CounterEngine`], the
//! [`EntropyAccount`] embedded in it, and the [`EntropyRng`] contract that
//! the reseed scheduler and the entropy floor work against.

mod account;
mod cipher;
mod counter;
mod ctr;
mod output;
mod snapshot;

pub use account::EntropyAccount;
pub use cipher::{Blake3Cipher, Blake3Suite, BlockCipher, CipherSuite};
pub use ctr::CounterEngine;
pub use output::{entropy_of_range, DOUBLE_COST_BITS};
pub use snapshot::EngineSnapshot;

pub(crate) use output::{below_from, bool_from, f64_from, fill_from, u64_from};

use crate::scheduler::SeederLink;
use thiserror::Error;

/// Errors raised by engines.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("seed length is {length} bytes; must be between {min} and {max} bytes")]
    InvalidSeedLength { length: usize, min: usize, max: usize },
    #[error("cipher rejected a {length}-byte key")]
    InvalidKey { length: usize },
    #[error("reseed threshold of {bits} bits is not below the {capacity} bits of a full reseed")]
    UnreachableThreshold { bits: i64, capacity: i64 },
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Output and reseeding contract shared by engines and their wrappers.
///
/// Implementations are internally synchronized; every method takes `&self`.
pub trait EntropyRng: Send + Sync {
    /// Returns the top `bits` (0..=32) of the next 32-bit word.
    ///
    /// Does not debit entropy; callers debit the cost of the operation they
    /// are building.
    fn next_bits(&self, bits: u32) -> u32;

    /// Records that `bits` of entropy were consumed.
    fn debit_entropy(&self, bits: u64);

    /// Current entropy estimate in bits.
    fn entropy_bits(&self) -> i64;

    /// Applies fresh seed material.
    fn reseed(&self, seed: &[u8]) -> Result<(), EngineError>;

    /// Seed length a reseeder should request.
    fn new_seed_length(&self) -> usize;

    /// Whether the engine wants a reseed now.
    fn needs_reseeding(&self) -> bool {
        self.entropy_bits() <= 0
    }

    /// Records (or clears) the background worker servicing this engine.
    fn attach_seeder(&self, link: Option<SeederLink>);

    /// The background worker servicing this engine, if any.
    fn seeder(&self) -> Option<SeederLink>;
}
