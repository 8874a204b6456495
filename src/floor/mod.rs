//! Entropy floor enforcement.
//!
//! [`EntropyFloor`] wraps an engine and refuses to hand out output that
//! would take the engine's entropy estimate below a configured floor. When
//! short, it waits for the background worker servicing the engine, reseeds
//! synchronously from a fallback source, or fails.

mod wrapper;

pub use wrapper::EntropyFloor;

use thiserror::Error;

use crate::engine::EngineError;
use crate::seed::SeedError;

/// Errors from floor-guarded operations.
#[derive(Debug, Error)]
pub enum FloorError {
    #[error(
        "entropy exhausted: {available} bits available, {required} required, floor is {floor}"
    )]
    EntropyExhausted {
        available: i64,
        required: u64,
        floor: i64,
    },
    #[error("floor of {floor} bits cannot be met by a {capacity}-bit reseed")]
    FloorUnreachable { floor: i64, capacity: i64 },
    #[error("fallback seed source failed: {0}")]
    Seed(#[from] SeedError),
    #[error("fallback reseed failed: {0}")]
    Engine(#[from] EngineError),
}
