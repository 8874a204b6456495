//! Background reseeding.
//!
//! A [`ReseedScheduler`] keeps one worker thread per seed source. Each
//! worker holds weak references to the engines registered with it and
//! reseeds the ones that report [`EntropyRng::needs_reseeding`]. Idle
//! workers block on a condition variable until an engine's debit crosses
//! its threshold, a registration arrives, or [`ReseedScheduler::wake`] is
//! called.
//!
//! Sources are keyed by identity: two `Arc<dyn SeedSource>` handles share a
//! worker only if they point at the same allocation.
//!
//! [`EntropyRng::needs_reseeding`]: crate::engine::EntropyRng::needs_reseeding

mod config;
mod registry;
mod worker;

pub use config::SchedulerConfig;
pub use registry::ReseedScheduler;
pub use worker::{SeederLink, WorkerStats};

use thiserror::Error;

use crate::looper::LooperError;

/// Errors from scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to start reseed worker: {0}")]
    WorkerStart(#[from] LooperError),
}
