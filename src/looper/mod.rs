//! Repeat-until-stopped background tasks.
//!
//! A [`Looper`] runs an [`Iterate`] implementation on its own thread until
//! the task returns `false`, a stop is requested, or the task faults. Stops
//! are cooperative and only observed between iterations. A looper that has
//! stopped cannot be started again; create a new one instead.

mod thread;

pub use thread::{FaultHandler, Iterate, Looper, LooperFault, LooperState};

use thiserror::Error;

/// Errors from looper lifecycle operations and task iterations.
#[derive(Debug, Error)]
pub enum LooperError {
    #[error("looper is already running")]
    AlreadyStarted,
    #[error("looper has terminated and cannot be restarted")]
    Terminated,
    #[error("failed to spawn looper thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("iteration failed: {0}")]
    Iteration(String),
}
