//! Entropy CTR Library
//!
//! Counter-mode pseudorandom engines that keep an estimate of how much seed
//! entropy their output has consumed, a background scheduler that reseeds
//! them before it runs out, and a wrapper that refuses to produce output past
//! a configured entropy floor.
//!
//! # Architecture
//!
//! ```text
//! caller → floor (optional) → engine ──debit──→ entropy account
//!                                 ↑                   │ crosses threshold
//!                                 └── reseed ── worker ←┘ (one per seed source)
//! ```
//!
//! - [`engine`]: cipher-driven counter-mode generation, entropy accounting,
//!   snapshots.
//! - [`seed`]: where fresh seed material comes from.
//! - [`scheduler`]: per-source background workers holding weak references
//!   to the engines they service.
//! - [`floor`]: blocking, fallback reseeding, or failure when entropy is low.
//! - [`looper`]: the stoppable background loop the workers run on.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use entropy_ctr::{
//!     engine::CounterEngine,
//!     floor::EntropyFloor,
//!     scheduler::ReseedScheduler,
//!     seed::{OsSeedSource, SeedSource},
//! };
//!
//! let source: Arc<dyn SeedSource> = Arc::new(OsSeedSource::new());
//! let seed = source.generate_seed(64).unwrap();
//! let engine: CounterEngine = CounterEngine::new(&seed).unwrap();
//! let floor = Arc::new(EntropyFloor::new(engine, 0).unwrap());
//!
//! ReseedScheduler::global().register(&source, &floor).unwrap();
//! let word = floor.next_u32().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod floor;
pub mod looper;
pub mod metrics;
pub mod scheduler;
pub mod seed;

// Re-export commonly used types at crate root
pub use config::FileConfig;
pub use engine::{Blake3Suite, CipherSuite, CounterEngine, EngineError, EngineSnapshot, EntropyRng};
pub use floor::{EntropyFloor, FloorError};
pub use looper::{Iterate, Looper, LooperError};
pub use scheduler::{ReseedScheduler, SchedulerConfig, SeederLink};
pub use seed::{CooldownSource, OsSeedSource, PseudorandomSeedSource, SeedError, SeedSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
