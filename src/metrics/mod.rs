//! Prometheus metrics for engines and reseed workers.
//!
//! # Metrics Exposed
//!
//! ## Engine Metrics
//! - `entropy_ctr_entropy_bits` - Current entropy estimate of the engine
//! - `entropy_ctr_reseed_total` - Reseeds applied to the engine
//! - `entropy_ctr_bytes_since_reseed` - Output bytes since the last reseed
//! - `entropy_ctr_floor_waiting_callers` - Callers blocked on the entropy floor
//!
//! ## Scheduler Metrics
//! - `entropy_ctr_active_workers` - Live reseed workers
//! - `entropy_ctr_registered_engines` - Engines across all service sets
//! - `entropy_ctr_worker_seed_failures_total` - Failed seed requests
//! - `entropy_ctr_worker_skipped_passes_total` - Passes skipped on a cooling source
//!
//! # Example
//!
//! ```no_run
//! use entropy_ctr::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! let snapshot = MetricsSnapshot {
//!     entropy_bits: 448,
//!     reseed_count: 3,
//!     bytes_since_reseed: 8,
//!     active_workers: 1,
//!     registered_engines: 1,
//!     ..Default::default()
//! };
//! registry.update(&snapshot);
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
