//! Metrics collection and registry.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

use crate::engine::{CipherSuite, CounterEngine, EntropyRng};
use crate::floor::EntropyFloor;
use crate::scheduler::ReseedScheduler;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Point-in-time view of an engine and the scheduler servicing it.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Engine entropy estimate in bits.
    pub entropy_bits: i64,
    /// Reseeds applied to the engine.
    pub reseed_count: u64,
    /// Output bytes since the last reseed.
    pub bytes_since_reseed: u64,
    /// Callers blocked on the entropy floor.
    pub waiting_callers: usize,
    /// Live reseed workers.
    pub active_workers: usize,
    /// Engines registered across all workers.
    pub registered_engines: usize,
    /// Failed seed requests across all workers.
    pub seed_failures: u64,
    /// Passes skipped because a source was not worth trying.
    pub skipped_passes: u64,
}

impl MetricsSnapshot {
    /// Collects a snapshot from a floor-wrapped engine and its scheduler.
    pub fn from_components<S: CipherSuite>(
        floor: &EntropyFloor<CounterEngine<S>>,
        scheduler: &ReseedScheduler,
    ) -> Self {
        let engine = floor.inner();
        let workers = scheduler.all_stats();
        Self {
            entropy_bits: floor.entropy_bits(),
            reseed_count: engine.reseed_count(),
            bytes_since_reseed: engine.bytes_since_reseed(),
            waiting_callers: floor.waiting(),
            active_workers: workers.len(),
            registered_engines: workers.iter().map(|w| w.members).sum(),
            seed_failures: workers.iter().map(|w| w.seed_failures).sum(),
            skipped_passes: workers.iter().map(|w| w.skipped_passes).sum(),
        }
    }
}

/// Prometheus registry holding the engine and scheduler metrics.
pub struct MetricsRegistry {
    registry: Registry,

    // Engine metrics
    entropy_bits: IntGauge,
    reseed_total: IntCounter,
    bytes_since_reseed: IntGauge,
    waiting_callers: IntGauge,

    // Scheduler metrics
    active_workers: IntGauge,
    registered_engines: IntGauge,
    seed_failures_total: IntCounter,
    skipped_passes_total: IntCounter,
}

impl MetricsRegistry {
    /// Creates a registry with every metric registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let entropy_bits = IntGauge::new(
            "entropy_ctr_entropy_bits",
            "Current entropy estimate of the engine in bits",
        )?;
        let reseed_total = IntCounter::new(
            "entropy_ctr_reseed_total",
            "Total number of reseeds applied to the engine",
        )?;
        let bytes_since_reseed = IntGauge::new(
            "entropy_ctr_bytes_since_reseed",
            "Output bytes drawn since the last reseed",
        )?;
        let waiting_callers = IntGauge::new(
            "entropy_ctr_floor_waiting_callers",
            "Callers blocked waiting for the entropy floor",
        )?;

        let active_workers = IntGauge::new(
            "entropy_ctr_active_workers",
            "Number of live background reseed workers",
        )?;
        let registered_engines = IntGauge::new(
            "entropy_ctr_registered_engines",
            "Engines registered across all reseed workers",
        )?;
        let seed_failures_total = IntCounter::new(
            "entropy_ctr_worker_seed_failures_total",
            "Seed requests that failed in reseed workers",
        )?;
        let skipped_passes_total = IntCounter::new(
            "entropy_ctr_worker_skipped_passes_total",
            "Worker passes skipped because the seed source was cooling down",
        )?;

        registry.register(Box::new(entropy_bits.clone()))?;
        registry.register(Box::new(reseed_total.clone()))?;
        registry.register(Box::new(bytes_since_reseed.clone()))?;
        registry.register(Box::new(waiting_callers.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(registered_engines.clone()))?;
        registry.register(Box::new(seed_failures_total.clone()))?;
        registry.register(Box::new(skipped_passes_total.clone()))?;

        Ok(Self {
            registry,
            entropy_bits,
            reseed_total,
            bytes_since_reseed,
            waiting_callers,
            active_workers,
            registered_engines,
            seed_failures_total,
            skipped_passes_total,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.entropy_bits.set(snapshot.entropy_bits);
        advance_counter(&self.reseed_total, snapshot.reseed_count);
        self.bytes_since_reseed
            .set(i64::try_from(snapshot.bytes_since_reseed).unwrap_or(i64::MAX));
        self.waiting_callers.set(snapshot.waiting_callers as i64);

        self.active_workers.set(snapshot.active_workers as i64);
        self.registered_engines.set(snapshot.registered_engines as i64);
        advance_counter(&self.seed_failures_total, snapshot.seed_failures);
        advance_counter(&self.skipped_passes_total, snapshot.skipped_passes);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Counters only move forward; catch up to `total` if it is ahead.
fn advance_counter(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
