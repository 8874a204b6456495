//! Floor-guarded wrapper around an [`EntropyRng`].

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::FloorError;
use crate::engine::{
    below_from, bool_from, entropy_of_range, f64_from, fill_from, u64_from, EngineError,
    EntropyRng, DOUBLE_COST_BITS,
};
use crate::scheduler::SeederLink;
use crate::seed::SeedSource;

/// Largest single-call cost; the floor must leave room for it after a full
/// reseed.
const MAX_CALL_COST_BITS: i64 = 64;

struct GateState {
    fallback: Option<Arc<dyn SeedSource>>,
    seeder: Option<SeederLink>,
    waiting: usize,
}

/// Engine wrapper that keeps the entropy estimate at or above a floor.
///
/// Every output call first checks that `estimate - cost >= floor`. If not:
///
/// 1. with an active background worker attached, the caller blocks until a
///    reseed lifts the estimate (no timeout);
/// 2. otherwise, with a fallback source, the caller reseeds synchronously;
/// 3. otherwise the call fails with [`FloorError::EntropyExhausted`] and the
///    estimate is left as it was.
///
/// Calls through the wrapper are serialized by its gate lock. Register the
/// wrapper itself (not the inner engine) with a scheduler so worker reseeds
/// release blocked callers.
pub struct EntropyFloor<R: EntropyRng> {
    inner: R,
    floor: i64,
    gate: Mutex<GateState>,
    reseeded: Condvar,
}

impl<R: EntropyRng> EntropyFloor<R> {
    /// Wraps `inner` with no fallback source.
    pub fn new(inner: R, floor: i64) -> Result<Self, FloorError> {
        let capacity = (inner.new_seed_length() as i64).saturating_mul(8);
        if floor.saturating_add(MAX_CALL_COST_BITS) > capacity {
            return Err(FloorError::FloorUnreachable { floor, capacity });
        }
        Ok(Self {
            inner,
            floor,
            gate: Mutex::new(GateState {
                fallback: None,
                seeder: None,
                waiting: 0,
            }),
            reseeded: Condvar::new(),
        })
    }

    /// Wraps `inner` with a synchronous fallback source.
    pub fn with_fallback(
        inner: R,
        floor: i64,
        fallback: Arc<dyn SeedSource>,
    ) -> Result<Self, FloorError> {
        let wrapper = Self::new(inner, floor)?;
        wrapper.lock_gate().fallback = Some(fallback);
        Ok(wrapper)
    }

    fn lock_gate(&self) -> MutexGuard<'_, GateState> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The wrapped engine.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Minimum entropy estimate this wrapper maintains.
    pub fn floor(&self) -> i64 {
        self.floor
    }

    /// Callers currently blocked waiting for a reseed.
    pub fn waiting(&self) -> usize {
        self.lock_gate().waiting
    }

    /// Replaces the fallback source and wakes blocked callers so they
    /// re-evaluate.
    pub fn set_fallback(&self, fallback: Option<Arc<dyn SeedSource>>) {
        self.lock_gate().fallback = fallback;
        self.reseeded.notify_all();
    }

    /// Waits, reseeds or fails until `cost` bits can be spent without
    /// crossing the floor. Returns with the gate held.
    fn acquire(&self, cost: u64) -> Result<MutexGuard<'_, GateState>, FloorError> {
        let cost_bits = i64::try_from(cost).unwrap_or(i64::MAX);
        let mut gate = self.lock_gate();
        loop {
            let available = self.inner.entropy_bits();
            let projected = available.saturating_sub(cost_bits);
            if projected >= self.floor {
                return Ok(gate);
            }

            if let Some(link) = gate.seeder.clone().filter(SeederLink::is_active) {
                gate.waiting += 1;
                link.wake();
                tracing::debug!(available, required = cost, floor = self.floor, "Waiting for reseed");
                gate = self
                    .reseeded
                    .wait(gate)
                    .unwrap_or_else(PoisonError::into_inner);
                gate.waiting -= 1;
                continue;
            }

            if let Some(source) = gate.fallback.clone() {
                let max_len = self.inner.new_seed_length();
                let deficit = self.floor.saturating_sub(projected);
                let wanted = usize::try_from(deficit.saturating_add(7) / 8).unwrap_or(max_len);
                let len = wanted.clamp(1, max_len);

                let seed = source.generate_seed(len)?;
                self.inner.reseed(&seed)?;
                self.reseeded.notify_all();
                tracing::debug!(
                    source = source.name(),
                    seed_len = len,
                    entropy_bits = self.inner.entropy_bits(),
                    "Fallback reseed on calling thread"
                );

                let refreshed = self.inner.entropy_bits();
                if len == max_len && refreshed.saturating_sub(cost_bits) < self.floor {
                    return Err(FloorError::EntropyExhausted {
                        available: refreshed,
                        required: cost,
                        floor: self.floor,
                    });
                }
                continue;
            }

            return Err(FloorError::EntropyExhausted {
                available,
                required: cost,
                floor: self.floor,
            });
        }
    }

    fn produce<T>(
        &self,
        cost: u64,
        draw: impl FnOnce(&mut dyn FnMut(u32) -> u32) -> T,
    ) -> Result<T, FloorError> {
        let gate = self.acquire(cost)?;
        let value = draw(&mut |bits| self.inner.next_bits(bits));
        self.inner.debit_entropy(cost);
        drop(gate);
        Ok(value)
    }

    /// Next 32 random bits.
    pub fn next_u32(&self) -> Result<u32, FloorError> {
        self.produce(32, |next| next(32))
    }

    /// Next 64 random bits.
    pub fn next_u64(&self) -> Result<u64, FloorError> {
        self.produce(64, u64_from)
    }

    /// Next random boolean.
    pub fn next_bool(&self) -> Result<bool, FloorError> {
        self.produce(1, bool_from)
    }

    /// Uniform double in `[0, 1)`.
    pub fn next_f64(&self) -> Result<f64, FloorError> {
        self.produce(DOUBLE_COST_BITS, f64_from)
    }

    /// Uniform value in `[0, bound)`; 0 when `bound` is 0.
    pub fn next_below(&self, bound: u32) -> Result<u32, FloorError> {
        if bound == 0 {
            return Ok(0);
        }
        let cost = entropy_of_range(0, bound as i64) as u64;
        self.produce(cost, |next| below_from(next, bound))
    }

    /// Uniform value in `[origin, bound)`; `origin` for an empty range.
    pub fn next_in_range(&self, origin: i32, bound: i32) -> Result<i32, FloorError> {
        if bound <= origin {
            return Ok(origin);
        }
        let span = (bound as i64 - origin as i64) as u32;
        let cost = entropy_of_range(origin as i64, bound as i64) as u64;
        let offset = self.produce(cost, |next| below_from(next, span))?;
        Ok((origin as i64 + offset as i64) as i32)
    }

    /// Fills `dest` eight bytes at a time.
    ///
    /// On error, chunks before the failing one have already been written.
    pub fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), FloorError> {
        for chunk in dest.chunks_mut(8) {
            let cost = chunk.len() as u64 * 8;
            self.produce(cost, |next| fill_from(next, chunk))?;
        }
        Ok(())
    }
}

impl<R: EntropyRng> EntropyRng for EntropyFloor<R> {
    fn next_bits(&self, bits: u32) -> u32 {
        self.inner.next_bits(bits)
    }

    fn debit_entropy(&self, bits: u64) {
        self.inner.debit_entropy(bits);
    }

    fn entropy_bits(&self) -> i64 {
        self.inner.entropy_bits()
    }

    /// Reseeds the inner engine and releases blocked callers.
    fn reseed(&self, seed: &[u8]) -> Result<(), EngineError> {
        let _gate = self.lock_gate();
        let result = self.inner.reseed(seed);
        self.reseeded.notify_all();
        result
    }

    fn new_seed_length(&self) -> usize {
        self.inner.new_seed_length()
    }

    /// True while a caller is blocked and the estimate is still too low for
    /// it, or when the inner engine asks.
    fn needs_reseeding(&self) -> bool {
        let starved = self.waiting() > 0
            && self.inner.entropy_bits() < self.floor.saturating_add(MAX_CALL_COST_BITS);
        starved || self.inner.needs_reseeding()
    }

    fn attach_seeder(&self, link: Option<SeederLink>) {
        let mut gate = self.lock_gate();
        gate.seeder = link.clone();
        self.inner.attach_seeder(link);
        self.reseeded.notify_all();
    }

    fn seeder(&self) -> Option<SeederLink> {
        self.lock_gate().seeder.clone()
    }
}

impl<R: EntropyRng + std::fmt::Debug> std::fmt::Debug for EntropyFloor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let gate = self.lock_gate();
        f.debug_struct("EntropyFloor")
            .field("inner", &self.inner)
            .field("floor", &self.floor)
            .field("waiting", &gate.waiting)
            .field("has_fallback", &gate.fallback.is_some())
            .finish()
    }
}
