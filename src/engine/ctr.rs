//! Cipher-driven counter-mode engine.
//!
//! The seed splits into a key (the first `key_length(seed_len)` bytes) and
//! the counter's initial value (whatever is left, zero-padded). Output is the
//! encipherment of successive counter values, consumed four bytes at a time.
//!
//! # Reseeding Model
//!
//! - A seed of the maximum total length replaces key and counter outright.
//! - A shorter seed is appended to the previous one; if the result is longer
//!   than the key it yields, it is compressed with the suite's digest.
//! - Either way the buffered block is discarded.

use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand_core::RngCore;

use super::account::{bits_in_bytes, EntropyAccount};
use super::cipher::{Blake3Suite, BlockCipher, CipherSuite};
use super::counter::Counter;
use super::output::{self, DOUBLE_COST_BITS};
use super::snapshot::EngineSnapshot;
use super::{EngineError, EntropyRng};
use crate::scheduler::SeederLink;

/// State guarded by the engine lock.
struct EngineState<S: CipherSuite> {
    cipher: S::Cipher,
    /// Last accepted seed, kept only for snapshots.
    seed: Vec<u8>,
    counter: Counter,
    counter_input: Vec<u8>,
    block: Vec<u8>,
    /// Next unread byte of `block`; `BYTES_AT_ONCE` means exhausted.
    index: usize,
    entropy: EntropyAccount,
    reseed_count: u64,
    bytes_since_reseed: u64,
    seeder: Option<SeederLink>,
}

impl<S: CipherSuite> EngineState<S> {
    fn new() -> Self {
        Self {
            cipher: S::new_cipher(),
            seed: Vec::new(),
            counter: Counter::zeroed(S::COUNTER_SIZE_BYTES),
            counter_input: vec![0u8; S::BYTES_AT_ONCE],
            block: vec![0u8; S::BYTES_AT_ONCE],
            index: S::BYTES_AT_ONCE,
            entropy: EntropyAccount::default(),
            reseed_count: 0,
            bytes_since_reseed: 0,
            seeder: None,
        }
    }

    /// Splits `seed` into key and counter and installs both.
    ///
    /// The key goes in first so a rejected key leaves the state untouched.
    fn install_seed(&mut self, seed: &[u8]) -> Result<(), EngineError> {
        check_seed_length::<S>(seed.len(), S::MIN_SEED_LENGTH_BYTES)?;
        let key_length = S::key_length(seed.len());
        let (key, counter_part) = seed.split_at(key_length);
        self.cipher.set_key(key)?;
        self.counter.load(counter_part);
        self.seed = seed.to_vec();
        self.index = S::BYTES_AT_ONCE;
        Ok(())
    }

    fn next_block(&mut self) {
        let width = S::COUNTER_SIZE_BYTES;
        for slot in self.counter_input.chunks_mut(width) {
            self.counter.increment();
            slot.copy_from_slice(self.counter.as_bytes());
        }
        self.cipher.encipher(&self.counter_input, &mut self.block);
    }

    fn next_bits(&mut self, bits: u32) -> u32 {
        if S::BYTES_AT_ONCE - self.index < 4 {
            self.next_block();
            self.index = 0;
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.block[self.index..self.index + 4]);
        self.index += 4;
        self.bytes_since_reseed += 4;
        output::top_bits(u32::from_be_bytes(word), bits)
    }

    /// Rebuilds `block` for the current counter without moving it.
    fn regenerate_block(&mut self) {
        self.counter.add_signed(-(S::BLOCKS_AT_ONCE as i128));
        self.next_block();
    }
}

/// Counter-mode pseudorandom engine with entropy accounting.
///
/// All mutation happens under one instance lock, so outputs, reseeds and
/// advances from different threads are linearized.
pub struct CounterEngine<S: CipherSuite = Blake3Suite> {
    state: Mutex<EngineState<S>>,
    reseed_threshold_bits: i64,
    _suite: PhantomData<S>,
}

impl<S: CipherSuite> CounterEngine<S> {
    /// Creates an engine from `seed`.
    ///
    /// The entropy estimate starts at 8 bits per seed byte.
    pub fn new(seed: &[u8]) -> Result<Self, EngineError> {
        let mut state = EngineState::<S>::new();
        state.install_seed(seed)?;
        state.entropy = EntropyAccount::for_seed_len(seed.len());

        tracing::debug!(
            seed_len = seed.len(),
            key_len = S::key_length(seed.len()),
            "Counter engine constructed"
        );

        Ok(Self::from_state(state, 0))
    }

    /// Sets the entropy level at or below which the engine asks for reseeding.
    ///
    /// The threshold must lie below the estimate a full-length reseed gives,
    /// otherwise the engine would ask for reseeding forever.
    pub fn with_reseed_threshold(mut self, bits: i64) -> Result<Self, EngineError> {
        check_threshold::<S>(bits)?;
        self.reseed_threshold_bits = bits;
        Ok(self)
    }

    fn from_state(state: EngineState<S>, reseed_threshold_bits: i64) -> Self {
        Self {
            state: Mutex::new(state),
            reseed_threshold_bits,
            _suite: PhantomData,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `draw` against the locked state, then debits `cost` bits.
    fn produce<T>(&self, cost: u64, draw: impl FnOnce(&mut dyn FnMut(u32) -> u32) -> T) -> T {
        let mut state = self.lock();
        let value = draw(&mut |bits| state.next_bits(bits));
        state.entropy.debit(cost);
        let wake = self.crossed_threshold(&state);
        drop(state);
        if let Some(link) = wake {
            link.wake();
        }
        value
    }

    fn crossed_threshold(&self, state: &EngineState<S>) -> Option<SeederLink> {
        if state.entropy.estimate() <= self.reseed_threshold_bits {
            state.seeder.clone()
        } else {
            None
        }
    }

    /// Replaces or extends the seed.
    ///
    /// A seed of exactly the maximum total length replaces key and counter
    /// and resets the entropy estimate to its bit length. Anything shorter is
    /// appended to the previous seed and compressed with the suite's digest
    /// when the result exceeds the key length; only the bytes that survive as
    /// new key material are credited.
    pub fn reseed(&self, seed: &[u8]) -> Result<(), EngineError> {
        check_seed_length::<S>(seed.len(), 1)?;

        let mut state = self.lock();
        if seed.len() == S::MAX_TOTAL_SEED_LENGTH_BYTES {
            state.install_seed(seed)?;
            state.entropy.reset(bits_in_bytes(seed.len()));
        } else {
            let mut combined = Vec::with_capacity(state.seed.len() + seed.len());
            combined.extend_from_slice(&state.seed);
            combined.extend_from_slice(seed);

            let key_length = S::key_length(combined.len());
            let credit = if combined.len() > key_length {
                let mut key = S::digest(&combined);
                key.truncate(key_length);
                state.install_seed(&key)?;
                seed.len().min(combined.len() - key.len())
            } else {
                state.install_seed(&combined)?;
                seed.len()
            };
            state.entropy.credit(bits_in_bytes(credit));
        }
        state.reseed_count += 1;
        state.bytes_since_reseed = 0;

        tracing::debug!(
            reseed_count = state.reseed_count,
            seed_len = seed.len(),
            entropy_bits = state.entropy.estimate(),
            "Counter engine reseeded"
        );

        Ok(())
    }

    /// Moves the output position by `delta` words without generating the
    /// skipped blocks.
    ///
    /// Afterwards the engine is in the same state as if `next_bits` had been
    /// called `delta` times (or, for negative `delta`, as if those calls were
    /// undone). Entropy is not debited.
    pub fn advance(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        let words_per_block = (S::BYTES_AT_ONCE / 4) as i128;
        let blocks = S::BLOCKS_AT_ONCE as i128;

        let mut state = self.lock();
        let position = (state.index / 4) as i128 + delta as i128;
        let block_shift = (position - 1).div_euclid(words_per_block);
        let new_word = position - block_shift * words_per_block;

        if new_word == words_per_block {
            state.counter.add_signed(block_shift * blocks);
            state.index = S::BYTES_AT_ONCE;
        } else {
            state.counter.add_signed((block_shift - 1) * blocks);
            state.next_block();
            state.index = new_word as usize * 4;
        }
    }

    /// Next 32 random bits.
    pub fn next_u32(&self) -> u32 {
        self.produce(32, |next| next(32))
    }

    /// Next 64 random bits.
    pub fn next_u64(&self) -> u64 {
        self.produce(64, output::u64_from)
    }

    /// Next random boolean; costs one bit.
    pub fn next_bool(&self) -> bool {
        self.produce(1, output::bool_from)
    }

    /// Uniform double in `[0, 1)`; costs 53 bits.
    pub fn next_f64(&self) -> f64 {
        self.produce(DOUBLE_COST_BITS, output::f64_from)
    }

    /// Uniform value in `[0, bound)`, costing only the bits the range needs.
    ///
    /// Returns 0 when `bound` is 0.
    pub fn next_below(&self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        let cost = output::entropy_of_range(0, bound as i64) as u64;
        self.produce(cost, |next| output::below_from(next, bound))
    }

    /// Uniform value in `[origin, bound)`; returns `origin` for an empty range.
    pub fn next_in_range(&self, origin: i32, bound: i32) -> i32 {
        if bound <= origin {
            return origin;
        }
        let span = (bound as i64 - origin as i64) as u32;
        let cost = output::entropy_of_range(origin as i64, bound as i64) as u64;
        let offset = self.produce(cost, |next| output::below_from(next, span));
        (origin as i64 + offset as i64) as i32
    }

    /// Fills `dest`; costs 8 bits per byte.
    pub fn fill_bytes(&self, dest: &mut [u8]) {
        let cost = (dest.len() as u64).saturating_mul(8);
        self.produce(cost, |next| output::fill_from(next, dest));
    }

    /// Current entropy estimate in bits.
    pub fn entropy_bits(&self) -> i64 {
        self.lock().entropy.estimate()
    }

    /// Number of successful reseeds since construction.
    pub fn reseed_count(&self) -> u64 {
        self.lock().reseed_count
    }

    /// Bytes of output drawn since the last reseed.
    pub fn bytes_since_reseed(&self) -> u64 {
        self.lock().bytes_since_reseed
    }

    /// Level at or below which the engine reports it needs reseeding.
    pub fn reseed_threshold_bits(&self) -> i64 {
        self.reseed_threshold_bits
    }

    /// Captures everything needed to resume identical output.
    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.lock();
        EngineSnapshot::new(
            state.seed.clone(),
            state.counter.as_bytes().to_vec(),
            state.index,
            state.entropy.estimate(),
            self.reseed_threshold_bits,
        )
    }

    /// Rebuilds an engine from a snapshot taken by [`CounterEngine::snapshot`].
    pub fn restore(snapshot: &EngineSnapshot) -> Result<Self, EngineError> {
        if snapshot.counter.len() != S::COUNTER_SIZE_BYTES {
            return Err(EngineError::InvalidSnapshot(format!(
                "counter is {} bytes; expected {}",
                snapshot.counter.len(),
                S::COUNTER_SIZE_BYTES
            )));
        }
        if snapshot.index > S::BYTES_AT_ONCE || snapshot.index % 4 != 0 {
            return Err(EngineError::InvalidSnapshot(format!(
                "buffer index {} is not a word boundary within {} bytes",
                snapshot.index,
                S::BYTES_AT_ONCE
            )));
        }

        check_threshold::<S>(snapshot.reseed_threshold_bits)?;

        let mut state = EngineState::<S>::new();
        state.install_seed(&snapshot.seed)?;
        state.counter.load(&snapshot.counter);
        if snapshot.index < S::BYTES_AT_ONCE {
            state.regenerate_block();
        }
        state.index = snapshot.index;
        state.entropy = EntropyAccount::new(snapshot.entropy_bits);

        Ok(Self::from_state(state, snapshot.reseed_threshold_bits))
    }
}

fn check_seed_length<S: CipherSuite>(length: usize, min: usize) -> Result<(), EngineError> {
    let max = S::MAX_TOTAL_SEED_LENGTH_BYTES;
    if length < min || length > max {
        return Err(EngineError::InvalidSeedLength { length, min, max });
    }
    Ok(())
}

fn check_threshold<S: CipherSuite>(bits: i64) -> Result<(), EngineError> {
    let capacity = bits_in_bytes(S::MAX_TOTAL_SEED_LENGTH_BYTES);
    if bits >= capacity {
        return Err(EngineError::UnreachableThreshold { bits, capacity });
    }
    Ok(())
}

impl<S: CipherSuite> EntropyRng for CounterEngine<S> {
    fn next_bits(&self, bits: u32) -> u32 {
        self.lock().next_bits(bits)
    }

    fn debit_entropy(&self, bits: u64) {
        self.produce(bits, |_| ());
    }

    fn entropy_bits(&self) -> i64 {
        CounterEngine::entropy_bits(self)
    }

    fn reseed(&self, seed: &[u8]) -> Result<(), EngineError> {
        CounterEngine::reseed(self, seed)
    }

    fn new_seed_length(&self) -> usize {
        S::MAX_TOTAL_SEED_LENGTH_BYTES
    }

    fn needs_reseeding(&self) -> bool {
        self.entropy_bits() <= self.reseed_threshold_bits
    }

    fn attach_seeder(&self, link: Option<SeederLink>) {
        self.lock().seeder = link;
    }

    fn seeder(&self) -> Option<SeederLink> {
        self.lock().seeder.clone()
    }
}

impl<S: CipherSuite> RngCore for CounterEngine<S> {
    fn next_u32(&mut self) -> u32 {
        CounterEngine::next_u32(self)
    }

    fn next_u64(&mut self) -> u64 {
        CounterEngine::next_u64(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        CounterEngine::fill_bytes(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        CounterEngine::fill_bytes(self, dest);
        Ok(())
    }
}

impl<S: CipherSuite> std::fmt::Debug for CounterEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("CounterEngine")
            .field("counter", &state.counter)
            .field("index", &state.index)
            .field("entropy_bits", &state.entropy.estimate())
            .field("reseed_count", &state.reseed_count)
            .finish_non_exhaustive()
    }
}
