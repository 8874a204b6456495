//! Per-source worker: service set, pass logic, and idle waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;

use super::registry::{RegistryInner, WorkerEntry};
use crate::engine::EntropyRng;
use crate::looper::{Iterate, LooperError};
use crate::seed::SeedSource;

/// Counters for one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Name of the seed source.
    pub source: String,
    /// Passes started.
    pub passes: u64,
    /// Successful reseeds.
    pub reseeds: u64,
    /// Failed seed requests and rejected reseeds.
    pub seed_failures: u64,
    /// Passes skipped because the source was not worth trying.
    pub skipped_passes: u64,
    /// Live engines in the service set.
    pub members: usize,
}

#[derive(Default)]
struct Counters {
    passes: AtomicU64,
    reseeds: AtomicU64,
    seed_failures: AtomicU64,
    skipped_passes: AtomicU64,
}

#[derive(Default)]
struct WorkerState {
    members: Vec<Weak<dyn EntropyRng>>,
    stop_if_empty: bool,
    wake_pending: bool,
    shutdown: bool,
    stopped: bool,
}

impl WorkerState {
    fn prune(&mut self) {
        self.members.retain(|member| member.strong_count() > 0);
    }
}

fn idle(state: &mut WorkerState) -> bool {
    !state.wake_pending && !state.shutdown
}

pub(crate) fn weak_addr(member: &Weak<dyn EntropyRng>) -> usize {
    member.as_ptr() as *const () as usize
}

pub(crate) struct Worker {
    source: Arc<dyn SeedSource>,
    source_id: usize,
    retry_interval: Duration,
    registry: Weak<RegistryInner>,
    state: Mutex<WorkerState>,
    signal: Condvar,
    counters: Counters,
}

impl Worker {
    pub(crate) fn new(
        source: Arc<dyn SeedSource>,
        source_id: usize,
        retry_interval: Duration,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            source,
            source_id,
            retry_interval,
            registry,
            state: Mutex::new(WorkerState::default()),
            signal: Condvar::new(),
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Adds an engine (idempotent) and cancels any pending stop-if-empty.
    pub(crate) fn add_member(&self, engine: Weak<dyn EntropyRng>) {
        let mut state = self.lock();
        let addr = weak_addr(&engine);
        if !state.members.iter().any(|member| weak_addr(member) == addr) {
            state.members.push(engine);
        }
        state.stop_if_empty = false;
        state.wake_pending = true;
        self.signal.notify_all();
    }

    /// Removes the engine at `addr`; returns whether it was a member.
    pub(crate) fn remove_member(&self, addr: usize) -> bool {
        let mut state = self.lock();
        let before = state.members.len();
        state.members.retain(|member| weak_addr(member) != addr);
        let removed = state.members.len() != before;
        if removed {
            state.wake_pending = true;
            self.signal.notify_all();
        }
        removed
    }

    pub(crate) fn has_members(&self) -> bool {
        let mut state = self.lock();
        state.prune();
        !state.members.is_empty()
    }

    pub(crate) fn request_stop_if_empty(&self) {
        let mut state = self.lock();
        state.stop_if_empty = true;
        state.wake_pending = true;
        self.signal.notify_all();
    }

    /// "Check now" signal.
    pub(crate) fn wake(&self) {
        let mut state = self.lock();
        state.wake_pending = true;
        self.signal.notify_all();
    }

    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shutdown = true;
            state.stopped = true;
            self.signal.notify_all();
        }
        self.release_members();
    }

    /// Clears the back-link of every engine still pointing at this worker,
    /// so floor callers blocked on it fall back or fail instead of waiting.
    fn release_members(&self) {
        let members: Vec<Arc<dyn EntropyRng>> = {
            let mut state = self.lock();
            state.prune();
            state.members.iter().filter_map(Weak::upgrade).collect()
        };
        for engine in members {
            if engine.seeder().is_some_and(|link| link.is_for(self)) {
                engine.attach_seeder(None);
            }
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub(crate) fn stats(&self) -> WorkerStats {
        let members = {
            let mut state = self.lock();
            state.prune();
            state.members.len()
        };
        WorkerStats {
            source: self.source.name().to_string(),
            passes: self.counters.passes.load(Ordering::Relaxed),
            reseeds: self.counters.reseeds.load(Ordering::Relaxed),
            seed_failures: self.counters.seed_failures.load(Ordering::Relaxed),
            skipped_passes: self.counters.skipped_passes.load(Ordering::Relaxed),
            members,
        }
    }

    /// Runs one pass. Returns `false` once the worker has stopped.
    ///
    /// Engines are only called with the worker lock released.
    fn pass(&self) -> bool {
        self.counters.passes.fetch_add(1, Ordering::Relaxed);
        let members: Vec<Arc<dyn EntropyRng>> = {
            let mut state = self.lock();
            if state.shutdown {
                state.stopped = true;
                return false;
            }
            state.wake_pending = false;
            state.prune();
            state.members.iter().filter_map(Weak::upgrade).collect()
        };

        if members.is_empty() {
            let stop_requested = self.lock().stop_if_empty;
            if stop_requested && self.try_retire() {
                return false;
            }
            self.wait(None);
            return true;
        }

        let due: Vec<Arc<dyn EntropyRng>> = members
            .into_iter()
            .filter(|engine| engine.needs_reseeding())
            .collect();
        if due.is_empty() {
            self.wait(None);
            return true;
        }

        if !self.source.is_worth_trying() {
            self.counters.skipped_passes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                source = self.source.name(),
                due = due.len(),
                "Seed source not worth trying; skipping pass"
            );
            drop(due);
            self.wait(Some(self.retry_interval));
            return true;
        }

        let mut failed = false;
        let mut still_due = false;
        for engine in &due {
            match self.source.generate_seed(engine.new_seed_length()) {
                Ok(seed) => match engine.reseed(&seed) {
                    Ok(()) => {
                        self.counters.reseeds.fetch_add(1, Ordering::Relaxed);
                        still_due |= engine.needs_reseeding();
                    }
                    Err(e) => {
                        self.counters.seed_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(source = self.source.name(), error = %e, "Engine rejected reseed");
                        failed = true;
                    }
                },
                Err(e) => {
                    self.counters.seed_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(source = self.source.name(), error = %e, "Seed generation failed");
                    failed = true;
                    break;
                }
            }
        }
        tracing::debug!(source = self.source.name(), due = due.len(), failed, "Reseed pass complete");
        drop(due);

        // A fresh seed that leaves an engine due cannot be fixed by another
        // immediate pass; back off as if the source had failed.
        if failed || still_due {
            self.wait(Some(self.retry_interval));
        }
        true
    }

    /// Blocks until woken, or until `timeout` if given.
    fn wait(&self, timeout: Option<Duration>) {
        let state = self.lock();
        match timeout {
            None => {
                let _state = self
                    .signal
                    .wait_while(state, idle)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(timeout) => {
                let _state = self
                    .signal
                    .wait_timeout_while(state, timeout, idle)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    /// Leaves the registry if the service set is still empty and a stop was
    /// requested. Registrations take the registry lock first, so none can
    /// slip in between the check and the removal.
    fn try_retire(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            self.lock().stopped = true;
            return true;
        };
        let removed = {
            let mut workers = registry.lock_workers();
            let mut state = self.lock();
            state.prune();
            if !state.members.is_empty() || !state.stop_if_empty {
                return false;
            }
            state.stopped = true;
            remove_if_current(&mut workers, self)
        };
        drop(removed);
        tracing::info!(source = self.source.name(), "Reseed worker stopped: no engines left");
        true
    }

    /// Marks the worker dead after a fault and drops its registry entry.
    pub(crate) fn abandon(&self) {
        let removed = match self.registry.upgrade() {
            Some(registry) => {
                let mut workers = registry.lock_workers();
                self.lock().stopped = true;
                remove_if_current(&mut workers, self)
            }
            None => {
                self.lock().stopped = true;
                None
            }
        };
        drop(removed);
        self.release_members();
    }
}

fn remove_if_current(
    workers: &mut HashMap<usize, WorkerEntry>,
    worker: &Worker,
) -> Option<WorkerEntry> {
    let current = workers
        .get(&worker.source_id)
        .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(&entry.worker), worker));
    if current {
        workers.remove(&worker.source_id)
    } else {
        None
    }
}

/// Adapter running a worker's passes on a looper thread.
pub(crate) struct WorkerTask(pub(crate) Arc<Worker>);

impl Iterate for WorkerTask {
    fn iterate(&mut self) -> Result<bool, LooperError> {
        Ok(self.0.pass())
    }
}

/// Handle from an engine back to the worker that services it.
///
/// Holding a link does not keep the worker alive.
#[derive(Clone)]
pub struct SeederLink {
    worker: Weak<Worker>,
    source_id: usize,
}

impl SeederLink {
    pub(crate) fn new(worker: &Arc<Worker>) -> Self {
        Self {
            worker: Arc::downgrade(worker),
            source_id: worker.source_id,
        }
    }

    /// Asks the worker to run a pass now.
    pub fn wake(&self) {
        if let Some(worker) = self.worker.upgrade() {
            worker.wake();
        }
    }

    /// Whether the worker is still running.
    pub fn is_active(&self) -> bool {
        self.worker
            .upgrade()
            .is_some_and(|worker| !worker.is_stopped())
    }

    /// Identity of the seed source the worker draws from.
    pub fn source_id(&self) -> usize {
        self.source_id
    }

    pub(crate) fn points_to(&self, worker: &Arc<Worker>) -> bool {
        self.is_for(worker)
    }

    fn is_for(&self, worker: &Worker) -> bool {
        std::ptr::eq(self.worker.as_ptr(), worker)
    }

    /// Removes the engine at `addr` from the linked worker.
    pub(crate) fn detach(&self, addr: usize) {
        if let Some(worker) = self.worker.upgrade() {
            worker.remove_member(addr);
        }
    }
}

impl std::fmt::Debug for SeederLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeederLink")
            .field("source_id", &format_args!("{:#x}", self.source_id))
            .field("active", &self.is_active())
            .finish()
    }
}
