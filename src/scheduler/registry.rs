//! Source-to-worker registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use super::config::SchedulerConfig;
use super::worker::{SeederLink, Worker, WorkerStats, WorkerTask};
use super::SchedulerError;
use crate::engine::EntropyRng;
use crate::looper::{FaultHandler, Looper, LooperFault};
use crate::seed::SeedSource;

static GLOBAL: OnceLock<ReseedScheduler> = OnceLock::new();

pub(crate) struct WorkerEntry {
    pub(crate) worker: Arc<Worker>,
    pub(crate) looper: Looper,
}

pub(crate) struct RegistryInner {
    workers: Mutex<HashMap<usize, WorkerEntry>>,
    config: SchedulerConfig,
    spawned: AtomicU64,
}

impl RegistryInner {
    pub(crate) fn lock_workers(&self) -> MutexGuard<'_, HashMap<usize, WorkerEntry>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn source_id(source: &Arc<dyn SeedSource>) -> usize {
    Arc::as_ptr(source) as *const () as usize
}

fn engine_addr<E: ?Sized>(engine: &Arc<E>) -> usize {
    Arc::as_ptr(engine) as *const () as usize
}

/// Registry of background reseed workers, one per seed source.
///
/// Use [`ReseedScheduler::global`] for the process-wide instance, or
/// [`ReseedScheduler::new`] for an isolated one whose workers shut down when
/// it is dropped.
pub struct ReseedScheduler {
    inner: Arc<RegistryInner>,
}

impl ReseedScheduler {
    /// Creates an independent scheduler.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                workers: Mutex::new(HashMap::new()),
                config,
                spawned: AtomicU64::new(0),
            }),
        }
    }

    /// The process-wide scheduler, created with default settings on first use.
    pub fn global() -> &'static ReseedScheduler {
        GLOBAL.get_or_init(|| ReseedScheduler::new(SchedulerConfig::default()))
    }

    /// Scheduler settings.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Adds `engine` to the service set of `source`'s worker, starting the
    /// worker if there is none.
    ///
    /// Only a weak reference is kept. An engine already serviced by another
    /// worker is moved.
    pub fn register<E: EntropyRng + 'static>(
        &self,
        source: &Arc<dyn SeedSource>,
        engine: &Arc<E>,
    ) -> Result<(), SchedulerError> {
        let id = source_id(source);
        let weak = Arc::downgrade(engine);
        let weak: Weak<dyn EntropyRng> = weak;

        let worker = {
            let mut workers = self.inner.lock_workers();
            let worker = match workers.get(&id) {
                Some(entry) => Arc::clone(&entry.worker),
                None => {
                    let entry = self.spawn_worker(source, id)?;
                    let worker = Arc::clone(&entry.worker);
                    workers.insert(id, entry);
                    worker
                }
            };
            worker.add_member(weak);
            worker
        };

        if let Some(previous) = engine.seeder() {
            if !previous.points_to(&worker) {
                previous.detach(engine_addr(engine));
            }
        }
        engine.attach_seeder(Some(SeederLink::new(&worker)));

        tracing::debug!(source = source.name(), "Engine registered for background reseeding");
        Ok(())
    }

    /// Removes `engine` from `source`'s worker. Idempotent.
    pub fn deregister<E: EntropyRng + 'static>(&self, source: &Arc<dyn SeedSource>, engine: &Arc<E>) {
        let Some(worker) = self.worker(source) else {
            return;
        };
        if worker.remove_member(engine_addr(engine)) {
            if engine.seeder().is_some_and(|link| link.points_to(&worker)) {
                engine.attach_seeder(None);
            }
            tracing::debug!(source = source.name(), "Engine deregistered");
        }
    }

    /// Asks `source`'s worker to stop once its service set is empty.
    ///
    /// A worker that still services engines keeps running; a later
    /// registration cancels the request.
    pub fn stop_if_empty(&self, source: &Arc<dyn SeedSource>) {
        if let Some(worker) = self.worker(source) {
            worker.request_stop_if_empty();
        }
    }

    /// Whether `source` has no live engines registered (or no worker).
    pub fn is_empty(&self, source: &Arc<dyn SeedSource>) -> bool {
        self.worker(source).map_or(true, |worker| !worker.has_members())
    }

    /// Whether a worker currently exists for `source`.
    pub fn has_worker(&self, source: &Arc<dyn SeedSource>) -> bool {
        self.inner.lock_workers().contains_key(&source_id(source))
    }

    /// Asks `source`'s worker to run a pass now.
    pub fn wake(&self, source: &Arc<dyn SeedSource>) {
        if let Some(worker) = self.worker(source) {
            worker.wake();
        }
    }

    /// Stops and removes every worker with an empty service set. Returns how
    /// many were removed.
    pub fn stop_all_empty(&self) -> usize {
        let removed: Vec<WorkerEntry> = {
            let mut workers = self.inner.lock_workers();
            let idle: Vec<usize> = workers
                .iter()
                .filter(|(_, entry)| !entry.worker.has_members())
                .map(|(id, _)| *id)
                .collect();
            idle.into_iter().filter_map(|id| workers.remove(&id)).collect()
        };
        for entry in &removed {
            entry.worker.shutdown();
        }
        if !removed.is_empty() {
            tracing::info!(stopped = removed.len(), "Stopped idle reseed workers");
        }
        removed.len()
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.inner.lock_workers().len()
    }

    /// Counters for `source`'s worker.
    pub fn stats(&self, source: &Arc<dyn SeedSource>) -> Option<WorkerStats> {
        self.worker(source).map(|worker| worker.stats())
    }

    /// Counters for every worker.
    pub fn all_stats(&self) -> Vec<WorkerStats> {
        let workers: Vec<Arc<Worker>> = self
            .inner
            .lock_workers()
            .values()
            .map(|entry| Arc::clone(&entry.worker))
            .collect();
        workers.iter().map(|worker| worker.stats()).collect()
    }

    fn worker(&self, source: &Arc<dyn SeedSource>) -> Option<Arc<Worker>> {
        self.inner
            .lock_workers()
            .get(&source_id(source))
            .map(|entry| Arc::clone(&entry.worker))
    }

    fn spawn_worker(&self, source: &Arc<dyn SeedSource>, id: usize) -> Result<WorkerEntry, SchedulerError> {
        let worker = Arc::new(Worker::new(
            Arc::clone(source),
            id,
            self.inner.config.retry_interval(),
            Arc::downgrade(&self.inner),
        ));
        let n = self.inner.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.inner.config.thread_name_prefix, n);

        let faulted = Arc::downgrade(&worker);
        let on_fault: FaultHandler = Arc::new(move |name: &str, fault: &LooperFault| {
            tracing::error!(looper = %name, fault = %fault, "Reseed worker terminated by fault");
            if let Some(worker) = faulted.upgrade() {
                worker.abandon();
            }
        });
        let looper = Looper::new(name, WorkerTask(Arc::clone(&worker))).with_fault_handler(on_fault);
        looper.start()?;

        tracing::info!(source = worker.source_name(), thread = looper.name(), "Reseed worker started");
        Ok(WorkerEntry { worker, looper })
    }
}

impl Drop for ReseedScheduler {
    fn drop(&mut self) {
        let entries: Vec<WorkerEntry> = self.inner.lock_workers().drain().map(|(_, entry)| entry).collect();
        for entry in &entries {
            entry.worker.shutdown();
        }
        for entry in &entries {
            entry.looper.join();
        }
    }
}

impl std::fmt::Debug for ReseedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReseedScheduler")
            .field("config", &self.inner.config)
            .field("workers", &self.worker_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CounterEngine;
    use crate::seed::{PseudorandomSeedSource, SeedError};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::{Duration, Instant};

    type Engine = CounterEngine;

    fn scheduler() -> ReseedScheduler {
        ReseedScheduler::new(SchedulerConfig::default().with_retry_interval(Duration::from_millis(10)))
    }

    fn pseudo(seed: u64) -> Arc<dyn SeedSource> {
        Arc::new(PseudorandomSeedSource::from_u64(seed))
    }

    fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if condition() {
                return true;
            }
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Counts calls; can refuse or fail on demand.
    struct Scripted {
        worth_trying: AtomicBool,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(worth_trying: bool, failing: bool) -> Arc<Self> {
            Arc::new(Self {
                worth_trying: AtomicBool::new(worth_trying),
                failing: AtomicBool::new(failing),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl SeedSource for Scripted {
        fn fill_seed(&self, out: &mut [u8]) -> Result<(), SeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(SeedError::GenerationFailed("scripted".into()));
            }
            out.fill(0x5C);
            Ok(())
        }

        fn is_worth_trying(&self) -> bool {
            self.worth_trying.load(Ordering::SeqCst)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Engine stand-in that always asks for a reseed.
    struct AlwaysDue {
        reject: bool,
        attempts: AtomicUsize,
        seeder: Mutex<Option<SeederLink>>,
    }

    impl AlwaysDue {
        fn new(reject: bool) -> Arc<Self> {
            Arc::new(Self {
                reject,
                attempts: AtomicUsize::new(0),
                seeder: Mutex::new(None),
            })
        }
    }

    impl EntropyRng for AlwaysDue {
        fn next_bits(&self, _bits: u32) -> u32 {
            0
        }

        fn debit_entropy(&self, _bits: u64) {}

        fn entropy_bits(&self) -> i64 {
            0
        }

        fn reseed(&self, seed: &[u8]) -> Result<(), crate::engine::EngineError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(crate::engine::EngineError::InvalidKey { length: seed.len() });
            }
            Ok(())
        }

        fn new_seed_length(&self) -> usize {
            64
        }

        fn needs_reseeding(&self) -> bool {
            true
        }

        fn attach_seeder(&self, link: Option<SeederLink>) {
            *self.seeder.lock().unwrap() = link;
        }

        fn seeder(&self) -> Option<SeederLink> {
            self.seeder.lock().unwrap().clone()
        }
    }

    fn depleted_engine() -> Arc<Engine> {
        let engine = Arc::new(Engine::new(&[1u8; 16]).unwrap());
        for _ in 0..3 {
            engine.next_u64();
        }
        assert!(engine.needs_reseeding());
        engine
    }

    #[test]
    fn test_one_worker_per_source() {
        let scheduler = scheduler();
        let source = pseudo(1);
        let a = Arc::new(Engine::new(&[1u8; 32]).unwrap());
        let b = Arc::new(Engine::new(&[2u8; 32]).unwrap());

        scheduler.register(&source, &a).unwrap();
        scheduler.register(&Arc::clone(&source), &b).unwrap();

        assert_eq!(scheduler.worker_count(), 1);
        assert!(scheduler.has_worker(&source));
        assert!(!scheduler.is_empty(&source));
        assert_eq!(scheduler.stats(&source).unwrap().members, 2);
        assert!(a.seeder().unwrap().is_active());
    }

    #[test]
    fn test_distinct_sources_get_distinct_workers() {
        let scheduler = scheduler();
        let engine = Arc::new(Engine::new(&[1u8; 32]).unwrap());
        let other = Arc::new(Engine::new(&[2u8; 32]).unwrap());
        scheduler.register(&pseudo(1), &engine).unwrap();
        scheduler.register(&pseudo(1), &other).unwrap();
        assert_eq!(scheduler.worker_count(), 2);
    }

    #[test]
    fn test_stop_if_empty_retires_worker() {
        let scheduler = scheduler();
        let source = pseudo(2);
        let a = Arc::new(Engine::new(&[1u8; 32]).unwrap());
        let b = Arc::new(Engine::new(&[2u8; 32]).unwrap());
        scheduler.register(&source, &a).unwrap();
        scheduler.register(&source, &b).unwrap();

        scheduler.deregister(&source, &a);
        scheduler.deregister(&source, &b);
        scheduler.deregister(&source, &b);
        assert!(scheduler.is_empty(&source));
        assert!(a.seeder().is_none());

        scheduler.stop_if_empty(&source);
        assert!(eventually(|| !scheduler.has_worker(&source)));
        assert_eq!(scheduler.worker_count(), 0);
    }

    #[test]
    fn test_stop_if_empty_keeps_busy_worker() {
        let scheduler = scheduler();
        let source = pseudo(3);
        let engine = Arc::new(Engine::new(&[1u8; 32]).unwrap());
        scheduler.register(&source, &engine).unwrap();

        let passes = scheduler.stats(&source).unwrap().passes;
        scheduler.stop_if_empty(&source);
        assert!(eventually(|| scheduler.stats(&source).unwrap().passes > passes));
        assert!(scheduler.has_worker(&source));
    }

    #[test]
    fn test_new_worker_after_retirement() {
        let scheduler = scheduler();
        let source = pseudo(4);
        let engine = Arc::new(Engine::new(&[1u8; 32]).unwrap());
        scheduler.register(&source, &engine).unwrap();
        scheduler.deregister(&source, &engine);
        scheduler.stop_if_empty(&source);
        assert!(eventually(|| !scheduler.has_worker(&source)));

        scheduler.register(&source, &engine).unwrap();
        assert!(scheduler.has_worker(&source));
        assert!(engine.seeder().unwrap().is_active());
    }

    #[test]
    fn test_depleted_engine_reseeded_in_background() {
        let scheduler = scheduler();
        let source = pseudo(5);
        let engine = Arc::new(Engine::new(&[1u8; 16]).unwrap());
        scheduler.register(&source, &engine).unwrap();

        // Crossing zero wakes the idle worker.
        engine.fill_bytes(&mut [0u8; 24]);
        assert!(eventually(|| engine.reseed_count() >= 1));
        assert_eq!(engine.entropy_bits(), 512);
        assert!(eventually(|| scheduler.stats(&source).unwrap().reseeds == 1));
    }

    #[test]
    fn test_not_worth_trying_skips_generation() {
        let scheduler = scheduler();
        let scripted = Scripted::new(false, false);
        let source: Arc<dyn SeedSource> = scripted.clone();
        let engine = depleted_engine();
        scheduler.register(&source, &engine).unwrap();

        assert!(eventually(|| scheduler.stats(&source).unwrap().skipped_passes >= 2));
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.reseed_count(), 0);

        scripted.worth_trying.store(true, Ordering::SeqCst);
        assert!(eventually(|| engine.reseed_count() == 1));
    }

    #[test]
    fn test_seed_failure_retried() {
        let scheduler = scheduler();
        let scripted = Scripted::new(true, true);
        let source: Arc<dyn SeedSource> = scripted.clone();
        let engine = depleted_engine();
        scheduler.register(&source, &engine).unwrap();

        assert!(eventually(|| scheduler.stats(&source).unwrap().seed_failures >= 2));
        assert_eq!(engine.reseed_count(), 0);
        assert!(scheduler.has_worker(&source));

        scripted.failing.store(false, Ordering::SeqCst);
        assert!(eventually(|| engine.reseed_count() == 1));
    }

    #[test]
    fn test_engine_still_due_after_reseed_backs_off() {
        let scheduler =
            ReseedScheduler::new(SchedulerConfig::default().with_retry_interval(Duration::from_millis(50)));
        let scripted = Scripted::new(true, false);
        let source: Arc<dyn SeedSource> = scripted.clone();
        let stuck = AlwaysDue::new(false);
        scheduler.register(&source, &stuck).unwrap();

        assert!(eventually(|| stuck.attempts.load(Ordering::SeqCst) >= 1));
        std::thread::sleep(Duration::from_millis(300));
        let calls = scripted.calls.load(Ordering::SeqCst);
        assert!(calls <= 20, "{} seed requests in 300ms", calls);
        assert!(scheduler.has_worker(&source));
    }

    #[test]
    fn test_rejected_reseed_does_not_block_other_engines() {
        // Failing passes back off for a minute, so the engine can only be
        // reseeded in time by a pass that also hit the rejection.
        let scheduler =
            ReseedScheduler::new(SchedulerConfig::default().with_retry_interval(Duration::from_secs(60)));
        let source = pseudo(12);
        let broken = AlwaysDue::new(true);
        scheduler.register(&source, &broken).unwrap();
        let engine = depleted_engine();
        scheduler.register(&source, &engine).unwrap();

        assert!(eventually(|| engine.reseed_count() == 1));
        assert_eq!(engine.entropy_bits(), 512);
        assert!(broken.attempts.load(Ordering::SeqCst) >= 1);
        assert!(eventually(|| {
            let stats = scheduler.stats(&source).unwrap();
            stats.reseeds == 1 && stats.seed_failures >= 1
        }));
    }

    #[test]
    fn test_shutdown_clears_engine_links() {
        let scheduler = scheduler();
        let source = pseudo(13);
        let engine = Arc::new(Engine::new(&[1u8; 32]).unwrap());
        let other = AlwaysDue::new(true);
        scheduler.register(&source, &engine).unwrap();
        scheduler.register(&source, &other).unwrap();

        drop(scheduler);
        assert!(engine.seeder().is_none());
        assert!(other.seeder().is_none());
    }

    #[test]
    fn test_dropped_engine_pruned() {
        let scheduler = scheduler();
        let source = pseudo(6);
        let engine = Arc::new(Engine::new(&[1u8; 32]).unwrap());
        scheduler.register(&source, &engine).unwrap();
        drop(engine);

        assert!(eventually(|| scheduler.is_empty(&source)));
        scheduler.stop_if_empty(&source);
        assert!(eventually(|| !scheduler.has_worker(&source)));
    }

    #[test]
    fn test_stop_all_empty_is_synchronous() {
        let scheduler = scheduler();
        let busy = pseudo(7);
        let idle = pseudo(8);
        let kept = Arc::new(Engine::new(&[1u8; 32]).unwrap());
        let gone = Arc::new(Engine::new(&[2u8; 32]).unwrap());
        scheduler.register(&busy, &kept).unwrap();
        scheduler.register(&idle, &gone).unwrap();
        scheduler.deregister(&idle, &gone);

        assert_eq!(scheduler.stop_all_empty(), 1);
        assert!(!scheduler.has_worker(&idle));
        assert!(scheduler.has_worker(&busy));
        assert_eq!(scheduler.stop_all_empty(), 0);
    }

    #[test]
    fn test_register_moves_engine_between_sources() {
        let scheduler = scheduler();
        let first = pseudo(9);
        let second = pseudo(10);
        let engine = Arc::new(Engine::new(&[1u8; 32]).unwrap());

        scheduler.register(&first, &engine).unwrap();
        scheduler.register(&second, &engine).unwrap();

        assert!(scheduler.is_empty(&first));
        assert!(!scheduler.is_empty(&second));
        assert_eq!(engine.seeder().unwrap().source_id(), source_id(&second));
    }

    #[test]
    fn test_drop_shuts_down_workers() {
        let scheduler = scheduler();
        let source = pseudo(11);
        let engine = Arc::new(Engine::new(&[1u8; 32]).unwrap());
        scheduler.register(&source, &engine).unwrap();
        let link = engine.seeder().unwrap();
        assert!(link.is_active());

        drop(scheduler);
        assert!(!link.is_active());
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(ReseedScheduler::global(), ReseedScheduler::global()));
    }
}
