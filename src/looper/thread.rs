//! Looper thread and its lifecycle state machine.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use super::LooperError;

/// One unit of repeated background work.
pub trait Iterate: Send + 'static {
    /// Runs one iteration. Returning `Ok(false)` ends the loop normally.
    fn iterate(&mut self) -> Result<bool, LooperError>;
}

/// Lifecycle of a looper. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LooperState {
    /// Created, not yet started.
    Ready,
    /// Thread running.
    Running,
    /// Loop ended; terminal.
    Stopped,
}

/// An unrecoverable fault that ended a loop.
#[derive(Debug)]
pub enum LooperFault {
    /// The task returned an error.
    Error(LooperError),
    /// The task panicked.
    Panic(String),
}

impl std::fmt::Display for LooperFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LooperFault::Error(e) => write!(f, "{}", e),
            LooperFault::Panic(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

/// Callback for faults that end a loop.
pub type FaultHandler = Arc<dyn Fn(&str, &LooperFault) + Send + Sync>;

struct Shared {
    state: Mutex<LooperState>,
    stop_requested: AtomicBool,
    iterations: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LooperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A restartable-by-replacement background loop.
pub struct Looper {
    name: String,
    shared: Arc<Shared>,
    task: Mutex<Option<Box<dyn Iterate>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    fault_handler: FaultHandler,
}

impl Looper {
    /// Creates a looper in the `Ready` state.
    pub fn new(name: impl Into<String>, task: impl Iterate) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(LooperState::Ready),
                stop_requested: AtomicBool::new(false),
                iterations: AtomicU64::new(0),
            }),
            task: Mutex::new(Some(Box::new(task))),
            handle: Mutex::new(None),
            fault_handler: Arc::new(log_fault),
        }
    }

    /// Replaces the default fault handler, which logs at error level.
    pub fn with_fault_handler(mut self, handler: FaultHandler) -> Self {
        self.fault_handler = handler;
        self
    }

    /// Spawns the loop thread.
    pub fn start(&self) -> Result<(), LooperError> {
        let mut state = self.shared.state();
        match *state {
            LooperState::Running => return Err(LooperError::AlreadyStarted),
            LooperState::Stopped => return Err(LooperError::Terminated),
            LooperState::Ready => {}
        }
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(LooperError::Terminated)?;

        let shared = Arc::clone(&self.shared);
        let handler = Arc::clone(&self.fault_handler);
        let name = self.name.clone();
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(name, task, shared, handler))?;

        *state = LooperState::Running;
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::debug!(looper = %self.name, "Looper started");
        Ok(())
    }

    /// Asks the loop to end before its next iteration.
    pub fn request_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Waits for the loop thread to finish. Returns immediately if it never
    /// started or was already joined.
    pub fn join(&self) {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LooperState {
        *self.shared.state()
    }

    /// Whether the loop thread is still running.
    pub fn is_running(&self) -> bool {
        self.state() == LooperState::Running
    }

    /// Completed iterations so far.
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::SeqCst)
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Looper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Looper")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("iterations", &self.iterations())
            .finish()
    }
}

fn run(name: String, mut task: Box<dyn Iterate>, shared: Arc<Shared>, handler: FaultHandler) {
    while !shared.stop_requested.load(Ordering::SeqCst) {
        match panic::catch_unwind(AssertUnwindSafe(|| task.iterate())) {
            Ok(Ok(true)) => {
                shared.iterations.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Ok(false)) => {
                shared.iterations.fetch_add(1, Ordering::SeqCst);
                break;
            }
            Ok(Err(e)) => {
                handler(&name, &LooperFault::Error(e));
                break;
            }
            Err(payload) => {
                handler(&name, &LooperFault::Panic(panic_message(payload.as_ref())));
                break;
            }
        }
    }
    *shared.state() = LooperState::Stopped;
    tracing::debug!(looper = %name, "Looper stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn log_fault(name: &str, fault: &LooperFault) {
    tracing::error!(looper = %name, fault = %fault, "Looper terminated by fault");
}
