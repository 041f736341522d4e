use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

pub type TerminateCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Terminated,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const TERMINATED: u8 = 2;

/// Run state of one query plus the terminate callbacks waiting on it.
///
/// `terminate` inspects the state while holding the pending lock, and `finish`
/// only drains the pending list after its compare-and-swap has won, so every
/// callback is either run by `terminate` itself or handed to exactly one
/// `finish` caller.
pub struct Lifecycle {
    state: AtomicU8,
    pending: Mutex<Vec<TerminateCallback>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> RunState {
        match self.state.load(Ordering::Acquire) {
            IDLE => RunState::Idle,
            RUNNING => RunState::Running,
            _ => RunState::Terminated,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Idle -> Running. Returns false if the query was already started.
    pub fn start(&self) -> bool {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Running -> Terminated. Only the caller that performs the transition
    /// receives the pending callbacks; everyone else gets `None`.
    pub fn finish(&self) -> Option<Vec<TerminateCallback>> {
        self.state
            .compare_exchange(RUNNING, TERMINATED, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(std::mem::take(&mut *self.pending.lock()))
    }

    /// Runs `callback` now if the query is not running, otherwise once the
    /// running query ends.
    pub fn terminate(&self, callback: TerminateCallback) {
        let mut pending = self.pending.lock();
        if self.is_running() {
            pending.push(callback);
            return;
        }
        drop(pending);
        callback();
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state())
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}
