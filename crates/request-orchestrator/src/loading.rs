//! Debounced loading indicator
//!
//! Counts in-flight calls and drives a `LoadingSink`. The indicator turns on
//! only after calls have been continuously in flight for the debounce delay, and
//! turns off when the last call finishes. A burst of short calls never flickers
//! it on.
//!
//! The sink is called while the tracker's state lock is held, so on/off signals
//! reach it in order. A sink must not call back into the tracker.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use provider::LoadingSink;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

#[derive(Default)]
struct State {
    active: usize,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every 0 to 1 transition so a stale timer can tell it lost.
    generation: u64,
    signaled: bool,
}

struct Inner {
    sink: Arc<dyn LoadingSink>,
    delay: Duration,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, generation: u64) {
        let mut state = self.state();
        if state.generation != generation || state.active == 0 || state.signaled {
            return;
        }
        state.signaled = true;
        state.timer = None;
        trace!(active = state.active, "loading indicator on");
        self.sink.set_loading(true);
    }
}

/// Shared in-flight counter. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LoadingTracker {
    inner: Arc<Inner>,
}

impl LoadingTracker {
    pub fn new(sink: Arc<dyn LoadingSink>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                delay,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Register a call. Must run inside a Tokio runtime.
    pub fn begin(&self) {
        let mut state = self.inner.state();
        state.active += 1;
        if state.active > 1 {
            return;
        }

        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.delay;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(generation);
        }));
    }

    /// Unregister a call. Unbalanced calls are logged and ignored.
    pub fn end(&self) {
        let mut state = self.inner.state();
        if state.active == 0 {
            warn!("loading tracker end() without matching begin()");
            return;
        }
        state.active -= 1;
        if state.active > 0 {
            return;
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.signaled {
            state.signaled = false;
            trace!("loading indicator off");
            self.inner.sink.set_loading(false);
        }
    }

    /// `begin()` now, `end()` when the guard drops.
    pub fn track(&self) -> LoadingGuard {
        self.begin();
        LoadingGuard {
            tracker: self.clone(),
        }
    }

    pub fn active(&self) -> usize {
        self.inner.state().active
    }

    /// Whether the sink currently shows the indicator.
    pub fn is_signaled(&self) -> bool {
        self.inner.state().signaled
    }
}

impl std::fmt::Debug for LoadingTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("LoadingTracker")
            .field("delay", &self.inner.delay)
            .field("active", &state.active)
            .field("signaled", &state.signaled)
            .finish()
    }
}

/// Ends one tracked call on drop, including when the call is cancelled.
#[must_use = "the call is untracked as soon as the guard drops"]
pub struct LoadingGuard {
    tracker: LoadingTracker,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.tracker.end();
    }
}
