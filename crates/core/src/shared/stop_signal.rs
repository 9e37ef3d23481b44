use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Process-wide cooperative cancellation flag.
///
/// Once set it stays set. Loops check it at the top of every iteration and
/// use [`StopSignal::wait_timeout`] as their sleep, so shutdown never waits
/// out a full period.
///
/// A signal can derive children: setting the parent sets every child, while
/// setting a child leaves the parent untouched. Stages use a child so they
/// can be stopped individually and still observe the global stop.
#[derive(Clone, Debug)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct State {
    stopped: bool,
    children: Vec<Weak<Inner>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Derives a signal that is set whenever this one is.
    pub fn child(&self) -> StopSignal {
        let mut state = self.inner.lock();
        let child = StopSignal::new();
        if state.stopped {
            child.inner.lock().stopped = true;
        } else {
            state.children.retain(|c| c.strong_count() > 0);
            state.children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// Sets the signal and wakes every waiter. Idempotent.
    pub fn set(&self) {
        Inner::set(&self.inner);
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Blocks until the signal is set or `timeout` elapses.
    ///
    /// Returns `true` if the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        while !state.stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .inner
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(this: &Arc<Inner>) {
        let children = {
            let mut state = this.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            this.changed.notify_all();
            std::mem::take(&mut state.children)
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            Inner::set(&child);
        }
    }
}
