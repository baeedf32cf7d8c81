use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An ordered event queue with a terminal state.
///
/// Producers push from whichever thread observes the event (usually a
/// connection pump); the owning handle drains it. Once sealed, no more
/// events are accepted and consumers see `None` after the remaining events.
pub(crate) struct EventQueue<E> {
    state: Mutex<QueueState<E>>,
    ready: Condvar,
}

struct QueueState<E> {
    events: VecDeque<E>,
    sealed: bool,
}

impl<E> EventQueue<E> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                sealed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append an event. Returns `false` if the queue is already sealed.
    pub(crate) fn push(&self, event: E) -> bool {
        let mut state = lock(&self.state);
        if state.sealed {
            return false;
        }
        state.events.push_back(event);
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Seal the queue, optionally appending a final event.
    ///
    /// With `discard_pending`, events not yet taken are dropped first.
    /// Returns `false` if the queue was already sealed.
    pub(crate) fn seal(&self, last: Option<E>, discard_pending: bool) -> bool {
        let mut state = lock(&self.state);
        if state.sealed {
            return false;
        }
        state.sealed = true;
        if discard_pending {
            state.events.clear();
        }
        state.events.extend(last);
        drop(state);
        self.ready.notify_all();
        true
    }

    /// Keep only the pending events matching `keep`.
    pub(crate) fn retain(&self, keep: impl FnMut(&E) -> bool) {
        lock(&self.state).events.retain(keep);
    }

    pub(crate) fn is_sealed(&self) -> bool {
        lock(&self.state).sealed
    }

    pub(crate) fn try_pop(&self) -> Option<E> {
        lock(&self.state).events.pop_front()
    }

    /// Block until an event arrives or the queue is sealed and drained.
    pub(crate) fn pop(&self) -> Option<E> {
        let mut state = lock(&self.state);
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            if state.sealed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Option<E> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            let now = Instant::now();
            if state.sealed || now >= deadline {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
