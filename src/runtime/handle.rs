//! Exclusive execution handle serializing interpreter access.
//!
//! The interpreter emulates a cooperative single-threaded execution model:
//! exactly one actor touches interpreter state at any instant, and holding
//! this handle is the only legal way in. The handle is deliberately not an
//! RAII lock over the state it guards: a native callback running inside the
//! interpreter must be able to release a handle acquired by the path that
//! entered the interpreter (the async bridge does exactly that), so acquire
//! and release are explicit operations on the handle value. The handle is
//! not reentrant.

use std::sync::{Condvar, Mutex};

/// FIFO gate over interpreter state.
///
/// Waiters are served strictly in arrival order, which is what makes
/// [`ExecHandle::yield_now`] a genuine handoff: re-acquiring queues the
/// caller behind every waiter that was already blocked.
pub struct ExecHandle {
    state: Mutex<Tickets>,
    ready: Condvar,
}

#[derive(Default)]
struct Tickets {
    /// Ticket currently holding the handle.
    head: u64,
    /// Next ticket to hand out.
    tail: u64,
}

impl ExecHandle {
    pub fn new() -> ExecHandle {
        ExecHandle {
            state: Mutex::new(Tickets::default()),
            ready: Condvar::new(),
        }
    }

    /// Block until the handle is acquired.
    pub fn lock(&self) {
        let mut state = self.state.lock().unwrap();
        let ticket = state.tail;
        state.tail += 1;
        while state.head != ticket {
            state = self.ready.wait(state).unwrap();
        }
    }

    /// Release the handle. Only the current holder may call this.
    pub fn unlock(&self) {
        let mut state = self.state.lock().unwrap();
        state.head += 1;
        drop(state);
        self.ready.notify_all();
    }

    /// Give any waiter a fair opportunity to run, then take the handle back.
    /// A no-op when nobody is waiting.
    pub fn yield_now(&self) {
        {
            let state = self.state.lock().unwrap();
            if state.tail == state.head + 1 {
                return;
            }
        }
        self.unlock();
        self.lock();
    }

    /// Acquire for the duration of a scope. Used for whole-call critical
    /// sections (event dispatch, table building); paths that need to release
    /// mid-call use `lock`/`unlock` directly.
    pub fn locked(&self) -> HandleGuard<'_> {
        self.lock();
        HandleGuard { handle: self }
    }

    /// Whether any actor is currently waiting for the handle.
    pub fn contended(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.tail > state.head + 1
    }
}

impl Default for ExecHandle {
    fn default() -> ExecHandle {
        ExecHandle::new()
    }
}

/// Scoped acquisition of an [`ExecHandle`].
pub struct HandleGuard<'a> {
    handle: &'a ExecHandle,
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        self.handle.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lock_unlock() {
        let handle = ExecHandle::new();
        handle.lock();
        assert!(!handle.contended());
        handle.unlock();
        handle.lock();
        handle.unlock();
    }

    #[test]
    fn test_waiters_are_served_in_arrival_order() {
        let handle = Arc::new(ExecHandle::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        handle.lock();

        let mut workers = Vec::new();
        for i in 0..3u64 {
            let worker_handle = Arc::clone(&handle);
            let order = Arc::clone(&order);
            workers.push(thread::spawn(move || {
                worker_handle.lock();
                order.lock().unwrap().push(i);
                worker_handle.unlock();
            }));
            // Let the waiter queue up before spawning the next one.
            while handle.state.lock().unwrap().tail != i + 2 {
                thread::yield_now();
            }
        }

        handle.unlock();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_yield_without_contention_is_a_noop() {
        let handle = ExecHandle::new();
        handle.lock();
        handle.yield_now();
        // Still held: a fresh unlock/lock cycle works.
        handle.unlock();
        handle.lock();
        handle.unlock();
    }

    #[test]
    fn test_yield_hands_off_to_a_waiter() {
        let handle = Arc::new(ExecHandle::new());
        let turns = Arc::new(AtomicUsize::new(0));
        handle.lock();

        let waiter = {
            let handle = Arc::clone(&handle);
            let turns = Arc::clone(&turns);
            thread::spawn(move || {
                handle.lock();
                turns.store(1, Ordering::SeqCst);
                handle.unlock();
            })
        };
        while !handle.contended() {
            thread::yield_now();
        }

        handle.yield_now();
        assert_eq!(turns.load(Ordering::SeqCst), 1);
        waiter.join().unwrap();
        handle.unlock();
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let handle = Arc::new(ExecHandle::new());
        {
            let _guard = handle.locked();
            assert!(!handle.contended());
        }
        let handle2 = Arc::clone(&handle);
        let worker = thread::spawn(move || {
            handle2.lock();
            handle2.unlock();
        });
        worker.join().unwrap();
    }

    #[test]
    fn test_handle_is_released_while_blocking_work_runs() {
        // Mirrors the async bridge: unlock, run blocking work, relock. A
        // concurrent actor must be able to take the handle before the
        // blocking work finishes.
        let handle = Arc::new(ExecHandle::new());
        let acquired = Arc::new(AtomicUsize::new(0));
        handle.lock();

        let observer = {
            let handle = Arc::clone(&handle);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                handle.lock();
                acquired.store(1, Ordering::SeqCst);
                handle.unlock();
            })
        };

        handle.unlock();
        let mut waited = Duration::ZERO;
        while acquired.load(Ordering::SeqCst) == 0 && waited < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
        handle.lock();

        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        observer.join().unwrap();
        handle.unlock();
    }
}
