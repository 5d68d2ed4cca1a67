//! Shutdown coordination.
//!
//! [`StopHandle`] is the single-fire stop signal: the first `signal()` flips an
//! atomic flag and wakes the receive loop out of its poll; later calls do
//! nothing. The loop observes the flag at its next iteration boundary, refuses
//! whatever is still pending, and exits.
//!
//! Stopping does not wait for workers already dispatched. [`WorkerSet`] counts
//! them so a caller who needs full quiescence can wait for the count to reach
//! zero.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use mio::Waker;

/// How [`Engine::shutdown`](crate::Engine::shutdown) finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Stop the loop; in-flight workers finish on their own.
    #[default]
    Immediate,
    /// Stop the loop, then wait up to the given time for in-flight workers.
    Drain(Duration),
}

#[derive(Debug)]
struct StopInner {
    signaled: AtomicBool,
    waker: Option<Waker>,
}

/// Cloneable handle that stops the engine.
#[derive(Debug, Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

impl StopHandle {
    pub(crate) fn new(waker: Option<Waker>) -> Self {
        Self {
            inner: Arc::new(StopInner {
                signaled: AtomicBool::new(false),
                waker,
            }),
        }
    }

    /// Ask the engine to stop. Idempotent.
    pub fn signal(&self) {
        if self.inner.signaled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("stop signaled");
        if let Some(waker) = &self.inner.waker {
            if let Err(e) = waker.wake() {
                tracing::warn!(error = %e, "failed to wake notification loop");
            }
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.inner.signaled.load(Ordering::Acquire)
    }
}

/// Count of outstanding dispatch workers.
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkerSet {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

/// Held by one worker for its lifetime; releases its slot on drop, including
/// when the worker unwinds.
#[derive(Debug)]
pub(crate) struct Ticket {
    set: WorkerSet,
}

impl WorkerSet {
    pub(crate) fn enter(&self) -> Ticket {
        let (count, _) = &*self.inner;
        *count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ticket { set: self.clone() }
    }

    pub(crate) fn outstanding(&self) -> usize {
        let (count, _) = &*self.inner;
        *count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until no workers are outstanding. Returns false on timeout.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let (count, idle) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut guard = count.lock().unwrap_or_else(PoisonError::into_inner);
        while *guard > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            guard = idle
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let (count, idle) = &*self.set.inner;
        let mut guard = count.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = guard.saturating_sub(1);
        if *guard == 0 {
            idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn signal_is_idempotent() {
        let stop = StopHandle::new(None);
        assert!(!stop.is_signaled());
        stop.signal();
        stop.signal();
        assert!(stop.is_signaled());
    }

    #[test]
    fn clones_share_state() {
        let stop = StopHandle::new(None);
        let other = stop.clone();
        other.signal();
        assert!(stop.is_signaled());
    }

    #[test]
    fn signal_wakes_poll() {
        let mut poll = mio::Poll::new().unwrap();
        let waker = Waker::new(poll.registry(), mio::Token(7)).unwrap();
        let stop = StopHandle::new(Some(waker));

        let remote = stop.clone();
        let t = thread::spawn(move || remote.signal());

        let mut events = mio::Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|e| e.token() == mio::Token(7)));
        t.join().unwrap();
    }

    #[test]
    fn tickets_track_outstanding() {
        let set = WorkerSet::default();
        let a = set.enter();
        let b = set.enter();
        assert_eq!(set.outstanding(), 2);
        drop(a);
        assert_eq!(set.outstanding(), 1);
        assert!(!set.wait_idle(Duration::from_millis(10)));
        drop(b);
        assert!(set.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn wait_idle_wakes_on_last_ticket() {
        let set = WorkerSet::default();
        let ticket = set.enter();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(ticket);
        });
        assert!(set.wait_idle(Duration::from_secs(5)));
        t.join().unwrap();
    }

    #[test]
    fn ticket_released_on_panic() {
        let set = WorkerSet::default();
        let worker_set = set.clone();
        let result = thread::spawn(move || {
            let _ticket = worker_set.enter();
            panic!("worker died");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(set.outstanding(), 0);
    }
}
