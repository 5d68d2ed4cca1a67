//! The notification receive loop.
//!
//! Runs on its own thread, created before the filter is loaded so it is never
//! subject to the filter itself. Waits on the listener fd and the stop waker
//! with `mio`, receives every pending notification, and hands each one to a
//! fresh worker thread.
//!
//! ## Receive errors
//!
//! | errno | Meaning | Action |
//! |-------|---------|--------|
//! | `ENOENT` | caller went away before receive | skip |
//! | `EINTR`, `EAGAIN` | transient | retry |
//! | `ECANCELED`, `EBADF`, `EINVAL`, `EFAULT`, `ENOTTY` | channel unusable | stop, fatal |
//! | anything else | | report, keep going |

use std::io;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use rustix::io::Errno;

use super::worker::Worker;
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorSink};
use crate::notify::{Listener, Request};
use crate::registry::{Registry, Verdict};
use crate::shutdown::{StopHandle, WorkerSet};

const LISTENER: Token = Token(0);
pub(crate) const WAKER: Token = Token(1);

pub(crate) struct Supervisor {
    poll: Poll,
    listener: Arc<Listener>,
    worker: Worker,
    workers: WorkerSet,
    stop: StopHandle,
    errors: ErrorSink,
    config: Arc<EngineConfig>,
}

impl Supervisor {
    pub(crate) fn new(
        poll: Poll,
        listener: Arc<Listener>,
        registry: Arc<Registry>,
        errors: ErrorSink,
        config: Arc<EngineConfig>,
        workers: WorkerSet,
        stop: StopHandle,
    ) -> Self {
        let worker = Worker::new(
            Arc::clone(&listener),
            registry,
            errors.clone(),
            config.unknown_errno,
        );
        Self {
            poll,
            listener,
            worker,
            workers,
            stop,
            errors,
            config,
        }
    }

    /// Run until stopped, the channel hangs up, or a fatal error.
    ///
    /// A fatal error is also pushed onto the error stream before returning.
    pub(crate) fn run(mut self) -> Result<(), EngineError> {
        let fd = self.listener.as_raw_fd();
        tracing::debug!(fd, "notification loop started");

        let result = self.serve(fd);
        if let Err(error) = &result {
            self.errors.report(error.clone());
        }
        self.refuse_pending();

        tracing::debug!(ok = result.is_ok(), "notification loop stopped");
        result
    }

    fn serve(&mut self, fd: i32) -> Result<(), EngineError> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), LISTENER, Interest::READABLE)
            .map_err(EngineError::poll)?;

        let mut events = Events::with_capacity(8);
        loop {
            if self.stop.is_signaled() {
                return Ok(());
            }

            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EngineError::poll(e)),
            }

            let mut hangup = false;
            for event in events.iter().filter(|e| e.token() == LISTENER) {
                hangup |= event.is_read_closed() || event.is_error();
            }

            // Edge-triggered: take everything that is pending now.
            self.receive_pending()?;

            if hangup {
                tracing::debug!("notification channel hung up");
                return Ok(());
            }
        }
    }

    fn receive_pending(&self) -> Result<(), EngineError> {
        while !self.stop.is_signaled() && self.pending()? {
            self.receive()?;
        }
        Ok(())
    }

    fn pending(&self) -> Result<bool, EngineError> {
        self.listener
            .pending()
            .map_err(|errno| EngineError::poll(io::Error::from_raw_os_error(errno.raw_os_error())))
    }

    fn receive(&self) -> Result<(), EngineError> {
        let req = match self.listener.recv() {
            Ok(req) => req,
            Err(Errno::NOENT) => {
                tracing::debug!("notification gone before receive");
                return Ok(());
            }
            Err(Errno::INTR | Errno::AGAIN) => return Ok(()),
            Err(
                errno @ (Errno::CANCELED | Errno::BADF | Errno::INVAL | Errno::FAULT | Errno::NOTTY),
            ) => return Err(EngineError::ChannelClosed(errno)),
            Err(errno) => {
                self.errors.report(EngineError::Receive(errno));
                return Ok(());
            }
        };

        tracing::trace!(
            id = req.id,
            pid = req.pid,
            syscall = req.syscall_name(),
            "notification received"
        );

        if self.stop.is_signaled() {
            self.worker.respond(&req, Verdict::deny(self.config.stop_errno));
            return Ok(());
        }

        if self.config.validate_ids {
            if let Err(errno) = self.listener.id_valid(req.id) {
                tracing::debug!(id = req.id, pid = req.pid, %errno, "notification no longer valid");
            }
        }

        self.dispatch(req);
        Ok(())
    }

    fn dispatch(&self, req: Request) {
        let ticket = self.workers.enter();
        let worker = self.worker.clone();
        let spawned = thread::Builder::new()
            .name(self.config.worker_thread_name())
            .spawn(move || {
                let _ticket = ticket;
                worker.serve(&req);
            });

        if let Err(e) = spawned {
            self.worker.respond(&req, Verdict::deny(libc::EAGAIN));
            self.errors.report(EngineError::spawn("worker", e));
        }
    }

    /// Answer everything still queued with the stop errno. Returns how many
    /// calls were refused.
    fn refuse_pending(&self) -> usize {
        let mut refused = 0usize;
        while let Ok(true) = self.listener.pending() {
            match self.listener.recv() {
                Ok(req) => {
                    self.worker.respond(&req, Verdict::deny(self.config.stop_errno));
                    refused += 1;
                }
                Err(Errno::NOENT | Errno::INTR | Errno::AGAIN) => {}
                Err(_) => break,
            }
        }
        if refused > 0 {
            tracing::info!(refused, "refused pending notifications on stop");
        }
        refused
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::error::error_channel;
    use crate::filter;

    fn isolated<F: FnOnce() + Send + 'static>(f: F) {
        if let Err(panic) = thread::spawn(f).join() {
            std::panic::resume_unwind(panic);
        }
    }

    fn raw_getppid() -> (i64, Option<i32>) {
        let ret = unsafe { libc::syscall(libc::SYS_getppid) };
        let errno = (ret < 0).then(|| io::Error::last_os_error().raw_os_error().unwrap_or(0));
        (ret, errno)
    }

    fn wait_until(mut ready: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ready() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Load a getppid filter on the current thread and build a supervisor for
    /// it with stop already signaled. The handler counts its calls.
    fn stopped_supervisor(calls: Arc<AtomicUsize>) -> Supervisor {
        let listener = Arc::new(filter::load(&[libc::SYS_getppid]).unwrap());
        let mut registry = Registry::new();
        registry
            .register("getppid", move |_: &Listener, _: &Request| {
                calls.fetch_add(1, Ordering::SeqCst);
                Verdict::value(7)
            })
            .unwrap();
        let (sink, _stream) = error_channel(8);
        let stop = StopHandle::new(None);
        stop.signal();
        Supervisor::new(
            Poll::new().unwrap(),
            listener,
            Arc::new(registry),
            sink,
            Arc::new(EngineConfig::default()),
            WorkerSet::default(),
            stop,
        )
    }

    #[test]
    fn request_received_after_stop_is_denied() {
        if crate::check_platform().is_err() {
            return;
        }
        isolated(|| {
            let calls = Arc::new(AtomicUsize::new(0));
            let supervisor = stopped_supervisor(Arc::clone(&calls));

            let caller = thread::spawn(raw_getppid);
            wait_until(|| supervisor.listener.pending().unwrap());
            supervisor.receive().unwrap();

            assert_eq!(caller.join().unwrap(), (-1, Some(libc::EPERM)));
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            assert_eq!(supervisor.workers.outstanding(), 0);
        });
    }

    #[test]
    fn queued_calls_are_refused_on_stop() {
        if crate::check_platform().is_err() {
            return;
        }
        isolated(|| {
            const CALLERS: usize = 4;

            let calls = Arc::new(AtomicUsize::new(0));
            let supervisor = stopped_supervisor(Arc::clone(&calls));

            let callers: Vec<_> = (0..CALLERS).map(|_| thread::spawn(raw_getppid)).collect();
            let mut refused = 0;
            let deadline = Instant::now() + Duration::from_secs(5);
            while callers.iter().any(|c| !c.is_finished()) {
                assert!(Instant::now() < deadline, "callers still suspended");
                refused += supervisor.refuse_pending();
                thread::sleep(Duration::from_millis(5));
            }

            assert_eq!(refused, CALLERS);
            for caller in callers {
                assert_eq!(caller.join().unwrap(), (-1, Some(libc::EPERM)));
            }
            assert_eq!(calls.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn run_after_stop_refuses_what_is_queued() {
        if crate::check_platform().is_err() {
            return;
        }
        isolated(|| {
            let calls = Arc::new(AtomicUsize::new(0));
            let supervisor = stopped_supervisor(Arc::clone(&calls));

            let caller = thread::spawn(raw_getppid);
            wait_until(|| supervisor.listener.pending().unwrap());
            supervisor.run().unwrap();

            assert_eq!(caller.join().unwrap(), (-1, Some(libc::EPERM)));
            assert_eq!(calls.load(Ordering::SeqCst), 0);
        });
    }
}
