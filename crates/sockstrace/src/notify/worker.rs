//! Per-notification dispatch.
//!
//! Each received notification gets its own worker thread, so a slow handler
//! only delays the call it is serving. The worker looks the syscall up in the
//! registry, runs the handler, and writes exactly one response.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{EngineError, ErrorSink};
use crate::notify::{Listener, Request};
use crate::registry::{Registry, Verdict};

/// Everything a worker needs; cheap to clone into each thread.
#[derive(Clone)]
pub(crate) struct Worker {
    listener: Arc<Listener>,
    registry: Arc<Registry>,
    errors: ErrorSink,
    unknown_errno: i32,
}

impl Worker {
    pub(crate) fn new(
        listener: Arc<Listener>,
        registry: Arc<Registry>,
        errors: ErrorSink,
        unknown_errno: i32,
    ) -> Self {
        Self {
            listener,
            registry,
            errors,
            unknown_errno,
        }
    }

    /// Decide and answer one request.
    pub(crate) fn serve(&self, req: &Request) {
        let verdict = self.decide(req);
        tracing::debug!(
            id = req.id,
            pid = req.pid,
            syscall = req.syscall_name(),
            val = verdict.val,
            error = verdict.error,
            cont = verdict.is_continue(),
            "verdict"
        );
        self.respond(req, verdict);
    }

    fn decide(&self, req: &Request) -> Verdict {
        let Some(handler) = self.registry.lookup(req.nr) else {
            tracing::warn!(
                pid = req.pid,
                nr = req.nr,
                syscall = req.syscall_name(),
                "no handler registered"
            );
            return Verdict::deny(self.unknown_errno);
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&self.listener, req))) {
            Ok(verdict) => verdict,
            Err(_) => {
                self.errors.report(EngineError::HandlerPanicked {
                    syscall: req.syscall_name(),
                });
                Verdict::deny(libc::EPERM)
            }
        }
    }

    /// Write the response for `req`. Failures are reported, not retried.
    pub(crate) fn respond(&self, req: &Request, verdict: Verdict) {
        if let Err(errno) = self.listener.respond(req.id, verdict) {
            self.errors.report(EngineError::Respond {
                id: req.id,
                syscall: req.syscall_name(),
                errno,
            });
        }
    }
}
