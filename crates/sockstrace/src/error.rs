//! Engine errors and the error stream.
//!
//! Per-request outcomes (unknown syscall, handler verdicts) are never errors;
//! only engine-level failures end up here. Workers and the receive loop share
//! one bounded queue: overflowing it drops the error and bumps a counter
//! rather than blocking a worker or growing without bound.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

use rustix::io::Errno;
use sockstrace_sys::CheckError;
use thiserror::Error;

/// Engine-level failure.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(#[from] CheckError),

    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),

    #[error("too many notify rules: {count} > {max}")]
    TooManyRules { count: usize, max: usize },

    #[error("filter install: {0}")]
    Install(Errno),

    #[error("receive notification: {0}")]
    Receive(Errno),

    #[error("notification channel closed: {0}")]
    ChannelClosed(Errno),

    #[error("respond to {syscall} (id {id:#x}): {errno}")]
    Respond {
        id: u64,
        syscall: &'static str,
        errno: Errno,
    },

    #[error("handler for {syscall} panicked")]
    HandlerPanicked { syscall: &'static str },

    #[error("spawn {what}: {source}")]
    Spawn {
        what: &'static str,
        source: Arc<io::Error>,
    },

    #[error("poll: {0}")]
    Poll(Arc<io::Error>),

    #[error("notification loop panicked")]
    LoopPanicked,
}

impl EngineError {
    /// True if the engine cannot continue after this error.
    ///
    /// Setup failures and a dead channel are fatal; per-request failures
    /// (responses, handler panics, worker spawns) are not.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Receive(_)
                | Self::Respond { .. }
                | Self::HandlerPanicked { .. }
                | Self::Spawn { .. }
        )
    }

    pub(crate) fn spawn(what: &'static str, source: io::Error) -> Self {
        Self::Spawn {
            what,
            source: Arc::new(source),
        }
    }

    pub(crate) fn poll(source: io::Error) -> Self {
        Self::Poll(Arc::new(source))
    }
}

/// Producer side of the error stream, cloned into every worker.
#[derive(Debug, Clone)]
pub(crate) struct ErrorSink {
    tx: SyncSender<EngineError>,
    dropped: Arc<AtomicU64>,
}

impl ErrorSink {
    /// Queue an error without blocking.
    pub(crate) fn report(&self, error: EngineError) {
        tracing::warn!(%error, "engine error");
        match self.tx.try_send(error) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(error)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(%error, dropped, "error stream full, dropping error");
            }
        }
    }
}

/// Consumer side of the error stream.
///
/// Iterating blocks until the next error arrives and ends once the engine and
/// all of its workers are gone.
#[derive(Debug)]
pub struct ErrorStream {
    rx: Receiver<EngineError>,
    dropped: Arc<AtomicU64>,
}

impl ErrorStream {
    /// Block until the next error, or `None` once every producer is gone.
    pub fn recv(&self) -> Option<EngineError> {
        self.rx.recv().ok()
    }

    /// Return a queued error without blocking.
    pub fn try_recv(&self) -> Option<EngineError> {
        match self.rx.try_recv() {
            Ok(error) => Some(error),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next error.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineError> {
        match self.rx.recv_timeout(timeout) {
            Ok(error) => Some(error),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of errors discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Iterator for ErrorStream {
    type Item = EngineError;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

/// Create a bounded error channel.
pub(crate) fn error_channel(capacity: usize) -> (ErrorSink, ErrorStream) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ErrorSink {
            tx,
            dropped: Arc::clone(&dropped),
        },
        ErrorStream { rx, dropped },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_counted_not_blocking() {
        let (sink, stream) = error_channel(2);
        for _ in 0..5 {
            sink.report(EngineError::Receive(Errno::INTR));
        }
        assert_eq!(stream.dropped(), 3);
        assert!(stream.try_recv().is_some());
        assert!(stream.try_recv().is_some());
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn stream_ends_when_producers_drop() {
        let (sink, stream) = error_channel(4);
        sink.report(EngineError::LoopPanicked);
        drop(sink);
        let collected: Vec<_> = stream.collect();
        assert_eq!(collected.len(), 1);
    }

    #[test]
    fn report_after_consumer_drop_is_silent() {
        let (sink, stream) = error_channel(1);
        drop(stream);
        sink.report(EngineError::LoopPanicked);
    }

    #[test]
    fn fatality() {
        assert!(EngineError::ChannelClosed(Errno::CANCELED).is_fatal());
        assert!(EngineError::UnknownSyscall("conect".into()).is_fatal());
        assert!(!EngineError::Receive(Errno::INTR).is_fatal());
        assert!(
            !EngineError::Respond {
                id: 1,
                syscall: "connect",
                errno: Errno::NOENT,
            }
            .is_fatal()
        );
        assert!(!EngineError::HandlerPanicked { syscall: "connect" }.is_fatal());
    }

    #[test]
    fn display() {
        let err = EngineError::Respond {
            id: 0x10,
            syscall: "connect",
            errno: Errno::NOENT,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("respond to connect (id 0x10): "), "{msg}");
    }
}
