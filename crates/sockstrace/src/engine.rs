//! Engine lifecycle.
//!
//! [`Engine::start`] wires the pieces together in an order that keeps the
//! engine's own threads outside the filter:
//!
//! 1. Resolve the ruleset and check the platform
//! 2. Spawn the receive loop (it waits for the listener)
//! 3. Load the filter on the calling thread
//! 4. Hand the listener to the loop
//!
//! From step 3 on, the calling thread and anything it spawns are filtered;
//! the loop and its workers were created earlier and are not.
//!
//! ## Example
//!
//! ```ignore
//! use sockstrace::{Engine, ShutdownMode};
//!
//! let mut engine = Engine::start(ruleset, registry)?;
//! let status = std::process::Command::new("curl").arg("example.com").status()?;
//! engine.shutdown(ShutdownMode::Drain(Duration::from_secs(1)))?;
//! ```

use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::{Poll, Waker};

use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorStream, error_channel};
use crate::filter::{self, Ruleset};
use crate::notify::Listener;
use crate::notify::supervisor::{Supervisor, WAKER};
use crate::registry::Registry;
use crate::shutdown::{ShutdownMode, StopHandle, WorkerSet};

/// A running interception engine.
///
/// Dropping it signals stop without waiting; use [`Engine::shutdown`] to wait.
#[derive(Debug)]
pub struct Engine {
    stop: StopHandle,
    errors: Option<ErrorStream>,
    workers: WorkerSet,
    thread: Option<JoinHandle<Result<(), EngineError>>>,
    outcome: Option<Result<(), EngineError>>,
}

impl Engine {
    /// Start with the default [`EngineConfig`].
    pub fn start(ruleset: Ruleset, registry: Registry) -> Result<Self, EngineError> {
        Self::start_with(EngineConfig::default(), ruleset, registry)
    }

    /// Install the filter on the calling thread and start serving it.
    ///
    /// # Errors
    ///
    /// Platform, resolution and install errors. On error nothing is installed
    /// and no thread is left running.
    pub fn start_with(
        config: EngineConfig,
        ruleset: Ruleset,
        registry: Registry,
    ) -> Result<Self, EngineError> {
        crate::check_platform()?;
        let syscalls = ruleset.compile()?;

        let config = Arc::new(config);
        let poll = Poll::new().map_err(EngineError::poll)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(EngineError::poll)?;
        let stop = StopHandle::new(Some(waker));
        let (sink, stream) = error_channel(config.error_capacity);
        let workers = WorkerSet::default();
        let registry = Arc::new(registry);

        let (tx, rx) = mpsc::channel::<Arc<Listener>>();
        let thread = thread::Builder::new()
            .name(config.loop_thread_name())
            .spawn({
                let config = Arc::clone(&config);
                let workers = workers.clone();
                let stop = stop.clone();
                move || {
                    // Sender dropped: the filter never loaded.
                    let Ok(listener) = rx.recv() else {
                        return Ok(());
                    };
                    Supervisor::new(poll, listener, registry, sink, config, workers, stop).run()
                }
            })
            .map_err(|e| EngineError::spawn("notification loop", e))?;

        let listener = match filter::load(&syscalls) {
            Ok(listener) => Arc::new(listener),
            Err(e) => {
                drop(tx);
                let _ = thread.join();
                return Err(e);
            }
        };
        if tx.send(listener).is_err() {
            // The loop died before it got the listener.
            let _ = thread.join();
            return Err(EngineError::LoopPanicked);
        }

        tracing::info!(
            syscalls = syscalls.len(),
            thread = config.thread_name.as_str(),
            "engine started"
        );
        Ok(Self {
            stop,
            errors: Some(stream),
            workers,
            thread: Some(thread),
            outcome: None,
        })
    }

    /// Handle for stopping the engine from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The error stream. Only the first call returns it.
    pub fn errors(&mut self) -> Option<ErrorStream> {
        self.errors.take()
    }

    /// Dispatch workers still running.
    pub fn outstanding(&self) -> usize {
        self.workers.outstanding()
    }

    /// Block until the receive loop exits; returns its fatal error, if any.
    ///
    /// Does not signal stop by itself. Repeated calls return the same outcome.
    pub fn wait(&mut self) -> Result<(), EngineError> {
        if let Some(thread) = self.thread.take() {
            let outcome = thread.join().unwrap_or(Err(EngineError::LoopPanicked));
            self.outcome = Some(outcome);
        }
        self.outcome.clone().unwrap_or(Ok(()))
    }

    /// Wait up to `timeout` for in-flight workers. Returns false on timeout.
    pub fn drain(&self, timeout: Duration) -> bool {
        self.workers.wait_idle(timeout)
    }

    /// Stop the loop, wait for it, and optionally drain workers.
    pub fn shutdown(&mut self, mode: ShutdownMode) -> Result<(), EngineError> {
        self.stop.signal();
        let result = self.wait();
        if let ShutdownMode::Drain(timeout) = mode {
            if !self.drain(timeout) {
                tracing::warn!(
                    outstanding = self.outstanding(),
                    ?timeout,
                    "workers still running after drain timeout"
                );
            }
        }
        result
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop.signal();
    }
}
