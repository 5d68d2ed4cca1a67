//! sockstrace: seccomp user-notification engine
//!
//! Installs a seccomp filter that suspends the calling thread (and everything
//! it spawns afterwards) whenever it issues one of a chosen set of syscalls,
//! hands each suspended call to a registered [`Handler`], and resumes the call
//! with whatever the handler decided.
//!
//! ## Components
//!
//! - **filter** - Builds and loads the notify filter, yields the [`Listener`]
//! - **registry** - Syscall name → [`Handler`] table, resolved at registration
//! - **notify** - Receive loop, race validation, and per-call dispatch workers
//! - **shutdown** - Stop signal and worker tracking
//! - **engine** - Lifecycle glue tying the above together
//!
//! ## Quick Start
//!
//! ```ignore
//! use sockstrace::{Engine, Registry, Ruleset, ShutdownMode, Verdict};
//!
//! let mut registry = Registry::new();
//! registry.register("connect", |_: &_, req: &sockstrace::Request| {
//!     tracing::info!(pid = req.pid, "connect");
//!     Verdict::allow()
//! })?;
//!
//! let ruleset = Ruleset::from_registry(&registry);
//! let mut engine = Engine::start(ruleset, registry)?;
//! // ... spawn the monitored program from this thread ...
//! engine.shutdown(ShutdownMode::Immediate)?;
//! ```
//!
//! ## Requirements
//!
//! - Linux 5.5+ (seccomp notification API level 5)

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod notify;
pub mod registry;
pub mod shutdown;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, ErrorStream};
pub use filter::{Action, Ruleset, install};
pub use notify::{Listener, Request};
pub use registry::{Handler, Registry, Verdict};
pub use shutdown::{ShutdownMode, StopHandle};

pub use sockstrace_sys::seccomp_notify::SECCOMP_USER_NOTIF_FLAG_CONTINUE;

/// Check that the running kernel supports the notification API level the
/// engine needs.
pub fn check_platform() -> Result<(), EngineError> {
    sockstrace_sys::check()
        .map(|_| ())
        .map_err(|e| EngineError::UnsupportedPlatform(e.clone()))
}
