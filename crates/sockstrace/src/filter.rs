//! Filter installation.
//!
//! A [`Ruleset`] lists syscalls by name with an [`Action`]; anything unlisted
//! is allowed. Installing it loads a notify filter on the calling thread and
//! returns the [`Listener`] the notifications arrive on.
//!
//! ## Scope
//!
//! Seccomp filters attach to a thread. The filter covers the installing
//! thread plus every thread and process it creates afterwards; threads that
//! already exist are untouched. [`Engine`](crate::Engine) relies on this by
//! spawning its own threads before loading the filter, so handlers never
//! intercept themselves.
//!
//! ## Example
//!
//! ```ignore
//! use sockstrace::{Ruleset, install};
//!
//! let ruleset = Ruleset::new().notify("connect").notify("bind");
//! let listener = install(&ruleset)?;
//! ```

use sockstrace_sys::seccomp::{MAX_NOTIFY_SYSCALLS, SockFprog, build_notify_filter};
use sockstrace_sys::seccomp_notify::seccomp_set_mode_filter_listener;
use sockstrace_sys::syscalls;

use crate::error::EngineError;
use crate::notify::Listener;
use crate::registry::Registry;

/// What happens when a listed syscall is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run it untouched (same as not listing it).
    Allow,
    /// Suspend it and notify the supervisor.
    Notify,
}

/// Ordered `(syscall, action)` rules. Later rules for the same name win.
#[derive(Debug, Clone, Default)]
pub struct Ruleset {
    rules: Vec<(String, Action)>,
}

impl Ruleset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify on every syscall that has a handler in `registry`.
    pub fn from_registry(registry: &Registry) -> Self {
        registry
            .names()
            .fold(Self::new(), |rules, name| rules.notify(name))
    }

    pub fn rule(mut self, name: impl Into<String>, action: Action) -> Self {
        self.rules.push((name.into(), action));
        self
    }

    pub fn notify(self, name: impl Into<String>) -> Self {
        self.rule(name, Action::Notify)
    }

    pub fn allow(self, name: impl Into<String>) -> Self {
        self.rule(name, Action::Allow)
    }

    /// Rules in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Action)> {
        self.rules.iter().map(|(name, action)| (name.as_str(), *action))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve every rule and return the syscall numbers to notify on, in
    /// first-listed order.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownSyscall`] for a name that does not resolve,
    /// [`EngineError::TooManyRules`] past the BPF jump limit.
    pub fn compile(&self) -> Result<Vec<i64>, EngineError> {
        let mut notify: Vec<i64> = Vec::new();
        for (name, action) in self.iter() {
            let nr =
                syscalls::resolve(name).ok_or_else(|| EngineError::UnknownSyscall(name.into()))?;
            match action {
                Action::Notify if !notify.contains(&nr) => notify.push(nr),
                Action::Notify => {}
                Action::Allow => notify.retain(|&n| n != nr),
            }
        }

        if notify.len() > MAX_NOTIFY_SYSCALLS {
            return Err(EngineError::TooManyRules {
                count: notify.len(),
                max: MAX_NOTIFY_SYSCALLS,
            });
        }
        Ok(notify)
    }
}

/// Check the platform, build the filter for `ruleset`, and load it on the
/// calling thread.
///
/// # Errors
///
/// [`EngineError::UnsupportedPlatform`] if the kernel's notification API level
/// is too low (checked before anything is built), resolution errors from
/// [`Ruleset::compile`], and [`EngineError::Install`] if the kernel refuses
/// the filter.
pub fn install(ruleset: &Ruleset) -> Result<Listener, EngineError> {
    crate::check_platform()?;
    let syscalls = ruleset.compile()?;
    load(&syscalls)
}

/// Load a notify filter for already-resolved syscall numbers.
pub(crate) fn load(syscalls: &[i64]) -> Result<Listener, EngineError> {
    let filter = build_notify_filter(syscalls);
    let fprog = SockFprog::new(&filter);

    // SAFETY: the program comes from build_notify_filter and `filter`
    // outlives the call.
    let fd = unsafe { seccomp_set_mode_filter_listener(&fprog) }.map_err(EngineError::Install)?;

    tracing::info!(
        syscalls = syscalls.len(),
        fd = std::os::fd::AsRawFd::as_raw_fd(&fd),
        "seccomp notify filter loaded"
    );
    Ok(Listener::new(fd))
}
