//! Handler registry.
//!
//! Maps syscalls to the [`Handler`] that decides their outcome. Names are
//! resolved to syscall numbers when a handler is registered, so a typo fails
//! up front with [`EngineError::UnknownSyscall`] instead of silently never
//! matching. Incoming requests are looked up by number.
//!
//! The registry is moved into the engine at start and is immutable from then
//! on.
//!
//! ## Example
//!
//! ```ignore
//! use sockstrace::{Registry, Verdict};
//!
//! let mut registry = Registry::new();
//! registry.register("connect", |_: &_, _: &_| Verdict::deny(libc::EPERM))?;
//! registry.register("getppid", |_: &_, _: &_| Verdict::value(1))?;
//! ```

use std::collections::BTreeMap;
use std::fmt;

use sockstrace_sys::seccomp_notify::SECCOMP_USER_NOTIF_FLAG_CONTINUE;
use sockstrace_sys::syscalls;

use crate::error::EngineError;
use crate::notify::{Listener, Request};

/// Outcome of one intercepted syscall.
///
/// `error` is a positive errno (0 = success). With the CONTINUE flag set,
/// `val` and `error` must both be zero; the kernel rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    pub val: u64,
    pub error: i32,
    pub flags: u32,
}

impl Verdict {
    /// Run the syscall with its original arguments.
    pub const fn allow() -> Self {
        Self {
            val: 0,
            error: 0,
            flags: SECCOMP_USER_NOTIF_FLAG_CONTINUE,
        }
    }

    /// Fail the syscall with `errno`.
    pub const fn deny(errno: i32) -> Self {
        Self {
            val: 0,
            error: errno,
            flags: 0,
        }
    }

    /// Skip the syscall and return `val` as its result.
    pub const fn value(val: u64) -> Self {
        Self {
            val,
            error: 0,
            flags: 0,
        }
    }

    pub const fn is_continue(&self) -> bool {
        self.flags & SECCOMP_USER_NOTIF_FLAG_CONTINUE != 0
    }
}

impl From<(u64, i32, u32)> for Verdict {
    fn from((val, error, flags): (u64, i32, u32)) -> Self {
        Self { val, error, flags }
    }
}

/// Decides the outcome of an intercepted syscall.
///
/// Runs on a worker thread, one call at a time per request. A slow handler
/// only holds up the call it serves, but one that never returns leaves that
/// call suspended for good: handlers must return in bounded time.
pub trait Handler: Send + Sync {
    fn handle(&self, listener: &Listener, req: &Request) -> Verdict;
}

impl<F> Handler for F
where
    F: Fn(&Listener, &Request) -> Verdict + Send + Sync,
{
    fn handle(&self, listener: &Listener, req: &Request) -> Verdict {
        self(listener, req)
    }
}

struct Entry {
    name: &'static str,
    handler: Box<dyn Handler>,
}

/// Syscall number → handler table.
#[derive(Default)]
pub struct Registry {
    handlers: BTreeMap<i64, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for the syscall called `name`, replacing any
    /// previous handler for it.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownSyscall`] if `name` is not a syscall on this platform.
    pub fn register(
        &mut self,
        name: &str,
        handler: impl Handler + 'static,
    ) -> Result<(), EngineError> {
        let nr = syscalls::resolve(name).ok_or_else(|| EngineError::UnknownSyscall(name.into()))?;
        let name = syscalls::name_of(nr).unwrap_or("unknown");
        let previous = self.handlers.insert(
            nr,
            Entry {
                name,
                handler: Box::new(handler),
            },
        );
        if previous.is_some() {
            tracing::debug!(syscall = name, "replaced handler");
        }
        Ok(())
    }

    /// Handler for syscall number `nr`.
    pub fn lookup(&self, nr: i64) -> Option<&dyn Handler> {
        self.handlers.get(&nr).map(|e| e.handler.as_ref())
    }

    /// Handler for the syscall called `name`.
    pub fn lookup_name(&self, name: &str) -> Option<&dyn Handler> {
        syscalls::resolve(name).and_then(|nr| self.lookup(nr))
    }

    /// Names of all registered syscalls, ordered by syscall number.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.values().map(|e| e.name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    fn request(nr: i64) -> Request {
        Request {
            id: 1,
            pid: 100,
            nr,
            name: syscalls::name_of(nr),
            arch: 0,
            instruction_pointer: 0,
            args: [0; 6],
        }
    }

    #[test]
    fn verdict_helpers() {
        assert!(Verdict::allow().is_continue());
        assert_eq!(Verdict::allow().error, 0);
        assert_eq!(Verdict::deny(libc::EPERM).error, libc::EPERM);
        assert!(!Verdict::deny(libc::EPERM).is_continue());
        assert_eq!(Verdict::value(42).val, 42);
        assert_eq!(
            Verdict::from((0, 0, SECCOMP_USER_NOTIF_FLAG_CONTINUE)),
            Verdict::allow()
        );
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = Registry::new();
        registry
            .register("connect", |_: &Listener, _: &Request| Verdict::deny(libc::EPERM))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(libc::SYS_connect).is_some());
        assert!(registry.lookup_name("connect").is_some());
        assert!(registry.lookup(libc::SYS_bind).is_none());
        assert!(registry.lookup_name("bind").is_none());
    }

    #[test]
    fn typo_is_rejected_at_registration() {
        let mut registry = Registry::new();
        let err = registry
            .register("conect", |_: &Listener, _: &Request| Verdict::allow())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownSyscall(ref n) if n == "conect"));
        assert!(registry.is_empty());
    }

    #[test]
    fn reregistering_replaces() {
        let listener = Listener::new(File::open("/dev/null").unwrap().into());
        let mut registry = Registry::new();
        registry
            .register("getppid", |_: &Listener, _: &Request| Verdict::value(1))
            .unwrap();
        registry
            .register("getppid", |_: &Listener, _: &Request| Verdict::value(2))
            .unwrap();

        assert_eq!(registry.len(), 1);
        let handler = registry.lookup(libc::SYS_getppid).unwrap();
        assert_eq!(
            handler.handle(&listener, &request(libc::SYS_getppid)),
            Verdict::value(2)
        );
    }

    #[test]
    fn handler_sees_request() {
        let listener = Listener::new(File::open("/dev/null").unwrap().into());
        let mut registry = Registry::new();
        registry
            .register("getppid", |_: &Listener, req: &Request| {
                Verdict::value(u64::from(req.pid))
            })
            .unwrap();
        let handler = registry.lookup_name("getppid").unwrap();
        assert_eq!(
            handler.handle(&listener, &request(libc::SYS_getppid)),
            Verdict::value(100)
        );
    }

    #[test]
    fn names_are_canonical() {
        let mut registry = Registry::new();
        registry
            .register("socket", |_: &Listener, _: &Request| Verdict::allow())
            .unwrap();
        registry
            .register("connect", |_: &Listener, _: &Request| Verdict::allow())
            .unwrap();
        let mut names: Vec<_> = registry.names().collect();
        names.sort_unstable();
        assert_eq!(names, ["connect", "socket"]);
        assert!(format!("{registry:?}").contains("connect"));
    }
}
