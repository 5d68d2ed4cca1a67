//! Low-level Linux seccomp wrappers for syscall interception.
//!
//! This crate provides thin wrappers around the seccomp user notification
//! interface, which is not covered by rustix or libc. For standard syscalls,
//! use rustix.
//!
//! ## Modules
//!
//! - **seccomp** - BPF program builder for notify-on-invocation filters
//! - **`seccomp_notify`** - Listener installation and notification ioctls
//! - **syscalls** - Syscall name table for the build target
//! - **check** - Runtime notification API level detection
//!
//! # Safety
//!
//! This crate contains raw syscall wrappers. Casts between integer types
//! are unavoidable when interfacing with the kernel ABI.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod check;
pub mod seccomp;
pub mod seccomp_notify;
pub mod syscalls;

pub use check::{CheckError, MIN_API_LEVEL, NotifyInfo, check};

#[inline]
pub fn last_errno() -> rustix::io::Errno {
    // SAFETY: __errno_location always returns valid thread-local pointer.
    rustix::io::Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}
