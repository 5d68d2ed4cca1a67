//! Seccomp user notification (`SECCOMP_RET_USER_NOTIF`) support.
//!
//! A filter returning `SECCOMP_RET_USER_NOTIF` suspends the calling task and
//! queues a notification on a listener fd. A supervisor reads it, decides, and
//! writes a response that resumes the task.
//!
//! ## Flow
//!
//! 1. Install a filter with `SECCOMP_FILTER_FLAG_NEW_LISTENER`, keep the returned fd
//! 2. Poll the listener fd; when readable, call `SECCOMP_IOCTL_NOTIF_RECV`
//! 3. Decide, then `SECCOMP_IOCTL_NOTIF_SEND` with either:
//!    - `SECCOMP_USER_NOTIF_FLAG_CONTINUE` to run the syscall as issued
//!    - a negative errno or a return value to fake the result
//!
//! ## TOCTOU
//!
//! The suspended call can be interrupted (signal, task exit) at any moment,
//! which invalidates its id. `SECCOMP_IOCTL_NOTIF_ID_VALID` tells whether an id
//! is still live; a response to a dead id fails with `ENOENT` and is discarded.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use rustix::io::Errno;

use crate::last_errno;
use crate::seccomp::{SECCOMP_GET_NOTIF_SIZES, SECCOMP_SET_MODE_FILTER, SockFprog};

pub const SECCOMP_FILTER_FLAG_NEW_LISTENER: u32 = 1 << 3;

/// Let the syscall proceed as-is (supervisor approves).
pub const SECCOMP_USER_NOTIF_FLAG_CONTINUE: u32 = 1;

// ioctl numbers for seccomp notify (from kernel headers, generic _IOC layout)
// SECCOMP_IOCTL_NOTIF_RECV = SECCOMP_IOWR(0, struct seccomp_notif)
// SECCOMP_IOCTL_NOTIF_SEND = SECCOMP_IOWR(1, struct seccomp_notif_resp)
// SECCOMP_IOCTL_NOTIF_ID_VALID = SECCOMP_IOW(2, __u64)

/// ioctl to receive a notification from the seccomp listener fd.
pub const SECCOMP_IOCTL_NOTIF_RECV: u64 = 0xc0502100;
/// ioctl to send a response to a seccomp notification.
pub const SECCOMP_IOCTL_NOTIF_SEND: u64 = 0xc0182101;
/// ioctl to check if a notification ID is still valid.
pub const SECCOMP_IOCTL_NOTIF_ID_VALID: u64 = 0x40082102;

/// Seccomp notification data (mirrors kernel `struct seccomp_data`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompData {
    /// Syscall number.
    pub nr: i32,
    /// Architecture (`AUDIT_ARCH_*`).
    pub arch: u32,
    /// Instruction pointer at time of syscall.
    pub instruction_pointer: u64,
    /// Syscall arguments.
    pub args: [u64; 6],
}

/// Notification received from the listener (mirrors kernel `struct seccomp_notif`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SeccompNotif {
    /// Unique notification ID.
    pub id: u64,
    /// TID of the notifying task (in supervisor's PID namespace).
    pub pid: u32,
    /// Flags (currently unused, must be 0).
    pub flags: u32,
    /// The syscall data.
    pub data: SeccompData,
}

impl Default for SeccompNotif {
    fn default() -> Self {
        // SAFETY: SeccompNotif is a plain C struct with no invariants.
        unsafe { std::mem::zeroed() }
    }
}

/// Response to a notification (mirrors kernel `struct seccomp_notif_resp`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompNotifResp {
    /// Must match the notification ID.
    pub id: u64,
    /// Return value for the syscall.
    pub val: i64,
    /// Negative errno, or 0.
    pub error: i32,
    /// Flags (e.g., `SECCOMP_USER_NOTIF_FLAG_CONTINUE`).
    pub flags: u32,
}

impl SeccompNotifResp {
    /// Build a response from a positive errno (0 = success).
    ///
    /// The kernel expects the error negated; callers deal in the usual
    /// positive errno space. An errno with no magnitude (`i32::MIN`) becomes
    /// `EINVAL`.
    pub fn new(id: u64, val: u64, errno: i32, flags: u32) -> Self {
        Self {
            id,
            val: val as i64,
            error: errno.checked_abs().map_or(-libc::EINVAL, |e| -e),
            flags,
        }
    }
}

/// Kernel-reported struct sizes (mirrors `struct seccomp_notif_sizes`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeccompNotifSizes {
    pub seccomp_notif: u16,
    pub seccomp_notif_resp: u16,
    pub seccomp_data: u16,
}

impl SeccompNotifSizes {
    /// Sizes of the structs this crate passes to the kernel.
    pub const fn expected() -> Self {
        Self {
            seccomp_notif: size_of::<SeccompNotif>() as u16,
            seccomp_notif_resp: size_of::<SeccompNotifResp>() as u16,
            seccomp_data: size_of::<SeccompData>() as u16,
        }
    }

    /// True if the kernel structs are no larger than ours.
    ///
    /// Newer kernels may grow these structs; receiving into a smaller buffer
    /// would be unsound, so a larger kernel size is treated as unsupported.
    pub fn compatible(&self) -> bool {
        let ours = Self::expected();
        self.seccomp_notif <= ours.seccomp_notif
            && self.seccomp_notif_resp <= ours.seccomp_notif_resp
            && self.seccomp_data <= ours.seccomp_data
    }
}

/// Query the kernel's notify struct sizes (`SECCOMP_GET_NOTIF_SIZES`).
///
/// # Errors
///
/// Returns `Errno` if the kernel predates user notification.
pub fn notif_sizes() -> Result<SeccompNotifSizes, Errno> {
    let mut sizes = SeccompNotifSizes::default();
    let ret = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_GET_NOTIF_SIZES,
            0u32,
            &mut sizes as *mut SeccompNotifSizes,
        )
    };
    if ret != 0 { Err(last_errno()) } else { Ok(sizes) }
}

/// Install a seccomp filter with `SECCOMP_FILTER_FLAG_NEW_LISTENER`.
///
/// Returns the listener fd which can be used to receive notifications.
/// Sets `PR_SET_NO_NEW_PRIVS` first, so unprivileged callers can install.
///
/// # Safety
///
/// The filter must be a valid BPF program. This permanently restricts
/// syscalls for this thread and everything it creates afterwards.
///
/// # Errors
///
/// Returns `Errno` if the filter cannot be installed.
pub unsafe fn seccomp_set_mode_filter_listener(fprog: &SockFprog) -> Result<OwnedFd, Errno> {
    unsafe {
        let ret = libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0);
        if ret != 0 {
            return Err(last_errno());
        }

        let ret = libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_SET_MODE_FILTER,
            SECCOMP_FILTER_FLAG_NEW_LISTENER,
            fprog as *const _,
        );
        if ret < 0 {
            Err(last_errno())
        } else {
            // SAFETY: On success, ret is a valid listener file descriptor.
            Ok(OwnedFd::from_raw_fd(ret as i32))
        }
    }
}

/// Receive a notification from the seccomp listener fd.
///
/// Blocks until a notification is available (poll first to avoid that).
///
/// # Errors
///
/// Returns `Errno` on failure (`ENOENT` if the notifying call was
/// interrupted before it could be received).
pub fn notif_recv(listener_fd: RawFd, notif: &mut SeccompNotif) -> Result<(), Errno> {
    // The kernel rejects a non-zeroed buffer with EINVAL.
    *notif = SeccompNotif::default();
    let ret = unsafe {
        libc::ioctl(
            listener_fd,
            SECCOMP_IOCTL_NOTIF_RECV as _,
            notif as *mut SeccompNotif,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}

/// Send a response to a seccomp notification.
///
/// # Errors
///
/// Returns `Errno` on failure (`ENOENT` if the id is no longer valid).
pub fn notif_send(listener_fd: RawFd, resp: &SeccompNotifResp) -> Result<(), Errno> {
    let ret = unsafe {
        libc::ioctl(
            listener_fd,
            SECCOMP_IOCTL_NOTIF_SEND as _,
            resp as *const SeccompNotifResp,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}

/// Check if a notification ID is still valid.
///
/// # Errors
///
/// Returns `Errno::NOENT` if the notification is no longer valid.
pub fn notif_id_valid(listener_fd: RawFd, id: u64) -> Result<(), Errno> {
    let ret = unsafe {
        libc::ioctl(
            listener_fd,
            SECCOMP_IOCTL_NOTIF_ID_VALID as _,
            &id as *const u64,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}
