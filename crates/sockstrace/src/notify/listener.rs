//! The notification channel descriptor.
//!
//! One [`Listener`] exists per installed filter. The receive loop is its only
//! reader; workers write responses through it concurrently (the kernel
//! serializes `NOTIF_SEND` per id). It is shared behind an `Arc` and the fd
//! closes when the last holder drops, so every in-flight response is written
//! before the channel goes away.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use rustix::io::Errno;
use sockstrace_sys::seccomp_notify::{
    SeccompNotif, SeccompNotifResp, notif_id_valid, notif_recv, notif_send,
};
use sockstrace_sys::syscalls;

use crate::registry::Verdict;

/// A suspended syscall, as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Notification id; responses are addressed by it.
    pub id: u64,
    /// TID of the calling task.
    pub pid: u32,
    /// Syscall number.
    pub nr: i64,
    /// Syscall name, if known to this build.
    pub name: Option<&'static str>,
    /// `AUDIT_ARCH_*` of the call.
    pub arch: u32,
    pub instruction_pointer: u64,
    /// Raw arguments.
    pub args: [u64; 6],
}

impl Request {
    /// Syscall name for logging; `"unknown"` if not in the table.
    pub fn syscall_name(&self) -> &'static str {
        self.name.unwrap_or("unknown")
    }
}

impl From<SeccompNotif> for Request {
    fn from(notif: SeccompNotif) -> Self {
        let nr = i64::from(notif.data.nr);
        Self {
            id: notif.id,
            pid: notif.pid,
            nr,
            name: syscalls::name_of(nr),
            arch: notif.data.arch,
            instruction_pointer: notif.data.instruction_pointer,
            args: notif.data.args,
        }
    }
}

/// Seccomp listener fd.
#[derive(Debug)]
pub struct Listener {
    fd: OwnedFd,
}

impl Listener {
    pub(crate) fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Receive the next notification. Blocks if none is pending.
    ///
    /// # Errors
    ///
    /// `ENOENT` if the call was interrupted before it could be received.
    pub fn recv(&self) -> Result<Request, Errno> {
        let mut notif = SeccompNotif::default();
        notif_recv(self.fd.as_raw_fd(), &mut notif)?;
        Ok(Request::from(notif))
    }

    /// Resume the call `id` with `verdict`.
    ///
    /// # Errors
    ///
    /// `ENOENT` if the call is gone (interrupted or already answered).
    pub fn respond(&self, id: u64, verdict: Verdict) -> Result<(), Errno> {
        let resp = SeccompNotifResp::new(id, verdict.val, verdict.error, verdict.flags);
        notif_send(self.fd.as_raw_fd(), &resp)
    }

    /// Whether `id` still refers to a suspended call.
    ///
    /// Call after reading the caller's memory: if this fails, what was read
    /// may not belong to the call any more.
    ///
    /// # Errors
    ///
    /// `ENOENT` if the call is gone.
    pub fn id_valid(&self, id: u64) -> Result<(), Errno> {
        notif_id_valid(self.fd.as_raw_fd(), id)
    }

    /// Non-blocking check for a pending notification.
    ///
    /// # Errors
    ///
    /// Propagates `poll(2)` failures; `EINTR` is retried.
    pub fn pending(&self) -> Result<bool, Errno> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            // SAFETY: pfd is a valid pollfd and nfds is 1.
            let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
            if ret >= 0 {
                return Ok(ret > 0 && pfd.revents & libc::POLLIN != 0);
            }
            let errno = sockstrace_sys::last_errno();
            if errno != Errno::INTR {
                return Err(errno);
            }
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
