//! Seccomp-BPF notify filter construction.
//!
//! The filter marks a chosen set of syscalls for user notification and lets
//! everything else through untouched:
//!
//! 1. Verify architecture matches the build target (allow otherwise)
//! 2. Load syscall number from `seccomp_data`
//! 3. On x86_64, notify on any x32 ABI syscall
//! 4. Compare against the notify list, jump to `RET USER_NOTIF` on match
//! 5. Allow by default
//!
//! ## Layout
//!
//! ```text
//! [0-2]   Architecture check
//! [3]     Load syscall number
//! [4]     JGE X32_SYSCALL_BIT -> NOTIFY (x86_64 only)
//! [..N]   JEQ nr -> NOTIFY
//! [N+1]   RET ALLOW
//! [N+2]   RET USER_NOTIF
//! ```
//!
//! A foreign-architecture syscall (e.g. 32-bit compat entry) is allowed rather
//! than killed: this filter exists for observation, not confinement.
//!
//! x32 calls are the exception. They report `AUDIT_ARCH_X86_64` with the x32
//! bit set in the number, so they would slip past every `JEQ`. Sending them to
//! the supervisor lets it refuse them, since no handler is registered under an
//! x32 number.

pub const SECCOMP_SET_MODE_FILTER: u32 = 1;
pub const SECCOMP_GET_ACTION_AVAIL: u32 = 2;
pub const SECCOMP_GET_NOTIF_SIZES: u32 = 3;

pub const SECCOMP_RET_USER_NOTIF: u32 = 0x7fc00000;
pub const SECCOMP_RET_ALLOW: u32 = 0x7fff0000;

// BPF instruction classes
const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;

// BPF ld/ldx fields
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;

// BPF alu/jmp fields
const BPF_JEQ: u16 = 0x10;
const BPF_JGE: u16 = 0x30;
const BPF_K: u16 = 0x00;

#[cfg(target_arch = "x86_64")]
pub const AUDIT_ARCH: u32 = 0xc000003e;
#[cfg(target_arch = "aarch64")]
pub const AUDIT_ARCH: u32 = 0xc00000b7;

/// Bit set in syscall numbers of the x32 ABI (`__X32_SYSCALL_BIT`).
#[cfg(target_arch = "x86_64")]
pub const X32_SYSCALL_BIT: Option<u32> = Some(0x4000_0000);
#[cfg(not(target_arch = "x86_64"))]
pub const X32_SYSCALL_BIT: Option<u32> = None;

/// Index of the first per-syscall `JEQ` in a built filter.
pub const FIRST_CHECK: usize = 4 + X32_SYSCALL_BIT.is_some() as usize;

// seccomp_data offsets
const OFFSET_SYSCALL_NR: u32 = 0;
const OFFSET_ARCH: u32 = 4;

/// Maximum notify list size (BPF jump offsets are u8).
pub const MAX_NOTIFY_SYSCALLS: usize = 200;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    #[inline]
    pub const fn stmt(code: u16, k: u32) -> Self {
        Self {
            code,
            jt: 0,
            jf: 0,
            k,
        }
    }

    #[inline]
    pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SockFprog {
    pub len: u16,
    pub filter: *const SockFilter,
}

impl SockFprog {
    /// Borrow a built filter as a kernel program descriptor.
    ///
    /// The returned value holds a raw pointer into `filter`; it must not
    /// outlive the slice.
    pub fn new(filter: &[SockFilter]) -> Self {
        Self {
            len: filter.len() as u16,
            filter: filter.as_ptr(),
        }
    }
}

/// Builds a BPF filter that returns `SECCOMP_RET_USER_NOTIF` for the listed
/// syscalls and `SECCOMP_RET_ALLOW` for everything else.
///
/// # Panics
///
/// Panics if `syscalls.len()` > 200 (BPF jump offsets are u8).
pub fn build_notify_filter(syscalls: &[i64]) -> Vec<SockFilter> {
    assert!(
        syscalls.len() <= MAX_NOTIFY_SYSCALLS,
        "notify syscall list too large: {} > {}",
        syscalls.len(),
        MAX_NOTIFY_SYSCALLS
    );

    let n = syscalls.len();
    let mut filter = Vec::with_capacity(n + 7);

    // Architecture check
    filter.push(SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_ARCH));
    filter.push(SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, AUDIT_ARCH, 1, 0));
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));

    // Load syscall number
    filter.push(SockFilter::stmt(
        BPF_LD | BPF_W | BPF_ABS,
        OFFSET_SYSCALL_NR,
    ));

    // x32 ABI → jump to NOTIFY (past the n checks and the ALLOW)
    if let Some(bit) = X32_SYSCALL_BIT {
        filter.push(SockFilter::jump(
            BPF_JMP | BPF_JGE | BPF_K,
            bit,
            (n + 1) as u8,
            0,
        ));
    }

    // Check each syscall → jump to NOTIFY
    for (i, &nr) in syscalls.iter().enumerate() {
        let notify_offset = (n - i) as u8;
        filter.push(SockFilter::jump(
            BPF_JMP | BPF_JEQ | BPF_K,
            nr as u32,
            notify_offset,
            0,
        ));
    }

    // Default: ALLOW
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));

    // NOTIFY
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_USER_NOTIF));

    filter
}

/// Returns true if seccomp is available.
pub fn seccomp_available() -> bool {
    unsafe { libc::prctl(libc::PR_GET_SECCOMP, 0, 0, 0, 0) >= 0 }
}

/// Returns true if the kernel supports the given `SECCOMP_RET_*` action.
///
/// Fails (and returns false) on kernels predating `SECCOMP_GET_ACTION_AVAIL`.
pub fn action_available(action: u32) -> bool {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_GET_ACTION_AVAIL,
            0u32,
            &action as *const u32,
        )
    };
    ret == 0
}
