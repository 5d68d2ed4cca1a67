//! Syscall names for the build target.
//!
//! Maps between the names used when registering handlers and the numbers the
//! kernel reports in `seccomp_data.nr`, using the `syscalls` crate's `Sysno`
//! table for whatever target this crate is compiled for.

use ::syscalls::Sysno;

/// Resolve a syscall name to its number on this platform.
pub fn resolve(name: &str) -> Option<i64> {
    name.parse::<Sysno>().ok().map(|sysno| i64::from(sysno.id()))
}

/// Reverse lookup: the canonical name of a syscall number.
pub fn name_of(nr: i64) -> Option<&'static str> {
    usize::try_from(nr)
        .ok()
        .and_then(Sysno::new)
        .map(|sysno| sysno.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_socket_calls() {
        assert_eq!(resolve("connect"), Some(libc::SYS_connect));
        assert_eq!(resolve("accept4"), Some(libc::SYS_accept4));
        assert_eq!(resolve("getppid"), Some(libc::SYS_getppid));
    }

    #[test]
    fn resolves_less_common_calls() {
        let cases = [
            ("rt_sigaction", libc::SYS_rt_sigaction),
            ("rt_sigprocmask", libc::SYS_rt_sigprocmask),
            ("bpf", libc::SYS_bpf),
            ("io_uring_setup", libc::SYS_io_uring_setup),
            ("sched_yield", libc::SYS_sched_yield),
            ("getxattr", libc::SYS_getxattr),
            ("setxattr", libc::SYS_setxattr),
            ("mknodat", libc::SYS_mknodat),
            ("perf_event_open", libc::SYS_perf_event_open),
            ("inotify_init1", libc::SYS_inotify_init1),
            ("personality", libc::SYS_personality),
            ("sync", libc::SYS_sync),
        ];
        for (name, nr) in cases {
            assert_eq!(resolve(name), Some(nr), "{name}");
            assert_eq!(name_of(nr), Some(name));
        }
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        assert_eq!(resolve("conect"), None);
        assert_eq!(resolve(""), None);
        assert_eq!(resolve("CONNECT"), None);
    }

    #[test]
    fn reverse_lookup() {
        assert_eq!(name_of(libc::SYS_connect), Some("connect"));
        assert_eq!(name_of(libc::SYS_openat), Some("openat"));
        assert_eq!(name_of(99_999), None);
        assert_eq!(name_of(-1), None);
    }
}
