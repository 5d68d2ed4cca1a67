//! Notification API level detection.
//!
//! Works out, once per process, how much of the seccomp user notification
//! interface the running kernel offers. The result is cached in a static
//! `OnceLock`.
//!
//! ## API Levels
//!
//! Levels follow the libseccomp numbering so they read the same as other
//! tooling:
//!
//! | Level | Requirement | Check Method |
//! |-------|-------------|--------------|
//! | 1 | seccomp filter mode | `prctl(PR_GET_SECCOMP)` |
//! | 2 | action probing | `seccomp(SECCOMP_GET_ACTION_AVAIL)` |
//! | 3 | `RET_USER_NOTIF` action | `SECCOMP_GET_ACTION_AVAIL` on `USER_NOTIF` |
//! | 4 | notify struct sizes | `seccomp(SECCOMP_GET_NOTIF_SIZES)` |
//! | 5 | `USER_NOTIF_FLAG_CONTINUE` | kernel 5.5 |
//! | 6 | wait-killable receive | kernel 5.19 |
//!
//! The engine requires [`MIN_API_LEVEL`].

use std::sync::OnceLock;

use rustix::system::uname;
use thiserror::Error;

use crate::seccomp::{self, SECCOMP_RET_USER_NOTIF};
use crate::seccomp_notify::{SeccompNotifSizes, notif_sizes};

/// Minimum API level: responses must be able to carry the CONTINUE flag.
pub const MIN_API_LEVEL: u32 = 5;

const CONTINUE_KERNEL: (u32, u32, u32) = (5, 5, 0);
const WAIT_KILLABLE_KERNEL: (u32, u32, u32) = (5, 19, 0);

/// What the running kernel supports.
#[derive(Debug, Clone)]
pub struct NotifyInfo {
    pub kernel_version: (u32, u32, u32),
    pub api_level: u32,
    pub notif_sizes: Option<SeccompNotifSizes>,
}

/// Errors that can occur during capability checking.
#[derive(Debug, Clone, Error)]
pub enum CheckError {
    #[error("seccomp is not available")]
    SeccompNotAvailable,

    #[error("need seccomp notification API level >= {required}; it's currently {found}")]
    ApiLevelTooLow { required: u32, found: u32 },

    #[error("kernel notification structs ({0:?}) are larger than supported")]
    NotifSizesMismatch(SeccompNotifSizes),

    #[error("failed to read kernel version")]
    KernelVersionReadFailed,
}

/// Kernel features observed at startup.
#[derive(Debug, Clone, Copy, Default)]
struct Features {
    kernel: (u32, u32, u32),
    seccomp: bool,
    action_avail: bool,
    user_notif: bool,
    sizes: Option<SeccompNotifSizes>,
}

static NOTIFY_INFO: OnceLock<Result<NotifyInfo, CheckError>> = OnceLock::new();

/// Check notification support and cache the result.
///
/// Subsequent calls return the cached result.
pub fn check() -> Result<&'static NotifyInfo, &'static CheckError> {
    NOTIFY_INFO.get_or_init(check_impl).as_ref()
}

fn check_impl() -> Result<NotifyInfo, CheckError> {
    let features = Features {
        kernel: get_kernel_version()?,
        seccomp: seccomp::seccomp_available(),
        // ALLOW is available on every kernel that has GET_ACTION_AVAIL.
        action_avail: seccomp::action_available(seccomp::SECCOMP_RET_ALLOW),
        user_notif: seccomp::action_available(SECCOMP_RET_USER_NOTIF),
        sizes: notif_sizes().ok(),
    };
    evaluate(features)
}

fn evaluate(features: Features) -> Result<NotifyInfo, CheckError> {
    if !features.seccomp {
        return Err(CheckError::SeccompNotAvailable);
    }

    if let Some(sizes) = features.sizes {
        if !sizes.compatible() {
            return Err(CheckError::NotifSizesMismatch(sizes));
        }
    }

    let api_level = api_level(&features);
    if api_level < MIN_API_LEVEL {
        return Err(CheckError::ApiLevelTooLow {
            required: MIN_API_LEVEL,
            found: api_level,
        });
    }

    Ok(NotifyInfo {
        kernel_version: features.kernel,
        api_level,
        notif_sizes: features.sizes,
    })
}

fn api_level(features: &Features) -> u32 {
    let steps = [
        features.seccomp,
        features.action_avail,
        features.user_notif,
        features.sizes.is_some(),
        features.kernel >= CONTINUE_KERNEL,
        features.kernel >= WAIT_KILLABLE_KERNEL,
    ];
    steps.iter().take_while(|&&ok| ok).count() as u32
}

fn get_kernel_version() -> Result<(u32, u32, u32), CheckError> {
    let uts = uname();
    let release = uts
        .release()
        .to_str()
        .map_err(|_| CheckError::KernelVersionReadFailed)?;
    parse_kernel_version(release)
}

fn parse_kernel_version(release: &str) -> Result<(u32, u32, u32), CheckError> {
    let parts: Vec<&str> = release.split('.').collect();
    if parts.len() < 2 {
        return Err(CheckError::KernelVersionReadFailed);
    }

    let major = parts[0]
        .parse::<u32>()
        .map_err(|_| CheckError::KernelVersionReadFailed)?;

    // Minor might carry a suffix too ("19-rc1")
    let minor = parts[1]
        .split('-')
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .ok_or(CheckError::KernelVersionReadFailed)?;

    // Patch might have additional suffix like "0-generic"
    let patch = parts
        .get(2)
        .and_then(|p| p.split('-').next())
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(0);

    Ok((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modern() -> Features {
        Features {
            kernel: (6, 8, 0),
            seccomp: true,
            action_avail: true,
            user_notif: true,
            sizes: Some(SeccompNotifSizes::expected()),
        }
    }

    #[test]
    fn test_parse_kernel_version() {
        assert_eq!(parse_kernel_version("5.15.0").unwrap(), (5, 15, 0));
        assert_eq!(parse_kernel_version("6.1.0-generic").unwrap(), (6, 1, 0));
        assert_eq!(
            parse_kernel_version("5.4.0-150-generic").unwrap(),
            (5, 4, 0)
        );
        assert_eq!(parse_kernel_version("6.19-rc1").unwrap(), (6, 19, 0));
        assert!(parse_kernel_version("garbage").is_err());
    }

    #[test]
    fn modern_kernel_is_level_six() {
        let info = evaluate(modern()).unwrap();
        assert_eq!(info.api_level, 6);
    }

    #[test]
    fn kernel_before_continue_flag_is_rejected() {
        let features = Features {
            kernel: (5, 4, 0),
            ..modern()
        };
        assert_eq!(api_level(&features), 4);
        match evaluate(features) {
            Err(CheckError::ApiLevelTooLow { required, found }) => {
                assert_eq!(required, MIN_API_LEVEL);
                assert_eq!(found, 4);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn level_stops_at_first_missing_feature() {
        let features = Features {
            user_notif: false,
            ..modern()
        };
        assert_eq!(api_level(&features), 2);
    }

    #[test]
    fn no_seccomp_is_reported_first() {
        let features = Features {
            seccomp: false,
            ..modern()
        };
        assert!(matches!(evaluate(features), Err(CheckError::SeccompNotAvailable)));
    }

    #[test]
    fn oversized_kernel_structs_are_rejected() {
        let features = Features {
            sizes: Some(SeccompNotifSizes {
                seccomp_notif: 128,
                ..SeccompNotifSizes::expected()
            }),
            ..modern()
        };
        assert!(matches!(
            evaluate(features),
            Err(CheckError::NotifSizesMismatch(_))
        ));
    }

    #[test]
    fn test_check() {
        match check() {
            Ok(info) => {
                println!("Kernel version: {:?}", info.kernel_version);
                println!("Notification API level: {}", info.api_level);
            }
            Err(e) => {
                println!("System check failed: {e}");
            }
        }
    }
}
