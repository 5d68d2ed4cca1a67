//! Engine configuration.
//!
//! ## Example
//!
//! ```ignore
//! use sockstrace::EngineConfig;
//!
//! let config = EngineConfig::new()
//!     .error_capacity(256)
//!     .thread_name("tracer")
//!     .stop_errno(libc::EACCES);
//! ```
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `error_capacity` | 64 errors |
//! | `thread_name` | `sockstrace` |
//! | `stop_errno` | `EPERM` |
//! | `unknown_errno` | `ENOSYS` |
//! | `validate_ids` | true |

/// Tunables for a running engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Errors buffered on the error stream before new ones are dropped.
    pub error_capacity: usize,
    /// Prefix for the loop and worker thread names.
    pub thread_name: String,
    /// Errno returned to calls still pending when the engine stops.
    pub stop_errno: i32,
    /// Errno returned to calls with no registered handler.
    pub unknown_errno: i32,
    /// Run the advisory `NOTIF_ID_VALID` check before dispatch.
    pub validate_ids: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_capacity: 64,
            thread_name: "sockstrace".into(),
            stop_errno: libc::EPERM,
            unknown_errno: libc::ENOSYS,
            validate_ids: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error stream capacity. Clamped to at least 1.
    pub fn error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = capacity.max(1);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn stop_errno(mut self, errno: i32) -> Self {
        self.stop_errno = errno;
        self
    }

    pub fn unknown_errno(mut self, errno: i32) -> Self {
        self.unknown_errno = errno;
        self
    }

    pub fn validate_ids(mut self, enabled: bool) -> Self {
        self.validate_ids = enabled;
        self
    }

    pub(crate) fn loop_thread_name(&self) -> String {
        format!("{}-loop", self.thread_name)
    }

    pub(crate) fn worker_thread_name(&self) -> String {
        format!("{}-worker", self.thread_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.error_capacity, 64);
        assert_eq!(config.stop_errno, libc::EPERM);
        assert_eq!(config.unknown_errno, libc::ENOSYS);
        assert!(config.validate_ids);
        assert_eq!(config.loop_thread_name(), "sockstrace-loop");
        assert_eq!(config.worker_thread_name(), "sockstrace-worker");
    }

    #[test]
    fn builder() {
        let config = EngineConfig::new()
            .error_capacity(0)
            .thread_name("tracer")
            .stop_errno(libc::EACCES)
            .validate_ids(false);
        assert_eq!(config.error_capacity, 1);
        assert_eq!(config.stop_errno, libc::EACCES);
        assert!(!config.validate_ids);
        assert_eq!(config.worker_thread_name(), "tracer-worker");
    }
}
