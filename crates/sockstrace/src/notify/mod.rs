//! Seccomp user notification handling.
//!
//! ## Modules
//!
//! - **listener** - The notification channel descriptor and request type
//! - **supervisor** - Receive loop with race validation and stop handling
//! - **worker** - One thread per notification: handler lookup, call, response
//! - **memory** - Reading argument buffers out of the notifying process

pub mod listener;
pub mod memory;
pub(crate) mod supervisor;
pub(crate) mod worker;

pub use listener::{Listener, Request};
pub use memory::{read_child_bytes, read_child_string};
