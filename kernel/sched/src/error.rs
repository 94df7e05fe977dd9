//! Error type for scheduler and mutex operations.

use core::fmt;

/// Errors returned by the scheduling core.
///
/// Every fallible entry point reports one of these through `Result`; none
/// of them panics on a bad argument. Invariant violations (a thread linked
/// into two queues, an unbalanced `unmask`) are programming errors and are
/// caught by assertions instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// A thread, mutex or table slot could not be allocated.
    OutOfMemory,
    /// The resource is in use (destroying a held mutex).
    Busy,
    /// A non-blocking acquisition found the mutex held.
    WouldBlock,
    /// The handle is stale or the request does not apply in the current state.
    InvalidArgument,
    /// The global kernel instance has not been set up yet.
    NotInitialized,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Busy => write!(f, "resource busy"),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotInitialized => write!(f, "scheduler not initialized"),
        }
    }
}

impl core::error::Error for SchedError {}
