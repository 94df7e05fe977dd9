//! Thread scheduling and blocking mutexes for the Quark kernel.
//!
//! Each CPU runs its own [`Scheduler`]: a strict-priority SRT class, nine
//! STD levels served by weighted round robin, and an idle thread. Threads
//! belong to processes and are created through [`Kernel`], which also owns
//! the mutex table. Everything hardware-specific sits behind [`Platform`].
//!
//! The crate builds as `no_std` with `alloc`. Host tests drive it with a
//! scripted platform.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod global;
pub mod kernel;
mod kthread;
pub mod load;
pub mod mutex;
pub mod placement;
pub mod platform;
pub mod process;
pub mod runqueue;
pub mod scheduler;
pub mod thread;

pub use config::SchedConfig;
pub use error::SchedError;
pub use kernel::{Kernel, PreemptGuard};
pub use mutex::{AcquireMode, MutexId, MutexState, WaitRecord};
pub use placement::Placement;
pub use platform::Platform;
pub use process::{AddressSpace, Process};
pub use scheduler::{CoreSnapshot, Scheduler};
pub use thread::{Continuation, Priority, Thread, ThreadEntry, ThreadFlags, ThreadMeta, ThreadState};

pub use quark_core::id::{CpuId, Pid, ThreadId};
