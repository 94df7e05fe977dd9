//! Core types and synchronization primitives for the Quark kernel.
//!
//! This crate holds the pieces of the scheduling core that do not need a
//! kernel target: typed identifiers, the logging facade, interrupt-state
//! control and the spin locks every other subsystem is built on.
//!
//! Everything here can be tested with `cargo test` on the host. Lock
//! interleavings are additionally model-checked with shuttle when built
//! with `--cfg shuttle`.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod arch;
pub mod cell;
pub mod id;
pub mod log;
pub mod sync;
