//! Core selection for newly runnable threads.
//!
//! Placement only applies to threads without an affinity, and only when the
//! thread is first handed to [`Kernel::run`](crate::Kernel::run). Threads
//! never migrate afterwards.

use core::sync::atomic::{AtomicUsize, Ordering};

use quark_core::id::CpuId;

/// Policy choosing the core a thread is queued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Always the core calling `run`.
    #[default]
    Local,
    /// The core with the lowest last-sampled load. Ties go to the local
    /// core, then to the lowest CPU number.
    LeastLoaded,
    /// Cycle through all cores.
    RoundRobin,
}

impl Placement {
    /// Picks a core.
    ///
    /// `loads` holds the per-mille load of every core, indexed by CPU
    /// number. `cursor` is the shared rotation state for
    /// [`Placement::RoundRobin`].
    pub fn choose(self, local: CpuId, loads: &[u32], cursor: &AtomicUsize) -> CpuId {
        if loads.is_empty() {
            return local;
        }
        match self {
            Self::Local => local,
            Self::LeastLoaded => loads
                .iter()
                .enumerate()
                .min_by_key(|&(i, &load)| (load, i != local.as_usize(), i))
                .map_or(local, |(i, _)| cpu_from_index(i)),
            Self::RoundRobin => {
                let n = cursor.fetch_add(1, Ordering::Relaxed);
                cpu_from_index(n % loads.len())
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cpu_from_index(index: usize) -> CpuId {
    // Indices are bounded by MAX_CPUS.
    CpuId::new(index as u32)
}
