//! Compile-time limits and runtime scheduler configuration.

use crate::error::SchedError;
use crate::placement::Placement;

/// Maximum number of CPUs supported by the scheduler.
pub const MAX_CPUS: usize = 64;

/// Number of standard-priority sub-levels (0 = highest).
pub const STD_LEVELS: usize = 9;

/// Timer ticks a thread may run before it is preempted.
pub const DEFAULT_QUANTUM_TICKS: u32 = 10;

/// Consecutive turns each STD level gets before the round robin rotates.
///
/// Level `i` gets `9 - i` turns.
pub const DEFAULT_STD_WEIGHTS: [u32; STD_LEVELS] = [9, 8, 7, 6, 5, 4, 3, 2, 1];

/// Timer ticks between two load samples.
pub const DEFAULT_LOAD_SAMPLE_TICKS: u32 = 100;

/// Maximum number of live threads, idle threads included.
pub const DEFAULT_MAX_THREADS: usize = 4096;

/// Maximum number of mutexes that may exist at once.
pub const DEFAULT_MAX_MUTEXES: usize = 1024;

/// Stack size requested for kernel threads.
pub const DEFAULT_KERNEL_STACK_SIZE: usize = 64 * 1024;

/// Number of queued thread IDs captured by a core snapshot.
pub const SNAPSHOT_DEPTH: usize = 16;

/// Runtime configuration passed to [`Kernel::new`](crate::Kernel::new).
///
/// # Examples
///
/// ```ignore
/// let config = SchedConfig::new()
///     .with_quantum_ticks(5)
///     .with_placement(Placement::LeastLoaded);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Timer ticks per quantum.
    pub quantum_ticks: u32,
    /// Round-robin turns per STD level.
    pub std_weights: [u32; STD_LEVELS],
    /// Timer ticks per load sample window.
    pub load_sample_ticks: u32,
    /// Core selection for threads without affinity.
    pub placement: Placement,
    /// Upper bound on live threads.
    pub max_threads: usize,
    /// Upper bound on live mutexes.
    pub max_mutexes: usize,
    /// Stack size used by the kernel-thread factory.
    pub kernel_stack_size: usize,
}

impl SchedConfig {
    /// Returns the default configuration.
    pub const fn new() -> Self {
        Self {
            quantum_ticks: DEFAULT_QUANTUM_TICKS,
            std_weights: DEFAULT_STD_WEIGHTS,
            load_sample_ticks: DEFAULT_LOAD_SAMPLE_TICKS,
            placement: Placement::Local,
            max_threads: DEFAULT_MAX_THREADS,
            max_mutexes: DEFAULT_MAX_MUTEXES,
            kernel_stack_size: DEFAULT_KERNEL_STACK_SIZE,
        }
    }

    /// Sets the quantum length in timer ticks.
    #[must_use]
    pub const fn with_quantum_ticks(mut self, ticks: u32) -> Self {
        self.quantum_ticks = ticks;
        self
    }

    /// Sets the round-robin weights of the STD levels.
    #[must_use]
    pub const fn with_std_weights(mut self, weights: [u32; STD_LEVELS]) -> Self {
        self.std_weights = weights;
        self
    }

    /// Sets the load sampling window in timer ticks.
    #[must_use]
    pub const fn with_load_sample_ticks(mut self, ticks: u32) -> Self {
        self.load_sample_ticks = ticks;
        self
    }

    /// Sets the placement policy.
    #[must_use]
    pub const fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Sets the live-thread limit.
    #[must_use]
    pub const fn with_max_threads(mut self, max: usize) -> Self {
        self.max_threads = max;
        self
    }

    /// Sets the live-mutex limit.
    #[must_use]
    pub const fn with_max_mutexes(mut self, max: usize) -> Self {
        self.max_mutexes = max;
        self
    }

    /// Sets the kernel-thread stack size.
    #[must_use]
    pub const fn with_kernel_stack_size(mut self, size: usize) -> Self {
        self.kernel_stack_size = size;
        self
    }

    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidArgument`] for a zero quantum, weight,
    /// sampling window, limit or stack size.
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.quantum_ticks == 0
            || self.load_sample_ticks == 0
            || self.std_weights.contains(&0)
            || self.max_threads == 0
            || self.max_mutexes == 0
            || self.kernel_stack_size == 0
        {
            return Err(SchedError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}
