//! Threads: the schedulable unit.
//!
//! A [`Thread`] is shared as `Arc<Thread>`. Its owning [`Process`] holds the
//! strong reference that defines its lifetime; scheduler queues, the
//! `current` slot of a core and mutex wait queues hold additional handles
//! while the thread is a member of them.
//!
//! Membership is tracked explicitly in the thread's links: at most one
//! scheduler queue slot and at most one mutex wait queue. Linking a thread
//! that is already linked is a bug and trips an assertion.

use alloc::sync::{Arc, Weak};
use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use quark_core::cell::RacyCell;
use quark_core::id::{CpuId, Pid, ThreadId};
use quark_core::sync::SpinLock;

use crate::config::STD_LEVELS;
use crate::error::SchedError;
use crate::mutex::MutexId;
use crate::process::{AddressSpace, Process};

/// Entry point of a new thread. Receives the argument given at creation.
pub type ThreadEntry = fn(usize);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a thread.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Queued (or about to be), not running.
    Ready = 0,
    /// Executing on some core.
    Running = 1,
    /// Blocked on a mutex.
    Waiting = 2,
    /// Not runnable until explicitly woken.
    Sleeping = 3,
    /// Finished; never scheduled again.
    Terminated = 4,
}

impl ThreadState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Waiting,
            3 => Self::Sleeping,
            _ => Self::Terminated,
        }
    }

    /// Returns the lowercase state name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Sleeping => "sleeping",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Scheduling class of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Strict priority: always runs before STD and idle threads.
    Srt,
    /// Standard priority at sub-level `0..STD_LEVELS` (0 = highest).
    Std(u8),
    /// Reserved for the per-core idle threads.
    Idle,
}

impl Priority {
    /// The default STD level for new threads.
    pub const NORMAL: Self = Self::Std(4);
    /// Highest STD level.
    pub const HIGHEST_STD: Self = Self::Std(0);
    /// Lowest STD level.
    #[allow(clippy::cast_possible_truncation)]
    pub const LOWEST_STD: Self = Self::Std((STD_LEVELS - 1) as u8);

    const IDLE_CODE: u8 = u8::MAX;

    /// Creates a STD priority, checking the level.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidArgument`] if `level >= STD_LEVELS`.
    pub const fn std(level: u8) -> Result<Self, SchedError> {
        if (level as usize) < STD_LEVELS {
            Ok(Self::Std(level))
        } else {
            Err(SchedError::InvalidArgument)
        }
    }

    /// Returns `true` for the strict-priority class.
    pub const fn is_srt(self) -> bool {
        matches!(self, Self::Srt)
    }

    /// Checks that a priority may be assigned to an ordinary thread.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidArgument`] for an out-of-range STD level
    /// or for [`Priority::Idle`].
    pub const fn validate(self) -> Result<Self, SchedError> {
        match self {
            Self::Srt => Ok(self),
            Self::Std(level) => Self::std(level),
            Self::Idle => Err(SchedError::InvalidArgument),
        }
    }

    const fn encode(self) -> u8 {
        match self {
            Self::Srt => 0,
            Self::Std(level) => level.saturating_add(1),
            Self::Idle => Self::IDLE_CODE,
        }
    }

    const fn decode(v: u8) -> Self {
        match v {
            0 => Self::Srt,
            Self::IDLE_CODE => Self::Idle,
            n => Self::Std(n - 1),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Srt => write!(f, "srt"),
            Self::Std(level) => write!(f, "std{level}"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

bitflags::bitflags! {
    /// Per-thread scheduling flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u8 {
        /// The thread asked to give up the rest of its quantum.
        const YIELD_REQUESTED = 1 << 0;
        /// The thread is a core's idle thread.
        const IDLE            = 1 << 1;
        /// The thread belongs to the kernel pseudo-process.
        const KERNEL          = 1 << 2;
        /// The thread has been handed to a scheduler once.
        const STARTED         = 1 << 3;
    }
}

// ---------------------------------------------------------------------------
// Creation metadata
// ---------------------------------------------------------------------------

/// Parameters for creating a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadMeta {
    /// Human-readable name.
    pub name: &'static str,
    /// Initial priority.
    pub priority: Priority,
    /// Core the thread is pinned to, if any.
    pub affinity: Option<CpuId>,
    /// Stack size; `None` uses the configured kernel stack size.
    pub stack_size: Option<usize>,
}

impl ThreadMeta {
    /// Creates metadata with the given name and defaults for the rest.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            priority: Priority::NORMAL,
            affinity: None,
            stack_size: None,
        }
    }

    /// Sets the initial priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Pins the thread to a core.
    #[must_use]
    pub const fn with_affinity(mut self, cpu: CpuId) -> Self {
        self.affinity = Some(cpu);
        self
    }

    /// Sets the stack size.
    #[must_use]
    pub const fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }
}

impl Default for ThreadMeta {
    fn default() -> Self {
        Self::new("<anon>")
    }
}

// ---------------------------------------------------------------------------
// Continuation
// ---------------------------------------------------------------------------

/// Saved execution context of a suspended thread.
///
/// The layout is owned by the [`Platform`](crate::Platform): the scheduler
/// never interprets these values, it only hands the thread to
/// [`Platform::switch_context`](crate::Platform::switch_context).
#[derive(Debug, Clone, Copy)]
pub struct Continuation {
    /// Saved stack pointer.
    pub stack_pointer: usize,
    /// Address of the extended (FPU/SIMD) register save area.
    pub fpu_state: usize,
    /// Entry point, present until the thread first runs.
    pub entry: Option<ThreadEntry>,
    /// Argument for `entry`.
    pub arg: usize,
}

impl Continuation {
    /// Creates a continuation resuming at a prepared stack.
    pub const fn new(stack_pointer: usize, fpu_state: usize) -> Self {
        Self {
            stack_pointer,
            fpu_state,
            entry: None,
            arg: 0,
        }
    }

    /// A continuation for a context that is already running (the boot
    /// context becoming a core's idle thread). Filled in on first switch-out.
    pub const fn adopted() -> Self {
        Self::new(0, 0)
    }

    /// Records the entry point the thread starts at.
    #[must_use]
    pub const fn with_entry(mut self, entry: ThreadEntry, arg: usize) -> Self {
        self.entry = Some(entry);
        self.arg = arg;
        self
    }
}

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

/// Where a queued thread sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueSlot {
    pub(crate) cpu: CpuId,
    pub(crate) priority: Priority,
}

#[derive(Debug, Default)]
struct Links {
    queue: Option<QueueSlot>,
    mutex: Option<MutexId>,
}

/// A schedulable thread.
pub struct Thread {
    id: ThreadId,
    name: &'static str,
    state: AtomicU8,
    priority: AtomicU8,
    flags: AtomicU8,
    cpu: AtomicU32,
    affinity: Option<CpuId>,
    pid: Pid,
    address_space: AddressSpace,
    process: Weak<Process>,
    continuation: RacyCell<Continuation>,
    links: SpinLock<Links>,
}

impl Thread {
    pub(crate) fn new(
        id: ThreadId,
        meta: &ThreadMeta,
        process: &Arc<Process>,
        continuation: Continuation,
    ) -> Self {
        let mut flags = ThreadFlags::empty();
        if process.is_kernel() {
            flags |= ThreadFlags::KERNEL;
        }
        Self {
            id,
            name: meta.name,
            state: AtomicU8::new(ThreadState::Ready as u8),
            priority: AtomicU8::new(meta.priority.encode()),
            flags: AtomicU8::new(flags.bits()),
            cpu: AtomicU32::new(meta.affinity.unwrap_or(CpuId::BSP).as_u32()),
            affinity: meta.affinity,
            pid: process.pid(),
            address_space: process.address_space(),
            process: Arc::downgrade(process),
            continuation: RacyCell::new(continuation),
            links: SpinLock::named("thread.links", Links::default()),
        }
    }

    /// Creates the idle thread of `cpu`. It starts SLEEPING and is adopted
    /// as the running thread by its core's scheduler.
    pub(crate) fn new_idle(id: ThreadId, cpu: CpuId, process: &Arc<Process>) -> Self {
        let meta = ThreadMeta::new("idle").with_affinity(cpu);
        let thread = Self::new(id, &meta, process, Continuation::adopted());
        thread.priority.store(Priority::Idle.encode(), Ordering::Relaxed);
        thread.state.store(ThreadState::Sleeping as u8, Ordering::Relaxed);
        thread.insert_flags(ThreadFlags::IDLE | ThreadFlags::STARTED);
        thread
    }

    /// Returns the thread's ID.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Returns the thread's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the current state.
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Returns the current priority.
    pub fn priority(&self) -> Priority {
        Priority::decode(self.priority.load(Ordering::Acquire))
    }

    pub(crate) fn set_priority(&self, priority: Priority) {
        self.priority.store(priority.encode(), Ordering::Release);
    }

    /// Returns the flag set.
    pub fn flags(&self) -> ThreadFlags {
        ThreadFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Sets flags, returning the previous set.
    pub(crate) fn insert_flags(&self, flags: ThreadFlags) -> ThreadFlags {
        ThreadFlags::from_bits_truncate(self.flags.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    pub(crate) fn remove_flags(&self, flags: ThreadFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Returns `true` for a core's idle thread.
    pub fn is_idle(&self) -> bool {
        self.flags().contains(ThreadFlags::IDLE)
    }

    /// Returns the core this thread is (or last was) scheduled on.
    pub fn cpu(&self) -> CpuId {
        CpuId::new(self.cpu.load(Ordering::Acquire))
    }

    pub(crate) fn set_cpu(&self, cpu: CpuId) {
        self.cpu.store(cpu.as_u32(), Ordering::Release);
    }

    /// Returns the core this thread is pinned to, if any.
    pub fn affinity(&self) -> Option<CpuId> {
        self.affinity
    }

    /// Returns the owning process ID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Returns the address space of the owning process.
    pub fn address_space(&self) -> AddressSpace {
        self.address_space
    }

    /// Returns the owning process if it still exists.
    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    /// Returns a pointer to the saved continuation.
    ///
    /// Only the platform's context switch may dereference it, and only for
    /// the two threads of the switch in progress.
    pub fn continuation(&self) -> *mut Continuation {
        self.continuation.get()
    }

    // -- links ---------------------------------------------------------------

    pub(crate) fn queued_in(&self) -> Option<QueueSlot> {
        self.links.lock_irqsave().queue
    }

    pub(crate) fn link_queue(&self, slot: QueueSlot) {
        let mut links = self.links.lock_irqsave();
        assert!(
            links.queue.is_none(),
            "thread {} linked into two scheduler queues",
            self.id
        );
        assert!(
            links.mutex.is_none(),
            "thread {} queued while waiting on a mutex",
            self.id
        );
        links.queue = Some(slot);
    }

    pub(crate) fn unlink_queue(&self) -> Option<QueueSlot> {
        self.links.lock_irqsave().queue.take()
    }

    /// Returns the mutex this thread is blocked on, if any.
    pub fn waiting_on(&self) -> Option<MutexId> {
        self.links.lock_irqsave().mutex
    }

    pub(crate) fn link_mutex(&self, id: MutexId) {
        let mut links = self.links.lock_irqsave();
        assert!(
            links.mutex.is_none(),
            "thread {} linked into two mutex wait queues",
            self.id
        );
        assert!(
            links.queue.is_none(),
            "thread {} blocked while in a scheduler queue",
            self.id
        );
        links.mutex = Some(id);
    }

    pub(crate) fn unlink_mutex(&self) -> Option<MutexId> {
        self.links.lock_irqsave().mutex.take()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("priority", &self.priority())
            .field("cpu", &self.cpu())
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}
