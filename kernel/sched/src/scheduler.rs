//! Per-core scheduler.
//!
//! One [`Scheduler`] exists per CPU for the life of the kernel. It owns that
//! core's run queues, the `current` thread slot, the idle thread and the
//! preemption bookkeeping. Other cores only ever touch it through
//! [`Scheduler::make_ready`] (and the other queue operations), which take
//! this core's lock and nothing else.
//!
//! # Lock ordering
//!
//! The core lock is an [`IrqSpinLock`] because the timer tick takes it from
//! interrupt context. It is the innermost lock: mutex and registry locks may
//! be held while taking it, never the reverse.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering, fence};

use planck_noalloc::vec::ArrayVec;
use quark_core::arch;
use quark_core::id::{CpuId, ThreadId};
use quark_core::sync::IrqSpinLock;
use quark_core::{kdebug, ktrace, kwarn};

use crate::config::{SNAPSHOT_DEPTH, STD_LEVELS, SchedConfig};
use crate::load::LoadMeter;
use crate::platform::Platform;
use crate::runqueue::RunQueues;
use crate::thread::{Priority, QueueSlot, Thread, ThreadFlags, ThreadState};

/// State guarded by the core lock.
struct CoreState {
    queues: RunQueues<Arc<Thread>>,
    current: Arc<Thread>,
    /// The thread that most recently switched out. Keeps it alive until
    /// the switch away from it has completed.
    last: Option<Arc<Thread>>,
    load: LoadMeter,
}

impl CoreState {
    fn enqueue(&mut self, cpu: CpuId, thread: Arc<Thread>) {
        let priority = thread.priority();
        thread.link_queue(QueueSlot { cpu, priority });
        self.queues.push(priority, thread);
    }

    fn dequeue(&mut self, thread: &Thread) -> bool {
        let Some(slot) = thread.unlink_queue() else {
            return false;
        };
        let removed = self
            .queues
            .remove_by(slot.priority, |t| core::ptr::eq(Arc::as_ptr(t), thread));
        debug_assert!(removed.is_some(), "thread {} missing from its queue", thread.id());
        removed.is_some()
    }

    /// Selection never comes back empty: the idle thread is queued whenever
    /// it is not running.
    fn select(&mut self, idle: &Arc<Thread>) -> Arc<Thread> {
        match self.queues.pop_next() {
            Some((_, next)) => {
                next.unlink_queue();
                next
            }
            None => Arc::clone(idle),
        }
    }
}

/// Point-in-time view of a core, for diagnostics.
#[derive(Debug)]
pub struct CoreSnapshot {
    /// The core.
    pub cpu: CpuId,
    /// The running thread.
    pub current: ThreadId,
    /// Threads in the SRT queue.
    pub srt_len: usize,
    /// Threads in each STD sub-queue.
    pub std_len: [usize; STD_LEVELS],
    /// Queued thread IDs in class order, truncated to [`SNAPSHOT_DEPTH`].
    pub queued: ArrayVec<ThreadId, SNAPSHOT_DEPTH>,
    /// Current preemption mask depth.
    pub preempt_depth: u32,
    /// Whether a reschedule is pending.
    pub resched_pending: bool,
    /// Load of the last sample window, per mille.
    pub load_permille: u32,
}

/// The scheduler of one CPU.
pub struct Scheduler {
    cpu: CpuId,
    state: IrqSpinLock<CoreState>,
    idle: Arc<Thread>,
    preempt_depth: AtomicU32,
    resched_pending: AtomicBool,
    quantum_ticks: u32,
    quantum_left: AtomicU32,
    load_sample_ticks: u32,
    ticks: AtomicU64,
    load_permille: AtomicU32,
}

impl Scheduler {
    /// Creates the scheduler of `cpu`, adopting `idle` as its running
    /// thread. The calling context becomes the idle thread.
    pub(crate) fn new(cpu: CpuId, idle: Arc<Thread>, config: &SchedConfig, now: u64) -> Self {
        debug_assert!(idle.is_idle());
        idle.set_state(ThreadState::Running);
        idle.set_cpu(cpu);
        Self {
            cpu,
            state: IrqSpinLock::named(
                "sched.core",
                CoreState {
                    queues: RunQueues::new(config.std_weights),
                    current: Arc::clone(&idle),
                    last: None,
                    load: LoadMeter::new(now, true),
                },
            ),
            idle,
            preempt_depth: AtomicU32::new(0),
            resched_pending: AtomicBool::new(false),
            quantum_ticks: config.quantum_ticks,
            quantum_left: AtomicU32::new(config.quantum_ticks),
            load_sample_ticks: config.load_sample_ticks,
            ticks: AtomicU64::new(0),
            load_permille: AtomicU32::new(0),
        }
    }

    /// Returns the CPU this scheduler belongs to.
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    /// Returns the running thread.
    pub fn current(&self) -> Arc<Thread> {
        Arc::clone(&self.state.lock().current)
    }

    /// Returns this core's idle thread.
    pub fn idle_thread(&self) -> &Arc<Thread> {
        &self.idle
    }

    /// Returns the number of timer ticks seen.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Returns the load of the last sample window, per mille.
    pub fn load_permille(&self) -> u32 {
        self.load_permille.load(Ordering::Relaxed)
    }

    /// Returns `true` while local preemption is masked.
    pub fn is_masked(&self) -> bool {
        self.preempt_depth.load(Ordering::Acquire) > 0
    }

    /// Returns `true` if a reschedule has been requested but not yet run.
    pub fn resched_pending(&self) -> bool {
        self.resched_pending.load(Ordering::Acquire)
    }

    /// Returns `true` if an SRT or STD thread is queued.
    pub fn has_ready(&self) -> bool {
        self.state.lock().queues.has_ready()
    }

    // -----------------------------------------------------------------------
    // Preemption mask
    // -----------------------------------------------------------------------

    pub(crate) fn mask(&self) {
        self.preempt_depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one mask level. Returns `true` if preemption is now enabled
    /// and a reschedule was deferred while it was masked.
    pub(crate) fn unmask(&self) -> bool {
        let prev = self
            .preempt_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1));
        let Ok(prev) = prev else {
            panic!("unbalanced preemption unmask on cpu {}", self.cpu);
        };
        prev == 1 && self.resched_pending.load(Ordering::Acquire)
    }

    pub(crate) fn request_resched(&self) {
        self.resched_pending.store(true, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Queue operations (any core)
    // -----------------------------------------------------------------------

    /// Marks `thread` READY and queues it here unless it already is.
    ///
    /// Returns `true` if the running thread should be preempted: this core
    /// is idle, or an SRT thread arrived while a non-SRT one runs. The
    /// reschedule is then pending; the caller sends the IPI if this core is
    /// remote.
    pub(crate) fn make_ready(&self, thread: Arc<Thread>) -> bool {
        self.with_locked(|core| core.make_ready(thread))
    }

    /// Runs `f` with the core lock held, so that a state check and the
    /// matching queue update happen atomically with respect to this core.
    pub(crate) fn with_locked<R>(&self, f: impl FnOnce(&mut CoreView<'_>) -> R) -> R {
        let mut st = self.state.lock();
        let mut view = CoreView {
            cpu: self.cpu,
            state: &mut *st,
            resched_pending: &self.resched_pending,
        };
        f(&mut view)
    }

    /// Changes the priority of `thread`, moving it between queues if it is
    /// queued here. Returns `Some(true)` if the change calls for preemption,
    /// and `None` if the thread has been placed on another core meanwhile;
    /// the caller retries there.
    pub(crate) fn reprioritize(&self, thread: &Arc<Thread>, priority: Priority) -> Option<bool> {
        let mut st = self.state.lock();
        let was_queued = st.dequeue(thread);
        thread.set_priority(priority);
        if was_queued {
            st.enqueue(self.cpu, Arc::clone(thread));
        } else {
            // Pairs with the fence in `CoreView::make_ready`: either that
            // enqueue sees the new priority or this load sees the new core.
            fence(Ordering::SeqCst);
            if thread.cpu() != self.cpu {
                return None;
            }
        }
        let preempt = was_queued && priority.is_srt() && !st.current.priority().is_srt();
        if preempt {
            self.request_resched();
        }
        Some(preempt)
    }

    /// Captures the queue state.
    #[allow(clippy::cast_possible_truncation)]
    pub fn snapshot(&self) -> CoreSnapshot {
        let st = self.state.lock();
        let mut queued = ArrayVec::new();
        for thread in st.queues.iter() {
            if queued.try_push(thread.id()).is_err() {
                break;
            }
        }
        CoreSnapshot {
            cpu: self.cpu,
            current: st.current.id(),
            srt_len: st.queues.len(Priority::Srt),
            std_len: core::array::from_fn(|level| st.queues.len(Priority::Std(level as u8))),
            queued,
            preempt_depth: self.preempt_depth.load(Ordering::Relaxed),
            resched_pending: self.resched_pending.load(Ordering::Relaxed),
            load_permille: self.load_permille(),
        }
    }

    // -----------------------------------------------------------------------
    // Local operations (this core only)
    // -----------------------------------------------------------------------

    /// Switches to the next thread chosen by the selection policy.
    ///
    /// The outgoing thread is requeued if it is still RUNNING. A WAITING,
    /// SLEEPING or TERMINATED thread stays out of the queues, and one that
    /// was already requeued by an early wake-up is not queued twice. If the
    /// selection picks the outgoing thread again no switch takes place.
    ///
    /// Must run on this scheduler's CPU with no spin lock held.
    pub(crate) fn reschedule(&self, platform: &dyn Platform) {
        self.mask();

        let (from, to, stale, space_change) = {
            let mut st = self.state.lock();
            let prev = Arc::clone(&st.current);
            match prev.state() {
                ThreadState::Running | ThreadState::Ready => {
                    prev.set_state(ThreadState::Ready);
                    if prev.queued_in().is_none() {
                        st.enqueue(self.cpu, Arc::clone(&prev));
                    }
                }
                ThreadState::Waiting | ThreadState::Sleeping | ThreadState::Terminated => {}
            }
            let yielded = prev.flags().contains(ThreadFlags::YIELD_REQUESTED);
            prev.remove_flags(ThreadFlags::YIELD_REQUESTED);
            // Cleared under the lock so a concurrent `make_ready` request
            // is never lost.
            self.resched_pending.store(false, Ordering::Release);

            let next = st.select(&self.idle);
            next.set_state(ThreadState::Running);
            next.set_cpu(self.cpu);
            st.load.on_switch(platform.timestamp(), next.is_idle());

            ktrace!(
                "sched: cpu {} {} {} ({}) -> {}",
                self.cpu,
                if yielded { "yield" } else { "switch" },
                prev.id(),
                prev.state(),
                next.id()
            );

            let from: *const Thread = Arc::as_ptr(&prev);
            let to: *const Thread = Arc::as_ptr(&next);
            let space_change = (prev.pid() != next.pid()).then(|| next.address_space());
            st.current = next;
            let stale = st.last.replace(prev);
            (from, to, stale, space_change)
        };

        self.quantum_left.store(self.quantum_ticks, Ordering::Relaxed);

        if let Some(old) = stale {
            if old.state() == ThreadState::Terminated && !core::ptr::eq(Arc::as_ptr(&old), from) {
                kdebug!("sched: reclaiming thread {}", old.id());
                platform.reclaim_continuation(&old);
            }
            drop(old);
        }

        let flags = arch::irq_save();
        // A request that raced in after selection waits for the next tick.
        self.unmask();
        if let Some(space) = space_change {
            platform.activate_address_space(space);
        }
        if !core::ptr::eq(from, to) {
            // SAFETY: `from` is kept alive by `last` and `to` by `current`;
            // neither slot changes until this CPU reschedules again, which
            // cannot happen before the switch with interrupts disabled.
            // `from` is the context running here and `to` was just taken
            // out of the queues, so it is not running anywhere.
            unsafe { platform.switch_context(&*from, &*to) };
        }
        arch::irq_restore(flags);
    }

    /// Accounts one timer tick. Returns `true` if the tick rescheduled.
    pub(crate) fn timer_tick(&self, platform: &dyn Platform) -> bool {
        let ticks = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if ticks % u64::from(self.load_sample_ticks) == 0 {
            let permille = self.state.lock().load.sample(platform.timestamp());
            self.load_permille.store(permille, Ordering::Relaxed);
        }

        let left = self.quantum_left.load(Ordering::Relaxed);
        let expired = left <= 1;
        self.quantum_left
            .store(left.saturating_sub(1), Ordering::Relaxed);

        if !expired && !self.resched_pending() {
            return false;
        }
        if self.is_masked() {
            self.request_resched();
            return false;
        }
        self.reschedule(platform);
        true
    }

    /// Handles a reschedule IPI from another core.
    pub(crate) fn reschedule_ipi(&self, platform: &dyn Platform) -> bool {
        self.request_resched();
        if self.is_masked() {
            return false;
        }
        self.reschedule(platform);
        true
    }

    pub(crate) fn warn_if_masked(&self, what: &str) {
        if self.is_masked() {
            kwarn!("sched: {} with preemption masked on cpu {}", what, self.cpu);
        }
    }
}

/// Access to a core's queues while its lock is held.
pub(crate) struct CoreView<'a> {
    cpu: CpuId,
    state: &'a mut CoreState,
    resched_pending: &'a AtomicBool,
}

impl CoreView<'_> {
    /// See [`Scheduler::make_ready`].
    pub(crate) fn make_ready(&mut self, thread: Arc<Thread>) -> bool {
        thread.set_cpu(self.cpu);
        fence(Ordering::SeqCst);
        thread.set_state(ThreadState::Ready);
        let srt = thread.priority().is_srt();
        if thread.queued_in().is_none() {
            self.state.enqueue(self.cpu, thread);
        }
        let current = &self.state.current;
        let preempt = current.is_idle() || (srt && !current.priority().is_srt());
        if preempt {
            self.resched_pending.store(true, Ordering::Release);
        }
        preempt
    }

    /// Takes `thread` out of this core's queues if it is queued.
    pub(crate) fn dequeue(&mut self, thread: &Thread) -> bool {
        self.state.dequeue(thread)
    }

    /// Queues `thread` on this core.
    pub(crate) fn enqueue(&mut self, thread: Arc<Thread>) {
        self.state.enqueue(self.cpu, thread);
    }

    /// Returns `true` if `thread` is this core's `current`, whatever its
    /// state says. A waiter that was just handed a mutex is READY but still
    /// executing until it switches out.
    pub(crate) fn is_current(&self, thread: &Thread) -> bool {
        core::ptr::eq(Arc::as_ptr(&self.state.current), thread)
    }

    /// Returns `true` if `thread` is executing here or may still be
    /// switching out, so its continuation is in use.
    pub(crate) fn is_in_use(&self, thread: &Thread) -> bool {
        self.is_current(thread)
            || self
                .state
                .last
                .as_ref()
                .is_some_and(|last| core::ptr::eq(Arc::as_ptr(last), thread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;
    use crate::process::{AddressSpace, Process};
    use crate::thread::{Continuation, ThreadMeta};
    use quark_core::id::Pid;

    struct Fixture {
        platform: MockPlatform,
        process: Arc<Process>,
        sched: Scheduler,
        next_id: u64,
    }

    impl Fixture {
        fn new(config: SchedConfig) -> Self {
            let platform = MockPlatform::new(1);
            let process = Arc::new(Process::new(Pid::KERNEL, "kernel", AddressSpace::KERNEL));
            let idle = Arc::new(Thread::new_idle(ThreadId::new(0), CpuId::BSP, &process));
            let sched = Scheduler::new(CpuId::BSP, idle, &config, platform.timestamp());
            Self {
                platform,
                process,
                sched,
                next_id: 1,
            }
        }

        fn thread(&mut self, priority: Priority) -> Arc<Thread> {
            let id = ThreadId::new(self.next_id);
            self.next_id += 1;
            let meta = ThreadMeta::new("t").with_priority(priority);
            Arc::new(Thread::new(id, &meta, &self.process, Continuation::adopted()))
        }

        fn current_id(&self) -> ThreadId {
            self.sched.current().id()
        }

        fn reschedule(&self) {
            self.sched.reschedule(&self.platform);
        }
    }

    #[test]
    fn idle_is_adopted_as_current() {
        let fx = Fixture::new(SchedConfig::new());
        let current = fx.sched.current();
        assert!(current.is_idle());
        assert_eq!(current.state(), ThreadState::Running);
        assert!(!fx.sched.has_ready());
    }

    #[test]
    fn reschedule_with_nothing_ready_keeps_idle() {
        let fx = Fixture::new(SchedConfig::new());
        fx.reschedule();
        assert!(fx.sched.current().is_idle());
        assert!(fx.platform.switches().is_empty());
    }

    #[test]
    fn make_ready_on_idle_core_requests_preemption() {
        let mut fx = Fixture::new(SchedConfig::new());
        let t = fx.thread(Priority::NORMAL);
        assert!(fx.sched.make_ready(Arc::clone(&t)));
        assert!(fx.sched.resched_pending());
        assert_eq!(t.state(), ThreadState::Ready);

        fx.reschedule();
        assert_eq!(fx.current_id(), t.id());
        assert_eq!(t.state(), ThreadState::Running);
        assert!(!fx.sched.resched_pending());
        assert_eq!(fx.platform.switches(), [(ThreadId::new(0), t.id())]);
        // Idle went back to its queue.
        assert_eq!(fx.sched.snapshot().queued.as_slice(), [ThreadId::new(0)]);
    }

    #[test]
    fn running_thread_is_requeued_at_tail() {
        let mut fx = Fixture::new(SchedConfig::new());
        let a = fx.thread(Priority::NORMAL);
        let b = fx.thread(Priority::NORMAL);
        fx.sched.make_ready(Arc::clone(&a));
        fx.sched.make_ready(Arc::clone(&b));
        fx.reschedule();
        assert_eq!(fx.current_id(), a.id());
        fx.reschedule();
        assert_eq!(fx.current_id(), b.id());
        assert_eq!(a.state(), ThreadState::Ready);
        fx.reschedule();
        assert_eq!(fx.current_id(), a.id());
    }

    #[test]
    fn waiting_thread_is_not_requeued() {
        let mut fx = Fixture::new(SchedConfig::new());
        let a = fx.thread(Priority::NORMAL);
        fx.sched.make_ready(Arc::clone(&a));
        fx.reschedule();
        a.set_state(ThreadState::Waiting);
        fx.reschedule();
        assert!(fx.sched.current().is_idle());
        assert!(a.queued_in().is_none());
        assert_eq!(a.state(), ThreadState::Waiting);
    }

    #[test]
    fn early_wake_is_not_queued_twice() {
        let mut fx = Fixture::new(SchedConfig::new());
        let a = fx.thread(Priority::NORMAL);
        fx.sched.make_ready(Arc::clone(&a));
        fx.reschedule();
        // `a` starts blocking, then is woken before it switches out.
        a.set_state(ThreadState::Waiting);
        fx.sched.make_ready(Arc::clone(&a));
        fx.reschedule();
        // Selected again without a second queue entry.
        assert_eq!(fx.current_id(), a.id());
        assert_eq!(fx.sched.snapshot().queued.as_slice(), [ThreadId::new(0)]);
    }

    #[test]
    fn srt_arrival_preempts_at_next_tick() {
        let mut fx = Fixture::new(SchedConfig::new().with_quantum_ticks(100));
        let s = fx.thread(Priority::NORMAL);
        fx.sched.make_ready(Arc::clone(&s));
        fx.reschedule();
        assert_eq!(fx.current_id(), s.id());

        // Another STD thread does not preempt.
        let other = fx.thread(Priority::NORMAL);
        assert!(!fx.sched.make_ready(Arc::clone(&other)));
        assert!(!fx.sched.timer_tick(&fx.platform));
        assert_eq!(fx.current_id(), s.id());

        let r = fx.thread(Priority::Srt);
        assert!(fx.sched.make_ready(Arc::clone(&r)));
        assert!(fx.sched.timer_tick(&fx.platform));
        assert_eq!(fx.current_id(), r.id());
    }

    #[test]
    fn quantum_expiry_rotates() {
        let mut fx = Fixture::new(SchedConfig::new().with_quantum_ticks(3));
        let a = fx.thread(Priority::NORMAL);
        let b = fx.thread(Priority::NORMAL);
        fx.sched.make_ready(Arc::clone(&a));
        fx.sched.make_ready(Arc::clone(&b));
        fx.reschedule();
        assert_eq!(fx.current_id(), a.id());
        assert!(!fx.sched.timer_tick(&fx.platform));
        assert!(!fx.sched.timer_tick(&fx.platform));
        assert!(fx.sched.timer_tick(&fx.platform));
        assert_eq!(fx.current_id(), b.id());
        assert_eq!(fx.sched.ticks(), 3);
    }

    #[test]
    fn masked_tick_defers_until_unmask() {
        let mut fx = Fixture::new(SchedConfig::new().with_quantum_ticks(1));
        let a = fx.thread(Priority::NORMAL);
        fx.sched.make_ready(Arc::clone(&a));
        fx.sched.mask();
        assert!(!fx.sched.timer_tick(&fx.platform));
        assert!(fx.sched.current().is_idle());
        assert!(fx.sched.resched_pending());
        assert!(fx.sched.unmask());
    }

    #[test]
    fn nested_mask_defers_to_outermost_unmask() {
        let fx = Fixture::new(SchedConfig::new());
        fx.sched.mask();
        fx.sched.mask();
        fx.sched.request_resched();
        assert!(!fx.sched.unmask());
        assert!(fx.sched.is_masked());
        assert!(fx.sched.unmask());
        assert!(!fx.sched.is_masked());
    }

    #[test]
    #[should_panic(expected = "unbalanced preemption unmask")]
    fn unbalanced_unmask_panics() {
        let fx = Fixture::new(SchedConfig::new());
        fx.sched.unmask();
    }

    #[test]
    fn ipi_reschedules_unless_masked() {
        let mut fx = Fixture::new(SchedConfig::new());
        let a = fx.thread(Priority::NORMAL);
        fx.sched.make_ready(Arc::clone(&a));
        fx.sched.mask();
        assert!(!fx.sched.reschedule_ipi(&fx.platform));
        fx.sched.unmask();
        assert!(fx.sched.reschedule_ipi(&fx.platform));
        assert_eq!(fx.current_id(), a.id());
    }

    #[test]
    fn reprioritize_moves_between_queues() {
        let mut fx = Fixture::new(SchedConfig::new());
        let low = fx.thread(Priority::LOWEST_STD);
        let high = fx.thread(Priority::HIGHEST_STD);
        fx.sched.make_ready(Arc::clone(&high));
        fx.reschedule();
        assert_eq!(fx.current_id(), high.id());

        fx.sched.make_ready(Arc::clone(&low));
        assert_eq!(fx.sched.reprioritize(&low, Priority::Srt), Some(true));
        let snap = fx.sched.snapshot();
        assert_eq!(snap.srt_len, 1);
        assert_eq!(snap.std_len[STD_LEVELS - 1], 0);
        assert_eq!(low.queued_in().map(|s| s.priority), Some(Priority::Srt));

        assert!(fx.sched.timer_tick(&fx.platform));
        assert_eq!(fx.current_id(), low.id());
    }

    #[test]
    fn dequeue_under_lock_unlinks_thread() {
        let mut fx = Fixture::new(SchedConfig::new());
        let a = fx.thread(Priority::NORMAL);
        fx.sched.make_ready(Arc::clone(&a));
        let idle = Arc::clone(fx.sched.idle_thread());
        fx.sched.with_locked(|core| {
            assert!(core.dequeue(&a));
            assert!(!core.dequeue(&a));
            assert!(core.is_in_use(&idle));
            assert!(!core.is_in_use(&a));
        });
        assert!(a.queued_in().is_none());
        assert!(!fx.sched.has_ready());
    }

    #[test]
    fn terminated_thread_is_reclaimed_after_switching_out() {
        let mut fx = Fixture::new(SchedConfig::new());
        let a = fx.thread(Priority::NORMAL);
        fx.sched.make_ready(Arc::clone(&a));
        fx.reschedule();
        a.set_state(ThreadState::Terminated);
        fx.reschedule();
        assert!(fx.sched.current().is_idle());
        assert!(fx.platform.reclaimed().is_empty());
        // The next switch retires it.
        fx.reschedule();
        assert_eq!(fx.platform.reclaimed(), [a.id()]);
    }

    #[test]
    fn snapshot_is_bounded() {
        let mut fx = Fixture::new(SchedConfig::new());
        for _ in 0..(SNAPSHOT_DEPTH + 4) {
            let t = fx.thread(Priority::NORMAL);
            fx.sched.make_ready(t);
        }
        let snap = fx.sched.snapshot();
        assert_eq!(snap.queued.len(), SNAPSHOT_DEPTH);
        assert_eq!(snap.std_len[4], SNAPSHOT_DEPTH + 4);
        assert!(snap.resched_pending);
    }

    #[test]
    fn load_is_sampled_every_window() {
        let mut fx = Fixture::new(SchedConfig::new().with_load_sample_ticks(2));
        let a = fx.thread(Priority::NORMAL);
        fx.sched.make_ready(Arc::clone(&a));
        fx.reschedule();
        fx.platform.set_clock(100);
        fx.sched.timer_tick(&fx.platform);
        fx.sched.timer_tick(&fx.platform);
        assert_eq!(fx.sched.load_permille(), 1000);
    }
}
