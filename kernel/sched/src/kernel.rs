//! The scheduling core as one value.
//!
//! [`Kernel`] owns one [`Scheduler`] per CPU, the process table, the mutex
//! table and the waiting registry, and exposes every entry point the rest
//! of the kernel calls. All entry points act on the calling CPU as reported
//! by the [`Platform`], except the cross-core ones (`run`, `wake`, mutex
//! release) which reach the target core through its scheduler lock.
//!
//! The calling context of [`Kernel::new`] on each CPU is that CPU's idle
//! thread: it is running when the kernel is created, and [`Kernel::idle_loop`]
//! is what it should execute once boot work is done.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use planck_noalloc::vec::ArrayVec;
use quark_core::id::{CpuId, Pid, ThreadId};
use quark_core::sync::SpinLock;
use quark_core::{kdebug, kinfo, kwarn};

use crate::config::{MAX_CPUS, SchedConfig};
use crate::error::SchedError;
use crate::mutex::{AcquireMode, Acquired, MutexId, MutexState, MutexTable, WaitRecord, WaitRegistry};
use crate::platform::Platform;
use crate::process::{AddressSpace, Process};
use crate::scheduler::{CoreSnapshot, Scheduler};
use crate::thread::{Priority, Thread, ThreadEntry, ThreadFlags, ThreadMeta, ThreadState};

/// Scheduler, process and mutex state of the whole machine.
pub struct Kernel {
    config: SchedConfig,
    platform: Arc<dyn Platform>,
    cores: Vec<Scheduler>,
    kernel_process: Arc<Process>,
    processes: SpinLock<BTreeMap<Pid, Arc<Process>>>,
    next_tid: AtomicU64,
    next_pid: AtomicU32,
    /// Non-idle threads created and not yet terminated.
    live_threads: AtomicUsize,
    mutexes: MutexTable,
    waiting: WaitRegistry,
    placement_cursor: AtomicUsize,
}

impl Kernel {
    /// Builds the scheduling core for every CPU the platform reports.
    ///
    /// Creates the kernel process (pid 0) and one idle thread per CPU,
    /// which becomes that CPU's running thread.
    ///
    /// # Errors
    ///
    /// [`SchedError::InvalidArgument`] if `config` does not validate or the
    /// CPU count is zero or above [`MAX_CPUS`].
    pub fn new(config: SchedConfig, platform: Arc<dyn Platform>) -> Result<Self, SchedError> {
        config.validate()?;
        let cpu_count = platform.cpu_count();
        if cpu_count == 0 || cpu_count > MAX_CPUS {
            kwarn!("sched: unsupported cpu count {}", cpu_count);
            return Err(SchedError::InvalidArgument);
        }

        let kernel_process = Arc::new(Process::new(Pid::KERNEL, "kernel", AddressSpace::KERNEL));
        let mut cores = Vec::new();
        cores
            .try_reserve_exact(cpu_count)
            .map_err(|_| SchedError::OutOfMemory)?;
        let now = platform.timestamp();
        let mut next_tid = 0u64;
        for index in 0..cpu_count {
            let cpu = CpuId::new(u32::try_from(index).map_err(|_| SchedError::InvalidArgument)?);
            let idle = Arc::new(Thread::new_idle(
                ThreadId::new(next_tid),
                cpu,
                &kernel_process,
            ));
            next_tid += 1;
            kernel_process.add_thread(Arc::clone(&idle))?;
            cores.push(Scheduler::new(cpu, idle, &config, now));
        }

        let mut processes = BTreeMap::new();
        processes.insert(Pid::KERNEL, Arc::clone(&kernel_process));

        kinfo!(
            "sched: {} cpus, quantum {} ticks, {:?} placement",
            cpu_count,
            config.quantum_ticks,
            config.placement
        );

        Ok(Self {
            mutexes: MutexTable::new(config.max_mutexes),
            config,
            platform,
            cores,
            kernel_process,
            processes: SpinLock::named("sched.processes", processes),
            next_tid: AtomicU64::new(next_tid),
            next_pid: AtomicU32::new(Pid::KERNEL.as_u32() + 1),
            live_threads: AtomicUsize::new(0),
            waiting: WaitRegistry::new(),
            placement_cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the configuration the kernel was built with.
    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    /// Returns the platform.
    pub fn platform(&self) -> &dyn Platform {
        &*self.platform
    }

    /// Returns the number of CPUs.
    pub fn cpu_count(&self) -> usize {
        self.cores.len()
    }

    /// Returns the scheduler of `cpu`.
    pub fn core(&self, cpu: CpuId) -> Option<&Scheduler> {
        self.cores.get(cpu.as_usize())
    }

    /// Returns the scheduler of the calling CPU.
    ///
    /// # Panics
    ///
    /// If the platform reports a CPU it did not count at construction.
    pub fn local(&self) -> &Scheduler {
        let cpu = self.platform.current_cpu();
        match self.cores.get(cpu.as_usize()) {
            Some(core) => core,
            None => panic!("sched: cpu {} has no scheduler", cpu),
        }
    }

    /// Returns the thread running on the calling CPU.
    pub fn current_thread(&self) -> Arc<Thread> {
        self.local().current()
    }

    /// Returns the kernel pseudo-process.
    pub fn kernel_process(&self) -> &Arc<Process> {
        &self.kernel_process
    }

    // -----------------------------------------------------------------------
    // Processes and threads
    // -----------------------------------------------------------------------

    /// Registers a new process running in `space`.
    pub fn create_process(
        &self,
        name: &'static str,
        space: AddressSpace,
    ) -> Arc<Process> {
        let pid = Pid::new(self.next_pid.fetch_add(1, Ordering::Relaxed));
        let process = Arc::new(Process::new(pid, name, space));
        self.processes
            .lock_irqsave()
            .insert(pid, Arc::clone(&process));
        kdebug!("sched: created process {} '{}'", pid, name);
        process
    }

    /// Looks up a live process.
    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.lock_irqsave().get(&pid).cloned()
    }

    /// Creates a READY thread in `process` that will start at `entry(arg)`.
    ///
    /// The thread is not queued anywhere until it is passed to
    /// [`Kernel::run`].
    ///
    /// # Errors
    ///
    /// - [`SchedError::InvalidArgument`] for the idle priority, an out of
    ///   range STD level or affinity, or a process that was torn down.
    /// - [`SchedError::OutOfMemory`] if the thread limit is reached or the
    ///   platform cannot provide a stack.
    pub fn create_thread(
        &self,
        process: &Arc<Process>,
        meta: ThreadMeta,
        entry: ThreadEntry,
        arg: usize,
    ) -> Result<Arc<Thread>, SchedError> {
        meta.priority.validate()?;
        if meta.affinity.is_some_and(|cpu| cpu.as_usize() >= self.cores.len()) {
            return Err(SchedError::InvalidArgument);
        }

        let max = self.config.max_threads;
        if self
            .live_threads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_err()
        {
            kwarn!("sched: thread limit {} reached", max);
            return Err(SchedError::OutOfMemory);
        }

        let stack_size = meta.stack_size.unwrap_or(self.config.kernel_stack_size);
        let Some(continuation) = self.platform.prepare_continuation(entry, arg, stack_size) else {
            self.live_threads.fetch_sub(1, Ordering::AcqRel);
            kwarn!("sched: no stack for thread '{}'", meta.name);
            return Err(SchedError::OutOfMemory);
        };

        let id = ThreadId::new(self.next_tid.fetch_add(1, Ordering::Relaxed));
        let thread = Arc::new(Thread::new(id, &meta, process, continuation));

        let attached = {
            let table = self.processes.lock_irqsave();
            if table.contains_key(&process.pid()) {
                process.add_thread(Arc::clone(&thread))
            } else {
                Err(SchedError::InvalidArgument)
            }
        };
        if let Err(err) = attached {
            self.live_threads.fetch_sub(1, Ordering::AcqRel);
            thread.set_state(ThreadState::Terminated);
            self.platform.reclaim_continuation(&thread);
            return Err(err);
        }

        kdebug!(
            "sched: created thread {} '{}' in process {} ({})",
            id,
            meta.name,
            process.pid(),
            meta.priority
        );
        Ok(thread)
    }

    /// Hands a freshly created thread to a scheduler.
    ///
    /// The core is the thread's affinity if it has one, otherwise the one
    /// chosen by the configured [`Placement`](crate::Placement). Returns
    /// that core.
    ///
    /// # Errors
    ///
    /// [`SchedError::InvalidArgument`] if the thread is an idle thread, was
    /// already run, or is no longer READY.
    pub fn run(&self, thread: &Arc<Thread>) -> Result<CpuId, SchedError> {
        if thread.is_idle() {
            return Err(SchedError::InvalidArgument);
        }
        let before = thread.insert_flags(ThreadFlags::STARTED);
        if before.contains(ThreadFlags::STARTED) || thread.state() != ThreadState::Ready {
            return Err(SchedError::InvalidArgument);
        }

        let cpu = match thread.affinity() {
            Some(cpu) => cpu,
            None => self.place(),
        };
        self.make_ready_on(cpu, Arc::clone(thread));
        kdebug!("sched: thread {} placed on cpu {}", thread.id(), cpu);
        Ok(cpu)
    }

    fn place(&self) -> CpuId {
        let mut loads = ArrayVec::<u32, MAX_CPUS>::new();
        for core in &self.cores {
            if loads.try_push(core.load_permille()).is_err() {
                break;
            }
        }
        self.config.placement.choose(
            self.platform.current_cpu(),
            loads.as_slice(),
            &self.placement_cursor,
        )
    }

    /// Makes `thread` READY on `cpu` and kicks that core if it should
    /// preempt.
    fn make_ready_on(&self, cpu: CpuId, thread: Arc<Thread>) {
        let Some(core) = self.core(cpu) else {
            kwarn!("sched: thread {} bound to missing cpu {}", thread.id(), cpu);
            return;
        };
        if core.make_ready(thread) && cpu != self.platform.current_cpu() {
            self.platform.send_reschedule_ipi(cpu);
        }
    }

    /// Reclassifies `thread`, moving it between queues if it is queued.
    ///
    /// # Errors
    ///
    /// [`SchedError::InvalidArgument`] for the idle priority, an invalid
    /// STD level, an idle thread or a terminated one.
    pub fn set_priority(&self, thread: &Arc<Thread>, priority: Priority) -> Result<(), SchedError> {
        let priority = priority.validate()?;
        if thread.is_idle() || thread.state() == ThreadState::Terminated {
            return Err(SchedError::InvalidArgument);
        }
        loop {
            let cpu = thread.cpu();
            let core = self.core(cpu).ok_or(SchedError::InvalidArgument)?;
            // `None`: a concurrent `run` placed the thread elsewhere.
            if let Some(preempt) = core.reprioritize(thread, priority) {
                if preempt && cpu != self.platform.current_cpu() {
                    self.platform.send_reschedule_ipi(cpu);
                }
                return Ok(());
            }
        }
    }

    /// Terminates `thread`.
    ///
    /// The thread leaves its scheduler queue and its process. Returns the
    /// process if this left it without threads; it has been removed from
    /// the process table and the caller tears it down. The kernel process
    /// is never returned.
    ///
    /// # Errors
    ///
    /// - [`SchedError::InvalidArgument`] for an idle thread, a WAITING
    ///   thread, or one already terminated.
    /// - [`SchedError::Busy`] if the thread is executing on another CPU,
    ///   whether RUNNING or already made READY again.
    pub fn terminate(&self, thread: &Arc<Thread>) -> Result<Option<Arc<Process>>, SchedError> {
        if thread.is_idle() {
            return Err(SchedError::InvalidArgument);
        }
        let is_caller = Arc::ptr_eq(&self.current_thread(), thread);
        let core = self.core(thread.cpu()).ok_or(SchedError::InvalidArgument)?;
        let in_use = core.with_locked(|core| {
            match thread.state() {
                ThreadState::Waiting | ThreadState::Terminated => {
                    return Err(SchedError::InvalidArgument);
                }
                ThreadState::Running | ThreadState::Ready | ThreadState::Sleeping => {}
            }
            // Covers a waiter that was handed a mutex and made READY but
            // has not switched out yet.
            if !is_caller && core.is_current(thread) {
                return Err(SchedError::Busy);
            }
            core.dequeue(thread);
            thread.set_state(ThreadState::Terminated);
            Ok(core.is_in_use(thread))
        })?;

        // Otherwise the scheduler reclaims it once it has switched out.
        if !in_use {
            self.platform.reclaim_continuation(thread);
        }
        self.live_threads.fetch_sub(1, Ordering::AcqRel);
        kdebug!("sched: terminated thread {} '{}'", thread.id(), thread.name());

        Ok(thread
            .process()
            .and_then(|process| self.detach(&process, thread.id())))
    }

    fn detach(&self, process: &Arc<Process>, id: ThreadId) -> Option<Arc<Process>> {
        let mut table = self.processes.lock_irqsave();
        let left = process.remove_thread(id)?;
        if left > 0 || process.is_kernel() {
            return None;
        }
        let removed = table.remove(&process.pid());
        drop(table);
        kdebug!("sched: process {} has no threads left", process.pid());
        removed
    }

    /// Terminates the calling thread and switches away from it for good.
    ///
    /// Called from an idle thread it only enters [`Kernel::idle_loop`].
    pub fn exit_current(&self) -> ! {
        {
            let current = self.current_thread();
            if let Err(err) = self.terminate(&current) {
                kwarn!("sched: exit of thread {} failed: {}", current.id(), err);
            }
        }
        self.local().reschedule(&*self.platform);
        self.idle_loop()
    }

    // -----------------------------------------------------------------------
    // Suspension
    // -----------------------------------------------------------------------

    /// Gives up the CPU. Returns when the caller is next selected.
    pub fn yield_now(&self) {
        let core = self.local();
        core.warn_if_masked("yield");
        core.current().insert_flags(ThreadFlags::YIELD_REQUESTED);
        core.reschedule(&*self.platform);
    }

    /// Puts the calling thread to sleep until [`Kernel::wake`].
    ///
    /// # Errors
    ///
    /// [`SchedError::InvalidArgument`] when called from an idle thread.
    pub fn sleep_current(&self) -> Result<(), SchedError> {
        let core = self.local();
        core.warn_if_masked("sleep");
        {
            let current = core.current();
            if current.is_idle() {
                return Err(SchedError::InvalidArgument);
            }
            core.with_locked(|_| current.set_state(ThreadState::Sleeping));
        }
        self.suspend_while(ThreadState::Sleeping);
        Ok(())
    }

    /// Makes a SLEEPING thread READY on its core.
    ///
    /// # Errors
    ///
    /// [`SchedError::InvalidArgument`] if the thread is not SLEEPING. A wake
    /// that arrives before the thread went to sleep is not remembered.
    pub fn wake(&self, thread: &Arc<Thread>) -> Result<(), SchedError> {
        if thread.is_idle() {
            return Err(SchedError::InvalidArgument);
        }
        let cpu = thread.cpu();
        let core = self.core(cpu).ok_or(SchedError::InvalidArgument)?;
        let preempt = core
            .with_locked(|core| {
                (thread.state() == ThreadState::Sleeping).then(|| core.make_ready(Arc::clone(thread)))
            })
            .ok_or(SchedError::InvalidArgument)?;
        if preempt && cpu != self.platform.current_cpu() {
            self.platform.send_reschedule_ipi(cpu);
        }
        Ok(())
    }

    /// Reschedules at least once, then until the caller has left `state`.
    ///
    /// Holds no thread reference across the switch: a thread terminated
    /// while suspended never returns here.
    fn suspend_while(&self, state: ThreadState) {
        let core = self.local();
        loop {
            core.reschedule(&*self.platform);
            if self.current_thread().state() != state {
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Preemption
    // -----------------------------------------------------------------------

    /// Masks preemption on the calling CPU. Nests.
    pub fn mask(&self) {
        self.local().mask();
    }

    /// Drops one mask level, running a deferred reschedule if this was the
    /// outermost one.
    ///
    /// # Panics
    ///
    /// If preemption is not masked.
    pub fn unmask(&self) {
        let core = self.local();
        if core.unmask() {
            core.reschedule(&*self.platform);
        }
    }

    /// Masks preemption on the calling CPU until the guard drops.
    pub fn preempt_guard(&self) -> PreemptGuard<'_> {
        let core = self.local();
        core.mask();
        PreemptGuard {
            kernel: self,
            core,
            _not_send: PhantomData,
        }
    }

    /// Timer interrupt entry point for the calling CPU. Returns `true` if
    /// the tick switched threads.
    pub fn timer_tick(&self) -> bool {
        self.local().timer_tick(&*self.platform)
    }

    /// Reschedule IPI entry point for the calling CPU.
    pub fn reschedule_ipi(&self) -> bool {
        self.local().reschedule_ipi(&*self.platform)
    }

    /// Body of an idle thread: run whatever becomes ready, otherwise wait
    /// for an interrupt.
    pub fn idle_loop(&self) -> ! {
        loop {
            let core = self.local();
            if core.has_ready() || core.resched_pending() {
                core.reschedule(&*self.platform);
            } else {
                self.platform.wait_for_interrupt();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Mutexes
    // -----------------------------------------------------------------------

    /// Creates a FREE mutex.
    ///
    /// # Errors
    ///
    /// [`SchedError::OutOfMemory`] if the mutex table is full.
    pub fn mutex_create(&self) -> Result<MutexId, SchedError> {
        let id = self.mutexes.create()?;
        kdebug!("mutex {}: created", id);
        Ok(id)
    }

    /// Acquires mutex `id` for the calling thread.
    ///
    /// In blocking mode the caller is suspended until the mutex is handed
    /// to it; it owns the mutex when this returns.
    ///
    /// # Errors
    ///
    /// - [`SchedError::WouldBlock`] in non-blocking mode if the mutex is held.
    /// - [`SchedError::InvalidArgument`] for a stale handle, or a blocking
    ///   acquisition from an idle thread.
    /// - [`SchedError::OutOfMemory`] if the wait queue cannot grow.
    pub fn mutex_acquire(&self, id: MutexId, mode: AcquireMode) -> Result<(), SchedError> {
        let outcome = {
            let mutex = self.mutexes.get(id)?;
            let current = self.current_thread();
            mutex.acquire_or_enqueue(&current, mode, &self.waiting)?
        };
        if outcome == Acquired::Enqueued {
            self.local().warn_if_masked("blocking acquire");
            self.suspend_while(ThreadState::Waiting);
        }
        Ok(())
    }

    /// Releases mutex `id`, handing it to the longest waiter if any.
    ///
    /// # Errors
    ///
    /// [`SchedError::InvalidArgument`] for a stale handle or a FREE mutex.
    pub fn mutex_release(&self, id: MutexId) -> Result<(), SchedError> {
        let mutex = self.mutexes.get(id)?;
        let _guard = self.preempt_guard();
        if let Some(next) = mutex.release_to_next(&self.waiting)? {
            let cpu = next.cpu();
            self.make_ready_on(cpu, next);
        }
        Ok(())
    }

    /// Destroys mutex `id`.
    ///
    /// # Errors
    ///
    /// [`SchedError::Busy`] if it is held, [`SchedError::InvalidArgument`]
    /// for a stale handle.
    pub fn mutex_destroy(&self, id: MutexId) -> Result<(), SchedError> {
        self.mutexes.destroy(id)?;
        kdebug!("mutex {}: destroyed", id);
        Ok(())
    }

    /// Returns the state of mutex `id`.
    ///
    /// # Errors
    ///
    /// [`SchedError::InvalidArgument`] for a stale handle, as for the
    /// other two queries below.
    pub fn mutex_state(&self, id: MutexId) -> Result<MutexState, SchedError> {
        Ok(self.mutexes.get(id)?.state())
    }

    /// Returns the owner of mutex `id`.
    pub fn mutex_owner(&self, id: MutexId) -> Result<Option<ThreadId>, SchedError> {
        Ok(self.mutexes.get(id)?.owner())
    }

    /// Returns the waiters of mutex `id` in wake order.
    pub fn mutex_waiters(&self, id: MutexId) -> Result<Vec<ThreadId>, SchedError> {
        Ok(self.mutexes.get(id)?.waiters())
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Returns the load of `cpu` over its last sample window, per mille.
    pub fn load_permille(&self, cpu: CpuId) -> Option<u32> {
        self.core(cpu).map(Scheduler::load_permille)
    }

    /// Captures the queue state of `cpu`.
    pub fn snapshot(&self, cpu: CpuId) -> Option<CoreSnapshot> {
        self.core(cpu).map(Scheduler::snapshot)
    }

    /// Returns every thread blocked on a mutex, in block order.
    pub fn waiting_threads(&self) -> Vec<WaitRecord> {
        self.waiting.snapshot()
    }

    /// Returns the number of non-idle threads not yet terminated.
    pub fn live_threads(&self) -> usize {
        self.live_threads.load(Ordering::Acquire)
    }
}

/// Keeps preemption masked on one CPU while alive.
///
/// Dropping the guard runs a reschedule that was deferred meanwhile. The
/// guard is bound to its CPU and cannot be sent to another thread.
pub struct PreemptGuard<'a> {
    kernel: &'a Kernel,
    core: &'a Scheduler,
    _not_send: PhantomData<*const ()>,
}

impl Drop for PreemptGuard<'_> {
    fn drop(&mut self) {
        if self.core.unmask() {
            self.core.reschedule(&*self.kernel.platform);
        }
    }
}
