//! Host platform for integration tests.
//!
//! Every kernel thread runs on its own OS thread, all of them on one
//! simulated CPU. A context switch opens the incoming thread's gate and
//! parks the outgoing one on its own, so exactly one thread executes at a
//! time and it is always the scheduler's `current`. The test body itself is
//! the idle thread.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use quark_sched::{
    AddressSpace, Continuation, CpuId, Kernel, Platform, SchedConfig, Thread, ThreadEntry,
    ThreadId,
};

/// One-shot wake-up flag of a parked thread.
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_one();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
        *open = false;
    }
}

/// Single-CPU platform handing a baton between OS threads.
#[derive(Default)]
pub struct BatonPlatform {
    gates: Mutex<HashMap<ThreadId, Arc<Gate>>>,
    switches: AtomicUsize,
}

impl BatonPlatform {
    fn gate(&self, id: ThreadId) -> Arc<Gate> {
        Arc::clone(self.gates.lock().unwrap().entry(id).or_default())
    }

    /// Returns the number of continuation swaps so far.
    pub fn switches(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }
}

impl Platform for BatonPlatform {
    fn current_cpu(&self) -> CpuId {
        CpuId::BSP
    }

    fn cpu_count(&self) -> usize {
        1
    }

    fn prepare_continuation(
        &self,
        entry: ThreadEntry,
        arg: usize,
        _stack_size: usize,
    ) -> Option<Continuation> {
        Some(Continuation::new(0, 0).with_entry(entry, arg))
    }

    unsafe fn switch_context(&self, from: &Thread, to: &Thread) {
        self.switches.fetch_add(1, Ordering::SeqCst);
        let to_gate = self.gate(to.id());
        // SAFETY: `to` is not running, so nothing else reads its
        // continuation while the first switch to it takes the entry point.
        let start = unsafe {
            let cont = &mut *to.continuation();
            cont.entry.take().map(|entry| (entry, cont.arg))
        };
        if let Some((entry, arg)) = start {
            let gate = Arc::clone(&to_gate);
            std::thread::spawn(move || {
                gate.wait();
                entry(arg);
            });
        }
        let from_gate = self.gate(from.id());
        to_gate.open();
        from_gate.wait();
    }

    fn activate_address_space(&self, _space: AddressSpace) {}

    fn send_reschedule_ipi(&self, _cpu: CpuId) {}

    fn timestamp(&self) -> u64 {
        0
    }

    fn wait_for_interrupt(&self) {}
}

/// Builds a kernel on a fresh baton platform. Both live for the rest of
/// the test binary, as kernel threads that exited stay parked.
pub fn boot() -> (&'static Kernel, Arc<BatonPlatform>) {
    let platform = Arc::new(BatonPlatform::default());
    let kernel = Kernel::new(SchedConfig::new(), Arc::clone(&platform) as Arc<dyn Platform>)
        .unwrap();
    (Box::leak(Box::new(kernel)), platform)
}

/// Leaks `value` and returns it as a thread argument.
pub fn leak_arg<T>(value: T) -> usize {
    Box::leak(Box::new(value)) as *mut T as usize
}

/// Recovers an argument made by [`leak_arg`].
///
/// # Safety
///
/// `arg` must come from `leak_arg::<T>`.
pub unsafe fn arg<T>(arg: usize) -> &'static T {
    // SAFETY: leaked boxes are never freed.
    unsafe { &*(arg as *const T) }
}
