//! Scripted platform for unit tests.
//!
//! `switch_context` only records the switch and returns, so the test body
//! keeps executing as whichever thread the scheduler just made current.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::vec::Vec;

use quark_core::id::{CpuId, ThreadId};

use super::Platform;
use crate::process::AddressSpace;
use crate::thread::{Continuation, Thread, ThreadEntry};

/// Records every interaction the scheduler has with the machine.
pub(crate) struct MockPlatform {
    cpus: usize,
    current: AtomicU32,
    clock: AtomicU64,
    fail_prepare: AtomicBool,
    next_stack: AtomicUsize,
    switches: Mutex<Vec<(ThreadId, ThreadId)>>,
    ipis: Mutex<Vec<CpuId>>,
    spaces: Mutex<Vec<AddressSpace>>,
    reclaimed: Mutex<Vec<ThreadId>>,
}

impl MockPlatform {
    pub(crate) fn new(cpus: usize) -> Self {
        Self {
            cpus,
            current: AtomicU32::new(0),
            clock: AtomicU64::new(0),
            fail_prepare: AtomicBool::new(false),
            next_stack: AtomicUsize::new(0x10_0000),
            switches: Mutex::new(Vec::new()),
            ipis: Mutex::new(Vec::new()),
            spaces: Mutex::new(Vec::new()),
            reclaimed: Mutex::new(Vec::new()),
        }
    }

    /// Pretends the caller now runs on `cpu`.
    pub(crate) fn set_cpu(&self, cpu: CpuId) {
        self.current.store(cpu.as_u32(), Ordering::Relaxed);
    }

    pub(crate) fn set_clock(&self, now: u64) {
        self.clock.store(now, Ordering::Relaxed);
    }

    pub(crate) fn fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::Relaxed);
    }

    pub(crate) fn switches(&self) -> Vec<(ThreadId, ThreadId)> {
        self.switches.lock().unwrap().clone()
    }

    pub(crate) fn ipis(&self) -> Vec<CpuId> {
        self.ipis.lock().unwrap().clone()
    }

    pub(crate) fn spaces(&self) -> Vec<AddressSpace> {
        self.spaces.lock().unwrap().clone()
    }

    pub(crate) fn reclaimed(&self) -> Vec<ThreadId> {
        self.reclaimed.lock().unwrap().clone()
    }
}

impl Platform for MockPlatform {
    fn current_cpu(&self) -> CpuId {
        CpuId::new(self.current.load(Ordering::Relaxed))
    }

    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn prepare_continuation(
        &self,
        entry: ThreadEntry,
        arg: usize,
        stack_size: usize,
    ) -> Option<Continuation> {
        if self.fail_prepare.load(Ordering::Relaxed) {
            return None;
        }
        let base = self.next_stack.fetch_add(stack_size, Ordering::Relaxed);
        Some(Continuation::new(base + stack_size, 0).with_entry(entry, arg))
    }

    unsafe fn switch_context(&self, from: &Thread, to: &Thread) {
        self.switches.lock().unwrap().push((from.id(), to.id()));
    }

    fn activate_address_space(&self, space: AddressSpace) {
        self.spaces.lock().unwrap().push(space);
    }

    fn send_reschedule_ipi(&self, cpu: CpuId) {
        self.ipis.lock().unwrap().push(cpu);
    }

    fn timestamp(&self) -> u64 {
        self.clock.load(Ordering::Relaxed)
    }

    fn wait_for_interrupt(&self) {}

    fn reclaim_continuation(&self, thread: &Thread) {
        self.reclaimed.lock().unwrap().push(thread.id());
    }
}
