//! Interrupt-state control and spin hints for the current CPU.
//!
//! On kernel targets these wrap `pushfq`/`cli`/`sti` (x86_64) and `DAIF`
//! (aarch64). Host unit tests get a per-thread software interrupt flag so
//! that lock code can be checked for correct save/restore. Other host builds
//! treat interrupt control as a no-op.

/// Saves the current interrupt state and disables interrupts.
///
/// The returned value is opaque and must be passed back to [`irq_restore`]
/// on the same CPU.
#[inline]
pub fn irq_save() -> u64 {
    imp::save_flags_and_cli()
}

/// Restores an interrupt state previously returned by [`irq_save`].
#[inline]
pub fn irq_restore(flags: u64) {
    imp::restore_flags(flags);
}

/// Returns `true` if interrupts are currently enabled on this CPU.
#[inline]
pub fn interrupts_enabled() -> bool {
    imp::interrupts_enabled()
}

/// Unconditionally enables interrupts on this CPU.
///
/// Used by thread trampolines, which start with the interrupt state of the
/// context switch that first resumed them.
#[inline]
pub fn enable_interrupts() {
    imp::enable();
}

/// Hint issued inside every busy-wait loop.
#[inline]
pub fn cpu_relax() {
    #[cfg(all(test, shuttle))]
    shuttle::thread::yield_now();
    #[cfg(not(all(test, shuttle)))]
    core::hint::spin_loop();
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
mod imp {
    const RFLAGS_IF: u64 = 1 << 9;

    #[inline]
    pub(super) fn save_flags_and_cli() -> u64 {
        let flags: u64;
        // SAFETY: Reading RFLAGS and disabling interrupts is safe in kernel mode.
        unsafe {
            core::arch::asm!(
                "pushfq",
                "pop {}",
                "cli",
                out(reg) flags,
                options(nomem),
            );
        }
        flags
    }

    #[inline]
    pub(super) fn restore_flags(flags: u64) {
        if flags & RFLAGS_IF != 0 {
            enable();
        }
    }

    #[inline]
    pub(super) fn interrupts_enabled() -> bool {
        let flags: u64;
        // SAFETY: Reading RFLAGS has no side effects.
        unsafe {
            core::arch::asm!("pushfq", "pop {}", out(reg) flags, options(nomem, preserves_flags));
        }
        flags & RFLAGS_IF != 0
    }

    #[inline]
    pub(super) fn enable() {
        // SAFETY: Re-enabling interrupts is safe once the IDT is installed,
        // which happens before any scheduler code runs.
        unsafe {
            core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
        }
    }
}

#[cfg(all(target_os = "none", target_arch = "aarch64"))]
mod imp {
    /// DAIF.I: IRQ mask bit.
    const DAIF_I: u64 = 1 << 7;

    #[inline]
    pub(super) fn save_flags_and_cli() -> u64 {
        let flags: u64;
        // SAFETY: Reading DAIF and masking interrupts is safe in kernel mode.
        unsafe {
            core::arch::asm!(
                "mrs {}, DAIF",
                "msr DAIFSet, #0xf",
                out(reg) flags,
                options(nomem),
            );
        }
        flags
    }

    #[inline]
    pub(super) fn restore_flags(flags: u64) {
        // SAFETY: Restoring DAIF is safe; we are restoring a previous state.
        unsafe {
            core::arch::asm!(
                "msr DAIF, {}",
                in(reg) flags,
                options(nomem, nostack, preserves_flags),
            );
        }
    }

    #[inline]
    pub(super) fn interrupts_enabled() -> bool {
        let flags: u64;
        // SAFETY: Reading DAIF has no side effects.
        unsafe {
            core::arch::asm!("mrs {}, DAIF", out(reg) flags, options(nomem, nostack, preserves_flags));
        }
        flags & DAIF_I == 0
    }

    #[inline]
    pub(super) fn enable() {
        // SAFETY: Unmasking IRQs is safe once exception vectors are installed.
        unsafe {
            core::arch::asm!("msr DAIFClr, #0x2", options(nomem, nostack, preserves_flags));
        }
    }
}

#[cfg(all(not(target_os = "none"), test))]
mod imp {
    use std::cell::Cell;

    const SOFT_IF: u64 = 1;

    std::thread_local! {
        static ENABLED: Cell<bool> = const { Cell::new(true) };
    }

    pub(super) fn save_flags_and_cli() -> u64 {
        let was = ENABLED.get();
        ENABLED.set(false);
        if was { SOFT_IF } else { 0 }
    }

    pub(super) fn restore_flags(flags: u64) {
        if flags & SOFT_IF != 0 {
            ENABLED.set(true);
        }
    }

    pub(super) fn interrupts_enabled() -> bool {
        ENABLED.get()
    }

    pub(super) fn enable() {
        ENABLED.set(true);
    }
}

#[cfg(all(not(target_os = "none"), not(test)))]
mod imp {
    #[inline]
    pub(super) fn save_flags_and_cli() -> u64 {
        0
    }

    #[inline]
    pub(super) fn restore_flags(_flags: u64) {}

    #[inline]
    pub(super) fn interrupts_enabled() -> bool {
        false
    }

    #[inline]
    pub(super) fn enable() {}
}
