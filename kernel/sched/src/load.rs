//! Per-core load measurement.
//!
//! Tracks how much of each sampling window a core spent in its idle thread,
//! using the platform's monotonic counter. The result is a per-mille figure
//! for reporting; nothing in the scheduler acts on it except the optional
//! [`Placement::LeastLoaded`](crate::Placement::LeastLoaded) policy.

/// Idle-time accounting for one core.
#[derive(Debug, Clone, Copy)]
pub struct LoadMeter {
    window_start: u64,
    last_switch: u64,
    idle_time: u64,
    running_idle: bool,
    permille: u32,
}

impl LoadMeter {
    /// Starts measuring at `now`.
    pub const fn new(now: u64, running_idle: bool) -> Self {
        Self {
            window_start: now,
            last_switch: now,
            idle_time: 0,
            running_idle,
            permille: 0,
        }
    }

    fn account(&mut self, now: u64) {
        if self.running_idle {
            self.idle_time += now.saturating_sub(self.last_switch);
        }
        self.last_switch = now;
    }

    /// Records a context switch at `now` to an idle or non-idle thread.
    pub fn on_switch(&mut self, now: u64, next_is_idle: bool) {
        self.account(now);
        self.running_idle = next_is_idle;
    }

    /// Closes the current window at `now` and returns its load.
    ///
    /// An empty window keeps the previous figure.
    pub fn sample(&mut self, now: u64) -> u32 {
        self.account(now);
        let elapsed = now.saturating_sub(self.window_start);
        if elapsed > 0 {
            let busy = elapsed.saturating_sub(self.idle_time);
            // busy <= elapsed, so the quotient fits in 0..=1000.
            self.permille = u32::try_from(busy * 1000 / elapsed).unwrap_or(1000);
        }
        self.window_start = now;
        self.idle_time = 0;
        self.permille
    }

    /// Returns the load of the last completed window.
    pub const fn permille(&self) -> u32 {
        self.permille
    }
}
