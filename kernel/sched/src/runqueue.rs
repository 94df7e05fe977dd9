//! Per-core run queues and the selection algorithm.
//!
//! Holds one strict-priority (SRT) queue, [`STD_LEVELS`] standard sub-queues
//! and an idle queue. Selection pops from SRT first, then runs a weighted
//! round robin over the STD levels, then falls back to the idle queue.
//! The queues are generic over the handle they store so the policy can be
//! tested without threads.

use alloc::collections::VecDeque;

use crate::config::STD_LEVELS;
use crate::thread::Priority;

/// Priority run queues of one core.
pub struct RunQueues<T> {
    srt: VecDeque<T>,
    std: [VecDeque<T>; STD_LEVELS],
    idle: VecDeque<T>,
    weights: [u32; STD_LEVELS],
    /// STD level currently being served.
    rr_index: usize,
    /// Turns left at `rr_index` before rotating.
    rr_turns: u32,
}

impl<T> RunQueues<T> {
    /// Creates empty queues with the given STD weights.
    pub fn new(weights: [u32; STD_LEVELS]) -> Self {
        Self {
            srt: VecDeque::new(),
            std: core::array::from_fn(|_| VecDeque::new()),
            idle: VecDeque::new(),
            weights,
            // First rotation lands on level 0.
            rr_index: STD_LEVELS - 1,
            rr_turns: 0,
        }
    }

    fn queue_mut(&mut self, priority: Priority) -> &mut VecDeque<T> {
        match priority {
            Priority::Srt => &mut self.srt,
            Priority::Std(level) => &mut self.std[clamp_level(level)],
            Priority::Idle => &mut self.idle,
        }
    }

    fn queue(&self, priority: Priority) -> &VecDeque<T> {
        match priority {
            Priority::Srt => &self.srt,
            Priority::Std(level) => &self.std[clamp_level(level)],
            Priority::Idle => &self.idle,
        }
    }

    /// Appends `item` to the tail of the queue for `priority`.
    pub fn push(&mut self, priority: Priority, item: T) {
        self.queue_mut(priority).push_back(item);
    }

    /// Removes the first item in the `priority` queue matching `pred`.
    pub fn remove_by(&mut self, priority: Priority, pred: impl Fn(&T) -> bool) -> Option<T> {
        let queue = self.queue_mut(priority);
        let pos = queue.iter().position(pred)?;
        queue.remove(pos)
    }

    /// Pops the next item to run.
    ///
    /// Returns `None` only if every queue, idle included, is empty.
    pub fn pop_next(&mut self) -> Option<(Priority, T)> {
        if let Some(item) = self.srt.pop_front() {
            return Some((Priority::Srt, item));
        }
        if let Some((level, item)) = self.pop_std() {
            return Some((Priority::Std(level), item));
        }
        self.idle.pop_front().map(|item| (Priority::Idle, item))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn pop_std(&mut self) -> Option<(u8, T)> {
        if self.rr_turns == 0 || self.std[self.rr_index].is_empty() {
            self.rotate()?;
        }
        self.rr_turns = self.rr_turns.saturating_sub(1);
        let item = self.std[self.rr_index].pop_front()?;
        Some((self.rr_index as u8, item))
    }

    /// Moves the round robin to the next non-empty level after the current
    /// one (wrapping, the current level last) and refills its turns.
    fn rotate(&mut self) -> Option<()> {
        let next = (1..=STD_LEVELS)
            .map(|step| (self.rr_index + step) % STD_LEVELS)
            .find(|&idx| !self.std[idx].is_empty())?;
        self.rr_index = next;
        self.rr_turns = self.weights[next];
        Some(())
    }

    /// Returns `true` if an SRT or STD item is queued.
    pub fn has_ready(&self) -> bool {
        !self.srt.is_empty() || self.std.iter().any(|q| !q.is_empty())
    }

    /// Returns `true` if an SRT item is queued.
    pub fn has_srt(&self) -> bool {
        !self.srt.is_empty()
    }

    /// Returns the length of the queue for `priority`.
    pub fn len(&self, priority: Priority) -> usize {
        self.queue(priority).len()
    }

    /// Returns the total number of queued items, idle included.
    pub fn total_len(&self) -> usize {
        self.srt.len() + self.std.iter().map(VecDeque::len).sum::<usize>() + self.idle.len()
    }

    /// Iterates over queued items in class order: SRT, STD 0..8, idle.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.srt
            .iter()
            .chain(self.std.iter().flatten())
            .chain(self.idle.iter())
    }
}

fn clamp_level(level: u8) -> usize {
    usize::from(level).min(STD_LEVELS - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STD_WEIGHTS;

    fn queues() -> RunQueues<u32> {
        RunQueues::new(DEFAULT_STD_WEIGHTS)
    }

    // -----------------------------------------------------------------------
    // Class ordering
    // -----------------------------------------------------------------------

    #[test]
    fn empty_on_creation() {
        let mut rq = queues();
        assert!(!rq.has_ready());
        assert_eq!(rq.total_len(), 0);
        assert_eq!(rq.pop_next(), None);
    }

    #[test]
    fn srt_then_std_then_idle() {
        let mut rq = queues();
        rq.push(Priority::Idle, 0);
        rq.push(Priority::Std(7), 1);
        rq.push(Priority::Srt, 2);
        rq.push(Priority::Std(0), 3);

        assert_eq!(rq.pop_next(), Some((Priority::Srt, 2)));
        assert_eq!(rq.pop_next(), Some((Priority::Std(0), 3)));
        assert_eq!(rq.pop_next(), Some((Priority::Std(7), 1)));
        assert_eq!(rq.pop_next(), Some((Priority::Idle, 0)));
        assert_eq!(rq.pop_next(), None);
    }

    #[test]
    fn srt_is_fifo() {
        let mut rq = queues();
        for id in 1..=3 {
            rq.push(Priority::Srt, id);
        }
        assert_eq!(rq.pop_next(), Some((Priority::Srt, 1)));
        assert_eq!(rq.pop_next(), Some((Priority::Srt, 2)));
        assert_eq!(rq.pop_next(), Some((Priority::Srt, 3)));
    }

    #[test]
    fn every_mix_selects_best_class() {
        // Bit 0 = SRT, bit 1 = STD, bit 2 = idle populated.
        for mask in 0u32..8 {
            let mut rq = queues();
            if mask & 1 != 0 {
                rq.push(Priority::Srt, 10);
            }
            if mask & 2 != 0 {
                rq.push(Priority::NORMAL, 20);
            }
            if mask & 4 != 0 {
                rq.push(Priority::Idle, 30);
            }
            let picked = rq.pop_next().map(|(_, id)| id);
            let expected = if mask & 1 != 0 {
                Some(10)
            } else if mask & 2 != 0 {
                Some(20)
            } else if mask & 4 != 0 {
                Some(30)
            } else {
                None
            };
            assert_eq!(picked, expected, "mask {mask:#05b}");
        }
    }

    // -----------------------------------------------------------------------
    // Weighted round robin
    // -----------------------------------------------------------------------

    /// Pops `n` times, re-queuing each popped item at its level.
    fn run(rq: &mut RunQueues<u32>, n: usize) -> Vec<(Priority, u32)> {
        (0..n)
            .map(|_| {
                let (p, id) = rq.pop_next().unwrap();
                rq.push(p, id);
                (p, id)
            })
            .collect()
    }

    #[test]
    fn same_level_rotates_fairly() {
        let mut rq = queues();
        let level = 4u8;
        for id in 1..=3 {
            rq.push(Priority::Std(level), id);
        }
        let weight = DEFAULT_STD_WEIGHTS[usize::from(level)] as usize;
        let picks = run(&mut rq, 60);
        for window in picks.windows(3 * weight) {
            for id in 1..=3 {
                assert!(
                    window.iter().any(|&(_, picked)| picked == id),
                    "thread {id} starved"
                );
            }
        }
    }

    #[test]
    fn weights_give_consecutive_turns() {
        let mut rq = queues();
        rq.push(Priority::Std(0), 100);
        rq.push(Priority::Std(1), 200);
        let picks = run(&mut rq, 17);
        assert!(picks[..9].iter().all(|&(_, id)| id == 100));
        assert!(picks[9..].iter().all(|&(_, id)| id == 200));
        // Then back to level 0.
        assert_eq!(run(&mut rq, 1)[0].1, 100);
    }

    #[test]
    fn empty_level_is_skipped_mid_turns() {
        let mut rq = queues();
        rq.push(Priority::Std(2), 1);
        rq.push(Priority::Std(5), 2);
        // Level 2 still has turns left, but its queue empties.
        assert_eq!(rq.pop_next(), Some((Priority::Std(2), 1)));
        assert_eq!(rq.pop_next(), Some((Priority::Std(5), 2)));
        assert_eq!(rq.pop_next(), None);
    }

    #[test]
    fn every_nonempty_level_is_served() {
        let mut rq = queues();
        for level in 0..9u8 {
            rq.push(Priority::Std(level), u32::from(level));
        }
        let total: u32 = DEFAULT_STD_WEIGHTS.iter().sum();
        let picks = run(&mut rq, total as usize);
        for level in 0..9u32 {
            let count = picks.iter().filter(|&&(_, id)| id == level).count();
            assert_eq!(count, DEFAULT_STD_WEIGHTS[level as usize] as usize);
        }
    }

    #[test]
    fn custom_weights() {
        let mut rq = RunQueues::new([1; STD_LEVELS]);
        rq.push(Priority::Std(0), 1);
        rq.push(Priority::Std(8), 2);
        let ids: Vec<_> = run(&mut rq, 4).into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, [1, 2, 1, 2]);
    }

    // -----------------------------------------------------------------------
    // Removal and accounting
    // -----------------------------------------------------------------------

    #[test]
    fn remove_by_takes_matching_item() {
        let mut rq = queues();
        rq.push(Priority::NORMAL, 1);
        rq.push(Priority::NORMAL, 2);
        rq.push(Priority::NORMAL, 3);
        assert_eq!(rq.remove_by(Priority::NORMAL, |&id| id == 2), Some(2));
        assert_eq!(rq.remove_by(Priority::NORMAL, |&id| id == 2), None);
        assert_eq!(rq.len(Priority::NORMAL), 2);
        assert_eq!(rq.pop_next(), Some((Priority::NORMAL, 1)));
        assert_eq!(rq.pop_next(), Some((Priority::NORMAL, 3)));
    }

    #[test]
    fn has_ready_ignores_idle() {
        let mut rq = queues();
        rq.push(Priority::Idle, 0);
        assert!(!rq.has_ready());
        rq.push(Priority::Srt, 1);
        assert!(rq.has_ready());
        assert!(rq.has_srt());
    }

    #[test]
    fn iter_follows_class_order() {
        let mut rq = queues();
        rq.push(Priority::Idle, 0);
        rq.push(Priority::Std(3), 3);
        rq.push(Priority::Std(1), 1);
        rq.push(Priority::Srt, 9);
        let order: Vec<_> = rq.iter().copied().collect();
        assert_eq!(order, [9, 1, 3, 0]);
        assert_eq!(rq.total_len(), 4);
    }
}
