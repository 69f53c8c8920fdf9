use std::num::NonZeroUsize;

/// What a training step does about gradient synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlan {
    /// Whether the backward pass synchronizes gradients across ranks.
    pub sync: bool,
    /// Whether the optimizer applies an update and gradients are reset.
    pub update: bool,
}

/// Defines when accumulated gradients are synchronized and applied.
#[derive(Debug, Clone)]
pub struct Schedule {
    accumulation: NonZeroUsize,
}

impl Schedule {
    pub fn new(accumulation: NonZeroUsize) -> Self {
        Self { accumulation }
    }

    /// Returns true if this step ends an accumulation window.
    #[inline]
    pub fn should_sync(&self, step_idx: usize) -> bool {
        let k = self.accumulation.get();
        (step_idx + 1) % k == 0
    }

    #[inline]
    pub fn plan(&self, step_idx: usize) -> StepPlan {
        let sync = self.should_sync(step_idx);
        StepPlan { sync, update: sync }
    }

    /// Whether an epoch of `steps` steps leaves a partial window to flush.
    #[inline]
    pub fn needs_flush(&self, steps: usize) -> bool {
        steps % self.accumulation.get() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(k: usize) -> Schedule {
        Schedule::new(NonZeroUsize::new(k).unwrap())
    }

    #[test]
    fn syncs_at_the_end_of_each_window() {
        let s = schedule(4);
        let flags: Vec<_> = (0..8).map(|idx| s.should_sync(idx)).collect();
        assert_eq!(flags, [false, false, false, true, false, false, false, true]);
    }

    #[test]
    fn updates_exactly_when_syncing() {
        let s = schedule(3);
        for idx in 0..9 {
            let plan = s.plan(idx);
            assert_eq!(plan.sync, plan.update);
        }
    }

    #[test]
    fn no_accumulation_syncs_every_step() {
        let s = schedule(1);
        assert!((0..5).all(|idx| s.should_sync(idx)));
        assert!(!s.needs_flush(5));
    }

    #[test]
    fn partial_windows_need_a_flush() {
        let s = schedule(4);
        assert!(!s.needs_flush(8));
        assert!(s.needs_flush(10));
        assert!(!s.needs_flush(0));
    }
}
