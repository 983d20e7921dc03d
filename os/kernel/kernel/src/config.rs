//! Runtime knobs of a kernel instance.

use kernel_info::memory::{FRAME_SIZE, PMM_BASE, PMM_END, PROG_FRAMES, USER_STACK_FRAMES};
use kernel_info::sched::{MAX_PROCS, TICK_HZ};
use std::time::Duration;

/// Frames a process needs before it can run: directory, private table,
/// supervisor stack, image window and stack window.
pub const FRAMES_PER_PROCESS: u32 = 3 + PROG_FRAMES + USER_STACK_FRAMES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Interval between timer interrupts.
    pub tick_period: Duration,
    /// Capacity of the process table.
    pub max_procs: usize,
    /// First byte of frame-allocator managed memory.
    pub pmm_base: u32,
    /// One past the last byte of installed memory.
    pub pmm_end: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1) / TICK_HZ,
            max_procs: MAX_PROCS,
            pmm_base: PMM_BASE,
            pmm_end: PMM_END,
        }
    }
}

impl KernelConfig {
    #[must_use]
    pub fn with_tick_hz(self, hz: u32) -> Self {
        self.with_tick_period(Duration::from_secs(1) / hz.max(1))
    }

    #[must_use]
    pub const fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    #[must_use]
    pub const fn with_max_procs(mut self, max_procs: usize) -> Self {
        self.max_procs = max_procs;
        self
    }

    /// Limit managed memory to `frames` frames above `pmm_base`.
    ///
    /// A range past the 32-bit address space saturates and is then
    /// rejected by [`problem`](Self::problem).
    #[must_use]
    pub const fn with_managed_frames(mut self, frames: u32) -> Self {
        self.pmm_end = self
            .pmm_base
            .saturating_add(frames.saturating_mul(FRAME_SIZE));
        self
    }

    /// Timer ticks covering `ms` milliseconds, at least one.
    #[must_use]
    pub fn ticks_for(&self, ms: u32) -> u64 {
        let period_ns = self.tick_period.as_nanos().max(1);
        let ticks = (u128::from(ms) * 1_000_000).div_ceil(period_ns).max(1);
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }

    /// Reasons this configuration cannot boot, if any.
    #[must_use]
    pub fn problem(&self) -> Option<&'static str> {
        if self.max_procs == 0 {
            Some("the process table needs at least one slot")
        } else if self.tick_period.is_zero() {
            Some("the tick period must be positive")
        } else if self.pmm_base % FRAME_SIZE != 0 || self.pmm_end % FRAME_SIZE != 0 {
            Some("managed memory must be frame aligned")
        } else if self.pmm_base < PMM_BASE || self.pmm_end > PMM_END {
            Some("managed memory must lie within installed memory")
        } else if self.pmm_end <= self.pmm_base {
            Some("managed memory is empty")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_follow_the_layout_constants() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.tick_period, Duration::from_millis(10));
        assert_eq!(cfg.max_procs, 8);
        assert_eq!(cfg.problem(), None);
    }

    #[test]
    fn sleep_rounds_up_to_whole_ticks() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.ticks_for(0), 1);
        assert_eq!(cfg.ticks_for(1), 1);
        assert_eq!(cfg.ticks_for(10), 1);
        assert_eq!(cfg.ticks_for(11), 2);
        assert_eq!(cfg.ticks_for(1000), 100);

        let slow = cfg.with_tick_hz(4);
        assert_eq!(slow.ticks_for(300), 2);
    }

    #[test]
    fn sub_millisecond_ticks_are_not_rounded_to_one_millisecond() {
        let fast = KernelConfig::default().with_tick_hz(2000);
        assert_eq!(fast.ticks_for(10), 20);
        assert_eq!(fast.ticks_for(1), 2);

        let odd = KernelConfig::default().with_tick_period(Duration::from_micros(300));
        assert_eq!(odd.ticks_for(1), 4);
    }

    #[test]
    fn oversized_frame_counts_are_rejected_without_overflow() {
        let cfg = KernelConfig::default().with_managed_frames(u32::MAX);
        assert_eq!(cfg.pmm_end, u32::MAX);
        assert!(cfg.problem().is_some());
    }

    #[test]
    fn bad_configurations_are_reported() {
        assert!(KernelConfig::default().with_max_procs(0).problem().is_some());
        assert!(
            KernelConfig::default()
                .with_managed_frames(0)
                .problem()
                .is_some()
        );
        assert!(
            KernelConfig::default()
                .with_tick_period(Duration::ZERO)
                .problem()
                .is_some()
        );
    }
}
