//! # Scheduling

/// Number of slots in the process table.
pub const MAX_PROCS: usize = 8;

/// Default timer frequency.
pub const TICK_HZ: u32 = 100;

/// Longest program name accepted by a launch, including the terminating NUL.
pub const NAME_MAX: u32 = 32;

const _: () = {
    assert!(MAX_PROCS >= 2);
    assert!(TICK_HZ > 0 && TICK_HZ <= 1000);
};
