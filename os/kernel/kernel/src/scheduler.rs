//! Round-robin selection on the timer tick.

use crate::process::{Pid, ProcState, ProcessTable};

/// A context switch decided by [`on_tick`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Switch {
    /// The preempted process; `None` if no process was current.
    pub from: Option<Pid>,
    pub to: Pid,
}

/// Promote expired sleepers, then pick the next `Ready` process after the
/// current one in slot order.
///
/// The table is updated in place (states and `current`); the caller performs
/// the actual hand-over. A current process that is not `Running` (it may be
/// sleeping, waiting or dead) keeps its state when switched away from.
pub fn on_tick(procs: &mut ProcessTable, now: u64) -> Option<Switch> {
    let current = procs.current;
    for p in procs.iter_mut() {
        if p.state == ProcState::Sleeping && p.deadline <= now {
            p.state = if current == Some(p.pid) {
                ProcState::Running
            } else {
                ProcState::Ready
            };
        }
    }

    let n = procs.capacity();
    let to = match current {
        Some(cur) => (1..=n).map(|i| (cur + i) % n).find(|&pid| procs.state(pid) == ProcState::Ready),
        None => (0..n).find(|&pid| procs.state(pid) == ProcState::Ready),
    }?;
    if current == Some(to) {
        return None;
    }

    if let Some(cur) = current
        && procs.state(cur) == ProcState::Running
    {
        procs.set_state(cur, ProcState::Ready);
    }
    procs.set_state(to, ProcState::Running);
    procs.current = Some(to);
    Some(Switch { from: current, to })
}
