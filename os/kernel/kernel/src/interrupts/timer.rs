//! The programmable interval timer and the tick handler.

use crate::Shared;
use crate::scheduler::{self, Switch};
use log::trace;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A host thread firing `tick` every `period` until stopped, or until `tick`
/// returns `false`.
pub struct Timer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    /// # Errors
    /// The timer thread could not be spawned.
    pub fn start(period: Duration, tick: impl Fn() -> bool + Send + 'static) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new().name("pit".into()).spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    thread::sleep(period);
                    if stop.load(Ordering::Acquire) || !tick() {
                        break;
                    }
                }
            })?
        };
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop firing and wait for the thread to finish.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    /// IRQ 0 handler: count the tick and run the scheduler.
    ///
    /// On a switch, `CR3` and `ESP0` already point at the chosen process
    /// when this returns; the caller hands over the CPU.
    pub(crate) fn timer_tick(&self) -> Option<Switch> {
        let mut state = self.state.lock_irq(&self.cpu.interrupts);
        state.ticks += 1;
        let now = state.ticks;
        let switch = scheduler::on_tick(&mut state.procs, now)?;
        let cr3 = state.directory_base(Some(switch.to));
        let esp0 = state.kernel_stack_top(switch.to);
        drop(state);

        self.cpu.load_cr3(cr3);
        self.cpu.set_esp0(esp0);
        trace!("tick {now}: {:?} -> {}", switch.from, switch.to);
        Some(switch)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fires_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = {
            let count = Arc::clone(&count);
            Timer::start(Duration::from_millis(1), move || {
                count.fetch_add(1, Ordering::Relaxed);
                true
            })
            .unwrap()
        };
        while count.load(Ordering::Relaxed) < 3 {
            thread::yield_now();
        }
        timer.stop();
        let after = count.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::Relaxed), after);
    }

    #[test]
    fn a_declining_handler_ends_the_thread() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = {
            let count = Arc::clone(&count);
            Timer::start(Duration::from_millis(1), move || {
                count.fetch_add(1, Ordering::Relaxed) < 1
            })
            .unwrap()
        };
        while count.load(Ordering::Relaxed) < 2 {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::Relaxed), 2);
        timer.stop();
    }
}
