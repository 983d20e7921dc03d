use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// The CPU's interrupt-enable flag (`EFLAGS.IF`).
///
/// While clear, the timer interrupt stays pending and is delivered by the
/// next [`InterruptFlag::enable`] site that checks for it.
#[derive(Debug)]
pub struct InterruptFlag {
    enabled: AtomicBool,
}

impl InterruptFlag {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    /// `sti`
    #[inline]
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// `cli`, returning whether interrupts were enabled before.
    #[inline]
    pub fn disable(&self) -> bool {
        self.enabled.swap(false, Ordering::AcqRel)
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Default for InterruptFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the flag. If interrupts were enabled, it
/// clears it. On drop, it sets the flag again **only** if it was set before,
/// so guards nest.
///
/// # Examples
///
/// ```
/// use kernel_sync::{InterruptFlag, IrqGuard};
///
/// let flag = InterruptFlag::new(true);
/// {
///     let _outer = IrqGuard::new(&flag);
///     {
///         let _inner = IrqGuard::new(&flag);
///     }
///     assert!(!flag.is_enabled());
/// }
/// assert!(flag.is_enabled());
/// ```
pub struct IrqGuard<'a> {
    flag: &'a InterruptFlag,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a> IrqGuard<'a> {
    #[inline]
    #[must_use]
    pub fn new(flag: &'a InterruptFlag) -> Self {
        let were_enabled = flag.disable();
        Self { flag, were_enabled }
    }
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.flag.enable();
        }
    }
}

/// A [`SpinLockGuard`] that also keeps interrupts disabled while held.
///
/// Created via [`SpinLock::lock_irq`]: the flag is cleared first, then the
/// lock is taken; on drop the lock is released before interrupts come back.
pub struct IrqSpinGuard<'a, T> {
    // Field order is drop order.
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard<'a>,
}

impl<T> SpinLock<T> {
    /// Acquire the lock with interrupts disabled for the guard's lifetime.
    #[inline]
    pub fn lock_irq<'a>(&'a self, flag: &'a InterruptFlag) -> IrqSpinGuard<'a, T> {
        let irq = IrqGuard::new(flag);
        let guard = self.lock();
        IrqSpinGuard { guard, _irq: irq }
    }
}

impl<T> Deref for IrqSpinGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
