use crate::{PageSize, PhysicalAddress, Size4K};
use core::fmt;

/// Handle for one 4 KiB physical frame.
///
/// Stores the frame *number* (`address >> 12`), never a pointer. Handing out
/// a `Frame` does not grant access to its contents; reads and writes go through
/// a physical memory accessor that owns the backing store.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Frame(u32);

impl Frame {
    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        Self(number)
    }

    /// The frame that contains `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u32() >> Size4K::SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0
    }

    /// First byte of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << Size4K::SHIFT)
    }

    /// The physically adjacent frame.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The frame `n` frames above this one.
    #[inline]
    #[must_use]
    pub const fn offset(self, n: u32) -> Self {
        Self(self.0 + n)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(#{} @ {})", self.0, self.base())
    }
}
