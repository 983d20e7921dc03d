use crate::{PageSize, Size4K, align_down};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Virtual memory address.
///
/// A 32-bit linear address as translated by a two-level page directory:
///
/// ```text
///  31        22 21        12 11          0
/// ┌────────────┬────────────┬─────────────┐
/// │  PD index  │  PT index  │   offset    │
/// └────────────┴────────────┴─────────────┘
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Index into the page directory (bits 31..22).
    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> usize {
        (self.0 >> 22) as usize
    }

    /// Index into the page table (bits 21..12).
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> usize {
        ((self.0 >> 12) & 0x3FF) as usize
    }

    /// Offset within the 4 KiB page (bits 11..0).
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0 & (Size4K::SIZE - 1)
    }

    /// The 4 KiB page this address falls into.
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> Self {
        Self(align_down::<Size4K>(self.0))
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.0 & (S::SIZE - 1) == 0
    }

    /// Adds `rhs`, returning `None` past the top of the 32-bit space.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}
