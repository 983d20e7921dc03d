//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the 32-bit addresses and frame handles used by
//! the paging and process code.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or device windows). |
//! | [`VirtualAddress`] | A byte address as seen through a page directory. |
//! | [`Frame`] | An opaque handle for one 4 KiB physical frame, stored as its frame number. |
//!
//! Frames are deliberately *not* addresses: code that holds a [`Frame`] cannot
//! dereference it, it has to go through a physical memory accessor. The base
//! address is still derivable with [`Frame::base`] for page-table entries and
//! diagnostics.
//!
//! ## Page Sizes
//!
//! Two protected-mode page sizes are supported via marker types that implement
//! [`PageSize`]:
//!
//! - [`Size4K`]: 4 KiB pages mapped through a page table
//! - [`Size4M`]: 4 MiB large pages mapped directly by a directory entry
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0044_1234);
//! assert_eq!(va.directory_index(), 1);
//! assert_eq!(va.table_index(), 0x41);
//! assert_eq!(va.page_offset(), 0x234);
//!
//! let frame = Frame::containing(PhysicalAddress::new(0x0010_2042));
//! assert_eq!(frame.base(), PhysicalAddress::new(0x0010_2000));
//! assert_eq!(frame.number(), 0x102);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]
#![allow(clippy::inline_always)]

mod frame;
mod physical_address;
mod virtual_address;

use core::fmt;
use core::hash::Hash;

pub use frame::Frame;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for supported page sizes.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u32;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;
}

/// 4 KiB page (4096 bytes).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;
impl sealed::Sealed for Size4K {}
impl PageSize for Size4K {
    const SIZE: u32 = 4096;
    const SHIFT: u32 = 12;
}

/// 4 MiB page (`4_194_304` bytes), only reachable with `CR4.PSE` set.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4M;
impl sealed::Sealed for Size4M {}
impl PageSize for Size4M {
    const SIZE: u32 = 4 * 1024 * 1024;
    const SHIFT: u32 = 22;
}

/// Align `x` down to the start of its page of size `S`.
///
/// # Example
/// ```
/// # use kernel_memory_addresses::*;
/// assert_eq!(align_down::<Size4K>(0x1234), 0x1000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down<S: PageSize>(x: u32) -> u32 {
    x & !(S::SIZE - 1)
}

/// Align `x` up to the next page boundary of size `S`, saturating at the top
/// of the address space.
///
/// # Example
/// ```
/// # use kernel_memory_addresses::*;
/// assert_eq!(align_up::<Size4K>(0x1001), 0x2000);
/// assert_eq!(align_up::<Size4K>(0x2000), 0x2000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up<S: PageSize>(x: u32) -> u32 {
    match x.checked_add(S::SIZE - 1) {
        Some(v) => align_down::<S>(v),
        None => align_down::<S>(u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers() {
        assert_eq!(align_down::<Size4K>(0x0044_0FFF), 0x0044_0000);
        assert_eq!(align_up::<Size4K>(0x0044_0001), 0x0044_1000);
        assert_eq!(align_up::<Size4M>(0x0040_0001), 0x0080_0000);
        assert_eq!(align_up::<Size4K>(u32::MAX), 0xFFFF_F000);
    }

    #[test]
    fn virtual_address_split() {
        let va = VirtualAddress::new(0x007F_FFF0);
        assert_eq!(va.directory_index(), 1);
        assert_eq!(va.table_index(), 0x3FF);
        assert_eq!(va.page_offset(), 0xFF0);
        assert_eq!(va.page_base(), VirtualAddress::new(0x007F_F000));
    }

    #[test]
    fn frame_round_trips_through_its_base() {
        let f = Frame::from_number(0x7FFF);
        assert_eq!(f.base().as_u32(), 0x07FF_F000);
        assert_eq!(Frame::containing(f.base() + 0xABC), f);
        assert_eq!(f.next(), Frame::from_number(0x8000));
    }

    #[test]
    fn physical_address_offsets() {
        let pa = PhysicalAddress::new(0x000B_8004);
        assert_eq!(pa.page_offset(), 4);
        assert!(PhysicalAddress::new(0x0040_0000).is_aligned::<Size4M>());
        assert!(!pa.is_aligned::<Size4K>());
    }
}
