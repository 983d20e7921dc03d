//! # Virtual Memory Support
//!
//! Two-level 32-bit x86 paging for per-process address spaces.
//!
//! ## What you get
//! - An [`address space`](address_space) builder that assembles a process's
//!   directory, private table, image, stack and argument buffer, and tears
//!   them down again.
//! - The [`PageEntryBits`] bitfield shared by directory and table entries.
//! - [`PageDirectory`] / [`PageTable`] views over frames in physical memory.
//! - An MMU-style [`translate`](address_space::translate) walk producing
//!   [`PageFault`]s with a hardware-shaped [`PageFaultError`] code.
//! - A tiny allocator/accessor interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## 32-bit Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```
//!
//! ```text
//!  CR3 → PD  →  PT  →  Physical Page
//!         │      │
//!         │      └───► PTE → maps a 4 KiB page
//!         └──────────► PDE → PS=1 → maps a 4 MiB page directly
//! ```
//!
//! | Level | Table | Entry | Description |
//! |:------|:------|:------|:------------|
//! | 1 | **PD** (Page Directory) | **PDE** | 1024 entries; one directory per address space, referenced by `CR3`. With `PS=1` the entry is a 4 MiB leaf. |
//! | 2 | **PT** (Page Table) | **PTE** | 1024 entries, each mapping one 4 KiB page. |
//!
//! ### Process layout
//!
//! Every directory built here has the same shape:
//!
//! - entry 0 points at the *shared* kernel table (identity 0–4 MiB,
//!   supervisor only except the VGA window),
//! - entry 1 points at the process-private table (the 4 MiB process window),
//! - entries 2..1023 are 4 MiB supervisor-only identity mappings, so the
//!   kernel can reach any physical address while a process directory is live.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![allow(clippy::inline_always)]

pub mod address_space;
mod fault;
mod page_entry_bits;
mod page_table;

extern crate alloc;

pub use crate::address_space::{AddressSpace, AddressSpaceError};
pub use crate::fault::{Access, PageFault, PageFaultError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{ENTRIES, PageDirectory, PageTable};
pub use kernel_memory_addresses::{Frame, PhysicalAddress, VirtualAddress};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Source of physical 4 KiB frames for page tables and mapped pages.
///
/// The implementation decides where frames come from (bitmap, bump region in
/// tests, ...). Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one frame.
    fn alloc_frame(&mut self) -> Option<Frame>;

    /// Allocate `count` physically consecutive frames, returning the first.
    fn alloc_contiguous(&mut self, count: u32) -> Option<Frame>;

    /// Return a frame to the pool.
    fn free_frame(&mut self, frame: Frame);
}

/// Byte-level access to physical memory.
///
/// This is the only way frame contents are read or written: page tables,
/// the synthetic interrupt frame on a supervisor stack, argument buffers and
/// program images all go through it. Addresses outside installed memory read
/// as zero and swallow writes, like an open bus.
pub trait PhysMapper {
    /// Copy `buf.len()` bytes starting at `pa` into `buf`.
    fn read(&self, pa: PhysicalAddress, buf: &mut [u8]);

    /// Copy `data` to physical memory starting at `pa`.
    fn write(&mut self, pa: PhysicalAddress, data: &[u8]);

    /// Set `len` bytes starting at `pa` to `value`.
    fn fill(&mut self, pa: PhysicalAddress, len: usize, value: u8);

    #[inline]
    fn read_u32(&self, pa: PhysicalAddress) -> u32 {
        let mut raw = [0u8; 4];
        self.read(pa, &mut raw);
        u32::from_le_bytes(raw)
    }

    #[inline]
    fn write_u32(&mut self, pa: PhysicalAddress, value: u32) {
        self.write(pa, &value.to_le_bytes());
    }

    /// Clear a whole frame.
    #[inline]
    fn zero_frame(&mut self, frame: Frame) {
        self.fill(frame.base(), info::FRAME_SIZE as usize, 0);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal stand-ins for the real allocator and memory store.

    use super::*;
    use alloc::boxed::Box;
    use std::collections::{BTreeSet, HashMap};

    /// Hands out frames lowest-first from `[start, end)` and takes them back.
    pub struct PoolAlloc {
        free: BTreeSet<u32>,
        pub total: usize,
    }

    impl PoolAlloc {
        pub fn new(start: u32, frames: u32) -> Self {
            let free: BTreeSet<u32> = (start..start + frames).collect();
            Self {
                total: free.len(),
                free,
            }
        }

        pub fn free_count(&self) -> usize {
            self.free.len()
        }
    }

    impl FrameAlloc for PoolAlloc {
        fn alloc_frame(&mut self) -> Option<Frame> {
            let n = *self.free.iter().next()?;
            self.free.remove(&n);
            Some(Frame::from_number(n))
        }

        fn alloc_contiguous(&mut self, count: u32) -> Option<Frame> {
            let start = self
                .free
                .iter()
                .copied()
                .find(|&n| (n..n + count).all(|m| self.free.contains(&m)))?;
            for m in start..start + count {
                self.free.remove(&m);
            }
            Some(Frame::from_number(start))
        }

        fn free_frame(&mut self, frame: Frame) {
            assert!(self.free.insert(frame.number()), "double free of {frame:?}");
        }
    }

    /// Sparse RAM: frames appear on first write.
    #[derive(Default)]
    pub struct TestPhys {
        frames: HashMap<u32, Box<[u8; 4096]>>,
    }

    impl PhysMapper for TestPhys {
        fn read(&self, pa: PhysicalAddress, buf: &mut [u8]) {
            for (i, b) in buf.iter_mut().enumerate() {
                let a = pa.as_u32() + i as u32;
                *b = self
                    .frames
                    .get(&(a >> 12))
                    .map_or(0, |f| f[(a & 0xFFF) as usize]);
            }
        }

        fn write(&mut self, pa: PhysicalAddress, data: &[u8]) {
            for (i, b) in data.iter().enumerate() {
                let a = pa.as_u32() + i as u32;
                self.frames
                    .entry(a >> 12)
                    .or_insert_with(|| Box::new([0; 4096]))[(a & 0xFFF) as usize] = *b;
            }
        }

        fn fill(&mut self, pa: PhysicalAddress, len: usize, value: u8) {
            let data = alloc::vec![value; len];
            self.write(pa, &data);
        }
    }
}
