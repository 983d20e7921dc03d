//! Page-directory and page-table views.
//!
//! Both levels are a single 4 KiB frame holding 1024 little-endian
//! [`PageEntryBits`]. The views only carry the [`Frame`] handle; every access
//! goes through a [`PhysMapper`].

use crate::{PageEntryBits, PhysMapper};
use alloc::vec::Vec;
use kernel_memory_addresses::{Frame, PhysicalAddress};

/// Entries per directory or table.
pub const ENTRIES: usize = 1024;

const ENTRY_SIZE: usize = size_of::<u32>();

macro_rules! table_view {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(Frame);

        impl $name {
            #[inline]
            #[must_use]
            pub const fn at(frame: Frame) -> Self {
                Self(frame)
            }

            #[inline]
            #[must_use]
            pub const fn frame(self) -> Frame {
                self.0
            }

            /// Read entry `index`.
            #[inline]
            pub fn entry<M: PhysMapper + ?Sized>(self, mem: &M, index: usize) -> PageEntryBits {
                PageEntryBits::from_bits(mem.read_u32(entry_address(self.0, index)))
            }

            /// Overwrite entry `index`.
            #[inline]
            pub fn set_entry<M: PhysMapper + ?Sized>(
                self,
                mem: &mut M,
                index: usize,
                entry: PageEntryBits,
            ) {
                mem.write_u32(entry_address(self.0, index), entry.into_bits());
            }

            /// Clear every entry.
            #[inline]
            pub fn zero<M: PhysMapper + ?Sized>(self, mem: &mut M) {
                mem.zero_frame(self.0);
            }

            /// All present entries with their index, in ascending order.
            pub fn present_entries<M: PhysMapper + ?Sized>(
                self,
                mem: &M,
            ) -> Vec<(usize, PageEntryBits)> {
                let mut raw = [0u8; ENTRIES * ENTRY_SIZE];
                mem.read(self.0.base(), &mut raw);
                raw.chunks_exact(ENTRY_SIZE)
                    .enumerate()
                    .filter_map(|(i, bytes)| {
                        let e = PageEntryBits::from_bits(u32::from_le_bytes([
                            bytes[0], bytes[1], bytes[2], bytes[3],
                        ]));
                        e.present().then_some((i, e))
                    })
                    .collect()
            }
        }
    };
}

table_view!(
    /// The top level: one per address space, loaded into `CR3`.
    PageDirectory
);

table_view!(
    /// The second level: maps one 4 MiB window in 4 KiB pages.
    PageTable
);

#[inline]
fn entry_address(frame: Frame, index: usize) -> PhysicalAddress {
    debug_assert!(index < ENTRIES, "entry index {index} out of range");
    #[allow(clippy::cast_possible_truncation)]
    let offset = (index * ENTRY_SIZE) as u32;
    frame.base() + offset
}
