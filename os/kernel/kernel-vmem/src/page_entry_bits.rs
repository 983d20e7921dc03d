use bitfield_struct::bitfield;
use kernel_memory_addresses::{Frame, PhysicalAddress};

/// A single 32-bit x86 page-directory or page-table entry in its raw bitfield
/// form.
///
/// ### Bit layout
///
/// | Bits   | Name / Mnemonic | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P` (present)   | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (leaf only) |
/// | 7      | `PS`            | 4 MiB page (directory entries only) |
/// | 8      | `G`             | Global (leaf only) |
/// | 9–11   | OS avail        | Reserved for OS use |
/// | 12–31  | `addr`          | Physical frame number |
///
/// ### Notes
/// - For a directory entry with `PS=1` the address field must be 4 MiB aligned.
/// - A directory entry's `US`/`RW` bits gate every page below it: a user page
///   behind a supervisor-only directory entry is still unreachable from ring 3.
///
/// ### Example
/// ```rust
/// # use kernel_vmem::{PageEntryBits, Frame};
/// let e = PageEntryBits::user_page(Frame::from_number(0x123));
/// assert!(e.present() && e.writable() && e.user_access());
/// assert_eq!(e.frame(), Frame::from_number(0x123));
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Clear for read-only. Only enforced for user-mode accesses since the
    /// kernel runs with `CR0.WP` clear.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Set to allow user-mode access; clear restricts to supervisor only.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5).
    pub accessed: bool,

    /// Dirty (D, bit 6); leaf only.
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    ///
    /// In a directory entry: when **set**, the entry maps a 4 MiB page
    /// directly; when **clear**, it points to a page table.
    pub large_page: bool,

    /// Global (G, bit 8); leaf only.
    pub global: bool,

    /// Bits 9–11 are available to the OS.
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12–31).
    #[bits(20)]
    frame_number: u32,
}

impl PageEntryBits {
    /// A directory entry pointing at a page table.
    #[inline]
    #[must_use]
    pub const fn table(frame: Frame, user: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(user)
            .with_frame_number(frame.number())
    }

    /// A writable, user-accessible 4 KiB leaf.
    #[inline]
    #[must_use]
    pub const fn user_page(frame: Frame) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_frame_number(frame.number())
    }

    /// A writable, supervisor-only 4 KiB leaf.
    #[inline]
    #[must_use]
    pub const fn kernel_page(frame: Frame) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_frame_number(frame.number())
    }

    /// A supervisor-only 4 MiB identity leaf at `base`.
    #[inline]
    #[must_use]
    pub const fn kernel_large_page(base: PhysicalAddress) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_large_page(true)
            .with_frame_number(base.as_u32() >> 12)
    }

    /// The frame this entry points to (table or page).
    #[inline]
    #[must_use]
    pub const fn frame(self) -> Frame {
        Frame::from_number(self.frame_number())
    }

    /// The physical base address of the table or page.
    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        self.frame().base()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn raw_encoding_matches_hardware_layout() {
        let e = PageEntryBits::user_page(Frame::from_number(0x440));
        assert_eq!(e.into_bits(), 0x0044_0007);

        let big = PageEntryBits::kernel_large_page(PhysicalAddress::new(0x0080_0000));
        assert_eq!(big.into_bits(), 0x0080_0083);
        assert!(!big.user_access());
    }

    #[test]
    fn empty_entry_is_not_present() {
        let e = PageEntryBits::from_bits(0);
        assert!(!e.present());
        assert_eq!(e.frame(), Frame::from_number(0));
    }
}
