//! # Per-process address spaces
//!
//! An [`AddressSpace`] owns a page directory, the private page table behind
//! directory entry 1 (the process window) and a supervisor stack frame. Every
//! frame reachable through the private table belongs to the process alone;
//! the shared kernel table and the large-page identity mappings do not.
//!
//! ```text
//!  directory
//!  ┌──────────┐
//!  │ PDE 0    │──► shared kernel table (identity 0..4 MiB, VGA user-visible)
//!  │ PDE 1    │──► private table ──► image frames   @ PROG_BASE
//!  │          │                 ├─► heap frames    @ HEAP_BASE.. (on demand)
//!  │          │                 └─► stack/args     @ USER_STACK_BASE
//!  │ PDE 2..  │──► 4 MiB supervisor identity pages
//!  └──────────┘
//! ```

use crate::info::{
    ARGS_BASE, ARGS_MAX, FRAME_SIZE, KERNEL_STACK_SIZE, PROG_BASE, PROG_FRAMES, PROG_MAX_SIZE,
    USER_STACK_BASE, USER_STACK_FRAMES, USER_WINDOW_BASE, VGA_WINDOW_END, VGA_WINDOW_START,
};
use crate::{
    Access, ENTRIES, FrameAlloc, PageDirectory, PageEntryBits, PageFault, PageFaultError,
    PageTable, PhysMapper,
};
use alloc::vec::Vec;
use kernel_memory_addresses::{Frame, PageSize, PhysicalAddress, Size4K, Size4M, VirtualAddress};
use log::trace;
use thiserror::Error;

/// Directory slot of the process-private window.
pub const USER_DIRECTORY_INDEX: usize = VirtualAddress::new(USER_WINDOW_BASE).directory_index();

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum AddressSpaceError {
    #[error("out of physical frames")]
    OutOfMemory,
    #[error("program image of {0} bytes exceeds the {max} byte window", max = PROG_MAX_SIZE)]
    ImageTooLarge(usize),
    #[error("address {0} is outside the process window")]
    OutsideWindow(VirtualAddress),
}

/// The page directory, private table and supervisor stack of one process.
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    directory: PageDirectory,
    table: PageTable,
    kernel_stack: Frame,
}

impl AddressSpace {
    /// Build a fresh address space holding `image` at [`PROG_BASE`] and the
    /// NUL-terminated `args` at [`ARGS_BASE`].
    ///
    /// The operation is atomic: on failure every frame taken so far is given
    /// back to `alloc` before the error is returned.
    ///
    /// # Errors
    /// - [`AddressSpaceError::ImageTooLarge`] if `image` does not fit the
    ///   image window; nothing is allocated in that case.
    /// - [`AddressSpaceError::OutOfMemory`] if any frame allocation fails.
    pub fn build<A, M>(
        alloc: &mut A,
        mem: &mut M,
        kernel_table: PageTable,
        image: &[u8],
        args: &[u8],
    ) -> Result<Self, AddressSpaceError>
    where
        A: FrameAlloc + ?Sized,
        M: PhysMapper + ?Sized,
    {
        if image.len() > PROG_MAX_SIZE as usize {
            return Err(AddressSpaceError::ImageTooLarge(image.len()));
        }

        let mut ledger = Ledger::default();
        match Self::assemble(alloc, mem, kernel_table, image, args, &mut ledger) {
            Ok(space) => Ok(space),
            Err(e) => {
                trace!("address space build failed ({e}), releasing {} frames", ledger.len());
                ledger.release(alloc);
                Err(e)
            }
        }
    }

    fn assemble<A, M>(
        alloc: &mut A,
        mem: &mut M,
        kernel_table: PageTable,
        image: &[u8],
        args: &[u8],
        ledger: &mut Ledger,
    ) -> Result<Self, AddressSpaceError>
    where
        A: FrameAlloc + ?Sized,
        M: PhysMapper + ?Sized,
    {
        let directory = PageDirectory::at(ledger.take(alloc)?);
        directory.zero(mem);
        let table = PageTable::at(ledger.take(alloc)?);
        table.zero(mem);

        let kernel_stack = ledger.take(alloc)?;
        mem.zero_frame(kernel_stack);

        let image_base = ledger.take_run(alloc, PROG_FRAMES)?;
        for i in 0..PROG_FRAMES {
            let va = VirtualAddress::new(PROG_BASE + i * FRAME_SIZE);
            table.set_entry(mem, va.table_index(), PageEntryBits::user_page(image_base.offset(i)));
        }

        for i in 0..USER_STACK_FRAMES {
            let frame = ledger.take(alloc)?;
            mem.zero_frame(frame);
            let va = VirtualAddress::new(USER_STACK_BASE + i * FRAME_SIZE);
            table.set_entry(mem, va.table_index(), PageEntryBits::user_page(frame));
        }

        let args_frame = table
            .entry(mem, VirtualAddress::new(ARGS_BASE).table_index())
            .frame();
        let args = bounded_args(args);
        mem.write(args_frame.base() + VirtualAddress::new(ARGS_BASE).page_offset(), args);
        mem.write(
            args_frame.base() + VirtualAddress::new(ARGS_BASE).page_offset() + len_u32(args),
            &[0],
        );

        // The image frames may have belonged to an earlier process.
        mem.write(image_base.base(), image);
        mem.fill(
            image_base.base() + len_u32(image),
            (PROG_MAX_SIZE as usize) - image.len(),
            0,
        );

        directory.set_entry(mem, 0, PageEntryBits::table(kernel_table.frame(), true));
        directory.set_entry(mem, USER_DIRECTORY_INDEX, PageEntryBits::table(table.frame(), true));
        map_identity_large_pages(mem, directory, USER_DIRECTORY_INDEX + 1);

        ledger.commit();
        trace!(
            "built address space: directory={:?} table={:?} image={:?}+{PROG_FRAMES}",
            directory.frame(),
            table.frame(),
            image_base
        );

        Ok(Self {
            directory,
            table,
            kernel_stack,
        })
    }

    /// Release every frame owned by this address space.
    ///
    /// Walks the private table so that image, stack, argument and heap frames
    /// are recovered uniformly, then frees table, directory and supervisor
    /// stack.
    pub fn teardown<A, M>(self, alloc: &mut A, mem: &M)
    where
        A: FrameAlloc + ?Sized,
        M: PhysMapper + ?Sized,
    {
        let entries = self.table.present_entries(mem);
        trace!(
            "tearing down {:?}: {} mapped pages",
            self.directory.frame(),
            entries.len()
        );
        for (_, entry) in entries {
            alloc.free_frame(entry.frame());
        }
        alloc.free_frame(self.table.frame());
        alloc.free_frame(self.directory.frame());
        alloc.free_frame(self.kernel_stack);
    }

    /// Map a fresh, zeroed user page at `va` unless one is already there.
    ///
    /// Returns `true` if a frame was allocated.
    ///
    /// # Errors
    /// - [`AddressSpaceError::OutsideWindow`] if `va` is not in the process window.
    /// - [`AddressSpaceError::OutOfMemory`] if no frame is left.
    pub fn map_user_page<A, M>(
        &self,
        alloc: &mut A,
        mem: &mut M,
        va: VirtualAddress,
    ) -> Result<bool, AddressSpaceError>
    where
        A: FrameAlloc + ?Sized,
        M: PhysMapper + ?Sized,
    {
        if va.directory_index() != USER_DIRECTORY_INDEX {
            return Err(AddressSpaceError::OutsideWindow(va));
        }
        if self.table.entry(mem, va.table_index()).present() {
            return Ok(false);
        }

        let frame = alloc.alloc_frame().ok_or(AddressSpaceError::OutOfMemory)?;
        mem.zero_frame(frame);
        self.table
            .set_entry(mem, va.table_index(), PageEntryBits::user_page(frame));
        trace!("mapped {} -> {:?}", va.page_base(), frame);
        Ok(true)
    }

    /// Whether `va` is backed by a page in the private table.
    pub fn is_mapped<M: PhysMapper + ?Sized>(&self, mem: &M, va: VirtualAddress) -> bool {
        va.directory_index() == USER_DIRECTORY_INDEX
            && self.table.entry(mem, va.table_index()).present()
    }

    /// Number of pages currently mapped in the process window.
    pub fn mapped_user_pages<M: PhysMapper + ?Sized>(&self, mem: &M) -> usize {
        self.table.present_entries(mem).len()
    }

    #[inline]
    #[must_use]
    pub const fn directory(&self) -> PageDirectory {
        self.directory
    }

    #[inline]
    #[must_use]
    pub const fn kernel_stack(&self) -> Frame {
        self.kernel_stack
    }

    /// One past the highest byte of the supervisor stack.
    #[inline]
    #[must_use]
    pub const fn kernel_stack_top(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.kernel_stack.base().as_u32() + KERNEL_STACK_SIZE)
    }
}

/// Fill `table` with the identity mapping of the lowest 4 MiB.
///
/// Supervisor only, except the VGA window which user code may touch directly.
pub fn build_kernel_table<M: PhysMapper + ?Sized>(mem: &mut M, table: PageTable) {
    for i in 0..ENTRIES {
        #[allow(clippy::cast_possible_truncation)]
        let frame = Frame::from_number(i as u32);
        let pa = frame.base().as_u32();
        let entry = if (VGA_WINDOW_START..VGA_WINDOW_END).contains(&pa) {
            PageEntryBits::user_page(frame)
        } else {
            PageEntryBits::kernel_page(frame)
        };
        table.set_entry(mem, i, entry);
    }
}

/// Fill `directory` as the kernel's own directory: the shared table at entry
/// 0 and supervisor identity large pages everywhere else.
pub fn build_boot_directory<M: PhysMapper + ?Sized>(
    mem: &mut M,
    directory: PageDirectory,
    kernel_table: PageTable,
) {
    directory.zero(mem);
    directory.set_entry(mem, 0, PageEntryBits::table(kernel_table.frame(), false));
    map_identity_large_pages(mem, directory, 1);
}

fn map_identity_large_pages<M: PhysMapper + ?Sized>(
    mem: &mut M,
    directory: PageDirectory,
    first: usize,
) {
    for i in first..ENTRIES {
        #[allow(clippy::cast_possible_truncation)]
        let base = PhysicalAddress::new((i as u32) << Size4M::SHIFT);
        directory.set_entry(mem, i, PageEntryBits::kernel_large_page(base));
    }
}

/// Walk `directory` the way the MMU would for `access` at `va`.
///
/// The kernel runs with `CR0.WP` clear, so supervisor accesses only fail on
/// non-present entries.
///
/// # Errors
/// A [`PageFault`] carrying `va` and the error code the CPU would push.
pub fn translate<M: PhysMapper + ?Sized>(
    mem: &M,
    directory: PageDirectory,
    va: VirtualAddress,
    access: Access,
) -> Result<PhysicalAddress, PageFault> {
    let fault = |present: bool| PageFault {
        address: va,
        error: PageFaultError::for_access(access, present),
    };
    let denied =
        |e: PageEntryBits| access.user && (!e.user_access() || (access.write && !e.writable()));

    let pde = directory.entry(mem, va.directory_index());
    if !pde.present() {
        return Err(fault(false));
    }
    if denied(pde) {
        return Err(fault(true));
    }
    if pde.large_page() {
        return Ok(pde.physical_address() + (va.as_u32() & (Size4M::SIZE - 1)));
    }

    let pte = PageTable::at(pde.frame()).entry(mem, va.table_index());
    if !pte.present() {
        return Err(fault(false));
    }
    if denied(pte) {
        return Err(fault(true));
    }
    Ok(pte.physical_address() + va.page_offset())
}

/// Copy `buf.len()` bytes from virtual memory at `va` through `directory`.
///
/// # Errors
/// The first [`PageFault`] hit; bytes before it have been copied.
pub fn read_virtual<M: PhysMapper + ?Sized>(
    mem: &M,
    directory: PageDirectory,
    va: VirtualAddress,
    buf: &mut [u8],
    user: bool,
) -> Result<(), PageFault> {
    let access = Access { write: false, user };
    let mut done = 0usize;
    while done < buf.len() {
        let cursor = advance(va, done)?;
        let pa = translate(mem, directory, cursor, access)?;
        let chunk = chunk_len(cursor, buf.len() - done);
        mem.read(pa, &mut buf[done..done + chunk]);
        done += chunk;
    }
    Ok(())
}

/// Copy `data` to virtual memory at `va` through `directory`.
///
/// # Errors
/// The first [`PageFault`] hit; bytes before it have been written.
pub fn write_virtual<M: PhysMapper + ?Sized>(
    mem: &mut M,
    directory: PageDirectory,
    va: VirtualAddress,
    data: &[u8],
    user: bool,
) -> Result<(), PageFault> {
    let access = Access { write: true, user };
    let mut done = 0usize;
    while done < data.len() {
        let cursor = advance(va, done)?;
        let pa = translate(mem, directory, cursor, access)?;
        let chunk = chunk_len(cursor, data.len() - done);
        mem.write(pa, &data[done..done + chunk]);
        done += chunk;
    }
    Ok(())
}

/// `va + done`, faulting like the CPU would when running off the top of the
/// address space.
fn advance(va: VirtualAddress, done: usize) -> Result<VirtualAddress, PageFault> {
    u32::try_from(done)
        .ok()
        .and_then(|d| va.checked_add(d))
        .ok_or(PageFault {
            address: va,
            error: PageFaultError::new(),
        })
}

fn chunk_len(cursor: VirtualAddress, remaining: usize) -> usize {
    let left_in_page = (Size4K::SIZE - cursor.page_offset()) as usize;
    left_in_page.min(remaining)
}

fn bounded_args(args: &[u8]) -> &[u8] {
    let end = args
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(args.len())
        .min(ARGS_MAX as usize - 1);
    &args[..end]
}

#[allow(clippy::cast_possible_truncation)]
const fn len_u32(bytes: &[u8]) -> u32 {
    bytes.len() as u32
}

/// Frames taken during a build, released in reverse on failure.
#[derive(Default)]
struct Ledger {
    runs: Vec<(Frame, u32)>,
}

impl Ledger {
    fn take<A: FrameAlloc + ?Sized>(&mut self, alloc: &mut A) -> Result<Frame, AddressSpaceError> {
        self.take_run(alloc, 1)
    }

    fn take_run<A: FrameAlloc + ?Sized>(
        &mut self,
        alloc: &mut A,
        count: u32,
    ) -> Result<Frame, AddressSpaceError> {
        let first = if count == 1 {
            alloc.alloc_frame()
        } else {
            alloc.alloc_contiguous(count)
        }
        .ok_or(AddressSpaceError::OutOfMemory)?;
        self.runs.push((first, count));
        Ok(first)
    }

    fn len(&self) -> u32 {
        self.runs.iter().map(|&(_, n)| n).sum()
    }

    fn release<A: FrameAlloc + ?Sized>(&mut self, alloc: &mut A) {
        while let Some((first, count)) = self.runs.pop() {
            for i in 0..count {
                alloc.free_frame(first.offset(i));
            }
        }
    }

    fn commit(&mut self) {
        self.runs.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::info::{HEAP_BASE, KERNEL_PAGE_TABLE, USER_STACK_TOP, VGA_TEXT_BUFFER};
    use crate::testing::{PoolAlloc, TestPhys};

    fn kernel_table(mem: &mut TestPhys) -> PageTable {
        let table = PageTable::at(Frame::containing(PhysicalAddress::new(KERNEL_PAGE_TABLE)));
        build_kernel_table(mem, table);
        table
    }

    fn read(mem: &TestPhys, space: &AddressSpace, va: u32, len: usize) -> Vec<u8> {
        let mut buf = alloc::vec![0u8; len];
        read_virtual(mem, space.directory(), VirtualAddress::new(va), &mut buf, true)
            .expect("readable");
        buf
    }

    #[test]
    fn build_maps_image_stack_and_args() {
        let mut mem = TestPhys::default();
        let kt = kernel_table(&mut mem);
        let mut alloc = PoolAlloc::new(0x100, 256);

        let space = AddressSpace::build(&mut alloc, &mut mem, kt, b"\x7fIMG", b"one two")
            .expect("build");

        assert_eq!(read(&mem, &space, PROG_BASE, 4), b"\x7fIMG");
        assert_eq!(read(&mem, &space, ARGS_BASE, 8), b"one two\0");
        assert_eq!(read(&mem, &space, USER_STACK_TOP - 4, 4), [0; 4]);
        assert_eq!(
            space.mapped_user_pages(&mem),
            (PROG_FRAMES + USER_STACK_FRAMES) as usize
        );
        assert_eq!(
            alloc.free_count(),
            alloc.total - (PROG_FRAMES + USER_STACK_FRAMES + 3) as usize
        );
    }

    #[test]
    fn stale_frame_contents_are_cleared() {
        let mut mem = TestPhys::default();
        let kt = kernel_table(&mut mem);
        let mut alloc = PoolAlloc::new(0x100, 256);
        for n in 0x100..0x200 {
            mem.fill(Frame::from_number(n).base(), 4096, 0xAA);
        }

        let space = AddressSpace::build(&mut alloc, &mut mem, kt, b"hi", b"").expect("build");

        assert_eq!(read(&mem, &space, PROG_BASE, 4), b"hi\0\0");
        assert!(read(&mem, &space, PROG_BASE + 0x1000, 4096).iter().all(|&b| b == 0));
        assert!(read(&mem, &space, USER_STACK_BASE + 0x1000, 4096).iter().all(|&b| b == 0));
    }

    #[test]
    fn args_are_truncated() {
        let mut mem = TestPhys::default();
        let kt = kernel_table(&mut mem);
        let mut alloc = PoolAlloc::new(0x100, 256);
        let long = [b'x'; 500];

        let space = AddressSpace::build(&mut alloc, &mut mem, kt, b"", &long).expect("build");

        let args = read(&mem, &space, ARGS_BASE, ARGS_MAX as usize);
        assert_eq!(args[ARGS_MAX as usize - 1], 0);
        assert!(args[..ARGS_MAX as usize - 1].iter().all(|&b| b == b'x'));
    }

    #[test]
    fn failed_build_returns_every_frame() {
        let mut mem = TestPhys::default();
        let kt = kernel_table(&mut mem);
        // Enough for directory, table, stack and the image run, but not the stack window.
        let mut alloc = PoolAlloc::new(0x100, 3 + PROG_FRAMES + 1);

        let err = AddressSpace::build(&mut alloc, &mut mem, kt, b"x", b"").unwrap_err();
        assert_eq!(err, AddressSpaceError::OutOfMemory);
        assert_eq!(alloc.free_count(), alloc.total);
    }

    #[test]
    fn oversized_image_allocates_nothing() {
        let mut mem = TestPhys::default();
        let kt = kernel_table(&mut mem);
        let mut alloc = PoolAlloc::new(0x100, 256);
        let image = alloc::vec![0u8; PROG_MAX_SIZE as usize + 1];

        let err = AddressSpace::build(&mut alloc, &mut mem, kt, &image, b"").unwrap_err();
        assert_eq!(err, AddressSpaceError::ImageTooLarge(image.len()));
        assert_eq!(alloc.free_count(), alloc.total);
    }

    #[test]
    fn teardown_recovers_heap_pages_too() {
        let mut mem = TestPhys::default();
        let kt = kernel_table(&mut mem);
        let mut alloc = PoolAlloc::new(0x100, 256);

        let space = AddressSpace::build(&mut alloc, &mut mem, kt, b"x", b"").expect("build");
        let heap = VirtualAddress::new(HEAP_BASE);
        assert!(space.map_user_page(&mut alloc, &mut mem, heap).expect("map"));
        assert!(!space.map_user_page(&mut alloc, &mut mem, heap).expect("map"));
        assert!(space.is_mapped(&mem, heap));

        space.teardown(&mut alloc, &mem);
        assert_eq!(alloc.free_count(), alloc.total);
    }

    #[test]
    fn heap_pages_outside_the_window_are_rejected() {
        let mut mem = TestPhys::default();
        let kt = kernel_table(&mut mem);
        let mut alloc = PoolAlloc::new(0x100, 256);
        let space = AddressSpace::build(&mut alloc, &mut mem, kt, b"x", b"").expect("build");

        let va = VirtualAddress::new(0x0080_0000);
        assert_eq!(
            space.map_user_page(&mut alloc, &mut mem, va),
            Err(AddressSpaceError::OutsideWindow(va))
        );
    }

    #[test]
    fn private_windows_are_isolated() {
        let mut mem = TestPhys::default();
        let kt = kernel_table(&mut mem);
        let mut alloc = PoolAlloc::new(0x100, 512);
        let a = AddressSpace::build(&mut alloc, &mut mem, kt, b"AAAA", b"").expect("build");
        let b = AddressSpace::build(&mut alloc, &mut mem, kt, b"BBBB", b"").expect("build");

        write_virtual(&mut mem, a.directory(), VirtualAddress::new(PROG_BASE + 8), b"secret", true)
            .expect("writable");

        assert_eq!(read(&mem, &a, PROG_BASE + 8, 6), b"secret");
        assert_eq!(read(&mem, &b, PROG_BASE + 8, 6), [0; 6]);
        assert_eq!(read(&mem, &b, PROG_BASE, 4), b"BBBB");
    }

    #[test]
    fn user_access_is_checked_at_both_levels() {
        let mut mem = TestPhys::default();
        let kt = kernel_table(&mut mem);
        let mut alloc = PoolAlloc::new(0x100, 256);
        let space = AddressSpace::build(&mut alloc, &mut mem, kt, b"x", b"").expect("build");
        let dir = space.directory();

        let kernel_low = translate(&mem, dir, VirtualAddress::new(0x1000), Access::USER_WRITE);
        let err = kernel_low.unwrap_err();
        assert!(err.error.present() && err.error.user() && err.error.write());

        let heap = translate(&mem, dir, VirtualAddress::new(HEAP_BASE), Access::USER_WRITE);
        assert!(!heap.unwrap_err().error.present());

        let high = translate(&mem, dir, VirtualAddress::new(0x0100_0000), Access::USER_READ);
        assert!(high.unwrap_err().error.present());

        assert_eq!(
            translate(&mem, dir, VirtualAddress::new(VGA_TEXT_BUFFER), Access::USER_WRITE),
            Ok(PhysicalAddress::new(VGA_TEXT_BUFFER))
        );
        assert_eq!(
            translate(&mem, dir, VirtualAddress::new(0x0123_4567), Access::KERNEL_WRITE),
            Ok(PhysicalAddress::new(0x0123_4567))
        );
    }

    #[test]
    fn boot_directory_has_no_user_window() {
        let mut mem = TestPhys::default();
        let kt = kernel_table(&mut mem);
        let dir = PageDirectory::at(Frame::from_number(0x21));
        build_boot_directory(&mut mem, dir, kt);

        assert!(translate(&mem, dir, VirtualAddress::new(PROG_BASE), Access::USER_READ).is_err());
        assert!(translate(&mem, dir, VirtualAddress::new(PROG_BASE), Access::KERNEL_READ).is_ok());
    }
}
