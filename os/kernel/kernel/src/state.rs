//! The one mutable kernel object.
//!
//! Frame bitmap, physical memory, process table and tick counter only change
//! together under a single interrupt-masking lock. Nothing here ever blocks.

use crate::config::KernelConfig;
use crate::process::ProcessTable;
use kernel_alloc::{BitmapFrameAlloc, SparsePhysMemory};
use kernel_info::memory::{BOOT_PAGE_DIRECTORY, FRAME_SIZE, KERNEL_PAGE_TABLE, PMM_END, USER_WINDOW_SIZE};
use kernel_memory_addresses::{Frame, PhysicalAddress};
use kernel_vmem::address_space::{build_boot_directory, build_kernel_table};
use kernel_vmem::{PageDirectory, PageTable};
use stdlib::syscall_abi::MemInfo;

const FRAME_KB: u32 = FRAME_SIZE / 1024;

pub struct KernelState {
    pub frames: BitmapFrameAlloc,
    pub memory: SparsePhysMemory,
    pub procs: ProcessTable,
    /// Serviced timer interrupts since boot.
    pub ticks: u64,
    /// Identity map of the low 4 MiB, shared by every directory.
    pub kernel_table: PageTable,
    /// The directory in `CR3` while the boot context runs.
    pub boot_directory: PageDirectory,
}

impl KernelState {
    /// Fresh machine state: every managed frame free, the shared kernel
    /// table and the boot directory built in low memory.
    #[must_use]
    pub fn new(config: &KernelConfig) -> Self {
        let mut memory = SparsePhysMemory::new(PhysicalAddress::new(PMM_END));
        let kernel_table = PageTable::at(Frame::containing(PhysicalAddress::new(KERNEL_PAGE_TABLE)));
        let boot_directory = PageDirectory::at(Frame::containing(PhysicalAddress::new(BOOT_PAGE_DIRECTORY)));
        build_kernel_table(&mut memory, kernel_table);
        build_boot_directory(&mut memory, boot_directory, kernel_table);

        Self {
            frames: BitmapFrameAlloc::new(
                PhysicalAddress::new(config.pmm_base),
                PhysicalAddress::new(config.pmm_end),
            ),
            memory,
            procs: ProcessTable::new(config.max_procs),
            ticks: 0,
            kernel_table,
            boot_directory,
        }
    }

    /// Physical and per-process virtual memory usage in KiB.
    ///
    /// Every live process accounts for one 4 MiB window; its used part is
    /// the number of pages present in its private table.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn mem_info(&self) -> MemInfo {
        let stats = self.frames.stats();
        let live = self.procs.iter().filter(|p| p.is_live());
        let (procs, pages) = live.fold((0u32, 0u32), |(n, pages), p| {
            let mapped = p
                .space
                .as_ref()
                .map_or(0, |s| s.mapped_user_pages(&self.memory) as u32);
            (n + 1, pages + mapped)
        });

        let virt_total_kb = procs * (USER_WINDOW_SIZE / 1024);
        let virt_used_kb = pages * FRAME_KB;
        MemInfo {
            phys_total_kb: stats.total as u32 * FRAME_KB,
            phys_used_kb: stats.used as u32 * FRAME_KB,
            phys_free_kb: stats.free as u32 * FRAME_KB,
            virt_total_kb,
            virt_used_kb,
            virt_free_kb: virt_total_kb.saturating_sub(virt_used_kb),
            procs,
        }
    }

    /// `CR3` value for `pid`, or the boot directory if it has no address space.
    #[must_use]
    pub fn directory_base(&self, pid: Option<usize>) -> u32 {
        pid.and_then(|pid| self.procs.get(pid))
            .and_then(|p| p.space.as_ref())
            .map_or(self.boot_directory, kernel_vmem::AddressSpace::directory)
            .frame()
            .base()
            .as_u32()
    }

    /// `ESP0` value for `pid`; zero if it has no supervisor stack.
    #[must_use]
    pub fn kernel_stack_top(&self, pid: usize) -> u32 {
        self.procs
            .get(pid)
            .and_then(|p| p.space.as_ref())
            .map_or(0, |s| s.kernel_stack_top().as_u32())
    }
}
