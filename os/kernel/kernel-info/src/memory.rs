//! # Memory Layout

/// Size of one physical frame and one small page.
pub const FRAME_SIZE: u32 = 0x1000;

/// First physical address handed out by the frame allocator (1 MiB).
///
/// Everything below is fixed low memory: the kernel image, the boot stack,
/// the shared kernel page table and the VGA window.
pub const PMM_BASE: u32 = 0x0010_0000;

/// End (exclusive) of the physical range managed by the frame allocator (128 MiB).
pub const PMM_END: u32 = 0x0800_0000;

/// Number of frames in the managed range.
pub const PMM_FRAMES: u32 = (PMM_END - PMM_BASE) / FRAME_SIZE;

/// Physical address of the page table shared by every directory as entry 0.
pub const KERNEL_PAGE_TABLE: u32 = 0x0002_0000;

/// Physical address of the kernel's own directory, active while no process runs.
pub const BOOT_PAGE_DIRECTORY: u32 = 0x0002_1000;

/// Start of the VGA window, the only user-accessible part of the kernel table.
pub const VGA_WINDOW_START: u32 = 0x000A_0000;

/// End (exclusive) of the VGA window.
pub const VGA_WINDOW_END: u32 = 0x000C_0000;

/// Text-mode frame buffer inside the VGA window.
pub const VGA_TEXT_BUFFER: u32 = 0x000B_8000;

/// Base of the per-process 4 MiB window (page-directory entry 1).
pub const USER_WINDOW_BASE: u32 = 0x0040_0000;

/// Size of the per-process window.
pub const USER_WINDOW_SIZE: u32 = 0x0040_0000;

/// Virtual load address of a program image.
pub const PROG_BASE: u32 = USER_WINDOW_BASE;

/// Largest program image that fits into the image window.
pub const PROG_MAX_SIZE: u32 = 256 * 1024;

/// Frames backing the image window.
pub const PROG_FRAMES: u32 = PROG_MAX_SIZE / FRAME_SIZE;

/// Size of the executable header at the start of every image.
pub const IMAGE_HEADER_SIZE: u32 = 32;

/// First byte after the image header: the entry point, followed by the
/// program's initialized data.
pub const PROG_ENTRY: u32 = PROG_BASE + IMAGE_HEADER_SIZE;

/// Initial heap break, directly above the image window.
pub const HEAP_BASE: u32 = PROG_BASE + PROG_MAX_SIZE;

/// The heap break never moves past this address.
pub const HEAP_LIMIT: u32 = 0x007F_8000;

/// Lowest page of the stack and argument window.
pub const USER_STACK_BASE: u32 = 0x007F_C000;

/// Frames backing the stack and argument window.
pub const USER_STACK_FRAMES: u32 = 4;

/// Initial user stack pointer (one past the end of the window).
pub const USER_STACK_TOP: u32 = USER_STACK_BASE + USER_STACK_FRAMES * FRAME_SIZE;

/// Where the NUL-terminated argument string of a process lives.
pub const ARGS_BASE: u32 = USER_STACK_BASE;

/// Capacity of the argument buffer, including the terminating NUL.
pub const ARGS_MAX: u32 = 200;

/// The size of the per-process supervisor stack.
pub const KERNEL_STACK_SIZE: u32 = FRAME_SIZE;

/// Exit code reported for a process terminated by a privilege violation.
pub const FAULT_EXIT_CODE: i32 = 139;

const _: () = {
    assert!(PMM_BASE.is_multiple_of(FRAME_SIZE));
    assert!(PMM_END.is_multiple_of(FRAME_SIZE));
    assert!(KERNEL_PAGE_TABLE < VGA_WINDOW_START);
    assert!(BOOT_PAGE_DIRECTORY < VGA_WINDOW_START);
    assert!(PROG_MAX_SIZE.is_multiple_of(FRAME_SIZE));
    assert!(IMAGE_HEADER_SIZE < PROG_MAX_SIZE);
    assert!(HEAP_BASE < HEAP_LIMIT);
    assert!(HEAP_LIMIT.is_multiple_of(FRAME_SIZE));
    assert!(HEAP_LIMIT <= USER_STACK_BASE);
    assert!(USER_STACK_TOP == USER_WINDOW_BASE + USER_WINDOW_SIZE);
    assert!(ARGS_MAX <= FRAME_SIZE);
    assert!(KERNEL_STACK_SIZE.is_multiple_of(FRAME_SIZE));
};
