//! Self-checks run from the shell. Each prints `<name>: OK` on success and
//! exits non-zero with a reason otherwise.

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;
use stdlib::layout::{HEAP_BASE, HEAP_LIMIT};
use stdlib::{Heap, SyscallPort, UserResult, Userland};

/// Outcome of a check that ran to completion: `Err` names what went wrong.
type Check = Result<(), &'static str>;

fn report(sys: &mut dyn SyscallPort, name: &str, check: Check) -> UserResult<i32> {
    match check {
        Ok(()) => {
            sys.print(&format!("{name}: OK\n"))?;
            Ok(0)
        }
        Err(why) => {
            sys.print(&format!("{name}: FAIL ({why})\n"))?;
            Ok(1)
        }
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).unwrap_or(0).wrapping_add(seed))
        .collect()
}

/// Writes `data` at `va` and reads it back.
fn round_trip(sys: &mut dyn SyscallPort, va: u32, data: &[u8]) -> UserResult<bool> {
    sys.store(va, data)?;
    let mut back = vec![0u8; data.len()];
    sys.load(va, &mut back)?;
    Ok(back == data)
}

/// Sleeps a little so a foreground sibling gets going, then reports.
pub fn background(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    sys.sleep(300)?;
    sys.print("bg: OK\n")?;
    Ok(0)
}

const EXEC_ROUNDS: usize = 300;

/// Launches `hello` repeatedly; every launch must free what it took.
pub fn exec_many(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    for _ in 0..EXEC_ROUNDS {
        if sys.exec("hello", "")? < 0 {
            return report(sys, "exec", Err("could not launch hello"));
        }
    }
    report(sys, "exec", Ok(()))
}

pub fn sleep(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    sys.print("sleeping 1 s ...\n")?;
    let check = if sys.sleep(1000)? == 0 {
        Ok(())
    } else {
        Err("non-zero return")
    };
    report(sys, "sleep", check)
}

/// Writes into the kernel's low memory, which must kill the process.
pub fn segfault(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    sys.store_u32(0x1000, 0xdead_beef)?;
    report(sys, "t_segflt", Err("write to kernel memory went through"))
}

/// Touches the heap without growing it first, which must kill the process.
pub fn unmapped_heap(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    sys.store_u32(HEAP_BASE, 0x4242_4242)?;
    sys.print("ERROR: expected segfault did not occur\n")?;
    Ok(1)
}

pub fn malloc(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    let check = malloc_steps(sys)?;
    report(sys, "malloc", check)
}

fn malloc_steps(sys: &mut dyn SyscallPort) -> UserResult<Check> {
    let mut heap = Heap::new();

    let Some(small) = heap.malloc(sys, 64)? else {
        return Ok(Err("malloc(64) returned null"));
    };
    let small_data = pattern(64, 7);
    if !round_trip(sys, small, &small_data)? {
        return Ok(Err("small block lost its contents"));
    }
    sys.print("alloc+write: ok\n")?;

    let Some(array) = heap.malloc(sys, 16 * 4)? else {
        return Ok(Err("malloc(64) for the array returned null"));
    };
    for i in 0..16u32 {
        sys.store_u32(array + i * 4, i * i)?;
    }
    for i in 0..16u32 {
        if sys.load_u32(array + i * 4)? != i * i {
            return Ok(Err("array element changed"));
        }
    }
    let mut again = vec![0u8; small_data.len()];
    sys.load(small, &mut again)?;
    if again != small_data {
        return Ok(Err("array overlapped the first block"));
    }
    sys.print("multi-alloc: ok\n")?;

    heap.free(sys, small)?;
    if heap.malloc(sys, 32)? != Some(small) {
        return Ok(Err("freed block was not reused"));
    }
    sys.print("free+reuse: ok\n")?;

    let Some(large) = heap.malloc(sys, 12288)? else {
        return Ok(Err("malloc(12288) returned null"));
    };
    if !round_trip(sys, large, &pattern(12288, 3))? {
        return Ok(Err("large block lost its contents"));
    }
    sys.print("large-alloc: ok\n")?;

    if heap.malloc(sys, 0x0040_0000)?.is_some() {
        return Ok(Err("4 MiB allocation succeeded"));
    }
    sys.print("exhaustion: ok\n")?;
    Ok(Ok(()))
}

/// Moves the break by hand.
pub fn sbrk(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    let check = sbrk_steps(sys)?;
    report(sys, "heap", check)
}

fn sbrk_steps(sys: &mut dyn SyscallPort) -> UserResult<Check> {
    if sys.sbrk(0)? != Some(HEAP_BASE) {
        return Ok(Err("initial break is not the heap base"));
    }
    if sys.sbrk(8192)? != Some(HEAP_BASE) {
        return Ok(Err("growing did not return the old break"));
    }

    let mut fresh = vec![0xffu8; 8192];
    sys.load(HEAP_BASE, &mut fresh)?;
    if fresh.iter().any(|&b| b != 0) {
        return Ok(Err("fresh heap pages are not zeroed"));
    }
    if !round_trip(sys, HEAP_BASE, &pattern(8192, 1))? {
        return Ok(Err("heap pages lost their contents"));
    }

    if sys.sbrk(0)? != Some(HEAP_BASE + 8192) {
        return Ok(Err("break did not move"));
    }
    if sys.sbrk(-4096)?.is_some() {
        return Ok(Err("shrinking was accepted"));
    }
    let past_limit = i32::try_from(HEAP_LIMIT).unwrap_or(i32::MAX);
    if sys.sbrk(past_limit)?.is_some() {
        return Ok(Err("growing past the heap limit was accepted"));
    }
    if sys.sbrk(0)? != Some(HEAP_BASE + 8192) {
        return Ok(Err("a refused call moved the break"));
    }
    Ok(Ok(()))
}
