//! # Sparse physical memory
//!
//! A [`PhysMapper`] backed by a map from frame number to a 4 KiB buffer.
//! Frames materialize on their first write; untouched frames read as zero.
//!
//! ## Why sparse?
//! - The managed range is 127 MiB, but a typical run touches a few hundred
//!   frames (page tables, images, stacks, the VGA window).
//! - Freed frames are *not* cleared, exactly like RAM. Stale bytes left by a
//!   previous owner stay visible until someone overwrites them.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::SparsePhysMemory;
//! use kernel_vmem::{PhysMapper, PhysicalAddress};
//!
//! let mut mem = SparsePhysMemory::new(PhysicalAddress::new(0x0800_0000));
//! mem.write_u32(PhysicalAddress::new(0x0010_0ffe), 0xdead_beef);
//! assert_eq!(mem.read_u32(PhysicalAddress::new(0x0010_0ffe)), 0xdead_beef);
//! assert_eq!(mem.read_u32(PhysicalAddress::new(0x0020_0000)), 0);
//! ```

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::{Frame, PhysicalAddress};
use kernel_vmem::PhysMapper;

const FRAME_BYTES: usize = FRAME_SIZE as usize;

type FrameBuffer = Box<[u8; FRAME_BYTES]>;

/// Installed RAM `[0, end)`, stored frame by frame.
///
/// Reads beyond `end` return zero and writes beyond it are dropped.
pub struct SparsePhysMemory {
    frames: BTreeMap<u32, FrameBuffer>,
    end: PhysicalAddress,
}

impl SparsePhysMemory {
    #[must_use]
    pub const fn new(end: PhysicalAddress) -> Self {
        Self {
            frames: BTreeMap::new(),
            end,
        }
    }

    /// Number of frames that have ever been written.
    #[must_use]
    pub fn resident_frames(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        self.end
    }

    /// Visit `[pa, pa + len)` frame by frame as `(frame, offset in frame,
    /// offset in request, chunk length)`, stopping at the end of RAM.
    fn for_each_chunk(&self, pa: PhysicalAddress, len: usize, mut f: impl FnMut(Frame, usize, usize, usize)) {
        let mut done = 0usize;
        while done < len {
            let Some(cursor) = u32::try_from(done).ok().and_then(|d| pa.checked_add(d)) else {
                return;
            };
            if cursor >= self.end {
                return;
            }
            let offset = cursor.page_offset() as usize;
            let chunk = (FRAME_BYTES - offset).min(len - done);
            f(Frame::containing(cursor), offset, done, chunk);
            done += chunk;
        }
    }

    fn frame_mut(&mut self, frame: Frame) -> &mut [u8; FRAME_BYTES] {
        self.frames
            .entry(frame.number())
            .or_insert_with(|| Box::new([0u8; FRAME_BYTES]))
    }
}

impl PhysMapper for SparsePhysMemory {
    fn read(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        buf.fill(0);
        self.for_each_chunk(pa, buf.len(), |frame, offset, at, chunk| {
            if let Some(bytes) = self.frames.get(&frame.number()) {
                buf[at..at + chunk].copy_from_slice(&bytes[offset..offset + chunk]);
            }
        });
    }

    fn write(&mut self, pa: PhysicalAddress, data: &[u8]) {
        let mut chunks = alloc::vec::Vec::new();
        self.for_each_chunk(pa, data.len(), |frame, offset, at, chunk| {
            chunks.push((frame, offset, at, chunk));
        });
        for (frame, offset, at, chunk) in chunks {
            self.frame_mut(frame)[offset..offset + chunk].copy_from_slice(&data[at..at + chunk]);
        }
    }

    fn fill(&mut self, pa: PhysicalAddress, len: usize, value: u8) {
        let mut chunks = alloc::vec::Vec::new();
        self.for_each_chunk(pa, len, |frame, offset, _, chunk| {
            chunks.push((frame, offset, chunk));
        });
        for (frame, offset, chunk) in chunks {
            if value == 0 && offset == 0 && chunk == FRAME_BYTES {
                // A fully cleared frame reads the same as an absent one.
                self.frames.remove(&frame.number());
                continue;
            }
            self.frame_mut(frame)[offset..offset + chunk].fill(value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ram() -> SparsePhysMemory {
        SparsePhysMemory::new(PhysicalAddress::new(0x0080_0000))
    }

    #[test]
    fn writes_straddling_frames_read_back() {
        let mut mem = ram();
        let pa = PhysicalAddress::new(0x0010_0FFC);
        mem.write(pa, b"abcdefgh");

        let mut buf = [0u8; 8];
        mem.read(pa, &mut buf);
        assert_eq!(&buf, b"abcdefgh");
        assert_eq!(mem.resident_frames(), 2);
    }

    #[test]
    fn freed_contents_persist_until_cleared() {
        let mut mem = ram();
        let frame = Frame::from_number(0x123);
        mem.fill(frame.base(), FRAME_BYTES, 0x5A);
        assert_eq!(mem.read_u32(frame.base() + 100), 0x5A5A_5A5A);

        mem.zero_frame(frame);
        assert_eq!(mem.read_u32(frame.base() + 100), 0);
        assert_eq!(mem.resident_frames(), 0);
    }

    #[test]
    fn accesses_past_installed_memory_are_open_bus() {
        let mut mem = ram();
        let top = PhysicalAddress::new(0x007F_FFFE);
        mem.write(top, &[1, 2, 3, 4]);

        let mut buf = [9u8; 4];
        mem.read(top, &mut buf);
        assert_eq!(buf, [1, 2, 0, 0]);
    }
}
