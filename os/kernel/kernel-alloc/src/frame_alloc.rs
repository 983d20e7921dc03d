//! Bitmap physical frame allocator.

use alloc::vec;
use alloc::vec::Vec;
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::{Frame, PhysicalAddress};
use kernel_vmem::FrameAlloc;
use log::trace;
use thiserror::Error;

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum FrameAllocError {
    #[error("no free physical frame")]
    OutOfMemory,
    #[error("a contiguous run must contain at least one frame")]
    InvalidCount,
}

/// Snapshot of allocator occupancy, in frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameStats {
    pub total: usize,
    pub used: usize,
    pub free: usize,
}

/// Physical frame allocator over a fixed range, one bit per frame.
///
/// Bit `i` covers the frame at `base + i * FRAME_SIZE`; a set bit means the
/// frame is in use.
pub struct BitmapFrameAlloc {
    bitmap: Vec<u64>,
    base: PhysicalAddress,
    frames: usize,
    used: usize,
}

impl BitmapFrameAlloc {
    /// Manage `[base, end)`; every frame starts out free.
    ///
    /// Both bounds are rounded inwards to whole frames.
    #[must_use]
    pub fn new(base: PhysicalAddress, end: PhysicalAddress) -> Self {
        let first = base.as_u32().div_ceil(FRAME_SIZE);
        let last = end.as_u32() / FRAME_SIZE;
        let frames = last.saturating_sub(first) as usize;

        let mut bitmap = vec![0u64; frames.div_ceil(WORD_BITS)];
        // Bits past the end of the range are permanently "used" so the word
        // scan never hands them out.
        let tail = frames % WORD_BITS;
        if let (Some(last_word), true) = (bitmap.last_mut(), tail != 0) {
            *last_word = !0u64 << tail;
        }

        Self {
            bitmap,
            base: Frame::from_number(first).base(),
            frames,
            used: 0,
        }
    }

    /// Allocate the lowest free frame.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] if every frame is in use.
    pub fn allocate(&mut self) -> Result<Frame, FrameAllocError> {
        let (word, bits) = self
            .bitmap
            .iter()
            .enumerate()
            .find(|&(_, &w)| w != u64::MAX)
            .ok_or(FrameAllocError::OutOfMemory)?;

        let index = word * WORD_BITS + bits.trailing_ones() as usize;
        self.mark_used(index);
        self.used += 1;

        let frame = self.frame_at(index);
        trace!("allocated {frame:?}");
        Ok(frame)
    }

    /// Allocate `count` consecutive frames and return the first.
    ///
    /// Scans bit by bit for the first run long enough; either the whole run
    /// is marked used or nothing is.
    ///
    /// # Errors
    /// - [`FrameAllocError::InvalidCount`] for `count == 0`.
    /// - [`FrameAllocError::OutOfMemory`] if no run of that length exists,
    ///   even if enough frames are free in total.
    pub fn allocate_contiguous(&mut self, count: usize) -> Result<Frame, FrameAllocError> {
        if count == 0 {
            return Err(FrameAllocError::InvalidCount);
        }

        let mut run_start = 0;
        let mut run_length = 0;
        for index in 0..self.frames {
            if self.is_used(index) {
                run_length = 0;
                continue;
            }
            if run_length == 0 {
                run_start = index;
            }
            run_length += 1;

            if run_length == count {
                for i in run_start..run_start + count {
                    self.mark_used(i);
                }
                self.used += count;

                let first = self.frame_at(run_start);
                trace!("allocated {count} contiguous frames at {first:?}");
                return Ok(first);
            }
        }

        Err(FrameAllocError::OutOfMemory)
    }

    /// Return `frame` to the pool.
    ///
    /// Frames outside the managed range and frames that are already free are
    /// ignored.
    pub fn free(&mut self, frame: Frame) {
        let Some(index) = self.index_of(frame) else {
            trace!("ignoring free of unmanaged {frame:?}");
            return;
        };
        if !self.is_used(index) {
            trace!("ignoring free of already free {frame:?}");
            return;
        }

        self.bitmap[index / WORD_BITS] &= !(1u64 << (index % WORD_BITS));
        self.used -= 1;
    }

    /// Whether `frame` is managed here and currently free.
    #[must_use]
    pub fn is_free(&self, frame: Frame) -> bool {
        self.index_of(frame).is_some_and(|i| !self.is_used(i))
    }

    #[must_use]
    pub const fn stats(&self) -> FrameStats {
        FrameStats {
            total: self.frames,
            used: self.used,
            free: self.frames - self.used,
        }
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    fn index_of(&self, frame: Frame) -> Option<usize> {
        let first = Frame::containing(self.base).number();
        let index = frame.number().checked_sub(first)? as usize;
        (index < self.frames).then_some(index)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn frame_at(&self, index: usize) -> Frame {
        Frame::containing(self.base).offset(index as u32)
    }

    fn is_used(&self, index: usize) -> bool {
        self.bitmap[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    fn mark_used(&mut self, index: usize) {
        self.bitmap[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
    }
}

impl FrameAlloc for BitmapFrameAlloc {
    fn alloc_frame(&mut self) -> Option<Frame> {
        self.allocate().ok()
    }

    fn alloc_contiguous(&mut self, count: u32) -> Option<Frame> {
        self.allocate_contiguous(count as usize).ok()
    }

    fn free_frame(&mut self, frame: Frame) {
        self.free(frame);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel_info::memory::{PMM_BASE, PMM_END, PMM_FRAMES};
    use std::collections::HashSet;

    fn small(frames: u32) -> BitmapFrameAlloc {
        BitmapFrameAlloc::new(
            PhysicalAddress::new(PMM_BASE),
            PhysicalAddress::new(PMM_BASE + frames * FRAME_SIZE),
        )
    }

    #[test]
    fn covers_the_managed_range() {
        let alloc = BitmapFrameAlloc::new(PhysicalAddress::new(PMM_BASE), PhysicalAddress::new(PMM_END));
        assert_eq!(alloc.stats().total, PMM_FRAMES as usize);
        assert_eq!(alloc.stats().free, PMM_FRAMES as usize);
    }

    #[test]
    fn allocates_lowest_first_and_reuses_freed_frames() {
        let mut alloc = small(130);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_eq!(a.base(), PhysicalAddress::new(PMM_BASE));
        assert_eq!(b, a.next());

        alloc.free(a);
        assert_eq!(alloc.allocate().unwrap(), a);
    }

    #[test]
    fn live_frames_are_unique_aligned_and_in_range() {
        let mut alloc = small(200);
        let mut live = HashSet::new();
        for round in 0..5u32 {
            for _ in 0..150 {
                if let Ok(f) = alloc.allocate() {
                    assert!(live.insert(f), "handed out {f:?} twice");
                }
            }
            let victims: Vec<Frame> = live.iter().copied().filter(|f| f.number() % (round + 2) == 0).collect();
            for f in victims {
                alloc.free(f);
                live.remove(&f);
            }
        }

        for f in &live {
            let pa = f.base().as_u32();
            assert_eq!(pa % FRAME_SIZE, 0);
            assert!((PMM_BASE..PMM_BASE + 200 * FRAME_SIZE).contains(&pa));
        }
        assert_eq!(alloc.stats().used, live.len());
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let mut alloc = small(3);
        for _ in 0..3 {
            alloc.allocate().unwrap();
        }
        assert_eq!(alloc.allocate(), Err(FrameAllocError::OutOfMemory));
        assert_eq!(alloc.stats().free, 0);
    }

    #[test]
    fn contiguous_runs_are_consecutive() {
        let mut alloc = small(128);
        let first = alloc.allocate_contiguous(70).unwrap();
        for i in 0..70 {
            assert!(!alloc.is_free(first.offset(i)));
        }
        let next = alloc.allocate().unwrap();
        assert_eq!(next, first.offset(70));
    }

    #[test]
    fn fragmentation_can_defeat_contiguous_requests() {
        let mut alloc = small(8);
        let frames: Vec<Frame> = (0..8).map(|_| alloc.allocate().unwrap()).collect();
        for f in frames.iter().step_by(2) {
            alloc.free(*f);
        }

        assert_eq!(alloc.stats().free, 4);
        assert_eq!(alloc.allocate_contiguous(2), Err(FrameAllocError::OutOfMemory));
        // A failed request leaves nothing behind.
        assert_eq!(alloc.stats().free, 4);
        assert_eq!(alloc.allocate_contiguous(1), Ok(frames[0]));
    }

    #[test]
    fn zero_length_runs_are_rejected() {
        let mut alloc = small(8);
        assert_eq!(alloc.allocate_contiguous(0), Err(FrameAllocError::InvalidCount));
    }

    #[test]
    fn freeing_outside_the_range_is_ignored() {
        let mut alloc = small(8);
        let f = alloc.allocate().unwrap();
        alloc.free(Frame::from_number(1));
        alloc.free(Frame::containing(PhysicalAddress::new(PMM_END)));
        alloc.free(f);
        alloc.free(f);
        assert_eq!(alloc.stats().used, 0);
    }
}
