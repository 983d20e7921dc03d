//! # Kernel Physical Memory
//!
//! This crate provides the two pieces of physical memory management every
//! other component builds on: the frame allocator that decides *which* frames
//! are in use, and the physical memory store that holds *what* is in them.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Address spaces (kernel-vmem)               │
//! │    • Directory / table construction                 │
//! │    • Image, stack, argument and heap mapping        │
//! └──────────┬──────────────────────────┬───────────────┘
//!            │ FrameAlloc               │ PhysMapper
//! ┌──────────▼──────────────┐ ┌─────────▼───────────────┐
//! │  Bitmap Frame Allocator │ │  Sparse Physical Memory │
//! │  • 1 bit per frame      │ │  • 4 KiB frames on      │
//! │  • lowest-first scan    │ │    first write          │
//! │  • contiguous runs      │ │  • open-bus outside RAM │
//! └─────────────────────────┘ └─────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame Allocator ([`frame_alloc`])
//!
//! Tracks the managed range `[PMM_BASE, PMM_END)` with one bit per frame
//! (set = used):
//! * **Single frames**: lowest address first, skipping fully used words
//! * **Contiguous runs**: first run of `n` free bits, marked used together
//! * **No defragmentation**: a contiguous request can fail even when enough
//!   frames are free in total
//! * **Lenient free**: freeing a frame outside the range is ignored
//!
//! ### Physical Memory ([`phys_mapper`])
//!
//! Implements [`kernel_vmem::PhysMapper`] over a sparse frame store. Freed
//! frames keep their bytes, so everything that hands frames to a new owner
//! has to clear them first.
//!
//! ## Concurrency
//!
//! Neither type locks. The kernel keeps both inside its single state object,
//! which is only touched with interrupts disabled.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

pub mod frame_alloc;
pub mod phys_mapper;

pub use frame_alloc::{BitmapFrameAlloc, FrameAllocError, FrameStats};
pub use phys_mapper::SparsePhysMemory;
