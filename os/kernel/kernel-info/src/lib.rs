//! # Kernel Layout and Scheduling Constants
//!
//! This crate is the single source of truth for the fixed numbers every other
//! kernel component agrees on: where physical frames are handed out, where a
//! process image is loaded, how large the heap may grow, how many processes
//! fit in the table and how often the timer fires.
//!
//! ## Architecture
//!
//! ### Memory Layout ([`memory`])
//! * **Physical Memory**: The range managed by the frame allocator and the
//!   fixed low-memory structures shared by all address spaces
//! * **Process Window**: The 4 MiB virtual window (page-directory entry 1)
//!   holding image, heap, stack and argument buffer
//! * **Exit Codes**: The code reported for a process killed by a fault
//!
//! ### Scheduling ([`sched`])
//! * **Process Table**: Fixed slot capacity
//! * **Timer**: Default tick frequency
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! Virtual Address Space Layout (32-bit, per process):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Shared kernel table (PDE 0)    │  supervisor only,
//!             │  identity 0..4 MiB              │  except VGA 0xA0000..0xC0000
//! PROG_BASE   ├─────────────────────────────────┤ 0x0040_0000 (PDE 1)
//!             │  Program image (256 KiB)        │
//! HEAP_BASE   ├─────────────────────────────────┤ 0x0044_0000
//!             │  Heap (grows up on demand)      │
//! HEAP_LIMIT  ├─────────────────────────────────┤ 0x007F_8000
//!             │  Guard gap (never mapped)       │
//! ARGS_BASE   ├─────────────────────────────────┤ 0x007F_C000
//!             │  Argument buffer / stack        │
//! STACK_TOP   ├─────────────────────────────────┤ 0x0080_0000
//!             │  Large-page identity (PDE 2..)  │  supervisor only
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Configuration Management
//!
//! All values are `const` and validated with compile-time assertions, so an
//! inconsistent layout fails the build instead of corrupting a process.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod sched;
