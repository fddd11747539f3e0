//! # brkalloc - A First-Fit Free-List Allocator
//!
//! This crate implements `malloc`, `calloc`, `realloc` and `free` style
//! operations on top of a contiguous range whose end can be moved, by
//! default the program break managed through `sbrk(2)`. It does not
//! delegate to any other allocator.
//!
//! ## Overview
//!
//! Every allocation is a block: a header followed by its payload. Blocks are
//! chained in address order, and freed blocks stay in the chain to be reused.
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         MANAGED RANGE                                │
//!   │                                                                      │
//!   │   ┌───┬──────┬───┬────────────┬───┬──────┬───┬─────────┐             │
//!   │   │ H │  A1  │ H │    free    │ H │  A2  │ H │   A3    │             │
//!   │   └───┴──────┴───┴────────────┴───┴──────┴───┴─────────┘             │
//!   │   ▲                                                    ▲             │
//!   │   │                                                    │             │
//!   │  Root                                               Program          │
//!   │                                                      Break           │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Allocate**: first fit from the root. An oversized free block is split
//!   when the leftover can hold a header and at least one alignment unit;
//!   when nothing fits the break moves up by one block.
//! - **Release**: the block is merged with free neighbours on both sides.
//!   A free block at the end of the range is given back by moving the break
//!   down to its header.
//! - **Resize**: shrinking keeps the address; growing allocates, copies and
//!   releases the old block.
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - Alignment unit and the align! macro
//!   ├── block      - Block header, splitting and fusion (internal)
//!   ├── heap       - HeapSource trait, Sbrk and Arena
//!   ├── error      - HeapError
//!   └── allocator  - Allocator, the four public operations
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkalloc::{Allocator, Arena};
//!
//! let mut allocator = Allocator::new(Arena::with_capacity(4096));
//!
//! let ptr = allocator.allocate(12);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!   ptr.write(42);
//!   let ptr = allocator.resize(ptr, 64);
//!   assert_eq!(42, ptr.read());
//!   allocator.release(ptr);
//! }
//!
//! assert!(allocator.is_empty());
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **Only the tail goes back to the OS**: free blocks in the middle of the
//!   range are kept for reuse
//! - **Weak validation**: foreign and out-of-range pointers are ignored, but a
//!   double free or a stale pointer may still pass the self-pointer check
//! - **4-byte alignment**: payloads are not suitable for types that need more
//!
//! ## Safety
//!
//! Releasing and resizing take raw pointers and are `unsafe`. `Sbrk::new` is
//! `unsafe` because nothing else in the process may move the break while it
//! is in use.

pub mod align;
mod allocator;
mod block;
mod error;
mod heap;

pub use allocator::{Allocator, BlockInfo, Blocks};
pub use block::{HEADER_SIZE, MIN_SPLIT};
pub use error::HeapError;
pub use heap::{Arena, HeapSource, Sbrk};
