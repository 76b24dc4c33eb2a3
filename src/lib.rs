//! # rmalloc - An Explicit Free-List Memory Allocator
//!
//! This crate provides a general-purpose `malloc / free / realloc`-style
//! allocator that manages one contiguous, monotonically growing heap region
//! with boundary-tagged blocks and an explicit doubly-linked free list.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                           HEAP REGION                                │
//!   │                                                                      │
//!   │  ┌────┬──────────┬────────┬────────┬──────────┬────────┬──────────┐  │
//!   │  │pad │ prologue │ alloc  │  free  │  small   │  free  │ epilogue │  │
//!   │  │    │ sentinel │ block  │  block │  region  │  block │ sentinel │  │
//!   │  └────┴──────────┴────────┴────────┴──────────┴────────┴──────────┘  │
//!   │                               │                   │                  │
//!   │                               └───────┐   ┌───────┘                  │
//!   │                                       ▼   ▼                          │
//!   │                        explicit free list (LIFO, doubly linked,      │
//!   │                        links stored inside the free payloads)        │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Every block carries its size in a header and a footer word, so both
//!   neighbours of any block can be reached in constant time and freed
//!   blocks coalesce immediately.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rmalloc
//!   ├── align      - Double-word rounding macro (align!)
//!   ├── block      - Header/footer word codec and block navigation
//!   ├── list       - Explicit free list (internal)
//!   ├── source     - Heap backing: SbrkSource (sbrk) and FixedSource
//!   └── heap       - HeapAllocator: allocate / free / reallocate / check
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rmalloc::{FixedSource, HeapAllocator};
//!
//! // One megabyte of backing memory, owned by the allocator.
//! let mut heap = HeapAllocator::new(FixedSource::new(1 << 20)).unwrap();
//!
//! unsafe {
//!     let ptr = heap.allocate(64) as *mut u64;
//!     *ptr = 42;
//!     assert_eq!(*ptr, 42);
//!
//!     let bigger = heap.reallocate(ptr as *mut u8, 256);
//!     heap.free(bigger);
//! }
//!
//! assert!(heap.check());
//! ```
//!
//! ## Allocation Strategy
//!
//! - **Fit selection**: the free list is scanned best-fit while it is short
//!   and first-fit once it grows past a threshold, trading placement quality
//!   against search time.
//! - **Splitting and coalescing**: a placed block gives its surplus back as
//!   a new free block; a freed block merges immediately with any free
//!   neighbour, so no two free blocks are ever adjacent.
//! - **Adaptive extension**: when no block fits, the heap grows by a chunk
//!   size that walks toward the request sizes the allocator keeps seeing.
//! - **Small-object region**: allocations under 100 bytes are carved out of
//!   a reserved region so that small splinters cluster together instead of
//!   fragmenting the large free blocks.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives; wrap the
//!   allocator in a lock for multi-threaded use.
//! - **Append-only heap**: memory is never returned to the backing source;
//!   freed blocks are only recycled internally.
//! - **Fixed payload alignment**: every payload is 8-byte aligned, no more,
//!   no less.
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! The block codec and the allocator's mutating operations require `unsafe`
//! blocks; the safety contracts are documented per function.

pub mod align;
pub mod block;
mod heap;
mod list;
mod source;

pub use heap::{HeapAllocator, HeapError};
pub use source::{FixedSource, HeapSource, SbrkSource};
