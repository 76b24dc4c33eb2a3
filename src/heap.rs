//! # Explicit free-list heap allocator
//!
//! The engine behind `allocate` / `free` / `reallocate`. It manages one
//! contiguous, append-only region obtained from a [`HeapSource`] and carves
//! it into boundary-tagged blocks.
//!
//! ## Heap anatomy
//!
//! ```text
//!   low                                                             high
//!    │                                                                │
//!    ▼                                                                ▼
//!  ┌─────┬───────────┬─────────┬─────────┬──────────┬─────────┬───────┐
//!  │ pad │ prologue  │ block   │ block   │ block    │ block   │ epi-  │
//!  │ (4) │ hdr+ftr   │ (alloc) │ (free)  │ (small   │ (free)  │ logue │
//!  │     │ (8|1,8|1) │         │         │  region) │         │ (0|1) │
//!  └─────┴───────────┴─────────┴─────────┴──────────┴─────────┴───────┘
//!                       ▲                                        ▲
//!                       │                                        │
//!         payloads returned to callers              always the last word
//! ```
//!
//! The prologue and epilogue are sentinels: both are marked allocated, so
//! the coalescer finds a "stop" on either side of every real block and
//! never walks off the region.
//!
//! ## Allocation path
//!
//! ```text
//!   allocate(n)
//!      │
//!      ├── adjusted size < 100? ──► carve from the small-object region
//!      │                            (kept allocated, never coalesced)
//!      ├── fit search over the free list
//!      │     < 25 blocks on the list: best fit
//!      │     otherwise:              first fit
//!      │
//!      ├── hit  ──► place (split when the residue can stand alone)
//!      │
//!      └── miss ──► adapt the chunk size toward the request,
//!                   extend the heap, place in the new block
//! ```
//!
//! ## Freeing
//!
//! A freed block is marked free, pushed onto the head of the free list, and
//! immediately coalesced with free neighbours (four cases, driven by the
//! two adjacent tags). No two free blocks are ever left adjacent.
//!
//! ## Reallocation
//!
//! `reallocate` tries, in order: shrink in place, grow into a free next
//! block, grow into a free prev block (sliding the payload down), keep an
//! exact fit, and finally move to a fresh allocation. The branches are
//! exclusive: the first one whose guard matches is the only one examined.
//!
//! ## Thread safety
//!
//! There is none, the same as the rest of this crate: one allocator, one
//! thread, external locking if you need more.

use std::fmt;
use std::ptr;

use log::error;
use static_assertions::const_assert;

use crate::block::{self, DSIZE, MIN_BLOCK_SIZE, WSIZE};
use crate::list::FreeList;
use crate::source::HeapSource;

/// Bytes requested for each small-object region, before size adjustment.
const SMALL_REGION_BYTES: usize = 1500;

/// Adjusted block sizes strictly below this are served from the small
/// region, clustering splinter-prone blocks away from the large ones.
const SMALL_CUTOFF: usize = 100;

/// Free-list length at which the fit search stops scanning the whole list
/// for the best block and settles for the first that fits.
const BEST_FIT_THRESHOLD: usize = 25;

/// Bounds and default for the adaptive extension chunk.
const MIN_CHUNK: usize = 1 << 9;
const MAX_CHUNK: usize = 1 << 30;
const DEFAULT_CHUNK: usize = 1 << 11;

/// Step by which the chunk size walks toward the requests it keeps seeing.
const CHUNK_STEP: usize = 1024;

/// Largest block size a 32-bit metadata word can carry.
const MAX_BLOCK_BYTES: usize = (u32::MAX & !0x7) as usize;

/// Free-list links are 32-bit offsets from the heap base, so the heap must
/// stay addressable by them.
const MAX_HEAP_BYTES: usize = u32::MAX as usize;

const_assert!(MIN_BLOCK_SIZE == 2 * DSIZE);
const_assert!(MIN_CHUNK <= DEFAULT_CHUNK && DEFAULT_CHUNK <= MAX_CHUNK);
const_assert!(SMALL_CUTOFF < SMALL_REGION_BYTES);
const_assert!(MAX_CHUNK <= MAX_BLOCK_BYTES);

/// Errors surfaced while building a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
  /// The backing source refused to extend the region.
  Exhausted,
}

impl fmt::Display for HeapError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      HeapError::Exhausted => write!(f, "backing source exhausted"),
    }
  }
}

impl std::error::Error for HeapError {}

/// A dynamic storage allocator over an explicit free list with immediate
/// coalescing, adaptive heap extension, and a dedicated small-object
/// region.
///
/// One allocator owns one [`HeapSource`] region outright and keeps all of
/// its bookkeeping on the object, so independent heaps can coexist.
///
/// # Thread Safety
///
/// This allocator is **NOT** thread-safe. For multi-threaded usage,
/// external synchronization (e.g., a `Mutex`) is required.
pub struct HeapAllocator<S: HeapSource> {
  /// Where the bytes come from.
  source: S,

  /// Payload pointer of the prologue block; heap walks start here.
  heap_start: *mut u8,

  /// The explicit free list.
  list: FreeList,

  /// Payload pointer of the current small-object region, or null when the
  /// last reservation failed and no region is live.
  small_region: *mut u8,

  /// Bytes by which the heap grows when no fit exists, adapted toward
  /// recent request sizes.
  chunk_size: usize,
}

impl<S: HeapSource> HeapAllocator<S> {
  /// Builds a heap inside `source`: padding word, prologue, one free block
  /// of the default chunk size, the epilogue, and the first small-object
  /// region.
  ///
  /// # Errors
  ///
  /// [`HeapError::Exhausted`] if the source cannot supply the initial
  /// layout.
  pub fn new(source: S) -> Result<Self, HeapError> {
    let mut heap = Self {
      source,
      heap_start: ptr::null_mut(),
      list: FreeList::new(),
      small_region: ptr::null_mut(),
      chunk_size: DEFAULT_CHUNK,
    };

    unsafe {
      let base = heap.source.extend_by(4 * WSIZE);
      if base.is_null() {
        return Err(HeapError::Exhausted);
      }

      heap.list.reset(base);

      // Padding word keeps every payload 8-byte aligned, then the two
      // sentinels that stop the coalescer at either end.
      block::put(base, 0);
      block::put(base.add(WSIZE), block::pack(DSIZE, true));
      block::put(base.add(2 * WSIZE), block::pack(DSIZE, true));
      block::put(base.add(3 * WSIZE), block::pack(0, true));
      heap.heap_start = base.add(2 * WSIZE);

      if heap.extend_heap(DEFAULT_CHUNK / WSIZE).is_null() {
        return Err(HeapError::Exhausted);
      }

      if !heap.reserve_small_region() {
        return Err(HeapError::Exhausted);
      }
    }

    Ok(heap)
  }

  /// Allocates at least `size` bytes and returns an 8-byte-aligned payload
  /// pointer, or null when `size` is zero or the heap cannot grow any
  /// further.
  ///
  /// # Safety
  ///
  /// The allocator's heap must not have been corrupted through previously
  /// returned pointers (no out-of-bounds writes, no use after free).
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if size == 0 {
        return ptr::null_mut();
      }
      let Some(asize) = adjust_size(size) else {
        return ptr::null_mut();
      };

      if asize < SMALL_CUTOFF && !self.small_region.is_null() {
        if let Some(bp) = self.allocate_small(asize) {
          return bp;
        }
      }

      let bp = self.find_fit(asize);
      if !bp.is_null() {
        self.place(bp, asize);
        return bp;
      }

      // No fit: walk the chunk size toward this request, then extend.
      if asize < self.chunk_size + CHUNK_STEP {
        self.chunk_size += CHUNK_STEP;
      } else if asize - CHUNK_STEP > self.chunk_size {
        self.chunk_size = self.chunk_size.saturating_sub(CHUNK_STEP);
      }
      self.chunk_size = self.chunk_size.clamp(MIN_CHUNK, MAX_CHUNK);

      let extend = asize.max(self.chunk_size);
      let bp = self.extend_heap(extend / WSIZE);
      if bp.is_null() {
        return ptr::null_mut();
      }

      self.place(bp, asize);
      bp
    }
  }

  /// Returns `ptr`'s block to the free list and coalesces it with free
  /// neighbours. A null `ptr` is a no-op.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer previously returned by
  /// [`allocate`](Self::allocate) / [`reallocate`](Self::reallocate) on
  /// this allocator and not freed since.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    unsafe {
      if ptr.is_null() {
        return;
      }

      let size = block::block_size(ptr);
      self.create_free_block(ptr, size);
      self.coalesce(ptr);
    }
  }

  /// Resizes `ptr`'s block to at least `size` bytes, preserving payload up
  /// to the smaller of the old and new sizes.
  ///
  /// - null `ptr` behaves as [`allocate`](Self::allocate);
  /// - zero `size` behaves as [`free`](Self::free) and returns null;
  /// - otherwise the block is shrunk in place, grown into a free
  ///   neighbour, or moved to a fresh allocation, and the (possibly
  ///   relocated) payload pointer is returned. Null means the heap could
  ///   not satisfy the new size; the old block is left untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`free`](Self::free) for `ptr`.
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if ptr.is_null() {
        return self.allocate(size);
      }
      if size == 0 {
        self.free(ptr);
        return ptr::null_mut();
      }

      let Some(asize) = adjust_size(size) else {
        return ptr::null_mut();
      };
      let csize = block::block_size(ptr);

      if asize < csize {
        // Shrink in place; the trimmed tail becomes a free block.
        self.place_in_allocated(ptr, asize);
        return ptr;
      } else if !block::block_alloc(block::next_block(ptr)) {
        // Grow forward into the free next block.
        let next = block::next_block(ptr);
        let next_size = block::block_size(next);
        let extra = asize - csize;

        if next_size >= extra {
          if next_size - extra >= MIN_BLOCK_SIZE {
            self.list.remove(next);
            block::put(block::header(ptr), block::pack(asize, true));
            block::put(block::footer(ptr), block::pack(asize, true));
            self.create_free_block(block::next_block(ptr), next_size - extra);
            return ptr;
          } else if next_size == extra {
            self.list.remove(next);
            block::put(block::header(ptr), block::pack(asize, true));
            block::put(block::footer(ptr), block::pack(asize, true));
            return ptr;
          }
        }
        // next is free but unusable (too small, or the leftover would be a
        // splinter): move instead.
      } else if !block::alloc_at(ptr.sub(DSIZE)) {
        // Grow backward into the free prev block, sliding the payload down.
        let prev = block::prev_block(ptr);
        let prev_size = block::block_size(prev);
        let total = csize + prev_size;

        if total >= asize {
          if total - asize >= MIN_BLOCK_SIZE {
            self.merge_into_prev(prev, ptr, asize, csize);
            self.create_free_block(block::next_block(prev), total - asize);
            return prev;
          } else if prev_size == asize - csize {
            self.merge_into_prev(prev, ptr, asize, csize);
            return prev;
          }
        }
      } else if asize == csize {
        return ptr;
      }

      // Move: allocate elsewhere, carry the payload over, release the old
      // block.
      let new = self.allocate(size);
      if new.is_null() {
        return ptr::null_mut();
      }
      let bytes = csize.min(block::block_size(new)) - DSIZE;
      copy_payload(ptr, new, bytes);
      self.free(ptr);
      new
    }
  }

  /// Verifies every heap invariant and returns whether they all hold.
  ///
  /// Failures are reported through `log::error!` and make the result
  /// false: an allocated or inconsistent block on the free list, a
  /// circular free list, adjacent free blocks that escaped coalescing,
  /// header/footer disagreement, misaligned or out-of-bounds payloads, a
  /// missing epilogue, or a free list that disagrees with a full heap
  /// walk.
  pub fn check(&self) -> bool {
    unsafe {
      let low = self.source.low() as *const u8;
      let high = self.source.high() as *const u8;

      // Pass 1: the free list itself.
      let mut list_count: usize = 0;
      let mut bp = self.list.head();
      while !bp.is_null() {
        if block::alloc_at(block::header(bp)) || block::alloc_at(block::footer(bp)) {
          error!("allocated block {bp:p} is on the free list");
          return false;
        }
        if block::size_at(block::header(bp)) != block::size_at(block::footer(bp)) {
          error!("free block {bp:p} header/footer sizes disagree");
          return false;
        }

        list_count += 1;
        if list_count > self.list.len() {
          error!("free list is circular: walked past its recorded length");
          return false;
        }

        bp = self.list.next_of(bp);
      }

      // Pass 2: every block, prologue to epilogue.
      let mut heap_count: usize = 0;
      let mut last_free = false;
      let mut bp = self.heap_start;
      while block::block_size(bp) != 0 {
        if block::get(block::header(bp)) != block::get(block::footer(bp)) {
          error!("block {bp:p} header and footer words disagree");
          return false;
        }

        let free = !block::block_alloc(bp);
        if last_free && free {
          error!("adjacent free blocks at {bp:p} escaped coalescing");
          return false;
        }
        last_free = free;
        if free {
          heap_count += 1;
        }

        if (bp as *const u8) < low || (bp as *const u8) > high {
          error!("block {bp:p} lies outside the heap [{low:p}, {high:p}]");
          return false;
        }
        if bp as usize % DSIZE != 0 {
          error!("payload {bp:p} is not double-word aligned");
          return false;
        }

        bp = block::next_block(bp);
      }

      // The walk must have stopped on the epilogue: allocated, size zero,
      // occupying the heap's last word.
      if !block::block_alloc(bp) || block::header(bp) as usize + WSIZE != high as usize + 1 {
        error!("heap does not end with an epilogue word");
        return false;
      }

      if list_count != heap_count {
        error!("free list holds {list_count} blocks but the heap walk found {heap_count}");
        return false;
      }

      true
    }
  }

  /// Number of blocks currently on the free list.
  pub fn free_blocks(&self) -> usize {
    self.list.len()
  }

  /// Prints every block and a free-list summary to stdout.
  ///
  /// Debugging aid for the demo walkthroughs; the library itself never
  /// prints.
  pub fn dump(&self) {
    unsafe {
      println!(
        "heap [{:p}, {:p}], chunk size {}",
        self.source.low(),
        self.source.high(),
        self.chunk_size,
      );

      let mut bp = self.heap_start;
      loop {
        let size = block::block_size(bp);
        if size == 0 {
          println!("  {bp:p}: epilogue");
          break;
        }

        let state = if bp == self.small_region {
          "small region"
        } else if block::block_alloc(bp) {
          "allocated"
        } else {
          "free"
        };
        println!("  {bp:p}: {size} bytes, {state}");

        bp = block::next_block(bp);
      }

      println!("  free list: {} block(s)", self.list.len());
    }
  }

  /// Asks the source for `words` more 4-byte words (rounded up to keep
  /// 8-byte block sizes), frames the new range as one free block, rewrites
  /// the epilogue behind it, and coalesces with a free old tail.
  ///
  /// Returns the new free block's payload pointer, or null if the source
  /// refused or the heap would outgrow what 32-bit link offsets can
  /// address. A failed extension changes nothing.
  unsafe fn extend_heap(
    &mut self,
    words: usize,
  ) -> *mut u8 {
    unsafe {
      let mut size = if words % 2 == 1 {
        (words + 1) * WSIZE
      } else {
        words * WSIZE
      };
      if size < MIN_BLOCK_SIZE {
        size = MIN_BLOCK_SIZE;
      }

      let heap_bytes = self.source.high() as usize + 1 - self.source.low() as usize;
      if heap_bytes.saturating_add(size) > MAX_HEAP_BYTES {
        return ptr::null_mut();
      }

      let bp = self.source.extend_by(size);
      if bp.is_null() {
        return ptr::null_mut();
      }

      // The old epilogue word becomes the new block's header; a fresh
      // epilogue goes in behind it.
      self.create_free_block(bp, size);
      block::put(block::header(block::next_block(bp)), block::pack(0, true));

      self.coalesce(bp)
    }
  }

  /// Merges the just-freed block `bp` (already at the head of the free
  /// list) with whichever of its neighbours are free, and returns the
  /// merged block's payload pointer.
  ///
  /// ```text
  ///   prev  next   result
  ///    A     A     bp unchanged
  ///    A     F     bp grows over next
  ///    F     A     prev grows over bp
  ///    F     F     prev grows over bp and next
  /// ```
  ///
  /// Whenever blocks merge, the survivors leave the list and the merged
  /// block is reinserted at the head, so the list never holds a stale
  /// address and its length stays exact.
  unsafe fn coalesce(
    &mut self,
    bp: *mut u8,
  ) -> *mut u8 {
    unsafe {
      // The previous block's footer is the word pair just below our header.
      let prev_alloc = block::alloc_at(bp.sub(DSIZE));
      let next = block::next_block(bp);
      let next_alloc = block::alloc_at(block::header(next));
      let mut size = block::block_size(bp);

      if prev_alloc && next_alloc {
        bp
      } else if prev_alloc && !next_alloc {
        self.list.remove(next);
        size += block::block_size(next);
        block::put(block::header(bp), block::pack(size, false));
        block::put(block::footer(bp), block::pack(size, false));
        bp
      } else if !prev_alloc && next_alloc {
        let prev = block::prev_block(bp);
        self.list.remove(prev);
        self.list.remove(bp);
        size += block::block_size(prev);
        block::put(block::header(prev), block::pack(size, false));
        block::put(block::footer(prev), block::pack(size, false));
        self.list.push_front(prev);
        prev
      } else {
        let prev = block::prev_block(bp);
        self.list.remove(prev);
        self.list.remove(next);
        self.list.remove(bp);
        size += block::block_size(prev) + block::block_size(next);
        block::put(block::header(prev), block::pack(size, false));
        block::put(block::footer(prev), block::pack(size, false));
        self.list.push_front(prev);
        prev
      }
    }
  }

  /// Searches the free list for a block of at least `asize` bytes.
  ///
  /// Short lists (under [`BEST_FIT_THRESHOLD`]) are scanned completely for
  /// the smallest sufficient block, ties going to the first encountered;
  /// long lists return the first sufficient block. Null when nothing fits.
  unsafe fn find_fit(
    &self,
    asize: usize,
  ) -> *mut u8 {
    unsafe {
      if self.list.len() < BEST_FIT_THRESHOLD {
        let mut best = ptr::null_mut();
        let mut best_size = usize::MAX;

        let mut bp = self.list.head();
        while !bp.is_null() {
          let size = block::block_size(bp);
          if asize <= size && size < best_size {
            best_size = size;
            best = bp;
          }
          bp = self.list.next_of(bp);
        }

        best
      } else {
        let mut bp = self.list.head();
        while !bp.is_null() {
          if asize <= block::block_size(bp) {
            return bp;
          }
          bp = self.list.next_of(bp);
        }

        ptr::null_mut()
      }
    }
  }

  /// Carves an `asize` allocation out of the free block `bp`.
  ///
  /// The block is split when the residue could stand alone as a block;
  /// otherwise the caller gets the whole thing.
  unsafe fn place(
    &mut self,
    bp: *mut u8,
    asize: usize,
  ) {
    unsafe {
      let csize = block::block_size(bp);

      if csize - asize >= MIN_BLOCK_SIZE {
        self.create_alloc_block(bp, asize);
        self.create_free_block(block::next_block(bp), csize - asize);
      } else {
        self.create_alloc_block(bp, csize);
      }
    }
  }

  /// [`place`](Self::place) for a block that is already allocated and
  /// therefore not on the free list: used by the realloc shrink path.
  ///
  /// The residue is freed and immediately coalesced: the block after a
  /// shrunk allocation may itself be free.
  unsafe fn place_in_allocated(
    &mut self,
    bp: *mut u8,
    asize: usize,
  ) {
    unsafe {
      let csize = block::block_size(bp);

      if csize - asize >= MIN_BLOCK_SIZE {
        block::put(block::header(bp), block::pack(asize, true));
        block::put(block::footer(bp), block::pack(asize, true));
        let rest = block::next_block(bp);
        self.create_free_block(rest, csize - asize);
        self.coalesce(rest);
      } else {
        block::put(block::header(bp), block::pack(csize, true));
        block::put(block::footer(bp), block::pack(csize, true));
      }
    }
  }

  /// Serves an adjusted size below [`SMALL_CUTOFF`] from the small-object
  /// region, or returns None to send the request down the normal path.
  ///
  /// The region and its shrinking remainder stay marked allocated the
  /// whole time; that marking is what keeps the coalescer from folding the
  /// reserve into neighbouring free blocks.
  unsafe fn allocate_small(
    &mut self,
    asize: usize,
  ) -> Option<*mut u8> {
    unsafe {
      let region = self.small_region;
      let csize = block::block_size(region);

      if asize < csize && csize - asize >= MIN_BLOCK_SIZE {
        // Carve the front, advance the region to the remainder.
        block::put(block::header(region), block::pack(asize, true));
        block::put(block::footer(region), block::pack(asize, true));

        let rest = block::next_block(region);
        block::put(block::header(rest), block::pack(csize - asize, true));
        block::put(block::footer(rest), block::pack(csize - asize, true));
        self.small_region = rest;

        Some(region)
      } else if asize <= csize {
        // The remainder would be a splinter: hand the whole region out and
        // reserve a fresh one.
        block::put(block::header(region), block::pack(csize, true));
        block::put(block::footer(region), block::pack(csize, true));
        self.reserve_small_region();

        Some(region)
      } else {
        None
      }
    }
  }

  /// Reserves a fresh small-object region through the normal allocation
  /// path. On failure the region pointer goes null and small requests fall
  /// through to the normal path until a reservation succeeds again.
  unsafe fn reserve_small_region(&mut self) -> bool {
    unsafe {
      let bp = self.allocate(SMALL_REGION_BYTES);
      if bp.is_null() {
        self.small_region = ptr::null_mut();
        return false;
      }

      self.small_region = bp;
      true
    }
  }

  /// Marks `bp` free with the given size and pushes it onto the list.
  unsafe fn create_free_block(
    &mut self,
    bp: *mut u8,
    size: usize,
  ) {
    unsafe {
      block::put(block::header(bp), block::pack(size, false));
      block::put(block::footer(bp), block::pack(size, false));
      self.list.push_front(bp);
    }
  }

  /// Unlinks `bp` and marks it allocated with the given size.
  unsafe fn create_alloc_block(
    &mut self,
    bp: *mut u8,
    size: usize,
  ) {
    unsafe {
      self.list.remove(bp);
      block::put(block::header(bp), block::pack(size, true));
      block::put(block::footer(bp), block::pack(size, true));
    }
  }

  /// Realloc grow-backward helper: unlinks the free `prev`, reframes it as
  /// an allocated `asize` block, and slides `bp`'s payload down into it.
  ///
  /// `csize` is `bp`'s current block size; only its payload bytes are
  /// copied. The copy runs forward and the destination sits below the
  /// source, so the ranges may overlap.
  unsafe fn merge_into_prev(
    &mut self,
    prev: *mut u8,
    bp: *mut u8,
    asize: usize,
    csize: usize,
  ) {
    unsafe {
      self.list.remove(prev);
      block::put(block::header(prev), block::pack(asize, true));
      copy_payload(bp, prev, csize - DSIZE);
      block::put(block::footer(prev), block::pack(asize, true));
    }
  }
}

/// The canonical block size for a caller request: round the payload up to
/// the 8-byte granule, add the two metadata words, and never go below the
/// minimum block. None when the result cannot be encoded in a header word.
fn adjust_size(size: usize) -> Option<usize> {
  if size > MAX_BLOCK_BYTES - DSIZE {
    return None;
  }

  let mut asize = crate::align!(size) + DSIZE;
  if asize < MIN_BLOCK_SIZE {
    asize = MIN_BLOCK_SIZE;
  }

  Some(asize)
}

/// Copies `bytes` payload bytes from `src` to `dst` in 4-byte strides.
///
/// # Safety
///
/// Both ranges must be valid for `bytes` bytes, `bytes` must be a multiple
/// of the word size, and `dst` must either be disjoint from `src` or lie
/// below it (the copy runs forward).
unsafe fn copy_payload(
  src: *const u8,
  dst: *mut u8,
  bytes: usize,
) {
  unsafe {
    let mut off = 0;
    while off < bytes {
      block::put(dst.add(off), block::get(src.add(off)));
      off += WSIZE;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::FixedSource;

  fn new_heap(capacity: usize) -> HeapAllocator<FixedSource> {
    HeapAllocator::new(FixedSource::new(capacity)).expect("heap init")
  }

  /// After init: one free block (the initial chunk minus the small
  /// region), a live small region of at least the advertised size, and a
  /// consistent heap.
  #[test]
  fn init_state() {
    let heap = new_heap(1 << 20);

    assert!(heap.check());
    assert_eq!(heap.free_blocks(), 1);

    unsafe {
      assert!(!heap.small_region.is_null());
      assert!(block::block_alloc(heap.small_region));
      assert!(block::block_size(heap.small_region) >= SMALL_REGION_BYTES);
    }
  }

  #[test]
  fn init_fails_on_tiny_source() {
    assert_eq!(
      HeapAllocator::new(FixedSource::new(1024)).err(),
      Some(HeapError::Exhausted),
    );
  }

  #[test]
  fn allocate_zero_returns_null() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      assert!(heap.allocate(0).is_null());
    }
  }

  #[test]
  fn free_null_is_noop() {
    let mut heap = new_heap(1 << 20);
    let before = heap.free_blocks();

    unsafe {
      heap.free(ptr::null_mut());
    }

    assert_eq!(heap.free_blocks(), before);
    assert!(heap.check());
  }

  #[test]
  fn large_block_allocation_and_integrity() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let count = 4096usize;
      let p = heap.allocate(count * 4) as *mut u32;
      assert!(!p.is_null());

      for i in 0..count {
        p.add(i).write((i as u32) ^ 0xA5A5_A5A5);
      }

      for i in 0..count {
        assert_eq!(p.add(i).read(), (i as u32) ^ 0xA5A5_A5A5);
      }
    }

    assert!(heap.check());
  }

  #[test]
  fn small_round_trip() {
    let mut heap = new_heap(1 << 20);
    let before = heap.free_blocks();

    unsafe {
      let p = heap.allocate(40);
      assert!(!p.is_null());
      assert_eq!(p as usize % DSIZE, 0);
      assert_eq!(block::block_size(p), 48);

      heap.free(p);
    }

    assert!(heap.check());
    assert!(heap.free_blocks() <= before + 1);
  }

  /// A large allocation splits the free block and freeing it coalesces the
  /// pieces back together, returning the list to its prior length.
  #[test]
  fn large_round_trip() {
    let mut heap = new_heap(1 << 20);
    let before = heap.free_blocks();

    unsafe {
      let p = heap.allocate(200);
      assert_eq!(block::block_size(p), 208);

      heap.free(p);
    }

    assert!(heap.check());
    assert_eq!(heap.free_blocks(), before);
  }

  #[test]
  fn alignment_holds_across_sizes() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      for size in [1, 7, 8, 24, 40, 99, 100, 513, 4096] {
        let p = heap.allocate(size);
        assert!(!p.is_null());
        assert_eq!(p as usize % DSIZE, 0, "allocate({size}) misaligned");
      }
    }

    assert!(heap.check());
  }

  /// Splitting carves the request off the front and leaves the residue as
  /// a free block right behind it.
  #[test]
  fn split_leaves_residue() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let free_size = block::block_size(heap.list.head());

      let p = heap.allocate(100);
      assert_eq!(block::block_size(p), 112);

      let rest = block::next_block(p);
      assert!(!block::block_alloc(rest));
      assert_eq!(block::block_size(rest), free_size - 112);
    }

    assert!(heap.check());
  }

  /// Free A, then C, then B: freeing the middle block must fuse all three
  /// (plus the trailing residue C already merged with) into one.
  #[test]
  fn coalesce_all_cases() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let a = heap.allocate(120);
      let b = heap.allocate(120);
      let c = heap.allocate(120);
      assert_eq!(block::next_block(a), b);
      assert_eq!(block::next_block(b), c);

      heap.free(a);
      heap.free(c);
      heap.free(b);

      assert_eq!(heap.free_blocks(), 1);
      assert!(!block::block_alloc(a));
      assert!(block::block_size(a) >= 3 * 128);
    }

    assert!(heap.check());
  }

  /// Realloc grows in place into a free next block, splitting off what it
  /// does not need.
  #[test]
  fn realloc_grows_into_next() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let a = heap.allocate(120);
      let b = heap.allocate(120);
      let _c = heap.allocate(120);
      heap.free(b);

      let grown = heap.reallocate(a, 184);
      assert_eq!(grown, a);
      assert_eq!(block::block_size(a), 192);

      let rest = block::next_block(a);
      assert!(!block::block_alloc(rest));
      assert_eq!(block::block_size(rest), 64);
    }

    assert!(heap.check());
  }

  #[test]
  fn realloc_absorbs_next_exactly() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let a = heap.allocate(120);
      let b = heap.allocate(120);
      let c = heap.allocate(120);
      heap.free(b);

      // extra = 256 - 128 matches b's block exactly
      let grown = heap.reallocate(a, 248);
      assert_eq!(grown, a);
      assert_eq!(block::block_size(a), 256);
      assert_eq!(block::next_block(a), c);
    }

    assert!(heap.check());
  }

  /// Realloc grows backward into a free prev block: the payload slides
  /// down and survives intact.
  #[test]
  fn realloc_grows_into_prev() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let a = heap.allocate(120);
      let b = heap.allocate(120);
      let _c = heap.allocate(120);

      for i in 0..120 {
        b.add(i).write((i % 251) as u8);
      }

      heap.free(a);

      let grown = heap.reallocate(b, 184);
      assert_eq!(grown, a);
      assert_eq!(block::block_size(grown), 192);

      for i in 0..120 {
        assert_eq!(grown.add(i).read(), (i % 251) as u8);
      }

      let rest = block::next_block(grown);
      assert!(!block::block_alloc(rest));
      assert_eq!(block::block_size(rest), 256 - 192);
    }

    assert!(heap.check());
  }

  /// Shrinking frees the tail, and the freed tail coalesces with a free
  /// block already sitting behind it.
  #[test]
  fn realloc_shrinks_in_place() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let a = heap.allocate(200);
      for i in 0..200 {
        a.add(i).write((i % 249) as u8);
      }

      let same = heap.reallocate(a, 100);
      assert_eq!(same, a);
      assert_eq!(block::block_size(a), 112);

      // payload preserved up to the new payload size
      for i in 0..104 {
        assert_eq!(a.add(i).read(), (i % 249) as u8);
      }
    }

    assert!(heap.check());
    assert_eq!(heap.free_blocks(), 1);
  }

  #[test]
  fn realloc_same_size_is_identity() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let _a = heap.allocate(120);
      let b = heap.allocate(120);
      let _c = heap.allocate(120);

      let same = heap.reallocate(b, 120);
      assert_eq!(same, b);
      assert_eq!(block::block_size(b), 128);
    }

    assert!(heap.check());
  }

  /// With both neighbours allocated, growing must move the block and carry
  /// the payload.
  #[test]
  fn realloc_moves_when_wedged() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let _a = heap.allocate(120);
      let b = heap.allocate(120);
      let _c = heap.allocate(120);

      for i in 0..120 {
        b.add(i).write((i % 241) as u8);
      }

      let moved = heap.reallocate(b, 400);
      assert!(!moved.is_null());
      assert_ne!(moved, b);
      assert!(block::block_size(moved) >= 408);

      for i in 0..120 {
        assert_eq!(moved.add(i).read(), (i % 241) as u8);
      }

      // the old block went back to the free list
      assert!(!block::block_alloc(b));
    }

    assert!(heap.check());
  }

  #[test]
  fn realloc_null_acts_as_allocate() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let p = heap.reallocate(ptr::null_mut(), 100);
      assert!(!p.is_null());
      assert_eq!(block::block_size(p), 112);
    }

    assert!(heap.check());
  }

  #[test]
  fn realloc_zero_acts_as_free() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let p = heap.allocate(100);
      let r = heap.reallocate(p, 0);
      assert!(r.is_null());
      assert!(!block::block_alloc(p));
    }

    assert!(heap.check());
  }

  /// Under the threshold the whole list is scanned and the tightest block
  /// wins, wherever it sits.
  #[test]
  fn best_fit_picks_tightest_block() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let b208 = heap.allocate(200);
      let _s1 = heap.allocate(104);
      let b128 = heap.allocate(120);
      let _s2 = heap.allocate(104);
      let b304 = heap.allocate(296);
      let _s3 = heap.allocate(104);

      // free the exact fit first so it sits deepest in the LIFO list
      heap.free(b128);
      heap.free(b208);
      heap.free(b304);
      assert!(heap.free_blocks() < BEST_FIT_THRESHOLD);

      let p = heap.allocate(120);
      assert_eq!(p, b128);
    }

    assert!(heap.check());
  }

  /// Past the threshold the scan settles for the first sufficient block,
  /// which with LIFO insertion is the most recently freed one.
  #[test]
  fn first_fit_takes_head_past_threshold() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let exact = heap.allocate(120);
      let _s0 = heap.allocate(104);
      let big = heap.allocate(296);
      let _s1 = heap.allocate(104);

      let mut fillers = Vec::new();
      for _ in 0..60 {
        fillers.push(heap.allocate(104));
      }

      // the exact fit goes in first (deepest), the oversized block last
      // (head); every other filler keeps the frees from touching
      heap.free(exact);
      for i in (0..60).step_by(2) {
        heap.free(fillers[i]);
      }
      heap.free(big);
      assert!(heap.free_blocks() >= BEST_FIT_THRESHOLD);

      let p = heap.allocate(120);
      assert_eq!(p, big);
    }

    assert!(heap.check());
  }

  /// Sub-100-byte allocations come out of the small region, packed
  /// back-to-back.
  #[test]
  fn small_allocations_cluster_in_region() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let region_start = heap.small_region;
      let region_len = block::block_size(region_start);

      let mut ptrs = Vec::new();
      for _ in 0..30 {
        ptrs.push(heap.allocate(32));
      }

      for w in ptrs.windows(2) {
        assert_eq!(w[1], w[0].add(40));
      }
      for &p in &ptrs {
        assert!(p >= region_start);
        assert!(p < region_start.add(region_len));
        assert_eq!(block::block_size(p), 40);
      }
    }

    assert!(heap.check());
  }

  /// Exhausting the region down to a stub hands the stub out whole and
  /// reserves a fresh region.
  #[test]
  fn small_region_refreshes_when_exhausted() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      // 37 carvings of 40 bytes leave a 32-byte stub (1512 - 37 * 40)
      for _ in 0..37 {
        assert!(!heap.allocate(32).is_null());
      }

      let stub = heap.small_region;
      assert_eq!(block::block_size(stub), 32);

      let p = heap.allocate(16);
      assert_eq!(p, stub);
      assert_eq!(block::block_size(p), 32);

      assert_ne!(heap.small_region, stub);
      assert_eq!(block::block_size(heap.small_region), 1512);
    }

    assert!(heap.check());
  }

  /// Requests past the region's remaining size fall through to the normal
  /// path without touching the region.
  #[test]
  fn small_request_overflowing_region_uses_main_heap() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      for _ in 0..37 {
        heap.allocate(32);
      }
      let stub = heap.small_region;
      assert_eq!(block::block_size(stub), 32);

      // adjusted to 48: larger than the stub, still under the cutoff
      let p = heap.allocate(40);
      assert!(!p.is_null());
      assert_eq!(heap.small_region, stub);
      assert!(p != stub);
    }

    assert!(heap.check());
  }

  /// A failed extension surfaces as null and leaves no partial state.
  #[test]
  fn exhaustion_returns_null_without_damage() {
    let mut heap = new_heap(8192);
    let before = heap.free_blocks();

    unsafe {
      assert!(heap.allocate(1 << 20).is_null());
    }

    assert_eq!(heap.free_blocks(), before);
    assert!(heap.check());
  }

  /// The heap keeps growing by at least the adapted chunk, so a burst of
  /// mixed traffic stays consistent end to end.
  #[test]
  fn mixed_traffic_stays_consistent() {
    let mut heap = new_heap(1 << 22);

    unsafe {
      let mut live = Vec::new();
      for round in 0..6 {
        for i in 0..40 {
          let size = 16 + (i * 37 + round * 101) % 2000;
          let p = heap.allocate(size);
          assert!(!p.is_null());
          live.push(p);
        }
        assert!(heap.check(), "corrupt after round {round} allocations");

        // free half, newest first
        for _ in 0..20 {
          heap.free(live.pop().unwrap());
        }
        assert!(heap.check(), "corrupt after round {round} frees");
      }

      for p in live {
        heap.free(p);
      }
    }

    assert!(heap.check());
  }

  #[test]
  fn checker_catches_footer_corruption() {
    let mut heap = new_heap(1 << 20);

    unsafe {
      let p = heap.allocate(120);
      assert!(heap.check());

      block::put(block::footer(p), block::pack(64, false));
      assert!(!heap.check());
    }
  }

  #[test]
  fn checker_catches_circular_free_list() {
    let heap = new_heap(1 << 20);

    unsafe {
      let head = heap.list.head();
      // make the head's next link point back at itself
      let offset = (head as usize - heap.source.low() as usize) as u32;
      block::put(head.add(WSIZE), offset);

      assert!(!heap.check());
    }
  }

  #[test]
  fn adjust_size_rule() {
    assert_eq!(adjust_size(1), Some(16));
    assert_eq!(adjust_size(8), Some(16));
    assert_eq!(adjust_size(9), Some(24));
    assert_eq!(adjust_size(40), Some(48));
    assert_eq!(adjust_size(100), Some(112));
    assert_eq!(adjust_size(usize::MAX), None);
  }
}
