//! Heap-backing sources: where the allocator's raw bytes come from.
//!
//! The allocator only ever asks its backing for three things: extend the
//! region by `n` bytes, report the lowest heap address, report the highest.
//! The region must be contiguous and append-only; nothing is ever handed
//! back. [`HeapSource`] captures that contract, with two implementations:
//!
//! - [`SbrkSource`] grows the program's data segment through `sbrk(2)`, the
//!   classic malloc backing:
//!
//!   ```text
//!     Program Memory Layout:
//!
//!     High Address ┌─────────────────────┐
//!                  │       Stack         │ ↓ grows down
//!                  │                     │
//!                  │       Heap          │ ↑ grows up (sbrk)
//!                  ├─────────────────────┤ ← Program Break
//!                  │        Data         │
//!                  ├─────────────────────┤
//!                  │        Text         │
//!     Low Address  └─────────────────────┘
//!   ```
//!
//! - [`FixedSource`] owns one fixed-capacity buffer and moves an internal
//!   break through it. It makes the allocator deterministic and hermetic,
//!   which is what the test suite runs on.

use std::ptr;

use libc::{c_void, intptr_t, sbrk};

use crate::block::DSIZE;

/// A contiguous, monotonically growable region of raw memory.
///
/// # Safety
///
/// Implementors must guarantee that a successful [`extend_by`] returns a
/// pointer to `incr` bytes that are valid for reads and writes, exclusively
/// owned by the caller, and contiguous with every previously returned
/// extension; that the first extension is 8-byte aligned; and that
/// [`low`]/[`high`] bound exactly the bytes handed out so far. The allocator
/// builds its entire block structure on these properties.
///
/// [`extend_by`]: HeapSource::extend_by
/// [`low`]: HeapSource::low
/// [`high`]: HeapSource::high
pub unsafe trait HeapSource {
  /// Extends the region by `incr` bytes and returns the address of the new
  /// range (the old end of the region), or null if the region cannot grow.
  ///
  /// A failed extension must leave the region unchanged.
  ///
  /// # Safety
  ///
  /// The caller must be the sole user of the region.
  unsafe fn extend_by(
    &mut self,
    incr: usize,
  ) -> *mut u8;

  /// First byte of the region.
  fn low(&self) -> *mut u8;

  /// Last byte of the region (one below [`low`](HeapSource::low) while the
  /// region is still empty).
  fn high(&self) -> *mut u8;
}

/// Backing source over `sbrk(2)`.
///
/// The region stays contiguous only while this source is the process's sole
/// mover of the program break. If anything else calls `brk`/`sbrk` in the
/// meantime (the system allocator may), the next extension detects the gap
/// and fails rather than handing out a range it does not own.
pub struct SbrkSource {
  /// First byte handed out, 8-byte aligned.
  base: *mut u8,

  /// Expected program break after our last extension.
  brk: *mut u8,
}

impl SbrkSource {
  /// Captures the current program break, padding it up to 8-byte alignment.
  pub fn new() -> Self {
    unsafe {
      let cur = sbrk(0) as usize;
      let misalign = cur % DSIZE;
      if misalign != 0 {
        sbrk((DSIZE - misalign) as intptr_t);
      }
      let base = sbrk(0) as *mut u8;

      Self { base, brk: base }
    }
  }
}

impl Default for SbrkSource {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl HeapSource for SbrkSource {
  unsafe fn extend_by(
    &mut self,
    incr: usize,
  ) -> *mut u8 {
    if incr > isize::MAX as usize {
      return ptr::null_mut();
    }

    unsafe {
      let old = sbrk(incr as intptr_t);
      if old == usize::MAX as *mut c_void {
        // sbrk returns (void*)-1 on failure
        return ptr::null_mut();
      }

      let old = old as *mut u8;
      if old != self.brk {
        // Someone else moved the break since our last extension; the new
        // range is not contiguous with the region, so it is unusable.
        return ptr::null_mut();
      }

      self.brk = old.add(incr);
      old
    }
  }

  fn low(&self) -> *mut u8 {
    self.base
  }

  fn high(&self) -> *mut u8 {
    self.brk.wrapping_sub(1)
  }
}

/// Backing source over one owned, fixed-capacity buffer.
///
/// Extensions bump an internal break until the capacity runs out, after
/// which they fail. The buffer never moves, so previously returned ranges
/// stay valid for the source's lifetime.
pub struct FixedSource {
  buf: Box<[u8]>,

  /// Offset of the first usable (8-byte aligned) byte in `buf`.
  start: usize,

  /// Offset one past the last byte handed out.
  brk: usize,

  /// Offset one past the last usable byte.
  end: usize,
}

impl FixedSource {
  /// Reserves `capacity` usable bytes up front.
  pub fn new(capacity: usize) -> Self {
    let buf = vec![0u8; capacity + DSIZE].into_boxed_slice();
    let start = buf.as_ptr().align_offset(DSIZE);

    Self {
      end: start + capacity,
      start,
      brk: start,
      buf,
    }
  }

  /// Usable bytes not yet handed out.
  pub fn remaining(&self) -> usize {
    self.end - self.brk
  }
}

unsafe impl HeapSource for FixedSource {
  unsafe fn extend_by(
    &mut self,
    incr: usize,
  ) -> *mut u8 {
    match self.brk.checked_add(incr) {
      Some(end) if end <= self.end => {}
      _ => return ptr::null_mut(),
    }

    let p = unsafe { self.buf.as_mut_ptr().add(self.brk) };
    self.brk += incr;
    p
  }

  fn low(&self) -> *mut u8 {
    unsafe { self.buf.as_ptr().add(self.start) as *mut u8 }
  }

  fn high(&self) -> *mut u8 {
    unsafe { self.buf.as_ptr().add(self.brk).wrapping_sub(1) as *mut u8 }
  }
}
