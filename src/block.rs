//! In-band block metadata: the header/footer word codec and boundary-tag
//! navigation.
//!
//! Every block, free or allocated, is framed by two 4-byte words that both
//! encode `size | alloc`:
//!
//! ```text
//!                     One Block
//!   ┌────────────┬──────────────────────┬────────────┐
//!   │ header (4) │      payload ...     │ footer (4) │
//!   └────────────┴──────────────────────┴────────────┘
//!                ▲
//!                └── payload pointer `bp` handed to the caller
//!
//!   word = size | alloc
//!          │      └── bit 0: 1 = allocated, 0 = free
//!          └── total block size in bytes, a multiple of 8,
//!              so its low three bits are always zero
//! ```
//!
//! The footer mirrors the header so that the block *before* `bp` can be
//! sized by reading the single word below `bp`'s header. That is what makes
//! constant-time coalescing possible: [`next_block`] walks forward off the
//! current header, [`prev_block`] walks backward off the previous footer.
//!
//! Everything in this module is raw pointer arithmetic over memory owned by
//! the allocator; the functions stay valid only while the caller points them
//! at well-formed blocks inside the heap.

/// Header and footer word size in bytes.
pub const WSIZE: usize = 4;

/// Double word: payload alignment and size granule in bytes.
pub const DSIZE: usize = 8;

/// Smallest legal block: header + two free-list link words + footer.
pub const MIN_BLOCK_SIZE: usize = 16;

const ALLOC_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

/// Packs a block size and its allocated bit into one metadata word.
///
/// `size` must be a multiple of [`DSIZE`] (or zero, for the epilogue) and
/// fit in 32 bits.
#[inline]
pub fn pack(
  size: usize,
  alloc: bool,
) -> u32 {
  debug_assert!(size % DSIZE == 0);
  debug_assert!(size <= SIZE_MASK as usize);

  size as u32 | alloc as u32
}

/// Reads the metadata word at `p`.
///
/// # Safety
///
/// `p` must point to 4 readable bytes. No alignment is required.
#[inline]
pub unsafe fn get(p: *const u8) -> u32 {
  unsafe { p.cast::<u32>().read_unaligned() }
}

/// Writes the metadata word at `p`.
///
/// # Safety
///
/// `p` must point to 4 writable bytes. No alignment is required.
#[inline]
pub unsafe fn put(
  p: *mut u8,
  word: u32,
) {
  unsafe { p.cast::<u32>().write_unaligned(word) }
}

/// Extracts the block size from the metadata word at `p`.
///
/// # Safety
///
/// Same requirements as [`get`].
#[inline]
pub unsafe fn size_at(p: *const u8) -> usize {
  unsafe { (get(p) & SIZE_MASK) as usize }
}

/// Extracts the allocated bit from the metadata word at `p`.
///
/// # Safety
///
/// Same requirements as [`get`].
#[inline]
pub unsafe fn alloc_at(p: *const u8) -> bool {
  unsafe { get(p) & ALLOC_BIT != 0 }
}

/// Locates the header of the block whose payload starts at `bp`.
///
/// # Safety
///
/// `bp` must be a payload pointer inside the heap.
#[inline]
pub unsafe fn header(bp: *mut u8) -> *mut u8 {
  unsafe { bp.sub(WSIZE) }
}

/// Locates the footer of the block whose payload starts at `bp`.
///
/// # Safety
///
/// `bp` must be a payload pointer whose header already carries the block's
/// current size.
#[inline]
pub unsafe fn footer(bp: *mut u8) -> *mut u8 {
  unsafe { bp.add(size_at(header(bp))).sub(DSIZE) }
}

/// Total size of the block whose payload starts at `bp`.
///
/// # Safety
///
/// `bp` must be a payload pointer inside the heap.
#[inline]
pub unsafe fn block_size(bp: *mut u8) -> usize {
  unsafe { size_at(header(bp)) }
}

/// Whether the block whose payload starts at `bp` is marked allocated.
///
/// # Safety
///
/// `bp` must be a payload pointer inside the heap.
#[inline]
pub unsafe fn block_alloc(bp: *mut u8) -> bool {
  unsafe { alloc_at(header(bp)) }
}

/// Payload pointer of the block following `bp`'s block.
///
/// The epilogue stops forward walks: its size of zero makes the result equal
/// to `bp`, and callers test for that size before advancing.
///
/// # Safety
///
/// `bp` must be a payload pointer inside the heap.
#[inline]
pub unsafe fn next_block(bp: *mut u8) -> *mut u8 {
  unsafe { bp.add(size_at(header(bp))) }
}

/// Payload pointer of the block preceding `bp`'s block, found through the
/// previous block's footer in the word pair just below `bp`'s header.
///
/// # Safety
///
/// `bp` must be a payload pointer inside the heap, and the block below it
/// must carry a valid footer (the prologue guarantees this for the first
/// real block).
#[inline]
pub unsafe fn prev_block(bp: *mut u8) -> *mut u8 {
  unsafe { bp.sub(size_at(bp.sub(DSIZE))) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pack_roundtrip() {
    let word = pack(48, true);
    let p = &word as *const u32 as *const u8;

    unsafe {
      assert_eq!(size_at(p), 48);
      assert!(alloc_at(p));
    }

    let word = pack(4096, false);
    let p = &word as *const u32 as *const u8;

    unsafe {
      assert_eq!(size_at(p), 4096);
      assert!(!alloc_at(p));
    }
  }

  #[test]
  fn epilogue_word() {
    let word = pack(0, true);
    let p = &word as *const u32 as *const u8;

    unsafe {
      assert_eq!(size_at(p), 0);
      assert!(alloc_at(p));
    }
  }

  #[test]
  fn get_put_roundtrip() {
    let mut buf = [0u8; 16];

    unsafe {
      put(buf.as_mut_ptr().add(3), 0xDEAD_BEEF);
      assert_eq!(get(buf.as_ptr().add(3)), 0xDEAD_BEEF);
    }
  }

  #[test]
  fn navigation_over_two_blocks() {
    // Lay out [pad][hdr 16|1][8 payload][ftr 16|1][hdr 24|0][16 payload][ftr 24|0]
    // by hand and walk it in both directions.
    let mut buf = [0u8; 64];

    unsafe {
      let base = buf.as_mut_ptr();
      let a = base.add(DSIZE);
      let b = base.add(DSIZE + 16);

      put(header(a), pack(16, true));
      put(a.add(16).sub(DSIZE), pack(16, true));
      put(header(b), pack(24, false));
      put(b.add(24).sub(DSIZE), pack(24, false));

      assert_eq!(block_size(a), 16);
      assert!(block_alloc(a));
      assert_eq!(footer(a), a.add(8));

      assert_eq!(next_block(a), b);
      assert_eq!(prev_block(b), a);

      assert_eq!(block_size(b), 24);
      assert!(!block_alloc(b));
      assert_eq!(footer(b), b.add(16));
    }
  }
}
