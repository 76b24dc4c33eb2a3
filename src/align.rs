/// Rounds the given byte count up to the allocator's double-word granule.
///
/// Every block size is a multiple of 8 bytes, so the low three bits of a
/// rounded value are always zero and can carry the allocated bit.
///
/// # Examples
///
/// ```rust
/// assert_eq!(rmalloc::align!(1), 8);
/// assert_eq!(rmalloc::align!(8), 8);
/// assert_eq!(rmalloc::align!(13), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::block::DSIZE - 1) & !($crate::block::DSIZE - 1)
  };
}

#[cfg(test)]
mod tests {
  use crate::block::DSIZE;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (DSIZE * i + 1)..=(DSIZE * (i + 1));

      let expected_alignment = DSIZE * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_align_zero() {
    assert_eq!(0, align!(0));
  }
}
