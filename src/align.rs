/// Granularity of every payload size handed out by the allocator, in bytes.
pub const ALIGNMENT: usize = 4;

/// Rounds a byte count up to the next multiple of [`ALIGNMENT`].
///
/// Zero rounds up to one full unit, so the allocator never carves out an
/// empty payload.
///
/// # Examples
///
/// ```rust
/// use brkalloc::align;
///
/// assert_eq!(align!(0), 4);
/// assert_eq!(align!(5), 8);
/// assert_eq!(align!(12), 12);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    match $value {
      0 => $crate::align::ALIGNMENT,
      v => (v + ($crate::align::ALIGNMENT - 1)) & !($crate::align::ALIGNMENT - 1),
    }
  };
}

#[cfg(test)]
mod tests {
  use super::ALIGNMENT;

  #[test]
  fn test_align_rounds_up_to_unit() {
    for size in 1..=64usize {
      let rounded = align!(size);

      assert_eq!(0, rounded % ALIGNMENT);
      assert!(rounded >= size && rounded - size < ALIGNMENT, "{size} -> {rounded}");
    }
  }

  #[test]
  fn test_align_zero_gets_one_unit() {
    assert_eq!(ALIGNMENT, align!(0usize));
  }

  #[test]
  fn test_align_near_usize_max() {
    let top = usize::MAX - (ALIGNMENT - 1);

    assert_eq!(top, align!(top));
    assert_eq!(top, align!(top - 1));
    assert_eq!(top, align!(top - (ALIGNMENT - 1)));
  }

  #[test]
  fn test_align_in_const() {
    const ROUNDED: usize = align!(33usize);

    assert_eq!(36, ROUNDED);
  }
}
