use std::{io, marker::PhantomData, ptr::{self, NonNull}};

use libc::{c_void, intptr_t, sbrk};
use log::trace;

use crate::error::HeapError;

/// The growable end of a contiguous address range.
///
/// This is the only thing the allocator asks of the operating system: where
/// the managed range currently ends, and to move that end by a signed delta.
///
/// # Safety
///
/// Implementors guarantee that every byte between the first address ever
/// returned and the current break is readable, writable and not touched by
/// anyone but the allocator that owns the source. A failed `move_break` must
/// leave the break exactly where it was.
pub unsafe trait HeapSource {
  /// Current end of the managed range.
  fn current_break(&self) -> *mut u8;

  /// Moves the end of the range by `delta` bytes and returns the previous end.
  fn move_break(
    &mut self,
    delta: isize,
  ) -> Result<*mut u8, HeapError>;
}

/// The process data segment, grown and shrunk through `sbrk(2)`.
///
/// ```text
///   High Address ┌─────────────────────┐
///                │       Stack         │ ↓ grows down
///                │         ▲           │
///                │         │           │
///                │       Heap          │ ↑ grows up (sbrk)
///                ├─────────────────────┤ ← Program Break
///                │   Data / Text       │
///   Low Address  └─────────────────────┘
/// ```
pub struct Sbrk {
  _single_thread: PhantomData<*mut u8>,
}

impl Sbrk {
  /// # Safety
  ///
  /// Nothing else in the process may move the program break while the
  /// returned value is in use. In particular the system `malloc` must not be
  /// extending the data segment, and only one allocator may own an `Sbrk`.
  pub unsafe fn new() -> Self {
    Self {
      _single_thread: PhantomData,
    }
  }
}

unsafe impl HeapSource for Sbrk {
  fn current_break(&self) -> *mut u8 {
    unsafe { sbrk(0) }.cast()
  }

  fn move_break(
    &mut self,
    delta: isize,
  ) -> Result<*mut u8, HeapError> {
    let previous = unsafe { sbrk(delta as intptr_t) };

    if previous == usize::MAX as *mut c_void {
      return Err(HeapError::Refused(io::Error::last_os_error()));
    }

    trace!("program break moved by {delta} from {previous:?}");

    Ok(previous.cast())
  }
}

/// A fixed-size region owned by the value, handed out the way `sbrk` hands
/// out the data segment.
///
/// The buffer is aligned to 8 bytes and never moves, so pointers into it stay
/// valid for as long as the arena lives.
pub struct Arena {
  base: NonNull<u8>,
  capacity: usize,
  used: usize,
}

impl Arena {
  /// Creates an arena of at least `capacity` bytes (rounded up to 8).
  pub fn with_capacity(capacity: usize) -> Self {
    let words = capacity.div_ceil(8);
    let buffer: &mut [u64] = Box::leak(vec![0u64; words].into_boxed_slice());

    Self {
      base: NonNull::from(buffer).cast(),
      capacity: words * 8,
      used: 0,
    }
  }

  /// First address of the arena; the break never moves below it.
  pub fn start(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes between the start of the arena and the current break.
  pub fn used(&self) -> usize {
    self.used
  }
}

unsafe impl HeapSource for Arena {
  fn current_break(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.used) }
  }

  fn move_break(
    &mut self,
    delta: isize,
  ) -> Result<*mut u8, HeapError> {
    let previous = self.current_break();

    let used = if delta >= 0 {
      let requested = delta.unsigned_abs();
      let available = self.capacity - self.used;

      if requested > available {
        return Err(HeapError::Exhausted {
          requested,
          available,
        });
      }

      self.used + requested
    } else {
      let requested = delta.unsigned_abs();

      if requested > self.used {
        return Err(HeapError::Underflow {
          requested,
          used: self.used,
        });
      }

      self.used - requested
    };

    trace!("arena break moved by {delta}: {} -> {used} of {}", self.used, self.capacity);
    self.used = used;

    Ok(previous)
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    let words = ptr::slice_from_raw_parts_mut(self.base.as_ptr().cast::<u64>(), self.capacity / 8);

    drop(unsafe { Box::from_raw(words) });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::{Allocator, HEADER_SIZE};
  use test_log::test;

  #[test]
  fn test_arena_grow_and_shrink() {
    let mut arena = Arena::with_capacity(64);
    let start = arena.start();

    assert_eq!(start, arena.current_break());
    assert_eq!(0, start as usize % 8);

    let previous = arena.move_break(40).unwrap();
    assert_eq!(start, previous);
    assert_eq!(40, arena.used());
    assert_eq!(unsafe { start.add(40) }, arena.current_break());

    let previous = arena.move_break(-16).unwrap();
    assert_eq!(unsafe { start.add(40) }, previous);
    assert_eq!(24, arena.used());
  }

  #[test]
  fn test_arena_capacity_rounds_up() {
    let arena = Arena::with_capacity(13);

    assert_eq!(16, arena.capacity());
  }

  #[test]
  fn test_arena_refuses_growth_past_capacity() {
    let mut arena = Arena::with_capacity(32);
    arena.move_break(24).unwrap();

    let err = arena.move_break(16).unwrap_err();

    assert!(matches!(
      err,
      HeapError::Exhausted {
        requested: 16,
        available: 8
      }
    ));
    assert_eq!(24, arena.used());
  }

  #[test]
  fn test_arena_refuses_release_below_start() {
    let mut arena = Arena::with_capacity(32);
    arena.move_break(8).unwrap();

    let err = arena.move_break(-16).unwrap_err();

    assert!(matches!(err, HeapError::Underflow { requested: 16, used: 8 }));
    assert_eq!(8, arena.used());
  }

  #[test]
  fn test_arena_memory_is_writable() {
    let mut arena = Arena::with_capacity(16);
    let start = arena.move_break(16).unwrap();

    unsafe {
      ptr::write_bytes(start, 0xAB, 16);
      assert_eq!(0xAB, *start.add(15));
    }
  }

  #[test]
  fn test_sbrk_reports_a_break() {
    let mut heap = unsafe { Sbrk::new() };

    assert!(!heap.current_break().is_null());
    assert!(heap.move_break(0).is_ok());
  }

  #[test]
  fn test_sbrk_refusal_is_reported() {
    let mut heap = unsafe { Sbrk::new() };

    let err = heap.move_break(isize::MAX).unwrap_err();

    assert!(matches!(err, HeapError::Refused(_)), "{err}");
  }

  // Moves the real program break, which the test harness's own allocator may
  // be moving from other threads. Run alone with
  // `cargo test -- --ignored --test-threads=1`.
  #[test]
  #[ignore]
  fn test_sbrk_allocate_and_release() {
    let mut allocator = Allocator::new(unsafe { Sbrk::new() });
    let start = allocator.heap_end();

    unsafe {
      let first = allocator.allocate(4).cast::<u32>();
      first.write_unaligned(0xDEADBEEF);

      let second = allocator.allocate(12);
      ptr::write_bytes(second, 0xAB, 12);

      assert_eq!(start.add(HEADER_SIZE), first.cast::<u8>());
      assert_eq!(first.cast::<u8>().add(4 + HEADER_SIZE), second);
      assert_eq!(second.add(12), allocator.heap_end());

      allocator.release(first.cast());
      assert_eq!(0xAB, *second.add(11));

      allocator.release(second);
    }

    assert!(allocator.is_empty());
    assert_eq!(start, allocator.heap_end());
  }
}
