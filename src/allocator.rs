use std::{
  fmt::{self, Debug, Formatter},
  marker::PhantomData,
  ptr,
};

use log::{debug, trace, warn};

use crate::{
  align,
  align::ALIGNMENT,
  block::{Block, HEADER_SIZE, MIN_SPLIT},
  error::HeapError,
  heap::HeapSource,
};

/// Rounds a request up to the alignment unit, refusing sizes that would
/// overflow while doing so.
fn aligned(size: usize) -> Option<usize> {
  size.checked_add(ALIGNMENT - 1).map(|_| align!(size))
}

/// A first-fit allocator over the growable end of a [`HeapSource`].
///
/// Every block lives between the root header and the current break, chained
/// in address order. Freed blocks are coalesced with their neighbours right
/// away, and a freed tail is handed back to the source.
///
/// Single-threaded: the allocator holds raw pointers into the range it
/// manages and is neither `Send` nor `Sync`. Callers sharing one across
/// threads must serialize every call themselves.
pub struct Allocator<H: HeapSource> {
  heap: H,
  root: *mut Block,
}

/// A snapshot of one block in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  pub header: *const u8,
  pub payload: *mut u8,
  pub size: usize,
  pub is_free: bool,
}

/// Iterator over the chain in address order, see [`Allocator::blocks`].
pub struct Blocks<'a> {
  current: *mut Block,
  _chain: PhantomData<&'a Block>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    if self.current.is_null() {
      return None;
    }

    let block = self.current;

    unsafe {
      self.current = (*block).next;

      Some(BlockInfo {
        header: block.cast::<u8>().cast_const(),
        payload: (*block).ptr,
        size: (*block).size,
        is_free: (*block).is_free,
      })
    }
  }
}

impl<H: HeapSource> Allocator<H> {
  pub fn new(heap: H) -> Self {
    Self {
      heap,
      root: ptr::null_mut(),
    }
  }

  pub fn source(&self) -> &H {
    &self.heap
  }

  /// True when no block exists and the next allocation starts from scratch.
  pub fn is_empty(&self) -> bool {
    self.root.is_null()
  }

  /// Current end of the managed range.
  pub fn heap_end(&self) -> *mut u8 {
    self.heap.current_break()
  }

  /// Walks the chain from the root.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      current: self.root,
      _chain: PhantomData,
    }
  }

  /// First free block, in address order, with at least `size` bytes.
  /// Returns it together with the last block visited, which is the tail when
  /// nothing fits.
  unsafe fn find_free_block(
    &self,
    size: usize,
  ) -> (*mut Block, *mut Block) {
    unsafe {
      let mut current = self.root;
      let mut last = ptr::null_mut();

      while !current.is_null() {
        if (*current).is_free && (*current).size >= size {
          return (current, last);
        }
        last = current;
        current = (*current).next;
      }

      (ptr::null_mut(), last)
    }
  }

  /// Checks that `ptr` looks like a payload this allocator handed out: it
  /// must fall inside the managed range and the header in front of it must
  /// point back at it.
  ///
  /// This is a sanity check, not proof of provenance. Stale headers left
  /// inside a coalesced block still point at themselves and pass.
  pub fn is_valid(
    &self,
    ptr: *const u8,
  ) -> bool {
    if self.root.is_null() {
      return false;
    }

    let first_payload = Block::payload(self.root).cast_const();

    if ptr < first_payload || ptr >= self.heap.current_break().cast_const() {
      return false;
    }

    let header = Block::header_of(ptr.cast_mut());

    unsafe { (*header).ptr }.cast_const() == ptr
  }

  /// Payload size of the block behind `ptr`, if `ptr` is valid.
  pub fn usable_size(
    &self,
    ptr: *const u8,
  ) -> Option<usize> {
    if !self.is_valid(ptr) {
      return None;
    }

    Some(unsafe { (*Block::header_of(ptr.cast_mut())).size })
  }

  /// Grows the range by one block of `size` bytes and links it after `last`.
  unsafe fn extend_heap(
    &mut self,
    last: *mut Block,
    size: usize,
  ) -> Result<*mut Block, HeapError> {
    let total = HEADER_SIZE.checked_add(size).ok_or(HeapError::Overflow)?;
    let delta = isize::try_from(total).map_err(|_| HeapError::Overflow)?;

    let address = self.heap.move_break(delta)?;

    unsafe {
      let block = Block::install(address, size, false, last, ptr::null_mut());

      if !last.is_null() {
        (*last).next = block;
      }

      trace!("extended heap with {block:?} holding {size} bytes");

      Ok(block)
    }
  }

  /// Moves the break back to the header of `block`, which must be the tail.
  /// The chain is left alone; unlinking is up to the caller.
  unsafe fn shrink_heap(
    &mut self,
    block: *mut Block,
  ) -> Result<(), HeapError> {
    let released = self.heap.current_break() as usize - block as usize;
    let delta = isize::try_from(released).map_err(|_| HeapError::Overflow)?;

    self.heap.move_break(-delta)?;

    trace!("shrank heap by {released} bytes down to {block:?}");

    Ok(())
  }

  unsafe fn place(
    &mut self,
    size: usize,
  ) -> Result<*mut Block, HeapError> {
    unsafe {
      if self.root.is_null() {
        let block = self.extend_heap(ptr::null_mut(), size)?;
        self.root = block;
        return Ok(block);
      }

      let (found, last) = self.find_free_block(size);

      if found.is_null() {
        return self.extend_heap(last, size);
      }

      if (*found).size - size >= MIN_SPLIT {
        Block::split(found, size);
      }

      (*found).is_free = false;

      Ok(found)
    }
  }

  /// Allocates at least `size` bytes and returns the payload, or null when
  /// the heap cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    let Some(aligned_size) = aligned(size) else {
      debug!("allocation of {size} bytes overflows");
      return ptr::null_mut();
    };

    match unsafe { self.place(aligned_size) } {
      Ok(block) => {
        let payload = Block::payload(block);
        debug!("allocated {aligned_size} bytes at {payload:?}");
        payload
      }
      Err(err) => {
        debug!("allocation of {aligned_size} bytes failed: {err}");
        ptr::null_mut()
      }
    }
  }

  /// Allocates room for `count` elements of `elem_size` bytes each and fills
  /// all of it with zeroes. Null when the product overflows or the heap
  /// cannot grow.
  pub fn zeroed_allocate(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> *mut u8 {
    let Some(size) = count.checked_mul(elem_size) else {
      debug!("zeroed allocation of {count} x {elem_size} bytes overflows");
      return ptr::null_mut();
    };

    let payload = self.allocate(size);

    if !payload.is_null() {
      unsafe { ptr::write_bytes(payload, 0, size) };
    }

    payload
  }

  /// Changes the size of the allocation behind `ptr`.
  ///
  /// A null `ptr` behaves like [`allocate`](Self::allocate). Shrinking keeps
  /// the address and splits off the excess when it is large enough to form a
  /// block. Growing always allocates a new block, copies the old payload
  /// over and releases the old one. Returns null, leaving the old block
  /// untouched, when `ptr` is not valid or the heap cannot grow.
  ///
  /// # Safety
  ///
  /// `ptr` must be null, foreign to this allocator, or a live pointer
  /// returned by it. Passing a pointer that was already released may
  /// pass validation and corrupt the chain.
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if ptr.is_null() {
      return self.allocate(size);
    }

    if !self.is_valid(ptr) {
      debug!("ignoring resize of unmanaged pointer {ptr:?}");
      return ptr::null_mut();
    }

    let Some(size) = aligned(size) else {
      debug!("resize of {ptr:?} to {size} bytes overflows");
      return ptr::null_mut();
    };

    unsafe {
      let block = Block::header_of(ptr);
      let current = (*block).size;

      if current >= size {
        if current - size >= MIN_SPLIT {
          let rest = Block::split(block, size);
          Block::fuse(rest);
        }

        debug!("resized {ptr:?} in place from {current} to {size} bytes");

        return ptr;
      }

      let moved = self.allocate(size);

      if moved.is_null() {
        return ptr::null_mut();
      }

      ptr::copy_nonoverlapping(ptr, moved, current);
      self.release(ptr);

      debug!("moved {ptr:?} to {moved:?} to grow from {current} to {size} bytes");

      moved
    }
  }

  /// Releases the block behind `ptr`.
  ///
  /// The block is merged with a free predecessor and a free successor. If
  /// the result is the last block, the break moves back to its header and
  /// the memory is returned to the source. Invalid pointers, null included,
  /// are ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null, foreign to this allocator, or a live pointer
  /// returned by it. The payload must not be used afterwards.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if !self.is_valid(ptr) {
      if !ptr.is_null() {
        debug!("ignoring release of unmanaged pointer {ptr:?}");
      }
      return;
    }

    unsafe {
      let mut block = Block::header_of(ptr);
      (*block).is_free = true;

      let prev = (*block).prev;
      if !prev.is_null() && (*prev).is_free {
        block = Block::fuse(prev);
      }

      Block::fuse(block);

      let next = (*block).next;
      if !next.is_null() {
        debug!("released {ptr:?}");
        return;
      }

      if let Err(err) = self.shrink_heap(block) {
        warn!("keeping free tail {block:?}, could not shrink heap: {err}");
        return;
      }

      let prev = (*block).prev;
      if prev.is_null() {
        self.root = ptr::null_mut();
      } else {
        (*prev).next = ptr::null_mut();
      }

      debug!("released {ptr:?} and returned the tail to the heap");
    }
  }

  /// Forgets every block and moves the break back to the root header.
  ///
  /// # Safety
  ///
  /// Every pointer handed out so far dangles afterwards.
  pub unsafe fn reset(&mut self) {
    if self.root.is_null() {
      return;
    }

    match unsafe { self.shrink_heap(self.root) } {
      Ok(()) => {
        debug!("reset allocator, released everything from {:?}", self.root);
        self.root = ptr::null_mut();
      }
      Err(err) => warn!("could not reset allocator: {err}"),
    }
  }
}

impl<H: HeapSource> Debug for Allocator<H> {
  fn fmt(
    &self,
    f: &mut Formatter,
  ) -> fmt::Result {
    f.debug_struct("Allocator")
      .field("root", &self.root)
      .field("heap_end", &self.heap_end())
      .field("blocks", &self.blocks().collect::<Vec<_>>())
      .finish()
  }
}
