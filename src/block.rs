use std::{mem, ptr};

use log::trace;

use crate::{align, align::ALIGNMENT};

/// Metadata in front of every chunk of managed memory.
///
/// Packed so that a header can sit at any 4-byte boundary; fields are only
/// ever read and written by value, never borrowed.
///
/// ```text
///   ┌──────┬──────┬──────┬─────────┬─────┬──────────────────────┐
///   │ size │ next │ prev │ is_free │ ptr │  payload (size bytes)│
///   └──────┴──────┴──────┴─────────┴─────┴──────────────────────┘
///   ▲                                    ▲
///   header address                       ptr == header + HEADER_SIZE
/// ```
#[repr(C, packed)]
pub struct Block {
  pub size: usize,
  pub next: *mut Block,
  pub prev: *mut Block,
  pub is_free: bool,
  pub ptr: *mut u8,
}

/// Bytes reserved for a header in front of each payload.
pub const HEADER_SIZE: usize = align!(mem::size_of::<Block>());

/// Smallest leftover worth turning into a block of its own: a header plus
/// one alignment unit of payload.
pub const MIN_SPLIT: usize = HEADER_SIZE + ALIGNMENT;

impl Block {
  pub fn new(
    size: usize,
    is_free: bool,
    prev: *mut Block,
    next: *mut Block,
    ptr: *mut u8,
  ) -> Self {
    Self {
      size,
      next,
      prev,
      is_free,
      ptr,
    }
  }

  /// Installs a header at `at` and returns it. The stored self-pointer is set
  /// to the payload that follows the header.
  ///
  /// # Safety
  ///
  /// `at..at + HEADER_SIZE` must be writable memory inside the managed range.
  pub unsafe fn install(
    at: *mut u8,
    size: usize,
    is_free: bool,
    prev: *mut Block,
    next: *mut Block,
  ) -> *mut Block {
    unsafe {
      let block = at.cast::<Block>();
      ptr::write(block, Block::new(size, is_free, prev, next, at.add(HEADER_SIZE)));
      block
    }
  }

  /// Start of the payload that follows `block`.
  pub fn payload(block: *mut Block) -> *mut u8 {
    block.cast::<u8>().wrapping_add(HEADER_SIZE)
  }

  /// Header that precedes `payload`. Pure address arithmetic: the result is
  /// only meaningful for a pointer that has already been validated.
  pub fn header_of(payload: *mut u8) -> *mut Block {
    payload.wrapping_sub(HEADER_SIZE).cast()
  }

  /// Carves `block` into a prefix of exactly `size` bytes and a new free
  /// block made of the rest, linked right after it.
  ///
  /// # Safety
  ///
  /// `block` must be an installed header with `size + MIN_SPLIT <= block.size`
  /// and `size` a multiple of [`ALIGNMENT`].
  pub unsafe fn split(
    block: *mut Block,
    size: usize,
  ) -> *mut Block {
    unsafe {
      let remainder = (*block).size - size - HEADER_SIZE;
      let next = (*block).next;
      let rest = Block::install(Block::payload(block).add(size), remainder, true, block, next);

      if !next.is_null() {
        (*next).prev = rest;
      }

      (*block).size = size;
      (*block).next = rest;

      trace!("split {block:?} into {size} bytes and {rest:?} with {remainder} bytes");

      rest
    }
  }

  /// Absorbs the block right after `block` if that block is free. Returns
  /// `block` either way.
  ///
  /// # Safety
  ///
  /// `block` must be an installed header whose links are intact.
  pub unsafe fn fuse(block: *mut Block) -> *mut Block {
    unsafe {
      let next = (*block).next;

      if next.is_null() || !(*next).is_free {
        return block;
      }

      (*block).size += HEADER_SIZE + (*next).size;
      (*block).next = (*next).next;

      let after = (*block).next;
      if !after.is_null() {
        (*after).prev = block;
      }

      trace!("fused {next:?} into {block:?}, now {} bytes", { (*block).size });

      block
    }
  }
}
