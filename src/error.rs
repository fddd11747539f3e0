use std::io;

use thiserror::Error;

/// Failure to move the end of the managed range.
///
/// These never cross the public allocation API, which reports every failure
/// as a null pointer. They exist so the heap sources can say what went wrong
/// and the allocator can log it.
#[derive(Debug, Error)]
pub enum HeapError {
  #[error("heap exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },

  #[error("cannot release {requested} bytes, only {used} in use")]
  Underflow { requested: usize, used: usize },

  #[error("the operating system refused to move the program break: {0}")]
  Refused(#[source] io::Error),

  #[error("requested size does not fit in the address space")]
  Overflow,
}
