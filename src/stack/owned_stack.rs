// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
use std::alloc::{self, Layout};
use std::io::{Error as IoError, ErrorKind};
use std::ptr::NonNull;

use crate::stack::{Stack, StackSource};
use crate::STACK_ALIGNMENT;

/// OwnedStack holds a non-guarded, heap-allocated stack.
#[derive(Debug)]
pub struct OwnedStack {
  ptr:    NonNull<u8>,
  layout: Layout,
}

impl OwnedStack {
  /// Allocates a new stack with at least `size` accessible bytes and alignment
  /// appropriate for the current platform using the default Rust allocator.
  /// `size` is rounded up to a multiple of `STACK_ALIGNMENT`.
  pub fn new(size: usize) -> Result<OwnedStack, IoError> {
    let aligned_size = size.max(1).checked_next_multiple_of(STACK_ALIGNMENT)
      .ok_or_else(|| IoError::new(ErrorKind::InvalidInput, "stack size overflows the address space"))?;
    let layout = Layout::from_size_align(aligned_size, STACK_ALIGNMENT)
      .map_err(|err| IoError::new(ErrorKind::InvalidInput, err))?;
    let ptr = NonNull::new(unsafe { alloc::alloc(layout) })
      .ok_or_else(|| IoError::new(ErrorKind::OutOfMemory, "stack allocation failed"))?;
    Ok(OwnedStack { ptr, layout })
  }
}

unsafe impl Stack for OwnedStack {
  #[inline(always)]
  fn base(&self) -> *mut u8 {
    // The allocation cannot wrap around the address space.
    unsafe { self.limit().add(self.layout.size()) }
  }

  #[inline(always)]
  fn limit(&self) -> *mut u8 {
    self.ptr.as_ptr()
  }
}

impl Drop for OwnedStack {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
  }
}

/// Stack provider handing out heap-allocated `OwnedStack`s.
///
/// These stacks have no guard page; a coroutine overflowing one corrupts
/// the heap. Contexts using this source are built with
/// [CoroutineContext::new_unguarded](struct.CoroutineContext.html#method.new_unguarded).
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStackSource;

impl StackSource for HeapStackSource {
  type Output = OwnedStack;
  type Error = IoError;

  fn allocate(&self, size: usize) -> Result<OwnedStack, IoError> {
    OwnedStack::new(size)
  }
}
