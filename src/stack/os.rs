// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{c_int, c_void};
use log::{error, trace};

use crate::stack::{GuardedStack, Stack, StackSource};
use crate::MIN_STACK_SIZE;

const GUARD_PROT: c_int = libc::PROT_NONE;
const STACK_PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
// MAP_STACK is rejected or meaningless on the BSDs and Darwin.
#[cfg(any(target_os = "linux", target_os = "android"))]
const STACK_FLAGS: c_int = libc::MAP_STACK | libc::MAP_PRIVATE | libc::MAP_ANON;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const STACK_FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

/// OsStack holds a guarded stack allocated using the operating system's anonymous
/// memory mapping facility.
///
/// The lowest page of the mapping is the guard page; `limit()` points right
/// above it.
#[derive(Debug)]
pub struct OsStack {
  ptr: *mut u8,
  len: usize,
}

impl OsStack {
  /// Allocates a new stack with at least `size` accessible bytes.
  /// `size` is rounded up to an integral number of pages; `OsStack::new(0)` is legal
  /// and allocates the smallest stack, `MIN_STACK_SIZE` bytes plus one guard page.
  pub fn new(size: usize) -> IoResult<OsStack> {
    let page_size = page_size();

    // Unwinding needs a fair amount of stack.
    let len = if size == 0 { MIN_STACK_SIZE } else { size };

    // Round up to whole pages, then add the guard page.
    let len = len.checked_next_multiple_of(page_size)
      .and_then(|len| len.checked_add(page_size))
      .ok_or_else(|| IoError::new(ErrorKind::InvalidInput, "stack size overflows the address space"))?;

    let ptr = unsafe { map_guarded(len, page_size)? };
    trace!("mapped stack {:p}+{:#x}", ptr, len);
    Ok(OsStack { ptr, len })
  }
}

unsafe impl Stack for OsStack {
  #[inline(always)]
  fn base(&self) -> *mut u8 {
    unsafe { self.ptr.add(self.len) }
  }

  #[inline(always)]
  fn limit(&self) -> *mut u8 {
    unsafe { self.ptr.add(page_size()) }
  }
}

unsafe impl GuardedStack for OsStack {}

impl Drop for OsStack {
  fn drop(&mut self) {
    if unsafe { libc::munmap(self.ptr as *mut c_void, self.len) } != 0 {
      error!("cannot unmap stack {:p}+{:#x}: {}", self.ptr, self.len, IoError::last_os_error());
    }
  }
}

/// Stack provider handing out fresh `OsStack`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsStackSource;

impl StackSource for OsStackSource {
  type Output = OsStack;
  type Error = IoError;

  fn allocate(&self, size: usize) -> IoResult<OsStack> {
    OsStack::new(size)
  }
}

// Maps `len` bytes and turns the lowest page into a guard page. The mapping
// is released again if the guard cannot be installed.
unsafe fn map_guarded(len: usize, page_size: usize) -> IoResult<*mut u8> {
  let ptr = libc::mmap(ptr::null_mut(), len, STACK_PROT, STACK_FLAGS, -1, 0);
  if ptr == libc::MAP_FAILED {
    return Err(IoError::last_os_error())
  }

  if libc::mprotect(ptr, page_size, GUARD_PROT) != 0 {
    let err = IoError::last_os_error();
    libc::munmap(ptr, len);
    return Err(err)
  }

  Ok(ptr as *mut u8)
}

pub(crate) fn page_size() -> usize {
  #[cold]
  fn sys_page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
  }

  static PAGE_SIZE_CACHE: AtomicUsize = AtomicUsize::new(0);
  match PAGE_SIZE_CACHE.load(Ordering::Relaxed) {
    0 => {
      let page_size = sys_page_size();
      PAGE_SIZE_CACHE.store(page_size, Ordering::Relaxed);
      page_size
    }
    page_size => page_size
  }
}
