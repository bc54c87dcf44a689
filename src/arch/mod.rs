// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The context switch primitive.
//!
//! `init` prepares a fresh stack so that the first `swap` into it lands in
//! `f(arg, caller_sp)`; `swap` saves the current thread of execution on the
//! current stack and resumes the one saved at `new_sp`, returning the argument
//! and stack pointer of whoever eventually swaps back.
use core::ptr::NonNull;

pub use self::imp::*;

#[allow(unused_attributes)]
#[cfg_attr(target_arch = "x86_64",  path = "x86_64.rs")]
#[cfg_attr(target_arch = "aarch64", path = "aarch64.rs")]
mod imp;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("stackcoro supports only x86_64 and aarch64");

/// Function first entered on a freshly initialized stack. It receives the
/// argument of the first `swap` and the stack pointer of the swapper, and
/// must never return.
pub type EntryPoint = unsafe extern "C" fn(usize, StackPointer) -> !;

/// Saved stack pointer of a suspended thread of execution. Everything else
/// that has to survive a switch lives on the stack right below it.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPointer(NonNull<usize>);

impl StackPointer {
  #[inline(always)]
  pub unsafe fn new(sp: *mut u8) -> StackPointer {
    StackPointer(NonNull::new_unchecked(sp as *mut usize))
  }

  #[inline(always)]
  pub unsafe fn push(&mut self, val: usize) {
    self.0 = NonNull::new_unchecked(self.0.as_ptr().offset(-1));
    *self.0.as_ptr() = val;
  }

  #[inline(always)]
  pub fn as_ptr(&self) -> *mut usize {
    self.0.as_ptr()
  }
}

/// Two-register return value of the raw swap routines.
#[repr(C)]
struct Transfer {
  arg: usize,
  sp:  *mut usize,
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::{init, swap, StackPointer, STACK_ALIGNMENT};
  use crate::stack::{OsStack, Stack};

  #[test]
  fn context() {
    unsafe extern "C" fn adder(arg: usize, stack_ptr: StackPointer) -> ! {
      let (arg, stack_ptr) = swap(arg + 1, stack_ptr);
      swap(arg + 1, stack_ptr);
      panic!("i should be dead");
    }

    unsafe {
      let stack = OsStack::new(4 << 20).unwrap();
      let stack_ptr = init(stack.base(), adder);

      let (ret, stack_ptr) = swap(10, stack_ptr);
      assert_eq!(ret, 11);
      let (ret, _) = swap(50, stack_ptr);
      assert_eq!(ret, 51);
    }
  }

  #[test]
  fn context_alignment() {
    unsafe extern "C" fn aligned(_arg: usize, stack_ptr: StackPointer) -> ! {
      #[repr(align(16))]
      struct Wide([u64; 2]);

      // Misaligned entry would misplace this local.
      let wide = Wide([1, 2]);
      let addr = &wide as *const Wide as usize;
      let (_, stack_ptr) = swap(addr % STACK_ALIGNMENT, stack_ptr);
      let wide = Wide([3, 4]);
      let addr = &wide as *const Wide as usize;
      swap(addr % STACK_ALIGNMENT, stack_ptr);
      panic!("i should be dead");
    }

    unsafe {
      let stack = OsStack::new(4 << 20).unwrap();
      let stack_ptr = init(stack.base(), aligned);

      let (misalign, stack_ptr) = swap(0, stack_ptr);
      assert_eq!(misalign, 0);
      let (misalign, _) = swap(0, stack_ptr);
      assert_eq!(misalign, 0);
    }
  }

  #[test]
  fn callee_saved_survive() {
    unsafe extern "C" fn scribbler(arg: usize, mut stack_ptr: StackPointer) -> ! {
      let mut acc = arg as f64;
      loop {
        acc = acc * 1.5 + 0.25;
        let data = swap(acc.to_bits() as usize, stack_ptr);
        stack_ptr = data.1;
      }
    }

    unsafe {
      let stack = OsStack::new(4 << 20).unwrap();
      let mut stack_ptr = init(stack.base(), scribbler);

      let local = Cell::new(0.5f64);
      for _ in 0..16 {
        let (bits, sp) = swap(2, stack_ptr);
        stack_ptr = sp;
        local.set(local.get() * 2.0 + f64::from_bits(bits as u64) * 0.0);
      }
      assert_eq!(local.get(), 0.5 * 65536.0);
    }
  }
}
