// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

// To understand the code in this file, keep in mind these facts:
// * The AArch64 ABI requires the stack to always be a multiple of 16 bytes,
//   even in the middle of functions.
// * The AArch64 ABI passes the first two arguments in x0 and x1 and returns
//   a two-word struct in x0:x1. `swap_raw` takes (arg, new_sp) and leaves
//   (arg, old_sp) in x0:x1 when it returns into the new context, which is
//   also the argument layout `trampoline` forwards to the entry function.
// * Callee-saved state is x19-x28, the frame pointer x29, the link register
//   x30 and the low halves of v8-v15. All of it is stored in a single 160
//   byte frame on the stack being left.
use core::arch::naked_asm;

use super::{EntryPoint, StackPointer, Transfer};

pub const STACK_ALIGNMENT: usize = 16;

const FRAME_WORDS: usize = 20;
const FRAME_X19: usize = 8;
const FRAME_LR: usize = 19;

#[unsafe(naked)]
unsafe extern "C" fn trampoline() {
  naked_asm!(
    // x0 = argument, x1 = stack pointer of the swapper,
    // x19 = entry function, placed there by `init`.
    "blr x19",
    // The entry function never returns.
    "brk #0x1",
  )
}

#[unsafe(naked)]
unsafe extern "C" fn swap_raw(_arg: usize, _new_sp: *mut usize) -> Transfer {
  naked_asm!(
    // Save callee-saved registers of the old context.
    "sub sp, sp, #0xa0",
    "stp d8,  d9,  [sp, #0x00]",
    "stp d10, d11, [sp, #0x10]",
    "stp d12, d13, [sp, #0x20]",
    "stp d14, d15, [sp, #0x30]",
    "stp x19, x20, [sp, #0x40]",
    "stp x21, x22, [sp, #0x50]",
    "stp x23, x24, [sp, #0x60]",
    "stp x25, x26, [sp, #0x70]",
    "stp x27, x28, [sp, #0x80]",
    "stp x29, x30, [sp, #0x90]",

    // Hand our stack pointer to the new context and switch to its stack.
    "mov x2, sp",
    "mov sp, x1",

    // Restore callee-saved registers of the new context.
    "ldp d8,  d9,  [sp, #0x00]",
    "ldp d10, d11, [sp, #0x10]",
    "ldp d12, d13, [sp, #0x20]",
    "ldp d14, d15, [sp, #0x30]",
    "ldp x19, x20, [sp, #0x40]",
    "ldp x21, x22, [sp, #0x50]",
    "ldp x23, x24, [sp, #0x60]",
    "ldp x25, x26, [sp, #0x70]",
    "ldp x27, x28, [sp, #0x80]",
    "ldp x29, x30, [sp, #0x90]",
    "add sp, sp, #0xa0",

    // Return (arg, old sp) into the new context; x0 still holds arg.
    "mov x1, x2",
    "ret",
  )
}

pub unsafe fn init(stack_base: *mut u8, f: EntryPoint) -> StackPointer {
  let base = (stack_base as usize) & !(STACK_ALIGNMENT - 1);
  let mut sp = StackPointer::new(base as *mut u8);

  sp.push(0); // padding
  sp.push(0); // sp on entry to the trampoline

  // Register frame consumed by the first swap_raw, zeroed except for the
  // entry function (x19) and the return address (x30). x29 stays zero so
  // frame pointer chains terminate here.
  for index in (0..FRAME_WORDS).rev() {
    let value = match index {
      FRAME_X19 => f as *const () as usize,
      FRAME_LR  => trampoline as *const () as usize,
      _         => 0,
    };
    sp.push(value);
  }
  sp
}

#[inline(always)]
pub unsafe fn swap(arg: usize, new_sp: StackPointer) -> (usize, StackPointer) {
  let transfer = swap_raw(arg, new_sp.as_ptr());
  (transfer.arg, StackPointer::new(transfer.sp as *mut u8))
}
