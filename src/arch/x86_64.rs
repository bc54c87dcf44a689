// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

// To understand the code in this file, keep in mind these facts:
// * x86_64 SysV C ABI requires the stack to be aligned at function entry,
//   so that (%rsp+8) is a multiple of 16. Aligned operands are a requirement
//   of SIMD instructions.
// * x86_64 SysV C ABI passes the first two arguments in %rdi and %rsi, and
//   returns a two-word struct in %rax:%rdx. `swap_raw` takes (arg, new_sp)
//   and every party that swaps out resumes with (arg, sp) in %rax:%rdx, which
//   is exactly a return from `swap_raw`. The very first swap into a stack
//   "returns" into `trampoline` instead, which moves the pair into
//   %rdi:%rsi and calls the entry function.
// * Only callee-saved state has to be preserved: %rbx, %rbp, %r12-%r15, the
//   MXCSR control bits and the x87 control word. All of it is pushed onto
//   the stack being left, so a suspended context is fully described by its
//   stack pointer.
use core::arch::naked_asm;

use super::{EntryPoint, StackPointer, Transfer};

pub const STACK_ALIGNMENT: usize = 16;

// Default MXCSR (all exceptions masked, round to nearest) in the low half,
// default x87 control word (extended precision, all exceptions masked)
// in the next 16 bits.
const INITIAL_FP_CONTROL: usize = 0x1f80 | (0x037f << 32);

#[unsafe(naked)]
unsafe extern "C" fn trampoline() {
  naked_asm!(
    // %rax = argument, %rdx = stack pointer of the swapper,
    // %rbx = entry function, placed there by `init`.
    "mov rdi, rax",
    "mov rsi, rdx",
    "call rbx",
    // The entry function never returns.
    "ud2",
  )
}

#[unsafe(naked)]
unsafe extern "C" fn swap_raw(_arg: usize, _new_sp: *mut usize) -> Transfer {
  naked_asm!(
    // Save callee-saved registers of the old context.
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "sub rsp, 16",
    "stmxcsr dword ptr [rsp]",
    "fnstcw word ptr [rsp + 4]",

    // Hand our stack pointer to the new context and switch to its stack.
    "mov rdx, rsp",
    "mov rsp, rsi",

    // Restore callee-saved registers of the new context.
    "ldmxcsr dword ptr [rsp]",
    "fldcw word ptr [rsp + 4]",
    "add rsp, 16",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",

    // Return (arg, old sp) into the new context.
    "mov rax, rdi",
    "ret",
  )
}

pub unsafe fn init(stack_base: *mut u8, f: EntryPoint) -> StackPointer {
  let base = (stack_base as usize) & !(STACK_ALIGNMENT - 1);
  let mut sp = StackPointer::new(base as *mut u8);

  sp.push(0);                                // padding
  sp.push(0);                                // %rsp on entry to the trampoline
  sp.push(trampoline as *const () as usize); // return address of swap_raw
  sp.push(0);                                // %rbp, terminates frame pointer chains
  sp.push(f as *const () as usize);          // %rbx
  sp.push(0);                                // %r12
  sp.push(0);                                // %r13
  sp.push(0);                                // %r14
  sp.push(0);                                // %r15
  sp.push(0);                                // padding
  sp.push(INITIAL_FP_CONTROL);               // MXCSR, x87 control word
  sp
}

#[inline(always)]
pub unsafe fn swap(arg: usize, new_sp: StackPointer) -> (usize, StackPointer) {
  let transfer = swap_raw(arg, new_sp.as_ptr());
  (transfer.arg, StackPointer::new(transfer.sp as *mut u8))
}
