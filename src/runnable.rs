// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// Unowned payload carried across a single switch.
///
/// The coroutine machinery never dereferences it; whoever sends a pointer
/// keeps the pointee alive until the receiving side is done with it.
pub type PrivateData = *mut ();

/// The work a coroutine context runs on its own stack.
///
/// `invoke` is called exactly once per context, by its trampoline, with the
/// payload given to `start`. It may yield any number of times through
/// [this_coroutine::yield_](this_coroutine/fn.yield_.html), start nested
/// coroutines, or simply run to completion. The returned code is reported
/// verbatim by `get_ret_code`.
pub trait Runnable {
  fn invoke(&self, data: PrivateData) -> i32;
}

impl<F> Runnable for F where F: Fn(PrivateData) -> i32 {
  #[inline]
  fn invoke(&self, data: PrivateData) -> i32 {
    self(data)
  }
}

/// The default entry function: runs `runner` with the start payload.
pub fn invoke_runner(runner: &dyn Runnable, data: PrivateData) -> i32 {
  runner.invoke(data)
}
