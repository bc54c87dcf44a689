// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// Stack size requested for a coroutine when none is configured.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest stack a coroutine context accepts. A runner that panics needs
/// this much headroom for unwinding and for the default panic hook, which
/// symbolizes a backtrace when `RUST_BACKTRACE` is set.
pub const MIN_STACK_SIZE: usize = 128 * 1024;

/// Per-context settings, fixed when the context is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Usable bytes requested from the stack source by `create`.
  pub stack_size: usize,
}

impl Config {
  #[inline]
  pub fn with_stack_size(mut self, stack_size: usize) -> Config {
    self.stack_size = stack_size;
    self
  }
}

impl Default for Config {
  fn default() -> Config {
    Config { stack_size: DEFAULT_STACK_SIZE }
  }
}
