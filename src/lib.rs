// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! stackcoro is a library implementing stackful cooperative coroutines
//! on a single OS thread, without relying on kernel services.
//!
//! It provides the following abstractions:
//!
//!   * a coroutine context with an explicit lifecycle,
//!     [CoroutineContext](struct.CoroutineContext.html), driven through
//!     `create`, `start`, `yield_` and `resume`;
//!   * a thread-local registry of the coroutine currently on CPU,
//!     [this_coroutine](this_coroutine/index.html);
//!   * the capability a coroutine runs, [Runnable](trait.Runnable.html).
//!
//! It also provides the necessary low-level building blocks:
//!
//!   * a trait that can be implemented by stack allocators,
//!     [StackSource](trait.StackSource.html), and the stacks they produce,
//!     [Stack](trait.Stack.html);
//!   * a stack allocator based on anonymous memory mappings with guard pages,
//!     [OsStack](struct.OsStack.html);
//!   * a heap stack allocator, [OwnedStack](struct.OwnedStack.html);
//!   * a recycling allocator, [StackPool](struct.StackPool.html).

pub use config::{Config, DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
pub use context::{CoroutineContext, CoroutineId, EntryFn};
#[cfg(unix)]
pub use context::OsCoroutine;
#[cfg(feature = "alloc")]
pub use context::HeapCoroutine;
pub use error::Error;
pub use runnable::{invoke_runner, PrivateData, Runnable};
pub use stack::{GuardedStack, Stack, StackPool, StackSource};
#[cfg(unix)]
pub use stack::{OsStack, OsStackSource};
#[cfg(feature = "alloc")]
pub use stack::{HeapStackSource, OwnedStack};
pub use status::{Status, StatusWatch};
pub use arch::STACK_ALIGNMENT;

mod arch;
mod config;
mod context;
mod error;
mod runnable;
mod stack;
mod status;
pub mod this_coroutine;

/// The polymorphic face of a coroutine context.
///
/// Every stack strategy produces a `CoroutineContext<'r, S>` for a different
/// `S`; this trait lets callers drive any of them through `&dyn Coroutine`.
pub trait Coroutine<'r> {
  /// Binds `runner` and allocates the callee stack. See
  /// [CoroutineContext::create](struct.CoroutineContext.html#method.create).
  fn create(&self, runner: &'r dyn Runnable) -> Result<(), Error>;
  /// Enters the coroutine for the first time.
  fn start(&self, data: PrivateData) -> Result<PrivateData, Error>;
  /// Suspends the coroutine, returning control to whoever entered it.
  fn yield_(&self, data: PrivateData) -> Result<PrivateData, Error>;
  /// Re-enters a coroutine parked at a yield point.
  fn resume(&self, data: PrivateData) -> Result<PrivateData, Error>;
  /// Returns the current lifecycle state.
  fn status(&self) -> Status;
  /// Returns the runner's result once it has finished.
  fn get_ret_code(&self) -> Option<i32>;

  /// Returns true once the runner has returned.
  #[inline]
  fn is_finished(&self) -> bool {
    self.status().is_finished()
  }
}
