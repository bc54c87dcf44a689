// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Traits for stacks and the stack providers shipped with the crate.
use std::error::Error as StdError;

#[cfg(unix)]
pub use self::os::{OsStack, OsStackSource};
#[cfg(feature = "alloc")]
pub use self::owned_stack::{HeapStackSource, OwnedStack};
pub use self::pool::StackPool;

#[cfg(unix)]
mod os;
#[cfg(feature = "alloc")]
mod owned_stack;
mod pool;

/// A trait for objects that hold ownership of a stack.
///
/// To preserve memory safety, an implementation of this trait must fulfill
/// the following contract:
///
///   * The base address of the stack must be aligned to
///     a [`STACK_ALIGNMENT`][align]-byte boundary.
///   * Every address between the base and the limit must be readable and writable.
///
/// [align]: constant.STACK_ALIGNMENT.html
pub unsafe trait Stack {
  /// Returns the base address of the stack.
  /// On all modern architectures, the stack grows downwards,
  /// so this is the highest address.
  fn base(&self) -> *mut u8;
  /// Returns the limit address of the stack.
  /// On all modern architectures, the stack grows downwards,
  /// so this is the lowest address.
  fn limit(&self) -> *mut u8;

  /// Returns the number of usable bytes between limit and base.
  #[inline]
  fn len(&self) -> usize {
    self.base() as usize - self.limit() as usize
  }
}

/// A marker trait for `Stack` objects with a guard page.
///
/// To preserve memory safety, an implementation of this trait must fulfill
/// the following contract, in addition to the [contract](trait.Stack.html)
/// of `Stack`:
///
///   * Any access of data at addresses `limit()` to `limit().offset(4096)` must
///     abnormally terminate, at least, the thread that performs the access.
pub unsafe trait GuardedStack {}

/// A trait for objects that provide stacks of arbitrary size.
///
/// This is the stack provider a coroutine context allocates from when it is
/// created, and hands its stack back to once it has exited.
pub trait StackSource {
  type Output: Stack;
  type Error: Into<Box<dyn StdError + Send + Sync>>;

  /// Allocates a stack with at least `size` usable bytes.
  fn allocate(&self, size: usize) -> Result<Self::Output, Self::Error>;

  /// Takes back a stack no longer in use. The default releases it.
  fn deallocate(&self, stack: Self::Output) {
    drop(stack)
  }
}
