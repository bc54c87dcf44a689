// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The coroutine currently running on this thread.
//!
//! Every thread keeps a stack of the contexts it is inside of, innermost
//! last. Entering a context through `start` or `resume` pushes it; the
//! matching return pops it, whether the coroutine yielded or finished. Code
//! running on a coroutine stack uses this module to find its own context and
//! to yield without holding a reference to it.
use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;

use log::error;

use crate::context::{Core, CoroutineId};
use crate::error::Error;
use crate::runnable::PrivateData;

thread_local! {
  static ACTIVE: RefCell<Vec<NonNull<Core>>> = const { RefCell::new(Vec::new()) };
}

// The registry is never borrowed across a context switch, only for the
// duration of these calls.

pub(crate) fn push(core: NonNull<Core>) {
  ACTIVE.with(|active| active.borrow_mut().push(core))
}

pub(crate) fn pop(core: NonNull<Core>) {
  let top = ACTIVE.with(|active| active.borrow_mut().pop());
  if top != Some(core) {
    error!("coroutine registry corrupted: expected {:p} on top, found {:?}", core, top);
    std::process::abort()
  }
}

pub(crate) fn current() -> Option<NonNull<Core>> {
  ACTIVE.with(|active| active.borrow().last().copied())
}

fn contains(core: NonNull<Core>) -> bool {
  ACTIVE.with(|active| active.borrow().contains(&core))
}

/// Returns how many coroutines this thread is nested inside of; 0 on a
/// thread's own stack.
pub fn depth() -> usize {
  ACTIVE.with(|active| active.borrow().len())
}

/// Returns the innermost coroutine running on this thread, or `None` when
/// called outside of any coroutine.
pub fn get_coroutine() -> Option<Current> {
  // A registered core belongs to a live context.
  current().map(|core| Current { core, generation: unsafe { core.as_ref().generation() } })
}

/// Yields the innermost coroutine running on this thread.
///
/// Same as calling `yield_` on its context. Fails with `NotRunning` when
/// called outside of any coroutine.
pub fn yield_(data: PrivateData) -> Result<PrivateData, Error> {
  match get_coroutine() {
    Some(current) => current.yield_(data),
    None => Err(Error::NotRunning)
  }
}

/// Current is a handle to a running coroutine, obtained from `get_coroutine`.
///
/// The handle stays valid to hold after its coroutine yields or finishes;
/// its methods then fail with `NotRunning` instead of touching the context.
/// That remains true after the context is dropped, even if a new context
/// later occupies the same address. It cannot leave the thread it was
/// obtained on.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Current {
  core:       NonNull<Core>,
  generation: u64,
}

impl Current {
  #[inline]
  pub fn id(&self) -> CoroutineId {
    CoroutineId::from_addr(self.core.as_ptr() as usize)
  }

  /// Returns true while the coroutine is still entered on this thread.
  pub fn is_active(&self) -> bool {
    self.core().is_ok()
  }

  // Contexts cannot be dropped while entered, so a registered core is alive.
  // It may be a newer context at the same address, though.
  fn core(&self) -> Result<&Core, Error> {
    if contains(self.core) {
      let core = unsafe { self.core.as_ref() };
      if core.generation() == self.generation {
        return Ok(core)
      }
    }
    Err(Error::NotRunning)
  }

  /// Suspends the coroutine; see `CoroutineContext::yield_`. Fails with
  /// `NotRunning` unless it is the innermost coroutine.
  pub fn yield_(&self, data: PrivateData) -> Result<PrivateData, Error> {
    self.core()?.suspend(data)
  }

  pub fn get_private_data(&self) -> Result<PrivateData, Error> {
    Ok(self.core()?.private_data())
  }

  pub fn set_private_data(&self, data: PrivateData) -> Result<(), Error> {
    self.core()?.set_private_data(data);
    Ok(())
  }
}

impl fmt::Debug for Current {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("Current")
      .field("id", &self.id())
      .field("active", &self.is_active())
      .finish()
  }
}
