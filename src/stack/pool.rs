// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::trace;

use crate::stack::{Stack, StackSource};

/// StackPool keeps stacks released by exited coroutines and hands them out
/// again, falling back to an inner source when no cached stack is big enough.
///
/// A pool is shared between contexts through `Rc<StackPool<S>>`, which is
/// itself a `StackSource`.
pub struct StackPool<S: StackSource> {
  source:   S,
  capacity: usize,
  free:     RefCell<Vec<S::Output>>,
}

impl<S: StackSource> StackPool<S> {
  /// Creates a pool caching at most `capacity` stacks from `source`.
  pub fn new(source: S, capacity: usize) -> Rc<StackPool<S>> {
    Rc::new(StackPool {
      source,
      capacity,
      free: RefCell::new(Vec::with_capacity(capacity)),
    })
  }

  /// Returns the number of cached stacks.
  pub fn cached(&self) -> usize {
    self.free.borrow().len()
  }

  /// Releases every cached stack.
  pub fn clear(&self) {
    self.free.borrow_mut().clear()
  }
}

impl<S: StackSource> StackSource for Rc<StackPool<S>> {
  type Output = S::Output;
  type Error = S::Error;

  fn allocate(&self, size: usize) -> Result<S::Output, S::Error> {
    let reused = {
      let mut free = self.free.borrow_mut();
      match free.iter().position(|stack| stack.len() >= size) {
        Some(index) => Some(free.swap_remove(index)),
        None => None
      }
    };

    match reused {
      Some(stack) => {
        trace!("reusing pooled stack {:p}", stack.base());
        Ok(stack)
      }
      None => self.source.allocate(size)
    }
  }

  fn deallocate(&self, stack: S::Output) {
    let mut free = self.free.borrow_mut();
    if free.len() < self.capacity {
      free.push(stack)
    } else {
      drop(free);
      self.source.deallocate(stack)
    }
  }
}

impl<S: StackSource + fmt::Debug> fmt::Debug for StackPool<S> {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("StackPool")
      .field("source", &self.source)
      .field("capacity", &self.capacity)
      .field("cached", &self.cached())
      .finish()
  }
}
