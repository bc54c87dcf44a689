// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
#![cfg(all(unix, feature = "alloc"))]
extern crate stackcoro;

use std::cell::Cell;
use std::io;
use std::ptr;

use stackcoro::{Config, CoroutineContext, Error, HeapStackSource, OsStack, OsStackSource,
                OwnedStack, PrivateData, Stack, StackPool, StackSource, MIN_STACK_SIZE,
                STACK_ALIGNMENT};

#[test]
fn default_stack() {
  let stack = OsStack::new(0).unwrap();
  assert!(stack.len() >= MIN_STACK_SIZE);
  // Make sure the topmost page of the stack, at least, is accessible.
  unsafe { *(stack.base().offset(-1)) = 0; }
}

#[test]
fn one_page_stack() {
  let stack = OsStack::new(4096).unwrap();
  unsafe { *(stack.base().offset(-1)) = 0; }
}

#[test]
fn stacks_are_aligned() {
  let os = OsStack::new(0).unwrap();
  assert_eq!(os.base() as usize % STACK_ALIGNMENT, 0);
  let owned = OwnedStack::new(MIN_STACK_SIZE + 3).unwrap();
  assert_eq!(owned.base() as usize % STACK_ALIGNMENT, 0);
  assert!(owned.len() >= MIN_STACK_SIZE + 3);
}

#[test]
fn heap_backed_context() {
  let runner = |_: PrivateData| {
    stackcoro::this_coroutine::yield_(ptr::null_mut()).unwrap();
    9
  };

  let ctx = unsafe { CoroutineContext::new_unguarded(HeapStackSource, Config::default()) };
  ctx.create(&runner).unwrap();
  ctx.start(ptr::null_mut()).unwrap();
  ctx.resume(ptr::null_mut()).unwrap();
  assert_eq!(ctx.get_ret_code(), Some(9));
}

#[test]
fn pool_recycles_through_contexts() {
  let pool = StackPool::new(OsStackSource, 4);
  let runner = |_: PrivateData| 0;

  let first = CoroutineContext::new(pool.clone());
  first.create(&runner).unwrap();
  assert_eq!(pool.cached(), 0);
  first.start(ptr::null_mut()).unwrap();
  first.exit().unwrap();
  assert_eq!(pool.cached(), 1);

  let second = CoroutineContext::new(pool.clone());
  second.create(&runner).unwrap();
  assert_eq!(pool.cached(), 0);
  drop(second);
  assert_eq!(pool.cached(), 1);
}

struct Refusing {
  calls: Cell<usize>,
}

impl StackSource for Refusing {
  type Output = OwnedStack;
  type Error = io::Error;

  fn allocate(&self, _size: usize) -> Result<OwnedStack, io::Error> {
    self.calls.set(self.calls.get() + 1);
    Err(io::Error::new(io::ErrorKind::OutOfMemory, "no stacks today"))
  }
}

#[test]
fn oversized_stack_is_refused() {
  assert!(OsStack::new(usize::MAX).is_err());
  assert!(OwnedStack::new(usize::MAX).is_err());

  let runner = |_: PrivateData| 0;
  let ctx = CoroutineContext::with_config(OsStackSource,
                                          Config::default().with_stack_size(usize::MAX));
  match ctx.create(&runner) {
    Err(Error::StackAllocationFailed(_)) => (),
    other => panic!("unexpected {:?}", other)
  }
  assert_eq!(ctx.status(), stackcoro::Status::Invalid);
  assert!(ctx.get_runner().is_none());
}

// Hands out stacks smaller than requested.
struct Stingy;

impl StackSource for Stingy {
  type Output = OwnedStack;
  type Error = io::Error;

  fn allocate(&self, _size: usize) -> Result<OwnedStack, io::Error> {
    OwnedStack::new(MIN_STACK_SIZE)
  }
}

#[test]
fn short_stack_from_source_is_refused() {
  let runner = |_: PrivateData| 0;
  let ctx = unsafe {
    CoroutineContext::new_unguarded(Stingy, Config::default().with_stack_size(2 * MIN_STACK_SIZE))
  };
  match ctx.create(&runner) {
    Err(Error::StackAllocationFailed(_)) => (),
    other => panic!("unexpected {:?}", other)
  }
  assert_eq!(ctx.status(), stackcoro::Status::Invalid);
}

#[test]
fn allocation_failure_leaves_context_invalid() {
  let runner = |_: PrivateData| 0;
  let ctx = unsafe {
    CoroutineContext::new_unguarded(Refusing { calls: Cell::new(0) }, Config::default())
  };

  match ctx.create(&runner) {
    Err(Error::StackAllocationFailed(err)) => assert_eq!(err.to_string(), "no stacks today"),
    other => panic!("unexpected {:?}", other)
  }
  assert_eq!(ctx.status(), stackcoro::Status::Invalid);
  assert!(ctx.create(&runner).is_err());
}
