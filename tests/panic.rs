// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
#![cfg(unix)]
extern crate stackcoro;

use std::env;
use std::panic::{self, AssertUnwindSafe};
use std::process::Command;
use std::ptr;

use stackcoro::{this_coroutine, Config, CoroutineContext, OsStackSource, PrivateData, Status,
                MIN_STACK_SIZE};

#[test]
#[should_panic(expected = "arg=0")]
fn panic_after_start() {
  let runner = |_: PrivateData| -> i32 { panic!("arg=0") };
  let ctx = CoroutineContext::new(OsStackSource);
  ctx.create(&runner).unwrap();
  ctx.start(ptr::null_mut()).unwrap();
}

#[test]
#[should_panic(expected = "arg=1")]
fn panic_after_yield() {
  let runner = |_: PrivateData| -> i32 {
    this_coroutine::yield_(ptr::null_mut()).unwrap();
    panic!("arg=1")
  };
  let ctx = CoroutineContext::new(OsStackSource);
  ctx.create(&runner).unwrap();
  ctx.start(ptr::null_mut()).unwrap();
  ctx.resume(ptr::null_mut()).unwrap();
}

#[test]
fn panicked_context_is_finished_without_code() {
  let runner = |_: PrivateData| -> i32 { panic!("boom") };
  let ctx = CoroutineContext::new(OsStackSource);
  ctx.create(&runner).unwrap();

  let caught = panic::catch_unwind(AssertUnwindSafe(|| ctx.start(ptr::null_mut())));
  let payload = caught.unwrap_err();
  assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
  assert_eq!(ctx.status(), Status::Finished);
  assert_eq!(ctx.get_ret_code(), None);
  assert_eq!(this_coroutine::depth(), 0);
  ctx.exit().unwrap();
}

#[test]
fn panic_crosses_nested_coroutines() {
  let inner_runner = |_: PrivateData| -> i32 { panic!("inner") };
  let inner = CoroutineContext::new(OsStackSource);
  inner.create(&inner_runner).unwrap();

  let outer_runner = |_: PrivateData| {
    let caught = panic::catch_unwind(AssertUnwindSafe(|| inner.start(ptr::null_mut())));
    if caught.is_err() { 1 } else { 0 }
  };
  let outer = CoroutineContext::new(OsStackSource);
  outer.create(&outer_runner).unwrap();
  outer.start(ptr::null_mut()).unwrap();

  assert!(inner.is_finished());
  assert_eq!(outer.get_ret_code(), Some(1));
}

// Set in the environment of a test binary re-executed by one of its own tests.
const CHILD: &str = "STACKCORO_TEST_CHILD";

#[test]
fn panic_on_minimum_stack_with_backtrace() {
  if env::var_os(CHILD).is_none() {
    // RUST_BACKTRACE is read once per process; set it in a fresh one.
    let status = Command::new(env::current_exe().unwrap())
      .args(["panic_on_minimum_stack_with_backtrace", "--exact", "--test-threads=1"])
      .env(CHILD, "1")
      .env("RUST_BACKTRACE", "1")
      .status()
      .unwrap();
    assert!(status.success(), "child failed: {:?}", status);
    return
  }

  let runner = |_: PrivateData| -> i32 { panic!("small") };
  let ctx = CoroutineContext::with_config(OsStackSource,
                                          Config::default().with_stack_size(MIN_STACK_SIZE));
  ctx.create(&runner).unwrap();
  let caught = panic::catch_unwind(AssertUnwindSafe(|| ctx.start(ptr::null_mut())));
  assert!(caught.is_err());
  assert!(ctx.is_finished());
}
