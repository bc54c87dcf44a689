// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle state of a coroutine context. States only ever advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Status {
  /// Constructed, no runner or stack bound yet. This is the initial state.
  Invalid = 0,
  /// `create` succeeded; the context can be started.
  Ready,
  /// `start` was called; the runner has not returned yet.
  Running,
  /// The runner returned (or panicked); the stack is retired.
  Finished,
  /// The stack has been handed back to its source.
  Exited,
}

impl Status {
  #[inline]
  pub fn is_finished(self) -> bool {
    self >= Status::Finished
  }

  #[inline]
  fn from_u8(value: u8) -> Status {
    match value {
      0 => Status::Invalid,
      1 => Status::Ready,
      2 => Status::Running,
      3 => Status::Finished,
      _ => Status::Exited,
    }
  }
}

/// The atomic status word shared between a context and its watchers.
#[derive(Debug, Clone)]
pub(crate) struct AtomicStatus(Arc<AtomicU8>);

impl AtomicStatus {
  pub(crate) fn new() -> AtomicStatus {
    AtomicStatus(Arc::new(AtomicU8::new(Status::Invalid as u8)))
  }

  #[inline]
  pub(crate) fn load(&self) -> Status {
    Status::from_u8(self.0.load(Ordering::Acquire))
  }

  /// Advances `from` to `to`; on failure returns the state actually found.
  #[inline]
  pub(crate) fn transition(&self, from: Status, to: Status) -> Result<(), Status> {
    debug_assert!(from < to);
    self.0
      .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
      .map(|_| ())
      .map_err(Status::from_u8)
  }

  pub(crate) fn watch(&self) -> StatusWatch {
    StatusWatch(self.clone())
  }
}

/// A read-only view of a context's status that may be moved to and polled
/// from other threads, e.g. by a watchdog.
///
/// The status is the only part of a context that is safe to observe from
/// another thread.
#[derive(Debug, Clone)]
pub struct StatusWatch(AtomicStatus);

impl StatusWatch {
  #[inline]
  pub fn status(&self) -> Status {
    self.0.load()
  }

  #[inline]
  pub fn is_finished(&self) -> bool {
    self.status().is_finished()
  }
}

#[cfg(test)]
mod tests {
  use std::thread;

  use super::{AtomicStatus, Status};

  #[test]
  fn transitions_only_advance_from_expected_state() {
    let status = AtomicStatus::new();
    assert_eq!(status.load(), Status::Invalid);
    assert_eq!(status.transition(Status::Ready, Status::Running), Err(Status::Invalid));
    assert_eq!(status.transition(Status::Invalid, Status::Ready), Ok(()));
    assert_eq!(status.transition(Status::Invalid, Status::Ready), Err(Status::Ready));
    assert_eq!(status.load(), Status::Ready);
  }

  #[test]
  fn finished_covers_exited() {
    assert!(!Status::Running.is_finished());
    assert!(Status::Finished.is_finished());
    assert!(Status::Exited.is_finished());
  }

  #[test]
  fn watch_crosses_threads() {
    let status = AtomicStatus::new();
    let watch = status.watch();
    status.transition(Status::Invalid, Status::Finished).unwrap();

    let seen = thread::spawn(move || watch.status()).join().unwrap();
    assert_eq!(seen, Status::Finished);
  }
}
