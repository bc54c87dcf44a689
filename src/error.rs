// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
use std::error::Error as StdError;

use thiserror::Error;

/// Lifecycle violations reported by coroutine operations.
///
/// Each of these signals misuse by the caller; none of them is transient,
/// and the context is left exactly as it was.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
  #[error("coroutine context was already created")]
  AlreadyCreated,
  #[error("stack size {size} is below the minimum of {min} bytes")]
  InvalidArgument { size: usize, min: usize },
  #[error("stack allocation failed")]
  StackAllocationFailed(#[source] Box<dyn StdError + Send + Sync>),
  #[error("coroutine context is not ready to start")]
  NotReady,
  #[error("coroutine context is already running on this thread")]
  AlreadyStarted,
  #[error("not running inside this coroutine context")]
  NotRunning,
  #[error("coroutine context is not parked at a yield point")]
  NotResumable,
  #[error("coroutine context has not finished")]
  NotFinished,
}
