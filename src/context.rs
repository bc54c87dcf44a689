// This file is part of stackcoro, a stackful coroutine library.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Coroutine contexts.
//!
//! A context runs a `Runnable` on a stack of its own. The first `start`
//! switches onto that stack and calls the runnable; the runnable can give
//! control back from any depth with `yield_`, after which `start` (or a later
//! `resume`) returns the yielded payload. `resume` continues right after the
//! `yield_` that suspended it. Once the runnable returns, the pending
//! `start`/`resume` returns for the last time and the return code becomes
//! available through `get_ret_code`.
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::marker::{PhantomData, PhantomPinned};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::process;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error, trace, warn};

use crate::arch::{self, StackPointer};
use crate::config::{Config, MIN_STACK_SIZE};
use crate::error::Error;
use crate::runnable::{invoke_runner, PrivateData, Runnable};
use crate::stack::{GuardedStack, Stack, StackSource};
use crate::status::{AtomicStatus, Status, StatusWatch};
use crate::this_coroutine;
use crate::Coroutine;

/// Entry function the trampoline calls on the coroutine stack with the
/// runner and the payload given to `start`. Its result becomes the return
/// code. The default is [invoke_runner](fn.invoke_runner.html).
pub type EntryFn = fn(&dyn Runnable, PrivateData) -> i32;

/// Identity of a coroutine context: the address of its switch state.
/// Stable for the whole life of the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroutineId(usize);

impl CoroutineId {
  #[inline]
  pub(crate) fn from_addr(addr: usize) -> CoroutineId {
    CoroutineId(addr)
  }
}

/// Coroutine context backed by guarded `mmap` stacks.
#[cfg(unix)]
pub type OsCoroutine<'r> = CoroutineContext<'r, crate::stack::OsStackSource>;

/// Coroutine context backed by unguarded heap stacks.
#[cfg(feature = "alloc")]
pub type HeapCoroutine<'r> = CoroutineContext<'r, crate::stack::HeapStackSource>;

/// The part of a context that both stacks touch while switching.
///
/// The registry and the trampoline only ever see this struct, so it carries
/// no type parameters. Everything is a `Cell`: the caller side and the
/// callee side each hold a shared reference to it, and exactly one of them
/// runs at any time.
pub(crate) struct Core {
  // Distinguishes contexts that reuse the same address over time.
  generation:   u64,
  status:       AtomicStatus,
  // Lifetime erased; `CoroutineContext<'r, _>` keeps the runner borrowed.
  runner:       Cell<Option<&'static dyn Runnable>>,
  entry:        Cell<EntryFn>,
  // Where `start`/`resume` switch to. Empty while on CPU and once finished.
  callee:       Cell<Option<StackPointer>>,
  // Where `yield_` switches back to. Set on every entry into the context.
  caller:       Cell<Option<StackPointer>>,
  ret_code:     Cell<Option<i32>>,
  private_data: Cell<PrivateData>,
  panic:        Cell<Option<Box<dyn Any + Send>>>,
  on_cpu:       Cell<bool>,
}

impl Core {
  fn new() -> Core {
    static GENERATION: AtomicU64 = AtomicU64::new(0);
    Core {
      generation:   GENERATION.fetch_add(1, Ordering::Relaxed),
      status:       AtomicStatus::new(),
      runner:       Cell::new(None),
      entry:        Cell::new(invoke_runner),
      callee:       Cell::new(None),
      caller:       Cell::new(None),
      ret_code:     Cell::new(None),
      private_data: Cell::new(ptr::null_mut()),
      panic:        Cell::new(None),
      on_cpu:       Cell::new(false),
    }
  }

  #[inline]
  pub(crate) fn id(&self) -> CoroutineId {
    CoroutineId::from_addr(self as *const Core as usize)
  }

  #[inline]
  pub(crate) fn generation(&self) -> u64 {
    self.generation
  }

  #[inline]
  pub(crate) fn private_data(&self) -> PrivateData {
    self.private_data.get()
  }

  #[inline]
  pub(crate) fn set_private_data(&self, data: PrivateData) {
    self.private_data.set(data)
  }

  /// Switches from the caller side onto the coroutine stack and blocks until
  /// the coroutine yields or finishes. `arg` is the `Core` itself on first
  /// entry and the resume payload afterwards.
  unsafe fn switch_in(&self, arg: usize) -> PrivateData {
    let callee = match self.callee.take() {
      Some(sp) => sp,
      None => fatal(format_args!("coroutine {:?} has no saved stack pointer", self.id()))
    };

    let this = NonNull::from(self);
    this_coroutine::push(this);
    self.on_cpu.set(true);

    let (data, callee) = arch::swap(arg, callee);

    self.on_cpu.set(false);
    this_coroutine::pop(this);

    let data = data as PrivateData;
    if self.status.load() == Status::Running {
      trace!("coroutine {:?} yielded {:p}", self.id(), data);
      self.callee.set(Some(callee));
      self.private_data.set(data);
    } else {
      // The final swap out of the trampoline; that stack is retired.
      trace!("coroutine {:?} finished with {:?}", self.id(), self.ret_code.get());
      if let Some(payload) = self.panic.take() {
        panic::resume_unwind(payload)
      }
    }
    data
  }

  /// Switches from the coroutine stack back to whoever entered it, and blocks
  /// until the coroutine is resumed.
  pub(crate) fn suspend(&self, data: PrivateData) -> Result<PrivateData, Error> {
    if this_coroutine::current() != Some(NonNull::from(self)) {
      return Err(Error::NotRunning)
    }
    let caller = self.caller.take().ok_or(Error::NotRunning)?;

    trace!("coroutine {:?} yielding {:p}", self.id(), data);
    self.private_data.set(data);
    let (data, caller) = unsafe { arch::swap(data as usize, caller) };

    // Resumed, possibly by a different caller than the one we left.
    self.caller.set(Some(caller));
    let data = data as PrivateData;
    self.private_data.set(data);
    Ok(data)
  }
}

// The first and only entry point of every coroutine stack.
unsafe extern "C" fn coroutine_entry(arg: usize, caller: StackPointer) -> ! {
  let core = &*(arg as *const Core);
  core.caller.set(Some(caller));

  let runner = match core.runner.get() {
    Some(runner) => runner,
    None => fatal(format_args!("coroutine {:?} entered without a runner", core.id()))
  };
  let entry = core.entry.get();
  let data = core.private_data.get();

  // Unwinding must not cross the bottom of this stack; the panic is carried
  // over and resumed on the caller's stack instead.
  match panic::catch_unwind(AssertUnwindSafe(|| entry(runner, data))) {
    Ok(code) => core.ret_code.set(Some(code)),
    Err(payload) => core.panic.set(Some(payload)),
  }

  if let Err(found) = core.status.transition(Status::Running, Status::Finished) {
    fatal(format_args!("coroutine {:?} finished in state {:?}", core.id(), found))
  }

  let caller = match core.caller.take() {
    Some(sp) => sp,
    None => fatal(format_args!("coroutine {:?} finished without a caller", core.id()))
  };
  arch::swap(0, caller);
  fatal(format_args!("finished coroutine {:?} was switched into", core.id()))
}

#[cold]
fn fatal(args: fmt::Arguments) -> ! {
  error!("{}", args);
  process::abort()
}

/// CoroutineContext runs a borrowed `Runnable` on a stack it allocates from
/// a `StackSource`.
///
/// Its lifecycle is `Invalid` (constructed) -> `Ready` (`create`) ->
/// `Running` (`start`, then any number of `yield_`/`resume` round trips) ->
/// `Finished` (the runner returned) -> `Exited` (`exit` or drop handed the
/// stack back). A context is pinned on the heap from construction on; its
/// address is its identity, and the coroutine stack refers to it.
///
/// The runner must outlive the context, which the `'r` lifetime enforces.
/// A context is neither `Send` nor `Sync`: its stack can only ever run on the
/// thread that created it. Use `watch()` to observe its status from elsewhere.
///
/// If the runner panics, the panic is caught on the coroutine stack and
/// resumed from the `start` or `resume` call that was waiting for it; the
/// context is finished without a return code.
///
/// Dropping a context parked at a yield point leaks its stack, since that
/// stack still holds live frames.
///
/// # Example
///
/// ```
/// use std::ptr;
/// use stackcoro::{this_coroutine, CoroutineContext, OsStackSource, PrivateData};
///
/// let runner = |_data: PrivateData| {
///   this_coroutine::yield_(ptr::null_mut()).unwrap();
///   42
/// };
///
/// let ctx = CoroutineContext::new(OsStackSource);
/// ctx.create(&runner).unwrap();
/// ctx.start(ptr::null_mut()).unwrap();
/// assert!(!ctx.is_finished());
/// ctx.resume(ptr::null_mut()).unwrap();
/// assert_eq!(ctx.get_ret_code(), Some(42));
/// ```
pub struct CoroutineContext<'r, S: StackSource> {
  core:    Core,
  source:  S,
  config:  Config,
  stack:   Cell<Option<S::Output>>,
  _runner: PhantomData<&'r dyn Runnable>,
  _pinned: PhantomPinned,
}

impl<'r, S> CoroutineContext<'r, S>
    where S: StackSource, S::Output: GuardedStack {
  /// Creates a context allocating `DEFAULT_STACK_SIZE` stacks from `source`.
  pub fn new(source: S) -> Pin<Box<CoroutineContext<'r, S>>> {
    CoroutineContext::with_config(source, Config::default())
  }

  /// Creates a context with the given configuration.
  pub fn with_config(source: S, config: Config) -> Pin<Box<CoroutineContext<'r, S>>> {
    unsafe { CoroutineContext::new_unguarded(source, config) }
  }
}

impl<'r, S> CoroutineContext<'r, S> where S: StackSource {
  /// Same as `with_config`, but does not require the stacks of `source` to
  /// have a guard page.
  ///
  /// This function is unsafe because the runner can easily violate memory
  /// safety by overflowing the stack. It is useful in environments where
  /// guarded stacks do not exist, e.g. in absence of an MMU.
  pub unsafe fn new_unguarded(source: S, config: Config) -> Pin<Box<CoroutineContext<'r, S>>> {
    Box::pin(CoroutineContext {
      core:    Core::new(),
      source,
      config,
      stack:   Cell::new(None),
      _runner: PhantomData,
      _pinned: PhantomPinned,
    })
  }

  /// Binds `runner`, allocates the coroutine stack and prepares it so that
  /// `start` enters `runner.invoke`.
  ///
  /// Fails with `AlreadyCreated` unless the context is `Invalid`, with
  /// `InvalidArgument` if the configured stack size is below
  /// `MIN_STACK_SIZE`, and with `StackAllocationFailed` if the source
  /// refuses. On failure the context stays `Invalid`.
  pub fn create(&self, runner: &'r dyn Runnable) -> Result<(), Error> {
    self.create_with_entry(runner, invoke_runner)
  }

  /// Same as `create`, but the trampoline calls `entry(runner, data)`
  /// instead of `runner.invoke(data)`.
  pub fn create_with_entry(&self, runner: &'r dyn Runnable, entry: EntryFn) -> Result<(), Error> {
    if self.core.status.load() != Status::Invalid {
      return Err(Error::AlreadyCreated)
    }

    let size = self.config.stack_size;
    if size < MIN_STACK_SIZE {
      return Err(Error::InvalidArgument { size, min: MIN_STACK_SIZE })
    }

    let stack = self.source.allocate(size)
      .map_err(|err| Error::StackAllocationFailed(err.into()))?;
    if stack.len() < size {
      let len = stack.len();
      self.source.deallocate(stack);
      return Err(Error::StackAllocationFailed(
        format!("stack source returned {} bytes, {} requested", len, size).into()))
    }
    let callee = unsafe { arch::init(stack.base(), coroutine_entry) };

    // The runner stays borrowed for 'r through `_runner`, and the coroutine
    // can only reach it while the context is alive.
    let runner: &'static dyn Runnable = unsafe { mem::transmute(runner) };
    self.core.runner.set(Some(runner));
    self.core.entry.set(entry);
    self.core.callee.set(Some(callee));

    if self.core.status.transition(Status::Invalid, Status::Ready).is_err() {
      self.core.runner.set(None);
      self.core.callee.set(None);
      self.source.deallocate(stack);
      return Err(Error::AlreadyCreated)
    }

    debug!("created coroutine {:?} on stack {:p}+{:#x}", self.id(), stack.limit(), stack.len());
    self.stack.set(Some(stack));
    Ok(())
  }

  /// Enters the coroutine for the first time, passing `data` to the runner.
  ///
  /// Blocks until the runner yields, returning the yielded payload, or
  /// finishes, returning null. The payload only ever carries pointers; the
  /// runner's result is an `i32` and is read with `get_ret_code` instead,
  /// which also tells a finished runner apart from one that yielded null.
  /// Fails with `AlreadyStarted` if called from
  /// inside this very coroutine and with `NotReady` unless the context is
  /// `Ready`.
  pub fn start(&self, data: PrivateData) -> Result<PrivateData, Error> {
    if self.core.on_cpu.get() {
      return Err(Error::AlreadyStarted)
    }
    self.core.status.transition(Status::Ready, Status::Running)
      .map_err(|_| Error::NotReady)?;

    trace!("starting coroutine {:?} with {:p}", self.id(), data);
    self.core.private_data.set(data);
    let arg = &self.core as *const Core as usize;
    Ok(unsafe { self.core.switch_in(arg) })
  }

  /// Suspends the coroutine, handing `data` to the pending `start`/`resume`.
  ///
  /// Returns the payload of the `resume` that continues the coroutine.
  /// Fails with `NotRunning` unless this context is the one currently on
  /// CPU on this thread.
  pub fn yield_(&self, data: PrivateData) -> Result<PrivateData, Error> {
    self.core.suspend(data)
  }

  /// Continues a coroutine parked at a yield point; `data` is returned from
  /// that `yield_`.
  ///
  /// Blocks and returns like `start`. Fails with `NotResumable` if the
  /// context was never started, has finished, or is currently on CPU.
  pub fn resume(&self, data: PrivateData) -> Result<PrivateData, Error> {
    if self.core.on_cpu.get() || self.core.status.load() != Status::Running {
      return Err(Error::NotResumable)
    }

    trace!("resuming coroutine {:?} with {:p}", self.id(), data);
    self.core.private_data.set(data);
    Ok(unsafe { self.core.switch_in(data as usize) })
  }

  /// Hands the stack of a finished coroutine back to its source and moves
  /// the context to `Exited`. Fails with `NotFinished` before that.
  pub fn exit(&self) -> Result<(), Error> {
    if self.core.on_cpu.get() {
      fatal(format_args!("coroutine {:?} exited while on CPU", self.id()))
    }
    self.core.status.transition(Status::Finished, Status::Exited)
      .map_err(|_| Error::NotFinished)?;
    self.release_stack();
    Ok(())
  }

  fn release_stack(&self) {
    if let Some(stack) = self.stack.take() {
      debug!("releasing stack {:p} of coroutine {:?}", stack.limit(), self.id());
      self.source.deallocate(stack)
    }
  }

  #[inline]
  pub fn status(&self) -> Status {
    self.core.status.load()
  }

  /// Returns true once the runner has returned. Lock-free.
  #[inline]
  pub fn is_finished(&self) -> bool {
    self.status().is_finished()
  }

  /// Returns the runner's result once finished, `None` before that or if
  /// the runner panicked.
  #[inline]
  pub fn get_ret_code(&self) -> Option<i32> {
    if self.is_finished() { self.core.ret_code.get() } else { None }
  }

  /// Returns the runner bound by `create`.
  #[inline]
  pub fn get_runner(&self) -> Option<&'r dyn Runnable> {
    self.core.runner.get()
  }

  /// Returns the payload most recently carried across a switch of this
  /// context, or the one stored by `set_private_data`.
  #[inline]
  pub fn get_private_data(&self) -> PrivateData {
    self.core.private_data()
  }

  #[inline]
  pub fn set_private_data(&self, data: PrivateData) {
    self.core.set_private_data(data)
  }

  #[inline]
  pub fn id(&self) -> CoroutineId {
    self.core.id()
  }

  /// Returns a handle to the status that can be polled from any thread.
  pub fn watch(&self) -> StatusWatch {
    self.core.status.watch()
  }

  #[inline]
  pub fn config(&self) -> &Config {
    &self.config
  }
}

impl<'r, S> Drop for CoroutineContext<'r, S> where S: StackSource {
  fn drop(&mut self) {
    if self.core.on_cpu.get() {
      fatal(format_args!("coroutine {:?} dropped while on CPU", self.id()))
    }

    match self.core.status.load() {
      Status::Invalid | Status::Exited => {}
      // Never entered, the stack holds nothing.
      Status::Ready => self.release_stack(),
      Status::Running => {
        warn!("leaking stack of coroutine {:?} parked at a yield point", self.id());
        mem::forget(self.stack.take())
      }
      Status::Finished => {
        let _ = self.exit();
      }
    }
  }
}

impl<'r, S> fmt::Debug for CoroutineContext<'r, S> where S: StackSource {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("CoroutineContext")
      .field("id", &self.id())
      .field("status", &self.status())
      .field("ret_code", &self.get_ret_code())
      .field("config", &self.config)
      .finish()
  }
}

impl<'r, S> Coroutine<'r> for CoroutineContext<'r, S> where S: StackSource {
  fn create(&self, runner: &'r dyn Runnable) -> Result<(), Error> {
    CoroutineContext::create(self, runner)
  }

  fn start(&self, data: PrivateData) -> Result<PrivateData, Error> {
    CoroutineContext::start(self, data)
  }

  fn yield_(&self, data: PrivateData) -> Result<PrivateData, Error> {
    CoroutineContext::yield_(self, data)
  }

  fn resume(&self, data: PrivateData) -> Result<PrivateData, Error> {
    CoroutineContext::resume(self, data)
  }

  fn status(&self) -> Status {
    CoroutineContext::status(self)
  }

  fn get_ret_code(&self) -> Option<i32> {
    CoroutineContext::get_ret_code(self)
  }
}
