//! Execution contexts for stackful coroutines.
//!
//! A [`Context`] owns a dedicated call stack and moves control in and out of it at arbitrary
//! points, continuing later exactly where it left off. It's the mechanism only: deciding which
//! context runs when is left to the scheduler built on top of it.
//!
//! The crate consists of three parts:
//! 1. Stack management, provided by the [guardstack] crate (a page aligned mapping with an
//!    optional guard page).
//! 2. [Environments](Environment): single use resume points, captured whenever control leaves a
//!    flow of control.
//! 3. The transfer protocol: [`Context::start`], [`Context::resume`] and
//!    [`Suspender::suspend`].
//!
//! ## Example
//! ```
//! use std::cell::RefCell;
//! use coroutine_context::{Context, SuspendPoint};
//!
//! let log = RefCell::new(String::new());
//! let point = SuspendPoint::new();
//! let mut context = Context::with_work(64 * 1024, true, |suspender| {
//!     log.borrow_mut().push('A');
//!     suspender.suspend(&point);
//!     log.borrow_mut().push('B');
//!     suspender.suspend(&point);
//!     log.borrow_mut().push('C');
//! })
//! .unwrap();
//!
//! assert_eq!(context.start(), false);
//! assert_eq!(context.resume_point(&point), false);
//! assert_eq!(context.resume_point(&point), true);
//! assert_eq!(*log.borrow(), "ABC");
//! ```
//!
//! ## Caller obligations
//! * A context that was suspended must be resumed until it finishes before it's dropped. The
//!   frames of a paused work are never unwound. Dropping a suspended context leaks its stack
//!   together with everything those frames own, so values pinned there stay valid. Debug builds
//!   assert against it.
//! * Guard pages are best-effort. Check [`Context::has_guard_page`] before relying on overflow
//!   protection, without it an overflow silently corrupts the memory under the stack.
//! * A context is bound to the thread that created it. [`Context`], [`Suspender`],
//!   [`Environment`] and [`SuspendPoint`] are neither `Send` nor `Sync`, there is no
//!   synchronization between transfers.

mod arch;
mod env;

pub use env::{Environment, SuspendPoint};
pub use guardstack::page_size;

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::io::Error;
use std::mem::ManuallyDrop;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use guardstack::Stack;

use env::Outcome;

/// Stack size used by [`Context::with_default_stack`].
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Lifecycle of a [`Context`], as seen by its owner.
///
/// `Idle` and `Finished` only differ in the fact that an idle context hasn't run yet. Both can
/// be started once they hold pending work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    Suspended,
    Finished,
}

type Work<'a> = Box<dyn FnOnce(&Suspender<'_>) + 'a>;

// Every context gets an id, environments captured by its work are tagged with it.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

// The part of a context the running work reaches through its `Suspender`. Boxed, so that it keeps
// its address when the `Context` is moved between two transfers.
struct Shared {
    id: u64,
    // Where to continue whoever last started or resumed the context.
    return_env: Environment,
    state: Cell<State>,
    panic: Cell<Option<Box<dyn Any + Send + 'static>>>,
}

/// A unit of work together with the stack it runs on.
pub struct Context<'a> {
    // Only released if no paused frames live on it.
    stack: ManuallyDrop<Stack>,
    shared: Box<Shared>,
    work: Option<Work<'a>>,
}

// Handed to the entry point of a fresh stack by `start`. It lives on the stack of the starting
// side and is only read before the work runs.
struct Launch<'a> {
    shared: *const Shared,
    work: Option<Work<'a>>,
}

impl<'a> Context<'a> {
    /// Creates an idle context with its own stack of at least `stack_size` bytes.
    ///
    /// With `guard_page` set, the page under the stack is protected where the platform allows it.
    pub fn new(stack_size: usize, guard_page: bool) -> Result<Self, Error> {
        let stack = Stack::new(stack_size, guard_page)?;
        let shared = Box::new(Shared {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            return_env: Environment::new(),
            state: Cell::new(State::Idle),
            panic: Cell::new(None),
        });
        Ok(Context {
            stack: ManuallyDrop::new(stack),
            shared,
            work: None,
        })
    }

    /// Creates an idle context with a guarded [`DEFAULT_STACK_SIZE`] stack.
    pub fn with_default_stack() -> Result<Self, Error> {
        Context::new(DEFAULT_STACK_SIZE, true)
    }

    /// Creates an idle context that runs `work` once started.
    pub fn with_work<F>(stack_size: usize, guard_page: bool, work: F) -> Result<Self, Error>
    where
        F: FnOnce(&Suspender<'_>) + 'a,
    {
        let mut context = Context::new(stack_size, guard_page)?;
        context.set_work(work);
        Ok(context)
    }

    /// Sets the work the next [`start`](Context::start) will run.
    ///
    /// A finished context can be given new work and started again on the same stack.
    pub fn set_work<F>(&mut self, work: F)
    where
        F: FnOnce(&Suspender<'_>) + 'a,
    {
        let state = self.state();
        assert!(
            state == State::Idle || state == State::Finished,
            "work can't be set on a {:?} context",
            state
        );
        self.work = Some(Box::new(work));
    }

    /// Runs the pending work on the context's stack.
    ///
    /// Returns `true` if control came back because the work finished and `false` if it
    /// suspended. A panic inside the work finishes the context and is resumed here.
    ///
    /// # Panics
    ///
    /// If there is no pending work (a context can't be started twice with the same work) or the
    /// context is neither idle nor finished.
    pub fn start(&mut self) -> bool {
        let state = self.state();
        assert!(
            state == State::Idle || state == State::Finished,
            "a {:?} context can't be started",
            state
        );
        let work = match self.work.take() {
            Some(work) => work,
            None => panic!("context started without pending work"),
        };

        self.shared.state.set(State::Running);
        let mut launch = Launch {
            shared: &*self.shared,
            work: Some(work),
        };
        let outcome = unsafe {
            env::bootstrap(
                &self.shared.return_env,
                self.shared.id,
                &*self.stack,
                trampoline,
                &mut launch as *mut Launch<'_> as usize,
            )
        };
        self.complete(outcome)
    }

    /// Continues the suspended work at `env`, the environment it suspended to.
    ///
    /// Blocks until the work suspends again (returns `false`) or finishes (returns `true`).
    ///
    /// # Panics
    ///
    /// If the context isn't suspended, or `env` wasn't captured by this context's work or was
    /// already resumed.
    #[inline(always)]
    pub fn resume(&mut self, env: &Environment) -> bool {
        let state = self.state();
        assert_eq!(
            state,
            State::Suspended,
            "only a suspended context can be resumed"
        );
        assert!(
            env.is_armed() && env.owner() == self.shared.id,
            "environment doesn't hold a pending capture of this context"
        );

        self.shared.state.set(State::Running);
        let outcome = unsafe {
            env::switch(
                &self.shared.return_env,
                self.shared.id,
                env,
                Outcome::Suspended,
            )
        };
        self.complete(outcome)
    }

    /// [`resume`](Context::resume) at the environment of a handshake record.
    pub fn resume_point(&mut self, point: &SuspendPoint) -> bool {
        self.resume(point.environment())
    }

    fn complete(&mut self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Suspended => {
                debug_assert_eq!(self.state(), State::Suspended);
                false
            }
            Outcome::Finished => {
                self.shared.state.set(State::Finished);
                if let Some(panic) = self.shared.panic.take() {
                    resume_unwind(panic);
                }
                true
            }
        }
    }

    pub fn state(&self) -> State {
        self.shared.state.get()
    }

    /// Returns true if work was set, but not started yet.
    pub fn has_pending_work(&self) -> bool {
        self.work.is_some()
    }

    /// Usable stack size in bytes (the requested size rounded up to whole pages).
    pub fn stack_size(&self) -> usize {
        self.stack.size()
    }

    /// Returns true if a stack overflow is guaranteed to fault.
    pub fn has_guard_page(&self) -> bool {
        self.stack.has_guard_page()
    }

    /// The address execution starts at. Stacks grow downwards from here.
    pub fn stack_top(&self) -> *mut u8 {
        self.stack.top()
    }

    /// Bytes of stack the work was using when it suspended through `point`.
    ///
    /// Returns `None` if `point` never captured a suspend of this context.
    pub fn stack_in_use(&self, point: &SuspendPoint) -> Option<usize> {
        let sp = point.stack_pointer()?.as_ptr();
        if point.environment().owner() != self.shared.id || !self.stack.contains(sp) {
            return None;
        }
        Some(self.stack.top() as usize - sp as usize)
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("state", &self.state())
            .field("stack_size", &self.stack_size())
            .field("has_guard_page", &self.has_guard_page())
            .field("has_pending_work", &self.has_pending_work())
            .finish()
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        if self.state() == State::Suspended {
            // Pinned values on the paused frames can still be reachable from elsewhere, the
            // memory stays mapped.
            debug_assert!(
                std::thread::panicking(),
                "context dropped while suspended, the paused work is leaked without unwinding"
            );
            return;
        }
        unsafe { ManuallyDrop::drop(&mut self.stack) };
    }
}

// Entry point of every fresh stack. Runs the work and hands control back for good once it's done.
// Unwinding can't continue past this function, so a panic is caught here and resumed on the
// other side of the transfer.
unsafe extern "C" fn trampoline(payload: usize) -> ! {
    let launch = &mut *(payload as *mut Launch<'static>);
    let shared = &*launch.shared;
    let work = launch.work.take();
    // `launch` belongs to the frame of `start`, which is about to be continued by a suspend.

    if let Some(work) = work {
        let suspender = Suspender { shared };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| work(&suspender))) {
            shared.panic.set(Some(panic));
        }
    }

    env::restore(&shared.return_env, Outcome::Finished)
}

/// Handle passed to the work of a [`Context`] through which it suspends itself.
pub struct Suspender<'s> {
    shared: &'s Shared,
}

impl Suspender<'_> {
    /// Pauses the work and returns control to whoever started or resumed the context.
    ///
    /// The resume point is captured into `point`, the owner continues the work by passing the
    /// same record to [`Context::resume_point`]. This call returns once that happens.
    pub fn suspend(&self, point: &SuspendPoint) {
        self.suspend_to(point.environment());
    }

    /// Like [`suspend`](Suspender::suspend), but captures straight into `env`.
    #[inline(always)]
    pub fn suspend_to(&self, env: &Environment) {
        debug_assert_eq!(self.shared.state.get(), State::Running);
        self.shared.state.set(State::Suspended);
        let outcome = unsafe {
            env::switch(
                env,
                self.shared.id,
                &self.shared.return_env,
                Outcome::Suspended,
            )
        };
        debug_assert_eq!(outcome, Outcome::Suspended);
    }
}
