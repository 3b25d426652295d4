//! Saved control points and the transfers between them.
//!
//! An [`Environment`] holds everything needed to continue a flow of control that was switched
//! away from. Environments are single use: a transfer into one consumes it, and it only becomes
//! valid again once the next transfer away from some context captures into it.

use std::cell::Cell;
use std::fmt;
use std::ptr::{self, NonNull};

use guardstack::Stack;

use crate::arch;

/// The discriminator carried by every transfer. The side receiving control branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Somebody captured a point and handed control over, expecting to be continued.
    Suspended,
    /// The work on the context's stack returned, there is nothing left to continue.
    Finished,
}

impl Outcome {
    const SUSPENDED: usize = -1isize as usize;
    const FINISHED: usize = 1;

    fn into_raw(self) -> usize {
        match self {
            Outcome::Suspended => Self::SUSPENDED,
            Outcome::Finished => Self::FINISHED,
        }
    }

    fn from_raw(raw: usize) -> Self {
        match raw {
            Self::SUSPENDED => Outcome::Suspended,
            Self::FINISHED => Outcome::Finished,
            raw => panic!("corrupted transfer discriminator: {:#x}", raw),
        }
    }
}

/// A resume point captured when control left a context.
///
/// The environment itself only stores the stack pointer of the suspended side. The registers and
/// the address to continue at are kept on that stack, so the environment can be moved freely.
/// It's *armed* between the capture and the one transfer that is allowed to consume it.
pub struct Environment {
    sp: Cell<*mut usize>,
    armed: Cell<bool>,
    // Id of the context that captured into this environment, 0 if none did yet.
    owner: Cell<u64>,
}

impl Environment {
    pub const fn new() -> Self {
        Environment {
            sp: Cell::new(ptr::null_mut()),
            armed: Cell::new(false),
            owner: Cell::new(0),
        }
    }

    /// Returns true if the environment holds a capture that wasn't resumed yet.
    pub fn is_armed(&self) -> bool {
        self.armed.get()
    }

    /// Returns the stack pointer of the last capture, even if it was already consumed.
    pub fn stack_pointer(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.sp.get() as *mut u8)
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner.get()
    }

    // The transfer writes the stack pointer into the returned slot before control leaves, so by
    // the time anybody else can look at this environment the capture is complete.
    fn capture_slot(&self, owner: u64) -> *mut *mut usize {
        self.owner.set(owner);
        self.armed.set(true);
        self.sp.as_ptr()
    }

    fn consume(&self) -> *mut usize {
        assert!(
            self.armed.replace(false),
            "transfer into an environment without a pending capture"
        );
        self.sp.get()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("sp", &self.sp.get())
            .field("armed", &self.armed.get())
            .finish()
    }
}

/// Handshake record of a suspend/resume pair.
///
/// The suspending side captures its resume point into the record's environment and the resuming
/// side later passes the record (or its [`environment`](SuspendPoint::environment)) to
/// [`Context::resume`](crate::Context::resume). The record also keeps the stack pointer the work
/// was paused at, which tells an upstream scheduler how much of the stack is in use.
#[derive(Debug, Default)]
pub struct SuspendPoint {
    env: Environment,
}

impl SuspendPoint {
    pub const fn new() -> Self {
        SuspendPoint {
            env: Environment::new(),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Stack pointer recorded at the last suspend through this record.
    pub fn stack_pointer(&self) -> Option<NonNull<u8>> {
        self.env.stack_pointer()
    }
}

/// Captures the current point into `save` and continues at `target`.
///
/// Returns when somebody transfers into `save`, with the outcome they sent. `target` must have
/// been captured on a stack that is still alive.
pub(crate) unsafe fn switch(
    save: &Environment,
    owner: u64,
    target: &Environment,
    outcome: Outcome,
) -> Outcome {
    let target = target.consume();
    let raw = arch::transfer(save.capture_slot(owner), target, outcome.into_raw());
    Outcome::from_raw(raw)
}

/// Continues at `target` without capturing anything. Control never comes back.
pub(crate) unsafe fn restore(target: &Environment, outcome: Outcome) -> ! {
    let target = target.consume();
    arch::restore(target, outcome.into_raw())
}

/// Captures the current point into `save` and runs `entry(payload)` at the top of `stack`.
///
/// `entry` must never return and must not unwind.
pub(crate) unsafe fn bootstrap(
    save: &Environment,
    owner: u64,
    stack: &Stack,
    entry: arch::EntryFn,
    payload: usize,
) -> Outcome {
    let sp = arch::init(stack, entry);
    let raw = arch::transfer(save.capture_slot(owner), sp, payload);
    Outcome::from_raw(raw)
}
