//! Cooperative coroutines over one register stack.
//!
//! A coroutine owns a register stack for the lifetime of its call
//! chain. Suspension is an explicit return to the resumer carrying the
//! chain of resumption frames; resuming re-enters those frames
//! innermost-first with the same, still-live stack. Nothing is
//! serialized: yield and resume values travel through an agreed window
//! of stack registers recorded in the suspension.
//!
//! There is no cancellation primitive — abandoning a suspended
//! coroutine is simply never resuming it, after which its stack is
//! reclaimed with the coroutine.

use crate::call::{dispatch, Flow, Func, Suspension};
use crate::config::StackConfig;
use crate::error::RuntimeError;
use crate::stack::RegisterStack;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Coroutine
// =============================================================================

/// Lifecycle of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoStatus {
    /// Not yet started, or parked at a resumption point.
    Suspended,
    /// Currently executing inside `resume`.
    Running,
    /// Completed or failed; cannot be resumed again.
    Dead,
}

/// What a `resume` produced.
#[derive(Debug, PartialEq)]
pub enum CoYield {
    /// The chain suspended, yielding these values.
    Yield(Vec<Value>),
    /// The root frame returned these results; the coroutine is dead.
    Return(Vec<Value>),
}

/// A suspendable call chain with its own register stack.
pub struct Coroutine {
    stack: RegisterStack,
    root: Arc<dyn Func>,
    status: Cell<CoStatus>,
    pending: RefCell<Option<Suspension>>,
}

impl Coroutine {
    /// Create a coroutine that will run `root` on a fresh stack.
    pub fn new(root: Arc<dyn Func>, config: &StackConfig) -> Self {
        Coroutine {
            stack: RegisterStack::new(config),
            root,
            status: Cell::new(CoStatus::Suspended),
            pending: RefCell::new(None),
        }
    }

    /// Current lifecycle state.
    #[inline]
    pub fn status(&self) -> CoStatus {
        self.status.get()
    }

    /// The chain's register stack. Exposed for the chain's owner;
    /// mutating it while the coroutine is suspended is a protocol
    /// violation.
    #[inline]
    pub fn stack(&self) -> &RegisterStack {
        &self.stack
    }

    /// Start or continue the chain, delivering `args` to it.
    ///
    /// On first resume the arguments become the root frame's
    /// registers. On later resumes they are written into the window
    /// the suspended chain yielded from.
    ///
    /// # Panics
    ///
    /// Panics if called while the coroutine is already running — that
    /// is a reentrancy bug in the host, not a language-level error.
    pub fn resume(&self, args: &[Value]) -> Result<CoYield, RuntimeError> {
        match self.status.get() {
            CoStatus::Dead => return Err(RuntimeError::DeadCoroutine),
            CoStatus::Running => panic!("coroutine is already running"),
            CoStatus::Suspended => {}
        }
        self.status.set(CoStatus::Running);

        let outcome = self.run(args);
        match &outcome {
            Ok(CoYield::Yield(_)) => self.status.set(CoStatus::Suspended),
            Ok(CoYield::Return(_)) | Err(_) => self.status.set(CoStatus::Dead),
        }
        outcome
    }

    fn run(&self, args: &[Value]) -> Result<CoYield, RuntimeError> {
        let pending = self.pending.borrow_mut().take();
        let flow = match pending {
            None => {
                // First entry: the arguments are the root frame.
                self.stack.ensure(args.len())?;
                for (i, v) in args.iter().enumerate() {
                    self.stack.set(i, v.clone());
                }
                self.stack.set_top(args.len())?;
                dispatch::call(&self.stack, &self.root, 0, 0)?
            }
            Some(mut suspension) => {
                // Deliver the resume values into the yield window.
                let (base, _) = suspension.values_window();
                self.stack.ensure(base + args.len())?;
                for (i, v) in args.iter().enumerate() {
                    self.stack.set(base + i, v.clone());
                }
                self.stack.set_top(base + args.len())?;
                self.drive(suspension.take_chain())?
            }
        };

        match flow {
            Flow::Done => {
                let results = (0..self.stack.top()).map(|i| self.stack.get(i)).collect();
                Ok(CoYield::Return(results))
            }
            Flow::Suspended(suspension) => {
                let (base, len) = suspension.values_window();
                let values = (base..base + len).map(|i| self.stack.get(i)).collect();
                *self.pending.borrow_mut() = Some(suspension);
                Ok(CoYield::Yield(values))
            }
        }
    }

    /// Re-enter the suspended frames innermost-first. A frame that
    /// returns hands control to the next saved frame, which continues
    /// just past its call site; a frame that suspends again inherits
    /// the not-yet-resumed remainder of the chain.
    fn drive(&self, chain: Vec<crate::call::ResumeFrame>) -> Result<Flow, RuntimeError> {
        for (idx, frame) in chain.iter().enumerate() {
            match dispatch::resume_frame(&self.stack, frame)? {
                Flow::Done => continue,
                Flow::Suspended(mut inner) => {
                    inner.extend_chain(&chain[idx + 1..]);
                    return Ok(Flow::Suspended(inner));
                }
            }
        }
        Ok(Flow::Done)
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("status", &self.status.get())
            .field("stack", &self.stack)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
