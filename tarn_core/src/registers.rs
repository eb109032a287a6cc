//! Frame representations and the transactional return target.
//!
//! Two frame representations share the `Registers` seam:
//!
//! - `StackView` — a window into the shared register stack, the normal
//!   case for a call chain
//! - `OwnedRegisters` — a private, fixed-capacity frame for call sites
//!   where chain sharing is undesirable or unavailable
//!
//! A `ReturnTarget` is the destination a callee commits results into.
//! The commit is transactional: `begin()` opens, `push(v)` stages each
//! result into the destination registers, and only `end()` moves the
//! destination's top. A reader keyed off the top can never observe a
//! return in progress.

use crate::error::RuntimeError;
use crate::stack::StackView;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::fmt;

// =============================================================================
// Registers Seam
// =============================================================================

/// Frame-relative register access shared by both frame representations.
pub trait Registers {
    /// Read register `i`.
    fn get(&self, i: usize) -> Value;
    /// Write register `i`.
    fn set(&self, i: usize, v: Value);
    /// The frame's live extent.
    fn top(&self) -> usize;
    /// Establish the frame's live extent.
    fn set_top(&self, n: usize) -> Result<(), RuntimeError>;
}

impl Registers for StackView<'_> {
    #[inline]
    fn get(&self, i: usize) -> Value {
        StackView::get(self, i)
    }

    #[inline]
    fn set(&self, i: usize, v: Value) {
        StackView::set(self, i, v);
    }

    #[inline]
    fn top(&self) -> usize {
        StackView::top(self)
    }

    #[inline]
    fn set_top(&self, n: usize) -> Result<(), RuntimeError> {
        StackView::set_top(self, n)
    }
}

// =============================================================================
// Owned Registers
// =============================================================================

/// A private, fixed-capacity frame.
///
/// Functionally equivalent to a `StackView` for `get`/`set`/`top`, but
/// the backing array is not shared with any call chain and cannot be
/// extended into a nested frame — there is no `from`.
pub struct OwnedRegisters {
    cells: RefCell<Box<[Value]>>,
    top: Cell<usize>,
}

impl OwnedRegisters {
    /// Allocate a frame with `capacity` registers, all nil.
    pub fn new(capacity: usize) -> Self {
        OwnedRegisters {
            cells: RefCell::new(vec![Value::Nil; capacity].into_boxed_slice()),
            top: Cell::new(0),
        }
    }

    /// The fixed capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cells.borrow().len()
    }

    /// Append a value at the top and raise the top by one.
    #[inline]
    pub fn push(&self, v: Value) {
        let t = self.top.get();
        self.cells.borrow_mut()[t] = v;
        self.top.set(t + 1);
    }

    /// A return target writing into this frame starting at register
    /// `offset`.
    #[inline]
    pub fn return_target_from(&self, offset: usize) -> ReturnTarget<'_> {
        ReturnTarget::new(Window::Owned { regs: self, base: offset })
    }
}

impl Registers for OwnedRegisters {
    #[inline]
    fn get(&self, i: usize) -> Value {
        self.cells.borrow()[i].clone()
    }

    #[inline]
    fn set(&self, i: usize, v: Value) {
        self.cells.borrow_mut()[i] = v;
    }

    #[inline]
    fn top(&self) -> usize {
        self.top.get()
    }

    /// A fixed-capacity frame cannot grow; exceeding the capacity is a
    /// programming error, not a recoverable condition.
    #[inline]
    fn set_top(&self, n: usize) -> Result<(), RuntimeError> {
        assert!(n <= self.capacity(), "owned frame extent exceeds capacity");
        self.top.set(n);
        Ok(())
    }
}

impl fmt::Debug for OwnedRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedRegisters")
            .field("top", &self.top.get())
            .field("capacity", &self.capacity())
            .finish()
    }
}

// =============================================================================
// Return Target
// =============================================================================

/// The destination window a return target writes into.
enum Window<'a> {
    Stack(StackView<'a>),
    Owned { regs: &'a OwnedRegisters, base: usize },
}

impl Window<'_> {
    #[inline]
    fn set(&self, i: usize, v: Value) {
        match self {
            Window::Stack(view) => view.set(i, v),
            Window::Owned { regs, base } => regs.set(base + i, v),
        }
    }

    #[inline]
    fn set_top(&self, n: usize) -> Result<(), RuntimeError> {
        match self {
            Window::Stack(view) => view.set_top(n),
            Window::Owned { regs, base } => regs.set_top(base + n),
        }
    }

    fn anchor(&self) -> Option<usize> {
        match self {
            Window::Stack(view) => Some(view.base()),
            Window::Owned { .. } => None,
        }
    }
}

/// A destination a callee commits results into.
///
/// Usage is strictly `begin()`, zero or more `push(v)`, `end()`. The
/// destination's top — the only thing a reader may trust — moves only
/// when `end()` commits. Leaving a transaction open across a frame
/// boundary (a return or a suspension) is a protocol violation and is
/// asserted against.
pub struct ReturnTarget<'a> {
    dest: Window<'a>,
    /// `Some(n)` while a transaction is open with `n` results staged.
    staged: Cell<Option<usize>>,
}

impl<'a> ReturnTarget<'a> {
    fn new(dest: Window<'a>) -> Self {
        ReturnTarget {
            dest,
            staged: Cell::new(None),
        }
    }

    /// A return target writing into the stack at `view`'s base.
    pub fn from_view(view: StackView<'a>) -> Self {
        ReturnTarget::new(Window::Stack(view))
    }

    /// Whether a transaction is open.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.staged.get().is_some()
    }

    /// The absolute stack offset results are committed to, when the
    /// destination is a shared-stack window. Used by suspension capture
    /// to record where a resumed frame's results will land.
    #[inline]
    pub fn anchor(&self) -> Option<usize> {
        self.dest.anchor()
    }

    /// Open a write transaction.
    #[inline]
    pub fn begin(&self) {
        assert!(!self.is_open(), "return transaction already open");
        self.staged.set(Some(0));
    }

    /// Stage the next result.
    #[inline]
    pub fn push(&self, v: Value) {
        let n = self.staged.get().expect("push outside return transaction");
        self.dest.set(n, v);
        self.staged.set(Some(n + 1));
    }

    /// Commit the staged results atomically by moving the destination's
    /// top. The transaction is consumed even if the commit fails; a
    /// failed commit leaves the previous top, so no partial result is
    /// ever observable.
    #[inline]
    pub fn end(&self) -> Result<(), RuntimeError> {
        let n = self.staged.take().expect("end outside return transaction");
        self.dest.set_top(n)?;
        Ok(())
    }
}

impl Drop for ReturnTarget<'_> {
    fn drop(&mut self) {
        // A transaction left open across a frame boundary is a
        // protocol violation by the callee. Skipped mid-panic so the
        // original failure stays visible.
        if !std::thread::panicking() {
            debug_assert!(!self.is_open(), "return transaction left open");
        }
    }
}

impl fmt::Debug for ReturnTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnTarget")
            .field("open", &self.is_open())
            .field("anchor", &self.anchor())
            .finish()
    }
}

impl<'s> StackView<'s> {
    /// A return target writing into this frame starting at register
    /// `offset`.
    #[inline]
    pub fn return_target_from(&self, offset: usize) -> ReturnTarget<'s> {
        ReturnTarget::from_view(self.from(offset))
    }
}

// =============================================================================
// Tests
// =============================================================================
