//! Shared register stack and zero-copy frame views.
//!
//! One `RegisterStack` backs an entire call chain (one top-level
//! invocation or one coroutine). Nested calls do not copy arguments:
//! the caller writes them into the tail of its own live registers and
//! anchors the callee's `StackView` one frame higher with `from`.
//!
//! # Contract
//!
//! - `get`/`set` bounds are the caller's responsibility: a callee
//!   trusts that the caller established a valid extent with `set_top`
//!   before invoking it. Out-of-range access is a programming error
//!   and fails fast.
//! - `set_top` is the growth point: raising the top beyond the current
//!   capacity reallocates (at least doubling), preserving every value
//!   below the old top, up to the configured maximum.
//! - A stack is exclusively owned by one chain. The interior-mutability
//!   cells make the type `!Sync`, so cross-thread sharing is rejected
//!   at compile time.
//!
//! Views index through the stack handle on every access, so a view held
//! across a growth event keeps reading the live backing store; callers
//! should still re-derive views after growth where the base itself may
//! have been invalidated by frame management.

use crate::config::StackConfig;
use crate::error::RuntimeError;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::fmt;

// =============================================================================
// Register Stack
// =============================================================================

/// A growable, dynamically-typed value store backing one call chain.
pub struct RegisterStack {
    /// Backing slots. The vector's length is the stack's capacity;
    /// slots above `top` hold stale values that callers must not read.
    cells: RefCell<Vec<Value>>,
    /// Logical top: one past the highest register the chain has
    /// established with `set_top`.
    top: Cell<usize>,
    /// Hard growth limit in slots.
    max_size: usize,
}

impl RegisterStack {
    /// Create a stack with the given configuration.
    pub fn new(config: &StackConfig) -> Self {
        let capacity = config.initial_capacity.min(config.max_size);
        RegisterStack {
            cells: RefCell::new(vec![Value::Nil; capacity]),
            top: Cell::new(0),
            max_size: config.max_size,
        }
    }

    /// Current capacity in slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cells.borrow().len()
    }

    /// The configured growth limit.
    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Absolute logical top.
    #[inline]
    pub fn top(&self) -> usize {
        self.top.get()
    }

    /// Set the absolute logical top, growing the backing store if the
    /// new extent exceeds the current capacity.
    #[inline]
    pub fn set_top(&self, n: usize) -> Result<(), RuntimeError> {
        self.ensure(n)?;
        self.top.set(n);
        Ok(())
    }

    /// Grow the backing store to hold at least `n` slots.
    ///
    /// Reallocates to `max(2 * capacity, n)` (clamped to the limit) and
    /// copies all live values; every register below the old top keeps
    /// its value.
    pub fn ensure(&self, n: usize) -> Result<(), RuntimeError> {
        let mut cells = self.cells.borrow_mut();
        if n <= cells.len() {
            return Ok(());
        }
        if n > self.max_size {
            return Err(RuntimeError::StackOverflow {
                requested: n,
                limit: self.max_size,
            });
        }
        let grown = (cells.len().saturating_mul(2)).max(n).min(self.max_size);
        cells.resize(grown, Value::Nil);
        Ok(())
    }

    /// Read the register at absolute index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is outside the stack's capacity; bounds are the
    /// caller's responsibility.
    #[inline]
    pub fn get(&self, i: usize) -> Value {
        self.cells.borrow()[i].clone()
    }

    /// Write the register at absolute index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is outside the stack's capacity.
    #[inline]
    pub fn set(&self, i: usize, v: Value) {
        self.cells.borrow_mut()[i] = v;
    }

    /// A view anchored at absolute offset `base`.
    #[inline]
    pub fn view(&self, base: usize) -> StackView<'_> {
        StackView { stack: self, base }
    }

    /// The view anchored at the bottom of the stack.
    #[inline]
    pub fn root_view(&self) -> StackView<'_> {
        self.view(0)
    }
}

impl fmt::Debug for RegisterStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterStack")
            .field("top", &self.top.get())
            .field("capacity", &self.capacity())
            .field("max_size", &self.max_size)
            .finish()
    }
}

// =============================================================================
// Frame View
// =============================================================================

/// A zero-copy window into a `RegisterStack`, anchored at a base
/// offset. All indices are view-relative. Multiple views may alias the
/// same stack at different bases; deriving one is free.
#[derive(Clone, Copy)]
pub struct StackView<'s> {
    stack: &'s RegisterStack,
    base: usize,
}

impl<'s> StackView<'s> {
    /// The absolute base offset of this view.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// The stack this view is anchored in.
    #[inline]
    pub fn stack(&self) -> &'s RegisterStack {
        self.stack
    }

    /// Read register `i` of this frame.
    #[inline]
    pub fn get(&self, i: usize) -> Value {
        self.stack.get(self.base + i)
    }

    /// Write register `i` of this frame.
    #[inline]
    pub fn set(&self, i: usize, v: Value) {
        self.stack.set(self.base + i, v);
    }

    /// The frame-relative top.
    ///
    /// Reading the top before the caller has established it with
    /// `set_top` is a programming error and fails fast.
    #[inline]
    pub fn top(&self) -> usize {
        let t = self.stack.top();
        assert!(t >= self.base, "stack top below frame base");
        t - self.base
    }

    /// Establish the frame's extent: `n` registers are live from the
    /// base. Grows the stack on demand.
    #[inline]
    pub fn set_top(&self, n: usize) -> Result<(), RuntimeError> {
        self.stack.set_top(self.base + n)
    }

    /// Derive a sub-view starting `k` slots into this view. This is how
    /// a nested call's argument area is set up without copying.
    #[inline]
    pub fn from(&self, k: usize) -> StackView<'s> {
        StackView {
            stack: self.stack,
            base: self.base + k,
        }
    }
}

impl fmt::Debug for StackView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackView").field("base", &self.base).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_stack() -> RegisterStack {
        RegisterStack::new(&StackConfig {
            initial_capacity: 4,
            max_size: 64,
        })
    }

    #[test]
    fn test_get_set_roundtrip() {
        let stack = small_stack();
        stack.set(0, Value::Int(7));
        stack.set(3, Value::str("x"));
        assert_eq!(stack.get(0), Value::Int(7));
        assert_eq!(stack.get(3), Value::str("x"));
    }

    #[test]
    fn test_growth_preserves_values_below_old_top() {
        let stack = small_stack();
        stack.set_top(4).unwrap();
        for i in 0..4 {
            stack.set(i, Value::Int(i as i64 * 10));
        }

        // Force a reallocation well past the current capacity.
        stack.set_top(33).unwrap();
        assert!(stack.capacity() >= 33);
        for i in 0..4 {
            assert_eq!(stack.get(i), Value::Int(i as i64 * 10));
        }
    }

    #[test]
    fn test_growth_at_least_doubles() {
        let stack = small_stack();
        stack.set_top(5).unwrap();
        assert!(stack.capacity() >= 8);
    }

    #[test]
    fn test_growth_beyond_limit_fails() {
        let stack = small_stack();
        let err = stack.set_top(65).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::StackOverflow {
                requested: 65,
                limit: 64
            }
        );
        // The failed growth left the stack untouched.
        assert_eq!(stack.top(), 0);
        assert_eq!(stack.capacity(), 4);
    }

    #[test]
    fn test_views_are_base_relative() {
        let stack = small_stack();
        stack.set_top(4).unwrap();
        let root = stack.root_view();
        root.set(2, Value::Int(42));

        let inner = root.from(2);
        assert_eq!(inner.base(), 2);
        assert_eq!(inner.get(0), Value::Int(42));
        assert_eq!(inner.top(), 2);

        inner.set(0, Value::Int(1));
        assert_eq!(root.get(2), Value::Int(1));
    }

    #[test]
    fn test_view_survives_growth() {
        let stack = small_stack();
        let root = stack.root_view();
        root.set_top(2).unwrap();
        root.set(0, Value::Int(5));
        root.set_top(40).unwrap();
        assert_eq!(root.get(0), Value::Int(5));
    }

    #[test]
    #[should_panic(expected = "stack top below frame base")]
    fn test_top_below_base_fails_fast() {
        let stack = small_stack();
        stack.set_top(1).unwrap();
        let v = stack.view(3);
        let _ = v.top();
    }

    #[test]
    #[should_panic]
    fn test_out_of_capacity_access_fails_fast() {
        let stack = small_stack();
        let _ = stack.get(100);
    }
}
