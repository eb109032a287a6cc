//! Runtime error types.
//!
//! Recoverable failures (resource exhaustion, type errors raised by
//! language-level operations) are reported through `RuntimeError` and
//! propagate to the call chain's owner. Call-protocol violations —
//! out-of-bounds register access, return-transaction misuse — are
//! caller bugs and fail fast with assertions instead of appearing here.

use crate::value::{ArithOp, CmpOp, ValueKind};
use std::fmt;

/// An error raised to the owner of a call chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Register-stack growth exceeded the configured maximum.
    StackOverflow { requested: usize, limit: usize },
    /// A non-function value was invoked.
    NotCallable { kind: ValueKind },
    /// `resume` was invoked on a function with no resumption points.
    NotResumable,
    /// A dead (completed) coroutine was resumed.
    DeadCoroutine,
    /// Arithmetic on non-numeric operands.
    ArithType {
        op: ArithOp,
        lhs: ValueKind,
        rhs: ValueKind,
    },
    /// Ordering comparison on an unordered pair of kinds.
    CmpType {
        op: CmpOp,
        lhs: ValueKind,
        rhs: ValueKind,
    },
    /// Integer division or modulo by zero.
    DivideByZero,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::StackOverflow { requested, limit } => {
                write!(
                    f,
                    "register stack overflow: {} slots requested, limit is {}",
                    requested, limit
                )
            }
            RuntimeError::NotCallable { kind } => {
                write!(f, "attempt to call a {} value", kind)
            }
            RuntimeError::NotResumable => {
                write!(f, "attempt to resume a function with no resumption points")
            }
            RuntimeError::DeadCoroutine => write!(f, "cannot resume dead coroutine"),
            RuntimeError::ArithType { op, lhs, rhs } => {
                write!(
                    f,
                    "attempt to perform arithmetic ({}) on a {} and a {}",
                    op.symbol(),
                    lhs,
                    rhs
                )
            }
            RuntimeError::CmpType { op, lhs, rhs } => {
                write!(f, "attempt to compare ({}) {} with {}", op.symbol(), lhs, rhs)
            }
            RuntimeError::DivideByZero => write!(f, "attempt to perform 'n%0'"),
        }
    }
}

impl std::error::Error for RuntimeError {}
