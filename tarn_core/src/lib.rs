//! Runtime kernel for the Tarn scripting language.
//!
//! Tarn executes compiled function bodies on a shared, growable register
//! stack instead of one native call frame per call. This crate provides
//! the pieces a call chain is made of:
//!
//! - **Values** (`value`): the dynamically-typed value model and the
//!   numeric coercion rules
//! - **Register stack** (`stack`): the shared value store and the
//!   zero-copy frame views into it
//! - **Frames** (`registers`): the `Registers` seam, fixed-capacity
//!   owned frames, and the transactional return target
//! - **Call protocol** (`call`): the `Func` trait, tail-call
//!   trampoline, and suspension capture
//! - **Coroutines** (`coroutine`): cooperative suspend/resume over one
//!   register stack
//!
//! A register stack is owned by exactly one call chain and is not
//! thread-safe by design; the interior-mutability types enforce this
//! at compile time (`RegisterStack` is `!Sync`).
#![deny(unsafe_op_in_unsafe_fn)]

pub mod call;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod registers;
pub mod stack;
pub mod value;

pub use call::{dispatch, Control, Flow, Func, ResumeFrame, ResumePoint, Suspension};
pub use config::StackConfig;
pub use coroutine::{CoStatus, CoYield, Coroutine};
pub use error::RuntimeError;
pub use registers::{OwnedRegisters, Registers, ReturnTarget};
pub use stack::{RegisterStack, StackView};
pub use value::{arith, compare, ArithOp, CmpOp, Value, ValueKind};
