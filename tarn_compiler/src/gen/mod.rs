//! Graph construction, slot propagation, and compilation units.
//!
//! One translation pass turns a prototype's instruction sequence into
//! a control-flow graph (one node per instruction, wired against
//! pre-allocated per-pc targets), runs the slot tracker forward from
//! the entry, and linearizes the result into the `(node, slots)`
//! emission stream an external code generator consumes.
//!
//! # Components
//!
//! - **Arena** (`arena.rs`): typed-id storage for the cyclic graph
//! - **Nodes** (`node.rs`): the closed node variants, target
//!   reference counting, traversal, linearization
//! - **Translator** (`translator.rs`): instruction-to-node wiring and
//!   slot propagation
//! - **Units** (`unit.rs`, `context.rs`): lazy generic forms,
//!   specializations, and the shared prototype-to-unit context

pub mod arena;
pub mod context;
pub mod node;
pub mod translator;
pub mod unit;

pub use arena::{Arena, Id};
pub use context::CompilationContext;
pub use node::{Graph, Node, NodeFlags, NodeId, NodeKind, NodeVisitor};
pub use translator::TranslationError;
pub use unit::{CompilationUnit, CompiledBody};
