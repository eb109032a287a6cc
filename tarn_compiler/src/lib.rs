//! Compiler core for the Tarn scripting language.
//!
//! This crate turns immutable source units (`Prototype`) into compiled
//! forms an external code generator can emit from:
//!
//! - **Instructions** (`instr`): the register ISA the front end hands us
//! - **Prototypes** (`prototype`): immutable compiled function bodies
//!   with constants, nested units, and debug tables
//! - **Types** (`types`): the per-register static type lattice, slot
//!   rows with liveness, and type signatures
//! - **Graph construction and analysis** (`gen`): one control-flow node
//!   per instruction, slot propagation with least-upper-bound joins at
//!   merge targets, topological linearization, and the compilation-unit
//!   orchestration with lazy generic forms and on-demand
//!   specializations
//!
//! Compilation is single-threaded per compilation unit and not
//! reentrant; sharing a unit across threads requires external
//! serialization (the cached-form slot is deliberately `!Sync`).

pub mod gen;
pub mod instr;
pub mod prototype;
pub mod types;

pub use gen::context::CompilationContext;
pub use gen::node::{Graph, Node, NodeFlags, NodeId, NodeKind, NodeVisitor};
pub use gen::translator::TranslationError;
pub use gen::unit::{CompilationUnit, CompiledBody};
pub use instr::Instr;
pub use prototype::{LocalVariable, Prototype, PrototypeBuilder, PrototypeError, UpvalueDesc};
pub use types::{arith_result, FunctionType, Slot, SlotType, Slots, TypeSeq};
