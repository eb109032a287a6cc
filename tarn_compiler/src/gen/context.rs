//! The shared prototype-to-unit compilation context.
//!
//! Translation passes look callees up through an explicit, read-mostly
//! context rather than any ambient state: `type_of` answers the
//! declared function type of a prototype's generic form. Crucially it
//! answers even for a unit whose generic form has not been built yet —
//! the fully-dynamic signature — which breaks the circular dependency
//! between mutually-recursive source units.
//!
//! Prototypes are keyed by pointer identity: two structurally equal
//! prototypes loaded separately are distinct units.

use super::unit::CompilationUnit;
use super::translator::TranslationError;
use crate::prototype::Prototype;
use crate::types::FunctionType;
use rustc_hash::FxHashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Pointer-identity key for a shared prototype.
#[derive(Clone)]
struct ProtoKey(Arc<Prototype>);

impl PartialEq for ProtoKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ProtoKey {}

impl Hash for ProtoKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// Maps prototypes to their compilation units for one compiled
/// program.
pub struct CompilationContext {
    units: FxHashMap<ProtoKey, CompilationUnit>,
}

impl CompilationContext {
    pub fn new() -> Self {
        CompilationContext {
            units: FxHashMap::default(),
        }
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Register a unit for `proto` under `name`. The first
    /// registration wins; re-adding a known prototype is a no-op.
    pub fn add_unit(&mut self, proto: Arc<Prototype>, name: impl Into<String>) {
        self.units
            .entry(ProtoKey(proto.clone()))
            .or_insert_with(|| CompilationUnit::new(proto, name));
    }

    /// Register `root` and every prototype nested inside it,
    /// transitively. Nested units are named `parent/index`.
    pub fn collect_units(&mut self, root: &Arc<Prototype>, name: &str) {
        let mut pending: Vec<(Arc<Prototype>, String)> = vec![(root.clone(), name.to_string())];
        while let Some((proto, name)) = pending.pop() {
            for (i, nested) in proto.nested().iter().enumerate() {
                pending.push((nested.clone(), format!("{}/{}", name, i)));
            }
            self.add_unit(proto, name);
        }
    }

    /// The unit registered for `proto`, if any.
    pub fn unit(&self, proto: &Arc<Prototype>) -> Option<&CompilationUnit> {
        self.units.get(&ProtoKey(proto.clone()))
    }

    /// All registered units, in no particular order.
    pub fn units(&self) -> impl Iterator<Item = &CompilationUnit> {
        self.units.values()
    }

    /// The function type a call site may assume for `proto`: the
    /// generic form's declared type if the unit has one, the
    /// fully-dynamic signature otherwise. This is the lookup that lets
    /// a call site compile against a not-yet-emitted callee.
    pub fn type_of(&self, proto: &Arc<Prototype>) -> FunctionType {
        match self.unit(proto) {
            Some(unit) => unit.function_type(),
            None => {
                FunctionType::dynamic(proto.num_params() as usize, proto.is_vararg())
            }
        }
    }

    /// Build the generic form of every registered unit. Idempotent;
    /// aborts on the first failing unit.
    pub fn compile_all(&self) -> Result<(), TranslationError> {
        for unit in self.units.values() {
            unit.init_generic(self)?;
        }
        Ok(())
    }
}

impl Default for CompilationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompilationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationContext")
            .field("units", &self.units.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
