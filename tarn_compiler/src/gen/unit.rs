//! Compilation units and compiled forms.
//!
//! A `CompilationUnit` pairs one prototype with its lazily-built
//! generic (all-dynamic) compiled form and any specialized forms
//! requested on demand. The generic form is an explicit cached-result
//! slot with an initialize-once contract; it is deliberately `!Sync` —
//! sharing a unit across concurrent compilation requests requires
//! external serialization.
//!
//! A `CompiledBody` is the product of one translation pass: the graph,
//! the entry labeled by the parameter signature (so specializations of
//! one prototype stay distinguishable), the return signature, the
//! resumption points, and the linearized `(node, slots)` emission
//! stream the external backend consumes.

use super::context::CompilationContext;
use super::node::{Graph, NodeId, NodeKind};
use super::translator::{translate, TranslationError};
use crate::prototype::Prototype;
use crate::types::{FunctionType, Slots, TypeSeq};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

// =============================================================================
// Compiled Body
// =============================================================================

/// One compiled form of a prototype.
pub struct CompiledBody {
    params: TypeSeq,
    returns: TypeSeq,
    entry: NodeId,
    graph: Graph,
    resume_points: FxHashSet<NodeId>,
    emission: Vec<(NodeId, Slots)>,
}

impl CompiledBody {
    #[inline]
    pub fn params(&self) -> &TypeSeq {
        &self.params
    }

    #[inline]
    pub fn returns(&self) -> &TypeSeq {
        &self.returns
    }

    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    #[inline]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Targets at which a suspended frame re-enters, a distinguished
    /// subset of the graph's target nodes.
    #[inline]
    pub fn resume_points(&self) -> &FxHashSet<NodeId> {
        &self.resume_points
    }

    /// The linear `(node, slots)` stream handed to the backend: nodes
    /// in a valid topological order, each paired with its output row.
    #[inline]
    pub fn emission(&self) -> &[(NodeId, Slots)] {
        &self.emission
    }

    /// The signature this form exposes at call sites.
    pub fn function_type(&self) -> FunctionType {
        FunctionType {
            params: self.params.clone(),
            returns: self.returns.clone(),
        }
    }
}

impl fmt::Debug for CompiledBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledBody")
            .field("params", &self.params.to_string())
            .field("nodes", &self.graph.len())
            .field("resume_points", &self.resume_points.len())
            .finish()
    }
}

// =============================================================================
// Compilation Unit
// =============================================================================

/// One prototype paired with its compiled forms: zero-or-one generic
/// form and zero-or-more cached specializations.
pub struct CompilationUnit {
    prototype: Arc<Prototype>,
    name: String,
    /// Initialize-once cache for the generic form. `OnceCell` keeps
    /// this `!Sync` on purpose: compilation is single-threaded per
    /// unit.
    generic: OnceCell<CompiledBody>,
    /// Specialized forms by parameter signature; never recomputed once
    /// present.
    specialized: RefCell<FxHashMap<TypeSeq, Rc<CompiledBody>>>,
}

impl CompilationUnit {
    pub fn new(prototype: Arc<Prototype>, name: impl Into<String>) -> Self {
        CompilationUnit {
            prototype,
            name: name.into(),
            generic: OnceCell::new(),
            specialized: RefCell::new(FxHashMap::default()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn prototype(&self) -> &Arc<Prototype> {
        &self.prototype
    }

    /// The generic form, if `init_generic` has run.
    #[inline]
    pub fn generic(&self) -> Option<&CompiledBody> {
        self.generic.get()
    }

    /// The all-dynamic parameter signature matching the prototype's
    /// declared arity and vararg flag.
    pub fn generic_parameters(&self) -> TypeSeq {
        TypeSeq::dynamic(self.prototype.num_params() as usize, self.prototype.is_vararg())
    }

    /// Build and cache the generic compiled form. Idempotent: the
    /// first successful build wins and later calls return it.
    pub fn init_generic(
        &self,
        ctx: &CompilationContext,
    ) -> Result<&CompiledBody, TranslationError> {
        if let Some(body) = self.generic.get() {
            return Ok(body);
        }
        let body = self.make_compiled_form(ctx, self.generic_parameters())?;
        // A racing in-between init is impossible (!Sync), but a
        // reentrant one through ctx would be a bug; first value wins.
        Ok(self.generic.get_or_init(|| body))
    }

    /// The specialized form for `params`, building it on first request
    /// and answering from the cache afterwards.
    pub fn specialized_form(
        &self,
        ctx: &CompilationContext,
        params: &TypeSeq,
    ) -> Result<Rc<CompiledBody>, TranslationError> {
        if let Some(body) = self.specialized.borrow().get(params) {
            return Ok(body.clone());
        }
        let body = Rc::new(self.make_compiled_form(ctx, params.clone())?);
        self.specialized
            .borrow_mut()
            .insert(params.clone(), body.clone());
        Ok(body)
    }

    /// One full translation pass against the given incoming signature,
    /// producing a fresh graph, slot rows, resumption points, and the
    /// linearized emission stream.
    pub fn make_compiled_form(
        &self,
        ctx: &CompilationContext,
        params: TypeSeq,
    ) -> Result<CompiledBody, TranslationError> {
        let label = format!("{}_{}", self.name, params);
        let mut t = translate(&self.prototype, ctx, &params, &label)?;

        let order = t.graph.linearize();
        let nregs = self.prototype.max_stack_size() as usize;
        let emission = emit(&t.graph, &order, nregs);

        Ok(CompiledBody {
            params,
            returns: TypeSeq::vararg_dynamic(),
            entry: t.entry,
            graph: t.graph,
            resume_points: t.resume_points,
            emission,
        })
    }

    /// The unit's callable signature: the generic form's if built, the
    /// fully-dynamic one otherwise.
    pub fn function_type(&self) -> FunctionType {
        match self.generic.get() {
            Some(body) => body.function_type(),
            None => FunctionType::dynamic(
                self.prototype.num_params() as usize,
                self.prototype.is_vararg(),
            ),
        }
    }
}

impl fmt::Debug for CompilationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationUnit")
            .field("name", &self.name)
            .field("generic", &self.generic.get().is_some())
            .finish()
    }
}

/// Pair each node of the linearized order with its output row — the
/// node's effect is already reflected in it. Targets carry their
/// sealed merge row; jumps synthesized during linearization inherit
/// the running row of the node they follow.
fn emit(graph: &Graph, order: &[NodeId], nregs: usize) -> Vec<(NodeId, Slots)> {
    let mut out = Vec::with_capacity(order.len());
    let mut last: Option<Slots> = None;

    for &id in order {
        let row = match &graph.node(id).kind {
            NodeKind::Target { .. } => graph.target_slots(id).clone(),
            _ => graph
                .node(id)
                .out_slots
                .clone()
                .or_else(|| last.clone())
                .unwrap_or_else(|| Slots::dead(nregs)),
        };
        out.push((id, row.clone()));
        last = Some(row);
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
