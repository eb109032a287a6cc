//! Instruction-to-node translation and slot propagation.
//!
//! Translation pre-allocates one target per pc, then translates each
//! instruction into one node wired against those targets: plain
//! instructions fall through to the next pc's target, jumps and
//! branches wire explicit edges, returns and tail calls terminate.
//! A jump destination outside the code — or falling through past the
//! last instruction — is a dangling edge and aborts the pass with no
//! partial output.
//!
//! Back-edges (destination pc at or before the current pc) are
//! detected at wiring time. Each one immediately reports an
//! all-dynamic row to its target: an edge from a point lacking
//! information contributes `Dynamic`, which is what lets loop headers
//! finalize after their forward edges alone.
//!
//! Propagation then walks forward from the entry. A non-merge node's
//! output row is a pure function of its input row; a target seals once
//! its expected reports have arrived, and its joined row flows on to
//! the node at its pc.

use super::context::CompilationContext;
use super::node::{Graph, NodeFlags, NodeId, NodeKind};
use crate::instr::Instr;
use crate::prototype::Prototype;
use crate::types::{arith_result, SlotType, Slots, TypeSeq};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Errors
// =============================================================================

/// Fatal translation error: the specialization is aborted and nothing
/// is exposed to the code generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    /// The requested parameter signature does not fit the prototype.
    ParamCountMismatch { expected: usize, found: usize },
    /// A control edge leads outside the translated code.
    DanglingJump { pc: u32, to: u32 },
    /// The body has no instructions at all.
    EmptyBody,
    /// An instruction references a missing constant-pool entry.
    BadConstant { pc: u32, index: u16 },
    /// A closure instruction references a missing nested prototype.
    BadClosure { pc: u32, index: u16 },
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationError::ParamCountMismatch { expected, found } => {
                write!(
                    f,
                    "parameter signature of arity {} does not match declared arity {}",
                    found, expected
                )
            }
            TranslationError::DanglingJump { pc, to } => {
                write!(f, "dangling control edge at pc {} to {}", pc, to)
            }
            TranslationError::EmptyBody => write!(f, "function body has no instructions"),
            TranslationError::BadConstant { pc, index } => {
                write!(f, "pc {} references missing constant k{}", pc, index)
            }
            TranslationError::BadClosure { pc, index } => {
                write!(f, "pc {} references missing nested prototype p{}", pc, index)
            }
        }
    }
}

impl std::error::Error for TranslationError {}

// =============================================================================
// Translation
// =============================================================================

/// The product of one translation pass.
#[derive(Debug)]
pub(crate) struct Translation {
    pub graph: Graph,
    pub entry: NodeId,
    /// Targets at which a suspended frame re-enters.
    pub resume_points: FxHashSet<NodeId>,
}

/// Translate a prototype against an incoming parameter signature.
pub(crate) fn translate(
    proto: &Prototype,
    ctx: &CompilationContext,
    params: &TypeSeq,
    label: &str,
) -> Result<Translation, TranslationError> {
    if params.arity() != proto.num_params() as usize || params.is_vararg() != proto.is_vararg() {
        return Err(TranslationError::ParamCountMismatch {
            expected: proto.num_params() as usize,
            found: params.arity(),
        });
    }
    let code = proto.code();
    if code.is_empty() {
        return Err(TranslationError::EmptyBody);
    }
    let len = code.len() as u32;
    let nregs = proto.max_stack_size() as usize;

    let mut graph = Graph::new();
    let targets: Vec<NodeId> = (0..len).map(|pc| graph.add_target(pc)).collect();
    let mut resume_points = FxHashSet::default();

    for (pc, instr) in code.iter().enumerate() {
        let pc = pc as u32;
        let node = match *instr {
            Instr::Jmp { to } => {
                let t = target_at(&targets, len, pc, to)?;
                let j = graph.add_jump(t);
                if to <= pc {
                    graph.node_mut(j).flags.insert(NodeFlags::BACK_EDGE);
                    graph.record_report(t, &Slots::all_dynamic(nregs));
                }
                j
            }
            Instr::Br {
                on_true, on_false, ..
            } => {
                let tt = target_at(&targets, len, pc, on_true)?;
                let tf = target_at(&targets, len, pc, on_false)?;
                let b = graph.add_branch(*instr, pc, tt, tf);
                if on_true <= pc {
                    graph.node_mut(b).flags.insert(NodeFlags::BACK_TRUE);
                    graph.record_report(tt, &Slots::all_dynamic(nregs));
                }
                if on_false <= pc {
                    graph.node_mut(b).flags.insert(NodeFlags::BACK_FALSE);
                    graph.record_report(tf, &Slots::all_dynamic(nregs));
                }
                b
            }
            Instr::Ret { .. } | Instr::TailCall { .. } => graph.add_exit(*instr, pc),
            _ => {
                let t = target_at(&targets, len, pc, pc + 1)?;
                let n = graph.add_linear(*instr, pc, t);
                if matches!(instr, Instr::Yield { .. }) {
                    graph.node_mut(t).flags.insert(NodeFlags::RESUME_POINT);
                    resume_points.insert(t);
                }
                n
            }
        };
        graph.set_target_next(targets[pc as usize], node);
    }

    let entry = graph.add_entry(label, targets[0]);
    propagate(&mut graph, proto, ctx, params, nregs)?;

    Ok(Translation {
        graph,
        entry,
        resume_points,
    })
}

fn target_at(
    targets: &[NodeId],
    len: u32,
    pc: u32,
    to: u32,
) -> Result<NodeId, TranslationError> {
    if to >= len {
        Err(TranslationError::DanglingJump { pc, to })
    } else {
        Ok(targets[to as usize])
    }
}

// =============================================================================
// Propagation
// =============================================================================

fn propagate(
    graph: &mut Graph,
    proto: &Prototype,
    ctx: &CompilationContext,
    params: &TypeSeq,
    nregs: usize,
) -> Result<(), TranslationError> {
    // Expected report counts over reachable predecessors. The wired
    // reference counts stay the structural bookkeeping; an edge from
    // dead code must not hold a live merge hostage.
    let reachable = graph.reachable();
    let mut expected: FxHashMap<NodeId, u32> = FxHashMap::default();
    for &id in &reachable {
        for succ in graph.successors(id) {
            if graph.node(succ).is_target() {
                *expected.entry(succ).or_insert(0) += 1;
            }
        }
    }

    let mut work: Vec<(NodeId, Slots)> = Vec::new();

    let entry_row = Slots::entry(params, nregs);
    let first = match &graph.node(graph.entry).kind {
        NodeKind::Entry { next, .. } => *next,
        _ => unreachable!("graph entry is not an entry node"),
    };
    graph.node_mut(graph.entry).out_slots = Some(entry_row.clone());
    deliver(graph, &expected, &mut work, first, entry_row);

    while let Some((id, in_row)) = work.pop() {
        let out = node_effect(graph, id, &in_row, proto, ctx)?;
        let flags = graph.node(id).flags;
        enum Succ {
            None,
            One(NodeId),
            Two(Option<NodeId>, Option<NodeId>),
        }
        let succ = match &graph.node(id).kind {
            NodeKind::Linear { next, .. } => Succ::One(*next),
            NodeKind::Jump { target } => {
                // A back-edge already reported its dynamic row at
                // wiring time.
                if flags.contains(NodeFlags::BACK_EDGE) {
                    Succ::None
                } else {
                    Succ::One(*target)
                }
            }
            NodeKind::Branch {
                on_true, on_false, ..
            } => Succ::Two(
                (!flags.contains(NodeFlags::BACK_TRUE)).then_some(*on_true),
                (!flags.contains(NodeFlags::BACK_FALSE)).then_some(*on_false),
            ),
            NodeKind::Exit { .. } => Succ::None,
            NodeKind::Entry { .. } | NodeKind::Target { .. } => {
                unreachable!("entry and target nodes are not worklist items")
            }
        };
        let node = graph.node_mut(id);
        node.in_slots = Some(in_row);
        node.out_slots = Some(out.clone());

        match succ {
            Succ::None => {}
            Succ::One(t) => deliver(graph, &expected, &mut work, t, out),
            Succ::Two(a, b) => {
                if let Some(t) = a {
                    deliver(graph, &expected, &mut work, t, out.clone());
                }
                if let Some(t) = b {
                    deliver(graph, &expected, &mut work, t, out);
                }
            }
        }
    }
    Ok(())
}

/// Join one predecessor's row into a target; once the expected number
/// of reports has arrived, seal it and queue the node at its pc.
fn deliver(
    graph: &mut Graph,
    expected: &FxHashMap<NodeId, u32>,
    work: &mut Vec<(NodeId, Slots)>,
    target: NodeId,
    row: Slots,
) {
    graph.record_report(target, &row);
    let need = expected.get(&target).copied().unwrap_or(0);
    if graph.reported_count(target) >= need && graph.seal_target(target) {
        if let NodeKind::Target { next: Some(n), .. } = graph.node(target).kind {
            work.push((n, graph.target_slots(target).clone()));
        }
    }
}

// =============================================================================
// Effects
// =============================================================================

/// A node's output row as a pure function of its input row.
fn node_effect(
    graph: &Graph,
    id: NodeId,
    in_row: &Slots,
    proto: &Prototype,
    ctx: &CompilationContext,
) -> Result<Slots, TranslationError> {
    match &graph.node(id).kind {
        NodeKind::Linear { instr, pc, .. } => instr_effect(*instr, *pc, in_row.clone(), proto, ctx),
        // Control transfers and exits pass their row through unchanged.
        NodeKind::Jump { .. } | NodeKind::Branch { .. } | NodeKind::Exit { .. } => {
            Ok(in_row.clone())
        }
        NodeKind::Entry { .. } | NodeKind::Target { .. } => {
            unreachable!("entry and target nodes have no local effect")
        }
    }
}

fn instr_effect(
    instr: Instr,
    pc: u32,
    mut row: Slots,
    proto: &Prototype,
    ctx: &CompilationContext,
) -> Result<Slots, TranslationError> {
    match instr {
        Instr::LoadK { dst, k } => {
            let c = proto
                .constant(k)
                .ok_or(TranslationError::BadConstant { pc, index: k })?;
            row.set(dst as usize, SlotType::of_constant(c));
        }
        Instr::LoadBool { dst, .. } => row.set(dst as usize, SlotType::Boolean),
        Instr::LoadNil { dst } => row.set(dst as usize, SlotType::Nil),
        Instr::Move { dst, src } => row.copy(dst as usize, src as usize),
        Instr::Arith { op, dst, lhs, rhs } => {
            let ty = arith_result(op, row.ty(lhs as usize), row.ty(rhs as usize));
            row.set(dst as usize, ty);
        }
        Instr::Cmp { dst, .. } => row.set(dst as usize, SlotType::Boolean),
        Instr::Closure { dst, proto: index } => {
            let nested = proto
                .nested_proto(index)
                .ok_or(TranslationError::BadClosure { pc, index })?;
            row.set(
                dst as usize,
                SlotType::Function(Arc::new(ctx.type_of(nested))),
            );
        }
        Instr::Call { base, nres, .. } => {
            let base = base as usize;
            // A callee with a statically known, fixed return signature
            // narrows its result registers; anything else is dynamic.
            let returns = match row.ty(base) {
                SlotType::Function(ft) if !ft.returns.is_vararg() => Some(ft.returns.clone()),
                _ => None,
            };
            for i in 0..nres as usize {
                let ty = match &returns {
                    Some(r) => r.get(i).cloned().unwrap_or(SlotType::Nil),
                    None => SlotType::Dynamic,
                };
                row.set(base + i, ty);
            }
            // The callee owned the tail of the frame during the call.
            row.kill_from(base + nres as usize);
        }
        Instr::Yield { base, n } => {
            // Suspension boundary: every live register must be
            // reloaded from the dynamically-typed stack after resume,
            // and the resume values land at the yield window.
            row.widen_live();
            for i in 0..n as usize {
                row.set(base as usize + i, SlotType::Dynamic);
            }
        }
        Instr::Jmp { .. } | Instr::Br { .. } | Instr::Ret { .. } | Instr::TailCall { .. } => {
            unreachable!("control instructions are translated as control nodes")
        }
    }
    Ok(row)
}

// =============================================================================
// Tests
// =============================================================================
