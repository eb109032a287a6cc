//! Graph nodes, targets, traversal, and linearization.
//!
//! Each translated instruction becomes one node. The node kinds form a
//! closed set dispatched by `match`:
//!
//! - `Entry` — the distinguished start, labeled by the parameter
//!   signature so specializations of one prototype stay apart
//! - `Linear` — exactly one successor and a local effect
//! - `Jump` / `Branch` — explicit control transfers to targets
//! - `Exit` — return or tail call, no successor
//! - `Target` — a merge point carrying a reference count of incoming
//!   edges and the joined slot row, defined only once every expected
//!   edge has reported
//!
//! Every control edge lands on a target; targets chain to the node at
//! their pc. Edge mutation (`retarget_jump`) keeps the reference
//! counts consistent: the old target is decremented, the new one
//! incremented.

use super::arena::{Arena, Id};
use crate::instr::Instr;
use crate::types::Slots;
use bitflags::bitflags;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::fmt;

// =============================================================================
// Node
// =============================================================================

pub type NodeId = Id<Node>;

bitflags! {
    /// Per-node property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Jump whose edge was wired backward (to a pc at or before
        /// its own); it pre-reported a dynamic row to its target.
        const BACK_EDGE = 0b0000_0001;
        /// Branch true arm wired backward.
        const BACK_TRUE = 0b0000_0010;
        /// Branch false arm wired backward.
        const BACK_FALSE = 0b0000_0100;
        /// Target at which a suspended frame re-enters.
        const RESUME_POINT = 0b0000_1000;
        /// Target whose slot row is finalized and readable.
        const SEALED = 0b0001_0000;
        /// Jump synthesized during linearization.
        const SYNTHETIC = 0b0010_0000;
    }
}

/// A graph node: its kind, the slot rows the tracker computed at its
/// boundary, and property flags.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Input row, recorded once propagation reaches the node.
    pub in_slots: Option<Slots>,
    /// Output row: the node's effect applied to its input.
    pub out_slots: Option<Slots>,
    pub flags: NodeFlags,
}

/// The closed set of node variants.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Function entry; `next` is the target of pc 0.
    Entry { label: Box<str>, next: NodeId },
    /// One instruction with a single fall-through successor.
    Linear { instr: Instr, pc: u32, next: NodeId },
    /// Unconditional control transfer.
    Jump { target: NodeId },
    /// Two-way control transfer on a register's truthiness.
    Branch {
        instr: Instr,
        pc: u32,
        on_true: NodeId,
        on_false: NodeId,
    },
    /// Return or tail call; no successor.
    Exit { instr: Instr, pc: u32 },
    /// A merge point: reference-counted incoming edges and the joined
    /// slot row, readable only once sealed.
    Target {
        label: u32,
        incoming: u32,
        reported: u32,
        slots: Option<Slots>,
        next: Option<NodeId>,
    },
}

impl Node {
    fn new(kind: NodeKind) -> Node {
        Node {
            kind,
            in_slots: None,
            out_slots: None,
            flags: NodeFlags::empty(),
        }
    }

    /// `true` for target nodes.
    #[inline]
    pub fn is_target(&self) -> bool {
        matches!(self.kind, NodeKind::Target { .. })
    }
}

// =============================================================================
// Graph
// =============================================================================

/// The per-specialization control-flow graph. Owns all nodes; frozen
/// after translation and linearization.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Arena<Node>,
    /// The distinguished entry node.
    pub entry: NodeId,
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            nodes: Arena::with_capacity(64),
            entry: NodeId::INVALID,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        self.nodes.ids()
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Allocate the merge target for one pc.
    pub fn add_target(&mut self, label: u32) -> NodeId {
        self.nodes.alloc(Node::new(NodeKind::Target {
            label,
            incoming: 0,
            reported: 0,
            slots: None,
            next: None,
        }))
    }

    /// Allocate the entry node, wiring (and counting) its edge into
    /// `first`.
    pub fn add_entry(&mut self, label: impl Into<Box<str>>, first: NodeId) -> NodeId {
        self.inc_target(first);
        let id = self.nodes.alloc(Node::new(NodeKind::Entry {
            label: label.into(),
            next: first,
        }));
        self.entry = id;
        id
    }

    pub fn add_linear(&mut self, instr: Instr, pc: u32, next: NodeId) -> NodeId {
        self.inc_target(next);
        self.nodes
            .alloc(Node::new(NodeKind::Linear { instr, pc, next }))
    }

    pub fn add_jump(&mut self, target: NodeId) -> NodeId {
        self.inc_target(target);
        self.nodes.alloc(Node::new(NodeKind::Jump { target }))
    }

    pub fn add_branch(
        &mut self,
        instr: Instr,
        pc: u32,
        on_true: NodeId,
        on_false: NodeId,
    ) -> NodeId {
        self.inc_target(on_true);
        self.inc_target(on_false);
        self.nodes.alloc(Node::new(NodeKind::Branch {
            instr,
            pc,
            on_true,
            on_false,
        }))
    }

    pub fn add_exit(&mut self, instr: Instr, pc: u32) -> NodeId {
        self.nodes.alloc(Node::new(NodeKind::Exit { instr, pc }))
    }

    /// Chain a target to the node translated at its pc.
    pub fn set_target_next(&mut self, target: NodeId, node: NodeId) {
        match &mut self.node_mut(target).kind {
            NodeKind::Target { next, .. } => *next = Some(node),
            _ => panic!("set_target_next on a non-target node"),
        }
    }

    // =========================================================================
    // Edge Reference Counts
    // =========================================================================

    /// Count one more incoming edge on a target.
    pub fn inc_target(&mut self, target: NodeId) {
        match &mut self.node_mut(target).kind {
            NodeKind::Target { incoming, .. } => *incoming += 1,
            _ => panic!("edge wired into a non-target node"),
        }
    }

    /// Drop one incoming edge from a target.
    pub fn dec_target(&mut self, target: NodeId) {
        match &mut self.node_mut(target).kind {
            NodeKind::Target { incoming, .. } => {
                assert!(*incoming > 0, "target edge count underflow");
                *incoming -= 1;
            }
            _ => panic!("edge removed from a non-target node"),
        }
    }

    /// A target's current incoming-edge count.
    pub fn incoming_count(&self, target: NodeId) -> u32 {
        match &self.node(target).kind {
            NodeKind::Target { incoming, .. } => *incoming,
            _ => panic!("incoming_count on a non-target node"),
        }
    }

    /// Point a jump at a different target, keeping both reference
    /// counts consistent.
    pub fn retarget_jump(&mut self, jump: NodeId, new_target: NodeId) {
        let old = match &self.node(jump).kind {
            NodeKind::Jump { target } => *target,
            _ => panic!("retarget_jump on a non-jump node"),
        };
        self.dec_target(old);
        self.inc_target(new_target);
        match &mut self.node_mut(jump).kind {
            NodeKind::Jump { target } => *target = new_target,
            _ => unreachable!(),
        }
    }

    // =========================================================================
    // Target Slot Reports
    // =========================================================================

    /// Record one predecessor's output row at a target.
    pub(crate) fn record_report(&mut self, target: NodeId, row: &Slots) {
        match &mut self.node_mut(target).kind {
            NodeKind::Target {
                reported, slots, ..
            } => {
                *reported += 1;
                *slots = Some(match slots.take() {
                    Some(prev) => prev.join(row),
                    None => row.clone(),
                });
            }
            _ => panic!("slot report delivered to a non-target node"),
        }
    }

    pub(crate) fn reported_count(&self, target: NodeId) -> u32 {
        match &self.node(target).kind {
            NodeKind::Target { reported, .. } => *reported,
            _ => panic!("reported_count on a non-target node"),
        }
    }

    /// Finalize a target's row. Idempotent: sealing an already-sealed
    /// target is a no-op returning `false`.
    pub(crate) fn seal_target(&mut self, target: NodeId) -> bool {
        debug_assert!(self.node(target).is_target());
        let flags = &mut self.node_mut(target).flags;
        if flags.contains(NodeFlags::SEALED) {
            false
        } else {
            flags.insert(NodeFlags::SEALED);
            true
        }
    }

    #[inline]
    pub fn is_sealed(&self, target: NodeId) -> bool {
        self.node(target).flags.contains(NodeFlags::SEALED)
    }

    /// A sealed target's joined slot row.
    ///
    /// # Panics
    ///
    /// Panics if the target is not sealed — reading a merge row before
    /// every predecessor has reported is undefined by contract.
    pub fn target_slots(&self, target: NodeId) -> &Slots {
        assert!(
            self.is_sealed(target),
            "target slots read before finalization"
        );
        match &self.node(target).kind {
            NodeKind::Target { slots, .. } => slots.as_ref().expect("sealed target has a row"),
            _ => panic!("target_slots on a non-target node"),
        }
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Control successors of a node, in arm order.
    pub fn successors(&self, id: NodeId) -> SmallVec<[NodeId; 2]> {
        let mut out = SmallVec::new();
        match &self.node(id).kind {
            NodeKind::Entry { next, .. } | NodeKind::Linear { next, .. } => out.push(*next),
            NodeKind::Jump { target } => out.push(*target),
            NodeKind::Branch {
                on_true, on_false, ..
            } => {
                out.push(*on_true);
                out.push(*on_false);
            }
            NodeKind::Exit { .. } => {}
            NodeKind::Target { next, .. } => {
                if let Some(n) = *next {
                    out.push(n);
                }
            }
        }
        out
    }

    /// Single depth-first walk from the entry with pre-order node and
    /// edge callbacks. A per-node visited marker guarantees diamonds
    /// and loops are visited exactly once; returning `false` from
    /// `visit_node` prunes the walk below that node.
    pub fn accept<V: NodeVisitor>(&self, visitor: &mut V) {
        if !self.entry.is_valid() {
            return;
        }
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if !visitor.visit_node(id, self.node(id)) {
                continue;
            }
            let succs = self.successors(id);
            for &succ in succs.iter() {
                visitor.visit_edge(id, succ);
            }
            for &succ in succs.iter().rev() {
                stack.push(succ);
            }
        }
    }

    /// All nodes reachable from the entry.
    pub fn reachable(&self) -> Vec<NodeId> {
        struct Collect(Vec<NodeId>);
        impl NodeVisitor for Collect {
            fn visit_node(&mut self, id: NodeId, _node: &Node) -> bool {
                self.0.push(id);
                true
            }
        }
        let mut c = Collect(Vec::new());
        self.accept(&mut c);
        c.0
    }

    // =========================================================================
    // Linearization
    // =========================================================================

    /// Reduce the graph to a single linear node sequence in reverse
    /// postorder. Fall-through edges that the chosen order cannot
    /// represent become explicit, synthesized jump nodes in the output.
    pub fn linearize(&mut self) -> Vec<NodeId> {
        let order = self.reverse_postorder();
        let mut out = Vec::with_capacity(order.len());

        for (i, &id) in order.iter().enumerate() {
            out.push(id);
            let fallthrough = match &self.node(id).kind {
                NodeKind::Entry { next, .. } | NodeKind::Linear { next, .. } => Some(*next),
                NodeKind::Branch { on_false, .. } => Some(*on_false),
                NodeKind::Target { next, .. } => *next,
                NodeKind::Jump { .. } | NodeKind::Exit { .. } => None,
            };
            if let Some(ft) = fallthrough {
                if order.get(i + 1) != Some(&ft) {
                    self.inc_target(ft);
                    let jump = self.nodes.alloc(Node::new(NodeKind::Jump { target: ft }));
                    self.node_mut(jump).flags.insert(NodeFlags::SYNTHETIC);
                    out.push(jump);
                }
            }
        }
        out
    }

    fn reverse_postorder(&self) -> Vec<NodeId> {
        if !self.entry.is_valid() {
            return Vec::new();
        }
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut post = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = vec![(self.entry, 0)];
        visited.insert(self.entry);

        loop {
            let (id, idx) = match stack.last_mut() {
                Some(top) => {
                    let pair = (top.0, top.1);
                    top.1 += 1;
                    pair
                }
                None => break,
            };
            let succs = self.successors(id);
            if idx < succs.len() {
                let s = succs[idx];
                if visited.insert(s) {
                    stack.push((s, 0));
                }
            } else {
                post.push(id);
                stack.pop();
            }
        }
        post.reverse();
        post
    }

    /// Positions of nodes in a linearized order, for backends that
    /// need to resolve target labels to stream offsets.
    pub fn positions(order: &[NodeId]) -> FxHashMap<NodeId, usize> {
        order.iter().enumerate().map(|(i, &id)| (id, i)).collect()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-order callbacks for `Graph::accept`.
pub trait NodeVisitor {
    /// Called once per reachable node; return `false` to prune the
    /// walk below it.
    fn visit_node(&mut self, id: NodeId, node: &Node) -> bool;

    /// Called once per edge out of a visited node.
    fn visit_edge(&mut self, _from: NodeId, _to: NodeId) {}
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Entry { label, .. } => write!(f, "entry {}", label),
            NodeKind::Linear { instr, .. } => write!(f, "{}", instr),
            NodeKind::Jump { target } => write!(f, "goto {:?}", target),
            NodeKind::Branch { instr, .. } => write!(f, "{}", instr),
            NodeKind::Exit { instr, .. } => write!(f, "{}", instr),
            NodeKind::Target { label, .. } => write!(f, "L{}:", label),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Slots;

    /// entry -> t0 -> jump t1; t1 -> exit
    fn two_block_graph() -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let t0 = g.add_target(0);
        let t1 = g.add_target(1);
        let j = g.add_jump(t1);
        g.set_target_next(t0, j);
        let exit = g.add_exit(Instr::Ret { base: 0, n: 0 }, 1);
        g.set_target_next(t1, exit);
        g.add_entry("test_", t0);
        (g, t0, t1, j)
    }

    #[test]
    fn test_edge_counts_from_construction() {
        let (g, t0, t1, _) = two_block_graph();
        assert_eq!(g.incoming_count(t0), 1); // entry
        assert_eq!(g.incoming_count(t1), 1); // jump
    }

    #[test]
    fn test_retarget_moves_the_reference() {
        let (mut g, t0, t1, j) = two_block_graph();
        g.retarget_jump(j, t0);
        assert_eq!(g.incoming_count(t0), 2);
        assert_eq!(g.incoming_count(t1), 0);

        g.retarget_jump(j, t1);
        assert_eq!(g.incoming_count(t0), 1);
        assert_eq!(g.incoming_count(t1), 1);
    }

    #[test]
    #[should_panic(expected = "target edge count underflow")]
    fn test_dec_below_zero_fails_fast() {
        let (mut g, _, t1, _) = two_block_graph();
        g.dec_target(t1);
        g.dec_target(t1);
    }

    #[test]
    fn test_accept_visits_each_node_once() {
        // Diamond: entry -> t0 -> branch -> (t1 | t2) -> ... -> t3 (merge)
        let mut g = Graph::new();
        let t0 = g.add_target(0);
        let t1 = g.add_target(1);
        let t2 = g.add_target(2);
        let t3 = g.add_target(3);

        let br = g.add_branch(
            Instr::Br {
                cond: 0,
                on_true: 1,
                on_false: 2,
            },
            0,
            t1,
            t2,
        );
        g.set_target_next(t0, br);

        let j1 = g.add_jump(t3);
        g.set_target_next(t1, j1);
        let j2 = g.add_jump(t3);
        g.set_target_next(t2, j2);

        let exit = g.add_exit(Instr::Ret { base: 0, n: 0 }, 3);
        g.set_target_next(t3, exit);
        g.add_entry("d_", t0);

        let mut nodes = 0usize;
        let mut edges = 0usize;
        struct Count<'a>(&'a mut usize, &'a mut usize);
        impl NodeVisitor for Count<'_> {
            fn visit_node(&mut self, _id: NodeId, _node: &Node) -> bool {
                *self.0 += 1;
                true
            }
            fn visit_edge(&mut self, _from: NodeId, _to: NodeId) {
                *self.1 += 1;
            }
        }
        g.accept(&mut Count(&mut nodes, &mut edges));

        // 4 targets + branch + 2 jumps + exit + entry, each exactly once.
        assert_eq!(nodes, 9);
        // entry->t0, t0->br, br->t1, br->t2, t1->j1, t2->j2, j1->t3,
        // j2->t3, t3->exit.
        assert_eq!(edges, 9);
        assert_eq!(g.incoming_count(t3), 2);

        // Linearizing the diamond must repair the branch arm the
        // chosen order cannot express as fall-through.
        let before = g.len();
        let order = g.linearize();
        assert!(g.len() > before, "no synthesized jump for the far arm");
        assert_eq!(order.len(), g.len());
    }

    #[test]
    fn test_reports_and_sealing() {
        let (mut g, _, t1, _) = two_block_graph();
        let row = Slots::all_dynamic(2);
        g.record_report(t1, &row);
        assert_eq!(g.reported_count(t1), 1);

        assert!(g.seal_target(t1));
        // Idempotent finalization.
        assert!(!g.seal_target(t1));
        assert_eq!(*g.target_slots(t1), row);
    }

    #[test]
    #[should_panic(expected = "target slots read before finalization")]
    fn test_unsealed_target_slots_are_unreadable() {
        let (mut g, _, t1, _) = two_block_graph();
        g.record_report(t1, &Slots::all_dynamic(1));
        let _ = g.target_slots(t1);
    }

    #[test]
    fn test_linearize_synthesizes_jumps_for_broken_fallthrough() {
        let (mut g, _, _, _) = two_block_graph();
        let order = g.linearize();

        // Every fall-through in the emitted order is adjacent or
        // covered by an explicit (possibly synthesized) jump.
        for (i, &id) in order.iter().enumerate() {
            let ft = match &g.node(id).kind {
                NodeKind::Entry { next, .. } | NodeKind::Linear { next, .. } => Some(*next),
                NodeKind::Branch { on_false, .. } => Some(*on_false),
                NodeKind::Target { next, .. } => *next,
                _ => None,
            };
            if let Some(ft) = ft {
                let repaired = match order.get(i + 1) {
                    Some(&n) if n == ft => true,
                    Some(&n) => {
                        matches!(g.node(n).kind, NodeKind::Jump { target } if target == ft)
                    }
                    None => false,
                };
                assert!(repaired, "unrepaired fall-through after node {}", i);
            }
        }
    }
}
