//! Static type lattice and slot rows for the tracker.
//!
//! Every register at every program point carries a `(static type,
//! liveness)` pair. The type lattice is flat under `Dynamic`:
//!
//! ```text
//!                     Dynamic (top)
//!      /     |      |      |      |       \
//!    Nil  Boolean Integer Float String Function(sig)
//! ```
//!
//! `Integer` and `Float` are distinct — language numbers bifurcate
//! into exact and approximate subtypes, and the distinction decides
//! whether a call site can use an unboxed convention. The join at
//! control merges is a true least-upper-bound: identical types join to
//! themselves, everything else widens to `Dynamic`.

use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tarn_core::value::{ArithOp, Value};

// =============================================================================
// Slot Type
// =============================================================================

/// Static type of one register at one program point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotType {
    /// Top of the lattice: could be anything.
    Dynamic,
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    /// A function with a known signature.
    Function(Arc<FunctionType>),
}

impl SlotType {
    /// The static type of a constant-pool value.
    pub fn of_constant(v: &Value) -> SlotType {
        match v {
            Value::Nil => SlotType::Nil,
            Value::Bool(_) => SlotType::Boolean,
            Value::Int(_) => SlotType::Integer,
            Value::Float(_) => SlotType::Float,
            Value::Str(_) => SlotType::String,
            // Excluded by the prototype constant-kind invariant.
            Value::Func(_) => SlotType::Dynamic,
        }
    }

    /// Exact or approximate number.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, SlotType::Integer | SlotType::Float)
    }

    /// Least upper bound: identical types join to themselves, any
    /// mismatch (including `Dynamic` on either side) widens to
    /// `Dynamic`.
    pub fn join(&self, other: &SlotType) -> SlotType {
        if self == other {
            self.clone()
        } else {
            SlotType::Dynamic
        }
    }

    /// `self` is at or below `other` in the lattice.
    pub fn is_subtype_of(&self, other: &SlotType) -> bool {
        matches!(other, SlotType::Dynamic) || self == other
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotType::Dynamic => write!(f, "D"),
            SlotType::Nil => write!(f, "-"),
            SlotType::Boolean => write!(f, "B"),
            SlotType::Integer => write!(f, "I"),
            SlotType::Float => write!(f, "F"),
            SlotType::String => write!(f, "S"),
            SlotType::Function(_) => write!(f, "C"),
        }
    }
}

/// Static result type of a binary arithmetic instruction, per the
/// pinned coercion rules: integer-integer stays `Integer` except for
/// `/`, any float operand makes it `Float`, anything non-numeric is
/// `Dynamic` (the generic path handles coercion and errors).
pub fn arith_result(op: ArithOp, lhs: &SlotType, rhs: &SlotType) -> SlotType {
    if !lhs.is_numeric() || !rhs.is_numeric() {
        return SlotType::Dynamic;
    }
    match op {
        ArithOp::Div => SlotType::Float,
        _ if *lhs == SlotType::Integer && *rhs == SlotType::Integer => SlotType::Integer,
        _ => SlotType::Float,
    }
}

// =============================================================================
// Type Sequences and Function Types
// =============================================================================

/// An ordered sequence of slot types with an optional vararg tail,
/// used for parameter and return signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSeq {
    fixed: Vec<SlotType>,
    vararg: bool,
}

impl TypeSeq {
    pub fn new(fixed: Vec<SlotType>, vararg: bool) -> Self {
        TypeSeq { fixed, vararg }
    }

    /// `n` dynamic slots, optionally vararg.
    pub fn dynamic(n: usize, vararg: bool) -> Self {
        TypeSeq {
            fixed: vec![SlotType::Dynamic; n],
            vararg,
        }
    }

    /// The fully-dynamic vararg sequence `*`.
    pub fn vararg_dynamic() -> Self {
        TypeSeq {
            fixed: Vec::new(),
            vararg: true,
        }
    }

    #[inline]
    pub fn fixed(&self) -> &[SlotType] {
        &self.fixed
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.fixed.len()
    }

    #[inline]
    pub fn is_vararg(&self) -> bool {
        self.vararg
    }

    #[inline]
    pub fn get(&self, i: usize) -> Option<&SlotType> {
        self.fixed.get(i)
    }
}

impl fmt::Display for TypeSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.fixed {
            write!(f, "{}", t)?;
        }
        if self.vararg {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// A function's parameter and return signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: TypeSeq,
    pub returns: TypeSeq,
}

impl FunctionType {
    /// The fully-dynamic signature for a function of the given shape.
    pub fn dynamic(num_params: usize, vararg: bool) -> Self {
        FunctionType {
            params: TypeSeq::dynamic(num_params, vararg),
            returns: TypeSeq::vararg_dynamic(),
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})->({})", self.params, self.returns)
    }
}

// =============================================================================
// Slots
// =============================================================================

/// One register's `(type, liveness)` pair at a program point. A dead
/// slot holds no defined value; its type is meaningless and kept at
/// `Dynamic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub ty: SlotType,
    pub live: bool,
}

impl Slot {
    /// A register with no defined value.
    pub fn dead() -> Slot {
        Slot {
            ty: SlotType::Dynamic,
            live: false,
        }
    }

    /// A live register of the given type.
    pub fn of(ty: SlotType) -> Slot {
        Slot { ty, live: true }
    }
}

/// The per-register static snapshot at one program point: a fixed-width
/// row of slots, one per register of the frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Slots {
    slots: SmallVec<[Slot; 8]>,
}

impl Slots {
    /// `n` dead registers.
    pub fn dead(n: usize) -> Slots {
        Slots {
            slots: (0..n).map(|_| Slot::dead()).collect(),
        }
    }

    /// `n` live dynamic registers — the contribution of an edge from a
    /// point lacking information.
    pub fn all_dynamic(n: usize) -> Slots {
        Slots {
            slots: (0..n).map(|_| Slot::of(SlotType::Dynamic)).collect(),
        }
    }

    /// The entry row: parameters typed and live, the rest dead.
    pub fn entry(params: &TypeSeq, n: usize) -> Slots {
        let mut s = Slots::dead(n);
        for (i, ty) in params.fixed().iter().take(n).enumerate() {
            s.slots[i] = Slot::of(ty.clone());
        }
        s
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn slot(&self, i: usize) -> &Slot {
        &self.slots[i]
    }

    #[inline]
    pub fn ty(&self, i: usize) -> &SlotType {
        &self.slots[i].ty
    }

    #[inline]
    pub fn is_live(&self, i: usize) -> bool {
        self.slots[i].live
    }

    /// Define register `i` with the given type.
    #[inline]
    pub fn set(&mut self, i: usize, ty: SlotType) {
        self.slots[i] = Slot::of(ty);
    }

    /// Copy register `src` into `dst`, liveness included.
    #[inline]
    pub fn copy(&mut self, dst: usize, src: usize) {
        self.slots[dst] = self.slots[src].clone();
    }

    /// Kill register `i`.
    #[inline]
    pub fn kill(&mut self, i: usize) {
        self.slots[i] = Slot::dead();
    }

    /// Kill every register from `i` up.
    pub fn kill_from(&mut self, i: usize) {
        for slot in self.slots.iter_mut().skip(i) {
            *slot = Slot::dead();
        }
    }

    /// Widen every live register to `Dynamic`. This is what a
    /// suspension boundary does: after a resume, values must be
    /// reloaded from the dynamically-typed stack.
    pub fn widen_live(&mut self) {
        for slot in self.slots.iter_mut() {
            if slot.live {
                slot.ty = SlotType::Dynamic;
            }
        }
    }

    /// Per-register least-upper-bound of two rows. Liveness mismatches
    /// widen to live `Dynamic`: the merged point may be reached with or
    /// without the register defined, so nothing can be assumed.
    pub fn join(&self, other: &Slots) -> Slots {
        debug_assert_eq!(self.len(), other.len(), "slot rows of unequal width");
        let slots = self
            .slots
            .iter()
            .zip(other.slots.iter())
            .map(|(a, b)| match (a.live, b.live) {
                (true, true) => Slot::of(a.ty.join(&b.ty)),
                (false, false) => Slot::dead(),
                _ => Slot::of(SlotType::Dynamic),
            })
            .collect();
        Slots { slots }
    }
}

impl fmt::Debug for Slots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for slot in &self.slots {
            if slot.live {
                write!(f, "{}", slot.ty)?;
            } else {
                write!(f, "_")?;
            }
        }
        write!(f, "]")
    }
}

// =============================================================================
// Tests
// =============================================================================
