//! Immutable source units.
//!
//! A `Prototype` is one compiled function body as produced by the
//! external front end: constant pool, instruction sequence, nested
//! prototypes, arity, and optional debug tables. It is created once,
//! validated on construction, immutable afterwards, and shared as
//! `Arc<Prototype>` across every specialization compiled from it.
//!
//! The constant pool is restricted to nil, boolean, integer, float and
//! string values; anything else fails construction. Debug tables
//! (local names, line map, upvalue descriptors) are threaded through
//! unchanged for diagnostics — this crate never interprets them.

use crate::instr::Instr;
use std::fmt;
use std::sync::Arc;
use tarn_core::value::{Value, ValueKind};

// =============================================================================
// Debug Tables
// =============================================================================

/// Name and active range of one local variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: Arc<str>,
    /// First pc at which the variable is active (inclusive).
    pub begin_pc: u32,
    /// First pc at which the variable is no longer active (exclusive).
    pub end_pc: u32,
}

/// Descriptor of one upvalue captured by the function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub name: Arc<str>,
    /// Captured from the enclosing frame's registers (as opposed to
    /// the enclosing function's own upvalue list).
    pub in_stack: bool,
    pub index: u8,
}

// =============================================================================
// Prototype
// =============================================================================

/// An immutable compiled function body.
pub struct Prototype {
    constants: Box<[Value]>,
    code: Box<[Instr]>,
    nested: Box<[Arc<Prototype>]>,
    num_params: u8,
    is_vararg: bool,
    max_stack_size: u16,
    source: Arc<str>,
    line_defined: u32,
    last_line_defined: u32,
    /// Map from pc to source line; may be empty when the front end
    /// stripped debug information.
    line_info: Box<[u32]>,
    locals: Box<[LocalVariable]>,
    upvalues: Box<[UpvalueDesc]>,
}

impl Prototype {
    #[inline]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    #[inline]
    pub fn constant(&self, k: u16) -> Option<&Value> {
        self.constants.get(k as usize)
    }

    #[inline]
    pub fn code(&self) -> &[Instr] {
        &self.code
    }

    #[inline]
    pub fn nested(&self) -> &[Arc<Prototype>] {
        &self.nested
    }

    #[inline]
    pub fn nested_proto(&self, i: u16) -> Option<&Arc<Prototype>> {
        self.nested.get(i as usize)
    }

    #[inline]
    pub fn num_params(&self) -> u8 {
        self.num_params
    }

    #[inline]
    pub fn is_vararg(&self) -> bool {
        self.is_vararg
    }

    /// Number of registers the body needs.
    #[inline]
    pub fn max_stack_size(&self) -> u16 {
        self.max_stack_size
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn begin_line(&self) -> u32 {
        self.line_defined
    }

    #[inline]
    pub fn end_line(&self) -> u32 {
        self.last_line_defined
    }

    pub fn has_line_info(&self) -> bool {
        !self.line_info.is_empty()
    }

    /// Source line of the instruction at `pc`, if known.
    pub fn line_at(&self, pc: u32) -> Option<u32> {
        self.line_info.get(pc as usize).copied()
    }

    #[inline]
    pub fn locals(&self) -> &[LocalVariable] {
        &self.locals
    }

    #[inline]
    pub fn upvalues(&self) -> &[UpvalueDesc] {
        &self.upvalues
    }

    /// Name of the `number`-th local variable active at `pc`
    /// (1-based), if debug information records one.
    pub fn local_variable_name(&self, number: usize, pc: u32) -> Option<&str> {
        let mut remaining = number;
        for lv in self.locals.iter() {
            if lv.begin_pc > pc {
                break;
            }
            if pc < lv.end_pc {
                remaining -= 1;
                if remaining == 0 {
                    return Some(&lv.name);
                }
            }
        }
        None
    }
}

impl fmt::Debug for Prototype {
    // Compact "source:first-last" form, the way diagnostics print it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}",
            self.source, self.line_defined, self.last_line_defined
        )
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Construction error for a prototype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrototypeError {
    /// A constant-pool entry is not one of the five permitted kinds.
    InvalidConstant { index: usize, kind: ValueKind },
}

impl fmt::Display for PrototypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrototypeError::InvalidConstant { index, kind } => {
                write!(f, "constant {} is not a valid constant kind: {}", index, kind)
            }
        }
    }
}

impl std::error::Error for PrototypeError {}

/// Whether a value may appear in a constant pool.
pub fn is_valid_constant(v: &Value) -> bool {
    matches!(
        v.kind(),
        ValueKind::Nil
            | ValueKind::Boolean
            | ValueKind::Integer
            | ValueKind::Float
            | ValueKind::String
    )
}

/// Accumulates the pieces of a prototype; `build` validates and
/// freezes them.
#[derive(Debug, Default)]
pub struct PrototypeBuilder {
    pub constants: Vec<Value>,
    pub code: Vec<Instr>,
    pub nested: Vec<Arc<Prototype>>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u16,
    pub source: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub line_info: Vec<u32>,
    pub locals: Vec<LocalVariable>,
    pub upvalues: Vec<UpvalueDesc>,
}

impl PrototypeBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        PrototypeBuilder {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Validate and freeze. Fails if any constant-pool entry violates
    /// the constant-kind invariant.
    pub fn build(self) -> Result<Arc<Prototype>, PrototypeError> {
        for (index, v) in self.constants.iter().enumerate() {
            if !is_valid_constant(v) {
                return Err(PrototypeError::InvalidConstant {
                    index,
                    kind: v.kind(),
                });
            }
        }
        Ok(Arc::new(Prototype {
            constants: self.constants.into_boxed_slice(),
            code: self.code.into_boxed_slice(),
            nested: self.nested.into_boxed_slice(),
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            max_stack_size: self.max_stack_size,
            source: self.source.into(),
            line_defined: self.line_defined,
            last_line_defined: self.last_line_defined,
            line_info: self.line_info.into_boxed_slice(),
            locals: self.locals.into_boxed_slice(),
            upvalues: self.upvalues.into_boxed_slice(),
        }))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use tarn_core::call::{Control, Func};
    use tarn_core::registers::ReturnTarget;
    use tarn_core::stack::StackView;
    use tarn_core::RuntimeError;

    fn tiny_proto() -> PrototypeBuilder {
        let mut b = PrototypeBuilder::new("test.tarn");
        b.code.push(Instr::LoadNil { dst: 0 });
        b.code.push(Instr::Ret { base: 0, n: 1 });
        b.max_stack_size = 1;
        b
    }

    #[test]
    fn test_valid_constants_accepted() {
        let mut b = tiny_proto();
        b.constants = vec![
            Value::Nil,
            Value::Bool(true),
            Value::Int(1),
            Value::Float(0.5),
            Value::str("s"),
        ];
        let p = b.build().unwrap();
        assert_eq!(p.constants().len(), 5);
        assert_eq!(p.constant(2), Some(&Value::Int(1)));
        assert_eq!(p.constant(9), None);
    }

    #[test]
    fn test_function_constant_rejected() {
        struct Nop;
        impl Func for Nop {
            fn call(
                &self,
                _frame: StackView<'_>,
                ret: &ReturnTarget<'_>,
            ) -> Result<Control, RuntimeError> {
                ret.begin();
                ret.end()?;
                Ok(Control::Return)
            }
        }

        let mut b = tiny_proto();
        b.constants = vec![Value::Int(0), Value::func(StdArc::new(Nop))];
        assert_eq!(
            b.build().unwrap_err(),
            PrototypeError::InvalidConstant {
                index: 1,
                kind: ValueKind::Function
            }
        );
    }

    #[test]
    fn test_local_variable_name_lookup() {
        let mut b = tiny_proto();
        b.locals = vec![
            LocalVariable {
                name: "x".into(),
                begin_pc: 0,
                end_pc: 2,
            },
            LocalVariable {
                name: "y".into(),
                begin_pc: 1,
                end_pc: 2,
            },
        ];
        let p = b.build().unwrap();
        assert_eq!(p.local_variable_name(1, 0), Some("x"));
        assert_eq!(p.local_variable_name(1, 1), Some("x"));
        assert_eq!(p.local_variable_name(2, 1), Some("y"));
        assert_eq!(p.local_variable_name(2, 0), None);
        assert_eq!(p.local_variable_name(1, 5), None);
    }

    #[test]
    fn test_line_lookup() {
        let mut b = tiny_proto();
        b.line_info = vec![10, 11];
        b.line_defined = 10;
        b.last_line_defined = 11;
        let p = b.build().unwrap();
        assert!(p.has_line_info());
        assert_eq!(p.line_at(1), Some(11));
        assert_eq!(p.line_at(7), None);
        assert_eq!(format!("{:?}", p), "test.tarn:10-11");
    }
}
