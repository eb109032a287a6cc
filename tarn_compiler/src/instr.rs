//! The instruction set consumed from the front end.
//!
//! This is the in-memory interface type between the external
//! parser/loader and the graph translator — not a serialized encoding.
//! It is a small register ISA: `u8` register operands, `u16` pool
//! indices, absolute `u32` jump destinations.
//!
//! Conventions:
//!
//! - `Call { base, nargs, nres }`: the callee is in `r[base]`,
//!   arguments in `r[base + 1 ..= base + nargs]`; results land in
//!   `r[base ..]`, `nres` of them
//! - `TailCall` is the frame's final action and reuses it
//! - `Yield { base, n }` suspends with `n` values from `r[base]`;
//!   resume values are delivered to the same registers

use std::fmt;
use tarn_core::value::{ArithOp, CmpOp};

/// One instruction of a compiled function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// `r[dst] = constants[k]`
    LoadK { dst: u8, k: u16 },
    /// `r[dst] = value`
    LoadBool { dst: u8, value: bool },
    /// `r[dst] = nil`
    LoadNil { dst: u8 },
    /// `r[dst] = r[src]`
    Move { dst: u8, src: u8 },
    /// `r[dst] = r[lhs] op r[rhs]`
    Arith { op: ArithOp, dst: u8, lhs: u8, rhs: u8 },
    /// `r[dst] = r[lhs] op r[rhs]` (boolean result)
    Cmp { op: CmpOp, dst: u8, lhs: u8, rhs: u8 },
    /// `r[dst] = closure of nested prototype `proto``
    Closure { dst: u8, proto: u16 },
    /// Unconditional jump to `to`.
    Jmp { to: u32 },
    /// Two-way branch on the truthiness of `r[cond]`.
    Br { cond: u8, on_true: u32, on_false: u32 },
    /// Call `r[base]` with `nargs` arguments, keeping `nres` results.
    Call { base: u8, nargs: u8, nres: u8 },
    /// Tail call `r[base]` with `nargs` arguments, reusing the frame.
    TailCall { base: u8, nargs: u8 },
    /// Return `n` values starting at `r[base]`.
    Ret { base: u8, n: u8 },
    /// Suspend, yielding `n` values starting at `r[base]`.
    Yield { base: u8, n: u8 },
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Instr::LoadK { dst, k } => write!(f, "loadk   r{}, k{}", dst, k),
            Instr::LoadBool { dst, value } => write!(f, "loadb   r{}, {}", dst, value),
            Instr::LoadNil { dst } => write!(f, "loadnil r{}", dst),
            Instr::Move { dst, src } => write!(f, "move    r{}, r{}", dst, src),
            Instr::Arith { op, dst, lhs, rhs } => {
                write!(f, "arith   r{}, r{} {} r{}", dst, lhs, op.symbol(), rhs)
            }
            Instr::Cmp { op, dst, lhs, rhs } => {
                write!(f, "cmp     r{}, r{} {} r{}", dst, lhs, op.symbol(), rhs)
            }
            Instr::Closure { dst, proto } => write!(f, "closure r{}, p{}", dst, proto),
            Instr::Jmp { to } => write!(f, "jmp     {}", to),
            Instr::Br { cond, on_true, on_false } => {
                write!(f, "br      r{}, {}, {}", cond, on_true, on_false)
            }
            Instr::Call { base, nargs, nres } => {
                write!(f, "call    r{}, {} in, {} out", base, nargs, nres)
            }
            Instr::TailCall { base, nargs } => write!(f, "tcall   r{}, {} in", base, nargs),
            Instr::Ret { base, n } => write!(f, "ret     r{}, {}", base, n),
            Instr::Yield { base, n } => write!(f, "yield   r{}, {}", base, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_compact() {
        let i = Instr::Arith {
            op: ArithOp::Add,
            dst: 1,
            lhs: 2,
            rhs: 3,
        };
        assert_eq!(i.to_string(), "arith   r1, r2 + r3");
        assert_eq!(Instr::Jmp { to: 7 }.to_string(), "jmp     7");
    }
}
