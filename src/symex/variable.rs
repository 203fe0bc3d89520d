//! Register and memory backed variables.
//!
//! A [`Variable`] names a storage location whose value at region entry is
//! otherwise unconstrained: a register bit slice or a memory cell behind a
//! normalized pointer. Variables are the leaves of the expression domain.

use std::fmt;
use std::sync::Arc;

use crate::arch::RegisterDesc;
use crate::symex::{Expr, ExprRef, MathOp, Pointer};

/// A storage location backing an expression leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Variable {
    /// A register bit slice.
    Register(RegisterDesc),
    /// A memory cell.
    Memory {
        /// Address of the cell in normalized form.
        pointer: Pointer,
        /// Width of the cell in bits.
        bit_count: u32,
    },
}

impl Variable {
    /// Width of the variable in bits.
    #[must_use]
    pub fn bit_count(&self) -> u32 {
        match self {
            Self::Register(reg) => reg.bit_count,
            Self::Memory { bit_count, .. } => *bit_count,
        }
    }

    /// Returns `true` if the variable is register backed.
    #[must_use]
    pub const fn is_register(&self) -> bool {
        matches!(self, Self::Register(_))
    }

    /// Returns `true` if the variable is memory backed.
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory { .. })
    }

    /// Returns the register descriptor of a register backed variable.
    #[must_use]
    pub const fn as_register(&self) -> Option<&RegisterDesc> {
        match self {
            Self::Register(reg) => Some(reg),
            Self::Memory { .. } => None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(reg) => write!(f, "{reg}"),
            Self::Memory { pointer, bit_count } => write!(f, "[{pointer}]:{bit_count}"),
        }
    }
}

/// Re-packs bit-extraction arithmetic into sub-register variables.
///
/// The simplifier canonicalizes slice reads into `resize(shifted register)`
/// chains; this pass folds those chains back into register descriptors with
/// adjusted offsets so the translator can emit plain register operands
/// instead of shift/mask sequences.
#[must_use]
pub fn pack_all(expr: &ExprRef) -> ExprRef {
    match &**expr {
        Expr::Const { .. } | Expr::Var { .. } => Arc::clone(expr),

        Expr::Unary { op, src, width } => {
            // trunc(reg) => low slice of reg
            if matches!(op, MathOp::UCast | MathOp::Cast) {
                if let Expr::Var {
                    var: Variable::Register(reg),
                } = &**src
                {
                    if *width < reg.bit_count {
                        return Expr::register(reg.select(*width, reg.bit_offset));
                    }
                }
            }
            let packed = pack_all(src);
            if Arc::ptr_eq(&packed, src) {
                Arc::clone(expr)
            } else {
                Arc::new(Expr::Unary {
                    op: *op,
                    src: packed,
                    width: *width,
                })
            }
        }

        Expr::Binary {
            op,
            lhs,
            rhs,
            width,
        } => {
            // bt(reg, i) => single-bit slice of reg
            if *op == MathOp::BitTest {
                if let Expr::Var {
                    var: Variable::Register(reg),
                } = &**lhs
                {
                    if let Some(index) = rhs.value() {
                        let index = u32::try_from(index).unwrap_or(u32::MAX);
                        if index < reg.bit_count {
                            return Expr::register(reg.select(1, reg.bit_offset + index));
                        }
                    }
                }
            }
            // (reg >> c) => high slice of reg, zero extended back
            if *op == MathOp::Shr {
                if let Expr::Var {
                    var: Variable::Register(reg),
                } = &**lhs
                {
                    if let Some(shift) = rhs.value() {
                        let shift = u32::try_from(shift).unwrap_or(u32::MAX);
                        if shift > 0 && shift < reg.bit_count {
                            let slice =
                                reg.select(reg.bit_count - shift, reg.bit_offset + shift);
                            return Expr::resize(&Expr::register(slice), *width, false);
                        }
                    }
                }
            }
            let packed_lhs = pack_all(lhs);
            let packed_rhs = pack_all(rhs);
            if Arc::ptr_eq(&packed_lhs, lhs) && Arc::ptr_eq(&packed_rhs, rhs) {
                Arc::clone(expr)
            } else {
                Arc::new(Expr::Binary {
                    op: *op,
                    lhs: packed_lhs,
                    rhs: packed_rhs,
                    width: *width,
                })
            }
        }
    }
}
