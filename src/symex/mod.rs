//! Symbolic execution over an immutable expression domain.
//!
//! This module family provides:
//!
//! - [`Expr`]: an immutable, reference-counted, width-tagged expression tree
//!   over constants, register/memory variables and mathematical operators
//! - [`simplify`]: the expression simplifier with its process-wide, purgeable
//!   cache
//! - [`Pointer`]: memory addresses in normalized `base + constant` form
//! - [`SymbolicVm`]: the virtual machine interpreting IR instructions against
//!   a symbolic register file and memory store
//!
//! # Design
//!
//! Expressions are shared through [`ExprRef`] and never mutated; every
//! operation produces a new tree. Structural equality therefore doubles as
//! semantic equality after both sides have been simplified, which is how
//! [`expr_equals`] decides value-preservation questions for the optimizer.

pub(crate) mod expr;
mod ops;
mod pointer;
mod simplify;
mod variable;
mod vm;

pub use expr::{Expr, ExprRef};
pub use ops::MathOp;
pub use pointer::Pointer;
pub use simplify::{expr_equals, extract_displacement, purge_simplifier_cache, simplify};
pub use variable::{pack_all, Variable};
pub use vm::{ExitReason, LambdaVm, MemoryState, RegisterCell, SymbolicVm, Vm};
