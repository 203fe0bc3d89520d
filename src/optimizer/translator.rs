//! Expression-to-operand lowering.
//!
//! [`BatchTranslator`] lowers expression trees into operands of a block
//! under construction, allocating temporaries for composite nodes and
//! memoizing every lowered subtree so repeated subexpressions share one
//! computation across the whole batch.

use rustc_hash::FxHashMap;

use crate::arch::RegisterDesc;
use crate::ir::{ins, Immediate, Instruction, InstructionDesc, Operand};
use crate::symex::{Expr, ExprRef, MathOp, Variable};

/// Lowers expressions into a block, with cross-expression sharing.
pub struct BatchTranslator<'a> {
    block: &'a mut crate::ir::BasicBlock,
    cache: FxHashMap<ExprRef, Operand>,
}

impl<'a> BatchTranslator<'a> {
    /// Creates a translator emitting into `block`.
    pub fn new(block: &'a mut crate::ir::BasicBlock) -> Self {
        Self {
            block,
            cache: FxHashMap::default(),
        }
    }

    /// Lowers an expression, emitting whatever instructions it needs, and
    /// returns the operand holding its value.
    pub fn translate(&mut self, expr: &ExprRef) -> Operand {
        if let Some(operand) = self.cache.get(expr) {
            return *operand;
        }
        let result = self.translate_uncached(expr);
        self.cache.insert(expr.clone(), result);
        result
    }

    /// Number of instructions emitted into the underlying block so far.
    pub fn len(&self) -> usize {
        self.block.len()
    }

    /// Forces an operand into a register, materializing immediates.
    pub fn to_register(&mut self, operand: Operand) -> RegisterDesc {
        match operand {
            Operand::Reg(reg) => reg,
            Operand::Imm(imm) => {
                let tmp = self.block.tmp(imm.bit_count);
                self.block.push(Instruction::mov(tmp, operand));
                tmp
            }
        }
    }

    fn translate_uncached(&mut self, expr: &ExprRef) -> Operand {
        match &**expr {
            Expr::Const { value, width } => {
                Operand::Imm(Immediate::new(*value as i64, *width))
            }

            Expr::Var { var } => match var {
                // Stack pointer expressions name the value at stack delta
                // zero, but a re-emitted read adds the emission point's
                // delta back in; cancel it so the value is preserved.
                Variable::Register(reg)
                    if reg.is_stack_pointer() && self.block.sp_offset() != 0 =>
                {
                    let delta = self.block.sp_offset();
                    let dst = self.block.tmp(reg.bit_count);
                    self.block.push(Instruction::mov(dst, *reg));
                    self.block.push(Instruction::new(
                        &ins::SUB,
                        vec![dst.into(), Operand::imm(delta, 64)],
                    ));
                    Operand::Reg(dst)
                }
                Variable::Register(reg) => Operand::Reg(*reg),
                Variable::Memory { pointer, bit_count } => {
                    let base = self.translate(pointer.base());
                    let base = self.to_register(base);
                    let dst = self.block.tmp(*bit_count);
                    self.block
                        .push(Instruction::ldd(dst, base, pointer.offset()));
                    Operand::Reg(dst)
                }
            },

            Expr::Unary { op, src, width } => {
                let src = self.translate(src);
                match op {
                    MathOp::UCast => {
                        let dst = self.block.tmp(*width);
                        self.block.push(Instruction::mov(dst, src));
                        Operand::Reg(dst)
                    }
                    MathOp::Cast => {
                        let dst = self.block.tmp(*width);
                        self.block.push(Instruction::movsx(dst, src));
                        Operand::Reg(dst)
                    }
                    MathOp::Neg | MathOp::Not => {
                        let dst = self.block.tmp(*width);
                        self.block.push(Instruction::mov(dst, src));
                        let desc = if *op == MathOp::Neg { &ins::NEG } else { &ins::NOT };
                        self.block
                            .push(Instruction::new(desc, vec![dst.into()]));
                        Operand::Reg(dst)
                    }
                    other => panic!("unary operator {other} has no instruction form"),
                }
            }

            Expr::Binary {
                op,
                lhs,
                rhs,
                width,
            } => {
                let lhs = self.translate(lhs);
                let rhs = self.translate(rhs);
                if op.is_predicate() {
                    // Write-first ternary form: dst = op(lhs, rhs).
                    let dst = self.block.tmp(1);
                    self.block
                        .push(Instruction::new(predicate_desc(*op), vec![dst.into(), lhs, rhs]));
                    return Operand::Reg(dst);
                }
                if matches!(op, MathOp::Div | MathOp::IDiv | MathOp::Rem | MathOp::IRem) {
                    // Pair form with a zero high half.
                    let dst = self.block.tmp(*width);
                    self.block.push(Instruction::mov(dst, lhs));
                    self.block.push(Instruction::new(
                        pair_desc(*op),
                        vec![dst.into(), Operand::imm(0, *width), rhs],
                    ));
                    return Operand::Reg(dst);
                }
                // Two-operand read-modify-write form.
                let dst = self.block.tmp(*width);
                self.block.push(Instruction::mov(dst, lhs));
                self.block
                    .push(Instruction::new(binary_desc(*op), vec![dst.into(), rhs]));
                Operand::Reg(dst)
            }
        }
    }
}

fn binary_desc(op: MathOp) -> &'static InstructionDesc {
    match op {
        MathOp::Add => &ins::ADD,
        MathOp::Sub => &ins::SUB,
        MathOp::Mul => &ins::MUL,
        MathOp::MulHi => &ins::MULHI,
        MathOp::IMul => &ins::IMUL,
        MathOp::IMulHi => &ins::IMULHI,
        MathOp::And => &ins::AND,
        MathOp::Or => &ins::OR,
        MathOp::Xor => &ins::XOR,
        MathOp::Shl => &ins::SHL,
        MathOp::Shr => &ins::SHR,
        MathOp::Rol => &ins::ROL,
        MathOp::Ror => &ins::ROR,
        other => panic!("operator {other} has no two-operand instruction form"),
    }
}

fn pair_desc(op: MathOp) -> &'static InstructionDesc {
    match op {
        MathOp::Div => &ins::DIV,
        MathOp::IDiv => &ins::IDIV,
        MathOp::Rem => &ins::REM,
        MathOp::IRem => &ins::IREM,
        other => panic!("operator {other} has no pair instruction form"),
    }
}

fn predicate_desc(op: MathOp) -> &'static InstructionDesc {
    match op {
        MathOp::BitTest => &ins::BT,
        MathOp::Eq => &ins::TE,
        MathOp::Ne => &ins::TNE,
        MathOp::SLt => &ins::TL,
        MathOp::SLe => &ins::TLE,
        MathOp::SGt => &ins::TG,
        MathOp::SGe => &ins::TGE,
        MathOp::ULt => &ins::TUL,
        MathOp::ULe => &ins::TULE,
        MathOp::UGt => &ins::TUG,
        MathOp::UGe => &ins::TUGE,
        other => panic!("operator {other} has no predicate instruction form"),
    }
}
