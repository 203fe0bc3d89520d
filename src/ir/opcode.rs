//! Instruction descriptors.
//!
//! Every instruction references one of the process-wide immutable
//! descriptors in [`ins`]. Descriptors carry the operand discipline, the
//! symbolic operator of pure instructions, memory and branch operand
//! indices and the volatility flag. Descriptors are compared by identity,
//! like the `&'static str` they carry.

use crate::symex::MathOp;

/// Access discipline of one operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    /// Read, register or immediate.
    Read,
    /// Read, must be an immediate.
    ReadImm,
    /// Read, must be a register.
    ReadReg,
    /// Written, must be a register.
    Write,
    /// Read and written, must be a register.
    ReadWrite,
}

impl OperandType {
    /// Returns `true` if the slot is written.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// Returns `true` if the slot is read.
    #[must_use]
    pub const fn is_read(self) -> bool {
        !matches!(self, Self::Write)
    }

    /// Returns `true` if the slot only accepts registers.
    #[must_use]
    pub const fn requires_register(self) -> bool {
        matches!(self, Self::ReadReg | Self::Write | Self::ReadWrite)
    }
}

/// Immutable, process-wide descriptor of one opcode.
#[derive(Debug)]
pub struct InstructionDesc {
    /// Mnemonic.
    pub name: &'static str,
    /// Access discipline per operand slot.
    pub operand_types: &'static [OperandType],
    /// Where the access size of the instruction comes from:
    /// `0` means the instruction has no sized access; a positive value `i`
    /// takes the width of operand `i - 1`; a negative value `-i` reads the
    /// size in bits from the immediate in operand `i - 1`.
    pub access_size_index: i8,
    /// The pure mathematical operator computed by this instruction, if any.
    pub symbolic_operator: Option<MathOp>,
    /// Index of the memory base register operand; the following operand is
    /// the constant byte offset.
    pub memory_operand_index: Option<usize>,
    /// Whether the memory access (if any) is a write.
    pub memory_write: bool,
    /// Operand indices holding targets in the referenced image.
    pub branch_operands_rip: &'static [usize],
    /// Operand indices holding virtual instruction pointer targets.
    pub branch_operands_vip: &'static [usize],
    /// Whether the instruction has observable side effects beyond its
    /// operands and must not be reordered or eliminated.
    pub is_volatile: bool,
}

impl InstructionDesc {
    /// Number of operand slots.
    #[must_use]
    pub const fn operand_count(&self) -> usize {
        self.operand_types.len()
    }

    /// Returns `true` if the instruction accesses memory.
    #[must_use]
    pub const fn accesses_memory(&self) -> bool {
        self.memory_operand_index.is_some()
    }

    /// Returns `true` if the instruction reads memory.
    #[must_use]
    pub const fn reads_memory(&self) -> bool {
        self.accesses_memory() && !self.memory_write
    }

    /// Returns `true` if the instruction writes memory.
    #[must_use]
    pub const fn writes_memory(&self) -> bool {
        self.accesses_memory() && self.memory_write
    }

    /// Returns `true` if the instruction branches.
    #[must_use]
    pub const fn is_branching(&self) -> bool {
        !self.branch_operands_rip.is_empty() || !self.branch_operands_vip.is_empty()
    }

    /// Returns `true` if the instruction branches within the lifted routine.
    #[must_use]
    pub const fn is_branching_virtual(&self) -> bool {
        !self.branch_operands_vip.is_empty()
    }

    /// Returns `true` if the instruction branches into the referenced image.
    #[must_use]
    pub const fn is_branching_real(&self) -> bool {
        !self.branch_operands_rip.is_empty()
    }

    /// Identity comparison; descriptors are singletons.
    #[must_use]
    pub fn same(a: &'static Self, b: &'static Self) -> bool {
        std::ptr::eq(a, b)
    }
}

impl PartialEq for InstructionDesc {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for InstructionDesc {}

/// The descriptor table.
#[allow(missing_docs)]
pub mod ins {
    use super::{InstructionDesc, OperandType};
    use super::OperandType::{Read, ReadImm, ReadReg, ReadWrite, Write};
    use crate::symex::MathOp;

    const fn desc(
        name: &'static str,
        operand_types: &'static [OperandType],
        access_size_index: i8,
        symbolic_operator: Option<MathOp>,
    ) -> InstructionDesc {
        InstructionDesc {
            name,
            operand_types,
            access_size_index,
            symbolic_operator,
            memory_operand_index: None,
            memory_write: false,
            branch_operands_rip: &[],
            branch_operands_vip: &[],
            is_volatile: false,
        }
    }

    // Data movement.
    //
    /// `mov dst, src`: unsigned resize of `src` into `dst`.
    pub static MOV: InstructionDesc = desc("mov", &[Write, Read], 1, None);
    /// `movsx dst, src`: signed resize of `src` into `dst`.
    pub static MOVSX: InstructionDesc = desc("movsx", &[Write, Read], 1, None);
    /// `str base, offset, src`: store `src` at `[base + offset]`.
    pub static STR: InstructionDesc = InstructionDesc {
        memory_operand_index: Some(0),
        memory_write: true,
        ..desc("str", &[ReadReg, ReadImm, Read], 3, None)
    };
    /// `ldd dst, base, offset`: load `dst` from `[base + offset]`.
    pub static LDD: InstructionDesc = InstructionDesc {
        memory_operand_index: Some(1),
        ..desc("ldd", &[Write, ReadReg, ReadImm], 1, None)
    };

    // Arithmetic.
    //
    pub static NEG: InstructionDesc = desc("neg", &[ReadWrite], 1, Some(MathOp::Neg));
    pub static ADD: InstructionDesc = desc("add", &[ReadWrite, Read], 1, Some(MathOp::Add));
    pub static SUB: InstructionDesc = desc("sub", &[ReadWrite, Read], 1, Some(MathOp::Sub));
    pub static MUL: InstructionDesc = desc("mul", &[ReadWrite, Read], 1, Some(MathOp::Mul));
    pub static MULHI: InstructionDesc = desc("mulhi", &[ReadWrite, Read], 1, Some(MathOp::MulHi));
    pub static IMUL: InstructionDesc = desc("imul", &[ReadWrite, Read], 1, Some(MathOp::IMul));
    pub static IMULHI: InstructionDesc =
        desc("imulhi", &[ReadWrite, Read], 1, Some(MathOp::IMulHi));
    /// `div lo, hi, src`: unsigned division of the `hi:lo` pair by `src`.
    pub static DIV: InstructionDesc = desc("div", &[ReadWrite, Read, Read], 1, Some(MathOp::Div));
    /// `idiv lo, hi, src`: signed division of the `hi:lo` pair by `src`.
    pub static IDIV: InstructionDesc =
        desc("idiv", &[ReadWrite, Read, Read], 1, Some(MathOp::IDiv));
    /// `rem lo, hi, src`: unsigned remainder of the `hi:lo` pair by `src`.
    pub static REM: InstructionDesc = desc("rem", &[ReadWrite, Read, Read], 1, Some(MathOp::Rem));
    /// `irem lo, hi, src`: signed remainder of the `hi:lo` pair by `src`.
    pub static IREM: InstructionDesc =
        desc("irem", &[ReadWrite, Read, Read], 1, Some(MathOp::IRem));

    // Bitwise.
    //
    pub static NOT: InstructionDesc = desc("not", &[ReadWrite], 1, Some(MathOp::Not));
    pub static AND: InstructionDesc = desc("and", &[ReadWrite, Read], 1, Some(MathOp::And));
    pub static OR: InstructionDesc = desc("or", &[ReadWrite, Read], 1, Some(MathOp::Or));
    pub static XOR: InstructionDesc = desc("xor", &[ReadWrite, Read], 1, Some(MathOp::Xor));
    pub static SHL: InstructionDesc = desc("shl", &[ReadWrite, Read], 1, Some(MathOp::Shl));
    pub static SHR: InstructionDesc = desc("shr", &[ReadWrite, Read], 1, Some(MathOp::Shr));
    pub static ROL: InstructionDesc = desc("rol", &[ReadWrite, Read], 1, Some(MathOp::Rol));
    pub static ROR: InstructionDesc = desc("ror", &[ReadWrite, Read], 1, Some(MathOp::Ror));
    /// `bt dst, src, idx`: extract bit `idx` of `src` into `dst`.
    pub static BT: InstructionDesc = desc("bt", &[Write, Read, Read], 2, Some(MathOp::BitTest));

    // Comparisons.
    //
    pub static TE: InstructionDesc = desc("te", &[Write, Read, Read], 2, Some(MathOp::Eq));
    pub static TNE: InstructionDesc = desc("tne", &[Write, Read, Read], 2, Some(MathOp::Ne));
    pub static TL: InstructionDesc = desc("tl", &[Write, Read, Read], 2, Some(MathOp::SLt));
    pub static TLE: InstructionDesc = desc("tle", &[Write, Read, Read], 2, Some(MathOp::SLe));
    pub static TG: InstructionDesc = desc("tg", &[Write, Read, Read], 2, Some(MathOp::SGt));
    pub static TGE: InstructionDesc = desc("tge", &[Write, Read, Read], 2, Some(MathOp::SGe));
    pub static TUL: InstructionDesc = desc("tul", &[Write, Read, Read], 2, Some(MathOp::ULt));
    pub static TULE: InstructionDesc = desc("tule", &[Write, Read, Read], 2, Some(MathOp::ULe));
    pub static TUG: InstructionDesc = desc("tug", &[Write, Read, Read], 2, Some(MathOp::UGt));
    pub static TUGE: InstructionDesc = desc("tuge", &[Write, Read, Read], 2, Some(MathOp::UGe));

    // Control flow.
    //
    /// `js cond, vip_true, vip_false`: branch on `cond != 0`.
    pub static JS: InstructionDesc = InstructionDesc {
        branch_operands_vip: &[1, 2],
        ..desc("js", &[Read, Read, Read], 0, None)
    };
    /// `jmp vip`: unconditional branch.
    pub static JMP: InstructionDesc = InstructionDesc {
        branch_operands_vip: &[0],
        ..desc("jmp", &[Read], 0, None)
    };
    /// `vexit rip`: leave the virtual machine at the given image address.
    pub static VEXIT: InstructionDesc = InstructionDesc {
        branch_operands_rip: &[0],
        is_volatile: true,
        ..desc("vexit", &[Read], 0, None)
    };
    /// `vxcall rip`: call into the referenced image.
    pub static VXCALL: InstructionDesc = InstructionDesc {
        branch_operands_rip: &[0],
        is_volatile: true,
        ..desc("vxcall", &[Read], 0, None)
    };

    // Pins and escapes.
    //
    /// `vemit imm`: emit the immediate verbatim into the output stream.
    pub static VEMIT: InstructionDesc = InstructionDesc {
        is_volatile: true,
        ..desc("vemit", &[ReadImm], 0, None)
    };
    /// `vpinr reg`: pin a register read.
    pub static VPINR: InstructionDesc = InstructionDesc {
        is_volatile: true,
        ..desc("vpinr", &[ReadReg], 1, None)
    };
    /// `vpinw reg`: pin a register write.
    pub static VPINW: InstructionDesc = InstructionDesc {
        is_volatile: true,
        ..desc("vpinw", &[Write], 1, None)
    };

    /// `nop`: no operation.
    pub static NOP: InstructionDesc = desc("nop", &[], 0, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_comparison() {
        assert_eq!(&ins::MOV, &ins::MOV);
        assert_ne!(&ins::MOV, &ins::MOVSX);
        assert!(InstructionDesc::same(&ins::ADD, &ins::ADD));
    }

    #[test]
    fn test_memory_descriptors() {
        assert!(ins::STR.writes_memory());
        assert!(!ins::STR.reads_memory());
        assert!(ins::LDD.reads_memory());
        assert_eq!(ins::STR.memory_operand_index, Some(0));
        assert_eq!(ins::LDD.memory_operand_index, Some(1));
        // The operand after the base must be the offset immediate.
        for desc in [&ins::STR, &ins::LDD] {
            let base = desc.memory_operand_index.unwrap();
            assert_eq!(desc.operand_types[base], OperandType::ReadReg);
            assert_eq!(desc.operand_types[base + 1], OperandType::ReadImm);
        }
    }

    #[test]
    fn test_branch_descriptors() {
        assert!(ins::JS.is_branching_virtual());
        assert!(ins::JMP.is_branching_virtual());
        assert!(ins::VEXIT.is_branching_real());
        assert!(ins::VXCALL.is_branching_real());
        assert!(!ins::MOV.is_branching());
    }

    #[test]
    fn test_operator_tags() {
        assert_eq!(ins::ADD.symbolic_operator, Some(crate::symex::MathOp::Add));
        assert_eq!(ins::MOV.symbolic_operator, None);
        // Every operator-tagged descriptor writes its first operand.
        for desc in [
            &ins::NEG,
            &ins::ADD,
            &ins::DIV,
            &ins::BT,
            &ins::TE,
            &ins::SHL,
        ] {
            assert!(desc.operand_types[0].is_write());
        }
    }

    #[test]
    fn test_volatile_set() {
        for desc in [&ins::VEMIT, &ins::VPINR, &ins::VPINW, &ins::VEXIT, &ins::VXCALL] {
            assert!(desc.is_volatile);
        }
        assert!(!ins::NOP.is_volatile);
    }
}
