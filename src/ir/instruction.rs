//! The instruction word.

use std::fmt;

use crate::arch::{RegisterDesc, Vip, VIP_INVALID, WORD_BITS};
use crate::ir::{ins, Immediate, InstructionDesc, Operand};

/// One IR instruction: a descriptor, its operands and the stack pointer
/// bookkeeping of the position it sits at.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// The opcode descriptor.
    pub desc: &'static InstructionDesc,
    /// Operand list; the length always matches the descriptor.
    pub operands: Vec<Operand>,
    /// Source virtual instruction pointer, [`VIP_INVALID`] when synthetic.
    pub vip: Vip,
    /// Stack pointer delta in bytes entering this instruction.
    pub sp_offset: i64,
    /// Stack instance index; offsets are only comparable within one index.
    pub sp_index: u32,
    /// Whether the stack pointer was reset by this instruction, making
    /// earlier stack-relative references incomparable.
    pub sp_reset: bool,
    /// Volatility requested by the producer on top of the descriptor.
    pub explicit_volatile: bool,
}

impl Instruction {
    /// Creates an instruction with zeroed stack bookkeeping.
    #[must_use]
    pub fn new(desc: &'static InstructionDesc, operands: Vec<Operand>) -> Self {
        Self {
            desc,
            operands,
            vip: VIP_INVALID,
            sp_offset: 0,
            sp_index: 0,
            sp_reset: false,
            explicit_volatile: false,
        }
    }

    /// Tags the instruction with its source virtual instruction pointer.
    #[must_use]
    pub fn with_vip(mut self, vip: Vip) -> Self {
        self.vip = vip;
        self
    }

    /// Marks the instruction volatile regardless of its descriptor.
    #[must_use]
    pub fn volatile(mut self) -> Self {
        self.explicit_volatile = true;
        self
    }

    /// Returns `true` if the instruction must not be reordered or removed.
    #[must_use]
    pub fn is_volatile(&self) -> bool {
        self.explicit_volatile || self.desc.is_volatile
    }

    /// Resolved access size of the instruction in bits, `0` when the
    /// instruction has no sized access.
    #[must_use]
    pub fn access_size(&self) -> u32 {
        match self.desc.access_size_index {
            0 => 0,
            i if i > 0 => self.operands[i as usize - 1].bit_count(),
            i => {
                let index = (-i) as usize - 1;
                self.operands[index]
                    .as_imm()
                    .map_or(0, |imm| u32::try_from(imm.uval()).unwrap_or(0))
            }
        }
    }

    /// Base register and byte offset of the referenced memory location.
    ///
    /// # Panics
    ///
    /// Panics if the instruction does not access memory.
    #[must_use]
    pub fn memory_location(&self) -> (&RegisterDesc, i64) {
        let base = self
            .desc
            .memory_operand_index
            .expect("instruction does not access memory");
        (
            self.operands[base].reg(),
            self.operands[base + 1].as_imm().map_or(0, Immediate::ival),
        )
    }

    /// Returns `true` if the instruction satisfies every structural
    /// invariant of its descriptor.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        // Operand count matches the descriptor.
        if self.operands.len() != self.desc.operand_count() {
            return false;
        }

        // Operands are well formed and obey their slot discipline.
        for (operand, ty) in self.operands.iter().zip(self.desc.operand_types) {
            if !operand.is_valid() {
                return false;
            }
            if *ty == crate::ir::OperandType::ReadImm && !operand.is_immediate() {
                return false;
            }
            if ty.requires_register() && !operand.is_register() {
                return false;
            }
        }

        // A size encoded in an operand must be an immediate.
        if self.desc.access_size_index < 0 {
            let index = (-self.desc.access_size_index) as usize - 1;
            if !self.operands[index].is_immediate() {
                return false;
            }
        }

        // Memory operands: full-width base register, immediate offset and a
        // byte-granular nonzero access size.
        if let Some(base) = self.desc.memory_operand_index {
            let mem_base = &self.operands[base];
            let mem_offset = &self.operands[base + 1];
            if !mem_base.is_register() || mem_base.bit_count() != WORD_BITS {
                return false;
            }
            if !mem_offset.is_immediate() {
                return false;
            }
            let size = self.access_size();
            if size == 0 || size % 8 != 0 {
                return false;
            }
        }

        // Branch targets are immediates or full-width registers.
        for list in [self.desc.branch_operands_rip, self.desc.branch_operands_vip] {
            for &index in list {
                let target = &self.operands[index];
                if !target.is_immediate() && target.bit_count() != WORD_BITS {
                    return false;
                }
            }
        }
        true
    }

    /// Invokes `f` for every register operand that the instruction reads.
    pub fn for_each_read_register(&self, mut f: impl FnMut(&RegisterDesc)) {
        for (operand, ty) in self.operands.iter().zip(self.desc.operand_types) {
            if ty.is_read() {
                if let Operand::Reg(reg) = operand {
                    f(reg);
                }
            }
        }
    }

    /// Invokes `f` for every register operand that the instruction writes.
    pub fn for_each_written_register(&self, mut f: impl FnMut(&RegisterDesc)) {
        for (operand, ty) in self.operands.iter().zip(self.desc.operand_types) {
            if ty.is_write() {
                if let Operand::Reg(reg) = operand {
                    f(reg);
                }
            }
        }
    }

    /// Returns `true` if any written operand exists.
    #[must_use]
    pub fn writes_registers(&self) -> bool {
        self.desc.operand_types.iter().any(|ty| ty.is_write())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8}", self.desc.name)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            } else {
                write!(f, " ")?;
            }
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

/// Shorthand constructors for the common instruction shapes.
impl Instruction {
    /// `mov dst, src`.
    #[must_use]
    pub fn mov(dst: impl Into<Operand>, src: impl Into<Operand>) -> Self {
        Self::new(&ins::MOV, vec![dst.into(), src.into()])
    }

    /// `movsx dst, src`.
    #[must_use]
    pub fn movsx(dst: impl Into<Operand>, src: impl Into<Operand>) -> Self {
        Self::new(&ins::MOVSX, vec![dst.into(), src.into()])
    }

    /// `str base, offset, src`.
    #[must_use]
    pub fn str(base: RegisterDesc, offset: i64, src: impl Into<Operand>) -> Self {
        Self::new(
            &ins::STR,
            vec![base.into(), Operand::imm(offset, WORD_BITS), src.into()],
        )
    }

    /// `ldd dst, base, offset`.
    #[must_use]
    pub fn ldd(dst: RegisterDesc, base: RegisterDesc, offset: i64) -> Self {
        Self::new(
            &ins::LDD,
            vec![dst.into(), base.into(), Operand::imm(offset, WORD_BITS)],
        )
    }
}
