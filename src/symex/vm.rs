//! The symbolic virtual machine.
//!
//! [`Vm`] is the interface between IR instructions and a symbolic state:
//! four storage accessors plus a default [`Vm::execute`] implementing the
//! per-opcode semantics. [`SymbolicVm`] supplies the canonical state
//! (bitmapped register cells and a pointer-keyed memory store);
//! [`LambdaVm`] wraps any machine with an execution hook, which is how
//! rewriting passes stop the machine at instructions they cannot reorder.
//!
//! # Register state
//!
//! Each written register is tracked as a 64-bit bitmap of written bits plus
//! a sparse list of partial writes keyed by least-significant-bit position.
//! The bitmap's set bits always correspond exactly to bits backed by list
//! entries. Reads compose the written pieces with entry-value variables
//! filling the gaps.
//!
//! # Memory state
//!
//! Memory is keyed by [`Pointer`] in normalized `base + constant` form.
//! Reads and writes that cannot be decided against the existing cells (a
//! partial overlap, or an unknown base relation) fail with
//! [`ExitReason::AliasFailure`]; the caller treats the instruction as a
//! barrier. Cells whose pointers are equal only modulo deeper
//! simplification are deliberately kept apart (no merge).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use strum::{EnumCount, EnumIter};

use crate::arch::{RegisterDesc, RegisterId, WORD_BITS};
use crate::ir::{ins, Instruction, InstructionDesc, Operand, OperandType};
use crate::symex::{simplify, Expr, ExprRef, MathOp, Pointer, Variable};

/// Why the virtual machine stopped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter, Serialize,
)]
pub enum ExitReason {
    /// The instruction executed successfully.
    None,
    /// The instruction stream ended; produced by [`Vm::run`] only.
    StreamEnd,
    /// A memory access could not be resolved against the symbolic store.
    AliasFailure,
    /// A composite operand wider than 64 bits was encountered.
    HighArithmetic,
    /// The opcode has no virtual machine semantics.
    UnknownInstruction,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::StreamEnd => "stream_end",
            Self::AliasFailure => "alias_failure",
            Self::HighArithmetic => "high_arithmetic",
            Self::UnknownInstruction => "unknown_instruction",
        })
    }
}

/// Per-register symbolic state: a write bitmap plus the partial writes.
#[derive(Debug, Clone, Default)]
pub struct RegisterCell {
    /// Bit `k` is set iff bit `k` of the register has been written.
    pub bitmap: u64,
    /// Partial writes keyed by least-significant-bit position; entries
    /// never overlap and back exactly the bits set in `bitmap`.
    pub linear: BTreeMap<u32, ExprRef>,
}

impl RegisterCell {
    /// Width of the written region: one past the highest written bit.
    #[must_use]
    pub fn written_width(&self) -> Option<u32> {
        self.linear
            .iter()
            .map(|(&lsb, expr)| lsb + expr.width())
            .max()
    }
}

/// The symbolic memory store.
///
/// Cells are kept in insertion order so downstream consumers observe a
/// deterministic sequence. Pointers that would only compare equal after
/// deeper simplification are not merged; a merge pass would slot in at
/// [`MemoryState::store`].
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    cells: Vec<(Pointer, ExprRef)>,
}

impl MemoryState {
    /// The stored cells in insertion order.
    #[must_use]
    pub fn cells(&self) -> &[(Pointer, ExprRef)] {
        &self.cells
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` if no cell is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn clear(&mut self) {
        self.cells.clear();
    }

    fn store(&mut self, pointer: Pointer, value: ExprRef) {
        if let Some(cell) = self
            .cells
            .iter_mut()
            .find(|(key, existing)| key == &pointer && existing.width() == value.width())
        {
            cell.1 = value;
        } else {
            self.cells.push((pointer, value));
        }
    }
}

/// Storage interface plus the instruction semantics of the machine.
pub trait Vm {
    /// Reads a register slice as an expression.
    fn read_register(&mut self, reg: &RegisterDesc) -> ExprRef;

    /// Writes an expression to a register slice.
    fn write_register(&mut self, reg: &RegisterDesc, value: ExprRef);

    /// Reads `bit_count` bits behind a symbolic address.
    ///
    /// `None` means the access could not be resolved against the store.
    fn read_memory(&mut self, address: &ExprRef, bit_count: u32) -> Option<ExprRef>;

    /// Writes a value behind a symbolic address.
    ///
    /// `false` means the access could not be resolved against the store.
    fn write_memory(&mut self, address: &ExprRef, value: ExprRef) -> bool;

    /// Executes one instruction against the state.
    fn execute(&mut self, instruction: &Instruction) -> ExitReason {
        default_execute(self, instruction)
    }

    /// Executes from `start` until an instruction fails or the stream ends.
    ///
    /// Returns the halting index together with the reason;
    /// [`ExitReason::StreamEnd`] carries the stream length as its index.
    fn run(&mut self, instructions: &[Instruction], start: usize) -> (usize, ExitReason) {
        let mut index = start;
        while index < instructions.len() {
            let reason = self.execute(&instructions[index]);
            if reason != ExitReason::None {
                return (index, reason);
            }
            index += 1;
        }
        (instructions.len(), ExitReason::StreamEnd)
    }
}

/// Converts an operand into an expression against the machine state.
///
/// Registers are traced through the state; reads of the stack pointer add
/// the instruction's entry delta. Immediates become constants of their
/// declared width.
fn operand_expr<V: Vm + ?Sized>(
    vm: &mut V,
    instruction: &Instruction,
    index: usize,
) -> ExprRef {
    match &instruction.operands[index] {
        Operand::Reg(reg) => {
            let value = vm.read_register(reg);
            if reg.is_stack_pointer() {
                Expr::binary(
                    value,
                    MathOp::Add,
                    Expr::constant_i64(instruction.sp_offset, WORD_BITS),
                )
            } else {
                value
            }
        }
        Operand::Imm(imm) => Expr::constant(imm.uval(), imm.bit_count),
    }
}

/// The per-opcode semantics shared by every machine.
fn default_execute<V: Vm + ?Sized>(vm: &mut V, instruction: &Instruction) -> ExitReason {
    let desc = instruction.desc;

    // mov / movsx: resize into the destination.
    if InstructionDesc::same(desc, &ins::MOV) || InstructionDesc::same(desc, &ins::MOVSX) {
        let signed = InstructionDesc::same(desc, &ins::MOVSX);
        let dst = *instruction.operands[0].reg();
        let value = Expr::resize(&operand_expr(vm, instruction, 1), dst.bit_count, signed);
        vm.write_register(&dst, value);
        return ExitReason::None;
    }

    // ldd: the pointer is built without the stack delta wrapper so raw
    // pointer identity is preserved.
    if InstructionDesc::same(desc, &ins::LDD) {
        let dst = *instruction.operands[0].reg();
        let (base, offset) = instruction.memory_location();
        let base = *base;
        let address = Expr::binary(
            vm.read_register(&base),
            MathOp::Add,
            Expr::constant_i64(offset, WORD_BITS),
        );
        return match vm.read_memory(&address, dst.bit_count) {
            Some(value) => {
                vm.write_register(&dst, Expr::resize(&value, dst.bit_count, false));
                ExitReason::None
            }
            None => ExitReason::AliasFailure,
        };
    }

    // str: byte-align the source upward, same raw pointer rule as ldd.
    if InstructionDesc::same(desc, &ins::STR) {
        let aligned = (instruction.operands[2].bit_count() + 7) & !7;
        let value = Expr::resize(&operand_expr(vm, instruction, 2), aligned, false);
        let (base, offset) = instruction.memory_location();
        let base = *base;
        let address = Expr::binary(
            vm.read_register(&base),
            MathOp::Add,
            Expr::constant_i64(offset, WORD_BITS),
        );
        return if vm.write_memory(&address, value) {
            ExitReason::None
        } else {
            ExitReason::AliasFailure
        };
    }

    // Pure operators, dispatched on descriptor arity.
    if let Some(op) = desc.symbolic_operator {
        let result = match desc.operand_count() {
            // X = F(X)
            1 => Expr::unary(op, operand_expr(vm, instruction, 0)),
            // X = F(X, Y)
            2 => Expr::binary(
                operand_expr(vm, instruction, 0),
                op,
                operand_expr(vm, instruction, 1),
            ),
            // X = F(Y, Z)
            3 if desc.operand_types[0] == OperandType::Write => Expr::binary(
                operand_expr(vm, instruction, 1),
                op,
                operand_expr(vm, instruction, 2),
            ),
            // X = F(Y:X, Z)
            3 => {
                let high = operand_expr(vm, instruction, 1);
                if simplify(&high, false).as_constant() == Some(0) {
                    // Provably zero high half: plain binary operation.
                    Expr::binary(
                        operand_expr(vm, instruction, 0),
                        op,
                        operand_expr(vm, instruction, 2),
                    )
                } else {
                    let low_width = instruction.operands[0].bit_count();
                    let high_width = instruction.operands[1].bit_count();
                    let combined = low_width + high_width;
                    if combined > 64 {
                        return ExitReason::HighArithmetic;
                    }
                    let low = operand_expr(vm, instruction, 0);
                    let stitched = Expr::binary(
                        Expr::resize(&low, combined, false),
                        MathOp::Or,
                        Expr::binary(
                            Expr::resize(&high, combined, false),
                            MathOp::Shl,
                            Expr::constant(u64::from(low_width), 8),
                        ),
                    );
                    Expr::binary(stitched, op, operand_expr(vm, instruction, 2))
                }
            }
            _ => return ExitReason::UnknownInstruction,
        };
        let dst = *instruction.operands[0].reg();
        vm.write_register(&dst, Expr::resize(&result, dst.bit_count, false));
        return ExitReason::None;
    }

    if InstructionDesc::same(desc, &ins::NOP) {
        return ExitReason::None;
    }

    ExitReason::UnknownInstruction
}

/// The canonical symbolic machine state.
#[derive(Debug, Clone, Default)]
pub struct SymbolicVm {
    /// Register file, keyed by storage identity. Iteration order is the
    /// identity order, keeping consumers deterministic.
    pub register_state: BTreeMap<RegisterId, RegisterCell>,
    /// The memory store.
    pub memory_state: MemoryState,
}

impl SymbolicVm {
    /// Creates an empty machine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all register and memory state.
    pub fn reset(&mut self) {
        self.register_state.clear();
        self.memory_state.clear();
    }
}

impl Vm for SymbolicVm {
    fn read_register(&mut self, reg: &RegisterDesc) -> ExprRef {
        let range_start = reg.bit_offset;
        let range_end = reg.bit_offset + reg.bit_count;
        let Some(cell) = self.register_state.get(&reg.id()) else {
            return Expr::register(*reg);
        };

        // Collect written pieces and entry-value gaps covering the range.
        let mut pieces: Vec<(u32, ExprRef)> = Vec::new();
        let mut cursor = range_start;
        for (&lsb, expr) in &cell.linear {
            let entry_end = lsb + expr.width();
            if entry_end <= range_start || lsb >= range_end {
                continue;
            }
            let overlap_start = lsb.max(range_start);
            if overlap_start > cursor {
                let gap = reg.select(overlap_start - cursor, cursor);
                pieces.push((cursor - range_start, Expr::register(gap)));
            }
            let overlap_end = entry_end.min(range_end);
            let mut piece = Arc::clone(expr);
            if overlap_start > lsb {
                piece = Expr::binary(
                    piece,
                    MathOp::Shr,
                    Expr::constant(u64::from(overlap_start - lsb), 8),
                );
            }
            piece = Expr::resize(&piece, overlap_end - overlap_start, false);
            pieces.push((overlap_start - range_start, piece));
            cursor = overlap_end;
        }
        if cursor < range_end {
            let gap = reg.select(range_end - cursor, cursor);
            pieces.push((cursor - range_start, Expr::register(gap)));
        }

        let mut iter = pieces.into_iter();
        let (first_offset, first) = iter.next().expect("non-empty register range");
        let mut acc = {
            let extended = Expr::resize(&first, reg.bit_count, false);
            if first_offset == 0 {
                extended
            } else {
                Expr::binary(
                    extended,
                    MathOp::Shl,
                    Expr::constant(u64::from(first_offset), 8),
                )
            }
        };
        for (offset, piece) in iter {
            let extended = Expr::resize(&piece, reg.bit_count, false);
            let shifted = Expr::binary(
                extended,
                MathOp::Shl,
                Expr::constant(u64::from(offset), 8),
            );
            acc = Expr::binary(acc, MathOp::Or, shifted);
        }
        acc
    }

    fn write_register(&mut self, reg: &RegisterDesc, value: ExprRef) {
        assert!(reg.is_valid(), "write to invalid register slice: {reg}");
        let value = Expr::resize(&value, reg.bit_count, false);
        let start = reg.bit_offset;
        let end = start + reg.bit_count;
        let cell = self.register_state.entry(reg.id()).or_default();

        // Split every overlapped entry around the written range.
        let overlapping: Vec<(u32, ExprRef)> = cell
            .linear
            .range(..end)
            .filter(|(&lsb, expr)| lsb + expr.width() > start)
            .map(|(&lsb, expr)| (lsb, Arc::clone(expr)))
            .collect();
        for (lsb, expr) in overlapping {
            cell.linear.remove(&lsb);
            let width = expr.width();
            if lsb < start {
                cell.linear
                    .insert(lsb, Expr::resize(&expr, start - lsb, false));
            }
            if lsb + width > end {
                let kept = lsb + width - end;
                let high = Expr::binary(
                    expr,
                    MathOp::Shr,
                    Expr::constant(u64::from(end - lsb), 8),
                );
                cell.linear.insert(end, Expr::resize(&high, kept, false));
            }
        }

        cell.linear.insert(start, value);
        cell.bitmap |= reg.bit_mask();
    }

    fn read_memory(&mut self, address: &ExprRef, bit_count: u32) -> Option<ExprRef> {
        let pointer = Pointer::new(address);
        let bytes = bit_count.div_ceil(8);
        for (key, value) in self.memory_state.cells() {
            let cell_bytes = value.width().div_ceil(8);
            if let Some(delta) = key.distance(&pointer) {
                // Same base: fully contained reads compose, partial
                // overlaps do not.
                let contained_shift = u32::try_from(delta)
                    .ok()
                    .and_then(|d| d.checked_mul(8))
                    .filter(|bits| {
                        bits.checked_add(bit_count)
                            .is_some_and(|total| total <= value.width())
                    });
                if let Some(shift) = contained_shift {
                    let shifted = if shift == 0 {
                        Arc::clone(value)
                    } else {
                        Expr::binary(
                            Arc::clone(value),
                            MathOp::Shr,
                            Expr::constant(u64::from(shift), 16),
                        )
                    };
                    return Some(Expr::resize(&shifted, bit_count, false));
                }
                if key.may_overlap(cell_bytes, &pointer, bytes) {
                    return None;
                }
            } else if key.may_overlap(cell_bytes, &pointer, bytes) {
                return None;
            }
        }
        Some(Expr::variable(Variable::Memory { pointer, bit_count }))
    }

    fn write_memory(&mut self, address: &ExprRef, value: ExprRef) -> bool {
        let pointer = Pointer::new(address);
        let bytes = value.width().div_ceil(8);
        for (key, existing) in self.memory_state.cells() {
            let cell_bytes = existing.width().div_ceil(8);
            if key.distance(&pointer) == Some(0) && existing.width() == value.width() {
                continue;
            }
            if key.may_overlap(cell_bytes, &pointer, bytes) {
                return false;
            }
        }
        self.memory_state.store(pointer, value);
        true
    }
}

/// A machine wrapper with a hook observing every executed instruction.
///
/// The hook runs before the wrapped machine; returning `Some` short-circuits
/// execution with that reason. Rewriting passes use this to halt at
/// instructions they must treat as barriers.
pub struct LambdaVm<V: Vm> {
    /// The wrapped machine.
    pub vm: V,
    /// Pre-execution hook.
    pub execute_hook: Option<Box<dyn Fn(&Instruction) -> Option<ExitReason> + Send + Sync>>,
}

impl<V: Vm> LambdaVm<V> {
    /// Wraps a machine with no hook installed.
    #[must_use]
    pub fn new(vm: V) -> Self {
        Self {
            vm,
            execute_hook: None,
        }
    }

    /// Installs the execution hook.
    #[must_use]
    pub fn with_execute_hook(
        mut self,
        hook: impl Fn(&Instruction) -> Option<ExitReason> + Send + Sync + 'static,
    ) -> Self {
        self.execute_hook = Some(Box::new(hook));
        self
    }
}

impl<V: Vm> Vm for LambdaVm<V> {
    fn read_register(&mut self, reg: &RegisterDesc) -> ExprRef {
        self.vm.read_register(reg)
    }

    fn write_register(&mut self, reg: &RegisterDesc, value: ExprRef) {
        self.vm.write_register(reg, value);
    }

    fn read_memory(&mut self, address: &ExprRef, bit_count: u32) -> Option<ExprRef> {
        self.vm.read_memory(address, bit_count)
    }

    fn write_memory(&mut self, address: &ExprRef, value: ExprRef) -> bool {
        self.vm.write_memory(address, value)
    }

    fn execute(&mut self, instruction: &Instruction) -> ExitReason {
        if let Some(hook) = &self.execute_hook {
            if let Some(reason) = hook(instruction) {
                return reason;
            }
        }
        self.vm.execute(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::RegisterDesc;
    use crate::ir::Operand;
    use crate::symex::expr_equals;

    fn vr(id: u64) -> RegisterDesc {
        RegisterDesc::virt(id, 64)
    }

    fn exec(vm: &mut SymbolicVm, instruction: Instruction) -> ExitReason {
        vm.execute(&instruction)
    }

    #[test]
    fn test_mov_immediate() {
        let mut vm = SymbolicVm::new();
        assert_eq!(
            exec(&mut vm, Instruction::mov(vr(0), Operand::imm(42, 64))),
            ExitReason::None
        );
        assert_eq!(vm.read_register(&vr(0)).value(), Some(42));
    }

    #[test]
    fn test_movsx_extends() {
        let mut vm = SymbolicVm::new();
        exec(&mut vm, Instruction::movsx(vr(0), Operand::imm(-1, 8)));
        assert_eq!(vm.read_register(&vr(0)).value(), Some(u64::MAX));
        exec(&mut vm, Instruction::mov(vr(1), Operand::imm(-1, 8)));
        assert_eq!(vm.read_register(&vr(1)).value(), Some(0xff));
    }

    #[test]
    fn test_arithmetic_chain() {
        let mut vm = SymbolicVm::new();
        exec(&mut vm, Instruction::mov(vr(0), Operand::imm(10, 64)));
        exec(
            &mut vm,
            Instruction::new(&ins::ADD, vec![vr(0).into(), Operand::imm(32, 64)]),
        );
        exec(
            &mut vm,
            Instruction::new(&ins::SHL, vec![vr(0).into(), Operand::imm(1, 64)]),
        );
        assert_eq!(
            crate::symex::simplify(&vm.read_register(&vr(0)), false).value(),
            Some(84)
        );
    }

    #[test]
    fn test_partial_write_composition() {
        let mut vm = SymbolicVm::new();
        let low = vr(0).select(8, 0);
        exec(&mut vm, Instruction::mov(low, Operand::imm(0xab, 8)));

        // Unwritten high bits read as the entry value.
        let whole = vm.read_register(&vr(0));
        let cell = &vm.register_state[&vr(0).id()];
        assert_eq!(cell.bitmap, 0xff);
        assert_eq!(cell.written_width(), Some(8));

        // Low byte reads back the constant.
        assert_eq!(vm.read_register(&low).value(), Some(0xab));

        // The composition's high bits equal the original register's.
        let original_high = Expr::binary(
            Expr::register(vr(0)),
            MathOp::Shr,
            Expr::constant(8, 8),
        );
        let composed_high =
            Expr::binary(whole, MathOp::Shr, Expr::constant(8, 8));
        assert!(expr_equals(&composed_high, &original_high));
    }

    #[test]
    fn test_overlapping_writes_split() {
        let mut vm = SymbolicVm::new();
        exec(&mut vm, Instruction::mov(vr(0), Operand::imm(0x1122_3344, 64)));
        let mid = vr(0).select(8, 8);
        exec(&mut vm, Instruction::mov(mid, Operand::imm(0xff, 8)));
        assert_eq!(
            crate::symex::simplify(&vm.read_register(&vr(0)), true).value(),
            Some(0x1122_ff44)
        );
    }

    #[test]
    fn test_stack_store_load_roundtrip() {
        let mut vm = SymbolicVm::new();
        let sp = RegisterDesc::stack_pointer();
        exec(&mut vm, Instruction::mov(vr(1), Operand::imm(0xdead, 64)));
        assert_eq!(
            exec(&mut vm, Instruction::str(sp, -8, vr(1))),
            ExitReason::None
        );
        assert_eq!(
            exec(&mut vm, Instruction::ldd(vr(2), sp, -8)),
            ExitReason::None
        );
        assert_eq!(
            crate::symex::simplify(&vm.read_register(&vr(2)), false).value(),
            Some(0xdead)
        );
    }

    #[test]
    fn test_unresolvable_aliasing() {
        let mut vm = SymbolicVm::new();
        // Two stores through unrelated non-stack bases cannot be ordered.
        assert_eq!(
            exec(&mut vm, Instruction::str(vr(0), 0, vr(5))),
            ExitReason::None
        );
        assert_eq!(
            exec(&mut vm, Instruction::str(vr(1), 0, vr(6))),
            ExitReason::AliasFailure
        );
        // A stack store is provably distinct from both.
        let sp = RegisterDesc::stack_pointer();
        assert_eq!(
            exec(&mut vm, Instruction::str(sp, -16, vr(7))),
            ExitReason::None
        );
    }

    #[test]
    fn test_untouched_memory_reads_as_variable() {
        let mut vm = SymbolicVm::new();
        exec(&mut vm, Instruction::mov(vr(0), Operand::imm(0x3038, 64)));
        assert_eq!(
            exec(&mut vm, Instruction::ldd(vr(1), vr(0), 0)),
            ExitReason::None
        );
        let value = vm.read_register(&vr(1));
        match &*value {
            Expr::Var {
                var: Variable::Memory { bit_count, .. },
            } => assert_eq!(*bit_count, 64),
            other => panic!("expected memory variable, got {other:?}"),
        }
    }

    #[test]
    fn test_wide_pair_division() {
        let mut vm = SymbolicVm::new();
        exec(&mut vm, Instruction::mov(vr(0), Operand::imm(100, 64)));
        // Zero high half reduces to a plain division.
        let div = Instruction::new(
            &ins::DIV,
            vec![vr(0).into(), Operand::imm(0, 64), Operand::imm(7, 64)],
        );
        assert_eq!(exec(&mut vm, div), ExitReason::None);
        assert_eq!(
            crate::symex::simplify(&vm.read_register(&vr(0)), false).value(),
            Some(14)
        );

        // A 64:64 pair with a non-zero high half exceeds the domain.
        let div = Instruction::new(
            &ins::DIV,
            vec![vr(0).into(), Operand::imm(1, 64), Operand::imm(7, 64)],
        );
        assert_eq!(exec(&mut vm, div), ExitReason::HighArithmetic);
    }

    #[test]
    fn test_narrow_pair_division_stitches() {
        let mut vm = SymbolicVm::new();
        let lo = RegisterDesc::virt(0, 32);
        let hi = RegisterDesc::virt(1, 32);
        exec(&mut vm, Instruction::mov(lo, Operand::imm(0, 32)));
        exec(&mut vm, Instruction::mov(hi, Operand::imm(1, 32)));
        // 1:0 / 16 == 0x1000_0000 over a 32-bit low half.
        let div = Instruction::new(
            &ins::DIV,
            vec![lo.into(), hi.into(), Operand::imm(16, 32)],
        );
        assert_eq!(exec(&mut vm, div), ExitReason::None);
        assert_eq!(
            crate::symex::simplify(&vm.read_register(&lo), false).value(),
            Some(0x1000_0000)
        );
    }

    #[test]
    fn test_unknown_instruction() {
        let mut vm = SymbolicVm::new();
        let exit = Instruction::new(&ins::VEXIT, vec![Operand::imm(0, 64)]);
        assert_eq!(exec(&mut vm, exit), ExitReason::UnknownInstruction);
    }

    #[test]
    fn test_run_stops_at_barrier() {
        let mut vm = SymbolicVm::new();
        let stream = vec![
            Instruction::mov(vr(0), Operand::imm(1, 64)),
            Instruction::mov(vr(1), Operand::imm(2, 64)),
            Instruction::new(&ins::VEXIT, vec![Operand::imm(0, 64)]),
        ];
        let (index, reason) = vm.run(&stream, 0);
        assert_eq!((index, reason), (2, ExitReason::UnknownInstruction));

        vm.reset();
        let stream = vec![Instruction::mov(vr(0), Operand::imm(1, 64))];
        assert_eq!(vm.run(&stream, 0), (1, ExitReason::StreamEnd));
    }

    #[test]
    fn test_lambda_hook_short_circuits() {
        let mut vm = LambdaVm::new(SymbolicVm::new()).with_execute_hook(|instruction| {
            instruction
                .desc
                .is_branching()
                .then_some(ExitReason::UnknownInstruction)
        });
        assert_eq!(
            vm.execute(&Instruction::mov(vr(0), Operand::imm(1, 64))),
            ExitReason::None
        );
        let jmp = Instruction::new(&ins::JMP, vec![Operand::imm(0x2000, 64)]);
        assert_eq!(vm.execute(&jmp), ExitReason::UnknownInstruction);
        assert_eq!(vm.vm.read_register(&vr(0)).value(), Some(1));
    }
}
