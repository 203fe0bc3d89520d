//! Symbolic rewrite pass.
//!
//! Replays each block through the symbolic machine region by region, where
//! a region ends at any instruction the machine cannot reorder across
//! (branches, volatile instructions, stack resets, volatile register
//! traffic). The machine's final register and memory deltas are then
//! re-emitted as the minimal store sequence reproducing them; the barrier
//! is copied verbatim and the machine restarts behind it. The rewritten
//! stream replaces the original only when it is strictly smaller, unless
//! the pass is forced.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::arch::{RegisterDesc, RegisterFlags, RegisterId, WORD_BITS};
use crate::ir::{BasicBlock, Instruction, Operand};
use crate::optimizer::{aux, BatchTranslator, ExecutionOrder, Pass};
use crate::symex::{
    expr_equals, extract_displacement, pack_all, purge_simplifier_cache, simplify, Expr, ExprRef,
    ExitReason, LambdaVm, MathOp, Pointer, SymbolicVm, Variable, Vm,
};

/// Widths the rewriter prefers when a value can safely shrink, ascending.
const PREFERRED_EXPRESSION_SIZES: [u32; 5] = [1, 8, 16, 32, 64];

/// Collapses straight-line regions into their minimal store sequence.
pub struct SymbolicRewritePass {
    force: bool,
}

impl Default for SymbolicRewritePass {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolicRewritePass {
    /// Creates the pass in size-gated mode: a block is only replaced when
    /// the rewritten stream is strictly smaller.
    #[must_use]
    pub fn new() -> Self {
        Self { force: false }
    }

    /// Creates the pass in forced mode: the rewritten stream always
    /// replaces the original, counting zero when it is not smaller.
    #[must_use]
    pub fn forced() -> Self {
        Self { force: true }
    }

    fn rewrite(&self, block: &mut BasicBlock) -> usize {
        let mut vm = LambdaVm::new(SymbolicVm::new()).with_execute_hook(|instruction| {
            // Halt at anything that cannot execute out of order.
            if instruction.desc.is_branching()
                || instruction.is_volatile()
                || instruction.sp_reset
            {
                return Some(ExitReason::UnknownInstruction);
            }
            // Volatile register traffic pins the instruction too, except
            // the undefined-value register which carries no state.
            for operand in &instruction.operands {
                if let Operand::Reg(reg) = operand {
                    if reg.is_volatile() && !reg.is_undefined() {
                        return Some(ExitReason::UnknownInstruction);
                    }
                }
            }
            None
        });

        let mut scratch = BasicBlock::detached(block.vip(), block.arch());
        scratch.set_last_temporary_index(block.last_temporary_index());

        let length = block.len();
        let mut cursor = 0usize;
        loop {
            let (limit, _reason) = vm.run(block.instructions(), cursor);

            let mut buffer: Vec<Instruction> = Vec::new();
            {
                let mut translator = BatchTranslator::new(&mut scratch);

                // Register deltas, in storage identity order.
                let written: Vec<(RegisterId, u32)> = vm
                    .vm
                    .register_state
                    .iter()
                    .filter_map(|(id, cell)| cell.written_width().map(|w| (*id, w)))
                    .collect();
                for (id, written_width) in written {
                    let mut key = RegisterDesc {
                        flags: RegisterFlags::from_bits_retain(id.flags),
                        combined_id: id.combined_id,
                        bit_count: written_width,
                        bit_offset: 0,
                    };
                    // Writes to the undefined-value register carry no state.
                    if key.is_undefined() {
                        continue;
                    }

                    let mut value = simplify(&vm.vm.read_register(&key), false);
                    let initial = Expr::register(key);

                    // Unchanged or unobserved state is not re-emitted.
                    if expr_equals(&value, &initial) {
                        continue;
                    }
                    if !aux::is_used_downstream(block, limit, &key) {
                        continue;
                    }

                    // Progressive down-sizing against the entry value.
                    for &size in &PREFERRED_EXPRESSION_SIZES {
                        if size >= value.width() {
                            break;
                        }
                        if high_bits_match(&value, &initial, size) {
                            key.bit_count = size;
                            value = Expr::resize(&value, size, false);
                            break;
                        }
                    }

                    // Partially inherited flags registers move bit by bit.
                    if key.is_flags() && key.bit_count != WORD_BITS {
                        for bit in 0..key.bit_count {
                            let sub = simplify(&Expr::bit(&value, bit), true);
                            let sub0 = simplify(&Expr::bit(&initial, bit), true);
                            if sub == sub0 {
                                continue;
                            }
                            let packed = pack_all(&sub);
                            let slot = key.select(1, key.bit_offset + bit);
                            let operand = translator.translate(&packed);
                            buffer.push(Instruction::mov(slot, operand));
                        }
                        continue;
                    }

                    assert!(
                        !key.is_stack_pointer() && !key.is_read_only(),
                        "rewrite produced a write to {key}"
                    );

                    let value = pack_all(&simplify(&value, true));
                    let operand = translator.translate(&value);
                    buffer.push(Instruction::mov(key, operand));
                }

                // Memory deltas, in store order.
                let cells: Vec<(Pointer, ExprRef)> = vm.vm.memory_state.cells().to_vec();
                for (pointer, value) in cells {
                    let mut value = simplify(&value, false);
                    let initial = Expr::variable(Variable::Memory {
                        pointer: pointer.clone(),
                        bit_count: value.width(),
                    });
                    if expr_equals(&value, &initial) {
                        continue;
                    }

                    for &size in &PREFERRED_EXPRESSION_SIZES {
                        if size % 8 != 0 {
                            continue;
                        }
                        if size >= value.width() {
                            break;
                        }
                        if high_bits_match(&value, &initial, size) {
                            value = Expr::resize(&value, size, false);
                            break;
                        }
                    }

                    let value = pack_all(&simplify(&value, true));
                    let operand = translator.translate(&value);

                    if let Some(sp) = as_plain_stack_pointer(pointer.base()) {
                        // The address is $sp + constant.
                        buffer.push(Instruction::str(sp, pointer.offset(), operand));
                    } else {
                        // Extract any residual displacement, then force the
                        // base into a register.
                        let base = pack_all(&simplify(pointer.base(), true));
                        let (base, extra) = extract_displacement(&base);
                        let base_operand = translator.translate(&base);
                        let base_reg = translator.to_register(base_operand);
                        buffer.push(Instruction::str(
                            base_reg,
                            pointer.offset() + extra,
                            operand,
                        ));
                    }
                }
            }

            flush_buffer(&mut scratch, buffer);

            if limit < length {
                // Copy the barrier verbatim and resume behind it.
                scratch.np_push(block.instructions()[limit].clone());
                cursor = limit + 1;
                let (sp_offset, sp_index) = match block.instructions().get(cursor) {
                    Some(next) => (next.sp_offset, next.sp_index),
                    None => (block.sp_offset(), block.sp_index()),
                };
                scratch.set_sp_state(sp_offset, sp_index);
                vm.vm.reset();
            } else {
                break;
            }
        }

        // Block iterators changed identity; cached simplifications keyed
        // under the old context go with them.
        purge_simplifier_cache();

        let shrunk = block.len() as isize - scratch.len() as isize;
        if shrunk <= 0 && !self.force {
            return 0;
        }
        block.assign(scratch);
        shrunk.max(0) as usize
    }
}

/// Whether every bit of `value` and `initial` above `size` matches.
fn high_bits_match(value: &ExprRef, initial: &ExprRef, size: u32) -> bool {
    let amount = Expr::constant(u64::from(size), 8);
    let value_high = Expr::binary(value.clone(), MathOp::Shr, amount.clone());
    let initial_high = Expr::binary(initial.clone(), MathOp::Shr, amount);
    expr_equals(&value_high, &initial_high)
}

/// Matches a base expression that is exactly the full stack pointer.
fn as_plain_stack_pointer(base: &ExprRef) -> Option<RegisterDesc> {
    if let Expr::Var {
        var: Variable::Register(reg),
    } = &**base
    {
        if reg.is_stack_pointer() && reg.bit_offset == 0 && reg.bit_count == WORD_BITS {
            return Some(*reg);
        }
    }
    None
}

/// Emits the buffered stores into the scratch block, snapshotting any
/// source register that another buffered store overwrites.
///
/// Buffered values reference region-entry state; without the snapshots a
/// store writing one of those registers earlier in the buffer would be
/// observed by a later store.
fn flush_buffer(scratch: &mut BasicBlock, buffer: Vec<Instruction>) {
    let mut written: FxHashSet<RegisterId> = FxHashSet::default();
    for instruction in &buffer {
        instruction.for_each_written_register(|reg| {
            written.insert(reg.id());
        });
    }

    let mut snapshots: FxHashMap<RegisterDesc, RegisterDesc> = FxHashMap::default();
    let mut prelude: Vec<Instruction> = Vec::new();
    let mut patched = buffer;
    for instruction in &mut patched {
        for (index, ty) in instruction.desc.operand_types.iter().enumerate() {
            if !ty.is_read() {
                continue;
            }
            let Operand::Reg(reg) = instruction.operands[index] else {
                continue;
            };
            if !written.contains(&reg.id()) {
                continue;
            }
            let snapshot = match snapshots.get(&reg) {
                Some(existing) => *existing,
                None => {
                    let tmp = scratch.tmp(reg.bit_count);
                    prelude.push(Instruction::mov(tmp, reg));
                    snapshots.insert(reg, tmp);
                    tmp
                }
            };
            instruction.operands[index] = snapshot.into();
        }
    }

    for instruction in prelude {
        scratch.push(instruction);
    }
    for instruction in patched {
        scratch.push(instruction);
    }
}

impl Pass for SymbolicRewritePass {
    fn name(&self) -> &'static str {
        "symbolic-rewrite"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::Parallel
    }

    fn pass(&self, block: &mut BasicBlock, _cross_block: bool) -> usize {
        self.rewrite(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{amd64, ArchitectureId};
    use crate::ir::ins;

    fn block() -> BasicBlock {
        BasicBlock::detached(0x1000, ArchitectureId::Amd64)
    }

    fn vr(id: u64) -> RegisterDesc {
        RegisterDesc::virt(id, 64)
    }

    #[test]
    fn test_collapses_copy_chain() {
        let mut blk = block();
        let (t0, t1) = (blk.tmp(64), blk.tmp(64));
        blk.push(Instruction::mov(t0, amd64::RCX));
        blk.push(Instruction::new(
            &ins::ADD,
            vec![t0.into(), Operand::imm(1, 64)],
        ));
        blk.push(Instruction::mov(t1, t0));
        blk.push(Instruction::new(
            &ins::ADD,
            vec![t1.into(), Operand::imm(1, 64)],
        ));
        blk.push(Instruction::mov(amd64::RAX, t1));

        let count = SymbolicRewritePass::new().pass(&mut blk, false);
        assert!(count > 0, "expected the chain to shrink");
        assert!(blk.len() < 5);
        for instruction in blk.instructions() {
            assert!(instruction.is_valid());
        }
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let mut blk = block();
        let (t0, t1) = (blk.tmp(64), blk.tmp(64));
        blk.push(Instruction::mov(t0, amd64::RCX));
        blk.push(Instruction::mov(t1, t0));
        blk.push(Instruction::mov(amd64::RAX, t1));

        let pass = SymbolicRewritePass::new();
        let first = pass.pass(&mut blk, false);
        assert!(first > 0);
        let second = pass.pass(&mut blk, false);
        assert_eq!(second, 0, "second application must be a no-op");
    }

    #[test]
    fn test_keeps_original_when_not_smaller() {
        let mut blk = block();
        blk.push(Instruction::mov(amd64::RAX, amd64::RCX));
        let before: Vec<String> = blk.instructions().iter().map(ToString::to_string).collect();
        let count = SymbolicRewritePass::new().pass(&mut blk, false);
        assert_eq!(count, 0);
        let after: Vec<String> = blk.instructions().iter().map(ToString::to_string).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_forced_mode_rewrites_anyway() {
        let mut blk = block();
        blk.push(Instruction::mov(amd64::RAX, amd64::RCX));
        let count = SymbolicRewritePass::forced().pass(&mut blk, false);
        assert_eq!(count, 0);
        assert_eq!(blk.len(), 1);
        assert!(blk.instructions()[0].is_valid());
    }

    #[test]
    fn test_dead_local_state_is_dropped() {
        let mut blk = block();
        let t0 = blk.tmp(64);
        // The temporary dies inside the block; only rax must survive.
        blk.push(Instruction::mov(t0, Operand::imm(1, 64)));
        blk.push(Instruction::new(
            &ins::ADD,
            vec![t0.into(), Operand::imm(2, 64)],
        ));
        blk.push(Instruction::mov(amd64::RAX, t0));

        let count = SymbolicRewritePass::new().pass(&mut blk, false);
        assert!(count > 0);
        assert_eq!(blk.len(), 1);
        assert_eq!(blk.instructions()[0].desc, &ins::MOV);
        assert_eq!(blk.instructions()[0].operands[1], Operand::imm(3, 64));
    }

    #[test]
    fn test_barrier_is_copied_verbatim() {
        let mut blk = block();
        let t0 = blk.tmp(64);
        blk.push(Instruction::mov(t0, Operand::imm(1, 64)));
        blk.push(Instruction::mov(t0, Operand::imm(2, 64)));
        blk.push(Instruction::mov(amd64::RAX, t0));
        blk.push(Instruction::new(&ins::VEXIT, vec![Operand::imm(0, 64)]));

        let count = SymbolicRewritePass::new().pass(&mut blk, false);
        assert!(count > 0);
        let last = blk.instructions().last().unwrap();
        assert_eq!(last.desc, &ins::VEXIT);
    }

    #[test]
    fn test_redundant_stack_stores_collapse() {
        let sp = RegisterDesc::stack_pointer();
        let mut blk = block();
        blk.push(Instruction::str(sp, -8, Operand::imm(1, 64)));
        blk.push(Instruction::str(sp, -8, Operand::imm(2, 64)));
        blk.push(Instruction::str(sp, -8, amd64::RCX));

        let count = SymbolicRewritePass::new().pass(&mut blk, false);
        assert_eq!(count, 2);
        assert_eq!(blk.len(), 1);
        let store = &blk.instructions()[0];
        assert_eq!(store.desc, &ins::STR);
        let (base, offset) = store.memory_location();
        assert!(base.is_stack_pointer());
        assert_eq!(offset, -8);
        assert_eq!(store.operands[2], Operand::Reg(amd64::RCX));
    }

    #[test]
    fn test_register_swap_stays_correct() {
        let mut blk = block();
        let t0 = blk.tmp(64);
        // rax <-> rcx through a temporary.
        blk.push(Instruction::mov(t0, amd64::RAX));
        blk.push(Instruction::mov(amd64::RAX, amd64::RCX));
        blk.push(Instruction::mov(amd64::RCX, t0));

        SymbolicRewritePass::forced().pass(&mut blk, false);

        // Replaying the emitted stream must still produce the swap.
        let mut vm = SymbolicVm::new();
        vm.write_register(&amd64::RAX, Expr::constant(1, 64));
        vm.write_register(&amd64::RCX, Expr::constant(2, 64));
        let (_, reason) = vm.run(blk.instructions(), 0);
        assert_eq!(reason, ExitReason::StreamEnd);
        assert_eq!(
            simplify(&vm.read_register(&amd64::RAX), true).value(),
            Some(2)
        );
        assert_eq!(
            simplify(&vm.read_register(&amd64::RCX), true).value(),
            Some(1)
        );
    }

    #[test]
    fn test_partial_flags_emit_single_bit_moves() {
        let flags = RegisterDesc::flags_reg();
        let mut blk = block();
        blk.push(Instruction::mov(flags.select(1, 6), Operand::imm(1, 1)));
        blk.push(Instruction::mov(amd64::RAX, Operand::imm(5, 64)));

        SymbolicRewritePass::forced().pass(&mut blk, false);

        // One move per changed flag bit; untouched bits are not re-emitted.
        let flag_moves: Vec<_> = blk
            .instructions()
            .iter()
            .filter(|i| {
                i.operands[0]
                    .as_reg()
                    .is_some_and(|r| r.is_flags())
            })
            .collect();
        assert_eq!(flag_moves.len(), 1);
        let slot = flag_moves[0].operands[0].reg();
        assert_eq!((slot.bit_offset, slot.bit_count), (6, 1));
        assert_eq!(flag_moves[0].operands[1], Operand::imm(1, 1));
        assert_eq!(blk.len(), 2);
    }

    #[test]
    fn test_everything_valid_after_rewrite() {
        let mut blk = block();
        let t = blk.tmp(64);
        blk.push(Instruction::mov(t, amd64::RDX));
        blk.push(Instruction::new(
            &ins::XOR,
            vec![t.into(), Operand::imm(0x55, 64)],
        ));
        blk.push(Instruction::new(
            &ins::SHL,
            vec![t.into(), Operand::imm(3, 64)],
        ));
        blk.push(Instruction::mov(amd64::RAX, t));
        SymbolicRewritePass::forced().pass(&mut blk, false);
        for instruction in blk.instructions() {
            assert!(instruction.is_valid(), "invalid: {instruction}");
        }
    }
}
