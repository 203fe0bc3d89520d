//! Fast dead code elimination.
//!
//! [`FastDeadCodeEliminationPass`] removes instructions whose register
//! writes are never observed on any reachable path. Liveness is tracked per
//! register as a 64-bit mask over the reverse CFG: exit blocks start from
//! the externally observable set (calling convention return registers and
//! the stack pointer; a `vexit` additionally exposes the whole physical
//! register file), block transfers walk instructions bottom-up clearing
//! written bits and setting read bits, and live-in sets propagate into
//! predecessors until every block seals. A final forward sweep drops
//! instructions whose writes are entirely dead.
//!
//! Stores, volatile instructions and branches are never removed.
//!
//! [`FastLocalDeadCodeEliminationPass`] is the block-local variant: it
//! assumes everything except block-local storage escapes.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::arch::{RegisterId, Vip};
use crate::ir::{ins, BasicBlock, Instruction, InstructionDesc, Routine};
use crate::optimizer::{ExecutionOrder, Pass};
use crate::utils::lock;

/// Per-register live-bit masks at one program point.
#[derive(Debug, Clone, Default, PartialEq)]
struct LiveState {
    masks: FxHashMap<RegisterId, u64>,
}

impl LiveState {
    fn mask(&self, id: RegisterId) -> u64 {
        self.masks.get(&id).copied().unwrap_or(0)
    }

    fn read(&mut self, id: RegisterId, bits: u64) {
        *self.masks.entry(id).or_default() |= bits;
    }

    fn write(&mut self, id: RegisterId, bits: u64) {
        if let Some(mask) = self.masks.get_mut(&id) {
            *mask &= !bits;
        }
    }

    /// Unions another state in, reporting whether anything changed.
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (&id, &bits) in &other.masks {
            let mask = self.masks.entry(id).or_default();
            if *mask | bits != *mask {
                *mask |= bits;
                changed = true;
            }
        }
        changed
    }
}

/// Registers a routine exposes to the outside world.
struct Observable {
    /// Every physical, flags or stack register id appearing in the routine,
    /// with its full mask; `vexit` exposes all of them.
    physical: Vec<RegisterId>,
    /// Ids and masks observable at a plain routine exit.
    at_exit: Vec<(RegisterId, u64)>,
}

fn collect_observable(routine: &Routine) -> Observable {
    let mut physical: FxHashSet<RegisterId> = FxHashSet::default();
    for block in routine.blocks() {
        let guard = lock(&block);
        for instruction in guard.instructions() {
            for operand in &instruction.operands {
                if let crate::ir::Operand::Reg(reg) = operand {
                    if reg.is_physical() || reg.is_flags() || reg.is_stack_pointer() {
                        physical.insert(reg.id());
                    }
                }
            }
        }
    }

    let convention = routine.convention();
    let mut at_exit: Vec<(RegisterId, u64)> = Vec::new();
    for reg in &convention.retval_registers {
        at_exit.push((reg.id(), reg.bit_mask()));
    }
    let sp = crate::arch::RegisterDesc::stack_pointer();
    at_exit.push((sp.id(), sp.bit_mask()));

    Observable {
        physical: physical.into_iter().collect(),
        at_exit,
    }
}

/// Applies one instruction to the live state, bottom-up.
fn transfer_instruction(
    instruction: &Instruction,
    live: &mut LiveState,
    routine: &Routine,
    observable: &Observable,
) {
    // Calls and exits observe register state beyond their operands.
    if InstructionDesc::same(instruction.desc, &ins::VEXIT) {
        for &id in &observable.physical {
            live.read(id, u64::MAX);
        }
    } else if InstructionDesc::same(instruction.desc, &ins::VXCALL) {
        let convention = routine.convention_for(instruction.vip);
        for reg in &convention.param_registers {
            live.read(reg.id(), reg.bit_mask());
        }
    }

    // Kill writes first, then gen reads; a read-write operand stays live.
    instruction.for_each_written_register(|reg| {
        live.write(reg.id(), reg.bit_mask());
    });
    instruction.for_each_read_register(|reg| {
        live.read(reg.id(), reg.bit_mask());
    });
}

/// Computes the live-in of a block from its live-out.
fn transfer_block(
    block: &BasicBlock,
    out: &LiveState,
    routine: &Routine,
    observable: &Observable,
) -> LiveState {
    let mut live = out.clone();
    for instruction in block.instructions().iter().rev() {
        transfer_instruction(instruction, &mut live, routine, observable);
    }
    live
}

/// Whether the sweep may drop this instruction when its writes are dead.
fn is_removable(instruction: &Instruction) -> bool {
    !instruction.is_volatile()
        && !instruction.desc.is_branching()
        && !instruction.desc.writes_memory()
        && instruction.writes_registers()
}

/// Liveness-driven elimination across the whole CFG.
pub struct FastDeadCodeEliminationPass;

impl Default for FastDeadCodeEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl FastDeadCodeEliminationPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn eliminate(routine: &Routine) -> usize {
        let observable = collect_observable(routine);
        let vips = routine.block_vips();
        if vips.is_empty() {
            return 0;
        }

        // Live-out per block, seeded at the exits.
        let mut live_out: FxHashMap<Vip, LiveState> = vips
            .iter()
            .map(|&vip| (vip, LiveState::default()))
            .collect();
        for vip in routine.get_exits() {
            let state = live_out.entry(vip).or_default();
            for &(id, bits) in &observable.at_exit {
                state.read(id, bits);
            }
        }

        // Reverse fixed point: propagate live-in into predecessors until
        // every block seals.
        let order = routine.get_depth_ordered_list(false);
        let mut sealed: FxHashSet<Vip> = FxHashSet::default();
        let mut worklist: Vec<Vip> = order.iter().map(|p| p.vip).collect();
        let mut guard = vips.len().saturating_mul(64).max(1024);
        while let Some(vip) = worklist.pop() {
            if guard == 0 {
                log::debug!("liveness fixed point guard tripped, sealing early");
                break;
            }
            guard -= 1;

            if sealed.contains(&vip) {
                continue;
            }
            let Some(block) = routine.find_block(vip) else {
                continue;
            };
            let (live_in, predecessors) = {
                let block = lock(&block);
                (
                    transfer_block(&block, &live_out[&vip], routine, &observable),
                    block.predecessors().to_vec(),
                )
            };
            sealed.insert(vip);
            for predecessor in predecessors {
                let out = live_out.entry(predecessor).or_default();
                if out.merge(&live_in) {
                    sealed.remove(&predecessor);
                    worklist.push(predecessor);
                }
            }
        }

        // Forward sweep: drop instructions writing only dead bits.
        let mut removed = 0;
        for vip in vips {
            let Some(block) = routine.find_block(vip) else {
                continue;
            };
            let mut block = lock(&block);
            let mut live = live_out[&vip].clone();
            let mut dead_indices: Vec<usize> = Vec::new();
            for index in (0..block.len()).rev() {
                let instruction = &block.instructions()[index];
                if is_removable(instruction) {
                    let mut observed = false;
                    instruction.for_each_written_register(|reg| {
                        if live.mask(reg.id()) & reg.bit_mask() != 0 {
                            observed = true;
                        }
                    });
                    if !observed {
                        dead_indices.push(index);
                        continue;
                    }
                }
                transfer_instruction(instruction, &mut live, routine, &observable);
            }
            for index in dead_indices {
                block.erase(index);
                removed += 1;
            }
        }
        removed
    }
}

impl Pass for FastDeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "fast-dead-code-elimination"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::Custom
    }

    fn pass(&self, _block: &mut BasicBlock, _cross_block: bool) -> usize {
        0
    }

    fn xpass(&self, routine: &Routine) -> usize {
        Self::eliminate(routine)
    }
}

/// Block-local elimination: everything that is not block-local storage is
/// assumed observed at the block edge.
pub struct FastLocalDeadCodeEliminationPass;

impl Default for FastLocalDeadCodeEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl FastLocalDeadCodeEliminationPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Pass for FastLocalDeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "fast-local-dead-code-elimination"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::Parallel
    }

    fn pass(&self, block: &mut BasicBlock, _cross_block: bool) -> usize {
        // Escaping registers are fully live at the edge; locals are dead.
        let mut live: FxHashMap<RegisterId, u64> = FxHashMap::default();
        let live_mask = |live: &FxHashMap<RegisterId, u64>, reg: &crate::arch::RegisterDesc| {
            live.get(&reg.id()).copied().unwrap_or({
                if reg.is_local() || reg.is_internal() {
                    0
                } else {
                    u64::MAX
                }
            })
        };

        let mut dead_indices: Vec<usize> = Vec::new();
        for index in (0..block.len()).rev() {
            let instruction = &block.instructions()[index];
            if is_removable(instruction) {
                let mut observed = false;
                instruction.for_each_written_register(|reg| {
                    if live_mask(&live, reg) & reg.bit_mask() != 0 {
                        observed = true;
                    }
                });
                if !observed {
                    dead_indices.push(index);
                    continue;
                }
            }
            // Kill writes first so read-write operands stay live.
            let mut writes: Vec<crate::arch::RegisterDesc> = Vec::new();
            let mut reads: Vec<crate::arch::RegisterDesc> = Vec::new();
            instruction.for_each_written_register(|reg| writes.push(*reg));
            instruction.for_each_read_register(|reg| reads.push(*reg));
            for reg in writes {
                let current = live_mask(&live, &reg);
                live.insert(reg.id(), current & !reg.bit_mask());
            }
            for reg in reads {
                let current = live_mask(&live, &reg);
                live.insert(reg.id(), current | reg.bit_mask());
            }
        }

        let removed = dead_indices.len();
        for index in dead_indices {
            block.erase(index);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{amd64, ArchitectureId, RegisterDesc};
    use crate::ir::Operand;

    fn vr(id: u64) -> RegisterDesc {
        RegisterDesc::virt(id, 64)
    }

    fn exit_block(routine: &Routine, vip: Vip) {
        let block = routine.find_block(vip).unwrap();
        lock(&block).push(Instruction::new(
            &ins::VEXIT,
            vec![Operand::imm(0, 64)],
        ));
    }

    #[test]
    fn test_dead_virtual_write_removed() {
        let rtn = Routine::new(ArchitectureId::Amd64);
        rtn.create_block(1, None).unwrap();
        {
            let block = rtn.find_block(1).unwrap();
            let mut guard = lock(&block);
            guard.push(Instruction::mov(vr(0), Operand::imm(1, 64)));
            guard.push(Instruction::mov(amd64::RAX, Operand::imm(2, 64)));
        }
        exit_block(&rtn, 1);

        let removed = FastDeadCodeEliminationPass::new().xpass(&rtn);
        assert_eq!(removed, 1);
        let block = rtn.find_block(1).unwrap();
        let guard = lock(&block);
        assert_eq!(guard.len(), 2);
        assert_eq!(guard.instructions()[0].operands[0], Operand::Reg(amd64::RAX));
    }

    #[test]
    fn test_cross_block_liveness_preserves() {
        // Block 1 writes vr0, block 2 reads it: the write must survive.
        let rtn = Routine::new(ArchitectureId::Amd64);
        rtn.create_block(1, None).unwrap();
        rtn.create_block(2, Some(1)).unwrap();
        {
            let block = rtn.find_block(1).unwrap();
            let mut guard = lock(&block);
            guard.push(Instruction::mov(vr(0), Operand::imm(7, 64)));
            guard.push(Instruction::new(
                &ins::JMP,
                vec![Operand::imm(2, 64)],
            ));
        }
        {
            let block = rtn.find_block(2).unwrap();
            let mut guard = lock(&block);
            guard.push(Instruction::mov(amd64::RAX, vr(0)));
            guard.push(Instruction::new(
                &ins::VEXIT,
                vec![Operand::imm(0, 64)],
            ));
        }

        let removed = FastDeadCodeEliminationPass::new().xpass(&rtn);
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_overwritten_across_block_is_dead() {
        // Block 1 writes vr0, block 2 overwrites it before any read.
        let rtn = Routine::new(ArchitectureId::Amd64);
        rtn.create_block(1, None).unwrap();
        rtn.create_block(2, Some(1)).unwrap();
        {
            let block = rtn.find_block(1).unwrap();
            let mut guard = lock(&block);
            guard.push(Instruction::mov(vr(0), Operand::imm(7, 64)));
            guard.push(Instruction::new(&ins::JMP, vec![Operand::imm(2, 64)]));
        }
        {
            let block = rtn.find_block(2).unwrap();
            let mut guard = lock(&block);
            guard.push(Instruction::mov(vr(0), Operand::imm(8, 64)));
            guard.push(Instruction::mov(amd64::RAX, vr(0)));
            guard.push(Instruction::new(
                &ins::VEXIT,
                vec![Operand::imm(0, 64)],
            ));
        }

        let removed = FastDeadCodeEliminationPass::new().xpass(&rtn);
        assert_eq!(removed, 1);
        let block = rtn.find_block(1).unwrap();
        assert_eq!(lock(&block).len(), 1);
    }

    #[test]
    fn test_call_parameters_stay_live() {
        let rtn = Routine::new(ArchitectureId::Amd64);
        rtn.create_block(1, None).unwrap();
        rtn.create_block(2, Some(1)).unwrap();
        {
            let block = rtn.find_block(1).unwrap();
            let mut guard = lock(&block);
            guard.push(Instruction::mov(amd64::RCX, Operand::imm(1, 64)));
            guard.push(
                Instruction::new(&ins::VXCALL, vec![Operand::imm(0x1010, 64)]).with_vip(0x40),
            );
        }
        exit_block(&rtn, 2);

        let removed = FastDeadCodeEliminationPass::new().xpass(&rtn);
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_stores_and_volatiles_survive() {
        let rtn = Routine::new(ArchitectureId::Amd64);
        rtn.create_block(1, None).unwrap();
        {
            let block = rtn.find_block(1).unwrap();
            let mut guard = lock(&block);
            let sp = RegisterDesc::stack_pointer();
            guard.push(Instruction::str(sp, -8, Operand::imm(1, 64)));
            guard.push(Instruction::new(&ins::VEMIT, vec![Operand::imm(0x90, 8)]));
        }
        exit_block(&rtn, 1);

        let removed = FastDeadCodeEliminationPass::new().xpass(&rtn);
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_partial_width_liveness() {
        // Only the low byte of vr0 is read downstream; a write to the high
        // byte alone is dead.
        let rtn = Routine::new(ArchitectureId::Amd64);
        rtn.create_block(1, None).unwrap();
        {
            let block = rtn.find_block(1).unwrap();
            let mut guard = lock(&block);
            guard.push(Instruction::mov(vr(0).select(8, 56), Operand::imm(1, 8)));
            guard.push(Instruction::mov(vr(0).select(8, 0), Operand::imm(2, 8)));
            guard.push(Instruction::mov(amd64::RAX, vr(0).select(8, 0)));
        }
        exit_block(&rtn, 1);

        let removed = FastDeadCodeEliminationPass::new().xpass(&rtn);
        assert_eq!(removed, 1);
        let block = rtn.find_block(1).unwrap();
        let guard = lock(&block);
        assert_eq!(guard.instructions()[0].operands[0], Operand::Reg(vr(0).select(8, 0)));
    }

    #[test]
    fn test_local_pass_drops_dead_temporary() {
        let mut blk = BasicBlock::detached(0x1000, ArchitectureId::Amd64);
        let t0 = blk.tmp(64);
        blk.push(Instruction::mov(t0, Operand::imm(1, 64)));
        blk.push(Instruction::mov(amd64::RAX, Operand::imm(2, 64)));

        let removed = FastLocalDeadCodeEliminationPass::new().pass(&mut blk, false);
        assert_eq!(removed, 1);
        assert_eq!(blk.len(), 1);

        // Escaping registers are kept.
        let mut blk = BasicBlock::detached(0x1000, ArchitectureId::Amd64);
        blk.push(Instruction::mov(vr(1), Operand::imm(1, 64)));
        let removed = FastLocalDeadCodeEliminationPass::new().pass(&mut blk, false);
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_loop_liveness_converges() {
        // 1 -> 2 -> 3, 2 -> 2 (self loop reading and writing vr0).
        let rtn = Routine::new(ArchitectureId::Amd64);
        rtn.create_block(1, None).unwrap();
        rtn.create_block(2, Some(1)).unwrap();
        rtn.create_block(3, Some(2)).unwrap();
        rtn.link(2, 2).unwrap();
        {
            let block = rtn.find_block(1).unwrap();
            let mut guard = lock(&block);
            guard.push(Instruction::mov(vr(0), Operand::imm(0, 64)));
            guard.push(Instruction::new(&ins::JMP, vec![Operand::imm(2, 64)]));
        }
        {
            let block = rtn.find_block(2).unwrap();
            let mut guard = lock(&block);
            guard.push(Instruction::new(
                &ins::ADD,
                vec![vr(0).into(), Operand::imm(1, 64)],
            ));
            let cond = guard.tmp(1);
            guard.push(Instruction::new(
                &ins::TUL,
                vec![cond.into(), vr(0).into(), Operand::imm(10, 64)],
            ));
            guard.push(Instruction::new(
                &ins::JS,
                vec![cond.into(), Operand::imm(2, 64), Operand::imm(3, 64)],
            ));
        }
        {
            let block = rtn.find_block(3).unwrap();
            let mut guard = lock(&block);
            guard.push(Instruction::mov(amd64::RAX, vr(0)));
            guard.push(Instruction::new(
                &ins::VEXIT,
                vec![Operand::imm(0, 64)],
            ));
        }

        // Everything feeds the exit value; nothing may be removed.
        let removed = FastDeadCodeEliminationPass::new().xpass(&rtn);
        assert_eq!(removed, 0);
    }
}
