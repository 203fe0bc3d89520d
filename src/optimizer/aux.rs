//! Auxiliary analyses shared by rewriting passes.

use crate::arch::RegisterDesc;
use crate::ir::BasicBlock;

/// Returns `true` if any bit of `reg` written before `from` may be observed
/// at or after `from` within the block.
///
/// The scan walks forward: a read of a still-live bit proves use; writes
/// retire bits. When the block ends with bits still live, block-local
/// storage (temporaries and routine-internal registers) is dead by
/// construction and everything else is conservatively live, since a
/// successor may read it.
#[must_use]
pub fn is_used_downstream(block: &BasicBlock, from: usize, reg: &RegisterDesc) -> bool {
    let mut remaining = reg.bit_mask();
    for instruction in &block.instructions()[from.min(block.len())..] {
        let mut observed = false;
        instruction.for_each_read_register(|r| {
            if r.id() == reg.id() && r.bit_mask() & remaining != 0 {
                observed = true;
            }
        });
        if observed {
            return true;
        }
        instruction.for_each_written_register(|r| {
            if r.id() == reg.id() {
                remaining &= !r.bit_mask();
            }
        });
        if remaining == 0 {
            return false;
        }
    }
    !(reg.is_local() || reg.is_internal())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchitectureId;
    use crate::ir::{ins, Instruction, Operand};

    fn block() -> BasicBlock {
        BasicBlock::detached(0x1000, ArchitectureId::Amd64)
    }

    fn vr(id: u64) -> RegisterDesc {
        RegisterDesc::virt(id, 64)
    }

    #[test]
    fn test_read_after_point_is_use() {
        let mut blk = block();
        blk.push(Instruction::mov(vr(0), Operand::imm(1, 64)));
        blk.push(Instruction::mov(vr(1), vr(0)));
        assert!(is_used_downstream(&blk, 1, &vr(0)));
    }

    #[test]
    fn test_overwrite_retires_bits() {
        let mut blk = block();
        blk.push(Instruction::mov(vr(0), Operand::imm(1, 64)));
        blk.push(Instruction::mov(vr(0), Operand::imm(2, 64)));
        blk.push(Instruction::mov(vr(1), vr(0)));
        // The value entering index 1 is fully overwritten before the read.
        let local = RegisterDesc::temporary(0, 64);
        let mut blk2 = block();
        blk2.push(Instruction::mov(local, Operand::imm(1, 64)));
        blk2.push(Instruction::mov(local, Operand::imm(2, 64)));
        assert!(!is_used_downstream(&blk2, 1, &local));
        assert!(is_used_downstream(&blk, 1, &vr(0)));
    }

    #[test]
    fn test_partial_overwrite_keeps_rest_live() {
        let mut blk = block();
        let low = vr(0).select(8, 0);
        blk.push(Instruction::mov(low, Operand::imm(1, 8)));
        blk.push(Instruction::mov(vr(1), vr(0)));
        // Bits 8..64 survive the partial write and are then read.
        assert!(is_used_downstream(&blk, 0, &vr(0)));
    }

    #[test]
    fn test_escape_rules_at_block_end() {
        let blk = block();
        assert!(is_used_downstream(&blk, 0, &vr(0)));
        assert!(!is_used_downstream(&blk, 0, &RegisterDesc::temporary(0, 64)));
        assert!(!is_used_downstream(&blk, 0, &RegisterDesc::internal(0, 64)));
    }

    #[test]
    fn test_readwrite_operand_counts_as_read() {
        let mut blk = block();
        blk.push(Instruction::mov(vr(0), Operand::imm(1, 64)));
        blk.push(Instruction::new(
            &ins::ADD,
            vec![vr(0).into(), Operand::imm(1, 64)],
        ));
        assert!(is_used_downstream(&blk, 1, &vr(0)));
    }
}
