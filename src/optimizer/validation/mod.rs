//! Semantic validation of optimization passes.
//!
//! A routine is validated by driving the symbolic machine with concrete
//! inputs and recording every externally observable action: reads of mapped
//! image memory, external calls with their parameter values, and the final
//! machine exit with its return register state. Two routines are
//! behaviourally equal on an input when their traces match bit for bit;
//! passes are checked by comparing traces before and after optimization
//! against an independently computed reference.

pub mod test1;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::arch::{RegisterDesc, RegisterId};
use crate::ir::{ins, Instruction, InstructionDesc, Operand, Routine};
use crate::symex::{simplify, ExitReason, Expr, MathOp, SymbolicVm, Vm};
use crate::utils::lock;
use crate::{Error, Result};

/// Upper bound on executed instructions per trace.
const STEP_LIMIT: usize = 100_000;

/// One externally observable effect of a routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ObservableAction {
    /// A read of mapped image memory.
    MemoryRead {
        /// Absolute address read.
        address: u64,
        /// Value the mapping supplied.
        value: u64,
        /// Width of the read in bits.
        bit_count: u32,
    },
    /// A call leaving the virtual machine.
    ExternalCall {
        /// Call target address.
        address: u64,
        /// Values of the written prefix of the convention's parameter
        /// registers.
        parameters: Vec<u64>,
    },
    /// The final exit of the virtual machine.
    VmExit {
        /// Return register values per the routine convention.
        registers: Vec<(RegisterId, u64)>,
    },
}

/// Executes a routine on concrete inputs, returning its observable trace.
///
/// `inputs` seeds the register file; `fake_memory` maps absolute addresses
/// to the values their reads observe (reads of unmapped addresses stay
/// symbolic, which is how stack traffic resolves through the machine's own
/// store).
///
/// # Errors
///
/// Fails when an observable value does not fold to a constant, when the
/// machine cannot resolve an access, or when execution exceeds the step
/// limit.
pub fn run_trace(
    routine: &Routine,
    inputs: &[(RegisterDesc, u64)],
    fake_memory: &FxHashMap<u64, u64>,
) -> Result<Vec<ObservableAction>> {
    let mut vm = SymbolicVm::new();
    for (reg, value) in inputs {
        vm.write_register(reg, Expr::constant(*value, reg.bit_count));
    }

    let mut actions = Vec::new();
    let mut current = routine.entry().ok_or(Error::NoEntryPoint)?;
    let mut steps = 0usize;

    'blocks: loop {
        let block = routine.block(current)?;
        let (instructions, successors) = {
            let guard = lock(&block);
            (guard.instructions().to_vec(), guard.successors().to_vec())
        };

        let mut index = 0usize;
        while index < instructions.len() {
            steps += 1;
            if steps > STEP_LIMIT {
                return Err(Error::StepLimit(STEP_LIMIT));
            }
            let instruction = &instructions[index];
            let desc = instruction.desc;

            // Loads of mapped image memory are the observable reads.
            if InstructionDesc::same(desc, &ins::LDD) {
                let (base, offset) = instruction.memory_location();
                let base = *base;
                let address_expr = Expr::binary(
                    vm.read_register(&base),
                    MathOp::Add,
                    Expr::constant_i64(offset, 64),
                );
                if let Some(address) = simplify(&address_expr, true).value() {
                    if let Some(&value) = fake_memory.get(&address) {
                        let dst = *instruction.operands[0].reg();
                        actions.push(ObservableAction::MemoryRead {
                            address,
                            value,
                            bit_count: dst.bit_count,
                        });
                        vm.write_register(&dst, Expr::constant(value, dst.bit_count));
                        index += 1;
                        continue;
                    }
                }
                // Unmapped: resolve through the symbolic store.
                match vm.execute(instruction) {
                    ExitReason::None => {
                        index += 1;
                        continue;
                    }
                    reason => {
                        return Err(Error::Validation(format!(
                            "load failed with {reason}: {instruction}"
                        )))
                    }
                }
            }

            if InstructionDesc::same(desc, &ins::JS) {
                let condition = concrete_operand(&mut vm, instruction, 0)?;
                let target = if condition != 0 { 1 } else { 2 };
                current = concrete_operand(&mut vm, instruction, target)?;
                continue 'blocks;
            }

            if InstructionDesc::same(desc, &ins::JMP) {
                current = concrete_operand(&mut vm, instruction, 0)?;
                continue 'blocks;
            }

            if InstructionDesc::same(desc, &ins::VXCALL) {
                let address = concrete_operand(&mut vm, instruction, 0)?;
                let convention = routine.convention_for(instruction.vip);
                let mut parameters = Vec::new();
                for reg in &convention.param_registers {
                    if !vm.register_state.contains_key(&reg.id()) {
                        break;
                    }
                    parameters.push(concrete_register(&mut vm, reg)?);
                }
                actions.push(ObservableAction::ExternalCall {
                    address,
                    parameters,
                });
                match successors.first() {
                    Some(&next) => {
                        current = next;
                        continue 'blocks;
                    }
                    None => return Ok(actions),
                }
            }

            if InstructionDesc::same(desc, &ins::VEXIT) {
                let convention = routine.convention();
                let mut registers = Vec::new();
                for reg in &convention.retval_registers {
                    registers.push((reg.id(), concrete_register(&mut vm, reg)?));
                }
                actions.push(ObservableAction::VmExit { registers });
                return Ok(actions);
            }

            match vm.execute(instruction) {
                ExitReason::None => index += 1,
                reason => {
                    return Err(Error::Validation(format!(
                        "execution failed with {reason}: {instruction}"
                    )))
                }
            }
        }

        // Fell off the end of the block.
        match successors.as_slice() {
            [next] => current = *next,
            [] => return Ok(actions),
            _ => {
                return Err(Error::Validation(format!(
                    "block {current:#x} ends without a branch but has several successors"
                )))
            }
        }
    }
}

fn concrete_operand(
    vm: &mut SymbolicVm,
    instruction: &Instruction,
    index: usize,
) -> Result<u64> {
    let expr = match &instruction.operands[index] {
        Operand::Imm(imm) => return Ok(imm.uval()),
        Operand::Reg(reg) => vm.read_register(reg),
    };
    simplify(&expr, true)
        .value()
        .ok_or_else(|| Error::NotConcrete(format!("operand {index} of `{instruction}`")))
}

fn concrete_register(vm: &mut SymbolicVm, reg: &RegisterDesc) -> Result<u64> {
    simplify(&vm.read_register(reg), true)
        .value()
        .ok_or_else(|| Error::NotConcrete(reg.to_string()))
}
