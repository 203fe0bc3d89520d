//! First validation routine.
//!
//! Models a small devirtualized program: an input-dependent arithmetic
//! scramble, a short mixing loop, an external call and a machine exit
//! returning a product. The generator builds the routine through the block
//! API; [`reference_trace`] computes the trace the program must produce on
//! given inputs.
//!
//! On inputs `r`, `b` the program behaves as:
//!
//! ```text
//! if b & 1 {
//!     x = (r + b) * [0x3038];     // mapped image word, reads as 2
//!     x -= 42; x &= ~1; x <<= 1; x ^= 1;
//!     r = x << 3;
//! }
//! for i in (0x1111 & b)..8 { r ^= (b + i) & (i * 0x1b); }
//! call 0x1010(0x2230, r, b);
//! exit with rax = r * b;
//! ```

use rustc_hash::FxHashMap;

use crate::arch::{amd64, ArchitectureId, RegisterDesc};
use crate::ir::{ins, Instruction, Operand, Routine};
use crate::optimizer::validation::ObservableAction;
use crate::utils::lock;

/// The image memory the routine reads: one word at `0x3038` holding `2`.
pub const TEST1_FAKE_MEMORY: [(u64, u64); 1] = [(0x3038, 2)];

/// Inputs are expected in these registers.
pub const TEST1_INPUTS: [RegisterDesc; 2] = [amd64::RCX, amd64::RDX];

fn vr(id: u64) -> RegisterDesc {
    RegisterDesc::virt(id, 64)
}

/// Builds the routine.
///
/// The stream contains deliberate junk (dead scratch writes) of the kind a
/// devirtualizer front-end leaves behind, so optimization has work to do
/// without changing the trace.
///
/// # Panics
///
/// Panics only on internal builder misuse.
#[must_use]
pub fn generate() -> Routine {
    let rtn = Routine::new(ArchitectureId::Amd64);

    // Entry: capture inputs, branch on b & 1.
    let (entry, _) = rtn.create_block(0x1000, None).unwrap();
    {
        let mut blk = lock(&entry);
        blk.push(Instruction::mov(vr(0), amd64::RCX).with_vip(0x1000));
        blk.push(Instruction::mov(vr(1), amd64::RDX).with_vip(0x1001));
        // Dead scratch write left behind by the lifter.
        blk.push(Instruction::mov(vr(5), Operand::imm(0xdead, 64)).with_vip(0x1002));
        let parity = blk.tmp(64);
        blk.push(Instruction::mov(parity, vr(1)).with_vip(0x1003));
        blk.push(
            Instruction::new(&ins::AND, vec![parity.into(), Operand::imm(1, 64)])
                .with_vip(0x1004),
        );
        blk.push(
            Instruction::new(
                &ins::JS,
                vec![
                    parity.into(),
                    Operand::imm(0x1100, 64),
                    Operand::imm(0x1200, 64),
                ],
            )
            .with_vip(0x1005),
        );
    }

    // Odd path: the arithmetic scramble.
    let (scramble, _) = rtn.create_block(0x1100, Some(0x1000)).unwrap();
    {
        let mut blk = lock(&scramble);
        blk.push(Instruction::mov(vr(2), vr(0)).with_vip(0x1100));
        blk.push(Instruction::new(&ins::ADD, vec![vr(2).into(), vr(1).into()]).with_vip(0x1101));
        let address = blk.tmp(64);
        blk.push(Instruction::mov(address, Operand::imm(0x3038, 64)).with_vip(0x1102));
        blk.push(Instruction::ldd(vr(3), address, 0).with_vip(0x1103));
        blk.push(Instruction::new(&ins::MUL, vec![vr(2).into(), vr(3).into()]).with_vip(0x1104));
        blk.push(
            Instruction::new(&ins::SUB, vec![vr(2).into(), Operand::imm(42, 64)])
                .with_vip(0x1105),
        );
        blk.push(
            Instruction::new(&ins::AND, vec![vr(2).into(), Operand::imm(-2, 64)])
                .with_vip(0x1106),
        );
        blk.push(
            Instruction::new(&ins::SHL, vec![vr(2).into(), Operand::imm(1, 64)])
                .with_vip(0x1107),
        );
        blk.push(
            Instruction::new(&ins::XOR, vec![vr(2).into(), Operand::imm(1, 64)])
                .with_vip(0x1108),
        );
        blk.push(Instruction::mov(vr(0), vr(2)).with_vip(0x1109));
        blk.push(
            Instruction::new(&ins::SHL, vec![vr(0).into(), Operand::imm(3, 64)])
                .with_vip(0x110a),
        );
        blk.push(Instruction::new(&ins::JMP, vec![Operand::imm(0x1200, 64)]).with_vip(0x110b));
    }
    rtn.link(0x1100, 0x1200).unwrap();

    // Loop preheader: i = 0x1111 & b.
    let (preheader, _) = rtn.create_block(0x1200, Some(0x1000)).unwrap();
    {
        let mut blk = lock(&preheader);
        blk.push(Instruction::mov(vr(4), vr(1)).with_vip(0x1200));
        blk.push(
            Instruction::new(&ins::AND, vec![vr(4).into(), Operand::imm(0x1111, 64)])
                .with_vip(0x1201),
        );
        blk.push(Instruction::new(&ins::JMP, vec![Operand::imm(0x1210, 64)]).with_vip(0x1202));
    }

    // Loop header: while i < 8 (signed).
    let (header, _) = rtn.create_block(0x1210, Some(0x1200)).unwrap();
    {
        let mut blk = lock(&header);
        let in_range = blk.tmp(1);
        blk.push(
            Instruction::new(
                &ins::TL,
                vec![in_range.into(), vr(4).into(), Operand::imm(8, 64)],
            )
            .with_vip(0x1210),
        );
        blk.push(
            Instruction::new(
                &ins::JS,
                vec![
                    in_range.into(),
                    Operand::imm(0x1220, 64),
                    Operand::imm(0x1230, 64),
                ],
            )
            .with_vip(0x1211),
        );
    }

    // Loop body: r ^= (b + i) & (i * 0x1b); i += 1.
    let (body, _) = rtn.create_block(0x1220, Some(0x1210)).unwrap();
    {
        let mut blk = lock(&body);
        let left = blk.tmp(64);
        let right = blk.tmp(64);
        blk.push(Instruction::mov(left, vr(1)).with_vip(0x1220));
        blk.push(Instruction::new(&ins::ADD, vec![left.into(), vr(4).into()]).with_vip(0x1221));
        blk.push(Instruction::mov(right, vr(4)).with_vip(0x1222));
        blk.push(
            Instruction::new(&ins::MUL, vec![right.into(), Operand::imm(0x1b, 64)])
                .with_vip(0x1223),
        );
        blk.push(Instruction::new(&ins::AND, vec![left.into(), right.into()]).with_vip(0x1224));
        blk.push(Instruction::new(&ins::XOR, vec![vr(0).into(), left.into()]).with_vip(0x1225));
        // More lifter junk: a copy nobody reads.
        blk.push(Instruction::mov(vr(6), left).with_vip(0x1226));
        blk.push(
            Instruction::new(&ins::ADD, vec![vr(4).into(), Operand::imm(1, 64)])
                .with_vip(0x1227),
        );
        blk.push(Instruction::new(&ins::JMP, vec![Operand::imm(0x1210, 64)]).with_vip(0x1228));
    }
    rtn.link(0x1220, 0x1210).unwrap();

    // Call site: 0x1010(0x2230, r, b). The second argument travels through
    // a pointless copy chain, as devirtualized argument shuffles tend to.
    let (call, _) = rtn.create_block(0x1230, Some(0x1210)).unwrap();
    {
        let mut blk = lock(&call);
        blk.push(Instruction::mov(amd64::RCX, Operand::imm(0x2230, 64)).with_vip(0x1230));
        let first = blk.tmp(64);
        let second = blk.tmp(64);
        blk.push(Instruction::mov(first, vr(0)).with_vip(0x1231));
        blk.push(Instruction::mov(second, first).with_vip(0x1232));
        blk.push(Instruction::mov(amd64::RDX, second).with_vip(0x1233));
        blk.push(Instruction::mov(amd64::R8, vr(1)).with_vip(0x1234));
        blk.push(
            Instruction::new(&ins::VXCALL, vec![Operand::imm(0x1010, 64)]).with_vip(0x1235),
        );
    }

    // Exit: rax = r * b.
    let (exit, _) = rtn.create_block(0x1240, Some(0x1230)).unwrap();
    {
        let mut blk = lock(&exit);
        blk.push(Instruction::mov(amd64::RAX, vr(0)).with_vip(0x1240));
        blk.push(Instruction::new(&ins::MUL, vec![amd64::RAX.into(), vr(1).into()]).with_vip(0x1241));
        blk.push(Instruction::new(&ins::VEXIT, vec![Operand::imm(0, 64)]).with_vip(0x1242));
    }

    rtn
}

/// The trace the program must produce on inputs `r`, `b`.
#[must_use]
pub fn reference_trace(r: u64, b: u64) -> Vec<ObservableAction> {
    let mut actions = Vec::new();
    let mut r = r;

    if b & 1 == 1 {
        let mut x = r.wrapping_add(b);
        x = x.wrapping_mul(2);
        actions.push(ObservableAction::MemoryRead {
            address: 0x3038,
            value: 2,
            bit_count: 64,
        });
        x = x.wrapping_sub(42);
        x &= !1;
        x <<= 1;
        x ^= 1;
        r = x << 3;
    }

    let mut i = 0x1111 & b;
    while (i as i64) < 8 {
        r ^= b.wrapping_add(i) & i.wrapping_mul(0x1b);
        i += 1;
    }

    actions.push(ObservableAction::ExternalCall {
        address: 0x1010,
        parameters: vec![0x2230, r, b],
    });
    actions.push(ObservableAction::VmExit {
        registers: vec![(amd64::RAX.id(), r.wrapping_mul(b))],
    });
    actions
}

/// The fake memory mapping as a lookup table.
#[must_use]
pub fn fake_memory() -> FxHashMap<u64, u64> {
    TEST1_FAKE_MEMORY.iter().copied().collect()
}
