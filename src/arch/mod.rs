//! Architecture tags, register descriptors and calling conventions.
//!
//! The IR is architecture-neutral: instructions operate on 64-bit words and
//! registers are described by [`RegisterDesc`] slices of at most
//! [`WORD_BITS`] bits. The architecture tag selects the default calling
//! conventions and the mapping of physical register indices to names.

mod conventions;
mod register;

pub use conventions::CallingConvention;
pub use register::{amd64, RegisterDesc, RegisterFlags, RegisterId};

use serde::Serialize;
use strum::{EnumCount, EnumIter};

/// Virtual instruction pointer: the identifier of a source-level instruction
/// position, used as the key of a basic block.
pub type Vip = u64;

/// Reserved virtual instruction pointer marking "no source location".
pub const VIP_INVALID: Vip = u64::MAX;

/// Width in bits of the IR word.
///
/// IR-level invariants (operand validity, branch target widths, register
/// slice bounds) are checked against this width. Narrower physical
/// architectures are represented through narrower register descriptors.
pub const WORD_BITS: u32 = 64;

/// Physical architecture a routine was lifted from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter, Serialize,
)]
pub enum ArchitectureId {
    /// x86-64.
    Amd64,
    /// 32-bit x86.
    X86,
    /// AArch64.
    Arm64,
    /// Purely virtual code with no physical counterpart.
    Virtual,
}

impl ArchitectureId {
    /// Returns the native word width of the physical architecture in bits.
    #[must_use]
    pub const fn word_width(self) -> u32 {
        match self {
            Self::X86 => 32,
            Self::Amd64 | Self::Arm64 | Self::Virtual => 64,
        }
    }

    /// Returns the default calling convention of this architecture.
    ///
    /// The `Virtual` architecture has no physical ABI; its convention is a
    /// minimal one that only marks the stack as purged on return.
    #[must_use]
    pub fn default_convention(self) -> CallingConvention {
        conventions::default_for(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_word_widths() {
        assert_eq!(ArchitectureId::Amd64.word_width(), 64);
        assert_eq!(ArchitectureId::X86.word_width(), 32);
        assert_eq!(ArchitectureId::Arm64.word_width(), 64);
        assert_eq!(ArchitectureId::Virtual.word_width(), 64);
    }

    #[test]
    fn test_every_architecture_has_a_convention() {
        for arch in ArchitectureId::iter() {
            let cc = arch.default_convention();
            if arch == ArchitectureId::Virtual {
                assert!(cc.purge_stack);
                assert!(cc.param_registers.is_empty());
            } else {
                assert!(!cc.retval_registers.is_empty());
            }
        }
    }
}
