//! Register descriptors.
//!
//! A [`RegisterDesc`] names a bit slice of a register: a kind encoded in
//! [`RegisterFlags`], a combined numeric identifier (architecture register
//! index or virtual id), a bit offset and a bit count. Two descriptors refer
//! to the same storage when their [`RegisterId`]s match; whether they touch
//! the same bits is a separate question answered by
//! [`RegisterDesc::overlaps`].

use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

use crate::arch::WORD_BITS;

bitflags! {
    /// Kind flags of a register descriptor.
    ///
    /// A descriptor with no flags set is an ordinary virtual register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct RegisterFlags: u32 {
        /// Maps to a physical architecture register.
        const PHYSICAL = 1 << 0;
        /// Block-local temporary, allocated by [`crate::ir::BasicBlock::tmp`].
        const LOCAL = 1 << 1;
        /// The flags register.
        const FLAGS = 1 << 2;
        /// The stack pointer.
        const STACK_POINTER = 1 << 3;
        /// Image-relative base register.
        const IMAGE_BASE = 1 << 4;
        /// Volatile: observable side effects, must not be reordered.
        const VOLATILE = 1 << 5;
        /// Read-only: writes are invalid.
        const READONLY = 1 << 6;
        /// Produces an undefined value on read.
        const UNDEFINED = 1 << 7;
        /// Routine-internal register allocated by
        /// [`crate::ir::Routine::alloc`].
        const INTERNAL = 1 << 8;
    }
}

/// Identity of a register, ignoring the bit slice.
///
/// Used as the key of per-register state maps (the symbolic machine's
/// register file, liveness masks). The ordering is arbitrary but total,
/// which keeps iteration over keyed state deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegisterId {
    /// Kind flags of the register.
    pub flags: u32,
    /// Combined numeric identifier.
    pub combined_id: u64,
}

/// Descriptor of a register bit slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterDesc {
    /// Kind flags.
    pub flags: RegisterFlags,
    /// Combined numeric identifier encoding the architecture register index
    /// or the virtual id.
    pub combined_id: u64,
    /// Number of bits referenced.
    pub bit_count: u32,
    /// Offset of the first referenced bit.
    pub bit_offset: u32,
}

impl RegisterDesc {
    /// Creates a descriptor referencing bits `[0, bit_count)`.
    #[must_use]
    pub const fn new(flags: RegisterFlags, combined_id: u64, bit_count: u32) -> Self {
        Self {
            flags,
            combined_id,
            bit_count,
            bit_offset: 0,
        }
    }

    /// Creates a virtual register descriptor.
    #[must_use]
    pub const fn virt(id: u64, bit_count: u32) -> Self {
        Self::new(RegisterFlags::empty(), id, bit_count)
    }

    /// Creates a block-local temporary descriptor.
    #[must_use]
    pub const fn temporary(id: u64, bit_count: u32) -> Self {
        Self::new(RegisterFlags::LOCAL, id, bit_count)
    }

    /// Creates a routine-internal register descriptor.
    #[must_use]
    pub const fn internal(id: u64, bit_count: u32) -> Self {
        Self::new(RegisterFlags::INTERNAL, id, bit_count)
    }

    /// Creates a physical register descriptor.
    #[must_use]
    pub const fn physical(id: u64, bit_count: u32) -> Self {
        Self::new(RegisterFlags::PHYSICAL, id, bit_count)
    }

    /// The stack pointer.
    #[must_use]
    pub const fn stack_pointer() -> Self {
        Self::new(
            RegisterFlags::PHYSICAL.union(RegisterFlags::STACK_POINTER),
            0,
            WORD_BITS,
        )
    }

    /// The flags register.
    #[must_use]
    pub const fn flags_reg() -> Self {
        Self::new(
            RegisterFlags::PHYSICAL.union(RegisterFlags::FLAGS),
            0,
            WORD_BITS,
        )
    }

    /// The image base register, read-only.
    #[must_use]
    pub const fn image_base() -> Self {
        Self::new(
            RegisterFlags::IMAGE_BASE.union(RegisterFlags::READONLY),
            0,
            WORD_BITS,
        )
    }

    /// The undefined-value register of the given width.
    ///
    /// Volatile by definition, but reads produce an unconstrained value, so
    /// passes may still reorder accesses to it.
    #[must_use]
    pub const fn undefined(bit_count: u32) -> Self {
        Self::new(
            RegisterFlags::VOLATILE.union(RegisterFlags::UNDEFINED),
            0,
            bit_count,
        )
    }

    /// Returns a descriptor for the sub-slice `[bit_offset, bit_offset + bit_count)`
    /// of the same register.
    #[must_use]
    pub const fn select(&self, bit_count: u32, bit_offset: u32) -> Self {
        Self {
            flags: self.flags,
            combined_id: self.combined_id,
            bit_count,
            bit_offset,
        }
    }

    /// Returns the storage identity, ignoring the bit slice.
    #[must_use]
    pub const fn id(&self) -> RegisterId {
        RegisterId {
            flags: self.flags.bits(),
            combined_id: self.combined_id,
        }
    }

    /// Returns `true` if the descriptor maps to a physical register.
    #[must_use]
    pub const fn is_physical(&self) -> bool {
        self.flags.contains(RegisterFlags::PHYSICAL)
    }

    /// Returns `true` if the descriptor is purely virtual.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        !self.flags.contains(RegisterFlags::PHYSICAL)
    }

    /// Returns `true` if this is the flags register.
    #[must_use]
    pub const fn is_flags(&self) -> bool {
        self.flags.contains(RegisterFlags::FLAGS)
    }

    /// Returns `true` if this is the stack pointer.
    #[must_use]
    pub const fn is_stack_pointer(&self) -> bool {
        self.flags.contains(RegisterFlags::STACK_POINTER)
    }

    /// Returns `true` if this is the image base register.
    #[must_use]
    pub const fn is_image_base(&self) -> bool {
        self.flags.contains(RegisterFlags::IMAGE_BASE)
    }

    /// Returns `true` if accesses to this register are volatile.
    #[must_use]
    pub const fn is_volatile(&self) -> bool {
        self.flags.contains(RegisterFlags::VOLATILE)
    }

    /// Returns `true` if writes to this register are invalid.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.flags.contains(RegisterFlags::READONLY)
    }

    /// Returns `true` if reads produce an undefined value.
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        self.flags.contains(RegisterFlags::UNDEFINED)
    }

    /// Returns `true` if this is a block-local temporary.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.flags.contains(RegisterFlags::LOCAL)
    }

    /// Returns `true` if this is a routine-internal register.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        self.flags.contains(RegisterFlags::INTERNAL)
    }

    /// Returns `true` if the slice bounds are sane.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.bit_count > 0 && self.bit_offset + self.bit_count <= WORD_BITS
    }

    /// Bit mask of the referenced slice within the full register word.
    #[must_use]
    pub const fn bit_mask(&self) -> u64 {
        if self.bit_count >= 64 {
            u64::MAX
        } else {
            ((1u64 << self.bit_count) - 1) << self.bit_offset
        }
    }

    /// Returns `true` if the two descriptors reference overlapping bits of
    /// the same storage.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.id() == other.id() && self.bit_mask() & other.bit_mask() != 0
    }
}

impl fmt::Display for RegisterDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_stack_pointer() {
            write!(f, "$sp")?;
        } else if self.is_flags() {
            write!(f, "$flags")?;
        } else if self.is_image_base() {
            write!(f, "base")?;
        } else if self.is_undefined() {
            write!(f, "UD")?;
        } else if self.is_local() {
            write!(f, "t{}", self.combined_id)?;
        } else if self.is_internal() {
            write!(f, "sr{}", self.combined_id)?;
        } else if self.is_physical() {
            match amd64::NAMES.get(self.combined_id as usize) {
                Some(name) => write!(f, "{name}")?,
                None => write!(f, "pr{}", self.combined_id)?,
            }
        } else {
            write!(f, "vr{}", self.combined_id)?;
        }
        if self.bit_offset != 0 || self.bit_count != WORD_BITS {
            write!(f, "@{}:{}", self.bit_offset, self.bit_count)?;
        }
        Ok(())
    }
}

/// Well-known amd64 physical registers.
///
/// The indices follow the conventional encoding order; the stack pointer is
/// not part of this table as it has its own descriptor kind.
pub mod amd64 {
    use super::{RegisterDesc, RegisterFlags};

    /// Display names indexed by combined id.
    pub(super) static NAMES: [&str; 15] = [
        "rax", "rcx", "rdx", "rbx", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
        "r14", "r15",
    ];

    const fn gp(id: u64) -> RegisterDesc {
        RegisterDesc::new(RegisterFlags::PHYSICAL, id, 64)
    }

    /// Accumulator, first return value register.
    pub const RAX: RegisterDesc = gp(0);
    /// First integer parameter register.
    pub const RCX: RegisterDesc = gp(1);
    /// Second integer parameter register.
    pub const RDX: RegisterDesc = gp(2);
    /// Callee-saved base register.
    pub const RBX: RegisterDesc = gp(3);
    /// Frame pointer.
    pub const RBP: RegisterDesc = gp(4);
    /// Source index register.
    pub const RSI: RegisterDesc = gp(5);
    /// Destination index register.
    pub const RDI: RegisterDesc = gp(6);
    /// Third integer parameter register.
    pub const R8: RegisterDesc = gp(7);
    /// Fourth integer parameter register.
    pub const R9: RegisterDesc = gp(8);
    /// Caller-saved scratch register.
    pub const R10: RegisterDesc = gp(9);
    /// Caller-saved scratch register.
    pub const R11: RegisterDesc = gp(10);
    /// Callee-saved register.
    pub const R12: RegisterDesc = gp(11);
    /// Callee-saved register.
    pub const R13: RegisterDesc = gp(12);
    /// Callee-saved register.
    pub const R14: RegisterDesc = gp(13);
    /// Callee-saved register.
    pub const R15: RegisterDesc = gp(14);
}
