//! Normalized memory pointers.
//!
//! A [`Pointer`] is a symbolic address split into a base expression and a
//! folded constant byte offset. Normalization makes structurally different
//! spellings of the same address (`sp + 8 + 8`, `(sp + 0x18) - 8`) compare
//! equal, which is what the memory store keys on.
//!
//! Stack-relative pointers are *restricted*: the lifter guarantees the
//! virtual stack frame does not alias arbitrary program memory, so a pointer
//! whose base involves the stack pointer can be proven distinct from one
//! whose base does not.

use std::fmt;

use crate::symex::{extract_displacement, simplify, ExprRef};

/// A symbolic address in `base + constant` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pointer {
    base: ExprRef,
    offset: i64,
}

impl Pointer {
    /// Normalizes an address expression into a pointer.
    #[must_use]
    pub fn new(address: &ExprRef) -> Self {
        let (base, offset) = extract_displacement(&simplify(address, true));
        Self { base, offset }
    }

    /// The base expression with all constant terms removed.
    #[must_use]
    pub const fn base(&self) -> &ExprRef {
        &self.base
    }

    /// The folded constant byte offset.
    #[must_use]
    pub const fn offset(&self) -> i64 {
        self.offset
    }

    /// Returns `true` if the base involves the stack pointer.
    #[must_use]
    pub fn is_stack_based(&self) -> bool {
        self.base.references_stack_pointer()
    }

    /// Byte distance to another pointer, when decidable.
    ///
    /// Two pointers have a known distance only when their bases are
    /// structurally identical.
    #[must_use]
    pub fn distance(&self, other: &Self) -> Option<i64> {
        if self.base == other.base {
            Some(other.offset.wrapping_sub(self.offset))
        } else {
            None
        }
    }

    /// Whether the `self_bytes`-wide cell at this pointer may overlap the
    /// `other_bytes`-wide cell at `other`.
    ///
    /// Identical bases are compared by range. A stack-based pointer cannot
    /// overlap a non-stack one. Everything else is undecidable and reported
    /// as a possible overlap.
    #[must_use]
    pub fn may_overlap(&self, self_bytes: u32, other: &Self, other_bytes: u32) -> bool {
        if let Some(distance) = self.distance(other) {
            distance < i64::from(self_bytes) && -distance < i64::from(other_bytes)
        } else {
            self.is_stack_based() == other.is_stack_based()
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            0 => write!(f, "{}", self.base),
            o if o < 0 => write!(f, "{}-{:#x}", self.base, -o),
            o => write!(f, "{}+{:#x}", self.base, o),
        }
    }
}
