//! Calling conventions.
//!
//! A [`CallingConvention`] summarizes which registers cross a call boundary:
//! the parameter and return value sets, the caller-clobbered volatile set and
//! the stack discipline. Architecture defaults live here; routines may attach
//! per-call-site overrides through
//! [`crate::ir::Routine::set_convention_for`].

use crate::arch::{amd64, ArchitectureId, RegisterDesc};

/// Register sets and stack discipline of one call boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallingConvention {
    /// Registers the callee may clobber without restoring.
    pub volatile_registers: Vec<RegisterDesc>,
    /// Registers carrying parameters, in order.
    pub param_registers: Vec<RegisterDesc>,
    /// Registers carrying return values, in order.
    pub retval_registers: Vec<RegisterDesc>,
    /// Frame register, if the convention reserves one.
    pub frame_register: Option<RegisterDesc>,
    /// Bytes of shadow space the caller allocates below the return address.
    pub shadow_space: u64,
    /// Whether the callee purges its stack arguments on return.
    pub purge_stack: bool,
}

impl CallingConvention {
    /// The minimal convention of purely virtual code: no register traffic,
    /// stack purged on return.
    #[must_use]
    pub fn virtual_purge() -> Self {
        Self {
            purge_stack: true,
            ..Self::default()
        }
    }
}

/// Returns the default convention of the given architecture.
pub(super) fn default_for(arch: ArchitectureId) -> CallingConvention {
    match arch {
        ArchitectureId::Amd64 => CallingConvention {
            volatile_registers: vec![
                amd64::RAX,
                amd64::RCX,
                amd64::RDX,
                amd64::R8,
                amd64::R9,
                amd64::R10,
                amd64::R11,
            ],
            param_registers: vec![amd64::RCX, amd64::RDX, amd64::R8, amd64::R9],
            retval_registers: vec![amd64::RAX],
            frame_register: Some(amd64::RBP),
            shadow_space: 0x20,
            purge_stack: false,
        },
        ArchitectureId::X86 => CallingConvention {
            volatile_registers: vec![
                amd64::RAX.select(32, 0),
                amd64::RCX.select(32, 0),
                amd64::RDX.select(32, 0),
            ],
            param_registers: Vec::new(),
            retval_registers: vec![amd64::RAX.select(32, 0)],
            frame_register: Some(amd64::RBP.select(32, 0)),
            shadow_space: 0,
            purge_stack: false,
        },
        ArchitectureId::Arm64 => CallingConvention {
            volatile_registers: (0..18).map(|i| RegisterDesc::physical(i, 64)).collect(),
            param_registers: (0..8).map(|i| RegisterDesc::physical(i, 64)).collect(),
            retval_registers: vec![RegisterDesc::physical(0, 64)],
            frame_register: Some(RegisterDesc::physical(29, 64)),
            shadow_space: 0,
            purge_stack: false,
        },
        ArchitectureId::Virtual => CallingConvention::virtual_purge(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amd64_parameter_order() {
        let cc = default_for(ArchitectureId::Amd64);
        assert_eq!(
            cc.param_registers,
            vec![amd64::RCX, amd64::RDX, amd64::R8, amd64::R9]
        );
        assert_eq!(cc.retval_registers, vec![amd64::RAX]);
        assert!(!cc.purge_stack);
    }

    #[test]
    fn test_virtual_is_purge_only() {
        let cc = default_for(ArchitectureId::Virtual);
        assert!(cc.purge_stack);
        assert!(cc.volatile_registers.is_empty());
        assert!(cc.retval_registers.is_empty());
    }
}
