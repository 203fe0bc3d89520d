// Copyright 2025-2026 The vmscope contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
// - 'utils/thread_id.rs' uses a raw syscall to obtain the kernel thread id

//! # vmscope
//!
//! A framework for representing, symbolically executing and simplifying
//! virtualization-obfuscated code. Front-ends (devirtualizers and similar
//! lifters) produce a structured control-flow graph of instructions over a
//! symbolic architecture; `vmscope` models that graph, interprets it over a
//! symbolic expression domain and applies optimization passes until the
//! observable behaviour is expressed by the minimal instruction sequence.
//!
//! # Architecture
//!
//! The library is organized into module families that mirror the data flow
//! from lifted code to simplified output:
//!
//! - **Architecture Layer** ([`crate::arch`]): architecture tags, register
//!   descriptors and calling conventions
//! - **IR Layer** ([`crate::ir`]): operands, instruction descriptors, basic
//!   blocks and the routine graph with its path cache and epoch counters
//! - **Symbolic Execution Layer** ([`crate::symex`]): the expression domain,
//!   the purgeable simplifier and the symbolic virtual machine
//! - **Optimizer Layer** ([`crate::optimizer`]): the pass framework, the
//!   symbolic rewrite pass and cross-block dead code elimination
//!
//! # Key Components
//!
//! - [`crate::ir::Routine`] - Owner of all basic blocks of one lifted unit
//! - [`crate::symex::SymbolicVm`] - Interpreter over the expression domain
//! - [`crate::optimizer::PassPipeline`] - Fixed-point pass driver
//! - [`crate::Error`] and [`crate::Result`] - Error handling
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use vmscope::arch::ArchitectureId;
//! use vmscope::ir::Routine;
//! use vmscope::optimizer::{FastDeadCodeEliminationPass, PassPipeline, SymbolicRewritePass};
//!
//! let routine = Routine::new(ArchitectureId::Amd64);
//! // ... populate blocks through `Routine::create_block` ...
//!
//! let pipeline = PassPipeline::new()
//!     .with_pass(SymbolicRewritePass::new())
//!     .with_pass(FastDeadCodeEliminationPass::new());
//! let summary = pipeline.run(&routine);
//! println!("applied {} optimizations", summary.total);
//! ```
//!
//! # Thread Safety
//!
//! A [`crate::ir::Routine`] may be mutated from multiple threads: every block
//! carries its own mutex and the routine-level maps are concurrent. The pass
//! driver exploits this by running independent blocks of one depth layer in
//! parallel.

pub mod arch;
mod error;
pub mod ir;
pub mod optimizer;
pub mod symex;
pub mod utils;

pub use error::Error;

/// Convenience `Result` type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Convenient re-exports of the most commonly used types.
pub mod prelude {
    pub use crate::{
        arch::{ArchitectureId, CallingConvention, RegisterDesc, Vip},
        ir::{ins, BasicBlock, Immediate, Instruction, Operand, Routine},
        optimizer::{
            FastDeadCodeEliminationPass, Pass, PassPipeline, SymbolicRewritePass,
        },
        symex::{Expr, ExitReason, SymbolicVm, Vm},
        Error, Result,
    };
}
