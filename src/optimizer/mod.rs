//! The optimizer pass framework.
//!
//! A [`Pass`] transforms one block ([`Pass::pass`]) or a whole routine
//! ([`Pass::xpass`]), returning the number of optimizations applied. The
//! default cross-block driver visits blocks according to the pass's
//! [`ExecutionOrder`]: serially, or layer by layer of the depth-ordered
//! list with the blocks of one layer processed in parallel.
//!
//! [`PassPipeline`] composes passes and drives them to a fixed point,
//! reporting aggregate counts through [`OptimizationSummary`].

pub mod aux;
mod dce;
mod symbolic_rewrite;
mod translator;
pub mod validation;

pub use dce::{FastDeadCodeEliminationPass, FastLocalDeadCodeEliminationPass};
pub use symbolic_rewrite::SymbolicRewritePass;
pub use translator::BatchTranslator;

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use crate::arch::Vip;
use crate::ir::{BasicBlock, Routine};
use crate::utils::lock;

/// How the default cross-block driver visits blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOrder {
    /// One block at a time, in VIP order.
    Serial,
    /// Depth layer by depth layer, blocks of one layer in parallel.
    Parallel,
    /// The pass overrides [`Pass::xpass`] and drives itself.
    Custom,
}

/// A transformation over blocks or routines.
///
/// Passes must be thread-safe; the parallel driver invokes [`Pass::pass`]
/// concurrently for independent blocks, each behind its own lock.
pub trait Pass: Send + Sync {
    /// Name used in logs and summaries.
    fn name(&self) -> &'static str;

    /// How the default driver visits blocks.
    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::Serial
    }

    /// Transforms one block, returning the number of optimizations applied.
    ///
    /// `cross_block` tells the pass whether it runs as part of a whole
    /// routine sweep, where cross-block assumptions hold.
    fn pass(&self, block: &mut BasicBlock, cross_block: bool) -> usize;

    /// Transforms a whole routine, returning the number of optimizations.
    ///
    /// The default drives [`Pass::pass`] over every block according to the
    /// execution order; custom-order passes override this.
    fn xpass(&self, routine: &Routine) -> usize {
        match self.execution_order() {
            ExecutionOrder::Parallel => {
                let placements = routine.get_depth_ordered_list(true);
                let mut layers: Vec<Vec<Vip>> = Vec::new();
                for placement in placements.iter() {
                    if layers.len() <= placement.depth {
                        layers.resize_with(placement.depth + 1, Vec::new);
                    }
                    layers[placement.depth].push(placement.vip);
                }
                let total = AtomicUsize::new(0);
                for layer in layers {
                    layer.par_iter().for_each(|&vip| {
                        if let Some(block) = routine.find_block(vip) {
                            let count = self.pass(&mut lock(&block), true);
                            total.fetch_add(count, Ordering::Relaxed);
                        }
                    });
                }
                total.into_inner()
            }
            ExecutionOrder::Serial | ExecutionOrder::Custom => routine
                .blocks()
                .iter()
                .map(|block| self.pass(&mut lock(block), true))
                .sum(),
        }
    }
}

/// Per-pass share of an [`OptimizationSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct PassStats {
    /// Pass name.
    pub name: &'static str,
    /// Optimizations applied by this pass across all sweeps.
    pub count: usize,
}

/// Aggregate result of running a pipeline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationSummary {
    /// Number of sweeps executed.
    pub iterations: usize,
    /// Total optimizations applied.
    pub total: usize,
    /// Per-pass breakdown.
    pub passes: Vec<PassStats>,
}

/// A sequence of passes driven to a fixed point.
pub struct PassPipeline {
    passes: Vec<Box<dyn Pass>>,
    max_iterations: usize,
}

impl Default for PassPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PassPipeline {
    /// Creates an empty pipeline with the default iteration cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            max_iterations: 16,
        }
    }

    /// Appends a pass.
    #[must_use]
    pub fn with_pass(mut self, pass: impl Pass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Caps the number of sweeps of [`PassPipeline::run`].
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Runs every pass once, in order.
    pub fn run_once(&self, routine: &Routine) -> OptimizationSummary {
        let mut summary = OptimizationSummary {
            iterations: 1,
            ..OptimizationSummary::default()
        };
        for pass in &self.passes {
            let count = pass.xpass(routine);
            log::debug!("pass {} applied {} optimizations", pass.name(), count);
            summary.total += count;
            summary.passes.push(PassStats {
                name: pass.name(),
                count,
            });
        }
        routine.add_local_opt_count(summary.total as u64);
        summary
    }

    /// Sweeps the pipeline until a sweep applies nothing or the iteration
    /// cap is hit.
    pub fn run(&self, routine: &Routine) -> OptimizationSummary {
        let mut summary = OptimizationSummary::default();
        for pass in &self.passes {
            summary.passes.push(PassStats {
                name: pass.name(),
                count: 0,
            });
        }
        for _ in 0..self.max_iterations {
            summary.iterations += 1;
            let mut sweep_total = 0;
            for (index, pass) in self.passes.iter().enumerate() {
                let count = pass.xpass(routine);
                log::debug!("pass {} applied {} optimizations", pass.name(), count);
                sweep_total += count;
                summary.passes[index].count += count;
            }
            summary.total += sweep_total;
            if sweep_total == 0 {
                break;
            }
        }
        routine.add_local_opt_count(summary.total as u64);
        summary
    }
}
