//! The routine graph.
//!
//! A [`Routine`] exclusively owns every basic block of one lifted unit,
//! indexed by entry VIP. It carries the routine-wide analysis caches (the
//! path cache and the depth-ordered layering), the calling convention
//! bookkeeping and the modification epochs consumers use to validate cached
//! derived data in O(1).
//!
//! # Thread Safety
//!
//! The block index is a lock-free ordered map holding each block behind its
//! own mutex; routine-level caches sit behind their own locks. Code must not
//! call path or layering queries while holding a block lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::arch::{ArchitectureId, CallingConvention, RegisterDesc, Vip};
use crate::ir::block::Signals;
use crate::ir::BasicBlock;
use crate::utils::lock;
use crate::{Error, Result};

/// Shared set of block handles returned by path queries.
pub type PathSet = Arc<FxHashSet<Vip>>;

/// Placement of one block in the depth-ordered layering.
///
/// Blocks sharing a `depth` have no dependency on each other along acyclic
/// paths and may be processed in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthPlacement {
    /// Number of blocks this one directly depends on.
    pub dependency: usize,
    /// Layer index; the longest acyclic distance from the roots.
    pub depth: usize,
    /// The block.
    pub vip: Vip,
}

#[derive(Default)]
struct PathCache {
    explored: FxHashSet<Vip>,
    paths: FxHashMap<Vip, FxHashMap<Vip, PathSet>>,
}

impl PathCache {
    fn clear(&mut self) {
        self.explored.clear();
        self.paths.clear();
    }
}

struct DepthCacheEntry {
    epoch: u64,
    list: Arc<Vec<DepthPlacement>>,
}

/// One lifted compilation unit: the CFG plus its metadata.
pub struct Routine {
    arch_id: ArchitectureId,
    blocks: SkipMap<Vip, Arc<Mutex<BasicBlock>>>,
    entry: std::sync::OnceLock<Vip>,
    signals: Arc<Signals>,
    path_cache: Mutex<PathCache>,
    depth_cache: Mutex<[Option<DepthCacheEntry>; 2]>,
    routine_convention: RwLock<CallingConvention>,
    subroutine_convention: RwLock<CallingConvention>,
    spec_subroutine_conventions: DashMap<Vip, CallingConvention>,
    next_internal_id: AtomicU64,
    local_opt_count: AtomicU64,
}

impl Routine {
    /// Creates an empty routine bound to an architecture.
    ///
    /// Both the routine and subroutine conventions start as the
    /// architecture defaults.
    #[must_use]
    pub fn new(arch_id: ArchitectureId) -> Self {
        let convention = arch_id.default_convention();
        Self {
            arch_id,
            blocks: SkipMap::new(),
            entry: std::sync::OnceLock::new(),
            signals: Arc::new(Signals::default()),
            path_cache: Mutex::new(PathCache::default()),
            depth_cache: Mutex::new([None, None]),
            routine_convention: RwLock::new(convention.clone()),
            subroutine_convention: RwLock::new(convention),
            spec_subroutine_conventions: DashMap::new(),
            next_internal_id: AtomicU64::new(0),
            local_opt_count: AtomicU64::new(0),
        }
    }

    /// The architecture this routine was lifted from.
    #[must_use]
    pub const fn arch_id(&self) -> ArchitectureId {
        self.arch_id
    }

    /// Entry block handle, once the first block has been created.
    #[must_use]
    pub fn entry(&self) -> Option<Vip> {
        self.entry.get().copied()
    }

    /// Current modification epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.signals.epoch.load(Ordering::Relaxed)
    }

    /// Current structural (edge) modification epoch.
    #[must_use]
    pub fn cfg_epoch(&self) -> u64 {
        self.signals.cfg_epoch.load(Ordering::Relaxed)
    }

    /// Records a non-structural modification.
    pub fn signal_modification(&self) {
        self.signals.modification();
    }

    /// Records a structural modification, invalidating the path cache.
    pub fn signal_cfg_modification(&self) {
        self.signals.cfg_modification();
    }

    /// Allocates a unique routine-internal register.
    #[must_use]
    pub fn alloc(&self, bit_count: u32) -> RegisterDesc {
        let id = self.next_internal_id.fetch_add(1, Ordering::Relaxed);
        RegisterDesc::internal(id, bit_count)
    }

    /// Creates a block keyed by `vip`, optionally linked from `src`.
    ///
    /// Mimics map insertion: returns the block and whether it was newly
    /// created. The first block ever created becomes the entry point.
    ///
    /// # Errors
    ///
    /// Returns an error if `src` names an unknown block.
    pub fn create_block(
        &self,
        vip: Vip,
        src: Option<Vip>,
    ) -> Result<(Arc<Mutex<BasicBlock>>, bool)> {
        if let Some(src) = src {
            if self.find_block(src).is_none() {
                return Err(Error::UnknownBlock(src));
            }
        }
        let (block, inserted) = match self.blocks.get(&vip) {
            Some(entry) => (Arc::clone(entry.value()), false),
            None => {
                let block = Arc::new(Mutex::new(BasicBlock::new(
                    vip,
                    self.arch_id,
                    Arc::clone(&self.signals),
                )));
                self.blocks.insert(vip, Arc::clone(&block));
                let _ = self.entry.set(vip);
                self.signals.cfg_modification();
                (block, true)
            }
        };
        if let Some(src) = src {
            self.link(src, vip)?;
        }
        Ok((block, inserted))
    }

    /// Deletes a block that has no remaining edges.
    ///
    /// # Errors
    ///
    /// Returns an error if the block is unknown or still linked.
    pub fn delete_block(&self, vip: Vip) -> Result<()> {
        let block = self.block(vip)?;
        if lock(&block).has_links() {
            return Err(Error::BlockLinked(vip));
        }
        self.blocks.remove(&vip);
        self.signals.cfg_modification();
        Ok(())
    }

    /// Looks up a block by VIP.
    #[must_use]
    pub fn find_block(&self, vip: Vip) -> Option<Arc<Mutex<BasicBlock>>> {
        self.blocks.get(&vip).map(|e| Arc::clone(e.value()))
    }

    /// Looks up a block by VIP.
    ///
    /// # Errors
    ///
    /// Returns an error if no block is keyed by `vip`.
    pub fn block(&self, vip: Vip) -> Result<Arc<Mutex<BasicBlock>>> {
        self.find_block(vip).ok_or(Error::UnknownBlock(vip))
    }

    /// Snapshot of every block handle, ordered by VIP.
    #[must_use]
    pub fn blocks(&self) -> Vec<Arc<Mutex<BasicBlock>>> {
        self.blocks.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Snapshot of every block VIP, ordered.
    #[must_use]
    pub fn block_vips(&self) -> Vec<Vip> {
        self.blocks.iter().map(|e| *e.key()).collect()
    }

    /// Adds the edge `src -> dst`, keeping the predecessor transpose.
    ///
    /// # Errors
    ///
    /// Returns an error if either block is unknown.
    pub fn link(&self, src: Vip, dst: Vip) -> Result<()> {
        let src_block = self.block(src)?;
        let dst_block = self.block(dst)?;
        if src == dst {
            let mut guard = lock(&src_block);
            guard.add_successor(dst);
            guard.add_predecessor(src);
            return Ok(());
        }
        // Locks are ranked by VIP so concurrent linkers cannot deadlock.
        if src < dst {
            let mut src_guard = lock(&src_block);
            let mut dst_guard = lock(&dst_block);
            src_guard.add_successor(dst);
            dst_guard.add_predecessor(src);
        } else {
            let mut dst_guard = lock(&dst_block);
            let mut src_guard = lock(&src_block);
            src_guard.add_successor(dst);
            dst_guard.add_predecessor(src);
        }
        Ok(())
    }

    /// Removes the edge `src -> dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if either block is unknown.
    pub fn unlink(&self, src: Vip, dst: Vip) -> Result<()> {
        let src_block = self.block(src)?;
        let dst_block = self.block(dst)?;
        if src == dst {
            let mut guard = lock(&src_block);
            guard.remove_successor(dst);
            guard.remove_predecessor(src);
            return Ok(());
        }
        if src < dst {
            let mut src_guard = lock(&src_block);
            let mut dst_guard = lock(&dst_block);
            src_guard.remove_successor(dst);
            dst_guard.remove_predecessor(src);
        } else {
            let mut dst_guard = lock(&dst_block);
            let mut src_guard = lock(&src_block);
            src_guard.remove_successor(dst);
            dst_guard.remove_predecessor(src);
        }
        Ok(())
    }

    /// The calling convention of the routine itself.
    #[must_use]
    pub fn convention(&self) -> CallingConvention {
        self.routine_convention
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Replaces the calling convention of the routine.
    pub fn set_convention(&self, convention: CallingConvention) {
        if let Ok(mut guard) = self.routine_convention.write() {
            *guard = convention;
        }
    }

    /// The convention applied to calls without a per-site override.
    #[must_use]
    pub fn subroutine_convention(&self) -> CallingConvention {
        self.subroutine_convention
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Replaces the fallback subroutine convention.
    pub fn set_subroutine_convention(&self, convention: CallingConvention) {
        if let Ok(mut guard) = self.subroutine_convention.write() {
            *guard = convention;
        }
    }

    /// The convention of the call site at `vip`, falling back to the
    /// routine-wide subroutine convention.
    #[must_use]
    pub fn convention_for(&self, vip: Vip) -> CallingConvention {
        self.spec_subroutine_conventions
            .get(&vip)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.subroutine_convention())
    }

    /// Attaches a per-call-site convention override.
    pub fn set_convention_for(&self, vip: Vip, convention: CallingConvention) {
        self.spec_subroutine_conventions.insert(vip, convention);
    }

    /// Number of optimizations recorded against this routine.
    #[must_use]
    pub fn local_opt_count(&self) -> u64 {
        self.local_opt_count.load(Ordering::Relaxed)
    }

    /// Adds to the optimization counter.
    pub fn add_local_opt_count(&self, count: u64) {
        self.local_opt_count.fetch_add(count, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Path cache.
    // ------------------------------------------------------------------

    fn successors_of(&self, vip: Vip) -> Vec<Vip> {
        self.find_block(vip)
            .map(|b| lock(&b).successors().to_vec())
            .unwrap_or_default()
    }

    fn paths(&self) -> std::sync::MutexGuard<'_, PathCache> {
        let mut guard = lock(&self.path_cache);
        if self.signals.paths_dirty.swap(false, Ordering::AcqRel) {
            guard.clear();
        }
        guard
    }

    fn explore_into(&self, cache: &mut PathCache, src: Vip) {
        if !cache.explored.insert(src) || self.find_block(src).is_none() {
            return;
        }
        let mut path: Vec<Vip> = Vec::new();
        let mut on_path: FxHashSet<Vip> = FxHashSet::default();
        self.walk(cache, &mut path, &mut on_path, src);
    }

    fn walk(
        &self,
        cache: &mut PathCache,
        path: &mut Vec<Vip>,
        on_path: &mut FxHashSet<Vip>,
        node: Vip,
    ) {
        path.push(node);
        on_path.insert(node);

        // Every prefix of the walk ending here is an acyclic path.
        for (start_index, &start) in path.iter().enumerate() {
            let set = cache
                .paths
                .entry(start)
                .or_default()
                .entry(node)
                .or_insert_with(|| Arc::new(FxHashSet::default()));
            Arc::make_mut(set).extend(path[start_index..].iter().copied());
        }

        for successor in self.successors_of(node) {
            if !on_path.contains(&successor) {
                self.walk(cache, path, on_path, successor);
            }
        }

        path.pop();
        on_path.remove(&node);
    }

    /// Extends the path cache with every acyclic walk starting at `vip`.
    pub fn explore_paths(&self, vip: Vip) {
        let mut cache = self.paths();
        self.explore_into(&mut cache, vip);
    }

    /// Clears the path cache.
    pub fn flush_paths(&self) {
        lock(&self.path_cache).clear();
    }

    /// Blocks appearing on any acyclic path from `src` to `dst`, endpoints
    /// included. Empty when no path exists.
    #[must_use]
    pub fn get_path(&self, src: Vip, dst: Vip) -> PathSet {
        let mut cache = self.paths();
        self.explore_into(&mut cache, src);
        cache
            .paths
            .get(&src)
            .and_then(|m| m.get(&dst))
            .cloned()
            .unwrap_or_default()
    }

    /// Returns `true` if an acyclic path from `src` to `dst` exists.
    #[must_use]
    pub fn has_path(&self, src: Vip, dst: Vip) -> bool {
        let mut cache = self.paths();
        self.explore_into(&mut cache, src);
        cache
            .paths
            .get(&src)
            .is_some_and(|m| m.contains_key(&dst))
    }

    /// Returns `true` if the block participates in a loop.
    #[must_use]
    pub fn is_looping(&self, vip: Vip) -> bool {
        self.successors_of(vip)
            .into_iter()
            .any(|successor| self.has_path(successor, vip))
    }

    // ------------------------------------------------------------------
    // Depth-ordered layering.
    // ------------------------------------------------------------------

    /// Topological layering of the CFG, cached per structural epoch.
    ///
    /// `forward` layers by distance from the entry; otherwise by distance
    /// from the exits. Back edges are ignored, so the layering is defined
    /// for cyclic graphs too.
    #[must_use]
    pub fn get_depth_ordered_list(&self, forward: bool) -> Arc<Vec<DepthPlacement>> {
        let epoch = self.cfg_epoch();
        let mut cache = lock(&self.depth_cache);
        let slot = &mut cache[usize::from(forward)];
        if let Some(entry) = slot {
            if entry.epoch == epoch {
                return Arc::clone(&entry.list);
            }
        }
        let list = Arc::new(self.compute_depth_list(forward));
        *slot = Some(DepthCacheEntry {
            epoch,
            list: Arc::clone(&list),
        });
        list
    }

    fn compute_depth_list(&self, forward: bool) -> Vec<DepthPlacement> {
        let vips = self.block_vips();
        let mut edges: FxHashMap<Vip, Vec<Vip>> = FxHashMap::default();
        for &vip in &vips {
            let Some(block) = self.find_block(vip) else {
                continue;
            };
            let guard = lock(&block);
            let targets = if forward {
                guard.successors().to_vec()
            } else {
                guard.predecessors().to_vec()
            };
            edges.insert(
                vip,
                targets.into_iter().filter(|t| *t != vip).collect(),
            );
        }

        let roots: Vec<Vip> = if forward {
            self.entry().into_iter().collect()
        } else {
            vips.iter()
                .copied()
                .filter(|&v| self.successors_of(v).is_empty())
                .collect()
        };

        // Cut back edges with a depth-first walk so the remainder is a DAG.
        let mut back_edges: FxHashSet<(Vip, Vip)> = FxHashSet::default();
        let mut color: FxHashMap<Vip, u8> = FxHashMap::default(); // 0 white, 1 gray, 2 black
        let mut dfs_roots: Vec<Vip> = roots.clone();
        dfs_roots.extend(vips.iter().copied());
        for root in dfs_roots {
            if color.get(&root).copied().unwrap_or(0) != 0 {
                continue;
            }
            let mut stack: Vec<(Vip, usize)> = vec![(root, 0)];
            color.insert(root, 1);
            while let Some((node, child)) = stack.pop() {
                let targets = edges.get(&node).cloned().unwrap_or_default();
                if child < targets.len() {
                    stack.push((node, child + 1));
                    let next = targets[child];
                    match color.get(&next).copied().unwrap_or(0) {
                        0 => {
                            color.insert(next, 1);
                            stack.push((next, 0));
                        }
                        1 => {
                            back_edges.insert((node, next));
                        }
                        _ => {}
                    }
                } else {
                    color.insert(node, 2);
                }
            }
        }

        // Longest-path layering over the remaining DAG.
        let mut indegree: FxHashMap<Vip, usize> = vips.iter().map(|&v| (v, 0)).collect();
        for (&src, targets) in &edges {
            for &dst in targets {
                if !back_edges.contains(&(src, dst)) {
                    *indegree.entry(dst).or_default() += 1;
                }
            }
        }
        let dependency: FxHashMap<Vip, usize> = indegree.clone();

        let mut depth: FxHashMap<Vip, usize> = FxHashMap::default();
        let mut ready: Vec<Vip> = vips
            .iter()
            .copied()
            .filter(|v| indegree.get(v) == Some(&0))
            .collect();
        ready.sort_unstable();
        let mut order: Vec<Vip> = Vec::with_capacity(vips.len());
        while let Some(node) = ready.pop() {
            order.push(node);
            let node_depth = depth.get(&node).copied().unwrap_or(0);
            for &next in edges.get(&node).map(Vec::as_slice).unwrap_or_default() {
                if back_edges.contains(&(node, next)) {
                    continue;
                }
                let d = depth.entry(next).or_insert(0);
                *d = (*d).max(node_depth + 1);
                let in_count = indegree.get_mut(&next).expect("edge to unknown block");
                *in_count -= 1;
                if *in_count == 0 {
                    ready.push(next);
                }
            }
        }

        let mut placements: Vec<DepthPlacement> = vips
            .iter()
            .map(|&vip| DepthPlacement {
                dependency: dependency.get(&vip).copied().unwrap_or(0),
                depth: depth.get(&vip).copied().unwrap_or(0),
                vip,
            })
            .collect();
        placements.sort_unstable_by_key(|p| (p.depth, p.vip));
        placements
    }

    // ------------------------------------------------------------------
    // Statistics.
    // ------------------------------------------------------------------

    /// Blocks without outgoing edges.
    #[must_use]
    pub fn get_exits(&self) -> Vec<Vip> {
        self.blocks
            .iter()
            .filter(|e| lock(e.value()).successors().is_empty())
            .map(|e| *e.key())
            .collect()
    }

    /// Number of blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of instructions across all blocks.
    #[must_use]
    pub fn num_instructions(&self) -> usize {
        self.blocks.iter().map(|e| lock(e.value()).len()).sum()
    }

    /// Number of branching instructions across all blocks.
    #[must_use]
    pub fn num_branches(&self) -> usize {
        self.blocks
            .iter()
            .map(|e| {
                lock(e.value())
                    .instructions()
                    .iter()
                    .filter(|i| i.desc.is_branching())
                    .count()
            })
            .sum()
    }
}

impl std::fmt::Debug for Routine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routine")
            .field("arch_id", &self.arch_id)
            .field("entry", &self.entry())
            .field("blocks", &self.num_blocks())
            .field("epoch", &self.epoch())
            .field("cfg_epoch", &self.cfg_epoch())
            .finish_non_exhaustive()
    }
}
