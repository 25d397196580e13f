// Gate Dispatcher
// Picks the inner loop for an operand set from where its slots live
use log::debug;
use rayon::prelude::*;

use crate::config::ExecutionPolicy;
use crate::engine::gate::{apply_controlled, Gate, GateKind};
use crate::engine::kernels::{
    sweep, sweep_gathered, sweep_runs, sweep_serial, sweep_tiles, AmplitudeView, GatherLayout, GroupOp,
    OpScratch, OperandMasks, Scratch,
};
use crate::engine::memory::PagedStateVector;

/// Where the operand slots of one gate (or one fused group) currently live.
///
/// Every variant computes the same result; they differ in loop nesting and
/// in how much address arithmetic each amplitude costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    /// Some operand selects the page: sweep the whole data block through the page table.
    OnPage,
    /// All operands are in-page and cache tiling is disabled.
    InPage,
    /// All operands fall inside one cache tile, and so does a whole page.
    AllOnCacheSmall,
    /// All operands fall inside one cache tile; pages span several tiles.
    AllOnCache,
    /// No operand falls inside a cache tile.
    NoneOnCache,
    /// Operands straddle the cache-tile boundary.
    SomeOnCache,
}

impl Residency {
    /// Classifies local operand positions; `offset_bits` is the in-page width.
    pub fn classify(positions: &[usize], offset_bits: usize, policy: ExecutionPolicy) -> Self {
        if positions.iter().any(|&p| p >= offset_bits) {
            return Residency::OnPage;
        }
        match policy {
            ExecutionPolicy::Plain => Residency::InPage,
            ExecutionPolicy::CacheAware {
                num_on_cache_qubits,
            } => {
                let on_cache = positions.iter().filter(|&&p| p < num_on_cache_qubits).count();
                if on_cache == positions.len() {
                    if offset_bits <= num_on_cache_qubits {
                        Residency::AllOnCacheSmall
                    } else {
                        Residency::AllOnCache
                    }
                } else if on_cache == 0 {
                    Residency::NoneOnCache
                } else {
                    Residency::SomeOnCache
                }
            }
        }
    }
}

/// One gate applied to each operand group.
pub(crate) struct SingleGate<'g> {
    kind: &'g GateKind,
    num_targets: usize,
    num_controls: usize,
}

impl<'g> SingleGate<'g> {
    pub fn new(gate: &'g Gate) -> Self {
        Self {
            kind: &gate.kind,
            num_targets: gate.targets.len(),
            num_controls: gate.controls.len(),
        }
    }
}

impl GroupOp for SingleGate<'_> {
    #[inline]
    fn call<V: AmplitudeView>(&self, view: &V, indices: &[usize], scratch: &mut OpScratch) {
        apply_controlled(
            self.kind,
            self.num_targets,
            self.num_controls,
            view,
            indices,
            &mut scratch.amplitudes,
        );
    }
}

/// Runs group operations over a container with the configured policy.
#[derive(Debug, Clone, Copy)]
pub struct GateDispatcher {
    policy: ExecutionPolicy,
}

impl GateDispatcher {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    pub fn classify(&self, storage: &PagedStateVector, positions: &[usize]) -> Residency {
        Residency::classify(positions, storage.offset_bits(), self.policy)
    }

    fn cache_bits(&self) -> usize {
        match self.policy {
            ExecutionPolicy::CacheAware {
                num_on_cache_qubits,
            } => num_on_cache_qubits,
            ExecutionPolicy::Plain => 0,
        }
    }

    /// Applies `op` to every operand group of every data block.
    ///
    /// `positions` are local slots in operand order; all must be below
    /// `num_local_qubits`.
    pub(crate) fn run<O: GroupOp>(
        &self,
        storage: &mut PagedStateVector,
        positions: &[usize],
        op: &O,
    ) -> Residency {
        let residency = self.classify(storage, positions);
        debug!("[Dispatch] slots {:?} -> {:?}", positions, residency);

        let n = positions.len();
        let page_size = storage.page_size();
        let masks = OperandMasks::new(positions);
        match residency {
            Residency::OnPage => {
                let num_groups = 1usize << (storage.num_local_qubits() - n);
                for data_block in 0..storage.num_data_blocks() {
                    let view = storage.block_view_mut(data_block);
                    sweep(&view, &masks, num_groups, op);
                }
            }
            Residency::InPage => {
                for view in storage.page_views_mut() {
                    sweep(&view, &masks, page_size >> n, op);
                }
            }
            Residency::AllOnCacheSmall => {
                // Pages are small: one task per page, serial inside
                storage
                    .page_views_mut()
                    .par_iter()
                    .for_each_init(Scratch::default, |scratch, view| {
                        sweep_serial(view, &masks, page_size >> n, op, scratch);
                    });
            }
            Residency::AllOnCache => {
                for view in storage.page_views_mut() {
                    sweep_tiles(&view, &masks, self.cache_bits(), op);
                }
            }
            Residency::NoneOnCache => {
                // Every operand sits above the tile bits: the tile-wide low
                // bits are contiguous runs that need no gathering
                for view in storage.page_views_mut() {
                    sweep_runs(&view, &masks, self.cache_bits(), op);
                }
            }
            Residency::SomeOnCache => {
                let layout = GatherLayout::new(positions, storage.offset_bits(), self.cache_bits());
                for view in storage.page_views_mut() {
                    sweep_gathered(&view, &layout, op);
                }
            }
        }
        residency
    }
}
