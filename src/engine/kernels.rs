// Computation Kernels
// Index arithmetic and parallel sweeps shared by every execution strategy
use rayon::prelude::*;
use std::marker::PhantomData;

use crate::config::Complex;

/// Fewest operand groups handed to one rayon task.
const MIN_GROUPS_PER_TASK: usize = 64;

/// Read/write access to amplitudes by local index.
///
/// Views are shared between worker threads. They are sound because every sweep
/// hands disjoint index sets to different threads.
pub trait AmplitudeView: Sync {
    fn load(&self, index: usize) -> Complex;
    fn store(&self, index: usize, value: Complex);
}

/// A contiguous amplitude range (one page, one cache tile, or a gather buffer).
pub struct FlatView<'a> {
    ptr: *mut Complex,
    len: usize,
    _marker: PhantomData<&'a mut [Complex]>,
}

unsafe impl Send for FlatView<'_> {}
unsafe impl Sync for FlatView<'_> {}

impl<'a> FlatView<'a> {
    /// # Safety
    /// Concurrent users of the view must touch disjoint indices.
    pub unsafe fn new(data: &'a mut [Complex]) -> Self {
        Self {
            ptr: data.as_mut_ptr(),
            len: data.len(),
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// `ptr..ptr+len` must be valid and exclusively owned for `'a`.
    pub(crate) unsafe fn from_raw(ptr: *mut Complex, len: usize) -> Self {
        Self {
            ptr,
            len,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sub-view over `start..start+len`.
    pub(crate) fn slice(&self, start: usize, len: usize) -> FlatView<'a> {
        debug_assert!(start + len <= self.len);
        // Safety: inside the parent range
        unsafe { FlatView::from_raw(self.ptr.add(start), len) }
    }

    /// Copies `dst.len()` amplitudes starting at `start` into `dst`.
    #[inline]
    pub(crate) fn read_run(&self, start: usize, dst: &mut [Complex]) {
        debug_assert!(start + dst.len() <= self.len);
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(start), dst.as_mut_ptr(), dst.len()) }
    }

    #[inline]
    pub(crate) fn write_run(&self, start: usize, src: &[Complex]) {
        debug_assert!(start + src.len() <= self.len);
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(start), src.len()) }
    }
}

impl AmplitudeView for FlatView<'_> {
    #[inline]
    fn load(&self, index: usize) -> Complex {
        debug_assert!(index < self.len);
        unsafe { *self.ptr.add(index) }
    }

    #[inline]
    fn store(&self, index: usize, value: Complex) {
        debug_assert!(index < self.len);
        unsafe { *self.ptr.add(index) = value }
    }
}

/// All pages of one data block addressed as a single local index space.
pub struct PagedView<'a> {
    pages: Vec<*mut Complex>,
    offset_bits: usize,
    offset_mask: usize,
    _marker: PhantomData<&'a mut [Complex]>,
}

unsafe impl Send for PagedView<'_> {}
unsafe impl Sync for PagedView<'_> {}

impl PagedView<'_> {
    /// # Safety
    /// Every pointer must address `2^offset_bits` exclusively owned amplitudes.
    pub(crate) unsafe fn new(pages: Vec<*mut Complex>, offset_bits: usize) -> Self {
        Self {
            pages,
            offset_bits,
            offset_mask: (1 << offset_bits) - 1,
            _marker: PhantomData,
        }
    }
}

impl AmplitudeView for PagedView<'_> {
    #[inline]
    fn load(&self, index: usize) -> Complex {
        unsafe { *self.pages[index >> self.offset_bits].add(index & self.offset_mask) }
    }

    #[inline]
    fn store(&self, index: usize, value: Complex) {
        unsafe { *self.pages[index >> self.offset_bits].add(index & self.offset_mask) = value }
    }
}

/// Precomputed masks turning a group number into operand amplitude indices.
///
/// Operand `i` sits at bit `positions[i]`. A group number is the index with
/// every operand bit removed; `fill` re-inserts those bits in all `2^n`
/// combinations, ordered so that bit `i` of the output slot is operand `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandMasks {
    qubit_masks: Vec<usize>,
    index_masks: Vec<usize>,
}

impl OperandMasks {
    pub fn new(positions: &[usize]) -> Self {
        let qubit_masks: Vec<usize> = positions.iter().map(|&p| 1 << p).collect();

        let mut sorted = positions.to_vec();
        sorted.sort_unstable();
        let mut cumulative: Vec<usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, &p)| (1usize << (p - i)) - 1)
            .collect();
        cumulative.push(!0);
        let index_masks = cumulative
            .iter()
            .enumerate()
            .map(|(i, &m)| if i == 0 { m } else { m & !cumulative[i - 1] })
            .collect();

        Self {
            qubit_masks,
            index_masks,
        }
    }

    pub fn num_operands(&self) -> usize {
        self.qubit_masks.len()
    }

    /// Spreads `index_wo_qubits` around the operand bits, leaving them zero.
    #[inline]
    pub fn index_with_qubits(&self, index_wo_qubits: usize) -> usize {
        self.index_masks
            .iter()
            .enumerate()
            .fold(0, |acc, (i, &m)| acc | ((index_wo_qubits & m) << i))
    }

    /// Writes the `2^n` amplitude indices of group `index_wo_qubits` into `out`.
    #[inline]
    pub fn fill(&self, index_wo_qubits: usize, out: &mut Vec<usize>) {
        let count = 1usize << self.qubit_masks.len();
        out.clear();
        out.push(self.index_with_qubits(index_wo_qubits));
        for j in 1..count {
            let value = out[j & (j - 1)] | self.qubit_masks[j.trailing_zeros() as usize];
            out.push(value);
        }
    }
}

/// Working memory of one group operation.
#[derive(Default)]
pub(crate) struct OpScratch {
    pub local: Vec<usize>,
    pub sub_indices: Vec<usize>,
    pub amplitudes: Vec<Complex>,
}

/// Per-thread working memory of a sweep.
#[derive(Default)]
pub(crate) struct Scratch {
    pub indices: Vec<usize>,
    pub op: OpScratch,
}

/// The work done on one operand group: a single gate, or a fused replay.
pub(crate) trait GroupOp: Sync {
    fn call<V: AmplitudeView>(&self, view: &V, indices: &[usize], scratch: &mut OpScratch);
}

/// Visits every group of `view` in parallel.
pub(crate) fn sweep<V: AmplitudeView, O: GroupOp>(
    view: &V,
    masks: &OperandMasks,
    num_groups: usize,
    op: &O,
) {
    (0..num_groups)
        .into_par_iter()
        .with_min_len(MIN_GROUPS_PER_TASK)
        .for_each_init(Scratch::default, |scratch, group| {
            let Scratch {
                indices,
                op: op_scratch,
            } = scratch;
            masks.fill(group, indices);
            op.call(view, indices, op_scratch);
        });
}

/// Visits every group of `view` on the calling thread.
pub(crate) fn sweep_serial<V: AmplitudeView, O: GroupOp>(
    view: &V,
    masks: &OperandMasks,
    num_groups: usize,
    op: &O,
    scratch: &mut Scratch,
) {
    let Scratch {
        indices,
        op: op_scratch,
    } = scratch;
    for group in 0..num_groups {
        masks.fill(group, indices);
        op.call(view, indices, op_scratch);
    }
}

/// Runs `op` over consecutive tiles of `2^tile_bits` amplitudes, one task per tile.
///
/// Valid only when every operand position is below `tile_bits`.
pub(crate) fn sweep_tiles<O: GroupOp>(
    page: &FlatView<'_>,
    masks: &OperandMasks,
    tile_bits: usize,
    op: &O,
) {
    let tile_size = 1usize << tile_bits;
    let num_groups = tile_size >> masks.num_operands();
    (0..page.len() / tile_size)
        .into_par_iter()
        .for_each_init(Scratch::default, |scratch, tile| {
            let view = page.slice(tile * tile_size, tile_size);
            sweep_serial(&view, masks, num_groups, op, scratch);
        });
}

/// Walks the `2^n` operand runs of each group side by side, one task per run
/// set, stepping through the low `run_bits` offsets in the inner loop.
///
/// Valid only when every operand position is at or above `run_bits`, so the
/// low bits of a group index pass through the masks unchanged.
pub(crate) fn sweep_runs<O: GroupOp>(
    page: &FlatView<'_>,
    masks: &OperandMasks,
    run_bits: usize,
    op: &O,
) {
    let run_len = 1usize << run_bits;
    let num_run_sets = (page.len() >> masks.num_operands()) >> run_bits;
    (0..num_run_sets).into_par_iter().for_each_init(
        || (Vec::new(), Scratch::default()),
        |(starts, scratch): &mut (Vec<usize>, Scratch), set| {
            masks.fill(set << run_bits, starts);
            let Scratch {
                indices,
                op: op_scratch,
            } = scratch;
            for offset in 0..run_len {
                indices.clear();
                indices.extend(starts.iter().map(|&start| start | offset));
                op.call(page, indices, op_scratch);
            }
        },
    );
}

/// Addressing of a gathered cache tile.
///
/// The tile collects the operand bits plus the lowest free bits until it spans
/// `2^num_on_cache_qubits` amplitudes. Its content is copied in runs over the
/// low contiguous tile bits, processed densely, and written back.
#[derive(Debug, Clone)]
pub(crate) struct GatherLayout {
    tile_masks: OperandMasks,
    run_len: usize,
    run_offsets: Vec<usize>,
    local_masks: OperandMasks,
    num_tiles: usize,
    tile_size: usize,
}

impl GatherLayout {
    pub fn new(positions: &[usize], offset_bits: usize, num_on_cache_qubits: usize) -> Self {
        let n = positions.len();
        let width = num_on_cache_qubits.max(n).min(offset_bits);

        let mut tile_bits = positions.to_vec();
        let mut bit = 0;
        while tile_bits.len() < width {
            if !positions.contains(&bit) {
                tile_bits.push(bit);
            }
            bit += 1;
        }
        tile_bits.sort_unstable();

        let run_bits = tile_bits
            .iter()
            .enumerate()
            .take_while(|&(i, &b)| i == b)
            .count();
        let mut run_offsets = Vec::with_capacity(1 << (width - run_bits));
        run_offsets.push(0usize);
        for j in 1..1usize << (width - run_bits) {
            let value = run_offsets[j & (j - 1)] | (1 << tile_bits[run_bits + j.trailing_zeros() as usize]);
            run_offsets.push(value);
        }

        let local_positions: Vec<usize> = positions
            .iter()
            .map(|&p| tile_bits.partition_point(|&b| b < p))
            .collect();

        Self {
            tile_masks: OperandMasks::new(&tile_bits),
            run_len: 1 << run_bits,
            run_offsets,
            local_masks: OperandMasks::new(&local_positions),
            num_tiles: 1 << (offset_bits - width),
            tile_size: 1 << width,
        }
    }

    pub fn num_tiles(&self) -> usize {
        self.num_tiles
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }
}

/// Gathers each tile of `page` into a thread-local buffer, runs `op` there and
/// scatters the result back.
pub(crate) fn sweep_gathered<O: GroupOp>(page: &FlatView<'_>, layout: &GatherLayout, op: &O) {
    let num_groups = layout.tile_size >> layout.local_masks.num_operands();
    (0..layout.num_tiles).into_par_iter().for_each_init(
        || {
            (
                vec![Complex::new(0.0, 0.0); layout.tile_size],
                Scratch::default(),
            )
        },
        |(tile, scratch), k| {
            let base = layout.tile_masks.index_with_qubits(k);
            for (run, &offset) in tile.chunks_mut(layout.run_len).zip(&layout.run_offsets) {
                page.read_run(base | offset, run);
            }
            {
                // Safety: the tile buffer is private to this task
                let view = unsafe { FlatView::new(tile) };
                sweep_serial(&view, &layout.local_masks, num_groups, op, scratch);
            }
            for (run, &offset) in tile.chunks(layout.run_len).zip(&layout.run_offsets) {
                page.write_run(base | offset, run);
            }
        },
    );
}
