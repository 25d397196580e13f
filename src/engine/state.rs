// Distributed State
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::{constants, Complex, Real, StateConfig, StateInteger};
use crate::engine::dispatch::{GateDispatcher, Residency, SingleGate};
use crate::engine::fusion::{FusionEngine, ReplayForm};
use crate::engine::gate::Gate;
use crate::engine::kernels::AmplitudeView;
use crate::engine::memory::PagedStateVector;
use crate::engine::permutation::QubitPermutation;
use crate::engine::qubit::Qubit;
use crate::engine::relocation;
use crate::engine::transport::Transport;
use crate::error::{Result, SimError};

/// One rank's share of a distributed, paged state vector.
///
/// Owns the amplitude container, the qubit permutation (identical on every
/// rank), the fusion recorder and a private worker pool. Every method that
/// may relocate data is collective: all ranks must call it in the same order.
pub struct DistributedState<T: Transport> {
    config: StateConfig,
    storage: PagedStateVector,
    permutation: QubitPermutation,
    transport: T,
    dispatcher: GateDispatcher,
    fusion: FusionEngine,
    pool: rayon::ThreadPool,
    rng: StdRng,
    num_global_qubits: usize,
}

impl<T: Transport> DistributedState<T> {
    /// Creates the state |0...0>.
    pub fn new(config: StateConfig, transport: T) -> Result<Self> {
        Self::with_basis_state(config, transport, 0)
    }

    /// Creates the computational basis state `basis` (logical bit order).
    pub fn with_basis_state(config: StateConfig, transport: T, basis: StateInteger) -> Result<Self> {
        let num_ranks = transport.num_ranks();
        config.validate(num_ranks)?;
        let num_global_qubits = num_ranks.trailing_zeros() as usize;
        let num_qubits = config.num_local_qubits + num_global_qubits;

        let permutation = match &config.initial_permutation {
            Some(slots) => QubitPermutation::from_slots(slots)?,
            None => QubitPermutation::new(num_qubits),
        };
        let storage = PagedStateVector::new(
            config.num_local_qubits,
            config.num_page_qubits,
            config.num_data_blocks,
            config.backing_store.as_deref(),
        )?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("qp-worker-{i}"))
            .build()
            .map_err(|e| SimError::InvalidConfiguration(e.to_string()))?;

        info!(
            "[Rust Core] rank {}/{}: {} qubits ({} local, {} page), {} data block(s), {:?}",
            transport.rank(),
            num_ranks,
            num_qubits,
            config.num_local_qubits,
            config.num_page_qubits,
            config.num_data_blocks,
            config.policy
        );

        let mut state = Self {
            dispatcher: GateDispatcher::new(config.policy),
            fusion: FusionEngine::new(num_qubits, config.effective_max_fused_qubits()),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            storage,
            permutation,
            transport,
            pool,
            num_global_qubits,
        };
        state.reset(basis);
        Ok(state)
    }

    /// Overwrites every data block with the basis state `basis`.
    pub fn reset(&mut self, basis: StateInteger) {
        let address = self.permutation.permutate_bits(basis);
        let num_local = self.num_local_qubits();
        let owner = (address >> num_local) as usize;
        let index = (address & ((1 << num_local) - 1)) as usize;
        for data_block in 0..self.storage.num_data_blocks() {
            self.storage.clear_block(data_block);
            if owner == self.transport.rank() {
                self.storage[(data_block, index)] = Complex::new(1.0, 0.0);
            }
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn num_qubits(&self) -> usize {
        self.permutation.len()
    }

    pub fn num_local_qubits(&self) -> usize {
        self.storage.num_local_qubits()
    }

    pub fn num_global_qubits(&self) -> usize {
        self.num_global_qubits
    }

    pub fn num_page_qubits(&self) -> usize {
        self.storage.num_page_qubits()
    }

    pub fn num_pages(&self) -> usize {
        self.storage.num_pages()
    }

    pub fn num_data_blocks(&self) -> usize {
        self.storage.num_data_blocks()
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn num_ranks(&self) -> usize {
        self.transport.num_ranks()
    }

    pub fn permutation(&self) -> &QubitPermutation {
        &self.permutation
    }

    /// Read-only access to the local container (pages, scratch, raw elements).
    pub fn storage(&self) -> &PagedStateVector {
        &self.storage
    }

    pub fn is_fusing(&self) -> bool {
        self.fusion.is_fusing()
    }

    /// The strategy a gate on `qubits` would run with right now, if all of
    /// them are already local.
    pub fn residency_of(&self, qubits: &[Qubit]) -> Option<Residency> {
        let positions = self.local_positions(qubits)?;
        Some(self.dispatcher.classify(&self.storage, &positions))
    }

    fn local_positions(&self, qubits: &[Qubit]) -> Option<Vec<usize>> {
        let num_local = self.num_local_qubits();
        qubits
            .iter()
            .map(|&q| self.permutation.physical_slot_of(q).position())
            .map(|p| (p < num_local).then_some(p))
            .collect()
    }

    fn localize(&mut self, qubits: &[Qubit]) -> Result<Vec<usize>> {
        let Self {
            storage,
            permutation,
            transport,
            pool,
            ..
        } = self;
        pool.install(|| relocation::make_local(storage, permutation, transport, qubits))?;
        Ok(qubits
            .iter()
            .map(|&q| self.permutation.physical_slot_of(q).position())
            .collect())
    }

    fn check_operands(&self, gate: &Gate) -> Result<()> {
        let max = self.config.effective_max_operated_qubits();
        if gate.num_operands() > max {
            return Err(SimError::TooManyOperatedQubits {
                requested: gate.num_operands(),
                max,
            });
        }
        debug_assert!(gate.operands().all(|q| q.index() < self.num_qubits()));
        Ok(())
    }

    fn ensure_not_fusing(&self, operation: &str) -> Result<()> {
        if self.fusion.is_fusing() {
            return Err(SimError::UnsupportedOperationDuringFusion {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Applies `gate`, or records it while fusing.
    pub fn apply_gate(&mut self, gate: &Gate) -> Result<()> {
        self.check_operands(gate)?;
        if self.fusion.is_fusing() {
            return self.fusion.record(gate);
        }
        let operands: Vec<Qubit> = gate.operands().collect();
        let positions = self.localize(&operands)?;
        let op = SingleGate::new(gate);
        let Self {
            storage,
            dispatcher,
            pool,
            ..
        } = self;
        pool.install(|| dispatcher.run(storage, &positions, &op));
        Ok(())
    }

    pub fn begin_fusion(&mut self) {
        self.fusion.begin();
    }

    /// Localizes the fused qubit set and replays every recorded gate in one
    /// sweep per fused group. A no-op when not fusing.
    pub fn end_fusion(&mut self) -> Result<()> {
        if !self.fusion.is_fusing() {
            return Ok(());
        }
        let replayed = self.replay_fused();
        self.fusion.finish();
        replayed
    }

    /// Drops every gate recorded since `begin_fusion` and returns to idle.
    /// The amplitudes are left as they were before the window opened.
    pub fn abort_fusion(&mut self) {
        if self.fusion.is_fusing() {
            debug!(
                "[Fusion] aborting with {} recorded gate(s)",
                self.fusion.num_recorded()
            );
            self.fusion.finish();
        }
    }

    fn replay_fused(&mut self) -> Result<()> {
        let qubits = self.fusion.fused_qubits().to_vec();
        if !qubits.is_empty() {
            let positions = self.localize(&qubits)?;
            let residency = self.dispatcher.classify(&self.storage, &positions);
            let form = ReplayForm::for_residency(residency);
            debug!(
                "[Fusion] replaying {} gate(s) as {:?} ({:?})",
                self.fusion.num_recorded(),
                form,
                residency
            );
            let Self {
                storage,
                dispatcher,
                pool,
                fusion,
                ..
            } = self;
            let replay = fusion.replay(form);
            pool.install(|| dispatcher.run(storage, &positions, &replay));
        }
        Ok(())
    }

    /// Exchanges the physical slots of two qubits; the logical state is unchanged.
    pub fn swap_qubits(&mut self, a: Qubit, b: Qubit) -> Result<()> {
        let Self {
            storage,
            permutation,
            transport,
            pool,
            ..
        } = self;
        pool.install(|| relocation::relocate_pair(storage, permutation, transport, a, b))
    }

    /// Per data block, the probability that `position` reads 0 on this rank.
    fn local_zero_probabilities(&mut self, position: usize) -> Vec<Real> {
        let num_local = self.num_local_qubits();
        let mask = 1usize << position;
        let Self { storage, pool, .. } = self;
        pool.install(|| {
            (0..storage.num_data_blocks())
                .map(|data_block| {
                    let view = storage.block_view_mut(data_block);
                    (0..1usize << num_local)
                        .into_par_iter()
                        .filter(|i| i & mask == 0)
                        .map(|i| view.load(i).norm_sqr())
                        .sum::<Real>()
                })
                .collect()
        })
    }

    /// Keeps the half where `position` equals `outcomes[b]`, scaled by
    /// `multipliers[b]`, and zeroes the other half.
    fn project(&mut self, position: usize, outcomes: &[bool], multipliers: &[Real]) {
        let num_local = self.num_local_qubits();
        let mask = 1usize << position;
        let Self { storage, pool, .. } = self;
        pool.install(|| {
            for data_block in 0..storage.num_data_blocks() {
                let keep = if outcomes[data_block] { mask } else { 0 };
                let multiplier = multipliers[data_block];
                let view = storage.block_view_mut(data_block);
                (0..1usize << num_local).into_par_iter().for_each(|i| {
                    if i & mask == keep {
                        view.store(i, view.load(i) * multiplier);
                    } else {
                        view.store(i, Complex::new(0.0, 0.0));
                    }
                });
            }
        });
    }

    /// Forces `qubit` to `value` in every data block.
    ///
    /// A block with weight left in the requested half is projected and
    /// renormalized. A block with none is flipped instead.
    fn prepare(&mut self, qubit: Qubit, value: bool, operation: &str) -> Result<()> {
        self.ensure_not_fusing(operation)?;
        let positions = self.localize(&[qubit])?;
        let position = positions[0];
        let mut probabilities = self.local_zero_probabilities(position);
        self.transport.all_reduce_sum(&mut probabilities)?;

        let kept: Vec<Real> = probabilities
            .iter()
            .map(|&p0| if value { 1.0 - p0 } else { p0 })
            .collect();
        // Only the empty halves are flipped; blocks are handled together so
        // every rank takes the same branch
        let flips: Vec<bool> = kept.iter().map(|&p| p <= 0.0).collect();
        let outcomes: Vec<bool> = flips.iter().map(|&flip| value != flip).collect();
        let multipliers: Vec<Real> = kept
            .iter()
            .map(|&p| if p > 0.0 { p.sqrt().recip() } else { 1.0 })
            .collect();
        debug!("[Rust Core] {} {}: kept weight {:?}", operation, qubit, kept);
        self.project(position, &outcomes, &multipliers);
        if flips.iter().any(|&f| f) {
            self.flip_blocks(position, &flips);
        }
        Ok(())
    }

    /// Applies X on local slot `position` in the selected data blocks only.
    fn flip_blocks(&mut self, position: usize, blocks: &[bool]) {
        let num_local = self.num_local_qubits();
        let mask = 1usize << position;
        let Self { storage, pool, .. } = self;
        pool.install(|| {
            for (data_block, _) in blocks.iter().enumerate().filter(|&(_, &f)| f) {
                let view = storage.block_view_mut(data_block);
                (0..1usize << num_local)
                    .into_par_iter()
                    .filter(|i| i & mask == 0)
                    .for_each(|i| {
                        let (a, b) = (view.load(i), view.load(i | mask));
                        view.store(i, b);
                        view.store(i | mask, a);
                    });
            }
        });
    }

    /// Projects `qubit` onto |0> and renormalizes.
    pub fn clear(&mut self, qubit: Qubit) -> Result<()> {
        self.prepare(qubit, false, "clear")
    }

    /// Projects `qubit` onto |1> and renormalizes.
    pub fn set(&mut self, qubit: Qubit) -> Result<()> {
        self.prepare(qubit, true, "set")
    }

    /// Measures `qubit` in every data block and collapses the state.
    ///
    /// The root rank draws the outcomes and broadcasts them, so every rank
    /// returns the same values.
    pub fn measure(&mut self, qubit: Qubit) -> Result<Vec<u8>> {
        self.ensure_not_fusing("measure")?;
        let positions = self.localize(&[qubit])?;
        let position = positions[0];
        let mut probabilities = self.local_zero_probabilities(position);
        self.transport.all_reduce_sum(&mut probabilities)?;

        let mut drawn: Vec<Real> = if self.rank() == constants::ROOT_RANK {
            probabilities
                .iter()
                .map(|&p0| if self.rng.gen::<Real>() < p0 { 0.0 } else { 1.0 })
                .collect()
        } else {
            vec![0.0; probabilities.len()]
        };
        self.transport
            .broadcast_reals(&mut drawn, constants::ROOT_RANK)?;

        let outcomes: Vec<bool> = drawn.iter().map(|&v| v > 0.5).collect();
        let multipliers: Vec<Real> = outcomes
            .iter()
            .zip(&probabilities)
            .map(|(&one, &p0)| if one { 1.0 - p0 } else { p0 })
            .map(|p| if p > 0.0 { p.sqrt().recip() } else { 1.0 })
            .collect();
        debug!("[Rust Core] measure {}: {:?}", qubit, outcomes);
        self.project(position, &outcomes, &multipliers);
        Ok(outcomes.into_iter().map(u8::from).collect())
    }

    /// Spin expectation values <S_x>, <S_y>, <S_z> of `qubit` in `data_block`,
    /// with S = sigma/2.
    pub fn spin_expectation_value(&mut self, data_block: usize, qubit: Qubit) -> Result<[Real; 3]> {
        self.ensure_not_fusing("spin_expectation_value")?;
        debug_assert!(data_block < self.num_data_blocks());
        let position = self.localize(&[qubit])?[0];
        let num_local = self.num_local_qubits();
        let mask = 1usize << position;
        let Self { storage, pool, .. } = self;
        let mut spin = pool.install(|| {
            let view = storage.block_view_mut(data_block);
            (0..1usize << (num_local - 1))
                .into_par_iter()
                .map(|k| {
                    let zero = ((k >> position) << (position + 1)) | (k & (mask - 1));
                    let (a0, a1) = (view.load(zero), view.load(zero | mask));
                    let product = a0.conj() * a1;
                    [
                        product.re,
                        product.im,
                        0.5 * (a0.norm_sqr() - a1.norm_sqr()),
                    ]
                })
                .reduce(
                    || [0.0; 3],
                    |a, b| [a[0] + b[0], a[1] + b[1], a[2] + b[2]],
                )
        });
        self.transport.all_reduce_sum(&mut spin)?;
        Ok(spin)
    }

    /// [`Self::spin_expectation_value`] for every logical qubit, in qubit order.
    pub fn spin_expectation_values(&mut self, data_block: usize) -> Result<Vec<[Real; 3]>> {
        (0..self.num_qubits())
            .map(|q| self.spin_expectation_value(data_block, Qubit::new(q)))
            .collect()
    }

    /// Squared norm of each data block over all ranks.
    pub fn norm_squared(&mut self) -> Result<Vec<Real>> {
        let num_local = self.num_local_qubits();
        let Self { storage, pool, .. } = self;
        let mut sums: Vec<Real> = pool.install(|| {
            (0..storage.num_data_blocks())
                .map(|data_block| {
                    let view = storage.block_view_mut(data_block);
                    (0..1usize << num_local)
                        .into_par_iter()
                        .map(|i| view.load(i).norm_sqr())
                        .sum::<Real>()
                })
                .collect()
        });
        self.transport.all_reduce_sum(&mut sums)?;
        Ok(sums)
    }

    /// The amplitude of logical basis state `basis`, if this rank holds it.
    pub fn amplitude(&self, data_block: usize, basis: StateInteger) -> Option<Complex> {
        let address = self.permutation.permutate_bits(basis);
        let num_local = self.num_local_qubits();
        if (address >> num_local) as usize != self.rank() {
            return None;
        }
        self.storage
            .at(data_block, (address & ((1 << num_local) - 1)) as usize)
            .copied()
    }

    /// Collective: every rank receives the full logically ordered vector of
    /// `data_block`.
    pub fn gather(&mut self, data_block: usize) -> Result<Vec<Complex>> {
        let num_local = self.num_local_qubits();
        let local_size = 1usize << num_local;
        let mut full = vec![Complex::new(0.0, 0.0); local_size << self.num_global_qubits];
        let mut buffer = vec![Complex::new(0.0, 0.0); local_size];
        for root in 0..self.num_ranks() {
            if root == self.rank() {
                for (i, amp) in buffer.iter_mut().enumerate() {
                    *amp = self.storage[(data_block, i)];
                }
            }
            self.transport.broadcast(&mut buffer, root)?;
            for (i, &amp) in buffer.iter().enumerate() {
                let address = ((root << num_local) | i) as StateInteger;
                full[self.permutation.inverse_permutate_bits(address) as usize] = amp;
            }
        }
        Ok(full)
    }
}
