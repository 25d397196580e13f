// Gate Fusion
// Records gates between begin/end and replays them in one sweep per group
use bitvec::prelude::*;
use log::debug;

use crate::engine::dispatch::Residency;
use crate::engine::gate::{apply_controlled, Gate, GateKind};
use crate::engine::kernels::{AmplitudeView, GroupOp, OpScratch, OperandMasks};
use crate::engine::qubit::Qubit;
use crate::error::{Result, SimError};

/// How a fused entry locates its operand amplitudes inside a fused group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayForm {
    /// Walk the group index space and skip indices with operand bits set.
    Indexed,
    /// Use precomputed masks; cheaper per sub-group, picked for cache-resident sweeps.
    Masked,
}

impl ReplayForm {
    pub fn for_residency(residency: Residency) -> Self {
        match residency {
            Residency::OnPage | Residency::InPage => ReplayForm::Indexed,
            Residency::AllOnCacheSmall
            | Residency::AllOnCache
            | Residency::NoneOnCache
            | Residency::SomeOnCache => ReplayForm::Masked,
        }
    }
}

#[derive(Debug, Clone)]
enum Operands {
    Indexed {
        coordinates: Vec<usize>,
        coordinate_mask: usize,
    },
    Masked(OperandMasks),
}

/// A recorded gate in fused-local coordinates.
///
/// Coordinate `i` is bit `i` of a fused group index, i.e. the i-th distinct
/// qubit seen since `begin_fusion`.
#[derive(Debug, Clone)]
pub(crate) struct FusedGate {
    kind: GateKind,
    num_targets: usize,
    num_controls: usize,
    operands: Operands,
}

impl FusedGate {
    /// Applies the gate to every operand sub-group of one fused group.
    #[inline]
    fn apply<V: AmplitudeView>(
        &self,
        view: &V,
        group: &[usize],
        num_fused: usize,
        scratch: &mut OpScratch,
    ) {
        let OpScratch {
            local,
            sub_indices,
            amplitudes,
        } = scratch;
        match &self.operands {
            Operands::Masked(masks) => {
                for sub_group in 0..1usize << (num_fused - masks.num_operands()) {
                    masks.fill(sub_group, local);
                    sub_indices.clear();
                    sub_indices.extend(local.iter().map(|&l| group[l]));
                    apply_controlled(
                        &self.kind,
                        self.num_targets,
                        self.num_controls,
                        view,
                        sub_indices,
                        amplitudes,
                    );
                }
            }
            Operands::Indexed {
                coordinates,
                coordinate_mask,
            } => {
                for base in (0..1usize << num_fused).filter(|b| b & coordinate_mask == 0) {
                    sub_indices.clear();
                    sub_indices.push(group[base]);
                    local.clear();
                    local.push(base);
                    for j in 1..1usize << coordinates.len() {
                        let l = local[j & (j - 1)] | (1 << coordinates[j.trailing_zeros() as usize]);
                        local.push(l);
                        sub_indices.push(group[l]);
                    }
                    apply_controlled(
                        &self.kind,
                        self.num_targets,
                        self.num_controls,
                        view,
                        sub_indices,
                        amplitudes,
                    );
                }
            }
        }
    }
}

/// Replays a fused list, in recording order, on each fused group.
pub(crate) struct FusedReplay<'a> {
    entries: &'a [FusedGate],
    num_fused: usize,
}

impl GroupOp for FusedReplay<'_> {
    #[inline]
    fn call<V: AmplitudeView>(&self, view: &V, indices: &[usize], scratch: &mut OpScratch) {
        for entry in self.entries {
            entry.apply(view, indices, self.num_fused, scratch);
        }
    }
}

/// Idle/fusing state machine plus the recorded gate lists.
///
/// Each recorded gate is stored once per [`ReplayForm`]; the form actually
/// replayed is only known once the fused set has been localized at `finish`.
#[derive(Debug)]
pub struct FusionEngine {
    fusing: bool,
    max_fused_qubits: usize,
    fused_qubits: Vec<Qubit>,
    members: BitVec,
    coordinates: Vec<usize>,
    indexed: Vec<FusedGate>,
    masked: Vec<FusedGate>,
}

impl FusionEngine {
    pub fn new(num_qubits: usize, max_fused_qubits: usize) -> Self {
        Self {
            fusing: false,
            max_fused_qubits,
            fused_qubits: Vec::new(),
            members: bitvec![0; num_qubits],
            coordinates: vec![0; num_qubits],
            indexed: Vec::new(),
            masked: Vec::new(),
        }
    }

    pub fn is_fusing(&self) -> bool {
        self.fusing
    }

    pub fn max_fused_qubits(&self) -> usize {
        self.max_fused_qubits
    }

    pub fn begin(&mut self) {
        if !self.fusing {
            debug!("[Fusion] begin");
        }
        self.fusing = true;
    }

    /// Qubits touched since `begin`, in coordinate order.
    pub fn fused_qubits(&self) -> &[Qubit] {
        &self.fused_qubits
    }

    pub fn num_recorded(&self) -> usize {
        self.indexed.len()
    }

    /// Appends `gate` to every list. Fails without recording anything if the
    /// fused set would grow past `max_fused_qubits`.
    pub fn record(&mut self, gate: &Gate) -> Result<()> {
        let new_qubits = gate
            .operands()
            .filter(|q| !self.members[q.index()])
            .count();
        let requested = self.fused_qubits.len() + new_qubits;
        if requested > self.max_fused_qubits {
            return Err(SimError::TooManyOperatedQubits {
                requested,
                max: self.max_fused_qubits,
            });
        }

        for q in gate.operands() {
            if !self.members[q.index()] {
                self.members.set(q.index(), true);
                self.coordinates[q.index()] = self.fused_qubits.len();
                self.fused_qubits.push(q);
            }
        }
        let coordinates: Vec<usize> = gate
            .operands()
            .map(|q| self.coordinates[q.index()])
            .collect();
        let coordinate_mask = coordinates.iter().fold(0, |acc, &c| acc | (1 << c));

        let entry = |operands| FusedGate {
            kind: gate.kind.clone(),
            num_targets: gate.targets.len(),
            num_controls: gate.controls.len(),
            operands,
        };
        self.masked
            .push(entry(Operands::Masked(OperandMasks::new(&coordinates))));
        self.indexed.push(entry(Operands::Indexed {
            coordinates,
            coordinate_mask,
        }));
        Ok(())
    }

    /// The replay operation for `form` over the current fused set.
    pub(crate) fn replay(&self, form: ReplayForm) -> FusedReplay<'_> {
        FusedReplay {
            entries: match form {
                ReplayForm::Indexed => &self.indexed,
                ReplayForm::Masked => &self.masked,
            },
            num_fused: self.fused_qubits.len(),
        }
    }

    /// Clears every list and returns to idle.
    pub fn finish(&mut self) {
        debug!(
            "[Fusion] end: {} gate(s) on {} qubit(s)",
            self.indexed.len(),
            self.fused_qubits.len()
        );
        for q in &self.fused_qubits {
            self.members.set(q.index(), false);
        }
        self.fused_qubits.clear();
        self.indexed.clear();
        self.masked.clear();
        self.fusing = false;
    }
}
