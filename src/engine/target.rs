// Gate Target Protocol
use ndarray::Array2;

use crate::config::{Complex, Real};
use crate::engine::gate::{Gate, GateKind};
use crate::engine::qubit::Qubit;
use crate::engine::state::DistributedState;
use crate::engine::transport::Transport;
use crate::error::Result;

/// Anything a circuit driver can run gates on: one method per gate kind.
///
/// Implementors provide the primitive operations; every named gate is a
/// default method that builds a [`Gate`] and hands it to `apply_gate`.
pub trait GateTarget {
    fn num_qubits(&self) -> usize;

    fn apply_gate(&mut self, gate: &Gate) -> Result<()>;

    fn begin_fusion(&mut self);

    fn end_fusion(&mut self) -> Result<()>;

    /// Leaves the fusing state without replaying what was recorded.
    fn abort_fusion(&mut self);

    fn clear(&mut self, qubit: Qubit) -> Result<()>;

    fn set(&mut self, qubit: Qubit) -> Result<()>;

    /// One outcome per data block.
    fn measure(&mut self, qubit: Qubit) -> Result<Vec<u8>>;

    fn apply_kind(&mut self, kind: GateKind, targets: &[Qubit], controls: &[Qubit]) -> Result<()> {
        let gate = Gate::new(
            kind,
            targets.to_vec(),
            controls.iter().map(|c| c.control()).collect(),
        )?;
        self.apply_gate(&gate)
    }

    fn identity(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::Identity, &[qubit], &[])
    }

    fn hadamard(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::Hadamard, &[qubit], &[])
    }

    /// Pauli X.
    fn not(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::PauliX, &[qubit], &[])
    }

    fn pauli_y(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::PauliY, &[qubit], &[])
    }

    fn pauli_z(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::PauliZ, &[qubit], &[])
    }

    fn s(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::s(), &[qubit], &[])
    }

    fn adj_s(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::adj_s(), &[qubit], &[])
    }

    fn t(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::t(), &[qubit], &[])
    }

    fn adj_t(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::adj_t(), &[qubit], &[])
    }

    fn phase_shift(&mut self, theta: Real, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::phase_shift(theta), &[qubit], &[])
    }

    fn u1(&mut self, lambda: Real, qubit: Qubit) -> Result<()> {
        self.phase_shift(lambda, qubit)
    }

    fn u2(&mut self, phi: Real, lambda: Real, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::u2(phi, lambda), &[qubit], &[])
    }

    fn u3(&mut self, theta: Real, phi: Real, lambda: Real, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::u3(theta, phi, lambda), &[qubit], &[])
    }

    fn x_rotation_half_pi(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::x_rotation_half_pi(), &[qubit], &[])
    }

    fn adj_x_rotation_half_pi(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::adj_x_rotation_half_pi(), &[qubit], &[])
    }

    fn y_rotation_half_pi(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::y_rotation_half_pi(), &[qubit], &[])
    }

    fn adj_y_rotation_half_pi(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::adj_y_rotation_half_pi(), &[qubit], &[])
    }

    fn sqrt_pauli_x(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::sqrt_pauli_x(), &[qubit], &[])
    }

    fn adj_sqrt_pauli_x(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::adj_sqrt_pauli_x(), &[qubit], &[])
    }

    fn sqrt_pauli_y(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::sqrt_pauli_y(), &[qubit], &[])
    }

    fn adj_sqrt_pauli_y(&mut self, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::adj_sqrt_pauli_y(), &[qubit], &[])
    }

    /// sqrt(Z) on each of `qubits`.
    fn sqrt_pauli_z(&mut self, qubits: &[Qubit]) -> Result<()> {
        self.apply_kind(GateKind::SqrtPauliZ, qubits, &[])
    }

    fn adj_sqrt_pauli_z(&mut self, qubits: &[Qubit]) -> Result<()> {
        self.apply_kind(GateKind::AdjSqrtPauliZ, qubits, &[])
    }

    /// exp(i theta X...X) over `qubits`.
    fn exponential_pauli_x(&mut self, theta: Real, qubits: &[Qubit]) -> Result<()> {
        self.apply_kind(GateKind::ExponentialPauliX(theta), qubits, &[])
    }

    fn exponential_pauli_y(&mut self, theta: Real, qubits: &[Qubit]) -> Result<()> {
        self.apply_kind(GateKind::ExponentialPauliY(theta), qubits, &[])
    }

    fn exponential_pauli_z(&mut self, theta: Real, qubits: &[Qubit]) -> Result<()> {
        self.apply_kind(GateKind::ExponentialPauliZ(theta), qubits, &[])
    }

    fn exponential_swap(&mut self, theta: Real, qubit1: Qubit, qubit2: Qubit) -> Result<()> {
        self.apply_kind(GateKind::ExponentialSwap(theta), &[qubit1, qubit2], &[])
    }

    fn x_rotation(&mut self, theta: Real, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::x_rotation(theta), &[qubit], &[])
    }

    fn y_rotation(&mut self, theta: Real, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::y_rotation(theta), &[qubit], &[])
    }

    fn z_rotation(&mut self, theta: Real, qubit: Qubit) -> Result<()> {
        self.apply_kind(GateKind::z_rotation(theta), &[qubit], &[])
    }

    fn controlled_v(&mut self, phase: Real, target: Qubit, control: Qubit) -> Result<()> {
        self.apply_kind(GateKind::v(phase), &[target], &[control])
    }

    fn controlled_not(&mut self, target: Qubit, control: Qubit) -> Result<()> {
        self.apply_kind(GateKind::PauliX, &[target], &[control])
    }

    fn controlled_pauli_z(&mut self, target: Qubit, control: Qubit) -> Result<()> {
        self.apply_kind(GateKind::PauliZ, &[target], &[control])
    }

    fn controlled_phase_shift(&mut self, theta: Real, target: Qubit, control: Qubit) -> Result<()> {
        self.apply_kind(GateKind::phase_shift(theta), &[target], &[control])
    }

    fn toffoli(&mut self, target: Qubit, control1: Qubit, control2: Qubit) -> Result<()> {
        self.apply_kind(GateKind::PauliX, &[target], &[control1, control2])
    }

    fn swap(&mut self, qubit1: Qubit, qubit2: Qubit) -> Result<()> {
        self.apply_kind(GateKind::Swap, &[qubit1, qubit2], &[])
    }

    /// Dense unitary; row/column bit `k` corresponds to `targets[k]`.
    fn unitary(&mut self, matrix: Array2<Complex>, targets: &[Qubit], controls: &[Qubit]) -> Result<()> {
        self.apply_kind(GateKind::Unitary(matrix), targets, controls)
    }
}

impl<T: Transport> GateTarget for DistributedState<T> {
    fn num_qubits(&self) -> usize {
        DistributedState::num_qubits(self)
    }

    fn apply_gate(&mut self, gate: &Gate) -> Result<()> {
        DistributedState::apply_gate(self, gate)
    }

    fn begin_fusion(&mut self) {
        DistributedState::begin_fusion(self)
    }

    fn end_fusion(&mut self) -> Result<()> {
        DistributedState::end_fusion(self)
    }

    fn abort_fusion(&mut self) {
        DistributedState::abort_fusion(self)
    }

    fn clear(&mut self, qubit: Qubit) -> Result<()> {
        DistributedState::clear(self, qubit)
    }

    fn set(&mut self, qubit: Qubit) -> Result<()> {
        DistributedState::set(self, qubit)
    }

    fn measure(&mut self, qubit: Qubit) -> Result<Vec<u8>> {
        DistributedState::measure(self, qubit)
    }
}
