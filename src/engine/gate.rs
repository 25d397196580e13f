// Gate Library
use ndarray::Array2;

use crate::config::{constants::RECP_SQRT_2, Complex, Real};
use crate::engine::kernels::AmplitudeView;
use crate::engine::qubit::{ControlQubit, Qubit};
use crate::error::{Result, SimError};

/// The elementwise transform a gate performs on its operand amplitudes.
///
/// Operand amplitudes are addressed by an index whose bit `k` is the value of
/// target `k`, so target 0 is the least significant bit of a matrix index.
#[derive(Debug, Clone, PartialEq)]
pub enum GateKind {
    Identity,
    /// H on every target.
    Hadamard,
    /// X on every target.
    PauliX,
    /// Y on every target.
    PauliY,
    /// Z on every target.
    PauliZ,
    /// Multiplies the |1> amplitude by the coefficient.
    PhaseShift(Complex),
    /// Row-major 2x2 matrix.
    Unitary2([Complex; 4]),
    Swap,
    /// exp(i theta X...X) over every target.
    ExponentialPauliX(Real),
    /// exp(i theta Y...Y) over every target.
    ExponentialPauliY(Real),
    /// exp(i theta Z...Z) over every target.
    ExponentialPauliZ(Real),
    /// exp(i theta SWAP) on two targets.
    ExponentialSwap(Real),
    /// sqrt(Z) on every target: |k> picks up i^popcount(k).
    SqrtPauliZ,
    AdjSqrtPauliZ,
    /// Dense 2^t x 2^t matrix over t targets.
    Unitary(Array2<Complex>),
}

fn c(re: Real, im: Real) -> Complex {
    Complex::new(re, im)
}

/// i^t * (-1)^popcount(k), the coefficient picked up by Y^{⊗t} on basis state k.
fn pauli_y_phase(num_targets: usize, k: usize) -> Complex {
    let base = match num_targets % 4 {
        0 => c(1.0, 0.0),
        1 => c(0.0, 1.0),
        2 => c(-1.0, 0.0),
        _ => c(0.0, -1.0),
    };
    if k.count_ones() % 2 == 1 {
        -base
    } else {
        base
    }
}

impl GateKind {
    pub fn phase_shift(theta: Real) -> Self {
        GateKind::PhaseShift(Complex::from_polar(1.0, theta))
    }

    pub fn s() -> Self {
        GateKind::PhaseShift(c(0.0, 1.0))
    }

    pub fn adj_s() -> Self {
        GateKind::PhaseShift(c(0.0, -1.0))
    }

    pub fn t() -> Self {
        GateKind::PhaseShift(c(RECP_SQRT_2, RECP_SQRT_2))
    }

    pub fn adj_t() -> Self {
        GateKind::PhaseShift(c(RECP_SQRT_2, -RECP_SQRT_2))
    }

    /// U2(phi, lambda) = U3(pi/2, phi, lambda)
    pub fn u2(phi: Real, lambda: Real) -> Self {
        Self::u3(std::f64::consts::FRAC_PI_2, phi, lambda)
    }

    pub fn u3(theta: Real, phi: Real, lambda: Real) -> Self {
        let (sin, cos) = (theta / 2.0).sin_cos();
        GateKind::Unitary2([
            c(cos, 0.0),
            -Complex::from_polar(sin, lambda),
            Complex::from_polar(sin, phi),
            Complex::from_polar(cos, phi + lambda),
        ])
    }

    /// exp(-i pi/4 X)
    pub fn x_rotation_half_pi() -> Self {
        GateKind::Unitary2([
            c(RECP_SQRT_2, 0.0),
            c(0.0, -RECP_SQRT_2),
            c(0.0, -RECP_SQRT_2),
            c(RECP_SQRT_2, 0.0),
        ])
    }

    pub fn adj_x_rotation_half_pi() -> Self {
        Self::x_rotation_half_pi().adjoint()
    }

    /// exp(-i pi/4 Y)
    pub fn y_rotation_half_pi() -> Self {
        GateKind::Unitary2([
            c(RECP_SQRT_2, 0.0),
            c(-RECP_SQRT_2, 0.0),
            c(RECP_SQRT_2, 0.0),
            c(RECP_SQRT_2, 0.0),
        ])
    }

    pub fn adj_y_rotation_half_pi() -> Self {
        Self::y_rotation_half_pi().adjoint()
    }

    /// exp(-i theta/2 X)
    pub fn x_rotation(theta: Real) -> Self {
        GateKind::ExponentialPauliX(-theta / 2.0)
    }

    /// exp(-i theta/2 Y)
    pub fn y_rotation(theta: Real) -> Self {
        GateKind::ExponentialPauliY(-theta / 2.0)
    }

    /// exp(-i theta/2 Z)
    pub fn z_rotation(theta: Real) -> Self {
        GateKind::ExponentialPauliZ(-theta / 2.0)
    }

    /// [(1+i) a0 + (1-i) a1]/2, [(1-i) a0 + (1+i) a1]/2
    pub fn sqrt_pauli_x() -> Self {
        GateKind::Unitary2([c(0.5, 0.5), c(0.5, -0.5), c(0.5, -0.5), c(0.5, 0.5)])
    }

    pub fn adj_sqrt_pauli_x() -> Self {
        Self::sqrt_pauli_x().adjoint()
    }

    /// [(1+i) a0 - (1+i) a1]/2, [(1+i) a0 + (1+i) a1]/2
    pub fn sqrt_pauli_y() -> Self {
        GateKind::Unitary2([c(0.5, 0.5), c(-0.5, -0.5), c(0.5, 0.5), c(0.5, 0.5)])
    }

    pub fn adj_sqrt_pauli_y() -> Self {
        Self::sqrt_pauli_y().adjoint()
    }

    /// The target half of controlled-V: (1+e^{i phase})/2 on the diagonal,
    /// (1-e^{i phase})/2 off it.
    pub fn v(phase: Real) -> Self {
        let e = Complex::from_polar(1.0, phase);
        let (plus, minus) = ((c(1.0, 0.0) + e) * 0.5, (c(1.0, 0.0) - e) * 0.5);
        GateKind::Unitary2([plus, minus, minus, plus])
    }

    pub fn name(&self) -> &'static str {
        match self {
            GateKind::Identity => "identity",
            GateKind::Hadamard => "hadamard",
            GateKind::PauliX => "pauli_x",
            GateKind::PauliY => "pauli_y",
            GateKind::PauliZ => "pauli_z",
            GateKind::PhaseShift(_) => "phase_shift",
            GateKind::Unitary2(_) => "unitary2",
            GateKind::Swap => "swap",
            GateKind::ExponentialPauliX(_) => "exponential_pauli_x",
            GateKind::ExponentialPauliY(_) => "exponential_pauli_y",
            GateKind::ExponentialPauliZ(_) => "exponential_pauli_z",
            GateKind::ExponentialSwap(_) => "exponential_swap",
            GateKind::SqrtPauliZ => "sqrt_pauli_z",
            GateKind::AdjSqrtPauliZ => "adj_sqrt_pauli_z",
            GateKind::Unitary(_) => "unitary",
        }
    }

    /// Required number of targets, or `None` when the kind acts on any count.
    pub fn num_targets(&self) -> Option<usize> {
        match self {
            GateKind::PhaseShift(_) | GateKind::Unitary2(_) => Some(1),
            GateKind::Swap | GateKind::ExponentialSwap(_) => Some(2),
            GateKind::Unitary(m) => Some(m.nrows().trailing_zeros() as usize),
            _ => None,
        }
    }

    pub fn adjoint(&self) -> Self {
        match self {
            GateKind::PhaseShift(coeff) => GateKind::PhaseShift(coeff.conj()),
            GateKind::Unitary2([m0, m1, m2, m3]) => {
                GateKind::Unitary2([m0.conj(), m2.conj(), m1.conj(), m3.conj()])
            }
            GateKind::Unitary(m) => GateKind::Unitary(m.t().mapv(|x| x.conj())),
            GateKind::ExponentialPauliX(theta) => GateKind::ExponentialPauliX(-theta),
            GateKind::ExponentialPauliY(theta) => GateKind::ExponentialPauliY(-theta),
            GateKind::ExponentialPauliZ(theta) => GateKind::ExponentialPauliZ(-theta),
            GateKind::ExponentialSwap(theta) => GateKind::ExponentialSwap(-theta),
            GateKind::SqrtPauliZ => GateKind::AdjSqrtPauliZ,
            GateKind::AdjSqrtPauliZ => GateKind::SqrtPauliZ,
            other => other.clone(),
        }
    }

    /// Transforms the `2^t` amplitudes at `indices`.
    ///
    /// `scratch` is caller-owned so the hot loop never allocates after warm-up.
    #[inline]
    pub(crate) fn apply<V: AmplitudeView>(
        &self,
        view: &V,
        indices: &[usize],
        scratch: &mut Vec<Complex>,
    ) {
        match self {
            GateKind::Identity => {}
            GateKind::Hadamard if indices.len() == 2 => {
                let (a, b) = (view.load(indices[0]), view.load(indices[1]));
                view.store(indices[0], (a + b) * RECP_SQRT_2);
                view.store(indices[1], (a - b) * RECP_SQRT_2);
            }
            GateKind::Hadamard => {
                load_all(view, indices, scratch);
                let n = indices.len();
                let mut bit = 1;
                while bit < n {
                    for i in (0..n).filter(|i| i & bit == 0) {
                        let (a, b) = (scratch[i], scratch[i | bit]);
                        scratch[i] = (a + b) * RECP_SQRT_2;
                        scratch[i | bit] = (a - b) * RECP_SQRT_2;
                    }
                    bit <<= 1;
                }
                store_all(view, indices, scratch);
            }
            GateKind::PauliX => {
                let full = indices.len() - 1;
                for i in (0..indices.len()).filter(|&i| i < i ^ full) {
                    let (a, b) = (view.load(indices[i]), view.load(indices[i ^ full]));
                    view.store(indices[i], b);
                    view.store(indices[i ^ full], a);
                }
            }
            GateKind::PauliY => {
                let full = indices.len() - 1;
                let t = full.count_ones() as usize;
                for i in (0..indices.len()).filter(|&i| i < i ^ full) {
                    let j = i ^ full;
                    let (a, b) = (view.load(indices[i]), view.load(indices[j]));
                    view.store(indices[j], a * pauli_y_phase(t, i));
                    view.store(indices[i], b * pauli_y_phase(t, j));
                }
            }
            GateKind::PauliZ => {
                for (k, &index) in indices.iter().enumerate() {
                    if k.count_ones() % 2 == 1 {
                        view.store(index, -view.load(index));
                    }
                }
            }
            GateKind::PhaseShift(coeff) => {
                view.store(indices[1], view.load(indices[1]) * coeff);
            }
            GateKind::Unitary2(m) => {
                let (a, b) = (view.load(indices[0]), view.load(indices[1]));
                view.store(indices[0], m[0] * a + m[1] * b);
                view.store(indices[1], m[2] * a + m[3] * b);
            }
            GateKind::Swap => {
                let (a, b) = (view.load(indices[1]), view.load(indices[2]));
                view.store(indices[1], b);
                view.store(indices[2], a);
            }
            GateKind::ExponentialPauliX(theta) => {
                let (sin, cos) = theta.sin_cos();
                let i_sin = c(0.0, sin);
                let full = indices.len() - 1;
                for i in (0..indices.len()).filter(|&i| i < i ^ full) {
                    let j = i ^ full;
                    let (a, b) = (view.load(indices[i]), view.load(indices[j]));
                    view.store(indices[i], a * cos + b * i_sin);
                    view.store(indices[j], a * i_sin + b * cos);
                }
            }
            GateKind::ExponentialPauliY(theta) => {
                let (sin, cos) = theta.sin_cos();
                let i_sin = c(0.0, sin);
                let full = indices.len() - 1;
                let t = full.count_ones() as usize;
                for i in (0..indices.len()).filter(|&i| i < i ^ full) {
                    let j = i ^ full;
                    let (a, b) = (view.load(indices[i]), view.load(indices[j]));
                    view.store(indices[i], a * cos + b * pauli_y_phase(t, j) * i_sin);
                    view.store(indices[j], b * cos + a * pauli_y_phase(t, i) * i_sin);
                }
            }
            GateKind::ExponentialPauliZ(theta) => {
                let even = Complex::from_polar(1.0, *theta);
                let odd = even.conj();
                for (k, &index) in indices.iter().enumerate() {
                    let coeff = if k.count_ones() % 2 == 1 { odd } else { even };
                    view.store(index, view.load(index) * coeff);
                }
            }
            GateKind::ExponentialSwap(theta) => {
                let (sin, cos) = theta.sin_cos();
                let i_sin = c(0.0, sin);
                let phase = Complex::from_polar(1.0, *theta);
                view.store(indices[0], view.load(indices[0]) * phase);
                view.store(indices[3], view.load(indices[3]) * phase);
                let (a, b) = (view.load(indices[1]), view.load(indices[2]));
                view.store(indices[1], a * cos + b * i_sin);
                view.store(indices[2], a * i_sin + b * cos);
            }
            GateKind::SqrtPauliZ | GateKind::AdjSqrtPauliZ => {
                let unit = if matches!(self, GateKind::SqrtPauliZ) {
                    c(0.0, 1.0)
                } else {
                    c(0.0, -1.0)
                };
                for (k, &index) in indices.iter().enumerate().skip(1) {
                    view.store(index, view.load(index) * unit.powu(k.count_ones()));
                }
            }
            GateKind::Unitary(m) => {
                load_all(view, indices, scratch);
                for (row, &index) in m.rows().into_iter().zip(indices) {
                    let value = row
                        .iter()
                        .zip(scratch.iter())
                        .fold(c(0.0, 0.0), |acc, (x, y)| acc + x * y);
                    view.store(index, value);
                }
            }
        }
    }
}

#[inline]
fn load_all<V: AmplitudeView>(view: &V, indices: &[usize], scratch: &mut Vec<Complex>) {
    scratch.clear();
    scratch.extend(indices.iter().map(|&i| view.load(i)));
}

#[inline]
fn store_all<V: AmplitudeView>(view: &V, indices: &[usize], scratch: &[Complex]) {
    for (&i, &value) in indices.iter().zip(scratch) {
        view.store(i, value);
    }
}

/// A gate kind bound to concrete operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Gate {
    pub kind: GateKind,
    pub targets: Vec<Qubit>,
    pub controls: Vec<ControlQubit>,
}

impl Gate {
    /// Validates the target count against the kind and rejects repeated operands.
    pub fn new(kind: GateKind, targets: Vec<Qubit>, controls: Vec<ControlQubit>) -> Result<Self> {
        if targets.is_empty() {
            return Err(SimError::InvalidGate(format!(
                "{} needs at least one target",
                kind.name()
            )));
        }
        if let Some(expected) = kind.num_targets() {
            if expected != targets.len() {
                return Err(SimError::InvalidGate(format!(
                    "{} takes {} target(s), got {}",
                    kind.name(),
                    expected,
                    targets.len()
                )));
            }
        }
        if let GateKind::Unitary(m) = &kind {
            if !m.is_square() || !m.nrows().is_power_of_two() {
                return Err(SimError::InvalidGate(format!(
                    "unitary must be square with power-of-two size, got {:?}",
                    m.dim()
                )));
            }
        }
        let gate = Self {
            kind,
            targets,
            controls,
        };
        let mut operands: Vec<Qubit> = gate.operands().collect();
        operands.sort_unstable();
        if operands.windows(2).any(|w| w[0] == w[1]) {
            return Err(SimError::InvalidGate(format!(
                "{} has repeated operands",
                gate.kind.name()
            )));
        }
        Ok(gate)
    }

    /// Targets in order, then controls in order.
    pub fn operands(&self) -> impl Iterator<Item = Qubit> + '_ {
        self.targets
            .iter()
            .copied()
            .chain(self.controls.iter().map(|c| c.qubit()))
    }

    pub fn num_operands(&self) -> usize {
        self.targets.len() + self.controls.len()
    }

    pub fn adjoint(&self) -> Self {
        Self {
            kind: self.kind.adjoint(),
            targets: self.targets.clone(),
            controls: self.controls.clone(),
        }
    }
}

/// Applies `kind` to one operand group, honouring controls.
///
/// `indices` holds the `2^(t+c)` amplitudes of the group ordered like operand
/// bits (targets low, controls high); the gate touches only the sub-range
/// where every control bit is 1.
#[inline]
pub(crate) fn apply_controlled<V: AmplitudeView>(
    kind: &GateKind,
    num_targets: usize,
    num_controls: usize,
    view: &V,
    indices: &[usize],
    scratch: &mut Vec<Complex>,
) {
    let offset = ((1usize << num_controls) - 1) << num_targets;
    kind.apply(view, &indices[offset..offset + (1 << num_targets)], scratch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kernels::FlatView;

    fn run(kind: &GateKind, amplitudes: &mut [Complex]) {
        let indices: Vec<usize> = (0..amplitudes.len()).collect();
        let view = unsafe { FlatView::new(amplitudes) };
        kind.apply(&view, &indices, &mut Vec::new());
    }

    fn close(a: &[Complex], b: &[Complex]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).norm() < 1e-12)
    }

    #[test]
    fn test_hadamard_twice_is_identity() {
        let original = vec![c(0.6, 0.0), c(0.0, 0.8)];
        let mut amps = original.clone();
        run(&GateKind::Hadamard, &mut amps);
        run(&GateKind::Hadamard, &mut amps);
        assert!(close(&amps, &original));
    }

    #[test]
    fn test_multi_target_hadamard_spreads_evenly() {
        let mut amps = vec![c(0.0, 0.0); 8];
        amps[0] = c(1.0, 0.0);
        run(&GateKind::Hadamard, &mut amps);
        for a in &amps {
            assert!((a.re - 1.0 / 8f64.sqrt()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pauli_y_matches_matrix() {
        let mut amps = vec![c(1.0, 0.0), c(0.0, 0.0)];
        run(&GateKind::PauliY, &mut amps);
        assert!(close(&amps, &[c(0.0, 0.0), c(0.0, 1.0)]));

        // Y⊗Y |00> = -|11>
        let mut amps = vec![c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(0.0, 0.0)];
        run(&GateKind::PauliY, &mut amps);
        assert!(close(&amps[3..], &[c(-1.0, 0.0)]));
    }

    #[test]
    fn test_adjoint_inverts_u3() {
        let gate = GateKind::u3(0.3, 1.1, -0.7);
        let original = vec![c(0.6, 0.0), c(0.0, 0.8)];
        let mut amps = original.clone();
        run(&gate, &mut amps);
        run(&gate.adjoint(), &mut amps);
        assert!(close(&amps, &original));
    }

    #[test]
    fn test_exponential_paulis() {
        let (sin, cos) = 0.4f64.sin_cos();
        // exp(i theta XX) |00> = cos |00> + i sin |11>
        let mut amps = vec![c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(0.0, 0.0)];
        run(&GateKind::ExponentialPauliX(0.4), &mut amps);
        assert!(close(&amps, &[c(cos, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(0.0, sin)]));

        // exp(i theta YY) |00> = cos |00> - i sin |11>
        let mut amps = vec![c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(0.0, 0.0)];
        run(&GateKind::ExponentialPauliY(0.4), &mut amps);
        assert!(close(&amps, &[c(cos, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(0.0, -sin)]));

        // exp(i theta ZZ) on |+ +> puts e^{-i theta} on the odd-parity states
        let mut amps = vec![c(0.5, 0.0); 4];
        run(&GateKind::ExponentialPauliZ(0.4), &mut amps);
        let (even, odd) = (Complex::from_polar(0.5, 0.4), Complex::from_polar(0.5, -0.4));
        assert!(close(&amps, &[even, odd, odd, even]));

        // RX(pi) = -i X
        let mut amps = vec![c(1.0, 0.0), c(0.0, 0.0)];
        run(&GateKind::x_rotation(std::f64::consts::PI), &mut amps);
        assert!(close(&amps, &[c(0.0, 0.0), c(0.0, -1.0)]));
    }

    #[test]
    fn test_exponential_swap_mixes_odd_states() {
        let (sin, cos) = 0.3f64.sin_cos();
        let mut amps = vec![c(0.5, 0.0), c(1.0, 0.0), c(0.0, 0.0), c(0.5, 0.0)];
        run(&GateKind::ExponentialSwap(0.3), &mut amps);
        let phase = Complex::from_polar(0.5, 0.3);
        assert!(close(&amps, &[phase, c(cos, 0.0), c(0.0, sin), phase]));

        run(&GateKind::ExponentialSwap(0.3).adjoint(), &mut amps);
        assert!(close(&amps, &[c(0.5, 0.0), c(1.0, 0.0), c(0.0, 0.0), c(0.5, 0.0)]));
    }

    #[test]
    fn test_square_roots_square_to_paulis() {
        let original = vec![c(0.6, 0.1), c(0.2, 0.768)];
        for (root, pauli) in [
            (GateKind::sqrt_pauli_x(), GateKind::PauliX),
            (GateKind::sqrt_pauli_y(), GateKind::PauliY),
            (GateKind::SqrtPauliZ, GateKind::PauliZ),
            (GateKind::v(std::f64::consts::FRAC_PI_2), GateKind::PauliX),
        ] {
            let (mut squared, mut expected) = (original.clone(), original.clone());
            run(&root, &mut squared);
            run(&root, &mut squared);
            run(&pauli, &mut expected);
            assert!(close(&squared, &expected), "{}", root.name());
            run(&root.adjoint(), &mut squared);
            run(&root.adjoint(), &mut squared);
            assert!(close(&squared, &original), "{}", root.name());
        }

        // sZ on two targets multiplies |11> by i^2
        let mut amps = vec![c(0.5, 0.0); 4];
        run(&GateKind::SqrtPauliZ, &mut amps);
        assert!(close(&amps, &[c(0.5, 0.0), c(0.0, 0.5), c(0.0, 0.5), c(-0.5, 0.0)]));
    }

    #[test]
    fn test_dense_unitary_matches_swap() {
        let mut m = Array2::zeros((4, 4));
        m[[0, 0]] = c(1.0, 0.0);
        m[[1, 2]] = c(1.0, 0.0);
        m[[2, 1]] = c(1.0, 0.0);
        m[[3, 3]] = c(1.0, 0.0);
        let input = vec![c(0.1, 0.0), c(0.2, 0.0), c(0.3, 0.0), c(0.4, 0.0)];
        let (mut a, mut b) = (input.clone(), input);
        run(&GateKind::Unitary(m), &mut a);
        run(&GateKind::Swap, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_controls_select_upper_sub_range() {
        // CNOT with target 0, control 1: |10> -> |11>
        let mut amps = vec![c(0.0, 0.0), c(0.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)];
        let indices: Vec<usize> = (0..4).collect();
        let view = unsafe { FlatView::new(&mut amps) };
        apply_controlled(&GateKind::PauliX, 1, 1, &view, &indices, &mut Vec::new());
        assert_eq!(amps[3], c(1.0, 0.0));
        assert_eq!(amps[2], c(0.0, 0.0));
    }

    #[test]
    fn test_gate_validation() {
        let q = Qubit::new;
        assert!(Gate::new(GateKind::Swap, vec![q(0)], vec![]).is_err());
        assert!(Gate::new(GateKind::PauliX, vec![q(0)], vec![q(0).control()]).is_err());
        assert!(Gate::new(GateKind::Hadamard, vec![], vec![]).is_err());
        let gate = Gate::new(GateKind::PauliX, vec![q(2)], vec![q(0).control()]).unwrap();
        assert_eq!(gate.operands().collect::<Vec<_>>(), vec![q(2), q(0)]);
    }
}
