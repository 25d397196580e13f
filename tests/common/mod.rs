// Shared test helpers: a dense reference simulator and in-process rank drivers
#![allow(dead_code)]

use std::thread;

use qp_dist_core::{
    Complex, ControlQubit, DistributedState, Gate, GateKind, LocalCluster, LocalTransport, Qubit,
    StateConfig,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

pub const TOLERANCE: f64 = 1e-10;

pub fn c(re: f64, im: f64) -> Complex {
    Complex::new(re, im)
}

pub fn q(index: usize) -> Qubit {
    Qubit::new(index)
}

pub fn gate(kind: GateKind, targets: &[usize], controls: &[usize]) -> Gate {
    Gate::new(
        kind,
        targets.iter().copied().map(Qubit::new).collect(),
        controls.iter().copied().map(ControlQubit::new).collect(),
    )
    .unwrap()
}

/// Dense `2^t x 2^t` matrix of `kind`, row/column bit `k` = target `k`.
pub fn kind_matrix(kind: &GateKind, num_targets: usize) -> Vec<Vec<Complex>> {
    let dim = 1usize << num_targets;
    let full = dim - 1;
    let mut m = vec![vec![c(0.0, 0.0); dim]; dim];
    match kind {
        GateKind::Identity => (0..dim).for_each(|i| m[i][i] = c(1.0, 0.0)),
        GateKind::Hadamard => {
            let scale = std::f64::consts::FRAC_1_SQRT_2.powi(num_targets as i32);
            for (r, row) in m.iter_mut().enumerate() {
                for (col, entry) in row.iter_mut().enumerate() {
                    let sign = if (r & col).count_ones() % 2 == 1 { -1.0 } else { 1.0 };
                    *entry = c(sign * scale, 0.0);
                }
            }
        }
        GateKind::PauliX => (0..dim).for_each(|col| m[col ^ full][col] = c(1.0, 0.0)),
        GateKind::PauliY => {
            for col in 0..dim {
                let ones = col.count_ones() as i32;
                let zeros = num_targets as i32 - ones;
                m[col ^ full][col] = c(0.0, 1.0).powi(zeros) * c(0.0, -1.0).powi(ones);
            }
        }
        GateKind::PauliZ => {
            for i in 0..dim {
                m[i][i] = if i.count_ones() % 2 == 1 { c(-1.0, 0.0) } else { c(1.0, 0.0) };
            }
        }
        GateKind::PhaseShift(coeff) => {
            m[0][0] = c(1.0, 0.0);
            m[1][1] = *coeff;
        }
        GateKind::Unitary2(u) => {
            m[0][0] = u[0];
            m[0][1] = u[1];
            m[1][0] = u[2];
            m[1][1] = u[3];
        }
        GateKind::Swap => {
            for i in 0..4 {
                let j = ((i & 1) << 1) | ((i >> 1) & 1);
                m[j][i] = c(1.0, 0.0);
            }
        }
        GateKind::ExponentialPauliX(theta)
        | GateKind::ExponentialPauliY(theta)
        | GateKind::ExponentialPauliZ(theta)
        | GateKind::ExponentialSwap(theta) => {
            // exp(i theta P) = cos(theta) I + i sin(theta) P
            let pauli = match kind {
                GateKind::ExponentialPauliX(_) => GateKind::PauliX,
                GateKind::ExponentialPauliY(_) => GateKind::PauliY,
                GateKind::ExponentialPauliZ(_) => GateKind::PauliZ,
                _ => GateKind::Swap,
            };
            let p = kind_matrix(&pauli, num_targets);
            for r in 0..dim {
                for col in 0..dim {
                    let diagonal = if r == col { theta.cos() } else { 0.0 };
                    m[r][col] = c(diagonal, 0.0) + p[r][col] * c(0.0, theta.sin());
                }
            }
        }
        GateKind::SqrtPauliZ | GateKind::AdjSqrtPauliZ => {
            let unit = if *kind == GateKind::SqrtPauliZ { c(0.0, 1.0) } else { c(0.0, -1.0) };
            for i in 0..dim {
                m[i][i] = unit.powi(i.count_ones() as i32);
            }
        }
        GateKind::Unitary(u) => {
            for ((r, col), &value) in u.indexed_iter() {
                m[r][col] = value;
            }
        }
    }
    m
}

/// Straightforward state-vector simulator in logical bit order.
#[derive(Debug, Clone)]
pub struct Reference {
    pub amplitudes: Vec<Complex>,
}

impl Reference {
    pub fn new(num_qubits: usize) -> Self {
        let mut amplitudes = vec![c(0.0, 0.0); 1 << num_qubits];
        amplitudes[0] = c(1.0, 0.0);
        Self { amplitudes }
    }

    pub fn apply(&mut self, gate: &Gate) {
        let targets: Vec<usize> = gate.targets.iter().map(|t| t.index()).collect();
        let control_mask: usize = gate.controls.iter().map(|c| 1 << c.qubit().index()).sum();
        let target_mask: usize = targets.iter().map(|t| 1 << t).sum();
        let m = kind_matrix(&gate.kind, targets.len());
        let dim = 1usize << targets.len();
        let spread = |k: usize| -> usize {
            targets
                .iter()
                .enumerate()
                .map(|(bit, &t)| ((k >> bit) & 1) << t)
                .sum()
        };
        for base in 0..self.amplitudes.len() {
            if base & target_mask != 0 || base & control_mask != control_mask {
                continue;
            }
            let old: Vec<Complex> = (0..dim).map(|k| self.amplitudes[base | spread(k)]).collect();
            for (r, row) in m.iter().enumerate() {
                self.amplitudes[base | spread(r)] =
                    row.iter().zip(&old).map(|(a, b)| a * b).sum();
            }
        }
    }

    pub fn apply_all(&mut self, gates: &[Gate]) {
        gates.iter().for_each(|g| self.apply(g));
    }
}

pub fn assert_close(actual: &[Complex], expected: &[Complex]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).norm() < TOLERANCE, "index {i}: {a} != {e}");
    }
}

/// A random fusable gate on at most `max_operands` distinct qubits.
pub fn random_gate(rng: &mut StdRng, num_qubits: usize, max_operands: usize) -> Gate {
    let mut qubits: Vec<usize> = (0..num_qubits).collect();
    qubits.shuffle(rng);
    let max_operands = max_operands.min(num_qubits);
    loop {
        let theta = rng.gen_range(-3.0..3.0);
        let (kind, num_targets, num_controls) = match rng.gen_range(0..16) {
            0 => (GateKind::Hadamard, 1, 0),
            1 => (GateKind::PauliX, 1, rng.gen_range(0..3)),
            2 => (GateKind::PauliY, 1, 0),
            3 => (GateKind::PauliZ, 2, 0),
            4 => (GateKind::t(), 1, 0),
            5 => (GateKind::phase_shift(rng.gen_range(-3.0..3.0)), 1, 1),
            6 => (
                GateKind::u3(
                    rng.gen_range(-3.0..3.0),
                    rng.gen_range(-3.0..3.0),
                    rng.gen_range(-3.0..3.0),
                ),
                1,
                0,
            ),
            7 => (GateKind::Swap, 2, 0),
            8 => (GateKind::Hadamard, 2, 1),
            9 => (GateKind::ExponentialPauliX(theta), 2, 0),
            10 => (GateKind::ExponentialPauliY(theta), rng.gen_range(1..3), 0),
            11 => (GateKind::ExponentialPauliZ(theta), 2, 1),
            12 => (GateKind::ExponentialSwap(theta), 2, 0),
            13 => (GateKind::SqrtPauliZ, 2, 0),
            14 => (GateKind::sqrt_pauli_x(), 1, 1),
            _ => (GateKind::y_rotation_half_pi(), 1, 0),
        };
        if num_targets + num_controls > max_operands {
            continue;
        }
        return gate(
            kind,
            &qubits[..num_targets],
            &qubits[num_targets..num_targets + num_controls],
        );
    }
}

pub fn random_circuit(
    rng: &mut StdRng,
    num_qubits: usize,
    len: usize,
    max_operands: usize,
) -> Vec<Gate> {
    (0..len)
        .map(|_| random_gate(rng, num_qubits, max_operands))
        .collect()
}

/// Runs `f` on every rank of an in-process cluster and returns the results in
/// rank order.
pub fn run_cluster<R, F>(num_ranks: usize, config: StateConfig, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(DistributedState<LocalTransport>) -> R + Sync,
{
    let transports = LocalCluster::new(num_ranks);
    thread::scope(|scope| {
        let handles: Vec<_> = transports
            .into_iter()
            .map(|transport| {
                let config = config.clone();
                let f = &f;
                scope.spawn(move || f(DistributedState::new(config, transport).unwrap()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// A random gate whose operands are drawn from `qubits` only.
pub fn random_gate_on(rng: &mut StdRng, qubits: &[usize], max_operands: usize) -> Gate {
    let g = random_gate(rng, qubits.len(), max_operands);
    Gate::new(
        g.kind,
        g.targets.iter().map(|t| q(qubits[t.index()])).collect(),
        g.controls
            .iter()
            .map(|c| ControlQubit::new(qubits[c.qubit().index()]))
            .collect(),
    )
    .unwrap()
}
