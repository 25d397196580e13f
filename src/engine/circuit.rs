// Circuit Analyzer
use bitvec::prelude::*;
use log::debug;

use crate::engine::gate::{Gate, GateKind};
use crate::engine::qubit::Qubit;
use crate::engine::target::GateTarget;
use crate::error::{Result, SimError};

/// A gate as handed over by a driver (Python, a file parser, ...).
#[derive(Debug, Clone, Default)]
pub struct GateOp {
    pub name: String,
    pub targets: Vec<usize>,
    pub controls: Vec<usize>,
    pub params: Vec<f64>,
}

/// What a [`GateOp`] turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Unitary(Gate),
    Clear(Qubit),
    Set(Qubit),
    Measure(Qubit),
}

impl GateOp {
    pub fn new(name: &str, targets: &[usize]) -> Self {
        Self {
            name: name.to_string(),
            targets: targets.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_controls(mut self, controls: &[usize]) -> Self {
        self.controls = controls.to_vec();
        self
    }

    pub fn with_params(mut self, params: &[f64]) -> Self {
        self.params = params.to_vec();
        self
    }

    fn param(&self, i: usize) -> Result<f64> {
        self.params.get(i).copied().ok_or_else(|| {
            SimError::InvalidGate(format!("{} expects at least {} parameter(s)", self.name, i + 1))
        })
    }

    fn single_target(&self) -> Result<Qubit> {
        match self.targets.as_slice() {
            [q] => Ok(Qubit::new(*q)),
            _ => Err(SimError::InvalidGate(format!(
                "{} takes one target, got {}",
                self.name,
                self.targets.len()
            ))),
        }
    }

    /// Resolves the name table and checks every qubit against `num_qubits`.
    pub fn to_gate(&self, num_qubits: usize) -> Result<Instruction> {
        for &q in self.targets.iter().chain(&self.controls) {
            if q >= num_qubits {
                return Err(SimError::QubitOutOfRange {
                    qubit: q,
                    num_qubits,
                });
            }
        }

        let name = self.name.to_uppercase();
        let mut controls: Vec<usize> = self.controls.clone();
        let mut targets: Vec<usize> = self.targets.clone();
        // Controlled shorthands take missing controls from the leading targets
        let explicit_controls = self.controls.len();
        let mut split_controls = |count: usize| -> Result<()> {
            let leading = count.saturating_sub(explicit_controls);
            if targets.len() <= leading {
                return Err(SimError::InvalidGate(format!(
                    "{} needs {} control(s) and a target",
                    self.name, count
                )));
            }
            controls.extend(targets.drain(..leading));
            Ok(())
        };
        let kind = match name.as_str() {
            "CLEAR" => return Ok(Instruction::Clear(self.single_target()?)),
            "SET" => return Ok(Instruction::Set(self.single_target()?)),
            "MEASURE" | "M" => return Ok(Instruction::Measure(self.single_target()?)),
            "I" | "ID" => GateKind::Identity,
            "H" => GateKind::Hadamard,
            "X" | "NOT" => GateKind::PauliX,
            "Y" => GateKind::PauliY,
            "Z" => GateKind::PauliZ,
            "S" => GateKind::s(),
            "SDG" => GateKind::adj_s(),
            "T" => GateKind::t(),
            "TDG" => GateKind::adj_t(),
            "P" | "U1" => GateKind::phase_shift(self.param(0)?),
            "U2" => GateKind::u2(self.param(0)?, self.param(1)?),
            "U3" | "U" => GateKind::u3(self.param(0)?, self.param(1)?, self.param(2)?),
            "RX90" => GateKind::x_rotation_half_pi(),
            "RX90DG" => GateKind::adj_x_rotation_half_pi(),
            "RY90" => GateKind::y_rotation_half_pi(),
            "RY90DG" => GateKind::adj_y_rotation_half_pi(),
            "SX" => GateKind::sqrt_pauli_x(),
            "SXDG" => GateKind::adj_sqrt_pauli_x(),
            "SY" => GateKind::sqrt_pauli_y(),
            "SYDG" => GateKind::adj_sqrt_pauli_y(),
            "SZ" => GateKind::SqrtPauliZ,
            "SZDG" => GateKind::AdjSqrtPauliZ,
            "RX" => {
                self.single_target()?;
                GateKind::x_rotation(self.param(0)?)
            }
            "RY" => {
                self.single_target()?;
                GateKind::y_rotation(self.param(0)?)
            }
            "RZ" => {
                self.single_target()?;
                GateKind::z_rotation(self.param(0)?)
            }
            "RXX" => GateKind::ExponentialPauliX(-self.param(0)? / 2.0),
            "RYY" => GateKind::ExponentialPauliY(-self.param(0)? / 2.0),
            "RZZ" => GateKind::ExponentialPauliZ(-self.param(0)? / 2.0),
            "EX" => GateKind::ExponentialPauliX(self.param(0)?),
            "EY" => GateKind::ExponentialPauliY(self.param(0)?),
            "EZ" => GateKind::ExponentialPauliZ(self.param(0)?),
            "ESWAP" => GateKind::ExponentialSwap(self.param(0)?),
            "SWAP" => GateKind::Swap,
            "CX" | "CNOT" => {
                split_controls(1)?;
                GateKind::PauliX
            }
            "CZ" => {
                split_controls(1)?;
                GateKind::PauliZ
            }
            "CP" | "CU1" => {
                split_controls(1)?;
                GateKind::phase_shift(self.param(0)?)
            }
            "CV" => {
                split_controls(1)?;
                GateKind::v(self.param(0)?)
            }
            "CCX" | "TOFFOLI" => {
                split_controls(2)?;
                GateKind::PauliX
            }
            _ => {
                return Err(SimError::UnknownGate {
                    name: self.name.clone(),
                })
            }
        };
        let gate = Gate::new(
            kind,
            targets.into_iter().map(Qubit::new).collect(),
            controls.into_iter().map(|c| Qubit::new(c).control()).collect(),
        )?;
        Ok(Instruction::Unitary(gate))
    }
}

/// A run of consecutive instructions executed as one fusion window, or a
/// single instruction executed on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Fused(Vec<Gate>),
    Single(Instruction),
}

/// The execution plan of a circuit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schedule {
    pub steps: Vec<Step>,
}

impl Schedule {
    pub fn num_fused_windows(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Fused(_)))
            .count()
    }
}

/// Groups consecutive unitary gates into fusion windows.
pub struct CircuitAnalyzer {
    num_qubits: usize,
    max_fused_qubits: usize,
}

impl CircuitAnalyzer {
    pub fn new(num_qubits: usize, max_fused_qubits: usize) -> Self {
        Self {
            num_qubits,
            max_fused_qubits,
        }
    }

    /// Greedy lookahead: extend the current window while the union of its
    /// qubits stays within `max_fused_qubits`; measurement-like operations
    /// close it.
    pub fn analyze(&self, ops: &[GateOp]) -> Result<Schedule> {
        debug!("[Analyzer] Analyzing {} gates for fusion windows...", ops.len());
        let mut steps = Vec::new();
        let mut window: Vec<Gate> = Vec::new();
        let mut touched = bitvec![usize, Lsb0; 0; self.num_qubits];

        for op in ops {
            match op.to_gate(self.num_qubits)? {
                Instruction::Unitary(gate) => {
                    let extra = gate.operands().filter(|q| !touched[q.index()]).count();
                    if touched.count_ones() + extra > self.max_fused_qubits {
                        Self::close(&mut steps, &mut window, &mut touched);
                    }
                    if gate.num_operands() > self.max_fused_qubits {
                        // Too wide to fuse with anything; runs alone
                        steps.push(Step::Single(Instruction::Unitary(gate)));
                        continue;
                    }
                    for q in gate.operands() {
                        touched.set(q.index(), true);
                    }
                    window.push(gate);
                }
                other => {
                    Self::close(&mut steps, &mut window, &mut touched);
                    steps.push(Step::Single(other));
                }
            }
        }
        Self::close(&mut steps, &mut window, &mut touched);
        Ok(Schedule { steps })
    }

    fn close(steps: &mut Vec<Step>, window: &mut Vec<Gate>, touched: &mut BitVec) {
        touched.fill(false);
        match window.len() {
            0 => {}
            1 => steps.extend(window.drain(..).map(|g| Step::Single(Instruction::Unitary(g)))),
            _ => steps.push(Step::Fused(std::mem::take(window))),
        }
    }
}

fn run_instruction<G: GateTarget + ?Sized>(
    target: &mut G,
    instruction: &Instruction,
    outcomes: &mut Vec<u8>,
) -> Result<()> {
    match instruction {
        Instruction::Unitary(gate) => target.apply_gate(gate),
        Instruction::Clear(q) => target.clear(*q),
        Instruction::Set(q) => target.set(*q),
        Instruction::Measure(q) => {
            outcomes.extend(target.measure(*q)?);
            Ok(())
        }
    }
}

/// Runs `schedule` on `target`; returns measurement outcomes in program order
/// (one per data block per measurement).
pub fn execute<G: GateTarget + ?Sized>(target: &mut G, schedule: &Schedule) -> Result<Vec<u8>> {
    let mut outcomes = Vec::new();
    for step in &schedule.steps {
        match step {
            Step::Fused(gates) => {
                target.begin_fusion();
                if let Err(e) = gates.iter().try_for_each(|gate| target.apply_gate(gate)) {
                    target.abort_fusion();
                    return Err(e);
                }
                target.end_fusion()?;
            }
            Step::Single(instruction) => run_instruction(target, instruction, &mut outcomes)?,
        }
    }
    Ok(outcomes)
}
