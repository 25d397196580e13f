// Controller
#[cfg(feature = "python")]
use numpy::{IntoPyArray, PyArray1};
#[cfg(feature = "python")]
use pyo3::prelude::*;

use log::info;

use crate::config::{Complex, Real, StateConfig};
use crate::engine::circuit::{execute, CircuitAnalyzer, GateOp};
use crate::engine::state::DistributedState;
use crate::engine::transport::SingleProcess;
use crate::error::{Result, SimError};

/// Single-process driver: owns one state and runs named-gate circuits on it.
#[cfg_attr(feature = "python", pyclass(unsendable))]
pub struct SimulatorController {
    state: Option<DistributedState<SingleProcess>>, // None until initialize()
    num_qubits: usize,
    num_page_qubits: usize,
    backing_store: Option<String>,
}

impl SimulatorController {
    pub fn new(num_qubits: usize, num_page_qubits: usize, backing_store: Option<String>) -> Self {
        Self {
            state: None,
            num_qubits,
            num_page_qubits,
            backing_store,
        }
    }

    /// Phase 1: allocate the state |0...0>.
    pub fn initialize(&mut self) -> Result<()> {
        let mut config = StateConfig::new(self.num_qubits).with_page_qubits(self.num_page_qubits);
        if let Some(path) = &self.backing_store {
            config = config.with_backing_store(path);
        }
        self.state = Some(DistributedState::new(config, SingleProcess)?);
        info!(
            "[Rust Core] Initialized {} qubits, {} page qubit(s), store: {}",
            self.num_qubits,
            self.num_page_qubits,
            self.backing_store.as_deref().unwrap_or("anonymous")
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn state_mut(&mut self) -> Result<&mut DistributedState<SingleProcess>> {
        self.state
            .as_mut()
            .ok_or_else(|| SimError::InvalidConfiguration("state not initialized".into()))
    }

    /// Phase 2: analyze and execute a circuit given as parallel lists.
    ///
    /// Returns the measurement outcomes in program order.
    pub fn run_circuit(
        &mut self,
        gate_names: Vec<String>,
        targets: Vec<Vec<usize>>,
        params: Vec<Vec<f64>>,
        controls: Option<Vec<Vec<usize>>>,
    ) -> Result<Vec<u8>> {
        let num_gates = gate_names.len();
        if targets.len() != num_gates
            || params.len() != num_gates
            || controls.as_ref().is_some_and(|c| c.len() != num_gates)
        {
            return Err(SimError::InvalidGate(format!(
                "{} gate names but {} target lists and {} parameter lists",
                num_gates,
                targets.len(),
                params.len()
            )));
        }
        let mut controls = controls.unwrap_or_else(|| vec![Vec::new(); num_gates]);

        let ops: Vec<GateOp> = gate_names
            .into_iter()
            .zip(targets)
            .zip(params)
            .zip(controls.drain(..))
            .map(|(((name, targets), params), controls)| GateOp {
                name,
                targets,
                controls,
                params,
            })
            .collect();

        let state = self.state_mut()?;
        let analyzer = CircuitAnalyzer::new(
            state.num_qubits(),
            state.config().effective_max_fused_qubits(),
        );
        let schedule = analyzer.analyze(&ops)?;
        info!(
            "[Rust Core] Analyzed {} gates into {} step(s), {} fused window(s). Starting execution loop...",
            ops.len(),
            schedule.steps.len(),
            schedule.num_fused_windows()
        );
        execute(state, &schedule)
    }

    /// The full state vector in logical order.
    pub fn amplitudes(&mut self) -> Result<Vec<Complex>> {
        self.state_mut()?.gather(0)
    }

    pub fn norm(&mut self) -> Result<Real> {
        let sums = self.state_mut()?.norm_squared()?;
        Ok(sums.first().copied().unwrap_or(0.0).sqrt())
    }

    /// <S_x>, <S_y>, <S_z> for every qubit.
    pub fn spin_expectation_values(&mut self) -> Result<Vec<[Real; 3]>> {
        self.state_mut()?.spin_expectation_values(0)
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl SimulatorController {
    #[new]
    #[pyo3(signature = (num_qubits, num_page_qubits = 0, backing_store = None))]
    fn py_new(num_qubits: usize, num_page_qubits: usize, backing_store: Option<String>) -> Self {
        Self::new(num_qubits, num_page_qubits, backing_store)
    }

    #[pyo3(name = "initialize")]
    fn py_initialize(&mut self) -> PyResult<()> {
        Ok(self.initialize()?)
    }

    #[pyo3(name = "run_circuit", signature = (gate_names, targets, params, controls = None))]
    fn py_run_circuit(
        &mut self,
        gate_names: Vec<String>,
        targets: Vec<Vec<usize>>,
        params: Vec<Vec<f64>>,
        controls: Option<Vec<Vec<usize>>>,
    ) -> PyResult<Vec<u8>> {
        Ok(self.run_circuit(gate_names, targets, params, controls)?)
    }

    #[pyo3(name = "amplitudes")]
    fn py_amplitudes<'py>(&mut self, py: Python<'py>) -> PyResult<Bound<'py, PyArray1<Complex>>> {
        Ok(self.amplitudes()?.into_pyarray(py))
    }

    #[pyo3(name = "norm")]
    fn py_norm(&mut self) -> PyResult<Real> {
        Ok(self.norm()?)
    }

    #[pyo3(name = "spin_expectation_values")]
    fn py_spin_expectation_values(&mut self) -> PyResult<Vec<[Real; 3]>> {
        Ok(self.spin_expectation_values()?)
    }
}
