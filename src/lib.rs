#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod config;
pub mod engine;
pub mod error;

pub use config::{Complex, ExecutionPolicy, Real, StateConfig, StateInteger};
pub use engine::circuit::{execute, CircuitAnalyzer, GateOp, Instruction, Schedule, Step};
pub use engine::controller::SimulatorController;
pub use engine::dispatch::{GateDispatcher, Residency};
pub use engine::fusion::{FusionEngine, ReplayForm};
pub use engine::gate::{Gate, GateKind};
pub use engine::memory::{PageId, PagedStateVector};
pub use engine::permutation::QubitPermutation;
pub use engine::qubit::{ControlQubit, Qubit, Slot};
pub use engine::state::DistributedState;
pub use engine::target::GateTarget;
pub use engine::transport::{LocalCluster, LocalTransport, SingleProcess, Transport};
pub use error::{Result, SimError};

/// Python module definition
#[cfg(feature = "python")]
#[pymodule]
fn qp_dist_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Expose the main Controller class to Python
    m.add_class::<SimulatorController>()?;
    Ok(())
}
