// Error Types
use thiserror::Error;

/// Errors raised by the simulation core and its drivers.
///
/// Every variant is detected before the container is touched, so a failed call
/// leaves the state exactly as it was.
#[derive(Debug, Error)]
pub enum SimError {
    /// A gate names more operands than the container can localize at once
    #[error("too many operated qubits: {requested} requested, at most {max} supported")]
    TooManyOperatedQubits { requested: usize, max: usize },

    /// A non-unitary operation was issued between begin_fusion and end_fusion
    #[error("unsupported operation during fusion: {operation}")]
    UnsupportedOperationDuringFusion { operation: String },

    /// The page layout cannot be built for this page-qubit count
    #[error("num_page_qubits={num_page_qubits} is not supported")]
    UnsupportedPageCount { num_page_qubits: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Raised by drivers before calling into the core
    #[error("qubit {qubit} out of range for a {num_qubits}-qubit state")]
    QubitOutOfRange { qubit: usize, num_qubits: usize },

    #[error("unknown gate: {name}")]
    UnknownGate { name: String },

    #[error("invalid gate: {0}")]
    InvalidGate(String),

    /// A peer rank went away mid-protocol
    #[error("transport failure with rank {peer}: {message}")]
    Transport { peer: usize, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(feature = "python")]
impl From<SimError> for pyo3::PyErr {
    fn from(err: SimError) -> Self {
        match err {
            SimError::Storage(e) => pyo3::exceptions::PyIOError::new_err(e.to_string()),
            other => pyo3::exceptions::PyRuntimeError::new_err(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = SimError::TooManyOperatedQubits {
            requested: 5,
            max: 4,
        };
        assert_eq!(
            err.to_string(),
            "too many operated qubits: 5 requested, at most 4 supported"
        );

        let err = SimError::UnsupportedOperationDuringFusion {
            operation: "measure".into(),
        };
        assert!(err.to_string().contains("measure"));

        let err = SimError::UnsupportedPageCount { num_page_qubits: 9 };
        assert_eq!(err.to_string(), "num_page_qubits=9 is not supported");
    }
}
