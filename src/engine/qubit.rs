// Qubit Identifiers
use std::fmt;

/// Logical qubit index as seen by the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Qubit(usize);

/// A qubit that must read 1 for a gate to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ControlQubit(Qubit);

/// Physical bit position of a qubit inside the distributed address.
///
/// Slots `0..L` are local (the top `num_page_qubits` of those select the page),
/// slots `L..` select the rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(usize);

impl Qubit {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    pub const fn control(self) -> ControlQubit {
        ControlQubit(self)
    }
}

impl ControlQubit {
    pub const fn new(index: usize) -> Self {
        Self(Qubit(index))
    }

    pub const fn qubit(self) -> Qubit {
        self.0
    }
}

impl Slot {
    pub const fn new(position: usize) -> Self {
        Self(position)
    }

    pub const fn position(self) -> usize {
        self.0
    }

    pub const fn mask(self) -> u64 {
        1 << self.0
    }
}

impl From<usize> for Qubit {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl From<Qubit> for ControlQubit {
    fn from(qubit: Qubit) -> Self {
        Self(qubit)
    }
}

impl fmt::Display for Qubit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

impl fmt::Display for ControlQubit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0 .0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}
