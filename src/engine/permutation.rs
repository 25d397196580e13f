// Qubit Permutation
use crate::config::StateInteger;
use crate::engine::qubit::{Qubit, Slot};
use crate::error::{Result, SimError};

/// Bijection between logical qubits and physical slots.
///
/// Every rank holds an identical copy; it only changes through relocation, and
/// every relocation is a collective step, so the copies never diverge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QubitPermutation {
    slots: Vec<Slot>,
    qubits: Vec<Qubit>,
}

impl QubitPermutation {
    /// Identity mapping over `num_qubits` qubits.
    pub fn new(num_qubits: usize) -> Self {
        Self {
            slots: (0..num_qubits).map(Slot::new).collect(),
            qubits: (0..num_qubits).map(Qubit::new).collect(),
        }
    }

    /// Builds a permutation where logical qubit `q` starts in slot `slots[q]`.
    pub fn from_slots(slots: &[usize]) -> Result<Self> {
        let n = slots.len();
        let mut qubits = vec![None; n];
        for (qubit, &slot) in slots.iter().enumerate() {
            let Some(entry) = qubits.get_mut(slot) else {
                return Err(SimError::InvalidConfiguration(format!(
                    "slot {slot} out of range for {n} qubits"
                )));
            };
            if entry.is_some() {
                return Err(SimError::InvalidConfiguration(format!(
                    "slot {slot} assigned twice in initial permutation"
                )));
            }
            *entry = Some(Qubit::new(qubit));
        }
        Ok(Self {
            slots: slots.iter().copied().map(Slot::new).collect(),
            qubits: qubits.into_iter().flatten().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn physical_slot_of(&self, qubit: Qubit) -> Slot {
        self.slots[qubit.index()]
    }

    pub fn qubit_of(&self, slot: Slot) -> Qubit {
        self.qubits[slot.position()]
    }

    /// Exchanges the slots of two qubits. Applying it twice is a no-op.
    pub fn swap(&mut self, a: Qubit, b: Qubit) {
        let (sa, sb) = (self.slots[a.index()], self.slots[b.index()]);
        self.slots.swap(a.index(), b.index());
        self.qubits.swap(sa.position(), sb.position());
    }

    /// Maps a logical basis index to its physical address.
    pub fn permutate_bits(&self, value: StateInteger) -> StateInteger {
        self.slots
            .iter()
            .enumerate()
            .filter(|&(qubit, _)| (value >> qubit) & 1 == 1)
            .fold(0, |acc, (_, slot)| acc | slot.mask())
    }

    /// Maps a physical address back to the logical basis index.
    pub fn inverse_permutate_bits(&self, address: StateInteger) -> StateInteger {
        self.qubits
            .iter()
            .enumerate()
            .filter(|&(slot, _)| (address >> slot) & 1 == 1)
            .fold(0, |acc, (_, qubit)| acc | (1 << qubit.index()))
    }

    /// `(qubit, slot)` pairs in logical order.
    pub fn iter(&self) -> impl Iterator<Item = (Qubit, Slot)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(q, &slot)| (Qubit::new(q), slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_round_trip() {
        let perm = QubitPermutation::new(5);
        for q in 0..5 {
            let slot = perm.physical_slot_of(Qubit::new(q));
            assert_eq!(slot, Slot::new(q));
            assert_eq!(perm.qubit_of(slot), Qubit::new(q));
        }
        assert_eq!(perm.permutate_bits(0b10110), 0b10110);
    }

    #[test]
    fn test_swap_updates_both_directions() {
        let mut perm = QubitPermutation::new(4);
        perm.swap(Qubit::new(0), Qubit::new(3));
        assert_eq!(perm.physical_slot_of(Qubit::new(0)), Slot::new(3));
        assert_eq!(perm.qubit_of(Slot::new(0)), Qubit::new(3));
        assert_eq!(perm.permutate_bits(0b0001), 0b1000);
        assert_eq!(perm.inverse_permutate_bits(0b1000), 0b0001);

        perm.swap(Qubit::new(0), Qubit::new(3));
        assert_eq!(perm, QubitPermutation::new(4));
    }

    #[test]
    fn test_from_slots_rejects_duplicates() {
        assert!(QubitPermutation::from_slots(&[1, 1, 0]).is_err());
        assert!(QubitPermutation::from_slots(&[0, 3, 1]).is_err());

        let perm = QubitPermutation::from_slots(&[2, 0, 1]).unwrap();
        assert_eq!(perm.qubit_of(Slot::new(2)), Qubit::new(0));
        assert_eq!(perm.permutate_bits(0b001), 0b100);
        for value in 0..8 {
            assert_eq!(perm.inverse_permutate_bits(perm.permutate_bits(value)), value);
        }
    }
}
