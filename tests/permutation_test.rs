mod common;

use common::q;
use qp_dist_core::{QubitPermutation, SimError, Slot};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn assert_bijective(perm: &QubitPermutation) {
    let n = perm.len();
    let mut seen = vec![false; n];
    for (qubit, slot) in perm.iter() {
        assert_eq!(perm.qubit_of(slot), qubit);
        assert!(!seen[slot.position()], "slot {slot} used twice");
        seen[slot.position()] = true;
    }
    assert!(seen.into_iter().all(|s| s));
}

#[test]
fn test_random_swaps_keep_bijection() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut slots: Vec<usize> = (0..9).collect();
    slots.shuffle(&mut rng);
    let mut perm = QubitPermutation::from_slots(&slots).unwrap();
    assert_bijective(&perm);
    for _ in 0..200 {
        let (a, b) = (rng.gen_range(0..9), rng.gen_range(0..9));
        perm.swap(q(a), q(b));
        assert_bijective(&perm);
    }
}

#[test]
fn test_permutate_bits_is_a_bijection() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut slots: Vec<usize> = (0..8).collect();
    slots.shuffle(&mut rng);
    let perm = QubitPermutation::from_slots(&slots).unwrap();

    let mut hit = vec![false; 256];
    for value in 0..256u64 {
        let address = perm.permutate_bits(value);
        assert_eq!(value.count_ones(), address.count_ones());
        assert!(!hit[address as usize]);
        hit[address as usize] = true;
        assert_eq!(perm.inverse_permutate_bits(address), value);
    }
}

#[test]
fn test_swap_is_an_involution() {
    let mut slots: Vec<usize> = (0..6).collect();
    slots.reverse();
    let original = QubitPermutation::from_slots(&slots).unwrap();
    for a in 0..6 {
        for b in 0..6 {
            let mut perm = original.clone();
            perm.swap(q(a), q(b));
            perm.swap(q(a), q(b));
            assert_eq!(perm, original);
        }
    }
}

#[test]
fn test_from_slots_rejects_malformed_input() {
    assert!(matches!(
        QubitPermutation::from_slots(&[0, 0, 1]),
        Err(SimError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        QubitPermutation::from_slots(&[0, 3, 1]),
        Err(SimError::InvalidConfiguration(_))
    ));
    let perm = QubitPermutation::from_slots(&[2, 0, 1]).unwrap();
    assert_eq!(perm.physical_slot_of(q(0)), Slot::new(2));
    assert_eq!(perm.qubit_of(Slot::new(0)), q(1));
}
