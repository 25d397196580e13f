mod common;

use common::{gate, q, random_circuit, random_gate_on, run_cluster, Reference};
use qp_dist_core::{
    Complex, DistributedState, ExecutionPolicy, Gate, GateKind, GateTarget, Qubit, Residency,
    SimError, SingleProcess, StateConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn prepared(config: StateConfig, seed: u64) -> DistributedState<SingleProcess> {
    let num_qubits = config.num_local_qubits;
    let mut state = DistributedState::new(config, SingleProcess).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    for g in random_circuit(&mut rng, num_qubits, 30, 3) {
        state.apply_gate(&g).unwrap();
    }
    state
}

fn all_blocks<T: qp_dist_core::Transport>(state: &mut DistributedState<T>) -> Vec<Vec<Complex>> {
    (0..state.num_data_blocks())
        .map(|b| state.gather(b).unwrap())
        .collect()
}

/// Runs `gates` sequentially on one copy and fused on another; both must agree
/// bit for bit.
fn assert_transparent(config: StateConfig, qubits: &[usize], expected: Residency) {
    let mut rng = StdRng::seed_from_u64(qubits.iter().map(|&x| x as u64 * 31).sum());
    let gates: Vec<Gate> = (0..12).map(|_| random_gate_on(&mut rng, qubits, 3)).collect();

    let mut sequential = prepared(config.clone(), 17);
    let mut fused = prepared(config, 17);
    let set: Vec<Qubit> = qubits.iter().copied().map(q).collect();
    assert_eq!(fused.residency_of(&set), Some(expected), "{qubits:?}");

    for g in &gates {
        sequential.apply_gate(g).unwrap();
    }
    fused.begin_fusion();
    for g in &gates {
        fused.apply_gate(g).unwrap();
    }
    assert!(fused.is_fusing());
    fused.end_fusion().unwrap();
    assert!(!fused.is_fusing());

    assert_eq!(all_blocks(&mut fused), all_blocks(&mut sequential), "{expected:?}");
}

#[test]
fn test_fusion_is_transparent_for_every_residency() {
    let cache4 = ExecutionPolicy::CacheAware {
        num_on_cache_qubits: 4,
    };
    // 8 local qubits, 2 page qubits: 6 in-page bits
    let paged = StateConfig::new(8)
        .with_page_qubits(2)
        .with_data_blocks(2)
        .with_policy(cache4);
    assert_transparent(paged.clone(), &[0, 1, 3], Residency::AllOnCache);
    assert_transparent(paged.clone(), &[4, 5], Residency::NoneOnCache);
    assert_transparent(paged.clone(), &[2, 5, 0], Residency::SomeOnCache);
    assert_transparent(paged.clone(), &[1, 6], Residency::OnPage);
    assert_transparent(paged.clone(), &[6, 7], Residency::OnPage);
    assert_transparent(
        paged.clone().with_policy(ExecutionPolicy::Plain),
        &[0, 4, 5],
        Residency::InPage,
    );
    assert_transparent(
        paged.with_policy(ExecutionPolicy::CacheAware {
            num_on_cache_qubits: 6,
        }),
        &[0, 2, 5],
        Residency::AllOnCacheSmall,
    );
    // Flat storage
    assert_transparent(
        StateConfig::new(6).with_policy(cache4),
        &[3, 5, 4],
        Residency::SomeOnCache,
    );
}

#[test]
fn test_fused_global_qubits_match_reference() {
    let config = StateConfig::new(4).with_page_qubits(1).with_max_fused_qubits(4);
    let results = run_cluster(2, config, |mut state| {
        let mut rng = StdRng::seed_from_u64(5);
        let prep = random_circuit(&mut rng, 5, 20, 3);
        for g in &prep {
            state.apply_gate(g).unwrap();
        }
        let window: Vec<Gate> = (0..10)
            .map(|_| random_gate_on(&mut rng, &[4, 0, 3, 2], 3))
            .collect();
        state.begin_fusion();
        for g in &window {
            state.apply_gate(g).unwrap();
        }
        state.end_fusion().unwrap();
        let mut all = prep;
        all.extend(window);
        (all, state.gather(0).unwrap())
    });
    let (gates, amplitudes) = &results[0];
    let mut reference = Reference::new(5);
    reference.apply_all(gates);
    common::assert_close(amplitudes, &reference.amplitudes);
    assert_eq!(&results[1].1, amplitudes);
}

#[test]
fn test_non_unitary_operations_rejected_while_fusing() {
    let mut state = prepared(StateConfig::new(5).with_page_qubits(1), 2);
    let before = state.gather(0).unwrap();
    state.begin_fusion();
    state.hadamard(q(0)).unwrap();

    for (name, result) in [
        ("clear", state.clear(q(1)).map(|_| ())),
        ("set", state.set(q(1)).map(|_| ())),
        ("measure", state.measure(q(1)).map(|_| ())),
    ] {
        match result {
            Err(SimError::UnsupportedOperationDuringFusion { operation }) => {
                assert_eq!(operation, name)
            }
            other => panic!("{name}: expected rejection, got {other:?}"),
        }
    }
    // Nothing ran yet, and the recorded gate is still pending
    assert!(state.is_fusing());
    assert_eq!(state.gather(0).unwrap(), before);
    state.end_fusion().unwrap();
    let mut reference_state = prepared(StateConfig::new(5).with_page_qubits(1), 2);
    reference_state.hadamard(q(0)).unwrap();
    assert_eq!(state.gather(0).unwrap(), reference_state.gather(0).unwrap());
}

#[test]
fn test_fusion_state_machine_edges() {
    let mut state = prepared(StateConfig::new(4), 8);
    let before = state.gather(0).unwrap();

    // end_fusion while idle does nothing
    state.end_fusion().unwrap();
    assert_eq!(state.gather(0).unwrap(), before);

    // Nested begin stays in one window; an empty window is a no-op
    state.begin_fusion();
    state.begin_fusion();
    assert!(state.is_fusing());
    state.end_fusion().unwrap();
    assert!(!state.is_fusing());
    assert_eq!(state.gather(0).unwrap(), before);
}

#[test]
fn test_abort_fusion_drops_recorded_gates() {
    let mut state = prepared(StateConfig::new(4).with_page_qubits(1), 5);
    let before = state.gather(0).unwrap();

    state.begin_fusion();
    state.hadamard(q(3)).unwrap();
    state.controlled_not(q(0), q(3)).unwrap();
    state.abort_fusion();
    assert!(!state.is_fusing());
    assert_eq!(state.gather(0).unwrap(), before);

    // Idle abort is harmless, and later windows start empty
    state.abort_fusion();
    state.begin_fusion();
    state.not(q(1)).unwrap();
    state.not(q(1)).unwrap();
    state.end_fusion().unwrap();
    assert_eq!(state.gather(0).unwrap(), before);
}

#[test]
fn test_fused_set_limit_rejects_without_recording() {
    let config = StateConfig::new(5).with_max_fused_qubits(2);
    let mut state = prepared(config.clone(), 4);
    let mut expected = prepared(config, 4);

    state.begin_fusion();
    state.controlled_not(q(0), q(1)).unwrap();
    let err = state
        .apply_gate(&gate(GateKind::Hadamard, &[3], &[]))
        .unwrap_err();
    assert!(matches!(
        err,
        SimError::TooManyOperatedQubits {
            requested: 3,
            max: 2
        }
    ));
    state.pauli_z(q(1)).unwrap();
    state.end_fusion().unwrap();

    expected.controlled_not(q(0), q(1)).unwrap();
    expected.pauli_z(q(1)).unwrap();
    assert_eq!(state.gather(0).unwrap(), expected.gather(0).unwrap());
}
