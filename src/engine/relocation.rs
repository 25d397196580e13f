// Page/Qubit Relocation
// Moves amplitudes between slots so that requested qubits become local
use log::{debug, trace};
use rayon::prelude::*;

use crate::config::Complex;
use crate::engine::kernels::OperandMasks;
use crate::engine::memory::{PageId, PagedStateVector};
use crate::engine::permutation::QubitPermutation;
use crate::engine::qubit::{Qubit, Slot};
use crate::engine::transport::Transport;
use crate::error::Result;

/// Swaps the upper half of every `2^(bit+1)` block of `lower` with the lower
/// half of the matching block of `upper`.
fn swap_half_blocks(lower: &mut [Complex], upper: &mut [Complex], bit: usize) {
    let block = 1usize << (bit + 1);
    let half = 1usize << bit;
    lower
        .par_chunks_mut(block)
        .zip(upper.par_chunks_mut(block))
        .for_each(|(l, u)| l[half..].swap_with_slice(&mut u[..half]));
}

/// Exchanges two page-index bits by permuting page-table entries only.
fn interpage_swap(storage: &mut PagedStateVector, page_bit_a: usize, page_bit_b: usize) {
    // Remaining page bits are split into lower/middle/upper parts around the pair
    let masks = OperandMasks::new(&[page_bit_a, page_bit_b]);
    let num_pairs = storage.num_pages() >> 2;
    for data_block in 0..storage.num_data_blocks() {
        for k in 0..num_pairs {
            let base = masks.index_with_qubits(k);
            storage.swap_pages(
                PageId::new(data_block, base | (1 << page_bit_a)),
                PageId::new(data_block, base | (1 << page_bit_b)),
            );
        }
    }
}

/// Exchanges a page-index bit with an in-page offset bit.
fn swap_page_and_nonpage(storage: &mut PagedStateVector, page_bit: usize, offset_bit: usize) {
    let masks = OperandMasks::new(&[page_bit]);
    let num_pairs = storage.num_pages() >> 1;
    for data_block in 0..storage.num_data_blocks() {
        for k in 0..num_pairs {
            let page0 = masks.index_with_qubits(k);
            let (lower, upper) = storage.page_pair_mut(
                PageId::new(data_block, page0),
                PageId::new(data_block, page0 | (1 << page_bit)),
            );
            swap_half_blocks(lower, upper, offset_bit);
        }
    }
}

/// Exchanges two in-page offset bits inside every page.
fn swap_nonpage(storage: &mut PagedStateVector, bit_a: usize, bit_b: usize) {
    let (lo, hi) = if bit_a < bit_b { (bit_a, bit_b) } else { (bit_b, bit_a) };
    for data_block in 0..storage.num_data_blocks() {
        for page in 0..storage.num_pages() {
            storage
                .page_range_mut(PageId::new(data_block, page))
                .chunks_mut(1 << (hi + 1))
                .for_each(|chunk| {
                    let (lower, upper) = chunk.split_at_mut(1 << hi);
                    swap_half_blocks(lower, upper, lo);
                });
        }
    }
}

/// Moves the amplitudes of local slot `a` to slot `b` and vice versa.
///
/// Only the data moves; callers update the permutation.
pub fn swap_local_slots(storage: &mut PagedStateVector, a: Slot, b: Slot) {
    let (a, b) = (a.position(), b.position());
    debug_assert!(a != b && a < storage.num_local_qubits() && b < storage.num_local_qubits());
    let offset_bits = storage.offset_bits();
    match (a >= offset_bits, b >= offset_bits) {
        (true, true) => interpage_swap(storage, a - offset_bits, b - offset_bits),
        (true, false) => swap_page_and_nonpage(storage, a - offset_bits, b),
        (false, true) => swap_page_and_nonpage(storage, b - offset_bits, a),
        (false, false) => swap_nonpage(storage, a, b),
    }
}

/// Trades the contents of `first..first+len` of every data block with `peer`.
///
/// Paged containers go page by page through the scratch chunk: the untouched
/// part of the page is copied into scratch, the exchanged part is received
/// into it, and scratch becomes the page.
fn exchange_region<T: Transport + ?Sized>(
    storage: &mut PagedStateVector,
    transport: &mut T,
    first: usize,
    len: usize,
    peer: usize,
) -> Result<()> {
    let offset_bits = storage.offset_bits();
    let page_size = storage.page_size();
    let last = first + len;
    for data_block in 0..storage.num_data_blocks() {
        for page in first >> offset_bits..=(last - 1) >> offset_bits {
            let page_start = page << offset_bits;
            let lo = first.max(page_start) - page_start;
            let hi = last.min(page_start + page_size) - page_start;
            let id = PageId::new(data_block, page);
            trace!(
                "[Relocation] block {} page {} [{}, {}) <-> rank {}",
                data_block,
                page,
                lo,
                hi,
                peer
            );
            if storage.is_paged() {
                let (current, buffer) = storage.page_and_buffer_mut(id, page_size);
                buffer[..lo].copy_from_slice(&current[..lo]);
                buffer[hi..].copy_from_slice(&current[hi..]);
                transport.exchange(&current[lo..hi], &mut buffer[lo..hi], peer)?;
                storage.swap_buffer_and_page(id);
            } else {
                let (current, buffer) = storage.page_and_buffer_mut(id, hi - lo);
                transport.exchange(&current[lo..hi], &mut buffer[..hi - lo], peer)?;
                current[lo..hi].copy_from_slice(&buffer[..hi - lo]);
            }
        }
    }
    Ok(())
}

/// Swaps rank bits `rank_bits[i]` with local slots `L-1-i` across the communicator.
///
/// Every rank walks the masks `1..2^k` in the same order and, for each, trades
/// the region selected by the partner's rank bits with that partner.
pub fn interchange<T: Transport + ?Sized>(
    storage: &mut PagedStateVector,
    transport: &mut T,
    rank_bits: &[usize],
) -> Result<()> {
    let num_local = storage.num_local_qubits();
    let k = rank_bits.len();
    debug_assert!(k <= num_local);
    let rank = transport.rank();
    let len = 1usize << (num_local - k);
    for mask in 1..1usize << k {
        let target = rank_bits
            .iter()
            .enumerate()
            .filter(|&(i, _)| (mask >> i) & 1 == 1)
            .fold(rank, |acc, (_, &bit)| acc ^ (1 << bit));
        let first = rank_bits
            .iter()
            .enumerate()
            .fold(0, |acc, (i, &bit)| acc | (((target >> bit) & 1) << (num_local - 1 - i)));
        exchange_region(storage, transport, first, len, target)?;
    }
    Ok(())
}

/// Ensures every qubit in `qubits` sits on a local slot.
///
/// Non-local operands are exchanged into the top local slots. A top slot that
/// itself holds an operand is first emptied by a local swap with the highest
/// lower slot that holds none.
pub fn make_local<T: Transport + ?Sized>(
    storage: &mut PagedStateVector,
    permutation: &mut QubitPermutation,
    transport: &mut T,
    qubits: &[Qubit],
) -> Result<()> {
    let num_local = storage.num_local_qubits();
    let globals: Vec<Qubit> = qubits
        .iter()
        .copied()
        .filter(|&q| permutation.physical_slot_of(q).position() >= num_local)
        .collect();
    if globals.is_empty() {
        return Ok(());
    }
    let k = globals.len();
    debug_assert!(qubits.len() <= num_local);

    for i in 0..k {
        let swap_slot = Slot::new(num_local - 1 - i);
        let occupant = permutation.qubit_of(swap_slot);
        if !qubits.contains(&occupant) {
            continue;
        }
        let free = (0..num_local - k)
            .rev()
            .map(Slot::new)
            .find(|&s| !qubits.contains(&permutation.qubit_of(s)));
        debug_assert!(free.is_some(), "no free local slot below the exchange slots");
        if let Some(free) = free {
            debug!(
                "[Relocation] freeing {} for exchange: {} -> {}",
                swap_slot, occupant, free
            );
            swap_local_slots(storage, free, swap_slot);
            let displaced = permutation.qubit_of(free);
            permutation.swap(occupant, displaced);
        }
    }

    let rank_bits: Vec<usize> = globals
        .iter()
        .map(|&q| permutation.physical_slot_of(q).position() - num_local)
        .collect();
    debug!(
        "[Relocation] rank {} interchanging {:?} (rank bits {:?})",
        transport.rank(),
        globals,
        rank_bits
    );
    interchange(storage, transport, &rank_bits)?;
    for (i, &q) in globals.iter().enumerate() {
        let local = permutation.qubit_of(Slot::new(num_local - 1 - i));
        permutation.swap(q, local);
    }
    Ok(())
}

/// Exchanges the slot of a non-local qubit with the top local slot.
fn exchange_with_top_slot<T: Transport + ?Sized>(
    storage: &mut PagedStateVector,
    permutation: &mut QubitPermutation,
    transport: &mut T,
    qubit: Qubit,
) -> Result<()> {
    let num_local = storage.num_local_qubits();
    let rank_bit = permutation.physical_slot_of(qubit).position() - num_local;
    interchange(storage, transport, &[rank_bit])?;
    let top = permutation.qubit_of(Slot::new(num_local - 1));
    permutation.swap(qubit, top);
    Ok(())
}

/// Exchanges the physical slots of two qubits, wherever they live.
///
/// The logical state is unchanged; applying it twice restores both the
/// permutation and the container contents.
pub fn relocate_pair<T: Transport + ?Sized>(
    storage: &mut PagedStateVector,
    permutation: &mut QubitPermutation,
    transport: &mut T,
    a: Qubit,
    b: Qubit,
) -> Result<()> {
    if a == b {
        return Ok(());
    }
    let num_local = storage.num_local_qubits();
    let top = Slot::new(num_local - 1);
    let (sa, sb) = (permutation.physical_slot_of(a), permutation.physical_slot_of(b));
    debug!("[Relocation] swap {}@{} <-> {}@{}", a, sa, b, sb);
    match (sa.position() < num_local, sb.position() < num_local) {
        (true, true) => {
            swap_local_slots(storage, sa, sb);
            permutation.swap(a, b);
        }
        (true, false) | (false, true) => {
            let (global, local_slot) = if sa.position() < num_local { (b, sa) } else { (a, sb) };
            if local_slot != top {
                swap_local_slots(storage, local_slot, top);
                permutation.swap(permutation.qubit_of(local_slot), permutation.qubit_of(top));
            }
            exchange_with_top_slot(storage, permutation, transport, global)?;
            if local_slot != top {
                swap_local_slots(storage, local_slot, top);
                permutation.swap(permutation.qubit_of(local_slot), permutation.qubit_of(top));
            }
        }
        (false, false) => {
            let parked = permutation.qubit_of(top);
            exchange_with_top_slot(storage, permutation, transport, a)?;
            exchange_with_top_slot(storage, permutation, transport, b)?;
            exchange_with_top_slot(storage, permutation, transport, parked)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(num_local: usize, num_page: usize) -> PagedStateVector {
        let mut state = PagedStateVector::new(num_local, num_page, 2, None).unwrap();
        for block in 0..2 {
            for i in 0..1 << num_local {
                state[(block, i)] = Complex::new(i as f64, block as f64);
            }
        }
        state
    }

    fn swap_bits(i: usize, a: usize, b: usize) -> usize {
        let (ba, bb) = ((i >> a) & 1, (i >> b) & 1);
        (i & !((1 << a) | (1 << b))) | (ba << b) | (bb << a)
    }

    #[test]
    fn test_every_local_case_moves_bits() {
        // 5 local qubits, 2 page qubits: slots 3 and 4 are page slots
        for (a, b) in [(3, 4), (4, 0), (1, 3), (0, 2), (2, 1)] {
            let mut state = numbered(5, 2);
            swap_local_slots(&mut state, Slot::new(a), Slot::new(b));
            for block in 0..2 {
                for i in 0..32 {
                    let expected = Complex::new(swap_bits(i, a, b) as f64, block as f64);
                    assert_eq!(state[(block, i)], expected, "slots ({a},{b}) index {i}");
                }
            }
        }
    }

    #[test]
    fn test_flat_swap() {
        let mut state = numbered(4, 0);
        swap_local_slots(&mut state, Slot::new(0), Slot::new(3));
        assert_eq!(state[(0, 1)], Complex::new(8.0, 0.0));
        assert_eq!(state[(1, 8)], Complex::new(1.0, 1.0));
    }

    #[test]
    fn test_interpage_swap_leaves_scratch_alone() {
        let mut state = numbered(5, 2);
        let before = state.buffer_range().to_vec();
        swap_local_slots(&mut state, Slot::new(4), Slot::new(3));
        assert_eq!(state.buffer_range(), &before[..]);
    }
}
