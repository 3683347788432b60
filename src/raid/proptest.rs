//! Property-Based Tests for the RAID codecs
//!
//! # Test Properties
//!
//! 1. **Layout Bijection**: data indices map to distinct non-parity blocks and back
//! 2. **Diagonal Cover**: every stored diagonal holds one block per row plus its parity
//! 3. **Basis Validity**: a found basis uses only surviving blocks, one per slot
//! 4. **Fault Tolerance**: up to `p` lost Reed-Solomon blocks always come back
//! 5. **Double Failure**: any two lost double parity columns come back

#![cfg(test)]

use std::collections::BTreeSet;

use proptest::prelude::*;

use super::codec::RedundancyCodec;
use super::double_parity::DoubleParityCodec;
use super::erasure::{backtracking, ErasureCodec};
use super::layout::DiagonalLayout;

const WIDTH: usize = 16;

// =============================================================================
// Property Strategies
// =============================================================================

/// `n_data` values for which `n_data + 1` is prime
fn prime_rows_strategy() -> impl Strategy<Value = usize> {
    prop::sample::select(vec![2usize, 4, 6, 10, 12])
}

/// `(n_data, n_parity)` for Reed-Solomon
fn rs_config_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=8, 1usize..=4)
}

/// Distinct block ids below `total`, at most `max` of them
fn lost_strategy(total: usize, max: usize) -> impl Strategy<Value = BTreeSet<usize>> {
    prop::collection::btree_set(0..total, 0..=max.min(total))
}

fn fill(blocks: &mut [Vec<u8>], seed: &[u8]) {
    for (i, block) in blocks.iter_mut().enumerate() {
        for (j, byte) in block.iter_mut().enumerate() {
            *byte = seed[(i * WIDTH + j) % seed.len()].wrapping_add(i as u8);
        }
    }
}

// =============================================================================
// Layout Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_small_big_bijection(n in 2usize..=16) {
        let layout = DiagonalLayout::new(n);
        let mut seen = BTreeSet::new();

        for small in 0..layout.data_blocks() {
            let big = layout.small_to_big(small);
            prop_assert!(big < layout.total_blocks());
            prop_assert!(!layout.is_parity(big) && !layout.is_diagonal_parity(big));
            prop_assert_eq!(layout.big_to_small(big), Some(small));
            prop_assert!(seen.insert(big));
        }
        for big in 0..layout.total_blocks() {
            let is_data = layout.big_to_small(big).is_some();
            prop_assert_eq!(is_data, seen.contains(&big));
        }
    }

    #[test]
    fn prop_diagonals_cover_rows(n in 2usize..=16) {
        let layout = DiagonalLayout::new(n);
        let mut covered = BTreeSet::new();

        for k in 0..n {
            let members = layout.diagonal_members(k);
            prop_assert_eq!(members.len(), n + 1);

            let rows: BTreeSet<usize> = members[..n].iter().map(|&b| layout.locate(b).1).collect();
            prop_assert_eq!(rows.len(), n);
            for &b in &members {
                prop_assert_eq!(layout.diagonal_of(b), Some(k));
                prop_assert!(covered.insert(b));
            }
        }

        // One block per row is left over, on the unstored diagonal
        prop_assert_eq!(layout.total_blocks() - covered.len(), n);
        for big in (0..layout.total_blocks()).filter(|b| !covered.contains(b)) {
            prop_assert_eq!(layout.diagonal_of(big), None);
        }
    }
}

// =============================================================================
// Basis Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_basis_is_valid(
        (n_data, n_parity) in rs_config_strategy(),
        lost in lost_strategy(12, 6),
    ) {
        let total = n_data + n_parity;
        let valid: Vec<usize> = (0..total).filter(|i| !lost.contains(i)).collect();

        match backtracking(n_data, &valid) {
            Some(basis) => {
                prop_assert_eq!(basis.len(), n_data);
                let distinct: BTreeSet<usize> = basis.iter().copied().collect();
                prop_assert_eq!(distinct.len(), n_data);
                for (slot, &id) in basis.iter().enumerate() {
                    prop_assert!(valid.contains(&id));
                    prop_assert!(id == slot || id >= n_data);
                }
            }
            None => prop_assert!(valid.len() < n_data),
        }
    }
}

// =============================================================================
// Recovery Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_erasure_recovers_within_tolerance(
        (n_data, n_parity) in rs_config_strategy(),
        seed in prop::collection::vec(any::<u8>(), 1..64),
        pick in prop::collection::vec(any::<prop::sample::Index>(), 0..=4),
    ) {
        let total = n_data + n_parity;
        let mut codec = ErasureCodec::new(n_data, n_parity, WIDTH)?;
        fill(&mut codec.buffer_mut().blocks_mut()[..n_data], &seed);
        codec.compute_parity()?;
        let expected = codec.buffer().blocks().to_vec();

        let lost: BTreeSet<usize> = pick
            .iter()
            .take(n_parity)
            .map(|i| i.index(total))
            .collect();
        for &b in &lost {
            codec.buffer_mut().zero(b);
        }

        let rebuilt = codec.reconstruct(0, &lost)?;
        prop_assert_eq!(rebuilt.len(), lost.len());
        prop_assert_eq!(codec.buffer().blocks(), &expected[..]);
    }

    #[test]
    fn prop_double_parity_survives_two_columns(
        n in prime_rows_strategy(),
        seed in prop::collection::vec(any::<u8>(), 1..64),
        a in any::<prop::sample::Index>(),
        b in any::<prop::sample::Index>(),
    ) {
        let mut codec = DoubleParityCodec::new(n, WIDTH);
        let layout = *codec.layout();
        fill(codec.buffer_mut().blocks_mut(), &seed);
        codec.compute_parity()?;
        let expected = codec.buffer().blocks().to_vec();

        let columns: BTreeSet<usize> = [a.index(n + 2), b.index(n + 2)].into_iter().collect();
        let lost: BTreeSet<usize> = (0..layout.total_blocks())
            .filter(|&big| columns.contains(&layout.locate(big).0))
            .collect();
        for &big in &lost {
            codec.buffer_mut().zero(big);
        }

        codec.reconstruct(0, &lost)?;
        prop_assert_eq!(codec.buffer().blocks(), &expected[..]);
    }
}
