//! Erasure Codec
//!
//! Systematic Reed-Solomon layout. A group is one block per stripe: `n`
//! data blocks in file order followed by `p` parity blocks.
//!
//! ```text
//!   stripe   0    1    2    3    4    5
//!          ┌────┬────┬────┬────┐┌────┬────┐
//!  group g │ d0 │ d1 │ d2 │ d3 ││ p0 │ p1 │
//!          └────┴────┴────┴────┘└────┴────┘
//! ```
//!
//! Up to `p` lost blocks per group are rebuilt. Decoding uses exactly `n`
//! surviving blocks chosen by [`backtracking`]: a data block may only fill
//! the basis slot matching its own index, parity blocks may fill any slot.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::LayoutKind;
use crate::error::{Error, Result};
use crate::raid::codec::{GroupBuffer, RedundancyCodec};
use crate::raid::fec::FecCodec;

/// Reed-Solomon codec over one block per stripe
#[derive(Debug)]
pub struct ErasureCodec {
    fec: FecCodec,
    buffer: GroupBuffer,
}

impl ErasureCodec {
    pub fn new(n_data: usize, n_parity: usize, stripe_width: usize) -> Result<Self> {
        let fec = FecCodec::new(n_data, n_parity)?;
        Ok(Self {
            buffer: GroupBuffer::new(fec.n_total(), stripe_width),
            fec,
        })
    }

    pub fn n_data(&self) -> usize {
        self.fec.n_data()
    }

    pub fn n_parity(&self) -> usize {
        self.fec.n_parity()
    }
}

/// Choose a decoding basis of `n_data` block ids out of `valid`.
///
/// Slot `k` of the basis holds either data block `k` or some parity block
/// (id `>= n_data`). Candidates are tried in ascending order, so a
/// surviving data block is preferred for its own slot. Returns `None` when
/// fewer than `n_data` blocks can be placed.
pub fn backtracking(n_data: usize, valid: &[usize]) -> Option<Vec<usize>> {
    fn place(
        k: usize,
        n_data: usize,
        valid: &[usize],
        used: &mut [bool],
        basis: &mut Vec<usize>,
    ) -> bool {
        if k == n_data {
            return true;
        }
        for (i, &id) in valid.iter().enumerate() {
            if used[i] || (id < n_data && id != k) {
                continue;
            }
            used[i] = true;
            basis.push(id);
            if place(k + 1, n_data, valid, used, basis) {
                return true;
            }
            basis.pop();
            used[i] = false;
        }
        false
    }

    let mut sorted = valid.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut used = vec![false; sorted.len()];
    let mut basis = Vec::with_capacity(n_data);
    place(0, n_data, &sorted, &mut used, &mut basis).then_some(basis)
}

impl RedundancyCodec for ErasureCodec {
    fn kind(&self) -> LayoutKind {
        LayoutKind::ReedS
    }

    fn data_blocks_per_group(&self) -> usize {
        self.fec.n_data()
    }

    fn blocks_per_group(&self) -> usize {
        self.fec.n_total()
    }

    fn rows_per_group(&self) -> usize {
        1
    }

    fn data_block_index(&self, small: usize) -> usize {
        small
    }

    fn block_location(&self, index: usize) -> (usize, usize) {
        (index, 0)
    }

    fn buffer(&self) -> &GroupBuffer {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut GroupBuffer {
        &mut self.buffer
    }

    fn compute_parity(&mut self) -> Result<()> {
        self.fec.encode(self.buffer.blocks_mut())
    }

    fn reconstruct(&mut self, group_offset: u64, corrupt: &BTreeSet<usize>) -> Result<Vec<usize>> {
        if corrupt.is_empty() {
            return Ok(Vec::new());
        }
        if corrupt.len() > self.n_parity() {
            return Err(Error::Unrecoverable {
                group_offset,
                reason: format!(
                    "{} blocks lost, at most {} can be rebuilt",
                    corrupt.len(),
                    self.n_parity()
                ),
            });
        }

        let valid: Vec<usize> = (0..self.fec.n_total())
            .filter(|i| !corrupt.contains(i))
            .collect();
        let basis = backtracking(self.n_data(), &valid).ok_or_else(|| Error::Unrecoverable {
            group_offset,
            reason: "no decoding basis among surviving blocks".to_string(),
        })?;
        debug!("Group at {}: decoding with basis {:?}", group_offset, basis);

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; self.fec.n_total()];
        for &id in &basis {
            shards[id] = Some(self.buffer.block(id).to_vec());
        }
        self.fec.decode(&mut shards)?;

        let mut rebuilt = Vec::with_capacity(corrupt.len());
        for &id in corrupt {
            if let Some(block) = shards[id].as_deref() {
                self.buffer.block_mut(id).copy_from_slice(block);
                rebuilt.push(id);
            }
        }
        Ok(rebuilt)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const WIDTH: usize = 32;

    fn filled(n_data: usize, n_parity: usize) -> ErasureCodec {
        let mut codec = ErasureCodec::new(n_data, n_parity, WIDTH).unwrap();
        for i in 0..n_data {
            for (j, byte) in codec.buffer_mut().block_mut(i).iter_mut().enumerate() {
                *byte = (i * 53 + j * 7 + 1) as u8;
            }
        }
        codec.compute_parity().unwrap();
        codec
    }

    fn snapshot(codec: &ErasureCodec) -> Vec<Vec<u8>> {
        codec.buffer().blocks().to_vec()
    }

    fn corrupt(codec: &mut ErasureCodec, blocks: &[usize]) -> BTreeSet<usize> {
        for &b in blocks {
            codec.buffer_mut().block_mut(b).fill(0xaa);
        }
        blocks.iter().copied().collect()
    }

    // =========================================================================
    // Backtracking
    // =========================================================================

    #[test]
    fn test_backtracking_prefers_data_slots() {
        assert_eq!(backtracking(3, &[0, 1, 2, 3, 4]), Some(vec![0, 1, 2]));
    }

    #[test]
    fn test_backtracking_fills_gaps_with_parity() {
        assert_eq!(backtracking(4, &[0, 2, 4, 5]), Some(vec![0, 4, 2, 5]));
        assert_eq!(backtracking(2, &[3, 1, 2]), Some(vec![2, 1]));
    }

    #[test]
    fn test_backtracking_too_few_blocks() {
        assert_eq!(backtracking(3, &[0, 1, 3]), Some(vec![0, 1, 3]));
        assert_eq!(backtracking(3, &[0, 1]), None);
        assert_eq!(backtracking(3, &[]), None);
    }

    // =========================================================================
    // Reconstruction
    // =========================================================================

    #[test]
    fn test_recover_up_to_parity_count() {
        let expected = snapshot(&filled(4, 2));

        for lost in [vec![0], vec![5], vec![1, 3], vec![2, 4], vec![4, 5]] {
            let mut codec = filled(4, 2);
            let set = corrupt(&mut codec, &lost);
            let rebuilt = codec.reconstruct(0, &set).unwrap();
            assert_eq!(rebuilt, lost);
            assert_eq!(snapshot(&codec), expected, "lost {:?}", lost);
        }
    }

    #[test]
    fn test_one_too_many_fails() {
        let mut codec = filled(4, 2);
        let set = corrupt(&mut codec, &[0, 2, 5]);
        assert_matches!(
            codec.reconstruct(128, &set),
            Err(Error::Unrecoverable { group_offset: 128, .. })
        );
    }

    #[test]
    fn test_parity_verifies() {
        let codec = filled(3, 3);
        assert!(codec.fec.verify(codec.buffer().blocks()).unwrap());
    }
}
