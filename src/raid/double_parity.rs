//! Double Parity Codec
//!
//! Row-diagonal parity over `n` data stripes and two redundancy stripes.
//! A group is an `n x (n + 2)` block matrix (see [`DiagonalLayout`]):
//! every row carries the XOR of its data blocks (`P`) and every stored
//! diagonal carries the XOR of its members (`DP`).
//!
//! Reconstruction works one block at a time. A block is rebuilt from its
//! row when it is the only unknown member there, otherwise from its
//! diagonal. Blocks that have neither are set aside and retried once
//! another block has been rebuilt, which resolves chains such as two
//! lost blocks in the same row. The group is unrecoverable when the set
//! aside blocks stop making progress.

use std::collections::{BTreeSet, VecDeque};

use tracing::{debug, trace};

use crate::config::LayoutKind;
use crate::error::{Error, Result};
use crate::raid::codec::{GroupBuffer, RedundancyCodec};
use crate::raid::layout::DiagonalLayout;

/// Row-diagonal double parity codec
#[derive(Debug)]
pub struct DoubleParityCodec {
    layout: DiagonalLayout,
    buffer: GroupBuffer,
}

impl DoubleParityCodec {
    pub fn new(n_data: usize, stripe_width: usize) -> Self {
        let layout = DiagonalLayout::new(n_data);
        Self {
            buffer: GroupBuffer::new(layout.total_blocks(), stripe_width),
            layout,
        }
    }

    pub fn layout(&self) -> &DiagonalLayout {
        &self.layout
    }

    /// A stripe can rebuild `target` when `target` is its only unknown member
    fn usable(stripe: &[usize], target: usize, corrupt: &BTreeSet<usize>) -> bool {
        stripe
            .iter()
            .all(|m| *m == target || !corrupt.contains(m))
    }

    fn horizontal_for(&self, target: usize, corrupt: &BTreeSet<usize>) -> Option<Vec<usize>> {
        self.layout
            .horizontal_stripe(target)
            .filter(|stripe| Self::usable(stripe, target, corrupt))
    }

    fn diagonal_for(&self, target: usize, corrupt: &BTreeSet<usize>) -> Option<Vec<usize>> {
        self.layout
            .diagonal_stripe(target)
            .filter(|stripe| Self::usable(stripe, target, corrupt))
    }
}

impl RedundancyCodec for DoubleParityCodec {
    fn kind(&self) -> LayoutKind {
        LayoutKind::RaidDp
    }

    fn data_blocks_per_group(&self) -> usize {
        self.layout.data_blocks()
    }

    fn blocks_per_group(&self) -> usize {
        self.layout.total_blocks()
    }

    fn rows_per_group(&self) -> usize {
        self.layout.rows()
    }

    fn data_block_index(&self, small: usize) -> usize {
        self.layout.small_to_big(small)
    }

    fn block_location(&self, index: usize) -> (usize, usize) {
        self.layout.locate(index)
    }

    fn buffer(&self) -> &GroupBuffer {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut GroupBuffer {
        &mut self.buffer
    }

    fn compute_parity(&mut self) -> Result<()> {
        let n = self.layout.n_data();

        // Row parity first, diagonals run through the parity column
        for row in 0..self.layout.rows() {
            let parity = self.layout.parity_block(row);
            self.buffer.zero(parity);
            for col in 0..n {
                self.buffer.xor_into(parity, self.layout.index(col, row));
            }
        }

        for k in 0..n {
            let members = self.layout.diagonal_members(k);
            let dp = self.layout.diagonal_parity_block(k);
            self.buffer.xor_rebuild(dp, &members);
        }
        Ok(())
    }

    fn reconstruct(&mut self, group_offset: u64, corrupt: &BTreeSet<usize>) -> Result<Vec<usize>> {
        let mut unknown = corrupt.clone();
        let mut queue: VecDeque<usize> = corrupt.iter().copied().collect();
        let mut deferred: Vec<usize> = Vec::new();
        let mut rebuilt = Vec::with_capacity(corrupt.len());

        while let Some(target) = queue.pop_front() {
            let stripe = match self.horizontal_for(target, &unknown) {
                Some(row) => {
                    trace!("Block {} rebuilt from its row", target);
                    row
                }
                None => match self.diagonal_for(target, &unknown) {
                    Some(diagonal) => {
                        trace!("Block {} rebuilt from its diagonal", target);
                        diagonal
                    }
                    None => {
                        deferred.push(target);
                        continue;
                    }
                },
            };

            self.buffer.xor_rebuild(target, &stripe);
            unknown.remove(&target);
            rebuilt.push(target);
            queue.extend(deferred.drain(..));
        }

        if !deferred.is_empty() {
            return Err(Error::Unrecoverable {
                group_offset,
                reason: format!(
                    "blocks {:?} have no row or diagonal with a single unknown",
                    deferred
                ),
            });
        }

        if !rebuilt.is_empty() {
            debug!("Group at {}: rebuilt blocks {:?}", group_offset, rebuilt);
        }
        Ok(rebuilt)
    }
}

// =============================================================================
// Tests
// =============================================================================
