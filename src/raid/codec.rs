//! Redundancy Codec
//!
//! A codec owns one group worth of block buffers and knows how a group is
//! laid out over the stripes, how parity is computed over it and how lost
//! blocks are rebuilt. The engine drives it through [`RedundancyCodec`]:
//!
//! ```text
//!  write ──▶ add_data_block ──▶ (group full) do_block_parity ──▶ parity stripes
//!  read  ──▶ (chunk failed)  recover_pieces ──▶ load_group ──▶ reconstruct
//! ```
//!
//! Blocks are addressed by their index inside the group ("big" index).
//! Data blocks also have a dense index in file order.

use std::collections::BTreeSet;
use std::fmt::Debug;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::LayoutKind;
use crate::error::{Error, Result};
use crate::raid::completion::Chunk;
use crate::raid::pieces::PieceMap;
use crate::raid::stripe_set::StripeSet;

// =============================================================================
// Group Buffer
// =============================================================================

/// Arena of equally sized block buffers, reused for every group
#[derive(Debug)]
pub struct GroupBuffer {
    blocks: Vec<Vec<u8>>,
    width: usize,
    /// Start of the group whose data is buffered but whose parity is not
    /// yet written
    pending: Option<u64>,
}

impl GroupBuffer {
    pub fn new(n_blocks: usize, width: usize) -> Self {
        Self {
            blocks: vec![vec![0u8; width]; n_blocks],
            width,
            pending: None,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, index: usize) -> &[u8] {
        &self.blocks[index]
    }

    pub fn block_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.blocks[index]
    }

    /// All blocks, index order
    pub fn blocks(&self) -> &[Vec<u8>] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.blocks
    }

    pub fn zero(&mut self, index: usize) {
        self.blocks[index].fill(0);
    }

    pub fn zero_all(&mut self) {
        for block in &mut self.blocks {
            block.fill(0);
        }
    }

    /// `blocks[dst] ^= blocks[src]`
    pub fn xor_into(&mut self, dst: usize, src: usize) {
        debug_assert_ne!(dst, src);
        let (d, s) = if dst < src {
            let (lo, hi) = self.blocks.split_at_mut(src);
            (&mut lo[dst], &hi[0])
        } else {
            let (lo, hi) = self.blocks.split_at_mut(dst);
            (&mut hi[0], &lo[src])
        };
        for (a, b) in d.iter_mut().zip(s.iter()) {
            *a ^= b;
        }
    }

    /// Rebuild `target` as the XOR of every other member of `stripe`
    pub fn xor_rebuild(&mut self, target: usize, stripe: &[usize]) {
        self.zero(target);
        for &member in stripe.iter().filter(|&&m| m != target) {
            self.xor_into(target, member);
        }
    }

    pub fn pending(&self) -> Option<u64> {
        self.pending
    }

    pub fn set_pending(&mut self, group: Option<u64>) {
        self.pending = group;
    }
}

// =============================================================================
// Codec Trait
// =============================================================================

/// Group layout, parity computation and reconstruction of one redundancy
/// scheme
pub trait RedundancyCodec: Send + Debug {
    fn kind(&self) -> LayoutKind;

    /// Data blocks per group
    fn data_blocks_per_group(&self) -> usize;

    /// All blocks per group, data and redundancy
    fn blocks_per_group(&self) -> usize;

    /// Blocks every stripe holds per group
    fn rows_per_group(&self) -> usize;

    /// Block index of the `small`-th data block of a group
    fn data_block_index(&self, small: usize) -> usize;

    /// `(logical stripe, row)` of a block
    fn block_location(&self, index: usize) -> (usize, usize);

    fn buffer(&self) -> &GroupBuffer;

    fn buffer_mut(&mut self) -> &mut GroupBuffer;

    /// Fill the redundancy blocks of the buffered group from its data blocks
    fn compute_parity(&mut self) -> Result<()>;

    /// Rebuild the `corrupt` blocks of the buffered group in place.
    ///
    /// Returns the rebuilt block indices in the order they were rebuilt.
    fn reconstruct(&mut self, group_offset: u64, corrupt: &BTreeSet<usize>) -> Result<Vec<usize>>;

    // =========================================================================
    // Provided
    // =========================================================================

    fn width(&self) -> usize {
        self.buffer().width()
    }

    /// Logical file bytes per group
    fn group_size(&self) -> u64 {
        (self.data_blocks_per_group() * self.width()) as u64
    }

    /// Whether a block holds file data
    fn is_data_block(&self, index: usize) -> bool {
        self.block_location(index).0 < self.data_stripes()
    }

    /// Number of data stripes
    fn data_stripes(&self) -> usize {
        self.data_blocks_per_group() / self.rows_per_group()
    }

    /// Position of a block inside its stripe, header excluded
    fn block_local_offset(&self, group_offset: u64, index: usize) -> u64 {
        let group = group_offset / self.group_size();
        let row = self.block_location(index).1;
        let w = self.width() as u64;
        (group * self.rows_per_group() as u64 + row as u64) * w
    }

    /// Stripe bytes (header excluded) needed to hold `file_size` bytes
    fn stripe_size_for(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.group_size()) * self.rows_per_group() as u64 * self.width() as u64
    }

    /// Cut every stripe at the group boundary at or above `file_size`
    fn truncate(&self, set: &StripeSet, file_size: u64) -> Result<()> {
        set.truncate_all(self.stripe_size_for(file_size))
    }

    /// Write the redundancy blocks of the buffered group
    fn write_parity(&self, set: &StripeSet, group_offset: u64) {
        for index in (0..self.blocks_per_group()).filter(|&i| !self.is_data_block(i)) {
            let (stripe, _) = self.block_location(index);
            let data = Bytes::copy_from_slice(self.buffer().block(index));
            set.write_async(
                stripe,
                self.block_local_offset(group_offset, index),
                data,
                Chunk::new(index as u64, self.width()),
            );
        }
    }

    /// Compute and persist the redundancy of the buffered group
    fn do_block_parity(&mut self, set: &StripeSet, group_offset: u64) -> Result<()> {
        self.compute_parity()?;
        self.write_parity(set, group_offset);
        set.wait_writes()?;
        debug!("Parity written for group at {}", group_offset);
        Ok(())
    }

    /// Buffer freshly written data for streaming parity computation.
    ///
    /// Data must append to the pending group or start at a group boundary;
    /// bytes of the group not seen here count as zeros. Parity is flushed
    /// when a group fills up, or when data for another group arrives while
    /// one is pending. Returns the number of groups flushed.
    fn add_data_block(&mut self, set: &StripeSet, mut offset: u64, mut data: &[u8]) -> Result<usize> {
        let group_size = self.group_size();
        let width = self.width() as u64;
        let mut flushed = 0;

        while !data.is_empty() {
            let group = (offset / group_size) * group_size;

            if let Some(pending) = self.buffer().pending() {
                if pending != group {
                    self.do_block_parity(set, pending)?;
                    self.buffer_mut().zero_all();
                    self.buffer_mut().set_pending(None);
                    flushed += 1;
                }
            }
            self.buffer_mut().set_pending(Some(group));

            let rel = offset - group;
            let in_block = (rel % width) as usize;
            let n = data.len().min(self.width() - in_block);
            let index = self.data_block_index((rel / width) as usize);
            self.buffer_mut().block_mut(index)[in_block..in_block + n].copy_from_slice(&data[..n]);

            offset += n as u64;
            data = &data[n..];

            if offset % group_size == 0 {
                self.do_block_parity(set, group)?;
                self.buffer_mut().zero_all();
                self.buffer_mut().set_pending(None);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Flush the pending group if it lies inside the file
    fn flush_pending(&mut self, set: &StripeSet, file_size: u64) -> Result<bool> {
        match self.buffer().pending() {
            Some(group) if group < file_size.max(1) => {
                self.do_block_parity(set, group)?;
                self.buffer_mut().zero_all();
                self.buffer_mut().set_pending(None);
                Ok(true)
            }
            Some(_) => {
                self.buffer_mut().set_pending(None);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Read the blocks selected by `wanted` of a group into the buffer.
    ///
    /// Everything else in the buffer is zeroed. Returns the blocks that
    /// could not be read.
    fn load_blocks(
        &mut self,
        set: &StripeSet,
        group_offset: u64,
        wanted: &dyn Fn(usize) -> bool,
    ) -> BTreeSet<usize> {
        self.buffer_mut().zero_all();

        let width = self.width();
        for index in (0..self.blocks_per_group()).filter(|&i| wanted(i)) {
            let (stripe, _) = self.block_location(index);
            set.read_async(
                stripe,
                self.block_local_offset(group_offset, index),
                width,
                Chunk::new(index as u64, width),
            );
        }

        let mut failed = BTreeSet::new();
        for outcome in set.collect_reads() {
            for (chunk, data) in outcome.chunks {
                let n = data.len().min(width);
                self.buffer_mut().block_mut(chunk.offset as usize)[..n].copy_from_slice(&data[..n]);
            }
            failed.extend(outcome.errors.keys().map(|&k| k as usize));
        }
        failed
    }

    /// Read every block of a group
    fn load_group(&mut self, set: &StripeSet, group_offset: u64) -> BTreeSet<usize> {
        self.load_blocks(set, group_offset, &|_| true)
    }

    /// Read the data blocks of a group and recompute its redundancy
    fn recompute_group_parity(&mut self, set: &StripeSet, group_offset: u64) -> Result<()> {
        let data_stripes = self.data_stripes();
        let locations: Vec<bool> = (0..self.blocks_per_group())
            .map(|i| self.block_location(i).0 < data_stripes)
            .collect();
        let failed = self.load_blocks(set, group_offset, &|i| locations[i]);
        if !failed.is_empty() {
            return Err(Error::Unrecoverable {
                group_offset,
                reason: format!("data blocks {:?} unreadable during parity update", failed),
            });
        }
        self.do_block_parity(set, group_offset)
    }

    /// Copy file ranges out of the buffered group into `out`, which holds
    /// the file bytes starting at `out_offset`
    fn copy_pieces(&self, group_offset: u64, pieces: &PieceMap, out: &mut [u8], out_offset: u64) {
        let width = self.width() as u64;
        for (start, len) in pieces.iter() {
            let mut pos = start;
            let end = start + len;
            while pos < end {
                let rel = pos - group_offset;
                let in_block = (rel % width) as usize;
                let n = ((end - pos) as usize).min(self.width() - in_block);
                let index = self.data_block_index((rel / width) as usize);
                let dst = (pos - out_offset) as usize;
                out[dst..dst + n].copy_from_slice(&self.buffer().block(index)[in_block..in_block + n]);
                pos += n as u64;
            }
        }
    }

    /// Rebuild a group and serve `pieces` from it.
    ///
    /// Reads every block, rebuilds the ones that failed, writes them back
    /// when recovery is stored and copies the requested ranges into `out`.
    fn recover_pieces(
        &mut self,
        set: &StripeSet,
        group_offset: u64,
        pieces: &PieceMap,
        out: &mut [u8],
        out_offset: u64,
    ) -> Result<GroupRecovery> {
        let corrupt = self.load_group(set, group_offset);
        if !corrupt.is_empty() {
            debug!("Group at {}: blocks {:?} need rebuilding", group_offset, corrupt);
        }

        let rebuilt = self.reconstruct(group_offset, &corrupt)?;
        let mut recovery = GroupRecovery {
            rebuilt: rebuilt.len(),
            stored: false,
        };

        if set.store_recovery() && set.is_writable() {
            recovery.stored = true;
            for &index in &rebuilt {
                let (stripe, _) = self.block_location(index);
                let local = self.block_local_offset(group_offset, index);
                if let Err(e) = set.write_sync(stripe, local, self.buffer().block(index)) {
                    warn!("Failed to store rebuilt block {} on stripe {}: {}", index, stripe, e);
                    recovery.stored = false;
                }
            }
        }

        self.copy_pieces(group_offset, pieces, out, out_offset);
        Ok(recovery)
    }
}

/// Result of rebuilding one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupRecovery {
    /// Blocks rebuilt from redundancy
    pub rebuilt: usize,
    /// Rebuilt blocks were all written back to their stripes
    pub stored: bool,
}

// =============================================================================
// Tests
// =============================================================================
