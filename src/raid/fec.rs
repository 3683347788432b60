//! Forward Error Correction Primitive
//!
//! Thin wrapper over the systematic Reed-Solomon code of the
//! `reed-solomon-erasure` crate (GF(2^8), at most 256 blocks). Blocks are
//! passed in stripe order: data blocks first, then parity blocks.

use std::sync::Arc;

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Reed-Solomon codec for `n_data + n_parity` equally sized blocks
#[derive(Debug, Clone)]
pub struct FecCodec {
    rs: Arc<ReedSolomon>,
    n_data: usize,
    n_parity: usize,
}

impl FecCodec {
    pub fn new(n_data: usize, n_parity: usize) -> Result<Self> {
        if n_data == 0 || n_parity == 0 {
            return Err(Error::Config(format!(
                "Reed-Solomon needs data and parity blocks, got {}+{}",
                n_data, n_parity
            )));
        }

        let rs = ReedSolomon::new(n_data, n_parity)?;
        Ok(Self {
            rs: Arc::new(rs),
            n_data,
            n_parity,
        })
    }

    pub fn n_data(&self) -> usize {
        self.n_data
    }

    pub fn n_parity(&self) -> usize {
        self.n_parity
    }

    pub fn n_total(&self) -> usize {
        self.n_data + self.n_parity
    }

    /// Overwrite the parity blocks with the encoding of the data blocks
    #[instrument(level = "trace", skip(self, blocks))]
    pub fn encode(&self, blocks: &mut [Vec<u8>]) -> Result<()> {
        self.check_len(blocks.len())?;
        self.rs.encode(blocks)?;
        Ok(())
    }

    /// Check parity blocks against the data blocks
    pub fn verify(&self, blocks: &[Vec<u8>]) -> Result<bool> {
        self.check_len(blocks.len())?;
        Ok(self.rs.verify(blocks)?)
    }

    /// Regenerate every `None` block from the present ones.
    ///
    /// At least `n_data` blocks must be present.
    #[instrument(level = "trace", skip(self, blocks))]
    pub fn decode(&self, blocks: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.check_len(blocks.len())?;

        let present = blocks.iter().filter(|b| b.is_some()).count();
        if present < self.n_data {
            return Err(Error::Fec(format!(
                "need {} blocks to decode, only {} present",
                self.n_data, present
            )));
        }

        self.rs.reconstruct(blocks)?;
        debug!("Decoded {} missing blocks", self.n_total() - present);
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len == self.n_total() {
            Ok(())
        } else {
            Err(Error::Fec(format!(
                "expected {} blocks, got {}",
                self.n_total(),
                len
            )))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(n_data: usize, n_parity: usize, width: usize) -> Vec<Vec<u8>> {
        let mut out: Vec<Vec<u8>> = (0..n_data)
            .map(|i| (0..width).map(|j| (i * 31 + j) as u8).collect())
            .collect();
        out.extend((0..n_parity).map(|_| vec![0u8; width]));
        out
    }

    #[test]
    fn test_new_rejects_empty_sides() {
        assert!(FecCodec::new(0, 2).is_err());
        assert!(FecCodec::new(4, 0).is_err());
        assert!(FecCodec::new(200, 57).is_err());
        assert!(FecCodec::new(4, 2).is_ok());
    }

    #[test]
    fn test_encode_then_verify() {
        let fec = FecCodec::new(4, 2).unwrap();
        let mut b = blocks(4, 2, 64);
        fec.encode(&mut b).unwrap();
        assert!(fec.verify(&b).unwrap());

        b[1][0] ^= 0xff;
        assert!(!fec.verify(&b).unwrap());
    }

    #[test]
    fn test_decode_data_and_parity() {
        let fec = FecCodec::new(3, 2).unwrap();
        let mut b = blocks(3, 2, 32);
        fec.encode(&mut b).unwrap();

        let mut shards: Vec<Option<Vec<u8>>> = b.iter().cloned().map(Some).collect();
        shards[0] = None;
        shards[4] = None;
        fec.decode(&mut shards).unwrap();

        let decoded: Vec<Vec<u8>> = shards.into_iter().flatten().collect();
        assert_eq!(decoded, b);
    }

    #[test]
    fn test_decode_too_few_blocks() {
        let fec = FecCodec::new(3, 1).unwrap();
        let mut shards: Vec<Option<Vec<u8>>> = vec![Some(vec![0; 8]), None, None, Some(vec![0; 8])];
        assert!(matches!(fec.decode(&mut shards), Err(Error::Fec(_))));
    }

    #[test]
    fn test_wrong_block_count() {
        let fec = FecCodec::new(2, 1).unwrap();
        let mut b = blocks(2, 2, 8);
        assert!(fec.encode(&mut b).is_err());
    }
}
