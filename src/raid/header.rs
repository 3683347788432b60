//! Stripe Header
//!
//! Every physical stripe starts with a fixed [`HEADER_SIZE`] prefix that
//! records which logical stripe it holds and how long the file is. Block
//! data begins right after it.
//!
//! On-disk layout (little-endian, zero padded to `HEADER_SIZE`):
//!
//! ```text
//! ┌──────────────────┬──────────┬───────────┬─────────────────┬────────────┬───────┐
//! │ magic [u8; 16]   │ id: u32  │ blocks:u64│ last_block: u64 │ width: u64 │ valid │
//! └──────────────────┴──────────┴───────────┴─────────────────┴────────────┴───────┘
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tracing::debug;

use crate::domain::StripeTransport;
use crate::error::Result;

/// Bytes reserved at the start of every stripe
pub const HEADER_SIZE: u64 = 4096;

const HEADER_MAGIC: &[u8; 16] = b"_HEADER__RAIDIO_";

/// magic + id + blocks + last block + width + valid
const ENCODED_LEN: usize = 16 + 4 + 8 + 8 + 8 + 1;

/// Per-stripe metadata record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StripeHeader {
    /// Logical stripe held by this physical stripe
    pub id_stripe: u32,
    /// Number of blocks in the logical file
    pub no_blocks: u64,
    /// Bytes used in the final block
    pub size_last_block: u64,
    /// Block size the file was written with
    pub block_size: u64,
    /// Whether the stripe content can be trusted
    pub valid: bool,
}

impl StripeHeader {
    /// Header describing an empty file
    pub fn new(id_stripe: u32, block_size: u64) -> Self {
        Self {
            id_stripe,
            no_blocks: 0,
            size_last_block: 0,
            block_size,
            valid: true,
        }
    }

    /// Logical file size described by this header, `None` when the
    /// counts do not fit in a `u64`
    pub fn file_size(&self) -> Option<u64> {
        if self.no_blocks == 0 {
            return Some(0);
        }
        (self.no_blocks - 1)
            .checked_mul(self.block_size)?
            .checked_add(self.size_last_block)
    }

    /// Set block counts from a logical file size
    pub fn set_file_size(&mut self, size: u64) {
        if size == 0 || self.block_size == 0 {
            self.no_blocks = 0;
            self.size_last_block = 0;
        } else {
            self.no_blocks = size.div_ceil(self.block_size);
            self.size_last_block = size - (self.no_blocks - 1) * self.block_size;
        }
    }

    /// Same file description, ignoring stripe identity
    pub fn same_layout(&self, other: &StripeHeader) -> bool {
        self.no_blocks == other.no_blocks && self.size_last_block == other.size_last_block
    }

    /// Serialize into a full `HEADER_SIZE` buffer
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE as usize);
        buf.put_slice(HEADER_MAGIC);
        buf.put_u32_le(self.id_stripe);
        buf.put_u64_le(self.no_blocks);
        buf.put_u64_le(self.size_last_block);
        buf.put_u64_le(self.block_size);
        buf.put_u8(u8::from(self.valid));
        buf.resize(HEADER_SIZE as usize, 0);
        buf
    }

    /// Parse a header. Returns `None` for missing or foreign content and
    /// for block counts describing no representable file size.
    pub fn decode(mut data: &[u8]) -> Option<Self> {
        if data.len() < ENCODED_LEN || &data[..HEADER_MAGIC.len()] != HEADER_MAGIC {
            return None;
        }
        data.advance(HEADER_MAGIC.len());

        let header = Self {
            id_stripe: data.get_u32_le(),
            no_blocks: data.get_u64_le(),
            size_last_block: data.get_u64_le(),
            block_size: data.get_u64_le(),
            valid: data.get_u8() != 0,
        };
        header.file_size()?;
        Some(header)
    }

    /// Load the header of a stripe. Unreadable or malformed headers come
    /// back as an invalid header rather than an error.
    pub fn read_from(transport: &dyn StripeTransport) -> StripeHeader {
        match transport.read(0, HEADER_SIZE as usize) {
            Ok(data) => match Self::decode(&data) {
                Some(header) => header,
                None => {
                    debug!("Stripe {} has no header", transport.url());
                    StripeHeader::default()
                }
            },
            Err(e) => {
                debug!("Failed to read header of {}: {}", transport.url(), e);
                StripeHeader::default()
            }
        }
    }

    /// Persist this header at the start of a stripe
    pub fn write_to(&self, transport: &dyn StripeTransport) -> Result<()> {
        transport.write(0, &self.encode())
    }
}

// =============================================================================
// Tests
// =============================================================================
