//! Domain Ports (Port/Adapter Pattern)
//!
//! The RAID layer never talks to storage directly. Every physical stripe is
//! reached through a [`StripeTransport`], and adapters provide the concrete
//! backends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       RAID Layer                             │
//! │        RaidFile ──▶ StripeSet ──▶ RedundancyCodec            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼  StripeTransport
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │       MemStripe │ LocalStripe │ AsyncDispatch<T>             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::raid::completion::{Chunk, ReadHandler, WriteHandler};

// =============================================================================
// Value Objects
// =============================================================================

/// How a stripe is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing stripe, no mutation
    Read,
    /// Drop any previous content and create the stripe empty
    Recreate,
    /// Existing stripe opened for reading and writing, created if absent
    Update,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Parameters of a stripe open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub mode: OpenMode,
    /// Expected size of the stripe, a placement hint
    pub target_size: u64,
    /// Opaque booking data forwarded to the storage endpoint
    pub opaque: String,
}

impl OpenRequest {
    pub fn new(mode: OpenMode) -> Self {
        Self {
            mode,
            target_size: 0,
            opaque: String::new(),
        }
    }

    pub fn with_target_size(mut self, target_size: u64) -> Self {
        self.target_size = target_size;
        self
    }

    pub fn with_opaque(mut self, opaque: impl Into<String>) -> Self {
        self.opaque = opaque.into();
        self
    }
}

// =============================================================================
// Stripe Transport Port
// =============================================================================

/// Handle on one physical stripe file.
///
/// All methods take `&self`; implementations synchronize internally so one
/// handle can serve completions from a worker pool.
///
/// Reads past the end of the stripe return a short (possibly empty) buffer.
/// Callers treat the missing tail as zeros.
pub trait StripeTransport: Send + Sync + Debug {
    /// Location of the stripe
    fn url(&self) -> &str;

    /// Open (or create) the stripe
    fn open(&self, request: &OpenRequest) -> Result<()>;

    /// Read up to `len` bytes at `offset`
    fn read(&self, offset: u64, len: usize) -> Result<Bytes>;

    /// Write `data` at `offset`, extending the stripe if needed
    fn write(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Read and deliver the result to `handler`.
    ///
    /// The caller has already registered the request with
    /// [`ReadHandler::increment`]. The default completes inline.
    fn read_async(&self, offset: u64, len: usize, chunk: Chunk, handler: Arc<ReadHandler>) {
        handler.handle_response(chunk, self.read(offset, len));
    }

    /// Write and deliver the status to `handler`. The default completes inline.
    fn write_async(&self, offset: u64, data: Bytes, chunk: Chunk, handler: Arc<WriteHandler>) {
        handler.handle_response(chunk, self.write(offset, &data));
    }

    /// Cut or extend the stripe to exactly `size` bytes
    fn truncate(&self, size: u64) -> Result<()>;

    /// Flush buffered data to stable storage
    fn sync(&self) -> Result<()>;

    /// Current stripe size in bytes
    fn stat(&self) -> Result<u64>;

    /// Release the handle. Reopening afterwards is allowed.
    fn close(&self) -> Result<()>;

    /// Delete the stripe
    fn remove(&self) -> Result<()>;
}

/// Shared stripe handle as held by the RAID layer
pub type SharedTransport = Arc<dyn StripeTransport>;

// =============================================================================
// Tests
// =============================================================================
