//! In-Memory Stripe Adapter
//!
//! Keeps a stripe in a byte vector. Faults can be injected per byte range
//! or for the whole data area so recovery paths can be exercised without
//! real storage. Content and faults survive `close`/`open` like a remote
//! file would; recreating the stripe drops the content and the read faults.

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use crate::domain::{OpenMode, OpenRequest, StripeTransport};
use crate::error::{Error, Result};
use crate::raid::header::HEADER_SIZE;

#[derive(Debug, Default)]
struct Faults {
    /// `(offset, len)` ranges whose reads fail
    read_ranges: Vec<(u64, u64)>,
    /// Every read past the header fails
    data_reads: bool,
    writes: bool,
    open: bool,
    close: bool,
}

#[derive(Debug, Default)]
struct MemState {
    data: Vec<u8>,
    exists: bool,
    open: bool,
    faults: Faults,
    last_request: Option<OpenRequest>,
}

/// Stripe held in memory
#[derive(Debug)]
pub struct MemStripe {
    url: String,
    state: Mutex<MemState>,
}

impl MemStripe {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(MemState::default()),
        }
    }

    fn error(&self, reason: &str) -> Error {
        Error::transport(&self.url, reason)
    }

    // =========================================================================
    // Fault Injection
    // =========================================================================

    /// Fail reads overlapping `[offset, offset + len)` (raw stripe offsets)
    pub fn fail_read_range(&self, offset: u64, len: u64) {
        self.state.lock().faults.read_ranges.push((offset, len));
    }

    /// Fail every read of block data, leaving the header readable
    pub fn fail_data_reads(&self, fail: bool) {
        self.state.lock().faults.data_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().faults.writes = fail;
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.lock().faults.open = fail;
    }

    /// `close` reports an error, the stripe is released anyway
    pub fn fail_close(&self, fail: bool) {
        self.state.lock().faults.close = fail;
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults = Faults::default();
    }

    /// Destroy the header magic so the stripe looks foreign
    pub fn clobber_header(&self) {
        let mut state = self.state.lock();
        let n = state.data.len().min(HEADER_SIZE as usize);
        state.data[..n].fill(0xff);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Raw stripe content, header included
    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    /// Overwrite raw bytes without going through the transport contract
    pub fn poke(&self, offset: u64, bytes: &[u8]) {
        let mut state = self.state.lock();
        let end = offset as usize + bytes.len();
        if state.data.len() < end {
            state.data.resize(end, 0);
        }
        state.data[offset as usize..end].copy_from_slice(bytes);
    }

    pub fn exists(&self) -> bool {
        self.state.lock().exists
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn last_open_request(&self) -> Option<OpenRequest> {
        self.state.lock().last_request.clone()
    }
}

impl StripeTransport for MemStripe {
    fn url(&self) -> &str {
        &self.url
    }

    fn open(&self, request: &OpenRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.last_request = Some(request.clone());
        if state.faults.open {
            return Err(self.error("open refused"));
        }

        match request.mode {
            OpenMode::Read if !state.exists => return Err(self.error("no such stripe")),
            OpenMode::Read | OpenMode::Update => {}
            OpenMode::Recreate => {
                state.data.clear();
                state.faults.read_ranges.clear();
                state.faults.data_reads = false;
            }
        }
        state.exists = true;
        state.open = true;
        Ok(())
    }

    fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        let state = self.state.lock();
        if !state.open {
            return Err(self.error("not open"));
        }

        let end = offset + len as u64;
        if state.faults.data_reads && end > HEADER_SIZE {
            return Err(self.error("injected data read failure"));
        }
        if state
            .faults
            .read_ranges
            .iter()
            .any(|&(o, l)| offset < o + l && o < end)
        {
            return Err(self.error("injected read failure"));
        }

        let size = state.data.len() as u64;
        let start = offset.min(size) as usize;
        let stop = end.min(size) as usize;
        trace!("{}: read {} bytes at {}", self.url, stop - start, offset);
        Ok(Bytes::copy_from_slice(&state.data[start..stop]))
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(self.error("not open"));
        }
        if state.faults.writes {
            return Err(self.error("injected write failure"));
        }

        let start = offset as usize;
        let end = start + data.len();
        if state.data.len() < end {
            state.data.resize(end, 0);
        }
        state.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn truncate(&self, size: u64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(self.error("not open"));
        }
        state.data.resize(size as usize, 0);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if self.state.lock().open {
            Ok(())
        } else {
            Err(self.error("not open"))
        }
    }

    fn stat(&self) -> Result<u64> {
        let state = self.state.lock();
        if state.exists {
            Ok(state.data.len() as u64)
        } else {
            Err(self.error("no such stripe"))
        }
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.open = false;
        if state.faults.close {
            return Err(self.error("injected close failure"));
        }
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.data.clear();
        state.exists = false;
        state.open = false;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
