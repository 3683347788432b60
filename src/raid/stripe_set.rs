//! Stripe Set
//!
//! The physical side of a striped file: the transports, the bijection
//! between logical stripe ids and physical slots, the per-stripe headers
//! and the completion barriers used to fan requests out over the stripes.
//!
//! Logical stripes `0..n_data` hold file data, `n_data..n_total` hold
//! redundancy. Physical slots are positions in the configured URL list.
//! They coincide for a fresh file and drift apart once a lost stripe has
//! been relabeled.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::domain::{OpenMode, OpenRequest, SharedTransport};
use crate::error::{Error, Result};
use crate::raid::completion::{Chunk, ChunkOutcome, ReadHandler, WriteHandler};
use crate::raid::header::{StripeHeader, HEADER_SIZE};

// =============================================================================
// Geometry
// =============================================================================

/// Shape of the stripe set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub n_data: usize,
    pub n_parity: usize,
    /// Block size in bytes
    pub stripe_width: usize,
    /// Bytes reserved for the header at the start of every stripe
    pub header_size: u64,
}

impl Geometry {
    pub fn new(n_data: usize, n_parity: usize, stripe_width: usize) -> Self {
        Self {
            n_data,
            n_parity,
            stripe_width,
            header_size: HEADER_SIZE,
        }
    }

    pub fn n_total(&self) -> usize {
        self.n_data + self.n_parity
    }

    pub fn width(&self) -> u64 {
        self.stripe_width as u64
    }

    /// Data stripe holding file offset `offset`
    pub fn data_stripe(&self, offset: u64) -> usize {
        ((offset / self.width()) % self.n_data as u64) as usize
    }

    /// Position of file offset `offset` inside its data stripe, header excluded
    pub fn local_offset(&self, offset: u64) -> u64 {
        (offset / (self.n_data as u64 * self.width())) * self.width() + offset % self.width()
    }
}

// =============================================================================
// Stripe Map
// =============================================================================

/// Bijection between logical stripe ids and physical slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeMap {
    to_physical: Vec<usize>,
    to_logical: Vec<usize>,
}

impl StripeMap {
    pub fn identity(n: usize) -> Self {
        Self {
            to_physical: (0..n).collect(),
            to_logical: (0..n).collect(),
        }
    }

    /// Build from `logical -> physical`; `None` unless it is a permutation
    pub fn from_physical(to_physical: Vec<usize>) -> Option<Self> {
        let n = to_physical.len();
        let mut to_logical = vec![usize::MAX; n];
        for (logical, &physical) in to_physical.iter().enumerate() {
            if physical >= n || to_logical[physical] != usize::MAX {
                return None;
            }
            to_logical[physical] = logical;
        }
        Some(Self {
            to_physical,
            to_logical,
        })
    }

    pub fn physical(&self, logical: usize) -> usize {
        self.to_physical[logical]
    }

    pub fn logical(&self, physical: usize) -> usize {
        self.to_logical[physical]
    }

    pub fn len(&self) -> usize {
        self.to_physical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_physical.is_empty()
    }

    /// `(logical, physical)` pairs in logical order
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.to_physical.iter().copied().enumerate()
    }
}

// =============================================================================
// Header Check
// =============================================================================

/// Outcome of reconciling the stripe headers at open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCheck {
    /// Logical file size agreed by the valid headers
    pub file_size: u64,
    /// No stripe carried a valid header
    pub new_file: bool,
    /// Physical slots that were relabeled and flagged lost
    pub relabeled: Vec<usize>,
}

// =============================================================================
// Stripe Set
// =============================================================================

/// Transports of one striped file plus their bookkeeping
#[derive(Debug)]
pub struct StripeSet {
    geometry: Geometry,
    transports: Vec<SharedTransport>,
    request: OpenRequest,
    map: StripeMap,
    headers: Vec<StripeHeader>,
    lost: Vec<bool>,
    readers: Vec<Arc<ReadHandler>>,
    writers: Vec<Arc<WriteHandler>>,
    store_recovery: bool,
    writable: bool,
}

impl StripeSet {
    /// `request` supplies the size hint and opaque data for every open
    pub fn new(
        geometry: Geometry,
        transports: Vec<SharedTransport>,
        request: OpenRequest,
        store_recovery: bool,
    ) -> Self {
        let n = transports.len();
        Self {
            geometry,
            transports,
            request,
            map: StripeMap::identity(n),
            headers: (0..n)
                .map(|i| StripeHeader::new(i as u32, geometry.width()))
                .collect(),
            lost: vec![false; n],
            readers: (0..n).map(|_| Arc::new(ReadHandler::new())).collect(),
            writers: (0..n).map(|_| Arc::new(WriteHandler::new())).collect(),
            store_recovery,
            writable: false,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn map(&self) -> &StripeMap {
        &self.map
    }

    pub fn store_recovery(&self) -> bool {
        self.store_recovery
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Transport holding logical stripe `logical`
    pub fn transport(&self, logical: usize) -> &SharedTransport {
        &self.transports[self.map.physical(logical)]
    }

    /// Header of physical slot `physical`
    pub fn header(&self, physical: usize) -> &StripeHeader {
        &self.headers[physical]
    }

    pub fn is_lost(&self, logical: usize) -> bool {
        self.lost[self.map.physical(logical)]
    }

    pub fn any_lost(&self) -> bool {
        self.lost.iter().any(|&l| l)
    }

    /// Clear every lost flag once the stripes have been rebuilt
    pub fn heal_all(&mut self) {
        for (slot, lost) in self.lost.iter_mut().enumerate() {
            if *lost {
                info!("Stripe {} rebuilt", self.transports[slot].url());
                *lost = false;
            }
        }
    }

    // =========================================================================
    // Open & Headers
    // =========================================================================

    /// Open every stripe and load its header.
    ///
    /// Stripes that cannot be opened are not an error here: they come back
    /// with an invalid header and header validation decides.
    pub fn open_all(&mut self, mode: OpenMode) -> Vec<StripeHeader> {
        self.writable = mode.is_writable();
        let request = OpenRequest {
            mode,
            ..self.request.clone()
        };

        let mut headers = Vec::with_capacity(self.transports.len());
        for transport in &self.transports {
            let mut opened = transport.open(&request);
            if let (Err(e), OpenMode::Update) = (&opened, mode) {
                debug!("Reopening {} for update failed ({}), recreating", transport.url(), e);
                opened = transport.open(&OpenRequest {
                    mode: OpenMode::Recreate,
                    ..request.clone()
                });
            }

            match opened {
                Ok(()) => headers.push(StripeHeader::read_from(transport.as_ref())),
                Err(e) => {
                    warn!("Failed to open stripe {}: {}", transport.url(), e);
                    headers.push(StripeHeader::default());
                }
            }
        }
        headers
    }

    /// Reconcile the headers read at open and rebuild the stripe map.
    ///
    /// Headers that are invalid, claim an out-of-range or duplicate id, or
    /// disagree with the majority about the file length are treated as
    /// lost. Up to `n_parity` of them are relabeled with the unused logical
    /// ids in ascending order; beyond that the layout cannot be recovered.
    pub fn validate_headers(&mut self, headers: Vec<StripeHeader>) -> Result<HeaderCheck> {
        let n_total = self.geometry.n_total();
        let mut claimed: Vec<Option<usize>> = vec![None; n_total];
        let mut valid = vec![false; n_total];

        for (slot, header) in headers.iter().enumerate() {
            if !header.valid {
                continue;
            }
            if header.file_size().is_none() {
                debug!("Stripe {} has corrupt block counts", self.transports[slot].url());
                continue;
            }
            let id = header.id_stripe as usize;
            if id >= n_total || claimed[id].is_some() {
                debug!("Stripe {} claims unusable id {}", self.transports[slot].url(), id);
                continue;
            }
            claimed[id] = Some(slot);
            valid[slot] = true;
        }

        if !valid.iter().any(|&v| v) {
            debug!("No valid stripe header, starting a new file");
            self.map = StripeMap::identity(n_total);
            self.headers = (0..n_total)
                .map(|i| StripeHeader::new(i as u32, self.geometry.width()))
                .collect();
            self.lost = vec![false; n_total];
            return Ok(HeaderCheck {
                file_size: 0,
                new_file: true,
                relabeled: Vec::new(),
            });
        }

        // Majority vote on the file length, ties go to the lowest slot
        let mut votes: Vec<(usize, usize)> = Vec::new();
        for slot in (0..n_total).filter(|&s| valid[s]) {
            match votes.iter_mut().find(|(s, _)| headers[*s].same_layout(&headers[slot])) {
                Some((_, count)) => *count += 1,
                None => votes.push((slot, 1)),
            }
        }
        let mut winner = votes[0];
        for &vote in &votes[1..] {
            if vote.1 > winner.1 {
                winner = vote;
            }
        }
        let reference = headers[winner.0];

        for slot in 0..n_total {
            if valid[slot] && !headers[slot].same_layout(&reference) {
                warn!(
                    "Stripe {} disagrees on file length",
                    self.transports[slot].url()
                );
                valid[slot] = false;
                claimed[headers[slot].id_stripe as usize] = None;
            }
        }

        if reference.block_size != self.geometry.width() {
            return Err(Error::Config(format!(
                "stripes were written with width {}, configured width is {}",
                reference.block_size,
                self.geometry.width()
            )));
        }

        let invalid = valid.iter().filter(|&&v| !v).count();
        if invalid > self.geometry.n_parity {
            return Err(Error::HeaderUnrecoverable {
                invalid,
                tolerated: self.geometry.n_parity,
            });
        }

        let mut headers = headers;
        let mut lost = vec![false; n_total];
        let mut relabeled = Vec::with_capacity(invalid);
        let mut free_ids = (0..n_total).filter(|&id| claimed[id].is_none()).collect::<Vec<_>>();
        free_ids.reverse();

        for slot in (0..n_total).filter(|&s| !valid[s]) {
            let Some(id) = free_ids.pop() else {
                break;
            };
            claimed[id] = Some(slot);
            headers[slot] = StripeHeader {
                id_stripe: id as u32,
                ..reference
            };
            lost[slot] = true;
            relabeled.push(slot);
            info!(
                "Stripe {} relabeled as logical stripe {}",
                self.transports[slot].url(),
                id
            );

            if self.store_recovery && self.writable {
                if let Err(e) = self.reset_stripe(slot, &headers[slot]) {
                    warn!("Failed to reset stripe {}: {}", self.transports[slot].url(), e);
                }
            }
        }

        let to_physical = claimed.into_iter().flatten().collect::<Vec<_>>();
        self.map = StripeMap::from_physical(to_physical).ok_or_else(|| {
            Error::Config("stripe headers do not form a permutation".to_string())
        })?;
        let file_size = reference.file_size().ok_or_else(|| {
            Error::Config("stripe headers describe an unrepresentable file size".to_string())
        })?;
        self.headers = headers;
        self.lost = lost;

        Ok(HeaderCheck {
            file_size,
            new_file: false,
            relabeled,
        })
    }

    /// Recreate a relabeled stripe and persist its new header
    fn reset_stripe(&self, slot: usize, header: &StripeHeader) -> Result<()> {
        let transport = &self.transports[slot];
        transport.open(&OpenRequest {
            mode: OpenMode::Recreate,
            ..self.request.clone()
        })?;
        header.write_to(transport.as_ref())
    }

    /// Rewrite every header whose content changed.
    ///
    /// Stripes still flagged lost are written invalid so the next open
    /// relabels them again. All stripes are attempted.
    pub fn write_headers(&mut self, file_size: u64, force: bool) -> Result<()> {
        let mut first_err = None;
        for slot in 0..self.transports.len() {
            let mut header = self.headers[slot];
            header.set_file_size(file_size);
            header.block_size = self.geometry.width();
            header.valid = !self.lost[slot];

            if !force && header == self.headers[slot] {
                continue;
            }
            match header.write_to(self.transports[slot].as_ref()) {
                Ok(()) => self.headers[slot] = header,
                Err(e) => {
                    warn!("Failed to write header of {}: {}", self.transports[slot].url(), e);
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Block I/O
    // =========================================================================

    /// Issue an asynchronous read on a logical stripe. `local_offset`
    /// excludes the header. Lost stripes fail immediately.
    pub fn read_async(&self, logical: usize, local_offset: u64, len: usize, chunk: Chunk) {
        let handler = Arc::clone(&self.readers[logical]);
        handler.increment();

        let transport = self.transport(logical);
        if self.is_lost(logical) {
            handler.handle_response(
                chunk,
                Err(Error::StripeLost {
                    url: transport.url().to_string(),
                }),
            );
            return;
        }
        transport.read_async(self.geometry.header_size + local_offset, len, chunk, handler);
    }

    /// Issue an asynchronous write on a logical stripe
    pub fn write_async(&self, logical: usize, local_offset: u64, data: Bytes, chunk: Chunk) {
        let handler = Arc::clone(&self.writers[logical]);
        handler.increment();
        self.transport(logical)
            .write_async(self.geometry.header_size + local_offset, data, chunk, handler);
    }

    /// Synchronous write on a logical stripe, used to heal recovered blocks
    pub fn write_sync(&self, logical: usize, local_offset: u64, data: &[u8]) -> Result<()> {
        self.transport(logical)
            .write(self.geometry.header_size + local_offset, data)
    }

    /// Drain every read barrier and collect the outcomes, logical order
    pub fn collect_reads(&self) -> Vec<ChunkOutcome> {
        self.readers
            .iter()
            .map(|handler| {
                handler.wait_ok();
                let outcome = handler.take_outcome();
                handler.reset();
                outcome
            })
            .collect()
    }

    /// Drain every write barrier; any failed stripe fails the whole batch
    pub fn wait_writes(&self) -> Result<()> {
        let mut failed = Vec::new();
        for (logical, handler) in self.writers.iter().enumerate() {
            if !handler.wait_ok() {
                failed.push(logical);
            }
            handler.reset();
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::WriteFailed { stripes: failed })
        }
    }

    // =========================================================================
    // Whole-set Operations
    // =========================================================================

    fn for_each_stripe<F>(&self, op: &str, f: F) -> Result<()>
    where
        F: Fn(&SharedTransport) -> Result<()>,
    {
        let mut first_err = None;
        for transport in &self.transports {
            if let Err(e) = f(transport) {
                warn!("{} failed on {}: {}", op, transport.url(), e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Truncate every stripe to `local_size` bytes past the header
    pub fn truncate_all(&self, local_size: u64) -> Result<()> {
        let size = self.geometry.header_size + local_size;
        self.for_each_stripe("truncate", |t| t.truncate(size))
    }

    pub fn sync_all(&self) -> Result<()> {
        self.for_each_stripe("sync", |t| t.sync())
    }

    pub fn close_all(&self) -> Result<()> {
        self.for_each_stripe("close", |t| t.close())
    }

    pub fn remove_all(&self) -> Result<()> {
        self.for_each_stripe("remove", |t| t.remove())
    }
}

// =============================================================================
// Tests
// =============================================================================
