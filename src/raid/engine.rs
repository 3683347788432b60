//! RAID File Engine
//!
//! [`RaidFile`] presents N stripes as one logical file. Data is cut into
//! `stripe_width` blocks distributed round-robin over the data stripes;
//! the codec keeps the redundancy stripes up to date and rebuilds blocks
//! that cannot be read.
//!
//! # Lifecycle
//!
//! ```text
//!            open                       close
//!  Closed ─────────▶ Open ◀──┐  ─────────────────▶ Closed
//!                     │      │ read / write / truncate / rebuild
//!                     └──────┘
//! ```
//!
//! At close the pending parity group is flushed, headers are rewritten if
//! the file changed, and stripes are cut to the logical size after a
//! write that grew the file or after a recovery.
//!
//! One `RaidFile` serves one caller at a time. Concurrency exists only
//! inside a call, across the stripes of the group in flight.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{LayoutKind, RaidConfig, MIN_STRIPE_WIDTH};
use crate::domain::{OpenMode, OpenRequest, SharedTransport};
use crate::error::{Error, Result};
use crate::raid::codec::RedundancyCodec;
use crate::raid::completion::Chunk;
use crate::raid::double_parity::DoubleParityCodec;
use crate::raid::erasure::ErasureCodec;
use crate::raid::pieces::PieceMap;
use crate::raid::stats::{RaidStats, RaidStatsSnapshot};
use crate::raid::stripe_set::{Geometry, StripeMap, StripeSet};

// =============================================================================
// Access Mode
// =============================================================================

/// How a striped file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read existing content
    ReadOnly,
    /// Start from an empty file, discarding previous stripes
    WriteOnly,
    /// Read and modify existing content, creating it if absent
    ReadWrite,
}

impl AccessMode {
    fn open_mode(self) -> OpenMode {
        match self {
            AccessMode::ReadOnly => OpenMode::Read,
            AccessMode::WriteOnly => OpenMode::Recreate,
            AccessMode::ReadWrite => OpenMode::Update,
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Result of [`RaidFile::stat`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub size: u64,
    pub layout: String,
    pub stripe_width: usize,
    pub data_stripes: usize,
    pub parity_stripes: usize,
    /// URLs of stripes whose content awaits rebuild
    pub lost_stripes: Vec<String>,
}

/// Result of [`RaidFile::rebuild`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub groups: u64,
    pub blocks_rebuilt: u64,
    /// Lost stripes were rewritten and are trusted again
    pub healed: bool,
}

// =============================================================================
// File State
// =============================================================================

#[derive(Debug, Default)]
struct FileState {
    open: bool,
    writable: bool,
    file_size: u64,
    /// The file grew and stripes must be cut to size at close
    do_truncate: bool,
    /// Headers must be rewritten at close
    update_header: bool,
    /// A group was rebuilt since open
    done_recovery: bool,
    /// Parity follows the data as it is appended. Cleared for the rest of
    /// the session by the first write that does not continue the file.
    streaming: bool,
    /// Where the next appending write starts
    next_write_offset: u64,
}

// =============================================================================
// RAID File
// =============================================================================

/// A logical file striped over redundant stripes
#[derive(Debug)]
pub struct RaidFile {
    config: RaidConfig,
    session: Uuid,
    set: StripeSet,
    codec: Box<dyn RedundancyCodec>,
    state: FileState,
    /// Ranges written but not yet covered by parity
    pieces: PieceMap,
    stats: Arc<RaidStats>,
}

impl RaidFile {
    /// Build a file over `transports`, one per configured URL in the same
    /// order.
    ///
    /// Configuration problems are reported here, before any stripe is
    /// touched.
    pub fn new(config: RaidConfig, transports: Vec<SharedTransport>) -> Result<Self> {
        config.validate()?;

        if config.total_stripes() < 2 {
            return Err(Error::Config(format!(
                "at least 2 stripes required, got {}",
                config.total_stripes()
            )));
        }
        if config.stripe_width < MIN_STRIPE_WIDTH {
            return Err(Error::Config(format!(
                "stripe width {} below minimum {}",
                config.stripe_width, MIN_STRIPE_WIDTH
            )));
        }
        if transports.len() != config.total_stripes() {
            return Err(Error::Config(format!(
                "{} stripe URLs configured but {} transports given",
                config.total_stripes(),
                transports.len()
            )));
        }

        let n_data = config.data_stripes();
        let n_parity = config.parity_stripes;
        let codec: Box<dyn RedundancyCodec> = match config.layout {
            LayoutKind::RaidDp => Box::new(DoubleParityCodec::new(n_data, config.stripe_width)),
            LayoutKind::ReedS => Box::new(ErasureCodec::new(n_data, n_parity, config.stripe_width)?),
        };

        let request = OpenRequest::new(OpenMode::Read)
            .with_target_size(config.target_size)
            .with_opaque(config.booking_opaque.clone());
        let set = StripeSet::new(
            Geometry::new(n_data, n_parity, config.stripe_width),
            transports,
            request,
            config.store_recovery,
        );

        Ok(Self {
            config,
            session: Uuid::new_v4(),
            set,
            codec,
            state: FileState::default(),
            pieces: PieceMap::new(),
            stats: Arc::new(RaidStats::new()),
        })
    }

    pub fn config(&self) -> &RaidConfig {
        &self.config
    }

    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn is_open(&self) -> bool {
        self.state.open
    }

    /// Whether a group was rebuilt since open
    pub fn done_recovery(&self) -> bool {
        self.state.done_recovery
    }

    /// Current logical to physical stripe assignment
    pub fn mapping(&self) -> &StripeMap {
        self.set.map()
    }

    pub fn stats(&self) -> RaidStatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared handle on the live counters
    pub fn stats_handle(&self) -> Arc<RaidStats> {
        Arc::clone(&self.stats)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.open {
            Ok(())
        } else {
            Err(Error::NotOpen)
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.state.writable {
            Ok(())
        } else {
            Err(Error::ReadOnly)
        }
    }

    // =========================================================================
    // Open
    // =========================================================================

    /// Open every stripe and reconcile their headers
    #[instrument(skip(self), fields(session = %self.session, layout = %self.config.layout))]
    pub fn open(&mut self, mode: AccessMode) -> Result<()> {
        if self.state.open {
            return Err(Error::AlreadyOpen);
        }

        let headers = self.set.open_all(mode.open_mode());
        let check = match self.set.validate_headers(headers) {
            Ok(check) => check,
            Err(e) => {
                error!("Header validation failed: {}", e);
                if let Err(close_err) = self.set.close_all() {
                    warn!("Failed to release stripes after header check: {}", close_err);
                }
                return Err(e);
            }
        };

        let writable = mode != AccessMode::ReadOnly;
        self.state = FileState {
            open: true,
            writable,
            file_size: check.file_size,
            do_truncate: false,
            update_header: writable && (check.new_file || !check.relabeled.is_empty()),
            done_recovery: false,
            streaming: writable && self.config.streaming,
            next_write_offset: check.file_size,
        };
        self.codec.buffer_mut().zero_all();
        self.codec.buffer_mut().set_pending(None);
        self.pieces.clear();

        if !check.relabeled.is_empty() {
            warn!(
                "{} stripe(s) flagged lost and relabeled: {:?}",
                check.relabeled.len(),
                check.relabeled
            );
        }
        info!(
            "Opened striped file: size={} new={} stripes={}",
            check.file_size,
            check.new_file,
            self.set.len()
        );
        Ok(())
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Read into `buf` starting at `offset`. Returns the bytes read, which
    /// is less than `buf.len()` only at end of file.
    #[instrument(skip(self, buf), fields(session = %self.session, len = buf.len()))]
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        let file_size = self.state.file_size;
        if offset > file_size {
            return Err(Error::OffsetBeyondEof {
                offset,
                size: file_size,
            });
        }

        let len = buf.len().min((file_size - offset) as usize);
        if len == 0 {
            return Ok(0);
        }
        let buf = &mut buf[..len];

        let geometry = *self.set.geometry();
        let width = geometry.width();
        let group_size = self.codec.group_size();
        let end = offset + len as u64;
        let mut pos = offset;

        while pos < end {
            let n = (end - pos).min(width - pos % width) as usize;
            self.set.read_async(
                geometry.data_stripe(pos),
                geometry.local_offset(pos),
                n,
                Chunk::new(pos, n),
            );
            pos += n as u64;

            if pos == end || pos % group_size == 0 {
                self.complete_reads(buf, offset)?;
            }
        }

        self.stats.record_read(len);
        Ok(len)
    }

    /// Drain the in-flight reads into `buf` and rebuild what failed
    fn complete_reads(&mut self, buf: &mut [u8], buf_offset: u64) -> Result<()> {
        let mut failed = PieceMap::new();

        for outcome in self.set.collect_reads() {
            for (chunk, data) in outcome.chunks {
                let dst = (chunk.offset - buf_offset) as usize;
                let n = data.len().min(chunk.len);
                buf[dst..dst + n].copy_from_slice(&data[..n]);
                buf[dst + n..dst + chunk.len].fill(0);
            }
            for (offset, len) in outcome.errors {
                failed.add(offset, len as u64);
            }
        }

        if failed.is_empty() {
            return Ok(());
        }

        let group_size = self.codec.group_size();
        for (group, pieces) in failed.by_group(group_size) {
            match self
                .codec
                .recover_pieces(&self.set, group, &pieces, buf, buf_offset)
            {
                Ok(recovery) => {
                    self.stats.record_recovery(recovery.rebuilt);
                    self.state.done_recovery = true;
                }
                Err(e) => {
                    self.stats.record_recovery_failure();
                    error!("Read recovery failed for group at {}: {}", group, e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Write
    // =========================================================================

    /// Write `data` at `offset`. Any stripe failure fails the whole call.
    ///
    /// In streaming mode parity is computed from the buffered data as long
    /// as writes append to the file. Any other write moves the session to
    /// parity recomputed from the stripes.
    #[instrument(skip(self, data), fields(session = %self.session, len = data.len()))]
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        self.ensure_writable()?;
        if data.is_empty() {
            return Ok(0);
        }
        if self.state.streaming && !self.continues_stream(offset) {
            self.leave_streaming(offset)?;
        }

        let issued = self.write_chunks(offset, data);
        let drained = self.set.wait_writes();
        issued?;
        drained?;

        let end = offset + data.len() as u64;
        if end > self.state.file_size {
            self.state.file_size = end;
            self.state.do_truncate = true;
            self.state.update_header = true;
        }
        self.state.next_write_offset = end;

        if !self.state.streaming {
            self.sparse_parity(false)?;
        }

        self.stats.record_write(data.len());
        Ok(data.len())
    }

    fn write_chunks(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let geometry = *self.set.geometry();
        let width = geometry.width();
        let mut pos = offset;
        let mut rest = data;

        while !rest.is_empty() {
            let n = rest.len().min((width - pos % width) as usize);
            let (chunk, tail) = rest.split_at(n);
            self.set.write_async(
                geometry.data_stripe(pos),
                geometry.local_offset(pos),
                Bytes::copy_from_slice(chunk),
                Chunk::new(pos, n),
            );

            if self.state.streaming {
                let flushed = self.codec.add_data_block(&self.set, pos, chunk)?;
                self.stats.record_parity(flushed);
                if flushed > 0 {
                    // Flushed groups are covered
                    self.pieces.clear();
                }
            }
            if !self.state.streaming || self.codec.buffer().pending().is_some() {
                self.pieces.add(pos, n as u64);
            }

            pos += n as u64;
            rest = tail;
        }
        Ok(())
    }

    /// Whether a write at `offset` appends to the buffered group or opens a
    /// new one. A write starting inside a group that is not buffered would
    /// leave the earlier bytes of that group out of its parity.
    fn continues_stream(&self, offset: u64) -> bool {
        if offset != self.state.next_write_offset {
            return false;
        }
        let group_size = self.codec.group_size();
        let group = (offset / group_size) * group_size;
        offset == group || self.codec.buffer().pending() == Some(group)
    }

    /// Finish the buffered group and compute parity from written pieces
    /// until close
    fn leave_streaming(&mut self, offset: u64) -> Result<()> {
        debug!(
            "Write at {} does not append at {}, leaving streaming mode",
            offset, self.state.next_write_offset
        );
        if self.codec.flush_pending(&self.set, self.state.file_size)? {
            self.stats.record_parity(1);
        }
        self.pieces.clear();
        self.state.streaming = false;
        Ok(())
    }

    /// Recompute parity of groups covered by written pieces; every touched
    /// group when `force` is set
    fn sparse_parity(&mut self, force: bool) -> Result<()> {
        let group_size = self.codec.group_size();
        let groups = if force {
            self.pieces.take_all_groups(group_size)
        } else {
            self.pieces.take_full_groups(group_size)
        };

        for group in groups {
            self.codec.recompute_group_parity(&self.set, group)?;
            self.stats.record_parity(1);
        }
        Ok(())
    }

    /// Write parity that is still owed for buffered or tracked data
    fn flush_parity(&mut self) -> Result<()> {
        if self.state.streaming {
            if self.codec.flush_pending(&self.set, self.state.file_size)? {
                self.stats.record_parity(1);
            }
            self.pieces.clear();
            Ok(())
        } else {
            self.sparse_parity(true)
        }
    }

    // =========================================================================
    // Truncate
    // =========================================================================

    /// Set the logical size to `size`.
    ///
    /// Shrinking zeroes the cut-off tail of the last remaining group so it
    /// cannot resurface, then recomputes that group's parity.
    #[instrument(skip(self), fields(session = %self.session))]
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        self.ensure_writable()?;
        self.flush_parity()?;

        let old_size = self.state.file_size;
        if size < old_size {
            let group_size = self.codec.group_size();
            let group = (size / group_size) * group_size;

            self.codec.truncate(&self.set, size)?;
            if size % group_size != 0 {
                self.zero_range(size, old_size.min(group + group_size))?;
                self.codec.recompute_group_parity(&self.set, group)?;
                self.stats.record_parity(1);
            }
        } else if size > old_size {
            self.codec.truncate(&self.set, size)?;
        }

        debug!("Truncated from {} to {}", old_size, size);
        self.state.file_size = size;
        self.state.next_write_offset = size;
        self.state.update_header = true;
        Ok(())
    }

    /// Overwrite `[start, end)` of the data stripes with zeros
    fn zero_range(&mut self, start: u64, end: u64) -> Result<()> {
        let geometry = *self.set.geometry();
        let width = geometry.width();
        let zeros = Bytes::from(vec![0u8; geometry.stripe_width]);
        let mut pos = start;

        while pos < end {
            let n = (end - pos).min(width - pos % width) as usize;
            self.set.write_async(
                geometry.data_stripe(pos),
                geometry.local_offset(pos),
                zeros.slice(..n),
                Chunk::new(pos, n),
            );
            pos += n as u64;
        }
        self.set.wait_writes()
    }

    // =========================================================================
    // Rebuild
    // =========================================================================

    /// Run reconstruction over every group of the file.
    ///
    /// With recovery storing enabled this rewrites every block that could
    /// not be read, and lost stripes are trusted again once all groups
    /// succeeded.
    #[instrument(skip(self), fields(session = %self.session))]
    pub fn rebuild(&mut self) -> Result<RebuildReport> {
        self.ensure_writable()?;
        self.flush_parity()?;

        let group_size = self.codec.group_size();
        let groups = self.state.file_size.div_ceil(group_size).max(1);
        let no_pieces = PieceMap::new();
        let mut blocks_rebuilt = 0u64;
        let mut all_stored = true;

        for g in 0..groups {
            let group = g * group_size;
            match self
                .codec
                .recover_pieces(&self.set, group, &no_pieces, &mut [], 0)
            {
                Ok(recovery) => {
                    self.stats.record_recovery(recovery.rebuilt);
                    blocks_rebuilt += recovery.rebuilt as u64;
                    all_stored &= recovery.rebuilt == 0 || recovery.stored;
                }
                Err(e) => {
                    self.stats.record_recovery_failure();
                    error!("Rebuild failed for group at {}: {}", group, e);
                    return Err(e);
                }
            }
        }
        self.state.done_recovery = true;

        let healed = self.set.any_lost() && self.set.store_recovery() && all_stored;
        if healed {
            self.set.heal_all();
            self.state.update_header = true;
        }

        info!(
            "Rebuild finished: groups={} blocks={} healed={}",
            groups, blocks_rebuilt, healed
        );
        Ok(RebuildReport {
            groups,
            blocks_rebuilt,
            healed,
        })
    }

    // =========================================================================
    // Metadata & Close
    // =========================================================================

    /// Flush every stripe to stable storage
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.set.sync_all()
    }

    /// Logical file size
    pub fn size(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.state.file_size)
    }

    pub fn stat(&self) -> Result<FileStat> {
        self.ensure_open()?;
        let map = self.set.map();
        let lost_stripes = map
            .pairs()
            .filter(|&(logical, _)| self.set.is_lost(logical))
            .map(|(logical, _)| self.set.transport(logical).url().to_string())
            .collect();

        Ok(FileStat {
            size: self.state.file_size,
            layout: self.config.layout.to_string(),
            stripe_width: self.config.stripe_width,
            data_stripes: self.config.data_stripes(),
            parity_stripes: self.config.parity_stripes,
            lost_stripes,
        })
    }

    /// Finish pending parity, persist headers and release the stripes.
    ///
    /// Every step is attempted; the first failure is returned.
    #[instrument(skip(self), fields(session = %self.session))]
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut first_err: Option<Error> = None;

        if self.state.writable {
            if let Err(e) = self.flush_parity() {
                error!("Failed to flush parity at close: {}", e);
                first_err.get_or_insert(e);
            }

            if let Err(e) = self
                .set
                .write_headers(self.state.file_size, self.state.update_header)
            {
                first_err.get_or_insert(e);
            }

            if self.state.do_truncate || self.state.done_recovery {
                debug!("Cutting stripes to {} bytes", self.state.file_size);
                if let Err(e) = self.codec.truncate(&self.set, self.state.file_size) {
                    first_err.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.set.close_all() {
            first_err.get_or_insert(e);
        }

        let stats = self.stats.snapshot();
        info!(
            "Closed striped file: size={} read={} written={} recovered={}",
            self.state.file_size, stats.bytes_read, stats.bytes_written, stats.blocks_recovered
        );
        self.state = FileState::default();
        self.pieces.clear();

        first_err.map_or(Ok(()), Err)
    }

    /// Delete every stripe. An open file is closed first without flushing.
    #[instrument(skip(self), fields(session = %self.session))]
    pub fn remove(&mut self) -> Result<()> {
        if self.state.open {
            if let Err(e) = self.set.close_all() {
                warn!("Closing before remove failed, removing anyway: {}", e);
            }
            self.state = FileState::default();
            self.pieces.clear();
        }
        self.set.remove_all()
    }
}

// =============================================================================
// Tests
// =============================================================================
