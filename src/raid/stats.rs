//! Per-file I/O statistics
//!
//! Counters live on the open file, not in process-wide state, so several
//! transfers can run side by side and be accounted separately.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters of one striped file
#[derive(Debug, Default)]
pub struct RaidStats {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    blocks_recovered: AtomicU64,
    recovery_passes: AtomicU64,
    recovery_failures: AtomicU64,
    parity_groups: AtomicU64,
}

/// Point-in-time copy of [`RaidStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaidStatsSnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Blocks rebuilt from redundancy
    pub blocks_recovered: u64,
    /// Groups that went through reconstruction
    pub recovery_passes: u64,
    pub recovery_failures: u64,
    /// Groups whose parity was computed and written
    pub parity_groups: u64,
}

impl RaidStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_recovery(&self, blocks: usize) {
        self.recovery_passes.fetch_add(1, Ordering::Relaxed);
        self.blocks_recovered.fetch_add(blocks as u64, Ordering::Relaxed);
    }

    pub fn record_recovery_failure(&self) {
        self.recovery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parity(&self, groups: usize) {
        self.parity_groups.fetch_add(groups as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RaidStatsSnapshot {
        RaidStatsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            blocks_recovered: self.blocks_recovered.load(Ordering::Relaxed),
            recovery_passes: self.recovery_passes.load(Ordering::Relaxed),
            recovery_failures: self.recovery_failures.load(Ordering::Relaxed),
            parity_groups: self.parity_groups.load(Ordering::Relaxed),
        }
    }
}
