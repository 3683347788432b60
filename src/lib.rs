//! stripeio - Client-Side RAID Striping
//!
//! Presents a set of independent stripe files as one logical file with
//! redundancy computed on the client. Two layouts are supported: row
//! diagonal double parity and Reed-Solomon erasure coding.
//!
//! # Architecture
//!
//! ```text
//!   caller ──read/write──▶ RaidFile ──▶ RedundancyCodec (parity, rebuild)
//!                              │
//!                              ▼
//!                          StripeSet ──▶ StripeTransport × N
//!                    (headers, mapping)   (memory, local file, async pool)
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Stripe transports
//! - [`config`] - File configuration (YAML/JSON)
//! - [`domain`] - Transport port
//! - [`error`] - Error types
//! - [`raid`] - Engine, codecs, headers and completion tracking
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stripeio::{adapters::MemStripe, AccessMode, RaidConfig, RaidFile, SharedTransport};
//!
//! let urls: Vec<String> = (0..6).map(|i| format!("mem://{}", i)).collect();
//! let transports = urls
//!     .iter()
//!     .map(|u| Arc::new(MemStripe::new(u.clone())) as SharedTransport)
//!     .collect();
//!
//! let mut file = RaidFile::new(RaidConfig::raid_dp(urls), transports)?;
//! file.open(AccessMode::WriteOnly)?;
//! file.write(0, b"hello")?;
//! file.close()?;
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod raid;

pub use config::{LayoutKind, RaidConfig};
pub use domain::{OpenMode, OpenRequest, SharedTransport, StripeTransport};
pub use error::{Error, Result};
pub use raid::{AccessMode, FileStat, RaidFile, RaidStatsSnapshot, RebuildReport};
