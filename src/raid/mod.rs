//! Striped RAID I/O
//!
//! A logical file is cut into `stripe_width` blocks spread over the data
//! stripes. Redundancy stripes hold either row and diagonal parity
//! (double parity) or Reed-Solomon parity.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            RaidFile                              │
//! │   open / read / write / truncate / rebuild / close / remove      │
//! ├──────────────────────────────┬───────────────────────────────────┤
//! │  RedundancyCodec             │  StripeSet                        │
//! │  ┌─────────────────────┐     │  headers, logical ↔ physical map, │
//! │  │ DoubleParityCodec   │     │  lost flags, completion barriers  │
//! │  │ ErasureCodec ─ Fec  │     │                                   │
//! │  └─────────────────────┘     │                                   │
//! ├──────────────────────────────┴───────────────────────────────────┤
//! │                   StripeTransport (one per URL)                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every stripe starts with a [`header::HEADER_SIZE`] byte header naming
//! its logical id, so stripes can be reordered or replaced and still be
//! recognised at the next open.

pub mod codec;
pub mod completion;
pub mod double_parity;
pub mod engine;
pub mod erasure;
pub mod fec;
pub mod header;
pub mod layout;
pub mod pieces;
pub mod stats;
pub mod stripe_set;

mod proptest;

pub use codec::{GroupBuffer, GroupRecovery, RedundancyCodec};
pub use completion::{Chunk, CompletionBarrier, ReadHandler, WriteHandler};
pub use double_parity::DoubleParityCodec;
pub use engine::{AccessMode, FileStat, RaidFile, RebuildReport};
pub use erasure::{backtracking, ErasureCodec};
pub use header::{StripeHeader, HEADER_SIZE};
pub use layout::DiagonalLayout;
pub use stats::{RaidStats, RaidStatsSnapshot};
pub use stripe_set::{Geometry, StripeMap};
