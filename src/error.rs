//! Error types for the striped RAID I/O layer

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating on a striped file
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON configuration parse error
    #[error("Failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Operation requires an open file
    #[error("File is not open")]
    NotOpen,

    /// Open called twice
    #[error("File is already open")]
    AlreadyOpen,

    /// Mutation attempted on a file opened read-only
    #[error("File is opened read-only")]
    ReadOnly,

    /// Read offset past the end of the file
    #[error("Offset {offset} is beyond end of file (size {size})")]
    OffsetBeyondEof { offset: u64, size: u64 },

    // =========================================================================
    // Stripe Errors
    // =========================================================================
    /// Remote stripe operation failed
    #[error("Stripe {url}: {reason}")]
    Transport { url: String, reason: String },

    /// Stripe is flagged lost and its contents cannot be trusted
    #[error("Stripe {url} is lost and awaits rebuild")]
    StripeLost { url: String },

    /// Too many stripe headers are invalid to relabel the layout
    #[error("Cannot recover layout: {invalid} invalid headers, at most {tolerated} tolerated")]
    HeaderUnrecoverable { invalid: usize, tolerated: usize },

    /// A write to one or more stripes failed
    #[error("Write failed on stripes {stripes:?}")]
    WriteFailed { stripes: Vec<usize> },

    // =========================================================================
    // Redundancy Errors
    // =========================================================================
    /// Group cannot be reconstructed from the surviving blocks
    #[error("Group at offset {group_offset} is unrecoverable: {reason}")]
    Unrecoverable { group_offset: u64, reason: String },

    /// Forward error correction primitive failed
    #[error("FEC error: {0}")]
    Fec(String),
}

impl Error {
    /// Build a transport error for the stripe at `url`
    pub fn transport(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<reed_solomon_erasure::Error> for Error {
    fn from(e: reed_solomon_erasure::Error) -> Self {
        Error::Fec(format!("Reed-Solomon: {}", e))
    }
}
