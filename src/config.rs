//! Striped File Configuration
//!
//! Describes one logical file: which stripes hold it, which redundancy
//! scheme protects it, and how reconstructed data is handled. Loaded from
//! YAML or JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Constants
// =============================================================================

/// Default block size striped across files (1 MiB)
pub const DEFAULT_STRIPE_WIDTH: usize = 1024 * 1024;

/// Smallest block size accepted at open
pub const MIN_STRIPE_WIDTH: usize = 64;

/// Largest stripe count supported by the GF(2^8) Reed-Solomon code
pub const MAX_REED_S_STRIPES: usize = 256;

// =============================================================================
// Layout Kind
// =============================================================================

/// Redundancy scheme used for a striped file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayoutKind {
    /// Row XOR plus diagonal XOR, exactly two parity stripes
    RaidDp,
    /// Systematic Reed-Solomon code with any number of parity stripes
    ReedS,
}

impl std::fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutKind::RaidDp => write!(f, "raidDP"),
            LayoutKind::ReedS => write!(f, "reedS"),
        }
    }
}

impl std::str::FromStr for LayoutKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raiddp" | "raid-dp" | "dp" => Ok(LayoutKind::RaidDp),
            "reeds" | "reed-s" | "rs" => Ok(LayoutKind::ReedS),
            other => Err(Error::Config(format!("unknown layout: {}", other))),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Construction parameters for a [`RaidFile`](crate::raid::RaidFile)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaidConfig {
    /// Redundancy scheme
    pub layout: LayoutKind,

    /// URL of every stripe, in physical slot order
    pub stripe_urls: Vec<String>,

    /// Number of stripes holding redundancy
    pub parity_stripes: usize,

    /// Write reconstructed blocks back to the stripe they were lost from
    #[serde(default)]
    pub store_recovery: bool,

    /// Block size in bytes
    #[serde(default = "default_stripe_width")]
    pub stripe_width: usize,

    /// Expected final size, passed through to stripe creation
    #[serde(default)]
    pub target_size: u64,

    /// Opaque booking string, passed through to stripe creation
    #[serde(default)]
    pub booking_opaque: String,

    /// Sequential writes compute parity on the fly; otherwise written
    /// ranges are tracked and parity is recomputed from the stripes
    #[serde(default = "default_streaming")]
    pub streaming: bool,
}

fn default_stripe_width() -> usize {
    DEFAULT_STRIPE_WIDTH
}

fn default_streaming() -> bool {
    true
}

impl RaidConfig {
    /// Create a config with default width, streaming writes and no
    /// recovery write-back
    pub fn new(layout: LayoutKind, stripe_urls: Vec<String>, parity_stripes: usize) -> Self {
        Self {
            layout,
            stripe_urls,
            parity_stripes,
            store_recovery: false,
            stripe_width: DEFAULT_STRIPE_WIDTH,
            target_size: 0,
            booking_opaque: String::new(),
            streaming: true,
        }
    }

    /// Double parity layout over the given stripes
    pub fn raid_dp(stripe_urls: Vec<String>) -> Self {
        Self::new(LayoutKind::RaidDp, stripe_urls, 2)
    }

    /// Reed-Solomon layout over the given stripes
    pub fn reed_s(stripe_urls: Vec<String>, parity_stripes: usize) -> Self {
        Self::new(LayoutKind::ReedS, stripe_urls, parity_stripes)
    }

    /// Set the block size
    pub fn with_stripe_width(mut self, stripe_width: usize) -> Self {
        self.stripe_width = stripe_width;
        self
    }

    /// Enable or disable recovery write-back
    pub fn with_store_recovery(mut self, store_recovery: bool) -> Self {
        self.store_recovery = store_recovery;
        self
    }

    /// Choose streaming or range-tracking parity computation
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Total number of stripes
    pub fn total_stripes(&self) -> usize {
        self.stripe_urls.len()
    }

    /// Number of stripes holding file data
    pub fn data_stripes(&self) -> usize {
        self.stripe_urls.len().saturating_sub(self.parity_stripes)
    }

    /// Parse a YAML document
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as YAML
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }

    /// Check the scheme-specific constraints
    pub fn validate(&self) -> Result<()> {
        if self.parity_stripes == 0 {
            return Err(Error::Config(
                "parity_stripes must be greater than 0".to_string(),
            ));
        }
        if self.data_stripes() == 0 {
            return Err(Error::Config(format!(
                "{} stripes leave no room for data with {} parity stripes",
                self.total_stripes(),
                self.parity_stripes
            )));
        }
        if self.stripe_width == 0 {
            return Err(Error::Config(
                "stripe_width must be greater than 0".to_string(),
            ));
        }

        match self.layout {
            LayoutKind::RaidDp if self.parity_stripes != 2 => Err(Error::Config(format!(
                "raidDP requires exactly 2 parity stripes, got {}",
                self.parity_stripes
            ))),
            LayoutKind::ReedS if self.total_stripes() > MAX_REED_S_STRIPES => {
                Err(Error::Config(format!(
                    "reedS supports at most {} stripes, got {}",
                    MAX_REED_S_STRIPES,
                    self.total_stripes()
                )))
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("mem://stripe-{}", i)).collect()
    }

    #[test]
    fn test_defaults_from_yaml() {
        let yaml = r#"
layout: raidDp
stripeUrls: [a, b, c, d, e, f]
parityStripes: 2
"#;
        let config = RaidConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.layout, LayoutKind::RaidDp);
        assert_eq!(config.data_stripes(), 4);
        assert_eq!(config.stripe_width, DEFAULT_STRIPE_WIDTH);
        assert!(config.streaming);
        assert!(!config.store_recovery);
    }

    #[test]
    fn test_json_config() {
        let json = r#"{
            "layout": "reedS",
            "stripeUrls": ["a", "b", "c", "d", "e"],
            "parityStripes": 3,
            "storeRecovery": true,
            "stripeWidth": 4096,
            "bookingOpaque": "booking=42"
        }"#;
        let config = RaidConfig::from_json_str(json).unwrap();

        assert_eq!(config.layout, LayoutKind::ReedS);
        assert_eq!(config.data_stripes(), 2);
        assert_eq!(config.stripe_width, 4096);
        assert!(config.store_recovery);
        assert_eq!(config.booking_opaque, "booking=42");
    }

    #[test]
    fn test_raid_dp_requires_two_parity() {
        let config = RaidConfig::new(LayoutKind::RaidDp, urls(6), 3);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_no_data_stripes_rejected() {
        assert!(RaidConfig::reed_s(urls(2), 2).validate().is_err());
        assert!(RaidConfig::reed_s(urls(3), 0).validate().is_err());
        assert!(RaidConfig::reed_s(urls(3), 2).validate().is_ok());
    }

    #[test]
    fn test_layout_kind_parse() {
        assert_eq!("raidDP".parse::<LayoutKind>().unwrap(), LayoutKind::RaidDp);
        assert_eq!("reeds".parse::<LayoutKind>().unwrap(), LayoutKind::ReedS);
        assert!("raid5".parse::<LayoutKind>().is_err());
        assert_eq!(LayoutKind::RaidDp.to_string(), "raidDP");
    }
}
