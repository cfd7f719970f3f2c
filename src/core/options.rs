//! Container configuration
//!
//! Options can be built in code or loaded from TOML; every field is optional in the file:
//!
//! ```toml
//! cluster_size = 64
//! reserved_streams = 2
//! endianness = "big"
//! page_size = 8192
//! hash_algorithm = "sha512_256"
//! ```

use crate::error::{PlexusError, Result};
use crate::header::Endianness;
use crate::merkle::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default data bytes per cluster
pub const DEFAULT_CLUSTER_SIZE: u32 = 256;

/// Default bytes per page of the backing buffer
pub const DEFAULT_PAGE_SIZE: usize = 4096;

pub const DEFAULT_MAX_OPEN_PAGES: usize = 32;

pub const DEFAULT_CHAIN_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Data bytes per cluster
    pub cluster_size: u32,

    /// Streams `[0, reserved_streams)` are addressed by fixed index
    pub reserved_streams: u32,

    pub endianness: Endianness,

    /// Bytes per page of the backing buffer
    pub page_size: usize,

    /// Maximum resident pages of the backing buffer
    pub max_open_pages: usize,

    pub hash_algorithm: HashAlgorithm,

    /// Streams whose cluster chains are cached
    pub chain_cache_capacity: usize,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        ContainerOptions {
            cluster_size: DEFAULT_CLUSTER_SIZE,
            reserved_streams: 0,
            endianness: Endianness::Little,
            page_size: DEFAULT_PAGE_SIZE,
            max_open_pages: DEFAULT_MAX_OPEN_PAGES,
            hash_algorithm: HashAlgorithm::Sha256,
            chain_cache_capacity: DEFAULT_CHAIN_CACHE_CAPACITY,
        }
    }
}

impl ContainerOptions {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: ContainerOptions = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_size == 0 {
            return Err(PlexusError::InvalidClusterSize(self.cluster_size));
        }
        if self.page_size == 0 {
            return Err(PlexusError::InvalidConfig(
                "page_size must be non-zero".to_string(),
            ));
        }
        if self.max_open_pages == 0 {
            return Err(PlexusError::InvalidConfig(
                "max_open_pages must be non-zero".to_string(),
            ));
        }
        if self.chain_cache_capacity == 0 {
            return Err(PlexusError::InvalidConfig(
                "chain_cache_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
