//! Cluster framing
//!
//! Every cluster is a fixed 17-byte header followed by `cluster_size` data bytes:
//!
//! ```text
//! [0]      traits
//! [1..9)   previous cluster in the chain (-1 for none)
//! [9..17)  next cluster in the chain (-1 for none)
//! ```

use crate::header::{Endianness, HEADER_SIZE, NO_CLUSTER};

pub const CLUSTER_HEADER_SIZE: usize = 17;

/// Cluster role flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterTraits(pub u8);

impl ClusterTraits {
    pub const NONE: ClusterTraits = ClusterTraits(0);
    /// Holds stream data
    pub const USED: ClusterTraits = ClusterTraits(0x01);
    /// On the free list
    pub const FREE: ClusterTraits = ClusterTraits(0x02);
    /// Holds descriptor-table records
    pub const RECORDS: ClusterTraits = ClusterTraits(0x04);

    pub fn contains(&self, other: ClusterTraits) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterHeader {
    pub traits: ClusterTraits,
    pub prev: i64,
    pub next: i64,
}

impl ClusterHeader {
    pub fn new(traits: ClusterTraits, prev: i64) -> Self {
        ClusterHeader {
            traits,
            prev,
            next: NO_CLUSTER,
        }
    }

    pub fn encode(&self, endianness: Endianness) -> [u8; CLUSTER_HEADER_SIZE] {
        let mut bytes = [0u8; CLUSTER_HEADER_SIZE];
        bytes[0] = self.traits.0;
        endianness.write_i64(&mut bytes[1..], self.prev);
        endianness.write_i64(&mut bytes[9..], self.next);
        bytes
    }

    pub fn decode(bytes: &[u8], endianness: Endianness) -> Self {
        ClusterHeader {
            traits: ClusterTraits(bytes[0]),
            prev: endianness.read_i64(&bytes[1..]),
            next: endianness.read_i64(&bytes[9..]),
        }
    }
}

/// Byte arithmetic for one cluster size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterLayout {
    pub cluster_size: usize,
}

impl ClusterLayout {
    pub fn new(cluster_size: usize) -> Self {
        ClusterLayout { cluster_size }
    }

    /// Header plus data
    pub fn stride(&self) -> usize {
        CLUSTER_HEADER_SIZE + self.cluster_size
    }

    /// Buffer offset of a cluster's header
    pub fn cluster_offset(&self, cluster: i64) -> usize {
        HEADER_SIZE + cluster as usize * self.stride()
    }

    /// Buffer offset of a cluster's first data byte
    pub fn data_offset(&self, cluster: i64) -> usize {
        self.cluster_offset(cluster) + CLUSTER_HEADER_SIZE
    }

    /// Clusters needed to hold `len` bytes
    pub fn clusters_for(&self, len: u64) -> usize {
        ((len + self.cluster_size as u64 - 1) / self.cluster_size as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_header_encoding() {
        let header = ClusterHeader {
            traits: ClusterTraits::USED,
            prev: 3,
            next: NO_CLUSTER,
        };
        for endianness in [Endianness::Little, Endianness::Big] {
            let bytes = header.encode(endianness);
            assert_eq!(bytes[0], 0x01);
            assert_eq!(ClusterHeader::decode(&bytes, endianness), header);
        }
    }

    #[test]
    fn test_layout_offsets() {
        let layout = ClusterLayout::new(32);
        assert_eq!(layout.stride(), 49);
        assert_eq!(layout.cluster_offset(0), HEADER_SIZE);
        assert_eq!(layout.data_offset(2), HEADER_SIZE + 2 * 49 + 17);
        assert_eq!(layout.clusters_for(0), 0);
        assert_eq!(layout.clusters_for(32), 1);
        assert_eq!(layout.clusters_for(33), 2);
    }
}
