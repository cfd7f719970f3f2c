use crate::header::{Endianness, NO_CLUSTER};

/// Size of one on-disk descriptor record
pub const DESCRIPTOR_SIZE: usize = 32;

/// Per-stream flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamTraits(pub u32);

impl StreamTraits {
    pub const NONE: StreamTraits = StreamTraits(0);
    /// Tombstoned: clusters released, slot kept so later indices stay valid
    pub const REAPED: StreamTraits = StreamTraits(0x0000_0001);

    pub fn contains(&self, other: StreamTraits) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_reaped(&self) -> bool {
        self.contains(StreamTraits::REAPED)
    }

    pub fn with(self, other: StreamTraits) -> StreamTraits {
        StreamTraits(self.0 | other.0)
    }
}

/// Location and size of one stream
///
/// # Layout
///
/// ```text
/// [0..8)   size in bytes
/// [8..16)  first cluster (-1 when empty)
/// [16..24) last cluster (-1 when empty)
/// [24..28) traits
/// [28..32) reserved, zero
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub size: u64,
    pub start_cluster: i64,
    pub end_cluster: i64,
    pub traits: StreamTraits,
}

impl StreamDescriptor {
    pub fn empty() -> Self {
        StreamDescriptor {
            size: 0,
            start_cluster: NO_CLUSTER,
            end_cluster: NO_CLUSTER,
            traits: StreamTraits::NONE,
        }
    }

    pub fn is_reaped(&self) -> bool {
        self.traits.is_reaped()
    }

    pub fn encode(&self, endianness: Endianness) -> [u8; DESCRIPTOR_SIZE] {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        endianness.write_u64(&mut bytes[0..], self.size);
        endianness.write_i64(&mut bytes[8..], self.start_cluster);
        endianness.write_i64(&mut bytes[16..], self.end_cluster);
        endianness.write_u32(&mut bytes[24..], self.traits.0);
        bytes
    }

    pub fn decode(bytes: &[u8], endianness: Endianness) -> Self {
        StreamDescriptor {
            size: endianness.read_u64(&bytes[0..]),
            start_cluster: endianness.read_i64(&bytes[8..]),
            end_cluster: endianness.read_i64(&bytes[16..]),
            traits: StreamTraits(endianness.read_u32(&bytes[24..])),
        }
    }
}

impl Default for StreamDescriptor {
    fn default() -> Self {
        Self::empty()
    }
}
