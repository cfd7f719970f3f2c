use crate::error::{PlexusError, Result};
use serde::{Deserialize, Serialize};

pub const MAGIC: [u8; 8] = *b"PLXS\x00\x01\x00\x00";
pub const FORMAT_VERSION: u8 = 1;

/// Size of the on-disk header, including the extension-property region
pub const HEADER_SIZE: usize = 256;

/// Offset of the extension-property region within the header
pub const EXTENSION_REGION_OFFSET: usize = 128;
pub const EXTENSION_REGION_SIZE: usize = HEADER_SIZE - EXTENSION_REGION_OFFSET;

const CHECKSUM_RANGE: std::ops::Range<usize> = 20..24;

/// Sentinel cluster number meaning "no cluster"
pub const NO_CLUSTER: i64 = -1;

/// Byte order of every multi-byte integer in a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Endianness {
    #[default]
    Little = 0,
    Big = 1,
}

impl Endianness {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Endianness::Little),
            1 => Some(Endianness::Big),
            _ => None,
        }
    }

    pub fn write_u32(self, buf: &mut [u8], value: u32) {
        let bytes = match self {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        buf[..4].copy_from_slice(&bytes);
    }

    pub fn read_u32(self, buf: &[u8]) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[..4]);
        match self {
            Endianness::Little => u32::from_le_bytes(bytes),
            Endianness::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn write_u64(self, buf: &mut [u8], value: u64) {
        let bytes = match self {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        buf[..8].copy_from_slice(&bytes);
    }

    pub fn read_u64(self, buf: &[u8]) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[..8]);
        match self {
            Endianness::Little => u64::from_le_bytes(bytes),
            Endianness::Big => u64::from_be_bytes(bytes),
        }
    }

    pub fn write_i64(self, buf: &mut [u8], value: i64) {
        self.write_u64(buf, value as u64);
    }

    pub fn read_i64(self, buf: &[u8]) -> i64 {
        self.read_u64(buf) as i64
    }
}

/// A fixed-offset, fixed-length slot in the header's extension region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionProperty {
    pub offset: usize,
    pub len: usize,
}

impl ExtensionProperty {
    pub const fn new(offset: usize, len: usize) -> Self {
        ExtensionProperty { offset, len }
    }

    /// The `n`-th 32-byte digest slot; slots past the region fail when used
    pub const fn digest_slot(n: usize) -> Self {
        ExtensionProperty {
            offset: n.saturating_mul(32),
            len: 32,
        }
    }

    fn check(&self) -> Result<()> {
        match self.offset.checked_add(self.len) {
            Some(end) if end <= EXTENSION_REGION_SIZE => Ok(()),
            _ => Err(PlexusError::ExtensionPropertyOutOfRange {
                offset: self.offset,
                len: self.len,
            }),
        }
    }
}

/// Clustered Streams container header
///
/// # Layout
///
/// ```text
/// [0..8)     magic "PLXS\0\1\0\0"
/// [8]        format version
/// [9]        endianness tag (0 little, 1 big)
/// [12..16)   cluster size
/// [16..20)   reserved-stream count
/// [20..24)   CRC-32 of the header with this field zeroed
/// [24..32)   stream count
/// [32..40)   total clusters
/// [40..48)   free-cluster list head
/// [48..56)   descriptor table start cluster
/// [56..64)   descriptor table end cluster
/// [64..72)   descriptor table size in bytes
/// [128..256) extension properties
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u8,
    pub endianness: Endianness,
    pub cluster_size: u32,
    pub reserved_streams: u32,
    pub stream_count: u64,
    pub total_clusters: u64,
    pub free_head: i64,
    pub records_start: i64,
    pub records_end: i64,
    pub records_size: u64,
    extensions: [u8; EXTENSION_REGION_SIZE],
}

impl ContainerHeader {
    pub fn new(cluster_size: u32, reserved_streams: u32, endianness: Endianness) -> Self {
        ContainerHeader {
            version: FORMAT_VERSION,
            endianness,
            cluster_size,
            reserved_streams,
            stream_count: 0,
            total_clusters: 0,
            free_head: NO_CLUSTER,
            records_start: NO_CLUSTER,
            records_end: NO_CLUSTER,
            records_size: 0,
            extensions: [0u8; EXTENSION_REGION_SIZE],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(PlexusError::UnsupportedVersion(self.version));
        }
        if self.cluster_size == 0 {
            return Err(PlexusError::InvalidClusterSize(self.cluster_size));
        }
        if self.stream_count < self.reserved_streams as u64 {
            return Err(PlexusError::CorruptChain(format!(
                "{} streams but {} reserved",
                self.stream_count, self.reserved_streams
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let e = self.endianness;
        let mut bytes = [0u8; HEADER_SIZE];

        bytes[0..8].copy_from_slice(&MAGIC);
        bytes[8] = self.version;
        bytes[9] = self.endianness as u8;
        e.write_u32(&mut bytes[12..], self.cluster_size);
        e.write_u32(&mut bytes[16..], self.reserved_streams);
        e.write_u64(&mut bytes[24..], self.stream_count);
        e.write_u64(&mut bytes[32..], self.total_clusters);
        e.write_i64(&mut bytes[40..], self.free_head);
        e.write_i64(&mut bytes[48..], self.records_start);
        e.write_i64(&mut bytes[56..], self.records_end);
        e.write_u64(&mut bytes[64..], self.records_size);
        bytes[EXTENSION_REGION_OFFSET..].copy_from_slice(&self.extensions);

        let checksum = crc32fast::hash(&bytes);
        e.write_u32(&mut bytes[CHECKSUM_RANGE], checksum);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(PlexusError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for header",
            )));
        }
        if bytes[0..8] != MAGIC {
            return Err(PlexusError::InvalidMagic);
        }

        let e = Endianness::from_u8(bytes[9]).ok_or(PlexusError::HeaderChecksumMismatch)?;

        let mut unsummed = [0u8; HEADER_SIZE];
        unsummed.copy_from_slice(&bytes[..HEADER_SIZE]);
        unsummed[CHECKSUM_RANGE].fill(0);
        if crc32fast::hash(&unsummed) != e.read_u32(&bytes[CHECKSUM_RANGE]) {
            return Err(PlexusError::HeaderChecksumMismatch);
        }

        let mut extensions = [0u8; EXTENSION_REGION_SIZE];
        extensions.copy_from_slice(&bytes[EXTENSION_REGION_OFFSET..HEADER_SIZE]);

        let header = ContainerHeader {
            version: bytes[8],
            endianness: e,
            cluster_size: e.read_u32(&bytes[12..]),
            reserved_streams: e.read_u32(&bytes[16..]),
            stream_count: e.read_u64(&bytes[24..]),
            total_clusters: e.read_u64(&bytes[32..]),
            free_head: e.read_i64(&bytes[40..]),
            records_start: e.read_i64(&bytes[48..]),
            records_end: e.read_i64(&bytes[56..]),
            records_size: e.read_u64(&bytes[64..]),
            extensions,
        };
        header.validate()?;
        Ok(header)
    }

    pub fn extension_property(&self, property: ExtensionProperty) -> Result<&[u8]> {
        property.check()?;
        Ok(&self.extensions[property.offset..property.offset + property.len])
    }

    pub fn set_extension_property(&mut self, property: ExtensionProperty, value: &[u8]) -> Result<()> {
        property.check()?;
        if value.len() != property.len {
            return Err(PlexusError::SerializerSizeMismatch {
                expected: property.len,
                actual: value.len(),
            });
        }
        self.extensions[property.offset..property.offset + property.len].copy_from_slice(value);
        Ok(())
    }
}
