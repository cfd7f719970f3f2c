use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlexusError {
    #[error("Index out of range: {index} (count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Range out of bounds: index {index}, count {count}, length {len}")]
    RangeOutOfBounds {
        index: usize,
        count: usize,
        len: usize,
    },

    #[error("Attachment '{0}' is not attached")]
    NotAttached(String),

    #[error("Attachment '{0}' is already attached")]
    AlreadyAttached(String),

    #[error("Serializer size mismatch: expected {expected} bytes, got {actual}")]
    SerializerSizeMismatch { expected: usize, actual: usize },

    #[error("Serializer does not produce constant-size items")]
    VariableSizeSerializer,

    #[error("Duplicate key in unique index '{0}'")]
    DuplicateKey(String),

    #[error("Stream {0} is reserved")]
    ReservedStream(usize),

    #[error("Stream {0} has been reaped")]
    StreamReaped(usize),

    #[error("Extension property out of range: offset {offset}, length {len}")]
    ExtensionPropertyOutOfRange { offset: usize, len: usize },

    #[error("Merkle root mismatch: cached {cached}, computed {computed}")]
    MerkleRootMismatch { cached: String, computed: String },

    #[error("Attachment '{attachment}' holds {entries} entries but the container holds {items} items")]
    EntryCountMismatch {
        attachment: String,
        entries: usize,
        items: usize,
    },

    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("Header checksum verification failed")]
    HeaderChecksumMismatch,

    #[error("Invalid cluster size: {0}")]
    InvalidClusterSize(u32),

    #[error("Corrupt cluster chain: {0}")]
    CorruptChain(String),

    #[error("Corrupt transaction markers: {0}")]
    CorruptMarkers(String),

    #[error("Corrupt page table: {0}")]
    CorruptPageTable(String),

    #[error("Page {page} is full")]
    PageFull { page: usize },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlexusError {
    /// True for errors that signal corrupted persisted state rather than caller misuse.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            PlexusError::MerkleRootMismatch { .. }
                | PlexusError::EntryCountMismatch { .. }
                | PlexusError::InvalidMagic
                | PlexusError::UnsupportedVersion(_)
                | PlexusError::HeaderChecksumMismatch
                | PlexusError::CorruptChain(_)
                | PlexusError::CorruptMarkers(_)
                | PlexusError::CorruptPageTable(_)
        )
    }
}

impl From<PlexusError> for std::io::Error {
    fn from(err: PlexusError) -> Self {
        match err {
            PlexusError::Io(e) => e,
            PlexusError::IndexOutOfRange { .. } | PlexusError::RangeOutOfBounds { .. } => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
            }
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlexusError>;
