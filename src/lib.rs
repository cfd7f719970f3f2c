//! # Plexus - Paged Buffers and Clustered Streams
//!
//! `plexus-rs` is a single-file object store built in layers:
//!
//! - **Paged buffers** over memory, a memory-mapped file, or a transactional file whose
//!   writes land in shadow pages until commit
//! - **Merkle buffer**: one digest per page, root maintained incrementally
//! - **Clustered streams**: many independent byte streams multiplexed over one buffer
//! - **Attachments** in reserved streams: key indices, unique indices, stacks, lists and a
//!   durable Merkle tree over the items of a stream-mapped list
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plexus_rs::{ContainerBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let container = ContainerBuilder::new()
//!     .transactional("objects.plx")
//!     .cluster_size(512)
//!     .build()?;
//!
//! let streams = container.streams();
//! let index = streams.add()?;
//! streams.write_all(index, b"Hello, World!")?;
//!
//! container.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Items and attachments
//!
//! ```rust,no_run
//! use plexus_rs::{ContainerBuilder, ExtensionProperty, Result, StringSerializer};
//!
//! # fn main() -> Result<()> {
//! let container = ContainerBuilder::new().in_memory().reserved_streams(1).build()?;
//!
//! let mut names = container.item_list(StringSerializer);
//! names.attach(container.merkle_tree("merkle", 0, ExtensionProperty::digest_slot(0))?)?;
//! names.add(&"alpha".to_string())?;
//! # Ok(())
//! # }
//! ```

// Storage engine
pub mod core;

// Re-export core modules internally so crate:: paths in core resolve
#[allow(unused_imports)]
pub(crate) use self::core::{
    attachment, bitmap, buffer_pool, collection, error, header, io, list, memory, merkle, options,
    page, paged, serializer, stream_list, streams, transaction,
};

// Re-export the types users need
pub use crate::core::{
    attachment::{
        Attachment, AttachmentState, ItemAttachment, ItemEvent, KeyIndex, MerkleTreeAttachment,
        ReservedList, ReservedStack, UniqueKeyIndex,
    },
    buffer_pool::ResidentPoolStats,
    collection::StreamMappedList,
    error::{PlexusError, Result},
    header::{ContainerHeader, Endianness, ExtensionProperty, HEADER_SIZE},
    io::{FileBuffer, MappedFile},
    list::RangeList,
    memory::{
        MemoryBuffer, MemoryList, MemoryPageStore, MemoryPagedBuffer, MemoryPagedList, VecPageStore,
    },
    merkle::{Digest, FlatMerkleTree, HashAlgorithm, MerkleBuffer, MerkleCoordinate, ZERO_DIGEST},
    options::ContainerOptions,
    page::{PageEvent, PageMeta, PageObserver, PageState},
    paged::{PageStore, PagedList, PagedRangeList},
    serializer::{
        BincodeSerializer, DigestSerializer, I64Serializer, ItemSerializer,
        PaddedStringSerializer, StringSerializer, U32Serializer, U64Serializer,
    },
    stream_list::StreamList,
    streams::{AccessScope, ClusteredStreams, StreamHandle, StreamTraits},
    transaction::{MarkerRepository, MarkerType, TransactionalBuffer, TransactionalStore},
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Backing buffer of a [`Container`]
pub enum ContainerBuffer {
    Memory(MemoryPagedBuffer),
    File(FileBuffer),
    Transactional(TransactionalBuffer),
}

macro_rules! delegate {
    ($self:ident, $buffer:ident => $call:expr) => {
        match $self {
            ContainerBuffer::Memory($buffer) => $call,
            ContainerBuffer::File($buffer) => $call,
            ContainerBuffer::Transactional($buffer) => $call,
        }
    };
}

impl ContainerBuffer {
    pub fn is_transactional(&self) -> bool {
        matches!(self, ContainerBuffer::Transactional(_))
    }

    /// Commit a transactional buffer; plain flush for the others
    pub fn commit(&mut self) -> Result<()> {
        match self {
            ContainerBuffer::Transactional(buffer) => buffer.commit(),
            other => other.flush(),
        }
    }

    /// Roll back a transactional buffer
    pub fn rollback(&mut self) -> Result<()> {
        match self {
            ContainerBuffer::Transactional(buffer) => buffer.rollback(),
            _ => Err(PlexusError::InvalidOperation(
                "rollback needs a transactional buffer".to_string(),
            )),
        }
    }
}

impl RangeList<u8> for ContainerBuffer {
    fn len(&self) -> usize {
        delegate!(self, buffer => buffer.len())
    }

    fn read_range(&mut self, index: usize, count: usize) -> Result<Vec<u8>> {
        delegate!(self, buffer => buffer.read_range(index, count))
    }

    fn read_into(&mut self, index: usize, dest: &mut [u8]) -> Result<()> {
        delegate!(self, buffer => buffer.read_into(index, dest))
    }

    fn add_range(&mut self, items: &[u8]) -> Result<()> {
        delegate!(self, buffer => buffer.add_range(items))
    }

    fn insert_range(&mut self, index: usize, items: &[u8]) -> Result<()> {
        delegate!(self, buffer => buffer.insert_range(index, items))
    }

    fn update_range(&mut self, index: usize, items: &[u8]) -> Result<()> {
        delegate!(self, buffer => buffer.update_range(index, items))
    }

    fn remove_range(&mut self, index: usize, count: usize) -> Result<()> {
        delegate!(self, buffer => buffer.remove_range(index, count))
    }

    fn truncate(&mut self, len: usize) -> Result<()> {
        delegate!(self, buffer => buffer.truncate(len))
    }

    fn flush(&mut self) -> Result<()> {
        delegate!(self, buffer => buffer.flush())
    }
}

/// Clustered streams over a memory, file or transactional buffer
///
/// Cloning the handle returned by [`Container::streams`] is how item lists and attachments
/// share the container.
pub struct Container {
    inner: Arc<ClusteredStreams<ContainerBuffer>>,
    options: ContainerOptions,
    transactional: bool,
}

impl Container {
    /// Shared handle to the underlying streams
    pub fn streams(&self) -> &Arc<ClusteredStreams<ContainerBuffer>> {
        &self.inner
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Persist metadata and make it durable (commit for transactional buffers)
    pub fn commit(&self) -> Result<()> {
        self.inner.with_buffer(|buffer| buffer.commit())?;
        info!("Committed container");
        Ok(())
    }

    /// Discard every change since the last commit
    ///
    /// Item lists, stream lists and attachments opened before the rollback cache pages and
    /// must be dropped (or detached) first.
    pub fn rollback(&self) -> Result<()> {
        self.inner.with_buffer(|buffer| buffer.rollback())?;
        self.inner.reload()?;
        info!("Rolled back container");
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Stream-mapped item list over this container
    pub fn item_list<T: 'static, S: ItemSerializer<T>>(
        &self,
        serializer: S,
    ) -> StreamMappedList<T, S, ContainerBuffer> {
        StreamMappedList::new(Arc::clone(&self.inner), serializer)
    }

    /// Detached Merkle tree using the configured hash algorithm
    pub fn merkle_tree(
        &self,
        id: &str,
        stream: usize,
        root_property: ExtensionProperty,
    ) -> Result<MerkleTreeAttachment<ContainerBuffer>> {
        MerkleTreeAttachment::new(
            id,
            Arc::clone(&self.inner),
            stream,
            root_property,
            self.options.hash_algorithm,
        )
    }
}

enum Backing {
    Memory,
    File(PathBuf),
    Transactional {
        path: PathBuf,
        marker_dir: Option<PathBuf>,
    },
}

/// Builder for opening or creating a [`Container`]
///
/// # Examples
///
/// ```rust,no_run
/// use plexus_rs::{ContainerBuilder, Endianness};
///
/// # fn main() -> plexus_rs::Result<()> {
/// let container = ContainerBuilder::new()
///     .file("/data/objects.plx")
///     .cluster_size(1024)
///     .reserved_streams(2)
///     .endianness(Endianness::Big)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ContainerBuilder {
    backing: Backing,
    options: ContainerOptions,
}

impl ContainerBuilder {
    /// In-memory container with default options
    pub fn new() -> Self {
        ContainerBuilder {
            backing: Backing::Memory,
            options: ContainerOptions::default(),
        }
    }

    pub fn in_memory(mut self) -> Self {
        self.backing = Backing::Memory;
        self
    }

    /// Back the container with a memory-mapped file (opened if it holds a container)
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.backing = Backing::File(path.as_ref().to_path_buf());
        self
    }

    /// Back the container with a transactional file
    pub fn transactional<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.backing = Backing::Transactional {
            path: path.as_ref().to_path_buf(),
            marker_dir: None,
        };
        self
    }

    /// Marker directory of a transactional file (default `<file-name>.txn`)
    pub fn marker_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        if let Backing::Transactional { marker_dir, .. } = &mut self.backing {
            *marker_dir = Some(dir.as_ref().to_path_buf());
        }
        self
    }

    /// Replace every option at once
    pub fn options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    /// Load options from a TOML file
    pub fn options_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        Ok(self.options(ContainerOptions::load(path)?))
    }

    pub fn cluster_size(mut self, cluster_size: u32) -> Self {
        self.options.cluster_size = cluster_size;
        self
    }

    pub fn reserved_streams(mut self, reserved_streams: u32) -> Self {
        self.options.reserved_streams = reserved_streams;
        self
    }

    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.options.endianness = endianness;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.options.page_size = page_size;
        self
    }

    pub fn max_open_pages(mut self, max_open_pages: usize) -> Self {
        self.options.max_open_pages = max_open_pages;
        self
    }

    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.options.hash_algorithm = algorithm;
        self
    }

    /// Open the backing buffer and open (or format) the container in it
    ///
    /// A freshly formatted transactional container is committed right away.
    pub fn build(self) -> Result<Container> {
        let options = self.options;
        options.validate()?;

        let buffer = match self.backing {
            Backing::Memory => ContainerBuffer::Memory(PagedList::in_memory(options.page_size)?),
            Backing::File(path) => ContainerBuffer::File(FileBuffer::open_file(
                &path,
                options.page_size,
                options.max_open_pages,
            )?),
            Backing::Transactional { path, marker_dir } => {
                let marker_dir =
                    marker_dir.unwrap_or_else(|| TransactionalStore::default_marker_dir(&path));
                ContainerBuffer::Transactional(TransactionalBuffer::open_with_marker_dir(
                    &path,
                    marker_dir,
                    options.page_size,
                    options.max_open_pages,
                )?)
            }
        };

        let fresh = buffer.is_empty();
        let transactional = buffer.is_transactional();
        info!(
            "Building container (fresh: {}, transactional: {})",
            fresh, transactional
        );

        let streams = ClusteredStreams::open_or_create(buffer, &options)?;
        let container = Container {
            inner: Arc::new(streams),
            options,
            transactional,
        };
        if fresh && transactional {
            container.commit()?;
            debug!("Committed freshly formatted container");
        }
        Ok(container)
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_in_memory() {
        let container = ContainerBuilder::new()
            .cluster_size(16)
            .reserved_streams(1)
            .build()
            .unwrap();
        assert!(!container.is_transactional());
        assert!(matches!(
            container.rollback(),
            Err(PlexusError::InvalidOperation(_))
        ));

        let streams = container.streams();
        assert_eq!(streams.count().unwrap(), 1);
        let index = streams.add().unwrap();
        streams.write_all(index, b"in memory").unwrap();
        assert_eq!(streams.read_all(index).unwrap(), b"in memory");
    }

    #[test]
    fn test_builder_rejects_invalid_options() {
        assert!(matches!(
            ContainerBuilder::new().cluster_size(0).build(),
            Err(PlexusError::InvalidClusterSize(0))
        ));
    }

    #[test]
    fn test_file_container_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("objects.plx");
        {
            let container = ContainerBuilder::new()
                .file(&path)
                .cluster_size(8)
                .page_size(64)
                .build()
                .unwrap();
            let index = container.streams().add().unwrap();
            container
                .streams()
                .write_all(index, b"survives a reopen")
                .unwrap();
        }

        let container = ContainerBuilder::new()
            .file(&path)
            .page_size(64)
            .build()
            .unwrap();
        assert_eq!(container.streams().header().unwrap().cluster_size, 8);
        assert_eq!(
            container.streams().read_all(0).unwrap(),
            b"survives a reopen"
        );
    }

    #[test]
    fn test_transactional_rollback_restores_streams() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("objects.plx");
        let container = ContainerBuilder::new()
            .transactional(&path)
            .cluster_size(32)
            .page_size(128)
            .build()
            .unwrap();
        let streams = container.streams();

        let kept = streams.add().unwrap();
        streams.write_all(kept, b"committed").unwrap();
        container.commit().unwrap();

        let dropped = streams.add().unwrap();
        streams.write_all(dropped, b"rolled back").unwrap();
        streams.write_all(kept, b"overwritten").unwrap();
        container.rollback().unwrap();

        assert_eq!(streams.count().unwrap(), 1);
        assert_eq!(streams.read_all(kept).unwrap(), b"committed");
    }
}
