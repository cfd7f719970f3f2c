//! Clustered Streams container
//!
//! Many independent byte streams multiplexed over one [`RangeList<u8>`] buffer:
//!
//! ```text
//! [header 256B][cluster 0][cluster 1]...
//! cluster = [traits u8][prev i64][next i64][cluster_size data bytes]
//! ```
//!
//! Streams `[0, reserved_streams)` are reserved for attachments and are never shifted,
//! removed or reaped. Reaping a stream releases its clusters but keeps its slot, so the
//! positions of later streams are unchanged; removing a stream shifts them down.
//!
//! Every operation runs under the container's reentrant access scope. Callers that
//! need several operations to appear atomic hold an [`AccessScope`] across them.

mod cluster;
mod descriptor;
mod handle;
mod page_store;
mod state;

pub use cluster::{ClusterHeader, ClusterTraits, CLUSTER_HEADER_SIZE};
pub use descriptor::{StreamDescriptor, StreamTraits, DESCRIPTOR_SIZE};
pub use handle::StreamHandle;
pub use page_store::{StreamPageStore, StreamPagedBuffer};

use crate::error::{PlexusError, Result};
use crate::header::{ContainerHeader, ExtensionProperty};
use crate::list::RangeList;
use crate::options::ContainerOptions;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use state::ContainerState;
use std::cell::RefCell;
use tracing::{info, warn};

/// Many byte streams over one buffer
pub struct ClusteredStreams<B: RangeList<u8>> {
    state: ReentrantMutex<RefCell<ContainerState<B>>>,
    page_size: usize,
    max_open_pages: usize,
}

/// Exclusive, reentrant hold on a container
///
/// While a scope is alive no other thread can touch the container; the owning thread
/// may keep calling container methods and may enter further scopes.
pub struct AccessScope<'a, B: RangeList<u8>> {
    _guard: ReentrantMutexGuard<'a, RefCell<ContainerState<B>>>,
}

impl<B: RangeList<u8>> ClusteredStreams<B> {
    /// Format `buffer` as an empty container
    pub fn create(buffer: B, options: &ContainerOptions) -> Result<Self> {
        options.validate()?;
        let state = ContainerState::create(
            buffer,
            options.cluster_size,
            options.reserved_streams,
            options.endianness,
            options.chain_cache_capacity,
        )?;
        info!(
            "Created clustered streams (cluster size {}, {} reserved streams)",
            options.cluster_size, options.reserved_streams
        );
        Ok(Self::from_state(state, options))
    }

    /// Open a container previously written to `buffer`
    ///
    /// Layout settings come from the stored header; only the cache and paging settings of
    /// `options` apply.
    pub fn open(buffer: B, options: &ContainerOptions) -> Result<Self> {
        options.validate()?;
        let state = ContainerState::open(buffer, options.chain_cache_capacity)?;
        info!(
            "Opened clustered streams ({} streams, {} clusters)",
            state.count(),
            state.header().total_clusters
        );
        Ok(Self::from_state(state, options))
    }

    /// Open `buffer` if it holds a container, otherwise format it
    pub fn open_or_create(buffer: B, options: &ContainerOptions) -> Result<Self> {
        if buffer.is_empty() {
            Self::create(buffer, options)
        } else {
            Self::open(buffer, options)
        }
    }

    fn from_state(state: ContainerState<B>, options: &ContainerOptions) -> Self {
        ClusteredStreams {
            state: ReentrantMutex::new(RefCell::new(state)),
            page_size: options.page_size,
            max_open_pages: options.max_open_pages,
        }
    }

    /// `(page size in bytes, max open pages)` for lists paged over this container's streams
    pub fn stream_paging(&self) -> (usize, usize) {
        (self.page_size, self.max_open_pages)
    }

    /// Run `f` against the state under the access scope
    fn with_state<R>(&self, f: impl FnOnce(&mut ContainerState<B>) -> Result<R>) -> Result<R> {
        let guard = self.state.lock();
        let mut state = guard.try_borrow_mut().map_err(|_| {
            PlexusError::InvalidOperation(
                "container re-entered from inside with_buffer".to_string(),
            )
        })?;
        f(&mut state)
    }

    pub fn enter_access_scope(&self) -> AccessScope<'_, B> {
        AccessScope {
            _guard: self.state.lock(),
        }
    }

    pub fn header(&self) -> Result<ContainerHeader> {
        self.with_state(|state| Ok(state.header().clone()))
    }

    pub fn reserved_streams(&self) -> Result<usize> {
        self.with_state(|state| Ok(state.header().reserved_streams as usize))
    }

    /// Total streams, reserved ones included
    pub fn count(&self) -> Result<usize> {
        self.with_state(|state| Ok(state.count()))
    }

    /// Traits of a stream without touching its clusters
    pub fn fast_read_stream_descriptor_traits(&self, index: usize) -> Result<StreamTraits> {
        self.with_state(|state| state.traits(index))
    }

    pub fn descriptor(&self, index: usize) -> Result<StreamDescriptor> {
        self.with_state(|state| state.descriptor(index))
    }

    pub fn is_reaped(&self, index: usize) -> Result<bool> {
        Ok(self.fast_read_stream_descriptor_traits(index)?.is_reaped())
    }

    /// Append an empty stream, returning its index
    pub fn add(&self) -> Result<usize> {
        self.with_state(|state| Ok(state.add()))
    }

    /// Insert an empty stream at `index`, shifting later streams up
    pub fn insert(&self, index: usize) -> Result<()> {
        self.with_state(|state| state.insert(index))
    }

    /// Remove a stream and release its clusters, shifting later streams down
    pub fn remove(&self, index: usize) -> Result<()> {
        self.with_state(|state| state.remove(index))
    }

    /// Release a stream's clusters and tombstone its slot
    pub fn reap(&self, index: usize) -> Result<()> {
        self.with_state(|state| state.reap(index))
    }

    pub fn stream_length(&self, index: usize) -> Result<u64> {
        self.with_state(|state| state.stream_length(index))
    }

    /// Fill `dest` from `position` of a stream
    pub fn read(&self, index: usize, position: u64, dest: &mut [u8]) -> Result<()> {
        self.with_state(|state| state.read(index, position, dest))
    }

    pub fn read_all(&self, index: usize) -> Result<Vec<u8>> {
        self.with_state(|state| {
            let mut bytes = vec![0u8; state.stream_length(index)? as usize];
            state.read(index, 0, &mut bytes)?;
            Ok(bytes)
        })
    }

    /// Write `data` at `position`, growing the stream (zero-filled) as needed
    pub fn write(&self, index: usize, position: u64, data: &[u8]) -> Result<()> {
        self.with_state(|state| state.write(index, position, data))
    }

    /// Replace the whole content of a stream
    pub fn write_all(&self, index: usize, data: &[u8]) -> Result<()> {
        self.with_state(|state| {
            state.set_length(index, data.len() as u64)?;
            state.write(index, 0, data)
        })
    }

    /// Grow (zero-filled) or shrink a stream
    pub fn set_length(&self, index: usize, len: u64) -> Result<()> {
        self.with_state(|state| state.set_length(index, len))
    }

    /// Seekable `std::io` view of one stream
    pub fn open_stream(&self, index: usize) -> Result<StreamHandle<'_, B>> {
        if self.is_reaped(index)? {
            return Err(PlexusError::StreamReaped(index));
        }
        Ok(StreamHandle::new(self, index))
    }

    pub fn extension_property(&self, property: ExtensionProperty) -> Result<Vec<u8>> {
        self.with_state(|state| state.extension_property(property))
    }

    pub fn set_extension_property(&self, property: ExtensionProperty, value: &[u8]) -> Result<()> {
        self.with_state(|state| state.set_extension_property(property, value))
    }

    pub fn total_clusters(&self) -> Result<u64> {
        self.with_state(|state| Ok(state.header().total_clusters))
    }

    /// Clusters released by remove/reap/shrink and not yet reused
    pub fn free_cluster_count(&self) -> Result<usize> {
        self.with_state(|state| state.free_cluster_count())
    }

    /// Discard in-memory metadata and load it again from the backing buffer
    ///
    /// Needed after the buffer changed underneath the container, e.g. a rollback.
    pub fn reload(&self) -> Result<()> {
        self.with_state(|state| state.reload())
    }

    /// Persist metadata and flush the backing buffer
    pub fn flush(&self) -> Result<()> {
        self.with_state(|state| state.flush())
    }

    /// Persist metadata, then hand the backing buffer to `f` (e.g. to commit it)
    ///
    /// `f` must not call back into this container.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut B) -> Result<R>) -> Result<R> {
        self.with_state(|state| {
            state.persist_metadata()?;
            f(&mut state.buffer)
        })
    }
}

impl<B: RangeList<u8>> Drop for ClusteredStreams<B> {
    fn drop(&mut self) {
        if let Err(e) = self.state.get_mut().get_mut().flush() {
            warn!("Failed to flush clustered streams on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Endianness, HEADER_SIZE};
    use crate::memory::{MemoryBuffer, MemoryPagedBuffer};
    use crate::options::{DEFAULT_MAX_OPEN_PAGES, DEFAULT_PAGE_SIZE};

    fn options(cluster_size: u32, reserved: u32) -> ContainerOptions {
        ContainerOptions {
            cluster_size,
            reserved_streams: reserved,
            ..ContainerOptions::default()
        }
    }

    fn container(cluster_size: u32, reserved: u32) -> ClusteredStreams<MemoryBuffer> {
        ClusteredStreams::create(MemoryBuffer::new(), &options(cluster_size, reserved)).unwrap()
    }

    #[test]
    fn test_streams_span_clusters() {
        let streams = container(8, 0);
        let a = streams.add().unwrap();
        let b = streams.add().unwrap();

        streams.write_all(a, b"stream a spans several clusters").unwrap();
        streams.write_all(b, b"b").unwrap();
        streams.write(a, 7, b"A").unwrap();

        assert_eq!(streams.read_all(a).unwrap(), b"stream A spans several clusters");
        assert_eq!(streams.read_all(b).unwrap(), b"b");
        assert_eq!(streams.descriptor(a).unwrap().size, 31);
        assert_eq!(streams.total_clusters().unwrap(), 5);
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let streams = container(4, 0);
        let s = streams.add().unwrap();
        streams.write(s, 6, b"xy").unwrap();
        assert_eq!(streams.read_all(s).unwrap(), vec![0, 0, 0, 0, 0, 0, b'x', b'y']);

        streams.set_length(s, 3).unwrap();
        streams.set_length(s, 5).unwrap();
        assert_eq!(streams.read_all(s).unwrap(), vec![0u8; 5]);
    }

    #[test]
    fn test_reap_keeps_slot_and_frees_clusters() {
        let streams = container(4, 1);
        let s1 = streams.add().unwrap();
        let s2 = streams.add().unwrap();
        streams.write_all(s1, b"0123456789").unwrap();
        streams.write_all(s2, b"keep").unwrap();

        streams.reap(s1).unwrap();
        assert_eq!(streams.count().unwrap(), 3);
        assert!(streams.is_reaped(s1).unwrap());
        assert_eq!(streams.free_cluster_count().unwrap(), 3);
        assert!(matches!(
            streams.read_all(s1),
            Err(PlexusError::StreamReaped(1))
        ));
        assert_eq!(streams.read_all(s2).unwrap(), b"keep");

        // Freed clusters are reused before the buffer grows
        let total = streams.total_clusters().unwrap();
        let s3 = streams.add().unwrap();
        streams.write_all(s3, b"reused").unwrap();
        assert_eq!(streams.total_clusters().unwrap(), total);
        assert_eq!(streams.free_cluster_count().unwrap(), 1);
    }

    #[test]
    fn test_remove_shifts_and_reserved_protected() {
        let streams = container(16, 2);
        let first = streams.add().unwrap();
        let second = streams.add().unwrap();
        streams.write_all(second, b"second").unwrap();

        streams.remove(first).unwrap();
        assert_eq!(streams.count().unwrap(), 3);
        assert_eq!(streams.read_all(first).unwrap(), b"second");

        assert!(matches!(streams.remove(1), Err(PlexusError::ReservedStream(1))));
        assert!(matches!(streams.reap(0), Err(PlexusError::ReservedStream(0))));
        assert!(matches!(streams.insert(1), Err(PlexusError::ReservedStream(1))));
        streams.insert(2).unwrap();
        assert_eq!(streams.stream_length(2).unwrap(), 0);
        assert_eq!(streams.read_all(3).unwrap(), b"second");
    }

    #[test]
    fn test_reopen_restores_streams() {
        let mut buffer = MemoryPagedBuffer::in_memory(64).unwrap();
        {
            let streams = ClusteredStreams::create(&mut buffer, &options(8, 1)).unwrap();
            streams.write_all(0, b"reserved data").unwrap();
            let s = streams.add().unwrap();
            streams.write_all(s, b"user stream").unwrap();
            let t = streams.add().unwrap();
            streams.write_all(t, b"tomb").unwrap();
            streams.reap(t).unwrap();
            streams
                .set_extension_property(ExtensionProperty::digest_slot(0), &[7u8; 32])
                .unwrap();
        }

        let streams = ClusteredStreams::open(&mut buffer, &ContainerOptions::default()).unwrap();
        assert_eq!(streams.count().unwrap(), 3);
        assert_eq!(streams.read_all(0).unwrap(), b"reserved data");
        assert_eq!(streams.read_all(1).unwrap(), b"user stream");
        assert!(streams.is_reaped(2).unwrap());
        assert_eq!(
            streams
                .extension_property(ExtensionProperty::digest_slot(0))
                .unwrap(),
            vec![7u8; 32]
        );
        assert_eq!(streams.header().unwrap().cluster_size, 8);
    }

    #[test]
    fn test_big_endian_container() {
        let opts = ContainerOptions {
            endianness: Endianness::Big,
            ..options(8, 0)
        };
        let streams = ClusteredStreams::create(MemoryBuffer::new(), &opts).unwrap();
        let s = streams.add().unwrap();
        streams.write_all(s, b"big endian").unwrap();
        streams
            .with_buffer(|buffer| {
                assert_eq!(buffer.as_slice()[9], 1);
                assert!(buffer.len() > HEADER_SIZE);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_open_rejects_garbage() {
        let buffer = MemoryBuffer::from_vec(vec![0u8; 300]);
        assert!(matches!(
            ClusteredStreams::open(buffer, &ContainerOptions::default()),
            Err(PlexusError::InvalidMagic)
        ));
    }

    #[test]
    fn test_access_scope_is_reentrant() {
        let streams = container(8, 0);
        let _outer = streams.enter_access_scope();
        let _inner = streams.enter_access_scope();
        let s = streams.add().unwrap();
        streams.write_all(s, b"inside scope").unwrap();
        assert_eq!(streams.read_all(s).unwrap(), b"inside scope");
    }

    #[test]
    fn test_access_scope_blocks_other_threads() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let streams = Arc::new(container(8, 0));
        let released = Arc::new(AtomicBool::new(false));
        let scope = streams.enter_access_scope();

        let worker = {
            let streams = Arc::clone(&streams);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let index = streams.add().unwrap();
                (index, released.load(Ordering::SeqCst))
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!worker.is_finished());
        assert_eq!(streams.count().unwrap(), 0);
        released.store(true, Ordering::SeqCst);
        drop(scope);

        let (index, added_after_release) = worker.join().unwrap();
        assert!(added_after_release);
        assert_eq!(index, 0);
        assert_eq!(streams.count().unwrap(), 1);
    }

    #[test]
    fn test_stream_paging_follows_options() {
        let opts = ContainerOptions {
            page_size: 64,
            max_open_pages: 3,
            ..options(8, 1)
        };
        let streams = ClusteredStreams::create(MemoryBuffer::new(), &opts).unwrap();
        assert_eq!(streams.stream_paging(), (64, 3));
        streams.flush().unwrap();

        let reopened = streams
            .with_buffer(|buffer| Ok(MemoryBuffer::from_vec(buffer.as_slice().to_vec())))
            .unwrap();
        let reopened = ClusteredStreams::open(reopened, &ContainerOptions::default()).unwrap();
        assert_eq!(
            reopened.stream_paging(),
            (DEFAULT_PAGE_SIZE, DEFAULT_MAX_OPEN_PAGES)
        );
    }
}
