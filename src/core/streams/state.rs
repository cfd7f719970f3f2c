//! Mutable container state guarded by the access scope
//!
//! Streams are chains of clusters linked through their headers. The descriptor table is
//! itself a chain of clusters rooted in the container header; descriptors are kept in
//! memory and written back by [`ContainerState::persist_metadata`].

use super::cluster::{ClusterHeader, ClusterLayout, ClusterTraits, CLUSTER_HEADER_SIZE};
use super::descriptor::{StreamDescriptor, StreamTraits, DESCRIPTOR_SIZE};
use crate::error::{PlexusError, Result};
use crate::header::{ContainerHeader, Endianness, ExtensionProperty, HEADER_SIZE, NO_CLUSTER};
use crate::list::{check_insert, check_item, RangeList};
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::{debug, trace};

/// Chain-cache key of the descriptor table
const RECORDS_KEY: usize = usize::MAX;

/// A chain of clusters: one stream, or the descriptor table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Records,
    Stream(usize),
}

impl Target {
    fn key(self) -> usize {
        match self {
            Target::Records => RECORDS_KEY,
            Target::Stream(index) => index,
        }
    }

    fn cluster_traits(self) -> ClusterTraits {
        match self {
            Target::Records => ClusterTraits::RECORDS,
            Target::Stream(_) => ClusterTraits::USED,
        }
    }
}

/// One contiguous piece of a stream range: buffer offset, offset into the caller's
/// slice, byte count
type Segment = (usize, usize, usize);

pub(crate) struct ContainerState<B> {
    pub(crate) buffer: B,
    header: ContainerHeader,
    layout: ClusterLayout,
    descriptors: Vec<StreamDescriptor>,
    chains: LruCache<usize, Vec<i64>>,
    metadata_dirty: bool,
}

fn chain_cache(capacity: usize) -> LruCache<usize, Vec<i64>> {
    LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
}

impl<B: RangeList<u8>> ContainerState<B> {
    /// Format `buffer` as an empty container (discarding anything it held)
    pub(crate) fn create(
        mut buffer: B,
        cluster_size: u32,
        reserved_streams: u32,
        endianness: Endianness,
        chain_cache_capacity: usize,
    ) -> Result<Self> {
        if cluster_size == 0 {
            return Err(PlexusError::InvalidClusterSize(cluster_size));
        }
        buffer.clear()?;

        let mut header = ContainerHeader::new(cluster_size, reserved_streams, endianness);
        header.stream_count = reserved_streams as u64;
        buffer.add_range(&header.to_bytes())?;

        let mut state = ContainerState {
            buffer,
            layout: ClusterLayout::new(cluster_size as usize),
            header,
            descriptors: vec![StreamDescriptor::empty(); reserved_streams as usize],
            chains: chain_cache(chain_cache_capacity),
            metadata_dirty: true,
        };
        state.persist_metadata()?;
        Ok(state)
    }

    /// Load the header and descriptor table from `buffer`
    pub(crate) fn open(mut buffer: B, chain_cache_capacity: usize) -> Result<Self> {
        let header = Self::read_header(&mut buffer)?;
        let mut state = ContainerState {
            buffer,
            layout: ClusterLayout::new(header.cluster_size as usize),
            header,
            descriptors: Vec::new(),
            chains: chain_cache(chain_cache_capacity),
            metadata_dirty: false,
        };
        state.load_descriptors()?;

        debug!(
            streams = state.descriptors.len(),
            clusters = state.header.total_clusters,
            cluster_size = state.header.cluster_size,
            "Opened clustered streams"
        );
        Ok(state)
    }

    /// Drop all in-memory metadata and load it again from the buffer
    ///
    /// Used after the buffer's content changed underneath (e.g. a rollback).
    pub(crate) fn reload(&mut self) -> Result<()> {
        self.header = Self::read_header(&mut self.buffer)?;
        self.layout = ClusterLayout::new(self.header.cluster_size as usize);
        self.chains.clear();
        self.metadata_dirty = false;
        self.load_descriptors()?;
        debug!(streams = self.descriptors.len(), "Reloaded clustered streams");
        Ok(())
    }

    fn read_header(buffer: &mut B) -> Result<ContainerHeader> {
        if buffer.len() < HEADER_SIZE {
            return Err(PlexusError::InvalidMagic);
        }
        let header = ContainerHeader::from_bytes(&buffer.read_range(0, HEADER_SIZE)?)?;
        let layout = ClusterLayout::new(header.cluster_size as usize);

        let required = layout.cluster_offset(header.total_clusters as i64);
        if buffer.len() < required {
            return Err(PlexusError::CorruptChain(format!(
                "{} clusters need {} bytes, buffer holds {}",
                header.total_clusters,
                required,
                buffer.len()
            )));
        }
        Ok(header)
    }

    fn load_descriptors(&mut self) -> Result<()> {
        let records_size = self.header.records_size as usize;
        if records_size % DESCRIPTOR_SIZE != 0
            || (records_size / DESCRIPTOR_SIZE) as u64 != self.header.stream_count
        {
            return Err(PlexusError::CorruptChain(format!(
                "descriptor table holds {} bytes for {} streams",
                records_size, self.header.stream_count
            )));
        }

        let mut records = vec![0u8; records_size];
        self.read_target(Target::Records, 0, &mut records)?;
        let endianness = self.header.endianness;
        self.descriptors = records
            .chunks_exact(DESCRIPTOR_SIZE)
            .map(|bytes| StreamDescriptor::decode(bytes, endianness))
            .collect();
        Ok(())
    }

    pub(crate) fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub(crate) fn count(&self) -> usize {
        self.descriptors.len()
    }

    fn reserved(&self) -> usize {
        self.header.reserved_streams as usize
    }

    fn descriptor_of(&self, target: Target) -> StreamDescriptor {
        match target {
            Target::Records => StreamDescriptor {
                size: self.header.records_size,
                start_cluster: self.header.records_start,
                end_cluster: self.header.records_end,
                traits: StreamTraits::NONE,
            },
            Target::Stream(index) => self.descriptors[index],
        }
    }

    fn store_descriptor(&mut self, target: Target, descriptor: StreamDescriptor) {
        match target {
            Target::Records => {
                self.header.records_size = descriptor.size;
                self.header.records_start = descriptor.start_cluster;
                self.header.records_end = descriptor.end_cluster;
            }
            Target::Stream(index) => self.descriptors[index] = descriptor,
        }
        self.metadata_dirty = true;
    }

    // ---- clusters ------------------------------------------------------------------

    fn read_cluster_header(&mut self, cluster: i64) -> Result<ClusterHeader> {
        if cluster < 0 || cluster as u64 >= self.header.total_clusters {
            return Err(PlexusError::CorruptChain(format!(
                "cluster {} out of range ({} clusters)",
                cluster, self.header.total_clusters
            )));
        }
        let mut bytes = [0u8; CLUSTER_HEADER_SIZE];
        self.buffer
            .read_into(self.layout.cluster_offset(cluster), &mut bytes)?;
        Ok(ClusterHeader::decode(&bytes, self.header.endianness))
    }

    fn write_cluster_header(&mut self, cluster: i64, header: ClusterHeader) -> Result<()> {
        let bytes = header.encode(self.header.endianness);
        self.buffer
            .update_range(self.layout.cluster_offset(cluster), &bytes)
    }

    /// Take a cluster from the free list, or grow the buffer by one cluster
    fn allocate_cluster(&mut self, traits: ClusterTraits, prev: i64) -> Result<i64> {
        let cluster = if self.header.free_head != NO_CLUSTER {
            let cluster = self.header.free_head;
            let free = self.read_cluster_header(cluster)?;
            if !free.traits.contains(ClusterTraits::FREE) {
                return Err(PlexusError::CorruptChain(format!(
                    "free-list cluster {} is not marked free",
                    cluster
                )));
            }
            self.header.free_head = free.next;
            cluster
        } else {
            let cluster = self.header.total_clusters as i64;
            let offset = self.layout.cluster_offset(cluster);
            let len = self.buffer.len();
            if len == offset {
                self.buffer.add_range(&vec![0u8; self.layout.stride()])?;
            } else if len < offset + self.layout.stride() {
                return Err(PlexusError::CorruptChain(format!(
                    "buffer ends at {} inside cluster {}",
                    len, cluster
                )));
            }
            self.header.total_clusters += 1;
            cluster
        };

        self.write_cluster_header(cluster, ClusterHeader::new(traits, prev))?;
        self.metadata_dirty = true;
        trace!(cluster, "Allocated cluster");
        Ok(cluster)
    }

    /// Push a cluster onto the free list
    fn release_cluster(&mut self, cluster: i64) -> Result<()> {
        let free = ClusterHeader {
            traits: ClusterTraits::FREE,
            prev: NO_CLUSTER,
            next: self.header.free_head,
        };
        self.write_cluster_header(cluster, free)?;
        self.header.free_head = cluster;
        self.metadata_dirty = true;
        Ok(())
    }

    /// Cluster numbers of a chain, in order
    fn chain(&mut self, target: Target) -> Result<Vec<i64>> {
        if let Some(chain) = self.chains.get(&target.key()) {
            return Ok(chain.clone());
        }

        let descriptor = self.descriptor_of(target);
        let mut chain = Vec::new();
        let mut cluster = descriptor.start_cluster;
        while cluster != NO_CLUSTER {
            if chain.len() as u64 >= self.header.total_clusters {
                return Err(PlexusError::CorruptChain(format!(
                    "cycle in chain of {:?}",
                    target
                )));
            }
            chain.push(cluster);
            cluster = self.read_cluster_header(cluster)?.next;
        }

        if chain.last().copied().unwrap_or(NO_CLUSTER) != descriptor.end_cluster
            || chain.len() != self.layout.clusters_for(descriptor.size)
        {
            return Err(PlexusError::CorruptChain(format!(
                "{:?}: {} clusters ending at {:?} for {} bytes (end cluster {})",
                target,
                chain.len(),
                chain.last(),
                descriptor.size,
                descriptor.end_cluster
            )));
        }

        self.chains.put(target.key(), chain.clone());
        Ok(chain)
    }

    fn release_chain(&mut self, target: Target) -> Result<usize> {
        let chain = self.chain(target)?;
        for &cluster in chain.iter().rev() {
            self.release_cluster(cluster)?;
        }
        self.chains.pop(&target.key());
        Ok(chain.len())
    }

    /// Grow or shrink a chain to hold exactly `new_len` bytes
    fn resize_target(&mut self, target: Target, new_len: u64, zero_fill: bool) -> Result<()> {
        let mut descriptor = self.descriptor_of(target);
        if descriptor.size == new_len {
            return Ok(());
        }

        let mut chain = self.chain(target)?;
        let needed = self.layout.clusters_for(new_len);

        while chain.len() < needed {
            let prev = chain.last().copied().unwrap_or(NO_CLUSTER);
            let cluster = self.allocate_cluster(target.cluster_traits(), prev)?;
            if prev != NO_CLUSTER {
                let mut link = self.read_cluster_header(prev)?;
                link.next = cluster;
                self.write_cluster_header(prev, link)?;
            }
            chain.push(cluster);
        }

        while chain.len() > needed {
            if let Some(cluster) = chain.pop() {
                self.release_cluster(cluster)?;
            }
            if let Some(&last) = chain.last() {
                let mut link = self.read_cluster_header(last)?;
                link.next = NO_CLUSTER;
                self.write_cluster_header(last, link)?;
            }
        }

        let old_len = descriptor.size;
        descriptor.size = new_len;
        descriptor.start_cluster = chain.first().copied().unwrap_or(NO_CLUSTER);
        descriptor.end_cluster = chain.last().copied().unwrap_or(NO_CLUSTER);
        self.store_descriptor(target, descriptor);
        self.chains.put(target.key(), chain);

        if zero_fill && new_len > old_len {
            let zeros = vec![0u8; self.layout.cluster_size];
            let mut position = old_len;
            while position < new_len {
                let count = ((new_len - position) as usize).min(zeros.len());
                self.write_segments(target, position, &zeros[..count])?;
                position += count as u64;
            }
        }
        Ok(())
    }

    /// Map `[position, position + len)` of a chain onto buffer offsets
    fn segments(&mut self, target: Target, position: u64, len: usize) -> Result<Vec<Segment>> {
        let chain = self.chain(target)?;
        let cluster_size = self.layout.cluster_size as u64;

        let mut segments = Vec::new();
        let mut done = 0usize;
        while done < len {
            let at = position + done as u64;
            let cluster = chain
                .get((at / cluster_size) as usize)
                .copied()
                .ok_or_else(|| {
                    PlexusError::CorruptChain(format!("{:?} has no cluster for byte {}", target, at))
                })?;
            let within = (at % cluster_size) as usize;
            let count = (self.layout.cluster_size - within).min(len - done);
            segments.push((self.layout.data_offset(cluster) + within, done, count));
            done += count;
        }
        Ok(segments)
    }

    fn read_target(&mut self, target: Target, position: u64, dest: &mut [u8]) -> Result<()> {
        let size = self.descriptor_of(target).size;
        if position > size || dest.len() as u64 > size - position {
            return Err(PlexusError::RangeOutOfBounds {
                index: position as usize,
                count: dest.len(),
                len: size as usize,
            });
        }
        for (offset, start, count) in self.segments(target, position, dest.len())? {
            self.buffer.read_into(offset, &mut dest[start..start + count])?;
        }
        Ok(())
    }

    fn write_segments(&mut self, target: Target, position: u64, data: &[u8]) -> Result<()> {
        for (offset, start, count) in self.segments(target, position, data.len())? {
            self.buffer.update_range(offset, &data[start..start + count])?;
        }
        Ok(())
    }

    fn write_target(&mut self, target: Target, position: u64, data: &[u8]) -> Result<()> {
        let size = self.descriptor_of(target).size;
        if position > size {
            self.resize_target(target, position, true)?;
        }
        let end = position + data.len() as u64;
        if end > size.max(position) {
            self.resize_target(target, end, false)?;
        }
        self.write_segments(target, position, data)
    }

    // ---- streams -------------------------------------------------------------------

    fn check_stream(&self, index: usize) -> Result<()> {
        check_item(index, self.descriptors.len())
    }

    fn check_live(&self, index: usize) -> Result<()> {
        self.check_stream(index)?;
        if self.descriptors[index].is_reaped() {
            return Err(PlexusError::StreamReaped(index));
        }
        Ok(())
    }

    fn check_unreserved(&self, index: usize) -> Result<()> {
        if index < self.reserved() {
            return Err(PlexusError::ReservedStream(index));
        }
        Ok(())
    }

    pub(crate) fn descriptor(&self, index: usize) -> Result<StreamDescriptor> {
        self.check_stream(index)?;
        Ok(self.descriptors[index])
    }

    pub(crate) fn traits(&self, index: usize) -> Result<StreamTraits> {
        self.check_stream(index)?;
        Ok(self.descriptors[index].traits)
    }

    pub(crate) fn stream_length(&self, index: usize) -> Result<u64> {
        self.check_stream(index)?;
        Ok(self.descriptors[index].size)
    }

    pub(crate) fn add(&mut self) -> usize {
        self.descriptors.push(StreamDescriptor::empty());
        self.header.stream_count = self.descriptors.len() as u64;
        self.metadata_dirty = true;
        self.descriptors.len() - 1
    }

    pub(crate) fn insert(&mut self, index: usize) -> Result<()> {
        self.check_unreserved(index)?;
        check_insert(index, self.descriptors.len())?;

        self.descriptors.insert(index, StreamDescriptor::empty());
        self.header.stream_count = self.descriptors.len() as u64;
        self.metadata_dirty = true;
        self.chains.clear();
        debug!(index, streams = self.descriptors.len(), "Inserted stream");
        Ok(())
    }

    pub(crate) fn remove(&mut self, index: usize) -> Result<()> {
        self.check_unreserved(index)?;
        self.check_stream(index)?;

        let released = self.release_chain(Target::Stream(index))?;
        self.descriptors.remove(index);
        self.header.stream_count = self.descriptors.len() as u64;
        self.metadata_dirty = true;
        self.chains.clear();
        debug!(index, released, streams = self.descriptors.len(), "Removed stream");
        Ok(())
    }

    pub(crate) fn reap(&mut self, index: usize) -> Result<()> {
        self.check_unreserved(index)?;
        self.check_stream(index)?;
        if self.descriptors[index].is_reaped() {
            return Ok(());
        }

        let released = self.release_chain(Target::Stream(index))?;
        let mut tombstone = StreamDescriptor::empty();
        tombstone.traits = self.descriptors[index].traits.with(StreamTraits::REAPED);
        self.store_descriptor(Target::Stream(index), tombstone);
        debug!(index, released, "Reaped stream");
        Ok(())
    }

    pub(crate) fn read(&mut self, index: usize, position: u64, dest: &mut [u8]) -> Result<()> {
        self.check_live(index)?;
        self.read_target(Target::Stream(index), position, dest)
    }

    pub(crate) fn write(&mut self, index: usize, position: u64, data: &[u8]) -> Result<()> {
        self.check_live(index)?;
        self.write_target(Target::Stream(index), position, data)
    }

    pub(crate) fn set_length(&mut self, index: usize, len: u64) -> Result<()> {
        self.check_live(index)?;
        self.resize_target(Target::Stream(index), len, true)
    }

    pub(crate) fn extension_property(&self, property: ExtensionProperty) -> Result<Vec<u8>> {
        Ok(self.header.extension_property(property)?.to_vec())
    }

    pub(crate) fn set_extension_property(&mut self, property: ExtensionProperty, value: &[u8]) -> Result<()> {
        self.header.set_extension_property(property, value)?;
        self.metadata_dirty = true;
        Ok(())
    }

    /// Number of clusters on the free list
    pub(crate) fn free_cluster_count(&mut self) -> Result<usize> {
        let mut count = 0;
        let mut cluster = self.header.free_head;
        while cluster != NO_CLUSTER {
            if count as u64 >= self.header.total_clusters {
                return Err(PlexusError::CorruptChain("cycle in free list".to_string()));
            }
            count += 1;
            cluster = self.read_cluster_header(cluster)?.next;
        }
        Ok(count)
    }

    /// Write the descriptor table and header back to the buffer
    pub(crate) fn persist_metadata(&mut self) -> Result<()> {
        if !self.metadata_dirty {
            return Ok(());
        }

        let endianness = self.header.endianness;
        let mut records = Vec::with_capacity(self.descriptors.len() * DESCRIPTOR_SIZE);
        for descriptor in &self.descriptors {
            records.extend_from_slice(&descriptor.encode(endianness));
        }

        self.resize_target(Target::Records, records.len() as u64, false)?;
        self.write_segments(Target::Records, 0, &records)?;

        self.header.stream_count = self.descriptors.len() as u64;
        let header = self.header.to_bytes();
        self.buffer.update_range(0, &header)?;
        self.metadata_dirty = false;

        trace!(streams = self.descriptors.len(), "Persisted container metadata");
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.persist_metadata()?;
        self.buffer.flush()
    }
}
