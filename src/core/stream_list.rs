use crate::error::{PlexusError, Result};
use crate::list::{check_insert, check_item, check_range, RangeList};
use crate::paged::PagedList;
use crate::serializer::ItemSerializer;
use crate::streams::{ClusteredStreams, StreamPagedBuffer};
use std::marker::PhantomData;
use std::sync::Arc;

/// List of constant-size items stored back to back in one container stream
///
/// Item `i` occupies bytes `[i * size, (i + 1) * size)` of the stream, paged through a
/// [`StreamPagedBuffer`] whose pages hold a whole number of items.
pub struct StreamList<T, S: ItemSerializer<T>, B: RangeList<u8>> {
    bytes: StreamPagedBuffer<B>,
    serializer: S,
    item_size: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S: ItemSerializer<T>, B: RangeList<u8>> StreamList<T, S, B> {
    /// Paged with the container's configured page size and pool bound
    pub fn new(container: Arc<ClusteredStreams<B>>, stream: usize, serializer: S) -> Result<Self> {
        let (page_size, max_open_pages) = container.stream_paging();
        Self::with_paging(container, stream, serializer, page_size, max_open_pages)
    }

    /// `page_size` is in bytes and is rounded down to whole items (at least one)
    pub fn with_paging(
        container: Arc<ClusteredStreams<B>>,
        stream: usize,
        serializer: S,
        page_size: usize,
        max_open_pages: usize,
    ) -> Result<Self> {
        let item_size = match serializer.constant_size() {
            Some(size) if size > 0 => size,
            _ => return Err(PlexusError::VariableSizeSerializer),
        };
        let items_per_page = (page_size / item_size).max(1);
        let bytes = PagedList::over_stream(
            container,
            stream,
            items_per_page * item_size,
            max_open_pages,
        )?;
        if bytes.len() % item_size != 0 {
            return Err(PlexusError::InvalidData(format!(
                "stream {} holds {} bytes, not a multiple of item size {}",
                stream,
                bytes.len(),
                item_size
            )));
        }

        Ok(StreamList {
            bytes,
            serializer,
            item_size,
            _marker: PhantomData,
        })
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    pub fn stream(&self) -> usize {
        self.bytes.store().stream()
    }

    fn encode(&self, items: &[T]) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(items.len() * self.item_size);
        for item in items {
            let encoded = self.serializer.serialize(item)?;
            if encoded.len() != self.item_size {
                return Err(PlexusError::SerializerSizeMismatch {
                    expected: self.item_size,
                    actual: encoded.len(),
                });
            }
            bytes.extend_from_slice(&encoded);
        }
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<T>> {
        bytes
            .chunks(self.item_size)
            .map(|chunk| self.serializer.deserialize(chunk))
            .collect()
    }
}

impl<T: Clone, S: ItemSerializer<T>, B: RangeList<u8>> RangeList<T> for StreamList<T, S, B> {
    fn len(&self) -> usize {
        self.bytes.len() / self.item_size
    }

    fn read_range(&mut self, index: usize, count: usize) -> Result<Vec<T>> {
        check_range(index, count, self.len())?;
        let bytes = self
            .bytes
            .read_range(index * self.item_size, count * self.item_size)?;
        self.decode(&bytes)
    }

    fn read_into(&mut self, index: usize, dest: &mut [T]) -> Result<()> {
        let items = self.read_range(index, dest.len())?;
        dest.clone_from_slice(&items);
        Ok(())
    }

    fn read(&mut self, index: usize) -> Result<T> {
        check_item(index, self.len())?;
        let bytes = self
            .bytes
            .read_range(index * self.item_size, self.item_size)?;
        self.serializer.deserialize(&bytes)
    }

    fn add_range(&mut self, items: &[T]) -> Result<()> {
        let bytes = self.encode(items)?;
        self.bytes.add_range(&bytes)
    }

    fn insert_range(&mut self, index: usize, items: &[T]) -> Result<()> {
        check_insert(index, self.len())?;
        let bytes = self.encode(items)?;
        self.bytes.insert_range(index * self.item_size, &bytes)
    }

    fn update_range(&mut self, index: usize, items: &[T]) -> Result<()> {
        check_range(index, items.len(), self.len())?;
        let bytes = self.encode(items)?;
        self.bytes.update_range(index * self.item_size, &bytes)
    }

    fn remove_range(&mut self, index: usize, count: usize) -> Result<()> {
        check_range(index, count, self.len())?;
        self.bytes
            .remove_range(index * self.item_size, count * self.item_size)
    }

    fn flush(&mut self) -> Result<()> {
        self.bytes.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBuffer;
    use crate::options::ContainerOptions;
    use crate::serializer::{StringSerializer, U64Serializer};

    fn container() -> Arc<ClusteredStreams<MemoryBuffer>> {
        let options = ContainerOptions {
            cluster_size: 24,
            reserved_streams: 2,
            ..ContainerOptions::default()
        };
        Arc::new(ClusteredStreams::create(MemoryBuffer::new(), &options).unwrap())
    }

    #[test]
    fn test_items_persist_in_stream() {
        let container = container();
        {
            let mut list: StreamList<u64, _, _> =
                StreamList::with_paging(container.clone(), 1, U64Serializer, 20, 2).unwrap();
            list.add_range(&[1, 2, 3, 4, 5]).unwrap();
            list.insert_range(1, &[10]).unwrap();
            list.remove_range(3, 2).unwrap();
            list.update_range(0, &[7]).unwrap();
            assert_eq!(list.read_range(0, 4).unwrap(), vec![7, 10, 2, 5]);
        }

        assert_eq!(container.stream_length(1).unwrap(), 32);
        let mut list: StreamList<u64, _, _> =
            StreamList::new(container.clone(), 1, U64Serializer).unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(list.read(3).unwrap(), 5);
        assert!(list.read(4).is_err());
    }

    #[test]
    fn test_new_pages_with_container_options() {
        let options = ContainerOptions {
            cluster_size: 24,
            reserved_streams: 1,
            page_size: 40,
            max_open_pages: 1,
            ..ContainerOptions::default()
        };
        let container = Arc::new(ClusteredStreams::create(MemoryBuffer::new(), &options).unwrap());
        let mut list: StreamList<u64, _, _> = StreamList::new(container, 0, U64Serializer).unwrap();
        list.add_range(&(0..12).collect::<Vec<_>>()).unwrap();

        assert_eq!(list.bytes.page_count(), 3);
        assert_eq!(list.bytes.resident_pages().len(), 1);
        assert_eq!(list.read(11).unwrap(), 11);
    }

    #[test]
    fn test_variable_size_serializer_rejected() {
        assert!(matches!(
            StreamList::<String, _, _>::new(container(), 0, StringSerializer),
            Err(PlexusError::VariableSizeSerializer)
        ));
    }
}
