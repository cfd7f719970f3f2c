use super::ClusteredStreams;
use crate::error::Result;
use crate::list::RangeList;
use crate::page::PageMeta;
use crate::paged::{PageStore, PagedList};
use std::sync::Arc;

/// Page store over one stream of a container
///
/// Page `i` occupies `[i * page_size, ...)` of the stream, so a paged list over a
/// reserved stream behaves exactly like one over a file.
pub struct StreamPageStore<B: RangeList<u8>> {
    container: Arc<ClusteredStreams<B>>,
    stream: usize,
}

/// Paged byte buffer living inside one container stream
pub type StreamPagedBuffer<B> = PagedList<u8, StreamPageStore<B>>;

impl<B: RangeList<u8>> StreamPageStore<B> {
    pub fn new(container: Arc<ClusteredStreams<B>>, stream: usize) -> Self {
        StreamPageStore { container, stream }
    }

    pub fn stream(&self) -> usize {
        self.stream
    }

    pub fn container(&self) -> &Arc<ClusteredStreams<B>> {
        &self.container
    }
}

impl<B: RangeList<u8>> PageStore<u8> for StreamPageStore<B> {
    fn persisted_page_sizes(&self, page_size: usize) -> Result<Vec<usize>> {
        let len = self.container.stream_length(self.stream)? as usize;
        let mut sizes = vec![page_size; len / page_size];
        if len % page_size > 0 {
            sizes.push(len % page_size);
        }
        Ok(sizes)
    }

    fn load_page(&mut self, page: &PageMeta) -> Result<Vec<u8>> {
        let mut items = vec![0u8; page.count];
        self.container
            .read(self.stream, page.start_position, &mut items)?;
        Ok(items)
    }

    fn save_page(&mut self, page: &PageMeta, items: &[u8]) -> Result<()> {
        self.container.write(self.stream, page.start_position, items)
    }

    fn delete_page(&mut self, page: &PageMeta) -> Result<()> {
        if page.start_position < self.container.stream_length(self.stream)? {
            self.container.set_length(self.stream, page.start_position)?;
        }
        Ok(())
    }

    fn truncate(&mut self, total_items: usize) -> Result<()> {
        if (total_items as u64) < self.container.stream_length(self.stream)? {
            self.container.set_length(self.stream, total_items as u64)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: RangeList<u8>> PagedList<u8, StreamPageStore<B>> {
    /// Paged byte buffer over `stream` of `container`
    pub fn over_stream(
        container: Arc<ClusteredStreams<B>>,
        stream: usize,
        page_size: usize,
        max_open_pages: usize,
    ) -> Result<Self> {
        PagedList::new(StreamPageStore::new(container, stream), page_size, max_open_pages)
    }
}
