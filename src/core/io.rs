//! Memory-mapped single-file page store
//!
//! Page `i` occupies `[i * page_size, (i + 1) * page_size)` of the file; the last page
//! holds whatever remains. Page boundaries are derived from the file length at open,
//! so the file never carries any framing of its own.

use crate::error::Result;
use crate::page::PageMeta;
use crate::paged::{PageStore, PagedList};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Disk-backed page store over one memory-mapped file
pub struct MappedFile {
    file: File,
    path: PathBuf,
    mmap: Option<MmapMut>,
    len: u64,
}

/// Paged byte buffer backed by one memory-mapped file
pub type FileBuffer = PagedList<u8, MappedFile>;

impl MappedFile {
    /// Create (or truncate) a file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Self::from_file(file, path.as_ref().to_path_buf())
    }

    /// Open an existing file, or create an empty one
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Self::from_file(file, path.as_ref().to_path_buf())
    }

    fn from_file(file: File, path: PathBuf) -> Result<Self> {
        let len = file.metadata()?.len();
        let mut mapped = MappedFile {
            file,
            path,
            mmap: None,
            len,
        };
        mapped.map()?;
        Ok(mapped)
    }

    fn map(&mut self) -> Result<()> {
        self.mmap = if self.len == 0 {
            None
        } else {
            // SAFETY: the mapping is owned by this store and dropped before every
            // resize, and all access is bounds-checked against `len`. The file is
            // opened read+write by this process; concurrent external modification
            // is outside the contract of the store.
            Some(unsafe { MmapMut::map_mut(&self.file)? })
        };
        Ok(())
    }

    /// Change the file length, remapping around the resize
    pub(crate) fn set_len(&mut self, len: u64) -> Result<()> {
        if len == self.len {
            return Ok(());
        }
        if let Some(mmap) = self.mmap.take() {
            mmap.flush()?;
        }
        self.file.set_len(len)?;
        self.len = len;
        self.map()
    }

    /// Write `data` at `offset`, growing the file if needed
    pub(crate) fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset + data.len() as u64;
        if end > self.len {
            self.set_len(end)?;
        }
        if let Some(mmap) = &mut self.mmap {
            mmap[offset as usize..end as usize].copy_from_slice(data);
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()?;
        }
        self.file.sync_all()?;
        Ok(())
    }
}

impl PageStore<u8> for MappedFile {
    fn persisted_page_sizes(&self, page_size: usize) -> Result<Vec<usize>> {
        let page_size = page_size as u64;
        let page_count = (self.len + page_size - 1) / page_size;
        Ok((0..page_count)
            .map(|i| {
                if i + 1 == page_count {
                    (self.len - i * page_size) as usize
                } else {
                    page_size as usize
                }
            })
            .collect())
    }

    fn load_page(&mut self, page: &PageMeta) -> Result<Vec<u8>> {
        let start = page.start_position as usize;
        let end = start + page.count;
        match &self.mmap {
            Some(mmap) if end <= mmap.len() => Ok(mmap[start..end].to_vec()),
            _ => Err(crate::error::PlexusError::CorruptPageTable(format!(
                "page {} [{}, {}) lies beyond end of file ({} bytes)",
                page.number, start, end, self.len
            ))),
        }
    }

    fn save_page(&mut self, page: &PageMeta, items: &[u8]) -> Result<()> {
        self.write_at(page.start_position, items)
    }

    fn delete_page(&mut self, page: &PageMeta) -> Result<()> {
        if page.start_position < self.len {
            self.set_len(page.start_position)?;
        }
        Ok(())
    }

    fn truncate(&mut self, total_items: usize) -> Result<()> {
        if (total_items as u64) < self.len {
            self.set_len(total_items as u64)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()?;
        }
        Ok(())
    }
}

impl PagedList<u8, MappedFile> {
    /// Open a memory-mapped file as a paged byte buffer
    pub fn open_file<P: AsRef<Path>>(path: P, page_size: usize, max_open_pages: usize) -> Result<Self> {
        let store = MappedFile::open(&path)?;
        info!(
            "Opening file buffer {:?} ({} bytes, page size {})",
            store.path(),
            store.len(),
            page_size
        );
        PagedList::new(store, page_size, max_open_pages)
    }

    /// Create (or truncate) a memory-mapped file as an empty paged byte buffer
    pub fn create_file<P: AsRef<Path>>(path: P, page_size: usize, max_open_pages: usize) -> Result<Self> {
        let store = MappedFile::create(&path)?;
        debug!("Created file buffer {:?}", store.path());
        PagedList::new(store, page_size, max_open_pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::RangeList;
    use crate::paged::PagedRangeList;
    use tempfile::NamedTempFile;

    #[test]
    fn test_page_boundaries_from_file_length() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), vec![7u8; 10]).unwrap();

        let buffer = FileBuffer::open_file(temp.path(), 4, 2).unwrap();
        let counts: Vec<_> = buffer.pages().iter().map(|p| p.count).collect();
        assert_eq!(counts, vec![4, 4, 2]);
        let positions: Vec<_> = buffer.pages().iter().map(|p| p.start_position).collect();
        assert_eq!(positions, vec![0, 4, 8]);
    }

    #[test]
    fn test_write_and_reopen() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_path_buf();

        {
            let mut buffer = FileBuffer::create_file(&path, 8, 2).unwrap();
            buffer.add_range(b"Hello, paged world!").unwrap();
            buffer.flush().unwrap();
        }

        assert_eq!(std::fs::read(&path).unwrap(), b"Hello, paged world!");

        let mut buffer = FileBuffer::open_file(&path, 8, 2).unwrap();
        assert_eq!(buffer.len(), 19);
        assert_eq!(buffer.read_range(7, 5).unwrap(), b"paged".to_vec());
    }

    #[test]
    fn test_truncate_shrinks_file() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_path_buf();

        let mut buffer = FileBuffer::create_file(&path, 4, 1).unwrap();
        buffer.add_range(&[1u8; 13]).unwrap();
        buffer.flush().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 13);

        buffer.remove_range(5, 8).unwrap();
        buffer.flush().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 5);
        buffer.validate_pages().unwrap();
    }

    #[test]
    fn test_drop_flushes_dirty_pages() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_path_buf();

        {
            let mut buffer = FileBuffer::create_file(&path, 16, 4).unwrap();
            buffer.add_range(b"flushed on drop").unwrap();
        }

        assert_eq!(std::fs::read(&path).unwrap(), b"flushed on drop");
    }
}
