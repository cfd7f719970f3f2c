//! Transactional file buffer
//!
//! Mutations never touch the committed file until [`TransactionalBuffer::commit`]:
//! - a saved page is written to its own shadow file (an *uncommitted* marker)
//! - a removed committed page leaves a *deleted* marker
//! - loads prefer the shadow file over the committed file
//!
//! Commit merges every shadow page into the committed file under a commit marker, so a
//! crash half-way through is rolled forward on the next open. Rollback simply discards
//! the markers.

mod markers;

pub use markers::{MarkerRepository, MarkerType};

use crate::error::{PlexusError, Result};
use crate::io::MappedFile;
use crate::list::RangeList;
use crate::page::{PageMeta, PageObserver};
use crate::paged::{PageStore, PagedList, PagedRangeList};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Page store layering shadow pages over a committed memory-mapped file
pub struct TransactionalStore {
    file: MappedFile,
    markers: MarkerRepository,
    page_size: usize,
}

impl TransactionalStore {
    /// Open `path` with markers kept in `marker_dir`
    ///
    /// A commit interrupted by a crash is completed before the store is returned.
    pub fn open<P: AsRef<Path>, D: AsRef<Path>>(path: P, marker_dir: D, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(PlexusError::InvalidConfig(
                "page size must be non-zero".to_string(),
            ));
        }

        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PlexusError::InvalidConfig(format!("invalid file path {:?}", path)))?;

        let markers = MarkerRepository::open(marker_dir, file_name)?;
        let file = MappedFile::open(path)?;
        let mut store = TransactionalStore {
            file,
            markers,
            page_size,
        };

        if store.markers.commit_in_progress() {
            info!("Rolling forward interrupted commit of {:?}", path);
            store.commit()?;
        } else if store.markers.has_markers() {
            debug!("Resuming pending transaction on {:?}", path);
        }

        Ok(store)
    }

    /// Default marker directory for `path`: `<file-name>.txn` beside the file
    pub fn default_marker_dir(path: &Path) -> PathBuf {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{}.txn", file_name))
    }

    fn committed_page_count(&self) -> usize {
        let page_size = self.page_size as u64;
        ((self.file.len() + page_size - 1) / page_size) as usize
    }

    fn committed_page_size(&self, page: usize) -> usize {
        let start = (page * self.page_size) as u64;
        (self.file.len().saturating_sub(start) as usize).min(self.page_size)
    }

    /// Number of pages in the logical (uncommitted) view
    pub fn logical_page_count(&self) -> usize {
        let committed = self.committed_page_count();
        let surviving = self
            .markers
            .lowest_deleted_page()
            .map_or(committed, |deleted| committed.min(deleted));
        let changed = self.markers.highest_changed_page().map_or(0, |page| page + 1);
        surviving.max(changed)
    }

    fn logical_page_sizes(&self) -> Result<Vec<usize>> {
        let committed = self.committed_page_count();
        (0..self.logical_page_count())
            .map(|page| {
                if self.markers.has_marker(page, MarkerType::UncommittedPage) {
                    self.markers.uncommitted_len(page)
                } else if page < committed && !self.markers.has_marker(page, MarkerType::DeletedPage) {
                    Ok(self.committed_page_size(page))
                } else {
                    Err(PlexusError::CorruptMarkers(format!(
                        "page {} has neither committed nor uncommitted contents",
                        page
                    )))
                }
            })
            .collect()
    }

    /// True if any page differs from the committed file
    pub fn has_uncommitted_changes(&self) -> bool {
        self.markers.has_markers()
    }

    /// Merge every shadow page into the committed file
    pub fn commit(&mut self) -> Result<()> {
        let sizes = self.logical_page_sizes()?;
        let total: u64 = sizes.iter().map(|&size| size as u64).sum();

        self.markers.begin_commit()?;

        self.file.set_len(total)?;
        let changed: Vec<usize> = self.markers.changed_pages().collect();
        for page in &changed {
            let data = self.markers.read_uncommitted(*page)?;
            self.file.write_at((page * self.page_size) as u64, &data)?;
        }
        self.file.sync()?;

        self.markers.clear()?;
        self.markers.end_commit()?;

        info!(
            "Committed {:?}: {} pages merged, {} bytes",
            self.file.path(),
            changed.len(),
            total
        );
        Ok(())
    }

    /// Discard every shadow page
    pub fn rollback(&mut self) -> Result<()> {
        self.markers.clear()?;
        debug!("Rolled back pending transaction on {:?}", self.file.path());
        Ok(())
    }

    pub fn markers(&self) -> &MarkerRepository {
        &self.markers
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl PageStore<u8> for TransactionalStore {
    fn persisted_page_sizes(&self, page_size: usize) -> Result<Vec<usize>> {
        if page_size != self.page_size {
            return Err(PlexusError::InvalidConfig(format!(
                "store opened with page size {}, list uses {}",
                self.page_size, page_size
            )));
        }
        self.logical_page_sizes()
    }

    fn load_page(&mut self, page: &PageMeta) -> Result<Vec<u8>> {
        if self.markers.has_marker(page.number, MarkerType::UncommittedPage) {
            self.markers.read_uncommitted(page.number)
        } else {
            self.file.load_page(page)
        }
    }

    fn save_page(&mut self, page: &PageMeta, items: &[u8]) -> Result<()> {
        self.markers.write_uncommitted(page.number, items)
    }

    fn delete_page(&mut self, page: &PageMeta) -> Result<()> {
        if page.number < self.committed_page_count() {
            self.markers.mark_deleted(page.number)
        } else {
            self.markers.remove(page.number, MarkerType::UncommittedPage)
        }
    }
}

/// Paged byte buffer with commit / rollback over one file
pub struct TransactionalBuffer {
    list: PagedList<u8, TransactionalStore>,
}

impl TransactionalBuffer {
    /// Open `path` with markers in the default `<file-name>.txn` directory
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize, max_open_pages: usize) -> Result<Self> {
        let marker_dir = TransactionalStore::default_marker_dir(path.as_ref());
        Self::open_with_marker_dir(path, marker_dir, page_size, max_open_pages)
    }

    pub fn open_with_marker_dir<P: AsRef<Path>, D: AsRef<Path>>(
        path: P,
        marker_dir: D,
        page_size: usize,
        max_open_pages: usize,
    ) -> Result<Self> {
        let store = TransactionalStore::open(path, marker_dir, page_size)?;
        let list = PagedList::new(store, page_size, max_open_pages)?;
        Ok(TransactionalBuffer { list })
    }

    /// Make every change since the last commit durable in the committed file
    pub fn commit(&mut self) -> Result<()> {
        self.list.flush()?;
        self.list.store_mut().commit()
    }

    /// Discard every change since the last commit
    pub fn rollback(&mut self) -> Result<()> {
        self.list.store_mut().rollback()?;
        self.list.discard_and_reload()
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.list.store().has_uncommitted_changes()
            || self.list.pages().iter().any(|page| page.dirty)
    }

    pub fn path(&self) -> &Path {
        self.list.store().path()
    }

    pub fn validate_pages(&self) -> Result<()> {
        self.list.validate_pages()
    }
}

impl RangeList<u8> for TransactionalBuffer {
    fn len(&self) -> usize {
        self.list.len()
    }

    fn read_range(&mut self, index: usize, count: usize) -> Result<Vec<u8>> {
        self.list.read_range(index, count)
    }

    fn read_into(&mut self, index: usize, dest: &mut [u8]) -> Result<()> {
        self.list.read_into(index, dest)
    }

    fn add_range(&mut self, items: &[u8]) -> Result<()> {
        self.list.add_range(items)
    }

    fn insert_range(&mut self, index: usize, items: &[u8]) -> Result<()> {
        self.list.insert_range(index, items)
    }

    fn update_range(&mut self, index: usize, items: &[u8]) -> Result<()> {
        self.list.update_range(index, items)
    }

    fn remove_range(&mut self, index: usize, count: usize) -> Result<()> {
        self.list.remove_range(index, count)
    }

    fn truncate(&mut self, len: usize) -> Result<()> {
        self.list.truncate(len)
    }

    /// Persists dirty pages as shadow pages; the committed file is untouched
    fn flush(&mut self) -> Result<()> {
        self.list.flush()
    }
}

impl PagedRangeList<u8> for TransactionalBuffer {
    fn page_size(&self) -> usize {
        self.list.page_size()
    }

    fn pages(&self) -> &[PageMeta] {
        self.list.pages()
    }

    fn page_items(&mut self, number: usize) -> Result<Vec<u8>> {
        self.list.page_items(number)
    }

    fn subscribe(&mut self, observer: Arc<dyn PageObserver<u8>>) {
        self.list.subscribe(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_in(dir: &TempDir) -> PathBuf {
        dir.path().join("data.bin")
    }

    #[test]
    fn test_changes_invisible_until_commit() {
        let dir = TempDir::new().unwrap();
        let path = file_in(&dir);
        std::fs::write(&path, b"committed").unwrap();

        let mut buffer = TransactionalBuffer::open(&path, 4, 2).unwrap();
        buffer.update_range(0, b"COMM").unwrap();
        buffer.add_range(b"+more").unwrap();
        buffer.flush().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"committed");
        assert!(buffer.has_uncommitted_changes());

        buffer.commit().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"COMMitted+more");
        assert!(!buffer.has_uncommitted_changes());
    }

    #[test]
    fn test_rollback_restores_committed_state() {
        let dir = TempDir::new().unwrap();
        let path = file_in(&dir);
        std::fs::write(&path, b"0123456789").unwrap();

        let mut buffer = TransactionalBuffer::open(&path, 4, 1).unwrap();
        buffer.remove_range(2, 6).unwrap();
        buffer.add_range(b"abcdefgh").unwrap();
        assert_eq!(buffer.read_range(0, 4).unwrap(), b"0189".to_vec());

        buffer.rollback().unwrap();
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.read_range(0, 10).unwrap(), b"0123456789".to_vec());
        assert!(!buffer.has_uncommitted_changes());
        buffer.validate_pages().unwrap();
    }

    #[test]
    fn test_shrink_commits_deleted_pages() {
        let dir = TempDir::new().unwrap();
        let path = file_in(&dir);
        std::fs::write(&path, vec![9u8; 20]).unwrap();

        let mut buffer = TransactionalBuffer::open(&path, 4, 2).unwrap();
        buffer.truncate(6).unwrap();
        buffer.flush().unwrap();

        let store = buffer.list.store();
        assert!(store.markers().has_marker(2, MarkerType::DeletedPage));
        assert!(store.markers().has_marker(4, MarkerType::DeletedPage));
        assert!(store.markers().has_marker(1, MarkerType::UncommittedPage));
        assert_eq!(store.logical_page_count(), 2);

        buffer.commit().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![9u8; 6]);
    }

    #[test]
    fn test_pending_transaction_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = file_in(&dir);
        std::fs::write(&path, b"abcd").unwrap();

        {
            let mut buffer = TransactionalBuffer::open(&path, 4, 2).unwrap();
            buffer.add_range(b"efgh").unwrap();
            // dropped without commit
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"abcd");

        let mut buffer = TransactionalBuffer::open(&path, 4, 2).unwrap();
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.read_range(0, 8).unwrap(), b"abcdefgh".to_vec());

        buffer.rollback().unwrap();
        assert_eq!(buffer.read_range(0, buffer.len()).unwrap(), b"abcd".to_vec());
    }

    #[test]
    fn test_interrupted_commit_rolls_forward() {
        let dir = TempDir::new().unwrap();
        let path = file_in(&dir);
        std::fs::write(&path, b"old!old!").unwrap();

        {
            let mut buffer = TransactionalBuffer::open(&path, 4, 2).unwrap();
            buffer.update_range(4, b"new!").unwrap();
            buffer.flush().unwrap();
            // Simulate a crash right after the commit marker was written
            buffer.list.store().markers().begin_commit().unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"old!old!");

        let buffer = TransactionalBuffer::open(&path, 4, 2).unwrap();
        assert!(!buffer.has_uncommitted_changes());
        assert!(!buffer.list.store().markers().commit_in_progress());
        drop(buffer);
        assert_eq!(std::fs::read(&path).unwrap(), b"old!new!");
    }

    #[test]
    fn test_mismatched_page_size_rejected() {
        let dir = TempDir::new().unwrap();
        let path = file_in(&dir);
        let store = TransactionalStore::open(&path, dir.path().join("m"), 8).unwrap();
        assert!(PagedList::<u8, _>::new(store, 4, 2).is_err());
    }
}
