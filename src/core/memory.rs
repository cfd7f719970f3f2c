//! In-memory backing stores
//!
//! - [`MemoryPageStore`]: volatile store, every page stays resident
//! - [`VecPageStore`]: contiguous vector holding evicted pages, useful for exercising
//!   eviction without touching disk
//! - [`MemoryList`]: contiguous list without pages at all

use crate::error::Result;
use crate::list::{check_insert, check_range, RangeList};
use crate::page::PageMeta;
use crate::paged::{PageStore, PagedList};

/// Volatile page store: pages are never loaded or saved
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryPageStore;

impl<T> PageStore<T> for MemoryPageStore {
    fn persisted_page_sizes(&self, _page_size: usize) -> Result<Vec<usize>> {
        Ok(Vec::new())
    }

    fn load_page(&mut self, _page: &PageMeta) -> Result<Vec<T>> {
        Ok(Vec::new())
    }

    fn save_page(&mut self, _page: &PageMeta, _items: &[T]) -> Result<()> {
        Ok(())
    }

    fn is_volatile(&self) -> bool {
        true
    }
}

/// Paged list whose pages all live in memory
pub type MemoryPagedList<T> = PagedList<T, MemoryPageStore>;

/// Paged byte buffer whose pages all live in memory
pub type MemoryPagedBuffer = MemoryPagedList<u8>;

impl<T: Clone> PagedList<T, MemoryPageStore> {
    pub fn in_memory(page_size: usize) -> Result<Self> {
        PagedList::new(MemoryPageStore, page_size, usize::MAX)
    }
}

/// Non-volatile store over one contiguous vector
///
/// Page `i` occupies `[i * page_size, i * page_size + count)` of the vector.
#[derive(Debug, Clone, Default)]
pub struct VecPageStore<T = u8> {
    items: Vec<T>,
}

impl<T: Clone> VecPageStore<T> {
    /// Store pre-filled with `items`
    pub fn with_items(items: Vec<T>) -> Self {
        VecPageStore { items }
    }

    /// Items written back so far
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

impl<T: Clone + Default> PageStore<T> for VecPageStore<T> {
    fn persisted_page_sizes(&self, page_size: usize) -> Result<Vec<usize>> {
        let full = self.items.len() / page_size;
        let mut sizes = vec![page_size; full];
        let rest = self.items.len() % page_size;
        if rest > 0 {
            sizes.push(rest);
        }
        Ok(sizes)
    }

    fn load_page(&mut self, page: &PageMeta) -> Result<Vec<T>> {
        let start = page.start_index;
        let end = (start + page.count).min(self.items.len());
        let mut items = self.items[start.min(end)..end].to_vec();
        items.resize(page.count, T::default());
        Ok(items)
    }

    fn save_page(&mut self, page: &PageMeta, items: &[T]) -> Result<()> {
        let start = page.start_index;
        let end = start + items.len();
        if self.items.len() < end {
            self.items.resize(end, T::default());
        }
        self.items[start..end].clone_from_slice(items);
        Ok(())
    }

    fn truncate(&mut self, total_items: usize) -> Result<()> {
        self.items.truncate(total_items);
        Ok(())
    }
}

/// Contiguous in-memory list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryList<T> {
    items: Vec<T>,
}

/// Contiguous in-memory byte buffer
pub type MemoryBuffer = MemoryList<u8>;

impl<T: Clone> MemoryList<T> {
    pub fn new() -> Self {
        MemoryList { items: Vec::new() }
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        MemoryList { items }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }
}

impl<T: Clone> RangeList<T> for MemoryList<T> {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn read_range(&mut self, index: usize, count: usize) -> Result<Vec<T>> {
        check_range(index, count, self.items.len())?;
        Ok(self.items[index..index + count].to_vec())
    }

    fn read_into(&mut self, index: usize, dest: &mut [T]) -> Result<()> {
        check_range(index, dest.len(), self.items.len())?;
        dest.clone_from_slice(&self.items[index..index + dest.len()]);
        Ok(())
    }

    fn add_range(&mut self, items: &[T]) -> Result<()> {
        self.items.extend_from_slice(items);
        Ok(())
    }

    fn insert_range(&mut self, index: usize, items: &[T]) -> Result<()> {
        check_insert(index, self.items.len())?;
        self.items.splice(index..index, items.iter().cloned());
        Ok(())
    }

    fn update_range(&mut self, index: usize, items: &[T]) -> Result<()> {
        check_range(index, items.len(), self.items.len())?;
        self.items[index..index + items.len()].clone_from_slice(items);
        Ok(())
    }

    fn remove_range(&mut self, index: usize, count: usize) -> Result<()> {
        check_range(index, count, self.items.len())?;
        self.items.drain(index..index + count);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paged::PagedRangeList;

    #[test]
    fn test_memory_list_operations() {
        let mut list = MemoryBuffer::new();
        list.add_range(b"hello").unwrap();
        list.insert_range(0, b">> ").unwrap();
        list.update_range(3, b"J").unwrap();
        list.remove_range(0, 3).unwrap();
        assert_eq!(list.as_slice(), b"Jello");

        let mut dest = [0u8; 3];
        list.read_into(1, &mut dest).unwrap();
        assert_eq!(&dest, b"ell");
    }

    #[test]
    fn test_in_memory_paged_list() {
        let mut list = MemoryPagedList::<u64>::in_memory(3).unwrap();
        list.add_range(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(list.page_count(), 3);
        assert_eq!(list.page_items(2).unwrap(), vec![7]);
        list.remove_range(1, 5).unwrap();
        assert_eq!(list.read_range(0, 2).unwrap(), vec![1, 7]);
        list.validate_pages().unwrap();
    }

    #[test]
    fn test_vec_store_persists_evicted_pages() {
        let mut list = PagedList::new(VecPageStore::<u8>::default(), 4, 1).unwrap();
        list.add_range(b"0123456789").unwrap();
        list.flush().unwrap();
        assert_eq!(list.store().items(), b"0123456789");

        list.truncate(6).unwrap();
        list.flush().unwrap();
        assert_eq!(list.store().items(), b"012345");
    }

    #[test]
    fn test_vec_store_derives_pages_from_contents() {
        let store = VecPageStore::with_items(b"abcdefghij".to_vec());
        let mut list = PagedList::new(store, 4, 2).unwrap();
        let counts: Vec<_> = list.pages().iter().map(|p| p.count).collect();
        assert_eq!(counts, vec![4, 4, 2]);
        assert_eq!(list.read_range(3, 4).unwrap(), b"defg".to_vec());
    }
}
