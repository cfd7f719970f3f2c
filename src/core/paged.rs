//! Paged list engine
//!
//! [`PagedList`] presents one logical sequence split into fixed-capacity pages. Only a
//! bounded number of pages are resident at once; the rest live in a [`PageStore`].
//!
//! ## Invariants
//!
//! - page ranges partition `[0, len)` with no gaps or overlaps
//! - every page except the last holds exactly `page_size` items
//! - no page is empty
//! - resident pages never exceed the pool capacity
//!
//! Because every page but the last is full, the page holding item `i` is always
//! `i / page_size`. Bulk operations are decomposed into [`PageSegment`]s and applied
//! one page at a time, loading (and evicting) pages as they are touched.

use crate::buffer_pool::{ResidentPool, ResidentPoolStats};
use crate::error::{PlexusError, Result};
use crate::list::{check_insert, check_range, RangeList};
use crate::page::{PageEvent, PageMeta, PageObserver, PageObservers, PageState};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Backing store for the pages of a [`PagedList`]
pub trait PageStore<T> {
    /// Item counts of the pages already persisted, in page order
    fn persisted_page_sizes(&self, page_size: usize) -> Result<Vec<usize>>;

    /// Read the contents of a page
    fn load_page(&mut self, page: &PageMeta) -> Result<Vec<T>>;

    /// Persist the contents of a dirty page
    fn save_page(&mut self, page: &PageMeta, items: &[T]) -> Result<()>;

    /// A trailing page was removed from the sequence
    fn delete_page(&mut self, _page: &PageMeta) -> Result<()> {
        Ok(())
    }

    /// The sequence shrank to `total_items`
    fn truncate(&mut self, _total_items: usize) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Volatile stores keep every page resident and never load or save
    fn is_volatile(&self) -> bool {
        false
    }
}

/// Page-level view exposed by paged lists and their decorators
pub trait PagedRangeList<T: Clone>: RangeList<T> {
    /// Maximum items per page
    fn page_size(&self) -> usize;

    fn pages(&self) -> &[PageMeta];

    /// Contents of one page (loading it if needed)
    fn page_items(&mut self, number: usize) -> Result<Vec<T>>;

    fn subscribe(&mut self, observer: Arc<dyn PageObserver<T>>);
}

/// The part of one bulk operation that falls inside a single page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSegment {
    pub page: usize,
    pub local_start: usize,
    pub local_count: usize,
}

/// A logical sequence of items stored in fixed-capacity pages
pub struct PagedList<T: Clone, S: PageStore<T>> {
    store: S,
    page_size: usize,
    pages: Vec<PageMeta>,
    contents: HashMap<usize, Vec<T>>,
    pool: ResidentPool,
    observers: PageObservers<T>,
    count: usize,
}

impl<T: Clone, S: PageStore<T>> PagedList<T, S> {
    /// Open a paged list over `store`, deriving page boundaries from what it holds
    ///
    /// # Arguments
    /// * `page_size` - Items per page
    /// * `max_open_pages` - Maximum resident pages (ignored for volatile stores)
    pub fn new(store: S, page_size: usize, max_open_pages: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(PlexusError::InvalidConfig(
                "page size must be non-zero".to_string(),
            ));
        }

        let pool = if store.is_volatile() {
            ResidentPool::unbounded()
        } else {
            ResidentPool::new(max_open_pages)
        };

        let mut list = PagedList {
            store,
            page_size,
            pages: Vec::new(),
            contents: HashMap::new(),
            pool,
            observers: PageObservers::new(),
            count: 0,
        };
        list.load_page_table()?;

        debug!(
            pages = list.pages.len(),
            items = list.count,
            page_size,
            "Opened paged list"
        );
        Ok(list)
    }

    fn item_width() -> usize {
        std::mem::size_of::<T>().max(1)
    }

    fn load_page_table(&mut self) -> Result<()> {
        let sizes = self.store.persisted_page_sizes(self.page_size)?;
        let last = sizes.len().saturating_sub(1);

        self.pages.clear();
        let mut start = 0;
        for (number, &size) in sizes.iter().enumerate() {
            if size == 0 || size > self.page_size || (size < self.page_size && number != last) {
                return Err(PlexusError::CorruptPageTable(format!(
                    "page {} holds {} items (page size {}, {} pages)",
                    number,
                    size,
                    self.page_size,
                    sizes.len()
                )));
            }
            let mut meta = PageMeta::new(number, start, self.page_size, Self::item_width());
            meta.count = size;
            start += size;
            self.pages.push(meta);
        }
        self.count = start;
        Ok(())
    }

    /// Decompose `[index, index + count)` into page-local segments
    pub fn segments(&self, index: usize, count: usize) -> Result<Vec<PageSegment>> {
        check_range(index, count, self.count)?;

        let mut segments = Vec::new();
        let mut cursor = index;
        let mut remaining = count;
        while remaining > 0 {
            let page = &self.pages[cursor / self.page_size];
            let local_start = cursor - page.start_index;
            let local_count = (page.count - local_start).min(remaining);
            segments.push(PageSegment {
                page: page.number,
                local_start,
                local_count,
            });
            cursor += local_count;
            remaining -= local_count;
        }

        trace!(index, count, segments = segments.len(), "Decomposed range");
        Ok(segments)
    }

    /// Make a page resident, evicting the least-recently-used page if the pool is full
    fn open_page(&mut self, number: usize) -> Result<()> {
        if self.pool.touch(number) {
            return Ok(());
        }

        self.make_room()?;

        let page = &mut self.pages[number];
        page.state = PageState::Loading;
        debug!(page = number, items = page.count, "Loading page");

        let items = match self.store.load_page(page) {
            Ok(items) => items,
            Err(e) => {
                page.state = PageState::Unloaded;
                return Err(e);
            }
        };

        if items.len() != page.count {
            page.state = PageState::Unloaded;
            return Err(PlexusError::CorruptPageTable(format!(
                "page {} loaded {} items, expected {}",
                number,
                items.len(),
                page.count
            )));
        }

        page.state = PageState::Loaded;
        page.dirty = false;
        self.contents.insert(number, items);
        self.pool.admit(number);
        self.observers.notify(PageEvent::Loaded(&self.pages[number]));
        Ok(())
    }

    fn make_room(&mut self) -> Result<()> {
        while self.pool.is_full() {
            match self.pool.pop_lru() {
                Some(victim) => self.unload_page(victim)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Save (if dirty) and drop a resident page
    ///
    /// Dirty resident pages below `number` are saved first, so the store never holds a
    /// page whose predecessor it still sees short.
    fn unload_page(&mut self, number: usize) -> Result<()> {
        if self.pages[number].dirty {
            if let Err(e) = self.save_dirty_below(number) {
                self.pool.admit(number);
                return Err(e);
            }
        }
        let items = self.contents.remove(&number).unwrap_or_default();

        let page = &mut self.pages[number];
        if page.dirty {
            debug!(page = number, items = items.len(), "Saving evicted page");
            if let Err(e) = self.store.save_page(page, &items) {
                self.contents.insert(number, items);
                self.pool.admit(number);
                return Err(e);
            }
            page.dirty = false;
        }

        self.observers.notify(PageEvent::Unloading {
            page: &self.pages[number],
            items: &items,
        });
        self.pages[number].state = PageState::Unloaded;
        Ok(())
    }

    /// Save a dirty resident page, keeping it resident
    fn save_resident(&mut self, number: usize) -> Result<()> {
        if !self.pages[number].dirty {
            return Ok(());
        }
        if let Some(items) = self.contents.get(&number) {
            self.store.save_page(&self.pages[number], items)?;
        }
        self.pages[number].dirty = false;
        Ok(())
    }

    fn save_dirty_below(&mut self, number: usize) -> Result<()> {
        let mut dirty: Vec<usize> = self
            .contents
            .keys()
            .copied()
            .filter(|&page| page < number && self.pages[page].dirty)
            .collect();
        dirty.sort_unstable();

        for page in dirty {
            self.save_resident(page)?;
        }
        Ok(())
    }

    fn mark_written(&mut self, number: usize) {
        self.pages[number].dirty = true;
        self.observers.notify(PageEvent::Written(&self.pages[number]));
    }

    /// Append a new, empty, resident page
    fn create_page(&mut self) -> Result<usize> {
        self.make_room()?;

        let number = self.pages.len();
        let mut meta = PageMeta::new(number, self.count, self.page_size, Self::item_width());
        meta.state = PageState::Loaded;
        meta.dirty = true;
        self.pages.push(meta);
        self.contents.insert(number, Vec::with_capacity(self.page_size));
        self.pool.admit(number);

        debug!(page = number, start_index = self.count, "Created page");
        self.observers.notify(PageEvent::Created(&self.pages[number]));
        Ok(number)
    }

    /// Remove the last page without saving it
    fn delete_last_page(&mut self) -> Result<()> {
        let number = match self.pages.len() {
            0 => return Ok(()),
            n => n - 1,
        };

        self.pages[number].state = PageState::Deleting;
        self.contents.remove(&number);
        self.pool.remove(number);
        self.store.delete_page(&self.pages[number])?;

        debug!(page = number, "Deleted page");
        self.observers.notify(PageEvent::Deleted(&self.pages[number]));
        self.count = self.pages[number].start_index;
        self.pages.pop();
        Ok(())
    }

    /// Append as many items as fit on page `number`.
    ///
    /// Returns whether everything fit, plus the items that did not.
    pub fn append_to_page<'a>(&mut self, number: usize, items: &'a [T]) -> Result<(bool, &'a [T])> {
        if number + 1 != self.pages.len() {
            return Err(PlexusError::InvalidOperation(format!(
                "page {} is not the last page",
                number
            )));
        }

        let free = self.page_size - self.pages[number].count;
        let take = free.min(items.len());
        if take > 0 {
            self.open_page(number)?;
            if let Some(contents) = self.contents.get_mut(&number) {
                contents.extend_from_slice(&items[..take]);
            }
            self.pages[number].count += take;
            self.count += take;
            self.mark_written(number);
        }

        Ok((take == items.len(), &items[take..]))
    }

    /// Append items to the last page only, failing if they do not all fit
    pub fn add_to_page(&mut self, number: usize, items: &[T]) -> Result<()> {
        let free = self
            .pages
            .get(number)
            .map(|page| self.page_size - page.count)
            .ok_or(PlexusError::IndexOutOfRange {
                index: number,
                count: self.pages.len(),
            })?;
        if items.len() > free {
            return Err(PlexusError::PageFull { page: number });
        }
        self.append_to_page(number, items).map(|_| ())
    }

    fn truncate_to(&mut self, new_len: usize) -> Result<()> {
        if new_len >= self.count {
            return Ok(());
        }

        while self
            .pages
            .last()
            .map_or(false, |page| page.start_index >= new_len)
        {
            self.delete_last_page()?;
        }

        if let Some(last) = self.pages.last() {
            if last.end_exclusive() > new_len {
                let number = last.number;
                let keep = new_len - last.start_index;
                self.open_page(number)?;
                if let Some(contents) = self.contents.get_mut(&number) {
                    contents.truncate(keep);
                }
                self.pages[number].count = keep;
                self.mark_written(number);
            }
        }

        self.count = new_len;
        self.store.truncate(new_len)
    }

    /// Save every dirty resident page in page order, then flush the store
    fn flush_pages(&mut self) -> Result<()> {
        self.save_dirty_below(self.pages.len())?;
        self.store.flush()
    }

    /// Drop every resident page without saving and rebuild the page table from the store
    pub(crate) fn discard_and_reload(&mut self) -> Result<()> {
        for number in (0..self.pages.len()).rev() {
            self.pages[number].state = PageState::Deleting;
            self.observers.notify(PageEvent::Deleted(&self.pages[number]));
        }
        self.contents.clear();
        self.pool.clear();
        self.load_page_table()?;

        for page in &self.pages {
            self.observers.notify(PageEvent::Created(page));
        }
        debug!(pages = self.pages.len(), items = self.count, "Reloaded page table");
        Ok(())
    }

    /// Check the page-partition invariants
    pub fn validate_pages(&self) -> Result<()> {
        let mut expected_start = 0;
        let last = self.pages.len().saturating_sub(1);

        for (i, page) in self.pages.iter().enumerate() {
            if page.number != i || page.start_index != expected_start {
                return Err(PlexusError::CorruptPageTable(format!(
                    "page {} starts at {} (expected {})",
                    i, page.start_index, expected_start
                )));
            }
            if page.count == 0 || page.count > self.page_size {
                return Err(PlexusError::CorruptPageTable(format!(
                    "page {} holds {} items",
                    i, page.count
                )));
            }
            if i != last && page.count != self.page_size {
                return Err(PlexusError::CorruptPageTable(format!(
                    "page {} is undersized but not last",
                    i
                )));
            }
            if let Some(items) = self.contents.get(&i) {
                if items.len() != page.count || !page.is_loaded() {
                    return Err(PlexusError::CorruptPageTable(format!(
                        "resident page {} holds {} items (expected {})",
                        i,
                        items.len(),
                        page.count
                    )));
                }
            }
            expected_start += page.count;
        }

        if expected_start != self.count {
            return Err(PlexusError::CorruptPageTable(format!(
                "pages cover {} items, list holds {}",
                expected_start, self.count
            )));
        }
        if self.contents.len() > self.pool.capacity() {
            return Err(PlexusError::CorruptPageTable(format!(
                "{} resident pages exceed capacity {}",
                self.contents.len(),
                self.pool.capacity()
            )));
        }
        Ok(())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Resident page numbers, most recently used first
    pub fn resident_pages(&self) -> Vec<usize> {
        self.pool.pages()
    }

    pub fn pool_stats(&self) -> ResidentPoolStats {
        self.pool.stats()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

impl<T: Clone, S: PageStore<T>> RangeList<T> for PagedList<T, S> {
    fn len(&self) -> usize {
        self.count
    }

    fn read_range(&mut self, index: usize, count: usize) -> Result<Vec<T>> {
        let mut items = Vec::with_capacity(count);
        for segment in self.segments(index, count)? {
            self.open_page(segment.page)?;
            if let Some(contents) = self.contents.get(&segment.page) {
                let end = segment.local_start + segment.local_count;
                items.extend_from_slice(&contents[segment.local_start..end]);
            }
        }
        Ok(items)
    }

    fn read_into(&mut self, index: usize, dest: &mut [T]) -> Result<()> {
        let mut offset = 0;
        for segment in self.segments(index, dest.len())? {
            self.open_page(segment.page)?;
            if let Some(contents) = self.contents.get(&segment.page) {
                let end = segment.local_start + segment.local_count;
                dest[offset..offset + segment.local_count]
                    .clone_from_slice(&contents[segment.local_start..end]);
            }
            offset += segment.local_count;
        }
        Ok(())
    }

    fn add_range(&mut self, items: &[T]) -> Result<()> {
        let mut remaining = items;
        while !remaining.is_empty() {
            let last = match self.pages.last() {
                Some(page) if page.count < self.page_size => page.number,
                _ => self.create_page()?,
            };
            let (fit, overflow) = self.append_to_page(last, remaining)?;
            if fit {
                break;
            }
            remaining = overflow;
        }
        Ok(())
    }

    fn insert_range(&mut self, index: usize, items: &[T]) -> Result<()> {
        check_insert(index, self.count)?;
        if items.is_empty() {
            return Ok(());
        }
        if index == self.count {
            return self.add_range(items);
        }

        // Every page but the last is full, so each one pushes exactly `items.len()`
        // items onto the next and only the carry is ever held outside a page.
        let mut number = index / self.page_size;
        let mut local = index - self.pages[number].start_index;
        let mut carry = items.to_vec();
        while number < self.pages.len() && !carry.is_empty() {
            self.open_page(number)?;
            let mut grown = 0;
            if let Some(contents) = self.contents.get_mut(&number) {
                let before = contents.len();
                contents.splice(local..local, carry.drain(..));
                carry = contents.split_off(self.page_size.min(contents.len()));
                grown = contents.len() - before;
            }
            self.pages[number].count += grown;
            self.count += grown;
            self.mark_written(number);

            number += 1;
            local = 0;
        }
        self.add_range(&carry)
    }

    fn update_range(&mut self, index: usize, items: &[T]) -> Result<()> {
        let mut offset = 0;
        for segment in self.segments(index, items.len())? {
            self.open_page(segment.page)?;
            if let Some(contents) = self.contents.get_mut(&segment.page) {
                let end = segment.local_start + segment.local_count;
                contents[segment.local_start..end]
                    .clone_from_slice(&items[offset..offset + segment.local_count]);
            }
            offset += segment.local_count;
            self.mark_written(segment.page);
        }
        Ok(())
    }

    fn remove_range(&mut self, index: usize, count: usize) -> Result<()> {
        check_range(index, count, self.count)?;
        if count == 0 {
            return Ok(());
        }

        // Shift the tail down at most one source page at a time
        let len = self.count;
        let mut source = index + count;
        let mut target = index;
        while source < len {
            let chunk = (self.page_size - source % self.page_size).min(len - source);
            let moved = self.read_range(source, chunk)?;
            self.update_range(target, &moved)?;
            source += chunk;
            target += chunk;
        }
        self.truncate_to(len - count)
    }

    fn truncate(&mut self, len: usize) -> Result<()> {
        self.truncate_to(len)
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_pages()
    }
}

impl<T: Clone, S: PageStore<T>> PagedRangeList<T> for PagedList<T, S> {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn pages(&self) -> &[PageMeta] {
        &self.pages
    }

    fn page_items(&mut self, number: usize) -> Result<Vec<T>> {
        if number >= self.pages.len() {
            return Err(PlexusError::IndexOutOfRange {
                index: number,
                count: self.pages.len(),
            });
        }
        self.open_page(number)?;
        Ok(self.contents.get(&number).cloned().unwrap_or_default())
    }

    fn subscribe(&mut self, observer: Arc<dyn PageObserver<T>>) {
        self.observers.subscribe(observer);
    }
}

impl<T: Clone, S: PageStore<T>> Drop for PagedList<T, S> {
    fn drop(&mut self) {
        if let Err(e) = self.flush_pages() {
            warn!("Failed to flush paged list on drop: {}", e);
        }
    }
}
