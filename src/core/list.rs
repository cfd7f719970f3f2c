//! Range-oriented list capability shared by every buffer, decorator and stream-backed list.

use crate::error::{PlexusError, Result};

/// Bulk range operations over a logical sequence of items.
///
/// Reads take `&mut self` because a read may page data in (and evict other pages).
/// All index arguments must satisfy `0 <= index <= len()`.
pub trait RangeList<T: Clone> {
    /// Number of items in the sequence
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `count` items starting at `index`
    fn read_range(&mut self, index: usize, count: usize) -> Result<Vec<T>>;

    /// Read `dest.len()` items starting at `index` directly into `dest`
    fn read_into(&mut self, index: usize, dest: &mut [T]) -> Result<()>;

    /// Read a single item
    fn read(&mut self, index: usize) -> Result<T> {
        check_item(index, self.len())?;
        let mut items = self.read_range(index, 1)?;
        items
            .pop()
            .ok_or(PlexusError::IndexOutOfRange { index, count: 0 })
    }

    /// Append items to the end of the sequence
    fn add_range(&mut self, items: &[T]) -> Result<()>;

    fn add(&mut self, item: T) -> Result<()> {
        self.add_range(std::slice::from_ref(&item))
    }

    /// Insert items before `index`, shifting later items up
    fn insert_range(&mut self, index: usize, items: &[T]) -> Result<()>;

    /// Overwrite `items.len()` items starting at `index`
    fn update_range(&mut self, index: usize, items: &[T]) -> Result<()>;

    /// Remove `count` items starting at `index`, shifting later items down
    fn remove_range(&mut self, index: usize, count: usize) -> Result<()>;

    /// Shrink the sequence to `len` items (no-op if already shorter)
    fn truncate(&mut self, len: usize) -> Result<()> {
        let current = self.len();
        if len < current {
            self.remove_range(len, current - len)?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    /// Persist any deferred state
    fn flush(&mut self) -> Result<()>;
}

impl<T: Clone, L: RangeList<T> + ?Sized> RangeList<T> for &mut L {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn read_range(&mut self, index: usize, count: usize) -> Result<Vec<T>> {
        (**self).read_range(index, count)
    }

    fn read_into(&mut self, index: usize, dest: &mut [T]) -> Result<()> {
        (**self).read_into(index, dest)
    }

    fn add_range(&mut self, items: &[T]) -> Result<()> {
        (**self).add_range(items)
    }

    fn insert_range(&mut self, index: usize, items: &[T]) -> Result<()> {
        (**self).insert_range(index, items)
    }

    fn update_range(&mut self, index: usize, items: &[T]) -> Result<()> {
        (**self).update_range(index, items)
    }

    fn remove_range(&mut self, index: usize, count: usize) -> Result<()> {
        (**self).remove_range(index, count)
    }

    fn truncate(&mut self, len: usize) -> Result<()> {
        (**self).truncate(len)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Validate that `[index, index + count)` lies within a sequence of `len` items.
pub(crate) fn check_range(index: usize, count: usize, len: usize) -> Result<()> {
    match index.checked_add(count) {
        Some(end) if index <= len && end <= len => Ok(()),
        _ => Err(PlexusError::RangeOutOfBounds { index, count, len }),
    }
}

/// Validate an insertion point (`index == len` appends).
pub(crate) fn check_insert(index: usize, len: usize) -> Result<()> {
    if index > len {
        return Err(PlexusError::IndexOutOfRange { index, count: len });
    }
    Ok(())
}

/// Validate a single-item index.
pub(crate) fn check_item(index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(PlexusError::IndexOutOfRange { index, count: len });
    }
    Ok(())
}
