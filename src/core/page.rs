//! Page metadata and page lifecycle notifications
//!
//! A page is an independently loadable slice of a larger sequence. The engine owns
//! every [`PageMeta`]; contents exist only while the page is [`PageState::Loaded`].

use std::sync::Arc;

/// Lifecycle state of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageState {
    /// Contents live only in the backing store
    Unloaded = 0,
    /// Contents are being read from the backing store
    Loading = 1,
    /// Contents are resident
    Loaded = 2,
    /// Page is being removed from the sequence
    Deleting = 3,
}

/// Metadata for a single page of a paged sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMeta {
    /// Zero-based page number
    pub number: usize,

    /// Index of the first item in the logical sequence
    pub start_index: usize,

    /// Number of items held by this page
    pub count: usize,

    /// Storage offset of the first item, in bytes
    pub start_position: u64,

    /// Width of one item in storage, in bytes
    pub item_width: usize,

    /// Contents differ from the backing store
    pub dirty: bool,

    pub state: PageState,
}

impl PageMeta {
    pub(crate) fn new(number: usize, start_index: usize, page_size: usize, item_width: usize) -> Self {
        PageMeta {
            number,
            start_index,
            count: 0,
            start_position: (number as u64) * (page_size as u64) * (item_width as u64),
            item_width,
            dirty: false,
            state: PageState::Unloaded,
        }
    }

    /// Index of the last item (equal to `start_index` for an empty page)
    pub fn end_index(&self) -> usize {
        self.start_index + self.count.saturating_sub(1)
    }

    /// One past the last item index
    pub fn end_exclusive(&self) -> usize {
        self.start_index + self.count
    }

    /// Size of the page contents in bytes
    pub fn size(&self) -> u64 {
        (self.count as u64) * (self.item_width as u64)
    }

    /// Storage offset of the last byte (equal to `start_position` for an empty page)
    pub fn end_position(&self) -> u64 {
        self.start_position + self.size().saturating_sub(1)
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start_index && index < self.end_exclusive()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == PageState::Loaded
    }
}

/// Page lifecycle notification, delivered synchronously on the mutating thread
#[derive(Debug)]
pub enum PageEvent<'a, T> {
    /// A new page was appended to the sequence
    Created(&'a PageMeta),
    /// A page was read from the backing store
    Loaded(&'a PageMeta),
    /// Page contents were modified
    Written(&'a PageMeta),
    /// A page is about to leave memory; `items` are its final contents
    Unloading { page: &'a PageMeta, items: &'a [T] },
    /// A trailing page was removed from the sequence
    Deleted(&'a PageMeta),
}

/// Receiver of page lifecycle events
pub trait PageObserver<T>: Send + Sync {
    fn on_page_event(&self, event: &PageEvent<'_, T>);
}

/// Ordered list of subscribed observers
pub struct PageObservers<T> {
    observers: Vec<Arc<dyn PageObserver<T>>>,
}

impl<T> PageObservers<T> {
    pub fn new() -> Self {
        PageObservers {
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: Arc<dyn PageObserver<T>>) {
        self.observers.push(observer);
    }

    pub fn notify(&self, event: PageEvent<'_, T>) {
        for observer in &self.observers {
            observer.on_page_event(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl<T> Default for PageObservers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl PageObserver<u8> for Recorder {
        fn on_page_event(&self, event: &PageEvent<'_, u8>) {
            let label = match event {
                PageEvent::Created(p) => format!("created:{}", p.number),
                PageEvent::Loaded(p) => format!("loaded:{}", p.number),
                PageEvent::Written(p) => format!("written:{}", p.number),
                PageEvent::Unloading { page, items } => {
                    format!("unloading:{}:{}", page.number, items.len())
                }
                PageEvent::Deleted(p) => format!("deleted:{}", p.number),
            };
            self.seen.lock().push(label);
        }
    }

    #[test]
    fn test_page_meta_positions() {
        let mut page = PageMeta::new(2, 20, 10, 4);
        assert_eq!(page.start_position, 80);
        assert_eq!(page.end_index(), 20);
        page.count = 10;
        assert_eq!(page.end_index(), 29);
        assert_eq!(page.size(), 40);
        assert_eq!(page.end_position(), 119);
        assert!(page.contains(25));
        assert!(!page.contains(30));
    }

    #[test]
    fn test_observers_receive_events_in_order() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let mut observers = PageObservers::new();
        observers.subscribe(recorder.clone());

        let page = PageMeta::new(0, 0, 8, 1);
        observers.notify(PageEvent::Created(&page));
        observers.notify(PageEvent::Written(&page));
        observers.notify(PageEvent::Unloading {
            page: &page,
            items: &[1, 2, 3],
        });

        assert_eq!(
            *recorder.seen.lock(),
            vec!["created:0", "written:0", "unloading:0:3"]
        );
    }
}
