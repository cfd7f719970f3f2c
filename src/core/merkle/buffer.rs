use super::{Digest, FlatMerkleTree, HashAlgorithm, MerkleCoordinate, ZERO_DIGEST};
use crate::bitmap::PageBitmap;
use crate::error::Result;
use crate::list::RangeList;
use crate::page::{PageEvent, PageMeta, PageObserver};
use crate::paged::PagedRangeList;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

struct LeafState {
    tree: FlatMerkleTree,
    /// Pages whose leaf is stale
    dirty: PageBitmap,
}

/// Observer keeping one leaf per page in step with the wrapped buffer
struct LeafTracker {
    algorithm: HashAlgorithm,
    state: Mutex<LeafState>,
}

impl PageObserver<u8> for LeafTracker {
    fn on_page_event(&self, event: &PageEvent<'_, u8>) {
        let mut state = self.state.lock();
        match event {
            PageEvent::Created(page) => {
                state.tree.truncate(page.number);
                while state.dirty.len() > page.number {
                    state.dirty.pop();
                }
                state.tree.add_leaf(ZERO_DIGEST);
                state.dirty.push(true);
            }
            PageEvent::Written(page) => {
                state.dirty.set(page.number, true);
            }
            PageEvent::Unloading { page, items } => {
                if state.dirty.get(page.number) {
                    let leaf = self.algorithm.hash(items);
                    if state.tree.update_leaf(page.number, leaf).is_ok() {
                        state.dirty.set(page.number, false);
                        trace!(page = page.number, "Recomputed leaf on eviction");
                    }
                }
            }
            PageEvent::Deleted(page) => {
                state.tree.truncate(page.number);
                while state.dirty.len() > page.number {
                    state.dirty.pop();
                }
            }
            PageEvent::Loaded(_) => {}
        }
    }
}

/// Paged byte buffer carrying a Merkle tree with one leaf per page
///
/// Leaves are `H(page bytes)`. A page write only flags its leaf; leaves are recomputed
/// when the page is evicted, or for every flagged page when the root or a node is read.
pub struct MerkleBuffer<B: PagedRangeList<u8>> {
    inner: B,
    tracker: Arc<LeafTracker>,
}

impl<B: PagedRangeList<u8>> MerkleBuffer<B> {
    /// Wrap `inner`; leaves of pages it already holds are computed on first read
    pub fn new(mut inner: B, algorithm: HashAlgorithm) -> Self {
        let page_count = inner.pages().len();
        let mut dirty = PageBitmap::new(page_count);
        for page in 0..page_count {
            dirty.set(page, true);
        }

        let tracker = Arc::new(LeafTracker {
            algorithm,
            state: Mutex::new(LeafState {
                tree: FlatMerkleTree::from_leaves(algorithm, vec![ZERO_DIGEST; page_count]),
                dirty,
            }),
        });
        inner.subscribe(tracker.clone());

        debug!(pages = page_count, ?algorithm, "Wrapped paged buffer with Merkle tree");
        MerkleBuffer { inner, tracker }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.tracker.algorithm
    }

    /// Recompute the leaf of every page written since its last digest
    fn refresh_leaves(&mut self) -> Result<()> {
        let stale: Vec<usize> = self.tracker.state.lock().dirty.iter_set().collect();
        if stale.is_empty() {
            return Ok(());
        }

        for number in stale {
            // An eviction triggered by an earlier page_items call may have handled it
            if !self.tracker.state.lock().dirty.get(number) {
                continue;
            }
            let items = self.inner.page_items(number)?;
            let leaf = self.tracker.algorithm.hash(&items);

            let mut state = self.tracker.state.lock();
            state.tree.update_leaf(number, leaf)?;
            state.dirty.set(number, false);
        }
        Ok(())
    }

    /// Apex digest over every page, or `None` for an empty buffer
    pub fn root(&mut self) -> Result<Option<Digest>> {
        self.refresh_leaves()?;
        Ok(self.tracker.state.lock().tree.root())
    }

    pub fn node(&mut self, coordinate: MerkleCoordinate) -> Result<Option<Digest>> {
        self.refresh_leaves()?;
        Ok(self.tracker.state.lock().tree.node(coordinate))
    }

    pub fn leaf_count(&self) -> usize {
        self.tracker.state.lock().tree.leaf_count()
    }

    /// Pages whose leaf has not been recomputed since they were written
    pub fn stale_leaf_count(&self) -> usize {
        self.tracker.state.lock().dirty.count_set()
    }

    /// Root recomputed from scratch by hashing every page
    pub fn compute_root_from_scratch(&mut self) -> Result<Option<Digest>> {
        let mut leaves = Vec::with_capacity(self.inner.pages().len());
        for number in 0..self.inner.pages().len() {
            leaves.push(self.tracker.algorithm.hash(&self.inner.page_items(number)?));
        }
        Ok(FlatMerkleTree::compute_root(self.tracker.algorithm, &leaves))
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.inner
    }
}

impl<B: PagedRangeList<u8>> RangeList<u8> for MerkleBuffer<B> {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn read_range(&mut self, index: usize, count: usize) -> Result<Vec<u8>> {
        self.inner.read_range(index, count)
    }

    fn read_into(&mut self, index: usize, dest: &mut [u8]) -> Result<()> {
        self.inner.read_into(index, dest)
    }

    fn add_range(&mut self, items: &[u8]) -> Result<()> {
        self.inner.add_range(items)
    }

    fn insert_range(&mut self, index: usize, items: &[u8]) -> Result<()> {
        self.inner.insert_range(index, items)
    }

    fn update_range(&mut self, index: usize, items: &[u8]) -> Result<()> {
        self.inner.update_range(index, items)
    }

    fn remove_range(&mut self, index: usize, count: usize) -> Result<()> {
        self.inner.remove_range(index, count)
    }

    fn truncate(&mut self, len: usize) -> Result<()> {
        self.inner.truncate(len)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

impl<B: PagedRangeList<u8>> PagedRangeList<u8> for MerkleBuffer<B> {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn pages(&self) -> &[PageMeta] {
        self.inner.pages()
    }

    fn page_items(&mut self, number: usize) -> Result<Vec<u8>> {
        self.inner.page_items(number)
    }

    fn subscribe(&mut self, observer: Arc<dyn PageObserver<u8>>) {
        self.inner.subscribe(observer);
    }
}
