use super::index::KeyColumn;
use super::{Attachment, AttachmentCore, AttachmentState, ItemAttachment, ItemEvent};
use crate::error::{PlexusError, Result};
use crate::list::RangeList;
use crate::serializer::ItemSerializer;
use crate::streams::ClusteredStreams;
use ahash::AHashMap;
use std::any::Any;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// Key to item-index map that refuses a second live item with the same key
///
/// Duplicates are rejected in the before-hooks, so a refused add, update or insert leaves
/// the list untouched. Reaping an item frees its key.
pub struct UniqueKeyIndex<T, K, KS, B>
where
    KS: ItemSerializer<K>,
    B: RangeList<u8>,
{
    core: AttachmentCore<B>,
    key_of: Box<dyn Fn(&T) -> K>,
    column: KeyColumn<K, KS, B>,
    map: AHashMap<K, usize>,
}

impl<T, K, KS, B> UniqueKeyIndex<T, K, KS, B>
where
    K: Clone + Eq + Hash + Debug,
    KS: ItemSerializer<K> + Clone,
    B: RangeList<u8>,
{
    pub fn new(
        id: &str,
        container: Arc<ClusteredStreams<B>>,
        stream: usize,
        key_serializer: KS,
        key_of: impl Fn(&T) -> K + 'static,
    ) -> Result<Self> {
        Ok(UniqueKeyIndex {
            core: AttachmentCore::new(id, container, stream)?,
            key_of: Box::new(key_of),
            column: KeyColumn::new(key_serializer)?,
            map: AHashMap::new(),
        })
    }

    /// Index of the live item with `key`
    pub fn lookup(&self, key: &K) -> Result<Option<usize>> {
        self.core.check_attached()?;
        Ok(self.map.get(key).copied())
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.core.check_attached()?;
        Ok(self.map.contains_key(key))
    }

    pub fn len(&self) -> Result<usize> {
        self.core.check_attached()?;
        Ok(self.map.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn snapshot(&self) -> Result<AHashMap<K, usize>> {
        self.core.check_attached()?;
        Ok(self.map.clone())
    }

    /// Fail if `key` does not fit the column or belongs to a live item other than `index`
    fn check_unique(&self, key: &K, index: Option<usize>) -> Result<()> {
        self.core.check_attached()?;
        self.column.check_key(key)?;
        match self.map.get(key) {
            Some(&owner) if Some(owner) != index => {
                Err(PlexusError::DuplicateKey(format!("{:?}", key)))
            }
            _ => Ok(()),
        }
    }

    fn release(&mut self, key: &K, index: usize) {
        if self.map.get(key) == Some(&index) {
            self.map.remove(key);
        }
    }

    fn rebuild(&mut self) -> Result<()> {
        let live = self.column.live(&self.core)?;
        self.map.clear();
        for (index, key) in live {
            if self.map.contains_key(&key) {
                return Err(PlexusError::DuplicateKey(format!("{:?}", key)));
            }
            self.map.insert(key, index);
        }
        debug!(id = self.core.id(), keys = self.map.len(), "Rebuilt unique key index");
        Ok(())
    }
}

impl<T, K, KS, B> Attachment for UniqueKeyIndex<T, K, KS, B>
where
    K: Clone + Eq + Hash + Debug,
    KS: ItemSerializer<K> + Clone,
    B: RangeList<u8>,
{
    fn id(&self) -> &str {
        self.core.id()
    }

    fn is_attached(&self) -> bool {
        self.core.is_attached()
    }

    fn attach(&mut self) -> Result<()> {
        self.core.check_detached()?;
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();

        self.column.open(&self.core)?;
        if let Err(e) = self.rebuild() {
            self.column.discard();
            self.map.clear();
            return Err(e);
        }
        self.core.set_state(AttachmentState::Attached);
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.core.check_attached()?;
        self.column.close()?;
        self.map.clear();
        self.core.set_state(AttachmentState::Detached);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.core.check_attached()?;
        self.column.keys(&self.core)?.flush()
    }
}

impl<T, K, KS, B> ItemAttachment<T> for UniqueKeyIndex<T, K, KS, B>
where
    T: 'static,
    K: Clone + Eq + Hash + Debug + 'static,
    KS: ItemSerializer<K> + Clone + 'static,
    B: RangeList<u8> + 'static,
{
    fn before_add(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        self.check_unique(&(self.key_of)(event.item), None)
    }

    fn before_update(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        self.check_unique(&(self.key_of)(event.item), Some(event.index))
    }

    fn before_insert(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        self.check_unique(&(self.key_of)(event.item), None)
    }

    fn on_added(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        let key = (self.key_of)(event.item);
        self.column.keys(&self.core)?.add(key.clone())?;
        self.map.insert(key, event.index);
        Ok(())
    }

    fn on_updated(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        let key = (self.key_of)(event.item);
        let keys = self.column.keys(&self.core)?;
        let old = keys.read(event.index)?;
        keys.update_range(event.index, std::slice::from_ref(&key))?;
        self.release(&old, event.index);
        self.map.insert(key, event.index);
        Ok(())
    }

    fn on_inserted(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        let key = (self.key_of)(event.item);
        self.column
            .keys(&self.core)?
            .insert_range(event.index, std::slice::from_ref(&key))?;
        self.rebuild()
    }

    fn on_removed(&mut self, index: usize) -> Result<()> {
        self.column.keys(&self.core)?.remove_range(index, 1)?;
        self.rebuild()
    }

    fn on_reaped(&mut self, index: usize) -> Result<()> {
        let old = self.column.keys(&self.core)?.read(index)?;
        self.release(&old, index);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
