use super::{Attachment, AttachmentCore, AttachmentState, ItemAttachment, ItemEvent};
use crate::error::{PlexusError, Result};
use crate::list::RangeList;
use crate::serializer::ItemSerializer;
use crate::stream_list::StreamList;
use crate::streams::ClusteredStreams;
use ahash::AHashMap;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// One stored key per item, kept in the attachment's reserved stream
///
/// Keys of reaped items stay in the column; readers skip them by checking the item
/// stream's traits.
pub(super) struct KeyColumn<K, KS: ItemSerializer<K>, B: RangeList<u8>> {
    serializer: KS,
    keys: Option<StreamList<K, KS, B>>,
}

impl<K: Clone, KS: ItemSerializer<K> + Clone, B: RangeList<u8>> KeyColumn<K, KS, B> {
    pub(super) fn new(serializer: KS) -> Result<Self> {
        if !serializer.is_constant_size() {
            return Err(PlexusError::VariableSizeSerializer);
        }
        Ok(KeyColumn {
            serializer,
            keys: None,
        })
    }

    pub(super) fn open(&mut self, core: &AttachmentCore<B>) -> Result<()> {
        let keys = StreamList::new(
            Arc::clone(core.container()),
            core.stream(),
            self.serializer.clone(),
        )?;
        self.keys = Some(keys);
        Ok(())
    }

    pub(super) fn close(&mut self) -> Result<()> {
        if let Some(mut keys) = self.keys.take() {
            keys.flush()?;
        }
        Ok(())
    }

    /// Fail unless `key` serializes to exactly the column's item width
    pub(super) fn check_key(&self, key: &K) -> Result<()> {
        let bytes = self.serializer.serialize(key)?;
        match self.serializer.constant_size() {
            Some(expected) if expected != bytes.len() => Err(PlexusError::SerializerSizeMismatch {
                expected,
                actual: bytes.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Drop the open list without flushing (failed attach)
    pub(super) fn discard(&mut self) {
        self.keys = None;
    }

    pub(super) fn keys(&mut self, core: &AttachmentCore<B>) -> Result<&mut StreamList<K, KS, B>> {
        self.keys
            .as_mut()
            .ok_or_else(|| PlexusError::NotAttached(core.id().to_string()))
    }

    /// `(item index, key)` of every item whose stream is not reaped
    pub(super) fn live(&mut self, core: &AttachmentCore<B>) -> Result<Vec<(usize, K)>> {
        let keys = self.keys(core)?;
        let count = keys.len();
        core.check_entry_count(count)?;

        let stored = keys.read_range(0, count)?;
        let mut live = Vec::with_capacity(count);
        for (index, key) in stored.into_iter().enumerate() {
            if !core.is_item_reaped(index)? {
                live.push((index, key));
            }
        }
        Ok(live)
    }
}

/// Key to item-index multimap over a stream-mapped list
///
/// Adds and updates adjust the map in place; inserts and removes shift item indices, so
/// the map is rebuilt from the stored key column. Reaped items drop out of the map.
pub struct KeyIndex<T, K, KS, B>
where
    KS: ItemSerializer<K>,
    B: RangeList<u8>,
{
    core: AttachmentCore<B>,
    key_of: Box<dyn Fn(&T) -> K>,
    column: KeyColumn<K, KS, B>,
    map: AHashMap<K, BTreeSet<usize>>,
}

impl<T, K, KS, B> KeyIndex<T, K, KS, B>
where
    K: Clone + Eq + Hash + Debug,
    KS: ItemSerializer<K> + Clone,
    B: RangeList<u8>,
{
    /// Detached index over reserved `stream`; `key_serializer` must be constant-size
    pub fn new(
        id: &str,
        container: Arc<ClusteredStreams<B>>,
        stream: usize,
        key_serializer: KS,
        key_of: impl Fn(&T) -> K + 'static,
    ) -> Result<Self> {
        Ok(KeyIndex {
            core: AttachmentCore::new(id, container, stream)?,
            key_of: Box::new(key_of),
            column: KeyColumn::new(key_serializer)?,
            map: AHashMap::new(),
        })
    }

    /// Indices of the live items with `key`, ascending
    pub fn lookup(&self, key: &K) -> Result<Vec<usize>> {
        self.core.check_attached()?;
        Ok(self
            .map
            .get(key)
            .map(|indices| indices.iter().copied().collect())
            .unwrap_or_default())
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.core.check_attached()?;
        Ok(self.map.contains_key(key))
    }

    /// Distinct keys of live items
    pub fn key_count(&self) -> Result<usize> {
        self.core.check_attached()?;
        Ok(self.map.len())
    }

    /// Stored key of item `index`, reaped items included
    pub fn key_at(&mut self, index: usize) -> Result<K> {
        self.core.check_attached()?;
        self.column.keys(&self.core)?.read(index)
    }

    /// Copy of the whole map
    pub fn snapshot(&self) -> Result<AHashMap<K, BTreeSet<usize>>> {
        self.core.check_attached()?;
        Ok(self.map.clone())
    }

    fn associate(&mut self, key: K, index: usize) {
        self.map.entry(key).or_default().insert(index);
    }

    fn dissociate(&mut self, key: &K, index: usize) {
        if let Some(indices) = self.map.get_mut(key) {
            indices.remove(&index);
            if indices.is_empty() {
                self.map.remove(key);
            }
        }
    }

    fn check_item(&self, item: &T) -> Result<()> {
        self.core.check_attached()?;
        self.column.check_key(&(self.key_of)(item))
    }

    fn rebuild(&mut self) -> Result<()> {
        let live = self.column.live(&self.core)?;
        self.map.clear();
        for (index, key) in live {
            self.associate(key, index);
        }
        debug!(id = self.core.id(), keys = self.map.len(), "Rebuilt key index");
        Ok(())
    }
}

impl<T, K, KS, B> Attachment for KeyIndex<T, K, KS, B>
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

impl<T, K, KS, B> ItemAttachment<T> for KeyIndex<T, K, KS, B>
where
    T: 'static,
    K: Clone + Eq + Hash + Debug + 'static,
    KS: ItemSerializer<K> + Clone + 'static,
    B: RangeList<u8> + 'static,
{
    fn before_add(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        self.check_item(event.item)
    }

    fn before_update(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        self.check_item(event.item)
    }

    fn before_insert(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        self.check_item(event.item)
    }

    fn on_added(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        let key = (self.key_of)(event.item);
        self.column.keys(&self.core)?.add(key.clone())?;
        self.associate(key, event.index);
        Ok(())
    }

    fn on_updated(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        let key = (self.key_of)(event.item);
        let keys = self.column.keys(&self.core)?;
        let old = keys.read(event.index)?;
        keys.update_range(event.index, std::slice::from_ref(&key))?;
        self.dissociate(&old, event.index);
        self.associate(key, event.index);
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
        self.dissociate(&old, index);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBuffer;
    use crate::options::ContainerOptions;
    use crate::serializer::{PaddedStringSerializer, U32Serializer};

    fn container() -> Arc<ClusteredStreams<MemoryBuffer>> {
        let options = ContainerOptions {
            cluster_size: 32,
            reserved_streams: 1,
            ..ContainerOptions::default()
        };
        Arc::new(ClusteredStreams::create(MemoryBuffer::new(), &options).unwrap())
    }

    #[test]
    fn test_detached_index_rejects_reads() {
        let index: KeyIndex<String, u32, _, _> =
            KeyIndex::new("by-len", container(), 0, U32Serializer, |s: &String| s.len() as u32)
                .unwrap();
        assert!(matches!(index.lookup(&1), Err(PlexusError::NotAttached(_))));
    }

    #[test]
    fn test_attachment_requires_reserved_stream() {
        let result: Result<KeyIndex<String, u32, _, _>> =
            KeyIndex::new("bad", container(), 1, U32Serializer, |s: &String| s.len() as u32);
        assert!(matches!(result, Err(PlexusError::InvalidOperation(_))));
    }

    #[test]
    fn test_variable_size_key_serializer_rejected() {
        let result: Result<KeyIndex<String, String, _, _>> = KeyIndex::new(
            "by-name",
            container(),
            0,
            crate::serializer::StringSerializer,
            |s: &String| s.clone(),
        );
        assert!(matches!(result, Err(PlexusError::VariableSizeSerializer)));

        let padded = PaddedStringSerializer::new(16).unwrap();
        let mut index: KeyIndex<String, String, _, _> =
            KeyIndex::new("by-name", container(), 0, padded, |s: &String| s.clone()).unwrap();
        index.attach().unwrap();
        assert!(matches!(index.attach(), Err(PlexusError::AlreadyAttached(_))));
        assert_eq!(index.key_count().unwrap(), 0);
    }
}
