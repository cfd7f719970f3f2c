//! Stream-mapped list: one item per container stream
//!
//! Item `i` lives in stream `reserved_streams + i`, so items may have any serialized
//! length. Registered [`ItemAttachment`]s see every change through their hooks; each
//! operation runs inside the container's access scope so attachments and item streams
//! change together.

use crate::attachment::{ItemAttachment, ItemEvent};
use crate::error::{PlexusError, Result};
use crate::list::{check_insert, check_item, RangeList};
use crate::serializer::ItemSerializer;
use crate::streams::ClusteredStreams;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct StreamMappedList<T, S: ItemSerializer<T>, B: RangeList<u8>> {
    container: Arc<ClusteredStreams<B>>,
    serializer: S,
    attachments: Vec<Box<dyn ItemAttachment<T>>>,
}

impl<T: 'static, S: ItemSerializer<T>, B: RangeList<u8>> StreamMappedList<T, S, B> {
    pub fn new(container: Arc<ClusteredStreams<B>>, serializer: S) -> Self {
        StreamMappedList {
            container,
            serializer,
            attachments: Vec::new(),
        }
    }

    pub fn container(&self) -> &Arc<ClusteredStreams<B>> {
        &self.container
    }

    fn reserved(&self) -> Result<usize> {
        self.container.reserved_streams()
    }

    /// Items, reaped ones included
    pub fn len(&self) -> Result<usize> {
        Ok(self.container.count()? - self.reserved()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn is_reaped(&self, index: usize) -> Result<bool> {
        check_item(index, self.len()?)?;
        self.container.is_reaped(self.reserved()? + index)
    }

    pub fn read(&self, index: usize) -> Result<T> {
        let _scope = self.container.enter_access_scope();
        check_item(index, self.len()?)?;
        let stream = self.reserved()? + index;
        if self.container.is_reaped(stream)? {
            return Err(PlexusError::StreamReaped(stream));
        }
        self.serializer.deserialize(&self.container.read_all(stream)?)
    }

    /// `None` for a reaped item
    pub fn try_read(&self, index: usize) -> Result<Option<T>> {
        match self.read(index) {
            Ok(item) => Ok(Some(item)),
            Err(PlexusError::StreamReaped(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every item in order, `None` where reaped
    pub fn read_all(&self) -> Result<Vec<Option<T>>> {
        let _scope = self.container.enter_access_scope();
        (0..self.len()?).map(|index| self.try_read(index)).collect()
    }

    fn check_attachments(&self) -> Result<()> {
        for attachment in &self.attachments {
            if !attachment.is_attached() {
                return Err(PlexusError::NotAttached(attachment.id().to_string()));
            }
        }
        Ok(())
    }

    /// Append an item, returning its index
    pub fn add(&mut self, item: &T) -> Result<usize> {
        let container = Arc::clone(&self.container);
        let _scope = container.enter_access_scope();
        self.check_attachments()?;

        let bytes = self.serializer.serialize(item)?;
        let index = self.len()?;
        let event = ItemEvent { index, item, bytes: &bytes };
        for attachment in self.attachments.iter_mut() {
            attachment.before_add(&event)?;
        }

        let stream = container.add()?;
        container.write_all(stream, &bytes)?;
        for attachment in self.attachments.iter_mut() {
            attachment
                .on_added(&event)
                .map_err(|e| out_of_step(attachment.id(), e))?;
        }
        Ok(index)
    }

    /// Replace item `index`; fails for a reaped item
    pub fn update(&mut self, index: usize, item: &T) -> Result<()> {
        let container = Arc::clone(&self.container);
        let _scope = container.enter_access_scope();
        self.check_attachments()?;
        check_item(index, self.len()?)?;
        let stream = self.reserved()? + index;
        if container.is_reaped(stream)? {
            return Err(PlexusError::StreamReaped(stream));
        }

        let bytes = self.serializer.serialize(item)?;
        let event = ItemEvent { index, item, bytes: &bytes };
        for attachment in self.attachments.iter_mut() {
            attachment.before_update(&event)?;
        }

        container.write_all(stream, &bytes)?;
        for attachment in self.attachments.iter_mut() {
            attachment
                .on_updated(&event)
                .map_err(|e| out_of_step(attachment.id(), e))?;
        }
        Ok(())
    }

    /// Insert before `index`, shifting later items up
    pub fn insert(&mut self, index: usize, item: &T) -> Result<()> {
        let container = Arc::clone(&self.container);
        let _scope = container.enter_access_scope();
        self.check_attachments()?;
        check_insert(index, self.len()?)?;

        let bytes = self.serializer.serialize(item)?;
        let event = ItemEvent { index, item, bytes: &bytes };
        for attachment in self.attachments.iter_mut() {
            attachment.before_insert(&event)?;
        }

        let stream = self.reserved()? + index;
        container.insert(stream)?;
        container.write_all(stream, &bytes)?;
        for attachment in self.attachments.iter_mut() {
            attachment
                .on_inserted(&event)
                .map_err(|e| out_of_step(attachment.id(), e))?;
        }
        Ok(())
    }

    /// Remove item `index`, shifting later items down
    pub fn remove(&mut self, index: usize) -> Result<()> {
        let container = Arc::clone(&self.container);
        let _scope = container.enter_access_scope();
        self.check_attachments()?;
        check_item(index, self.len()?)?;

        container.remove(self.reserved()? + index)?;
        for attachment in self.attachments.iter_mut() {
            attachment
                .on_removed(index)
                .map_err(|e| out_of_step(attachment.id(), e))?;
        }
        Ok(())
    }

    /// Release item `index`'s storage while keeping its position
    ///
    /// Reaping an already reaped item is a no-op.
    pub fn reap(&mut self, index: usize) -> Result<()> {
        let container = Arc::clone(&self.container);
        let _scope = container.enter_access_scope();
        self.check_attachments()?;
        check_item(index, self.len()?)?;
        let stream = self.reserved()? + index;
        if container.is_reaped(stream)? {
            return Ok(());
        }

        container.reap(stream)?;
        for attachment in self.attachments.iter_mut() {
            attachment
                .on_reaped(index)
                .map_err(|e| out_of_step(attachment.id(), e))?;
        }
        Ok(())
    }

    /// Attach `attachment` (if detached) and register it
    pub fn attach(&mut self, attachment: impl ItemAttachment<T> + 'static) -> Result<()> {
        self.attach_boxed(Box::new(attachment))
    }

    pub fn attach_boxed(&mut self, mut attachment: Box<dyn ItemAttachment<T>>) -> Result<()> {
        if self.attachment_by_id(attachment.id()).is_some() {
            return Err(PlexusError::AlreadyAttached(attachment.id().to_string()));
        }
        let container = Arc::clone(&self.container);
        let _scope = container.enter_access_scope();
        if !attachment.is_attached() {
            attachment.attach()?;
        }
        debug!(id = attachment.id(), "Registered attachment");
        self.attachments.push(attachment);
        Ok(())
    }

    /// Unregister and detach the attachment with `id`
    pub fn detach(&mut self, id: &str) -> Result<Box<dyn ItemAttachment<T>>> {
        let position = self
            .attachments
            .iter()
            .position(|attachment| attachment.id() == id)
            .ok_or_else(|| PlexusError::NotAttached(id.to_string()))?;
        let container = Arc::clone(&self.container);
        let _scope = container.enter_access_scope();

        let mut attachment = self.attachments.remove(position);
        if attachment.is_attached() {
            attachment.detach()?;
        }
        debug!(id, "Unregistered attachment");
        Ok(attachment)
    }

    pub fn attachment_by_id(&self, id: &str) -> Option<&dyn ItemAttachment<T>> {
        self.attachments
            .iter()
            .find(|attachment| attachment.id() == id)
            .map(|attachment| attachment.as_ref())
    }

    /// First registered attachment of type `A`
    pub fn attachment<A: 'static>(&self) -> Option<&A> {
        self.attachments
            .iter()
            .find_map(|attachment| attachment.as_any().downcast_ref::<A>())
    }

    pub fn attachment_mut<A: 'static>(&mut self) -> Option<&mut A> {
        self.attachments
            .iter_mut()
            .find_map(|attachment| attachment.as_any_mut().downcast_mut::<A>())
    }

    pub fn attachment_ids(&self) -> Vec<String> {
        self.attachments
            .iter()
            .map(|attachment| attachment.id().to_string())
            .collect()
    }

    /// Flush every attachment, then the container
    pub fn flush(&mut self) -> Result<()> {
        let container = Arc::clone(&self.container);
        let _scope = container.enter_access_scope();
        for attachment in self.attachments.iter_mut() {
            if attachment.is_attached() {
                attachment.flush()?;
            }
        }
        container.flush()
    }
}

/// An attachment refused a change the item streams already hold
fn out_of_step(id: &str, e: PlexusError) -> PlexusError {
    warn!("Attachment '{}' failed after the item changed: {}", id, e);
    e
}

impl<T, S: ItemSerializer<T>, B: RangeList<u8>> Drop for StreamMappedList<T, S, B> {
    fn drop(&mut self) {
        let _scope = self.container.enter_access_scope();
        for attachment in self.attachments.iter_mut() {
            if attachment.is_attached() {
                if let Err(e) = attachment.flush() {
                    warn!("Failed to flush attachment '{}' on drop: {}", attachment.id(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{Attachment, KeyIndex, UniqueKeyIndex};
    use crate::memory::MemoryBuffer;
    use crate::options::ContainerOptions;
    use crate::serializer::{StringSerializer, U32Serializer};

    fn container(reserved: u32) -> Arc<ClusteredStreams<MemoryBuffer>> {
        let options = ContainerOptions {
            cluster_size: 16,
            reserved_streams: reserved,
            ..ContainerOptions::default()
        };
        Arc::new(ClusteredStreams::create(MemoryBuffer::new(), &options).unwrap())
    }

    #[test]
    fn test_items_map_to_streams() {
        let container = container(1);
        let mut list = StreamMappedList::new(container.clone(), StringSerializer);

        list.add(&"a long item spanning clusters".to_string()).unwrap();
        list.add(&"b".to_string()).unwrap();
        list.insert(0, &"first".to_string()).unwrap();
        assert_eq!(list.len().unwrap(), 3);
        assert_eq!(container.read_all(1).unwrap(), b"first");

        list.reap(1).unwrap();
        assert!(list.is_reaped(1).unwrap());
        assert!(matches!(list.read(1), Err(PlexusError::StreamReaped(2))));
        assert!(list.update(1, &"x".to_string()).is_err());
        assert_eq!(
            list.read_all().unwrap(),
            vec![Some("first".to_string()), None, Some("b".to_string())]
        );

        list.remove(0).unwrap();
        assert_eq!(list.try_read(1).unwrap(), Some("b".to_string()));
        assert!(list.remove(2).is_err());
    }

    #[test]
    fn test_unique_index_vetoes_before_change() {
        let container = container(1);
        let mut list = StreamMappedList::new(container.clone(), StringSerializer);
        let unique: UniqueKeyIndex<String, u32, _, _> =
            UniqueKeyIndex::new("by-len", container.clone(), 0, U32Serializer, |s: &String| {
                s.len() as u32
            })
            .unwrap();
        list.attach(unique).unwrap();

        list.add(&"one".to_string()).unwrap();
        assert!(matches!(
            list.add(&"two".to_string()),
            Err(PlexusError::DuplicateKey(_))
        ));
        assert_eq!(list.len().unwrap(), 1);

        list.reap(0).unwrap();
        list.add(&"two".to_string()).unwrap();
        let index = list.attachment::<UniqueKeyIndex<String, u32, U32Serializer, MemoryBuffer>>();
        assert_eq!(index.unwrap().lookup(&3).unwrap(), Some(1));
    }

    #[test]
    fn test_detached_attachment_blocks_mutation() {
        let container = container(1);
        let mut list = StreamMappedList::new(container.clone(), StringSerializer);
        let index: KeyIndex<String, u32, _, _> =
            KeyIndex::new("by-len", container.clone(), 0, U32Serializer, |s: &String| s.len() as u32)
                .unwrap();
        list.attach(index).unwrap();
        list.add(&"abc".to_string()).unwrap();

        list.attachment_mut::<KeyIndex<String, u32, U32Serializer, MemoryBuffer>>()
            .unwrap()
            .detach()
            .unwrap();
        assert!(matches!(
            list.add(&"def".to_string()),
            Err(PlexusError::NotAttached(_))
        ));
        assert_eq!(list.len().unwrap(), 1);
    }
}
