use super::{Attachment, AttachmentCore, AttachmentState};
use crate::error::{PlexusError, Result};
use crate::list::RangeList;
use crate::serializer::ItemSerializer;
use crate::stream_list::StreamList;
use crate::streams::ClusteredStreams;
use std::sync::Arc;

/// Random-access list of constant-size items in a reserved stream
///
/// Implements [`RangeList`]; every call holds the container's access scope and fails with
/// `NotAttached` while detached.
pub struct ReservedList<T, S: ItemSerializer<T> + Clone, B: RangeList<u8>> {
    core: AttachmentCore<B>,
    serializer: S,
    items: Option<StreamList<T, S, B>>,
}

impl<T: Clone, S: ItemSerializer<T> + Clone, B: RangeList<u8>> ReservedList<T, S, B> {
    pub fn new(id: &str, container: Arc<ClusteredStreams<B>>, stream: usize, serializer: S) -> Result<Self> {
        if !serializer.is_constant_size() {
            return Err(PlexusError::VariableSizeSerializer);
        }
        Ok(ReservedList {
            core: AttachmentCore::new(id, container, stream)?,
            serializer,
            items: None,
        })
    }

    fn items(&mut self) -> Result<&mut StreamList<T, S, B>> {
        self.core.check_attached()?;
        let id = self.core.id();
        self.items
            .as_mut()
            .ok_or_else(|| PlexusError::NotAttached(id.to_string()))
    }
}

impl<T: Clone, S: ItemSerializer<T> + Clone, B: RangeList<u8>> Attachment for ReservedList<T, S, B> {
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
        self.items = Some(StreamList::new(
            Arc::clone(&container),
            self.core.stream(),
            self.serializer.clone(),
        )?);
        self.core.set_state(AttachmentState::Attached);
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.flush()?;
        self.items = None;
        self.core.set_state(AttachmentState::Detached);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.flush()
    }
}

impl<T: Clone, S: ItemSerializer<T> + Clone, B: RangeList<u8>> RangeList<T> for ReservedList<T, S, B> {
    /// Zero while detached
    fn len(&self) -> usize {
        let _scope = self.core.container().enter_access_scope();
        self.items.as_ref().map_or(0, |items| items.len())
    }

    fn read_range(&mut self, index: usize, count: usize) -> Result<Vec<T>> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.read_range(index, count)
    }

    fn read_into(&mut self, index: usize, dest: &mut [T]) -> Result<()> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.read_into(index, dest)
    }

    fn add_range(&mut self, items: &[T]) -> Result<()> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.add_range(items)
    }

    fn insert_range(&mut self, index: usize, items: &[T]) -> Result<()> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.insert_range(index, items)
    }

    fn update_range(&mut self, index: usize, items: &[T]) -> Result<()> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.update_range(index, items)
    }

    fn remove_range(&mut self, index: usize, count: usize) -> Result<()> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.remove_range(index, count)
    }

    fn flush(&mut self) -> Result<()> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.flush()
    }
}
