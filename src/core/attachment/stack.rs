use super::{Attachment, AttachmentCore, AttachmentState};
use crate::error::{PlexusError, Result};
use crate::list::RangeList;
use crate::serializer::ItemSerializer;
use crate::stream_list::StreamList;
use crate::streams::ClusteredStreams;
use std::sync::Arc;

/// LIFO stack of constant-size items in a reserved stream
///
/// Each call holds the container's access scope.
pub struct ReservedStack<T, S: ItemSerializer<T> + Clone, B: RangeList<u8>> {
    core: AttachmentCore<B>,
    serializer: S,
    items: Option<StreamList<T, S, B>>,
}

impl<T: Clone, S: ItemSerializer<T> + Clone, B: RangeList<u8>> ReservedStack<T, S, B> {
    pub fn new(id: &str, container: Arc<ClusteredStreams<B>>, stream: usize, serializer: S) -> Result<Self> {
        if !serializer.is_constant_size() {
            return Err(PlexusError::VariableSizeSerializer);
        }
        Ok(ReservedStack {
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

    pub fn push(&mut self, item: T) -> Result<()> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.add(item)
    }

    /// Remove and return the top item
    pub fn pop(&mut self) -> Result<Option<T>> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        let items = self.items()?;
        let len = items.len();
        if len == 0 {
            return Ok(None);
        }
        let top = items.read(len - 1)?;
        items.truncate(len - 1)?;
        Ok(Some(top))
    }

    pub fn peek(&mut self) -> Result<Option<T>> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        let items = self.items()?;
        match items.len() {
            0 => Ok(None),
            len => items.read(len - 1).map(Some),
        }
    }

    pub fn len(&mut self) -> Result<usize> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        Ok(self.items()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&mut self) -> Result<()> {
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();
        self.items()?.clear()
    }
}

impl<T: Clone, S: ItemSerializer<T> + Clone, B: RangeList<u8>> Attachment for ReservedStack<T, S, B> {
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
        self.flush()?;
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
