//! Attachments: structures bound to a reserved stream of a container
//!
//! An attachment is created detached and must be attached before use. Attaching
//! hydrates whatever in-memory state it derives from its stream; every data member
//! fails with [`PlexusError::NotAttached`] while detached.
//!
//! Item attachments ([`ItemAttachment`]) register with a
//! [`StreamMappedList`](crate::collection::StreamMappedList) and follow its items through
//! before/after hooks. Before-hooks run ahead of any change and may veto it; after-hooks
//! run once the item streams reflect the change.

mod index;
mod list;
mod merkle;
mod stack;
mod unique;

pub use index::KeyIndex;
pub use list::ReservedList;
pub use merkle::MerkleTreeAttachment;
pub use stack::ReservedStack;
pub use unique::UniqueKeyIndex;

use crate::error::{PlexusError, Result};
use crate::list::RangeList;
use crate::streams::ClusteredStreams;
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Detached,
    Attached,
}

/// Lifecycle shared by every attachment
pub trait Attachment {
    fn id(&self) -> &str;

    fn is_attached(&self) -> bool;

    /// Hydrate from the reserved stream
    fn attach(&mut self) -> Result<()>;

    /// Flush and drop the in-memory state
    fn detach(&mut self) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// An item as seen by attachment hooks
pub struct ItemEvent<'a, T> {
    /// Position in the owning list
    pub index: usize,
    pub item: &'a T,
    /// The item as written to its stream
    pub bytes: &'a [u8],
}

/// Attachment that tracks the items of a stream-mapped list
pub trait ItemAttachment<T>: Attachment {
    fn before_add(&mut self, _event: &ItemEvent<'_, T>) -> Result<()> {
        self.check_attached()
    }

    fn before_update(&mut self, _event: &ItemEvent<'_, T>) -> Result<()> {
        self.check_attached()
    }

    fn before_insert(&mut self, _event: &ItemEvent<'_, T>) -> Result<()> {
        self.check_attached()
    }

    fn on_added(&mut self, event: &ItemEvent<'_, T>) -> Result<()>;

    fn on_updated(&mut self, event: &ItemEvent<'_, T>) -> Result<()>;

    fn on_inserted(&mut self, event: &ItemEvent<'_, T>) -> Result<()>;

    fn on_removed(&mut self, index: usize) -> Result<()>;

    fn on_reaped(&mut self, index: usize) -> Result<()>;

    fn check_attached(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(PlexusError::NotAttached(self.id().to_string()))
        }
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Container binding and lifecycle state common to all attachments
pub(crate) struct AttachmentCore<B: RangeList<u8>> {
    id: String,
    container: Arc<ClusteredStreams<B>>,
    stream: usize,
    state: AttachmentState,
}

impl<B: RangeList<u8>> AttachmentCore<B> {
    pub(crate) fn new(id: &str, container: Arc<ClusteredStreams<B>>, stream: usize) -> Result<Self> {
        let reserved = container.reserved_streams()?;
        if stream >= reserved {
            return Err(PlexusError::InvalidOperation(format!(
                "attachment '{}' needs a reserved stream, {} is not one of {}",
                id, stream, reserved
            )));
        }
        Ok(AttachmentCore {
            id: id.to_string(),
            container,
            stream,
            state: AttachmentState::Detached,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn container(&self) -> &Arc<ClusteredStreams<B>> {
        &self.container
    }

    pub(crate) fn stream(&self) -> usize {
        self.stream
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.state == AttachmentState::Attached
    }

    pub(crate) fn set_state(&mut self, state: AttachmentState) {
        self.state = state;
    }

    pub(crate) fn check_attached(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(PlexusError::NotAttached(self.id.clone()))
        }
    }

    pub(crate) fn check_detached(&self) -> Result<()> {
        if self.is_attached() {
            Err(PlexusError::AlreadyAttached(self.id.clone()))
        } else {
            Ok(())
        }
    }

    /// Items of the owning list (streams past the reserved ones)
    pub(crate) fn item_count(&self) -> Result<usize> {
        Ok(self.container.count()? - self.container.reserved_streams()?)
    }

    /// Whether the stream behind item `index` has been reaped
    pub(crate) fn is_item_reaped(&self, index: usize) -> Result<bool> {
        let stream = self.container.reserved_streams()? + index;
        Ok(self
            .container
            .fast_read_stream_descriptor_traits(stream)?
            .is_reaped())
    }

    /// Fail with [`PlexusError::EntryCountMismatch`] unless `entries` matches the item count
    pub(crate) fn check_entry_count(&self, entries: usize) -> Result<()> {
        let items = self.item_count()?;
        if entries != items {
            return Err(PlexusError::EntryCountMismatch {
                attachment: self.id.clone(),
                entries,
                items,
            });
        }
        Ok(())
    }
}
