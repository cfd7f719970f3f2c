use super::{Attachment, AttachmentCore, AttachmentState, ItemAttachment, ItemEvent};
use crate::error::{PlexusError, Result};
use crate::header::ExtensionProperty;
use crate::list::RangeList;
use crate::merkle::{digest_hex, Digest, FlatMerkleTree, HashAlgorithm, DIGEST_SIZE, ZERO_DIGEST};
use crate::serializer::DigestSerializer;
use crate::stream_list::StreamList;
use crate::streams::ClusteredStreams;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

/// Durable Merkle tree over the items of a stream-mapped list
///
/// Leaf `i` is `H(bytes of item i)`, or the zero digest once item `i` is reaped. Leaves
/// live in the attachment's reserved stream; the root is cached in a header extension
/// property and rewritten whenever a leaf changed since the last computation. Every
/// root read and flush recomputes the root and checks it against the cached value.
pub struct MerkleTreeAttachment<B: RangeList<u8>> {
    core: AttachmentCore<B>,
    algorithm: HashAlgorithm,
    root_property: ExtensionProperty,
    leaves: Option<StreamList<Digest, DigestSerializer, B>>,
    tree: FlatMerkleTree,
    dirty: bool,
}

impl<B: RangeList<u8>> MerkleTreeAttachment<B> {
    /// Detached tree storing leaves in reserved `stream` and its root in `root_property`
    pub fn new(
        id: &str,
        container: Arc<ClusteredStreams<B>>,
        stream: usize,
        root_property: ExtensionProperty,
        algorithm: HashAlgorithm,
    ) -> Result<Self> {
        if root_property.len != DIGEST_SIZE {
            return Err(PlexusError::ExtensionPropertyOutOfRange {
                offset: root_property.offset,
                len: root_property.len,
            });
        }
        Ok(MerkleTreeAttachment {
            core: AttachmentCore::new(id, container, stream)?,
            algorithm,
            root_property,
            leaves: None,
            tree: FlatMerkleTree::new(algorithm),
            dirty: false,
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn leaf_count(&self) -> Result<usize> {
        self.core.check_attached()?;
        Ok(self.tree.leaf_count())
    }

    pub fn leaf(&self, index: usize) -> Result<Option<Digest>> {
        self.core.check_attached()?;
        Ok(self.tree.leaf(index))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Current root, `None` for an empty list
    ///
    /// Stores the root first if any leaf changed, then verifies the stored value.
    pub fn root(&mut self) -> Result<Option<Digest>> {
        self.core.check_attached()?;
        let container = Arc::clone(self.core.container());
        let _scope = container.enter_access_scope();

        if self.dirty {
            let root = self.tree.root().unwrap_or(ZERO_DIGEST);
            container.set_extension_property(self.root_property, &root)?;
            self.dirty = false;
            debug!(id = self.core.id(), root = %digest_hex(&root), "Stored Merkle root");
        }
        self.verify()
    }

    /// Root stored in the header extension region
    pub fn cached_root(&self) -> Result<Digest> {
        let bytes = self.core.container().extension_property(self.root_property)?;
        let mut root = ZERO_DIGEST;
        root.copy_from_slice(&bytes);
        Ok(root)
    }

    fn verify(&mut self) -> Result<Option<Digest>> {
        let computed = self.tree.root();
        let cached = self.cached_root()?;
        let expected = computed.unwrap_or(ZERO_DIGEST);
        if cached != expected {
            warn!(
                id = self.core.id(),
                cached = %digest_hex(&cached),
                computed = %digest_hex(&expected),
                "Merkle root mismatch"
            );
            return Err(PlexusError::MerkleRootMismatch {
                cached: digest_hex(&cached),
                computed: digest_hex(&expected),
            });
        }
        Ok(computed)
    }

    fn leaves(&mut self) -> Result<&mut StreamList<Digest, DigestSerializer, B>> {
        let id = self.core.id();
        self.leaves
            .as_mut()
            .ok_or_else(|| PlexusError::NotAttached(id.to_string()))
    }

    fn leaf_for<T>(&self, event: &ItemEvent<'_, T>) -> Digest {
        self.algorithm.hash(event.bytes)
    }

    fn hydrate(&mut self) -> Result<()> {
        let mut leaves = StreamList::new(
            Arc::clone(self.core.container()),
            self.core.stream(),
            DigestSerializer,
        )?;
        let count = leaves.len();
        self.core.check_entry_count(count)?;

        self.tree = FlatMerkleTree::from_leaves(self.algorithm, leaves.read_range(0, count)?);
        self.leaves = Some(leaves);
        self.dirty = false;
        self.verify()?;
        Ok(())
    }
}

impl<B: RangeList<u8>> Attachment for MerkleTreeAttachment<B> {
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

        if let Err(e) = self.hydrate() {
            self.leaves = None;
            self.tree = FlatMerkleTree::new(self.algorithm);
            return Err(e);
        }
        self.core.set_state(AttachmentState::Attached);
        debug!(id = self.core.id(), leaves = self.tree.leaf_count(), "Attached Merkle tree");
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.flush()?;
        self.leaves = None;
        self.tree = FlatMerkleTree::new(self.algorithm);
        self.core.set_state(AttachmentState::Detached);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.root()?;
        self.leaves()?.flush()
    }
}

impl<T: 'static, B: RangeList<u8> + 'static> ItemAttachment<T> for MerkleTreeAttachment<B> {
    fn on_added(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        let leaf = self.leaf_for(event);
        self.leaves()?.add(leaf)?;
        self.tree.add_leaf(leaf);
        self.dirty = true;
        Ok(())
    }

    fn on_updated(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        let leaf = self.leaf_for(event);
        self.leaves()?.update_range(event.index, &[leaf])?;
        self.tree.update_leaf(event.index, leaf)?;
        self.dirty = true;
        Ok(())
    }

    fn on_inserted(&mut self, event: &ItemEvent<'_, T>) -> Result<()> {
        let leaf = self.leaf_for(event);
        self.leaves()?.insert_range(event.index, &[leaf])?;
        self.tree.insert_leaf(event.index, leaf)?;
        self.dirty = true;
        Ok(())
    }

    fn on_removed(&mut self, index: usize) -> Result<()> {
        self.leaves()?.remove_range(index, 1)?;
        self.tree.remove_leaf(index)?;
        self.dirty = true;
        Ok(())
    }

    fn on_reaped(&mut self, index: usize) -> Result<()> {
        self.leaves()?.update_range(index, &[ZERO_DIGEST])?;
        self.tree.update_leaf(index, ZERO_DIGEST)?;
        self.dirty = true;
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

    fn container() -> Arc<ClusteredStreams<MemoryBuffer>> {
        let options = ContainerOptions {
            cluster_size: 32,
            reserved_streams: 1,
            ..ContainerOptions::default()
        };
        Arc::new(ClusteredStreams::create(MemoryBuffer::new(), &options).unwrap())
    }

    #[test]
    fn test_empty_tree_has_no_root() {
        let mut tree = MerkleTreeAttachment::new(
            "merkle",
            container(),
            0,
            ExtensionProperty::digest_slot(0),
            HashAlgorithm::Sha256,
        )
        .unwrap();
        assert!(matches!(tree.root(), Err(PlexusError::NotAttached(_))));

        tree.attach().unwrap();
        assert_eq!(tree.root().unwrap(), None);
        assert_eq!(tree.cached_root().unwrap(), ZERO_DIGEST);
    }

    #[test]
    fn test_tampered_root_detected_on_attach() {
        let container = container();
        let slot = ExtensionProperty::digest_slot(1);
        container.set_extension_property(slot, &[7u8; 32]).unwrap();

        let mut tree =
            MerkleTreeAttachment::new("merkle", container, 0, slot, HashAlgorithm::Sha256).unwrap();
        assert!(matches!(
            tree.attach(),
            Err(PlexusError::MerkleRootMismatch { .. })
        ));
        assert!(!tree.is_attached());
    }

    #[test]
    fn test_root_property_must_hold_a_digest() {
        let result = MerkleTreeAttachment::new(
            "merkle",
            container(),
            0,
            ExtensionProperty::new(0, 8),
            HashAlgorithm::Sha256,
        );
        assert!(matches!(
            result,
            Err(PlexusError::ExtensionPropertyOutOfRange { .. })
        ));
    }
}
