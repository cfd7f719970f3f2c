//! Merkle integrity layer
//!
//! - [`FlatMerkleTree`]: leaf digests plus cached interior levels, recomputed lazily
//! - [`MerkleBuffer`]: decorator keeping one leaf per page of a paged byte buffer
//!
//! Interior nodes are `H(left || right)`; a node without a right sibling is promoted
//! unchanged to the next level.

mod buffer;
mod tree;

pub use buffer::MerkleBuffer;
pub use tree::FlatMerkleTree;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512_256};

/// Size of every digest produced by the supported algorithms
pub const DIGEST_SIZE: usize = 32;

pub type Digest = [u8; DIGEST_SIZE];

/// Digest stored for an empty tree or a reaped leaf
pub const ZERO_DIGEST: Digest = [0u8; DIGEST_SIZE];

/// Hash function selector for the Merkle layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512_256,
}

impl HashAlgorithm {
    pub fn hash(&self, data: &[u8]) -> Digest {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).into(),
            HashAlgorithm::Sha512_256 => Sha512_256::digest(data).into(),
        }
    }

    /// Digest of an interior node
    pub fn combine(&self, left: &Digest, right: &Digest) -> Digest {
        match self {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(left);
                hasher.update(right);
                hasher.finalize().into()
            }
            HashAlgorithm::Sha512_256 => {
                let mut hasher = Sha512_256::new();
                hasher.update(left);
                hasher.update(right);
                hasher.finalize().into()
            }
        }
    }
}

/// Address of a node: level 0 holds the leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MerkleCoordinate {
    pub level: usize,
    pub index: usize,
}

impl MerkleCoordinate {
    pub const fn new(level: usize, index: usize) -> Self {
        MerkleCoordinate { level, index }
    }

    pub const fn leaf(index: usize) -> Self {
        MerkleCoordinate { level: 0, index }
    }

    pub const fn parent(&self) -> Self {
        MerkleCoordinate {
            level: self.level + 1,
            index: self.index / 2,
        }
    }

    /// The other child of this node's parent
    pub const fn sibling(&self) -> Self {
        MerkleCoordinate {
            level: self.level,
            index: self.index ^ 1,
        }
    }
}

/// Lowercase hex rendering used in logs and error messages
pub fn digest_hex(digest: &Digest) -> String {
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sha256_vector() {
        let digest = HashAlgorithm::Sha256.hash(b"abc");
        assert_eq!(
            digest_hex(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_algorithms_differ() {
        let a = HashAlgorithm::Sha256.hash(b"leaf");
        let b = HashAlgorithm::Sha512_256.hash(b"leaf");
        assert_ne!(a, b);
    }

    #[test]
    fn test_combine_is_hash_of_concatenation() {
        let algorithm = HashAlgorithm::Sha256;
        let left = algorithm.hash(b"l");
        let right = algorithm.hash(b"r");
        let mut joined = left.to_vec();
        joined.extend_from_slice(&right);
        assert_eq!(algorithm.combine(&left, &right), algorithm.hash(&joined));
    }

    #[test]
    fn test_coordinate_navigation() {
        let node = MerkleCoordinate::leaf(5);
        assert_eq!(node.parent(), MerkleCoordinate::new(1, 2));
        assert_eq!(node.sibling(), MerkleCoordinate::leaf(4));
    }
}
