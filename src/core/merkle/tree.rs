use super::{Digest, HashAlgorithm, MerkleCoordinate};
use crate::error::Result;
use crate::list::{check_insert, check_item};

/// Merkle tree stored level by level
///
/// Mutations only record the lowest leaf that changed; interior levels are rebuilt
/// from that point the next time a node or the root is read.
#[derive(Debug, Clone)]
pub struct FlatMerkleTree {
    algorithm: HashAlgorithm,
    /// `levels[0]` holds the leaves, the last level holds the root
    levels: Vec<Vec<Digest>>,
    dirty_from: Option<usize>,
}

impl FlatMerkleTree {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        FlatMerkleTree {
            algorithm,
            levels: vec![Vec::new()],
            dirty_from: None,
        }
    }

    pub fn from_leaves(algorithm: HashAlgorithm, leaves: Vec<Digest>) -> Self {
        let mut tree = FlatMerkleTree {
            algorithm,
            levels: vec![leaves],
            dirty_from: None,
        };
        tree.mark_dirty(0);
        tree
    }

    /// Root of the tree spanning `leaves`, computed from scratch
    pub fn compute_root(algorithm: HashAlgorithm, leaves: &[Digest]) -> Option<Digest> {
        let mut level = leaves.to_vec();
        if level.is_empty() {
            return None;
        }
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| match pair.get(1) {
                    Some(right) => algorithm.combine(&pair[0], right),
                    None => pair[0],
                })
                .collect();
        }
        level.first().copied()
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn leaf(&self, index: usize) -> Option<Digest> {
        self.levels[0].get(index).copied()
    }

    pub fn leaves(&self) -> &[Digest] {
        &self.levels[0]
    }

    fn mark_dirty(&mut self, index: usize) {
        self.dirty_from = Some(self.dirty_from.map_or(index, |from| from.min(index)));
    }

    pub fn add_leaf(&mut self, leaf: Digest) {
        self.levels[0].push(leaf);
        self.mark_dirty(self.levels[0].len() - 1);
    }

    pub fn add_leaves(&mut self, leaves: &[Digest]) {
        if leaves.is_empty() {
            return;
        }
        let start = self.levels[0].len();
        self.levels[0].extend_from_slice(leaves);
        self.mark_dirty(start);
    }

    pub fn update_leaf(&mut self, index: usize, leaf: Digest) -> Result<()> {
        check_item(index, self.leaf_count())?;
        if self.levels[0][index] != leaf {
            self.levels[0][index] = leaf;
            self.mark_dirty(index);
        }
        Ok(())
    }

    pub fn insert_leaf(&mut self, index: usize, leaf: Digest) -> Result<()> {
        check_insert(index, self.leaf_count())?;
        self.levels[0].insert(index, leaf);
        self.mark_dirty(index);
        Ok(())
    }

    pub fn remove_leaf(&mut self, index: usize) -> Result<Digest> {
        check_item(index, self.leaf_count())?;
        let leaf = self.levels[0].remove(index);
        self.mark_dirty(index);
        Ok(leaf)
    }

    pub fn truncate(&mut self, leaf_count: usize) {
        if leaf_count < self.leaf_count() {
            self.levels[0].truncate(leaf_count);
            self.mark_dirty(leaf_count);
        }
    }

    /// Rebuild interior levels from the lowest dirty leaf upward
    fn recompute(&mut self) {
        let Some(mut from) = self.dirty_from.take() else {
            return;
        };

        let mut level = 0;
        while self.levels[level].len() > 1 {
            if self.levels.len() == level + 1 {
                self.levels.push(Vec::new());
            }

            let parent_count = (self.levels[level].len() + 1) / 2;
            let mut parents = std::mem::take(&mut self.levels[level + 1]);
            parents.truncate((from / 2).min(parent_count));
            let begin = parents.len();

            let children = &self.levels[level];
            for parent in begin..parent_count {
                let left = &children[parent * 2];
                parents.push(match children.get(parent * 2 + 1) {
                    Some(right) => self.algorithm.combine(left, right),
                    None => *left,
                });
            }

            self.levels[level + 1] = parents;
            from = begin;
            level += 1;
        }
        self.levels.truncate(level + 1);
    }

    /// Apex digest, or `None` for an empty tree
    pub fn root(&mut self) -> Option<Digest> {
        self.recompute();
        self.levels.last().and_then(|level| level.first()).copied()
    }

    pub fn node(&mut self, coordinate: MerkleCoordinate) -> Option<Digest> {
        self.recompute();
        self.levels
            .get(coordinate.level)
            .and_then(|level| level.get(coordinate.index))
            .copied()
    }

    /// Number of levels, counting the leaves (0 for an empty tree)
    pub fn height(&mut self) -> usize {
        if self.leaf_count() == 0 {
            return 0;
        }
        self.recompute();
        self.levels.len()
    }
}
