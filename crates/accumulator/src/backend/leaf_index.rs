use std::collections::HashMap;

use crate::hash::Hash;

/// Leaf digest to every offset holding it.
#[derive(Debug, Clone, Default)]
pub(crate) struct LeafIndex {
    offsets: HashMap<Hash, Vec<u64>>,
}

impl LeafIndex {
    pub(crate) fn with_capacity(leaves: usize) -> Self {
        Self {
            offsets: HashMap::with_capacity(leaves),
        }
    }

    pub(crate) fn insert(&mut self, hash: Hash, offset: u64) {
        self.offsets.entry(hash).or_default().push(offset);
    }

    pub(crate) fn remove(&mut self, hash: &Hash, offset: u64) {
        if let Some(offsets) = self.offsets.get_mut(hash) {
            if let Some(i) = offsets.iter().position(|&o| o == offset) {
                offsets.swap_remove(i);
            }
            if offsets.is_empty() {
                self.offsets.remove(hash);
            }
        }
    }

    /// Records that the copy of `hash` at `from` now lives at `to`.
    pub(crate) fn relocate(&mut self, hash: &Hash, from: u64, to: u64) {
        if let Some(slot) = self
            .offsets
            .get_mut(hash)
            .and_then(|offsets| offsets.iter_mut().find(|o| **o == from))
        {
            *slot = to;
        }
    }

    /// Lowest offset below `limit` holding `hash`.
    pub(crate) fn first(&self, hash: &Hash, limit: u64) -> Option<u64> {
        self.offsets
            .get(hash)?
            .iter()
            .copied()
            .filter(|&offset| offset < limit)
            .min()
    }

    pub(crate) fn clear(&mut self) {
        self.offsets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_survive_single_removal() {
        let a = Hash::digest(b"a");
        let mut index = LeafIndex::default();
        index.insert(a, 0);
        index.insert(a, 2);

        index.remove(&a, 2);
        assert_eq!(index.first(&a, 3), Some(0));
        index.remove(&a, 0);
        assert_eq!(index.first(&a, 3), None);
        assert!(index.offsets.is_empty());
    }

    #[test]
    fn test_relocate_swapped_copies() {
        let a = Hash::digest(b"a");
        let mut index = LeafIndex::default();
        index.insert(a, 1);
        index.insert(a, 6);

        // both copies trade places
        index.relocate(&a, 6, 1);
        index.relocate(&a, 1, 6);
        assert_eq!(index.first(&a, 7), Some(1));
        index.remove(&a, 1);
        assert_eq!(index.first(&a, 7), Some(6));

        assert_eq!(index.first(&a, 6), None);
    }
}
