use crate::hash::Hash;
use crate::state::ForestState;

/// A node of the forest as seen by the accumulator.
///
/// Nodes are addressed by position, so the upward link is computed from the
/// forest shape instead of being stored. A handle is a snapshot: backends hand
/// out fresh ones after every change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Node {
    pub position: u64,
    pub hash: Hash,
}

impl Node {
    pub fn new(position: u64, hash: Hash) -> Self {
        Self { position, hash }
    }

    /// Position of the parent, `None` for a root.
    pub fn parent(&self, state: &ForestState) -> Option<u64> {
        if state.is_root(self.position) || !state.contains(self.position) {
            None
        } else {
            Some(state.parent(self.position))
        }
    }

    pub fn is_root(&self, state: &ForestState) -> bool {
        state.is_root(self.position)
    }
}

/// Something that can be inserted into the accumulator.
pub trait Leaf {
    fn hash(&self) -> Hash;

    /// Whether a pruned backend should keep this leaf (and its proof) after insertion.
    fn remember(&self) -> bool;
}

/// A plain digest is added without being remembered.
impl Leaf for Hash {
    fn hash(&self) -> Hash {
        *self
    }

    fn remember(&self) -> bool {
        false
    }
}

/// Leaf digest with an explicit retention flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafData {
    pub hash: Hash,
    pub remember: bool,
}

impl LeafData {
    pub fn new(hash: Hash, remember: bool) -> Self {
        Self { hash, remember }
    }

    pub fn remembered(hash: Hash) -> Self {
        Self::new(hash, true)
    }
}

impl Leaf for LeafData {
    fn hash(&self) -> Hash {
        self.hash
    }

    fn remember(&self) -> bool {
        self.remember
    }
}

impl<L: Leaf + ?Sized> Leaf for &L {
    fn hash(&self) -> Hash {
        (**self).hash()
    }

    fn remember(&self) -> bool {
        (**self).remember()
    }
}

impl<L: Leaf + ?Sized> Leaf for Box<L> {
    fn hash(&self) -> Hash {
        (**self).hash()
    }

    fn remember(&self) -> bool {
        (**self).remember()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_link() {
        let state = ForestState::new(5);
        let leaf = Node::new(2, Hash::default());
        assert_eq!(leaf.parent(&state), Some(9));

        let root = Node::new(12, Hash::default());
        assert!(root.is_root(&state));
        assert_eq!(root.parent(&state), None);

        let lone = Node::new(4, Hash::default());
        assert_eq!(lone.parent(&state), None);
    }

    #[test]
    fn test_leaf_impls() {
        let h = Hash::digest(b"leaf");
        assert_eq!(h.hash(), h);
        assert!(!h.remember());

        let data = LeafData::remembered(h);
        assert!(data.remember());
        assert_eq!((&data).hash(), h);

        let boxed: Box<dyn Leaf> = Box::new(LeafData::new(h, false));
        assert_eq!(boxed.hash(), h);
        assert!(!boxed.remember());
    }
}
