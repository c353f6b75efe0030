//! Pruned in-memory backend.
//!
//! A pollard keeps the roots, the leaves it was asked to remember, and the
//! siblings on the way from those leaves up to their roots. Everything else is
//! dropped as soon as it is no longer needed, so memory stays proportional to
//! the remembered set instead of the whole forest.
//!
//! Nodes are keyed by `(row, offset)`, which unlike positions does not change
//! when the forest grows a row.

use std::collections::HashMap;

use super::leaf_index::LeafIndex;
use crate::accumulator::{Accumulator, ForestBackend};
use crate::error::{AccumulatorError, Result};
use crate::hash::{parent_hash, Hash};
use crate::node::Node;
use crate::proof::BatchProof;
use crate::state::ForestState;

type Coord = (u8, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PolNode {
    hash: Hash,
    /// For leaves, whether the caller asked to keep it. For inner nodes,
    /// whether any leaf below is remembered.
    remember: bool,
}

/// Subtree lifted out of the map, keyed by depth and offset relative to its top.
type Detached = Vec<(u8, u64, PolNode)>;

#[derive(Debug, Clone, Default)]
pub struct Pollard {
    nodes: HashMap<Coord, PolNode>,
    leaves: LeafIndex,
    num_leaves: u64,
}

impl Pollard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(leaves: usize) -> Self {
        Self {
            nodes: HashMap::with_capacity(leaves),
            leaves: LeafIndex::with_capacity(leaves),
            num_leaves: 0,
        }
    }

    /// Number of nodes currently held.
    pub fn retained(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the leaf at `offset` is held and marked to be kept.
    pub fn is_remembered(&self, offset: u64) -> bool {
        self.nodes.get(&(0, offset)).map_or(false, |node| node.remember)
    }

    fn children_of(row: u8, offset: u64) -> Option<(Coord, Coord)> {
        if row == 0 {
            None
        } else {
            Some(((row - 1, offset << 1), (row - 1, (offset << 1) | 1)))
        }
    }

    fn insert_node(&mut self, coord: Coord, node: PolNode) {
        if coord.0 == 0 {
            self.leaves.insert(node.hash, coord.1);
        }
        if let Some(old) = self.nodes.insert(coord, node) {
            if coord.0 == 0 {
                self.leaves.remove(&old.hash, coord.1);
            }
        }
    }

    fn remove_node(&mut self, coord: Coord) -> Option<PolNode> {
        let node = self.nodes.remove(&coord)?;
        if coord.0 == 0 {
            self.leaves.remove(&node.hash, coord.1);
        }
        Some(node)
    }

    fn take_subtree(&mut self, row: u8, offset: u64) -> Detached {
        let mut detached = Vec::new();
        let mut stack = vec![(0u8, 0u64)];
        while let Some((depth, rel)) = stack.pop() {
            let coord = (row - depth, (offset << depth) | rel);
            let Some(node) = self.remove_node(coord) else {
                continue;
            };
            detached.push((depth, rel, node));
            if depth < row {
                stack.push((depth + 1, rel << 1));
                stack.push((depth + 1, (rel << 1) | 1));
            }
        }
        detached
    }

    fn place_subtree(&mut self, row: u8, offset: u64, detached: Detached) {
        for (depth, rel, node) in detached {
            self.insert_node((row - depth, (offset << depth) | rel), node);
        }
    }

    fn drop_subtree(&mut self, row: u8, offset: u64) {
        self.take_subtree(row, offset);
    }

    /// Drops the children of every node with no remembered leaf below it.
    /// Returns whether the subtree at `(row, offset)` holds a remembered leaf.
    fn prune(&mut self, row: u8, offset: u64) -> bool {
        let keep = match Self::children_of(row, offset) {
            None => self.nodes.get(&(row, offset)).map_or(false, |n| n.remember),
            Some((left, right)) => {
                if self.nodes.contains_key(&left) && self.nodes.contains_key(&right) {
                    let keep_left = self.prune(left.0, left.1);
                    let keep_right = self.prune(right.0, right.1);
                    let keep = keep_left || keep_right;
                    if !keep {
                        self.drop_subtree(left.0, left.1);
                        self.drop_subtree(right.0, right.1);
                    }
                    keep
                } else {
                    self.drop_subtree(left.0, left.1);
                    self.drop_subtree(right.0, right.1);
                    false
                }
            }
        };
        if let Some(node) = self.nodes.get_mut(&(row, offset)) {
            node.remember = keep;
        }
        keep
    }
}

impl ForestBackend for Pollard {
    fn num_leaves(&self) -> u64 {
        self.num_leaves
    }

    fn read(&self, state: &ForestState, position: u64) -> Option<Hash> {
        if !state.contains(position) {
            return None;
        }
        self.nodes.get(&state.coords(position)).map(|node| node.hash)
    }

    fn rehash(&mut self, state: &ForestState, position: u64) -> Result<Node> {
        let (row, offset) = state.coords(position);
        let Some((left, right)) = Self::children_of(row, offset) else {
            let node = self
                .nodes
                .get(&(row, offset))
                .ok_or(AccumulatorError::MissingNode(position))?;
            return Ok(Node::new(position, node.hash));
        };

        let missing = |coord: Coord| AccumulatorError::MissingNode(state.position(coord.0, coord.1));
        let l = *self.nodes.get(&left).ok_or_else(|| missing(left))?;
        let r = *self.nodes.get(&right).ok_or_else(|| missing(right))?;
        let hash = parent_hash(&l.hash, &r.hash);

        let node = self
            .nodes
            .get_mut(&(row, offset))
            .ok_or(AccumulatorError::MissingNode(position))?;
        node.hash = hash;
        node.remember = l.remember || r.remember;
        Ok(Node::new(position, hash))
    }

    fn swap_sub_trees(&mut self, state: &ForestState, a: u64, b: u64) -> Result<()> {
        let (row, offset_a) = state.coords(a);
        let (row_b, offset_b) = state.coords(b);
        if row != row_b {
            return Err(AccumulatorError::ShapeMismatch(format!(
                "cannot swap {} (row {}) with {} (row {})",
                a, row, b, row_b
            )));
        }
        for (position, coord) in [(a, (row, offset_a)), (b, (row, offset_b))] {
            if !self.nodes.contains_key(&coord) {
                return Err(AccumulatorError::MissingNode(position));
            }
        }

        let subtree_a = self.take_subtree(row, offset_a);
        let subtree_b = self.take_subtree(row, offset_b);
        self.place_subtree(row, offset_b, subtree_a);
        self.place_subtree(row, offset_a, subtree_b);
        Ok(())
    }

    fn new_leaf(&mut self, next: &ForestState, hash: Hash, remember: bool) -> Result<Node> {
        let offset = next.num_leaves() - 1;
        if offset != self.num_leaves {
            return Err(AccumulatorError::ShapeMismatch(format!(
                "pollard holds {} leaves, cannot append leaf {}",
                self.num_leaves, offset
            )));
        }
        self.insert_node((0, offset), PolNode { hash, remember });
        self.num_leaves += 1;
        Ok(Node::new(next.position(0, offset), hash))
    }

    fn merge_root(&mut self, next: &ForestState, position: u64, hash: Hash) -> Result<Node> {
        let (row, offset) = next.coords(position);
        let (left, right) = Self::children_of(row, offset)
            .ok_or_else(|| AccumulatorError::InvalidTarget(position))?;

        let missing = |coord: Coord| AccumulatorError::MissingNode(next.position(coord.0, coord.1));
        let remember_left = self.nodes.get(&left).ok_or_else(|| missing(left))?.remember;
        let remember_right = self.nodes.get(&right).ok_or_else(|| missing(right))?.remember;
        let remember = remember_left || remember_right;

        if !remember {
            self.drop_subtree(left.0, left.1);
            self.drop_subtree(right.0, right.1);
        }
        self.insert_node((row, offset), PolNode { hash, remember });
        Ok(Node::new(position, hash))
    }

    fn finalize_remove(
        &mut self,
        state: &ForestState,
        next: &ForestState,
        new_roots: &[u64],
    ) -> Result<()> {
        let mut survivors = Vec::with_capacity(new_roots.len());
        for &position in new_roots {
            let (row, offset) = state.coords(position);
            if !self.nodes.contains_key(&(row, offset)) {
                return Err(AccumulatorError::MissingNode(position));
            }
            survivors.push((row, self.take_subtree(row, offset)));
        }

        self.nodes.clear();
        self.leaves.clear();
        for (row, detached) in survivors {
            let offset = next.row_width(row) - 1;
            self.place_subtree(row, offset, detached);
            self.prune(row, offset);
        }
        self.num_leaves = next.num_leaves();

        trace!(
            "pollard keeps {} nodes for {} leaves",
            self.nodes.len(),
            self.num_leaves
        );
        Ok(())
    }

    fn find_leaf(&self, state: &ForestState, hash: &Hash) -> Option<u64> {
        self.leaves.first(hash, state.num_leaves())
    }

    fn forget_cached(&mut self, state: &ForestState) -> Result<()> {
        for position in state.root_positions() {
            let (row, offset) = state.coords(position);
            self.prune(row, offset);
        }
        Ok(())
    }
}

impl Accumulator<Pollard> {
    /// Verifies `proof` against the current roots and caches the nodes it
    /// covers, so the proven leaves can be deleted by the next `modify`.
    ///
    /// Returns `false` and leaves the pollard untouched if the proof is invalid.
    /// Cached nodes that are not remembered are pruned when the next `modify`
    /// completes.
    pub fn ingest(&mut self, proof: &BatchProof, target_hashes: &[Hash]) -> bool {
        let state = *self.state();
        let roots = self.roots();
        let Some(nodes) = proof.derive(&state, &roots, target_hashes) else {
            debug!("rejected proof for {} targets", proof.targets().len());
            return false;
        };

        let pollard = self.backend_mut();
        for (position, hash) in nodes {
            let coord = state.coords(position);
            if !pollard.nodes.contains_key(&coord) {
                pollard.insert_node(
                    coord,
                    PolNode {
                        hash,
                        remember: false,
                    },
                );
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RamForest;
    use crate::node::LeafData;

    fn hashes(n: u8) -> Vec<Hash> {
        (0..n).map(|i| Hash::digest([i])).collect()
    }

    #[test]
    fn test_forgets_unremembered_leaves() {
        let mut acc = Accumulator::new(Pollard::new()).unwrap();
        acc.modify(&hashes(8), &[]).unwrap();
        // only the root survives
        assert_eq!(acc.backend().retained(), 1);
        assert!(acc.prove(&[3]).is_err());
    }

    #[test]
    fn test_keeps_remembered_paths() {
        let h = hashes(8);
        let leaves: Vec<LeafData> = h
            .iter()
            .enumerate()
            .map(|(i, &hash)| LeafData::new(hash, i == 5))
            .collect();

        let mut acc = Accumulator::new(Pollard::new()).unwrap();
        acc.modify(&leaves, &[]).unwrap();

        // leaf 5, its ancestors and their siblings
        assert_eq!(acc.backend().retained(), 7);
        assert!(acc.backend().is_remembered(5));
        assert_eq!(acc.leaf_position(&h[5]), Some(5));

        let mut full = Accumulator::new(RamForest::new()).unwrap();
        full.modify(&h, &[]).unwrap();
        assert_eq!(acc.roots(), full.roots());
        assert_eq!(acc.prove(&[5]).unwrap(), full.prove(&[5]).unwrap());
    }

    #[test]
    fn test_delete_remembered_leaf() {
        let h = hashes(6);
        let leaves: Vec<LeafData> = h.iter().map(|&hash| LeafData::remembered(hash)).collect();
        let mut pollard = Accumulator::new(Pollard::new()).unwrap();
        let mut full = Accumulator::new(RamForest::new()).unwrap();
        pollard.modify(&leaves, &[]).unwrap();
        full.modify(&h, &[]).unwrap();

        pollard.modify::<Hash>(&[], &[1, 4]).unwrap();
        full.modify::<Hash>(&[], &[1, 4]).unwrap();
        assert_eq!(pollard.roots(), full.roots());
        assert_eq!(pollard.num_leaves(), 4);
    }

    #[test]
    fn test_ingest_enables_deletion() {
        let h = hashes(7);
        let mut full = Accumulator::new(RamForest::new()).unwrap();
        let mut pollard = Accumulator::new(Pollard::new()).unwrap();
        full.modify(&h, &[]).unwrap();
        pollard.modify(&h, &[]).unwrap();

        assert_eq!(
            pollard.modify::<Hash>(&[], &[2]),
            Err(AccumulatorError::MissingNode(2))
        );

        let proof = full.prove(&[2]).unwrap();
        assert!(!pollard.ingest(&proof, &[h[3]]));
        assert!(pollard.ingest(&proof, &[h[2]]));
        assert!(pollard.verify(&proof));

        full.modify::<Hash>(&[], &[2]).unwrap();
        pollard.modify::<Hash>(&[], &[2]).unwrap();
        assert_eq!(pollard.roots(), full.roots());
        assert_eq!(pollard.backend().retained(), pollard.roots().len());
    }

    #[test]
    fn test_adds_forget_ingested_nodes() {
        let h = hashes(4);
        let mut full = Accumulator::new(RamForest::new()).unwrap();
        let mut pollard = Accumulator::new(Pollard::new()).unwrap();
        full.modify(&h, &[]).unwrap();
        pollard.modify(&h, &[]).unwrap();

        let proof = full.prove(&[2]).unwrap();
        assert!(pollard.ingest(&proof, &[h[2]]));
        assert!(pollard.backend().retained() > 1);

        // the new leaf does not merge into the tree holding the cache
        let extra = Hash::digest(b"extra");
        full.modify(&[extra], &[]).unwrap();
        pollard.modify(&[extra], &[]).unwrap();
        assert_eq!(pollard.roots(), full.roots());
        assert_eq!(pollard.backend().retained(), pollard.roots().len());
        assert_eq!(pollard.leaf_position(&h[2]), None);
        assert_eq!(
            pollard.modify::<Hash>(&[], &[2]),
            Err(AccumulatorError::MissingNode(2))
        );
    }

    #[test]
    fn test_duplicate_leaves_stay_findable() {
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        let c = Hash::digest(b"c");

        let mut acc = Accumulator::new(Pollard::new()).unwrap();
        let leaves: Vec<LeafData> = [a, b, a].iter().map(|&h| LeafData::remembered(h)).collect();
        acc.modify(&leaves, &[]).unwrap();
        acc.modify::<Hash>(&[], &[2]).unwrap();
        assert_eq!(acc.leaf_position(&a), Some(0));

        // deleting leaf 0 moves the second copy
        let mut acc = Accumulator::new(Pollard::new()).unwrap();
        let mut full = Accumulator::new(RamForest::new()).unwrap();
        let h = [a, b, c, a];
        let leaves: Vec<LeafData> = h.iter().map(|&h| LeafData::remembered(h)).collect();
        acc.modify(&leaves, &[]).unwrap();
        full.modify(&h, &[]).unwrap();
        acc.modify::<Hash>(&[], &[0]).unwrap();
        full.modify::<Hash>(&[], &[0]).unwrap();
        assert_eq!(acc.roots(), full.roots());
        for hash in [a, b, c] {
            assert_eq!(acc.leaf_position(&hash), full.leaf_position(&hash));
        }
        assert_eq!(acc.leaf_position(&a), Some(1));
        assert_eq!(acc.leaf_position(&b), Some(2));
    }
}
