//! In-memory backend that keeps every node of the forest.
//!
//! Nodes are stored row by row, left aligned, exactly as the forest lays them
//! out, so a position maps to `rows[row][offset]`.

use super::leaf_index::LeafIndex;
use crate::accumulator::ForestBackend;
use crate::error::{AccumulatorError, Result};
use crate::hash::{parent_hash, Hash};
use crate::node::Node;
use crate::state::ForestState;

#[derive(Debug, Clone, Default)]
pub struct RamForest {
    rows: Vec<Vec<Hash>>,
    leaves: LeafIndex,
}

impl RamForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with room for `leaves` leaves before reallocating.
    pub fn with_capacity(leaves: usize) -> Self {
        Self {
            rows: vec![Vec::with_capacity(leaves)],
            leaves: LeafIndex::with_capacity(leaves),
        }
    }

    fn get(&self, row: u8, offset: u64) -> Option<Hash> {
        self.rows.get(row as usize)?.get(offset as usize).copied()
    }

    fn row_mut(&mut self, row: u8) -> &mut Vec<Hash> {
        if self.rows.len() <= row as usize {
            self.rows.resize_with(row as usize + 1, Vec::new);
        }
        &mut self.rows[row as usize]
    }

    fn push(&mut self, next: &ForestState, position: u64, hash: Hash) -> Result<Node> {
        let (row, offset) = next.coords(position);
        let stored = self.row_mut(row);
        if stored.len() as u64 != offset {
            return Err(AccumulatorError::ShapeMismatch(format!(
                "row {} has {} nodes, cannot append at offset {}",
                row,
                stored.len(),
                offset
            )));
        }
        stored.push(hash);
        Ok(Node::new(position, hash))
    }

    fn reindex_leaves(&mut self) {
        self.leaves.clear();
        if let Some(row) = self.rows.first() {
            for (offset, hash) in row.iter().enumerate() {
                self.leaves.insert(*hash, offset as u64);
            }
        }
    }
}

impl ForestBackend for RamForest {
    fn num_leaves(&self) -> u64 {
        self.rows.first().map_or(0, |row| row.len() as u64)
    }

    fn read(&self, state: &ForestState, position: u64) -> Option<Hash> {
        if !state.contains(position) {
            return None;
        }
        let (row, offset) = state.coords(position);
        self.get(row, offset)
    }

    fn rehash(&mut self, state: &ForestState, position: u64) -> Result<Node> {
        let (row, offset) = state.coords(position);
        let Some((left, right)) = state.children(position) else {
            let hash = self
                .get(row, offset)
                .ok_or(AccumulatorError::MissingNode(position))?;
            return Ok(Node::new(position, hash));
        };

        let left = self
            .get(row - 1, offset << 1)
            .ok_or(AccumulatorError::MissingNode(left))?;
        let right = self
            .get(row - 1, (offset << 1) | 1)
            .ok_or(AccumulatorError::MissingNode(right))?;
        let hash = parent_hash(&left, &right);

        let slot = self
            .rows
            .get_mut(row as usize)
            .and_then(|r| r.get_mut(offset as usize))
            .ok_or(AccumulatorError::MissingNode(position))?;
        *slot = hash;
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

        for (depth, stored) in self.rows.iter_mut().take(row as usize + 1).rev().enumerate() {
            let width = 1usize << depth;
            let start_a = (offset_a as usize) << depth;
            let start_b = (offset_b as usize) << depth;
            if start_a.max(start_b) + width > stored.len() {
                return Err(AccumulatorError::MissingNode(if start_a > start_b { a } else { b }));
            }
            for i in 0..width {
                stored.swap(start_a + i, start_b + i);
            }
        }

        let leaf_a = (offset_a as usize) << row;
        let leaf_b = (offset_b as usize) << row;
        for i in 0..1usize << row {
            let (a, b) = (leaf_a + i, leaf_b + i);
            self.leaves.relocate(&self.rows[0][a], b as u64, a as u64);
            self.leaves.relocate(&self.rows[0][b], a as u64, b as u64);
        }
        Ok(())
    }

    fn new_leaf(&mut self, next: &ForestState, hash: Hash, _remember: bool) -> Result<Node> {
        let offset = next.num_leaves() - 1;
        let node = self.push(next, next.position(0, offset), hash)?;
        self.leaves.insert(hash, offset);
        Ok(node)
    }

    fn merge_root(&mut self, next: &ForestState, position: u64, hash: Hash) -> Result<Node> {
        self.push(next, position, hash)
    }

    fn finalize_remove(
        &mut self,
        state: &ForestState,
        next: &ForestState,
        new_roots: &[u64],
    ) -> Result<()> {
        let sources: Vec<(u8, u64)> = new_roots.iter().map(|&p| state.coords(p)).collect();
        let in_place = sources
            .iter()
            .all(|&(row, offset)| offset + 1 == next.row_width(row));

        if in_place {
            let kept = next.num_leaves() as usize;
            if let Some(bottom) = self.rows.first_mut() {
                for (offset, hash) in bottom.drain(kept.min(bottom.len())..).enumerate() {
                    self.leaves.remove(&hash, (kept + offset) as u64);
                }
            }
            for (row, stored) in self.rows.iter_mut().enumerate().skip(1) {
                stored.truncate(next.row_width(row as u8) as usize);
            }
        } else {
            let mut rows: Vec<Vec<Hash>> = (0..=next.num_rows())
                .map(|row| Vec::with_capacity(next.row_width(row) as usize))
                .collect();
            for &(height, offset) in &sources {
                for (row, target) in rows.iter_mut().enumerate().take(height as usize + 1) {
                    let depth = height as usize - row;
                    let start = (offset as usize) << depth;
                    let end = start + (1usize << depth);
                    let slice = self.rows.get(row).and_then(|r| r.get(start..end));
                    let slice = slice.ok_or_else(|| {
                        AccumulatorError::MissingNode(state.position(row as u8, start as u64))
                    })?;
                    target.extend_from_slice(slice);
                }
            }
            self.rows = rows;
            self.reindex_leaves();
        }

        self.rows.truncate(next.num_rows() as usize + 1);
        trace!(
            "finalized removal ({}): {} leaves left",
            if in_place { "truncated" } else { "rebuilt" },
            self.num_leaves()
        );
        Ok(())
    }

    fn find_leaf(&self, state: &ForestState, hash: &Hash) -> Option<u64> {
        self.leaves.first(hash, state.num_leaves())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::Accumulator;

    fn filled(n: u8) -> (Accumulator<RamForest>, Vec<Hash>) {
        let hashes: Vec<Hash> = (0..n).map(|i| Hash::digest([i])).collect();
        let mut acc = Accumulator::new(RamForest::with_capacity(n as usize)).unwrap();
        acc.modify(&hashes, &[]).unwrap();
        (acc, hashes)
    }

    #[test]
    fn test_rows_follow_forest_layout() {
        let (acc, h) = filled(5);
        let forest = acc.backend();
        assert_eq!(forest.num_leaves(), 5);
        assert_eq!(forest.rows[1].len(), 2);
        assert_eq!(forest.rows[2].len(), 1);
        assert_eq!(forest.rows[1][0], parent_hash(&h[0], &h[1]));
        assert_eq!(forest.read(acc.state(), 9), Some(parent_hash(&h[2], &h[3])));
        assert_eq!(forest.read(acc.state(), 10), None);
    }

    #[test]
    fn test_swap_moves_whole_subtrees() {
        let (mut acc, h) = filled(8);
        let state = *acc.state();
        let forest = acc.backend_mut();
        let left = forest.read(&state, 8).unwrap();
        let right = forest.read(&state, 11).unwrap();

        forest.swap_sub_trees(&state, 8, 11).unwrap();
        assert_eq!(forest.read(&state, 8), Some(right));
        assert_eq!(forest.read(&state, 11), Some(left));
        assert_eq!(forest.read(&state, 0), Some(h[6]));
        assert_eq!(forest.read(&state, 7), Some(h[1]));
        assert_eq!(forest.find_leaf(&state, &h[6]), Some(0));
        assert_eq!(forest.find_leaf(&state, &h[1]), Some(7));
    }

    #[test]
    fn test_rebuild_when_trees_move() {
        // removing leaf 0 of 8 leaves three trees that all need to shift left
        let (mut acc, h) = filled(8);
        acc.modify::<Hash>(&[], &[0]).unwrap();

        assert_eq!(acc.num_leaves(), 7);
        assert_eq!(
            acc.roots(),
            vec![
                parent_hash(&parent_hash(&h[4], &h[5]), &parent_hash(&h[6], &h[7])),
                parent_hash(&h[2], &h[3]),
                h[1],
            ]
        );
        assert_eq!(acc.leaf_position(&h[1]), Some(6));
        assert_eq!(acc.leaf_position(&h[4]), Some(0));
        assert_eq!(acc.leaf_position(&h[0]), None);
    }

    #[test]
    fn test_remove_everything() {
        let (mut acc, h) = filled(3);
        acc.modify::<Hash>(&[], &[0, 1, 2]).unwrap();
        assert_eq!(acc.num_leaves(), 0);
        assert!(acc.roots().is_empty());
        assert_eq!(acc.leaf_position(&h[0]), None);

        acc.modify(&h, &[]).unwrap();
        assert_eq!(acc.num_leaves(), 3);
    }

    #[test]
    fn test_duplicate_leaves_stay_findable() {
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        let c = Hash::digest(b"c");

        // truncated in place
        let mut acc = Accumulator::new(RamForest::new()).unwrap();
        acc.modify(&[a, b, a], &[]).unwrap();
        acc.modify::<Hash>(&[], &[2]).unwrap();
        assert_eq!(acc.leaf_position(&a), Some(0));

        // rebuilt: [c, a] moves ahead of b
        let mut acc = Accumulator::new(RamForest::new()).unwrap();
        acc.modify(&[a, b, c, a], &[]).unwrap();
        acc.modify::<Hash>(&[], &[0]).unwrap();
        assert_eq!(acc.leaf_position(&a), Some(1));
        assert_eq!(acc.leaf_position(&b), Some(2));

        // root leaf swapped onto an equal digest
        let others: Vec<Hash> = (0u8..5).map(|i| Hash::digest([i])).collect();
        let mut acc = Accumulator::new(RamForest::new()).unwrap();
        acc.modify(
            &[others[0], a, others[1], others[2], others[3], others[4], a],
            &[],
        )
        .unwrap();
        acc.modify::<Hash>(&[], &[1]).unwrap();
        assert_eq!(acc.leaf_position(&a), Some(1));
        acc.modify::<Hash>(&[], &[1]).unwrap();
        assert_eq!(acc.leaf_position(&a), None);
    }
}
