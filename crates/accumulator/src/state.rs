//! Forest shape and position math.
//!
//! A forest with `n` leaves holds one perfect binary tree per set bit of `n`,
//! tallest first. Positions are numbered row by row: row 0 holds the leaves at
//! positions `0..2^R`, row 1 starts right after, and so on up to row `R`, where
//! `R` is the smallest value with `2^R >= n`.
//!
//! ```text
//! n = 5, R = 3
//!
//! 14
//! |---------------\
//! 12              13
//! |-------\       |-------\
//! 08      09      10      11
//! |---\   |---\   |---\   |---\
//! 00  01  02  03  04  05  06  07
//! ```
//!
//! Only nodes `00..04`, `08, 09` and `12` exist for `n = 5`; the roots are `12`
//! and `04`. Every row `r` holds `n >> r` existing nodes, left aligned.

use crate::error::{AccumulatorError, Result};
use serde::{Deserialize, Serialize};

/// Tallest tree supported by the position encoding.
pub const MAX_ROWS: u8 = 62;

/// Maximum number of leaves a forest can hold.
pub const MAX_LEAVES: u64 = 1 << MAX_ROWS;

/// The shape of a forest, fully described by its leaf count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestState {
    num_leaves: u64,
}

/// Everything a backend needs to delete a batch of leaves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemovalPlan {
    /// Subtree swaps per row, in execution order. Positions are in the current forest.
    pub swaps: Vec<Vec<(u64, u64)>>,
    /// Current positions of the subtrees that become the roots of `next`, tallest first.
    pub new_roots: Vec<u64>,
    /// Shape after the removal.
    pub next: ForestState,
}

impl ForestState {
    pub fn new(num_leaves: u64) -> Self {
        Self { num_leaves }
    }

    pub fn num_leaves(&self) -> u64 {
        self.num_leaves
    }

    /// Number of rows above the leaves, i.e. the height of the tallest possible tree.
    pub fn num_rows(&self) -> u8 {
        if self.num_leaves <= 1 {
            0
        } else {
            (64 - (self.num_leaves - 1).leading_zeros()) as u8
        }
    }

    pub fn num_roots(&self) -> usize {
        self.num_leaves.count_ones() as usize
    }

    /// Whether a tree of height `row` is part of the forest.
    pub fn has_root(&self, row: u8) -> bool {
        row < 64 && (self.num_leaves >> row) & 1 == 1
    }

    /// Number of existing nodes in `row`.
    pub fn row_width(&self, row: u8) -> u64 {
        if row >= 64 {
            0
        } else {
            self.num_leaves >> row
        }
    }

    fn row_start(&self, row: u8) -> u64 {
        let rows = self.num_rows();
        debug_assert!(row <= rows + 1);
        (2u64 << rows) - (2u64 << rows).checked_shr(row as u32).unwrap_or(0)
    }

    /// Position of the node at `offset` within `row`.
    pub fn position(&self, row: u8, offset: u64) -> u64 {
        self.row_start(row) + offset
    }

    pub fn detect_row(&self, position: u64) -> u8 {
        let rows = self.num_rows();
        let mut row = 0;
        while row < rows && position >= self.row_start(row + 1) {
            row += 1;
        }
        row
    }

    /// Splits a position into `(row, offset within the row)`.
    pub fn coords(&self, position: u64) -> (u8, u64) {
        let row = self.detect_row(position);
        (row, position - self.row_start(row))
    }

    /// Whether `position` addresses an existing node.
    pub fn contains(&self, position: u64) -> bool {
        let (row, offset) = self.coords(position);
        offset < self.row_width(row)
    }

    pub fn is_root(&self, position: u64) -> bool {
        let (row, offset) = self.coords(position);
        self.has_root(row) && offset + 1 == self.row_width(row)
    }

    /// Index of the root at `position` in the tallest-first root list.
    pub fn root_index(&self, position: u64) -> Option<usize> {
        if !self.is_root(position) {
            return None;
        }
        let (row, _) = self.coords(position);
        Some((self.num_leaves >> (row + 1)).count_ones() as usize)
    }

    /// Positions of all roots, tallest first.
    pub fn root_positions(&self) -> Vec<u64> {
        (0..=self.num_rows())
            .rev()
            .filter(|&row| self.has_root(row))
            .map(|row| self.position(row, self.row_width(row) - 1))
            .collect()
    }

    /// Parent position. Meaningless for roots; check `is_root` first.
    pub fn parent(&self, position: u64) -> u64 {
        (position >> 1) | (1 << self.num_rows())
    }

    pub fn sibling(&self, position: u64) -> u64 {
        position ^ 1
    }

    /// Left and right children, or `None` for a leaf.
    pub fn children(&self, position: u64) -> Option<(u64, u64)> {
        let (row, offset) = self.coords(position);
        if row == 0 {
            return None;
        }
        let left = self.position(row - 1, offset << 1);
        Some((left, left | 1))
    }

    /// Declares `count` more leaves.
    pub fn add(&mut self, count: u64) -> Result<()> {
        match self.num_leaves.checked_add(count) {
            Some(n) if n <= MAX_LEAVES => {
                self.num_leaves = n;
                Ok(())
            }
            _ => Err(AccumulatorError::ForestFull),
        }
    }

    /// Shape after deleting `count` leaves.
    pub fn next_after_removal(&self, count: u64) -> Result<ForestState> {
        self.num_leaves
            .checked_sub(count)
            .map(ForestState::new)
            .ok_or_else(|| {
                AccumulatorError::ShapeMismatch(format!(
                    "cannot remove {} leaves from {}",
                    count, self.num_leaves
                ))
            })
    }

    /// Validates deletion targets and returns them sorted.
    pub fn sorted_leaf_targets(&self, targets: &[u64]) -> Result<Vec<u64>> {
        let mut sorted = targets.to_vec();
        sorted.sort_unstable();
        for pair in sorted.windows(2) {
            if pair[0] == pair[1] {
                return Err(AccumulatorError::DuplicateTarget(pair[0]));
            }
        }
        if let Some(&last) = sorted.last() {
            if last >= self.num_leaves {
                return Err(AccumulatorError::InvalidTarget(last));
            }
        }
        Ok(sorted)
    }

    /// Positions needed to prove `targets`, in canonical order.
    ///
    /// Returns `(proof, computed)`: `proof` lists the sibling positions a batch
    /// proof has to carry, row by row and left to right; `computed` lists every
    /// position a verifier derives on the way, targets and roots included.
    /// Targets must be existing leaf positions.
    pub fn proof_positions(&self, targets: &[u64]) -> (Vec<u64>, Vec<u64>) {
        let mut nodes = targets.to_vec();
        nodes.sort_unstable();
        nodes.dedup();

        let mut proof = Vec::new();
        let mut computed = Vec::new();

        for row in 0..=self.num_rows() {
            if nodes.is_empty() {
                break;
            }
            let width = self.row_width(row);
            let mut next = Vec::with_capacity(nodes.len());
            let mut i = 0;
            while i < nodes.len() {
                let offset = nodes[i];
                computed.push(self.position(row, offset));

                if self.has_root(row) && offset + 1 == width {
                    i += 1;
                    continue;
                }

                if offset & 1 == 0 && nodes.get(i + 1) == Some(&(offset | 1)) {
                    computed.push(self.position(row, offset | 1));
                    i += 2;
                } else {
                    proof.push(self.position(row, offset ^ 1));
                    i += 1;
                }
                next.push(offset >> 1);
            }
            nodes = next;
        }

        (proof, computed)
    }

    /// Plans the deletion of `targets` (leaf positions).
    ///
    /// Row by row from the leaves: a deleted root simply disappears, deleted
    /// siblings move up as a deleted parent, and the remaining deleted nodes are
    /// paired so that the right one's sibling fills the left one's slot. A last
    /// unpaired deletion is filled by the row's root when there is one; otherwise
    /// its sibling becomes the next forest's root of that height.
    pub fn transform(&self, targets: &[u64]) -> Result<RemovalPlan> {
        let mut dels = self.sorted_leaf_targets(targets)?;
        let next = self.next_after_removal(dels.len() as u64)?;
        let rows = self.num_rows();

        let mut swaps: Vec<Vec<(u64, u64)>> = vec![Vec::new(); rows as usize + 1];
        // (row, offset) of the subtrees that end up as roots of `next`
        let mut survivors: Vec<(u8, u64)> = Vec::new();

        for row in 0..=rows {
            let root = if self.has_root(row) {
                Some(self.row_width(row) - 1)
            } else {
                None
            };
            let mut root_present = root.is_some();
            if root.is_some() && dels.last().copied() == root {
                dels.pop();
                root_present = false;
            }

            let mut next_dels = Vec::with_capacity(dels.len() / 2 + 1);
            let mut singles = Vec::new();
            let mut i = 0;
            while i < dels.len() {
                let offset = dels[i];
                if offset & 1 == 0 && dels.get(i + 1) == Some(&(offset | 1)) {
                    next_dels.push(offset >> 1);
                    i += 2;
                } else {
                    singles.push(offset);
                    i += 1;
                }
            }

            let row_swaps = &mut swaps[row as usize];
            for pair in singles.chunks(2) {
                match *pair {
                    [left, right] => {
                        let from = right ^ 1;
                        row_swaps.push((self.position(row, from), self.position(row, left)));
                        carry_through_swap(&mut survivors, row, from, left);
                        next_dels.push(right >> 1);
                    }
                    [last] => match root.filter(|_| root_present) {
                        Some(root_offset) => {
                            row_swaps
                                .push((self.position(row, root_offset), self.position(row, last)));
                            carry_through_swap(&mut survivors, row, root_offset, last);
                            root_present = false;
                        }
                        None => {
                            survivors.push((row, last ^ 1));
                            next_dels.push(last >> 1);
                        }
                    },
                    _ => {}
                }
            }

            if let Some(root_offset) = root.filter(|_| root_present) {
                survivors.push((row, root_offset));
            }

            next_dels.sort_unstable();
            dels = next_dels;
        }

        if !dels.is_empty() || survivors.len() != next.num_roots() {
            return Err(AccumulatorError::ShapeMismatch(format!(
                "removal of {} leaves from {} left {} trees, expected {}",
                targets.len(),
                self.num_leaves,
                survivors.len(),
                next.num_roots()
            )));
        }

        survivors.sort_by(|a, b| b.0.cmp(&a.0));
        let new_roots = survivors
            .iter()
            .map(|&(row, offset)| self.position(row, offset))
            .collect();

        Ok(RemovalPlan {
            swaps,
            new_roots,
            next,
        })
    }
}

/// Follows surviving subtrees that sit below one of two swapped nodes at `row`.
fn carry_through_swap(survivors: &mut [(u8, u64)], row: u8, a: u64, b: u64) {
    for (survivor_row, offset) in survivors.iter_mut() {
        if *survivor_row > row {
            continue;
        }
        let shift = row - *survivor_row;
        let low = *offset & ((1u64 << shift) - 1);
        let ancestor = *offset >> shift;
        if ancestor == a {
            *offset = (b << shift) | low;
        } else if ancestor == b {
            *offset = (a << shift) | low;
        }
    }
}
