//! The accumulator orchestrator.
//!
//! [`Accumulator`] owns the forest shape and the root list and drives a
//! storage backend through the add and remove algorithms. Backends only store
//! digests; every decision about where nodes go is made here and in
//! [`ForestState`].

use crate::config::ForestConfig;
use crate::error::{AccumulatorError, Result};
use crate::hash::{parent_hash, Hash};
use crate::node::{Leaf, Node};
use crate::proof::BatchProof;
use crate::state::{ForestState, RemovalPlan};

/// Storage strategy for forest nodes.
///
/// Positions passed in are always relative to the state passed alongside them.
pub trait ForestBackend {
    /// Leaves currently stored.
    fn num_leaves(&self) -> u64;

    /// Digest at `position`, if the backend holds it.
    fn read(&self, state: &ForestState, position: u64) -> Option<Hash>;

    /// Recomputes the digest at `position` from its two children.
    fn rehash(&mut self, state: &ForestState, position: u64) -> Result<Node>;

    /// Exchanges the subtrees rooted at `a` and `b`, which sit on the same row.
    fn swap_sub_trees(&mut self, state: &ForestState, a: u64, b: u64) -> Result<()>;

    /// Stores a new rightmost leaf. `next` already counts it.
    fn new_leaf(&mut self, next: &ForestState, hash: Hash, remember: bool) -> Result<Node>;

    /// Stores the parent created when two roots of equal height merge.
    fn merge_root(&mut self, next: &ForestState, position: u64, hash: Hash) -> Result<Node>;

    /// Moves the surviving trees, given by their current positions tallest
    /// first, into the layout of `next` and drops everything else.
    fn finalize_remove(
        &mut self,
        state: &ForestState,
        next: &ForestState,
        new_roots: &[u64],
    ) -> Result<()>;

    /// Position of a stored leaf with the given digest.
    fn find_leaf(&self, state: &ForestState, hash: &Hash) -> Option<u64>;

    /// Drops nodes kept only to serve proofs that were pending before the
    /// last change. Runs at the end of every `modify`.
    fn forget_cached(&mut self, _state: &ForestState) -> Result<()> {
        Ok(())
    }
}

/// Dynamic hash accumulator over a forest of perfect Merkle trees.
pub struct Accumulator<B: ForestBackend> {
    backend: B,
    state: ForestState,
    roots: Vec<Node>,
    config: ForestConfig,
}

impl<B: ForestBackend> Accumulator<B> {
    pub fn new(backend: B) -> Result<Self> {
        Self::with_config(backend, ForestConfig::default())
    }

    /// Wraps a backend, picking up whatever leaves it already holds.
    pub fn with_config(backend: B, config: ForestConfig) -> Result<Self> {
        let state = ForestState::new(backend.num_leaves());
        let roots = read_roots(&backend, &state)?;
        Ok(Self {
            backend,
            state,
            roots,
            config,
        })
    }

    pub fn state(&self) -> &ForestState {
        &self.state
    }

    pub fn num_leaves(&self) -> u64 {
        self.state.num_leaves()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Root digests, tallest tree first.
    pub fn roots(&self) -> Vec<Hash> {
        self.roots.iter().map(|root| root.hash).collect()
    }

    pub fn root_nodes(&self) -> &[Node] {
        &self.roots
    }

    pub fn leaf_position(&self, hash: &Hash) -> Option<u64> {
        self.backend.find_leaf(&self.state, hash)
    }

    /// Builds a batch proof for `targets`.
    ///
    /// The returned proof lists its targets in ascending order.
    pub fn prove(&self, targets: &[u64]) -> Result<BatchProof> {
        let targets = self.state.sorted_leaf_targets(targets)?;
        for &target in &targets {
            if self.backend.read(&self.state, target).is_none() {
                return Err(AccumulatorError::MissingNode(target));
            }
        }

        let (positions, _) = self.state.proof_positions(&targets);
        let proof = positions
            .iter()
            .map(|&position| {
                self.backend
                    .read(&self.state, position)
                    .ok_or(AccumulatorError::MissingNode(position))
            })
            .collect::<Result<Vec<_>>>()?;

        trace!(
            "proved {} targets with {} hashes",
            targets.len(),
            proof.len()
        );
        Ok(BatchProof::new(targets, proof))
    }

    /// Verifies a proof for leaves held by this accumulator.
    pub fn verify(&self, proof: &BatchProof) -> bool {
        let target_hashes: Option<Vec<Hash>> = proof
            .targets()
            .iter()
            .map(|&target| self.backend.read(&self.state, target))
            .collect();
        match target_hashes {
            Some(hashes) => proof.verify(&self.state, &self.roots(), &hashes),
            None => false,
        }
    }

    /// Deletes `deletions` and then appends `leaves`.
    ///
    /// Deletion positions refer to the forest before the call. Invalid or
    /// duplicate deletions are rejected before anything changes.
    pub fn modify<L: Leaf>(&mut self, leaves: &[L], deletions: &[u64]) -> Result<()> {
        debug!(
            "modify: {} leaves, +{} -{}",
            self.state.num_leaves(),
            leaves.len(),
            deletions.len()
        );

        let plan = if deletions.is_empty() {
            None
        } else {
            Some(self.plan_removal(deletions)?)
        };
        let mut expected = plan.as_ref().map_or(self.state, |plan| plan.next);
        expected.add(leaves.len() as u64)?;

        if let Some(plan) = plan {
            self.remove(plan)?;
        }
        self.add(leaves)?;
        self.backend.forget_cached(&self.state)?;

        self.check_consistency()?;
        debug_assert_eq!(self.state, expected);
        Ok(())
    }

    /// Checks that every node a removal touches is available.
    fn plan_removal(&self, deletions: &[u64]) -> Result<RemovalPlan> {
        let plan = self.state.transform(deletions)?;
        let (proof, computed) = self.state.proof_positions(deletions);
        for &position in computed.iter().chain(&proof) {
            if self.backend.read(&self.state, position).is_none() {
                return Err(AccumulatorError::MissingNode(position));
            }
        }
        Ok(plan)
    }

    fn remove(&mut self, plan: RemovalPlan) -> Result<()> {
        let mut dirty: Vec<u64> = Vec::new();

        for (row, swaps) in plan.swaps.iter().enumerate() {
            let mut next_dirty = Vec::with_capacity(dirty.len() + swaps.len() * 2);

            for &position in &dirty {
                let node = self.backend.rehash(&self.state, position)?;
                if let Some(parent) = node.parent(&self.state) {
                    next_dirty.push(parent);
                }
            }

            for &(a, b) in swaps {
                trace!("row {}: swap {} <-> {}", row, a, b);
                self.backend.swap_sub_trees(&self.state, a, b)?;
                for position in [a, b] {
                    if !self.state.is_root(position) {
                        next_dirty.push(self.state.parent(position));
                    }
                }
            }

            next_dirty.sort_unstable();
            next_dirty.dedup();
            dirty = next_dirty;
        }

        self.backend
            .finalize_remove(&self.state, &plan.next, &plan.new_roots)?;
        self.state = plan.next;
        self.roots = read_roots(&self.backend, &self.state)?;
        Ok(())
    }

    fn add<L: Leaf>(&mut self, leaves: &[L]) -> Result<()> {
        for leaf in leaves {
            let carries = self.state.num_leaves().trailing_ones();
            let mut next = self.state;
            next.add(1)?;

            let mut node = self.backend.new_leaf(&next, leaf.hash(), leaf.remember())?;
            for _ in 0..carries {
                let left = self.roots.pop().ok_or_else(|| {
                    AccumulatorError::ShapeMismatch("ran out of roots while merging".to_string())
                })?;
                let parent = next.parent(node.position);
                node = self
                    .backend
                    .merge_root(&next, parent, parent_hash(&left.hash, &node.hash))?;
            }
            self.roots.push(node);
            self.state = next;

            // positions shift whenever the forest grows a row
            for (root, position) in self.roots.iter_mut().zip(self.state.root_positions()) {
                root.position = position;
            }
        }
        Ok(())
    }

    fn check_consistency(&self) -> Result<()> {
        if self.backend.num_leaves() != self.state.num_leaves() {
            return Err(AccumulatorError::ShapeMismatch(format!(
                "backend holds {} leaves, forest has {}",
                self.backend.num_leaves(),
                self.state.num_leaves()
            )));
        }
        if self.roots.len() != self.state.num_roots() {
            return Err(AccumulatorError::ShapeMismatch(format!(
                "{} roots for {} leaves",
                self.roots.len(),
                self.state.num_leaves()
            )));
        }
        if self.config.verify_roots {
            for root in &self.roots {
                if self.backend.read(&self.state, root.position) != Some(root.hash) {
                    warn!("root at {} disagrees with backend", root.position);
                    return Err(AccumulatorError::ShapeMismatch(format!(
                        "root at position {} does not match the backend",
                        root.position
                    )));
                }
            }
        }
        Ok(())
    }
}

fn read_roots<B: ForestBackend>(backend: &B, state: &ForestState) -> Result<Vec<Node>> {
    state
        .root_positions()
        .into_iter()
        .map(|position| {
            backend
                .read(state, position)
                .map(|hash| Node::new(position, hash))
                .ok_or(AccumulatorError::MissingNode(position))
        })
        .collect()
}
