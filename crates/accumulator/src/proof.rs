use crate::hash::{parent_hash, Hash};
use crate::state::ForestState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Membership proof for a batch of leaves.
///
/// `proof` holds the sibling digests a verifier cannot derive from the targets
/// themselves, ordered row by row from the leaves and left to right inside a
/// row. The same order is produced by [`ForestState::proof_positions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProof {
    targets: Vec<u64>,
    proof: Vec<Hash>,
}

impl BatchProof {
    pub fn new(targets: Vec<u64>, proof: Vec<Hash>) -> Self {
        Self { targets, proof }
    }

    pub fn targets(&self) -> &[u64] {
        &self.targets
    }

    pub fn proof(&self) -> &[Hash] {
        &self.proof
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// 证明大小（字节）
    pub fn size_of(&self) -> usize {
        self.targets.len() * std::mem::size_of::<u64>() + self.proof.len() * 32
    }

    /// Checks the proof against a set of roots.
    ///
    /// `target_hashes[i]` is the claimed digest of `targets()[i]`. Any malformed
    /// input yields `false`.
    pub fn verify(&self, state: &ForestState, roots: &[Hash], target_hashes: &[Hash]) -> bool {
        self.derive(state, roots, target_hashes).is_some()
    }

    /// Replays the verification and returns every `(position, hash)` it touched:
    /// targets, proof siblings, and derived parents up to the roots.
    pub(crate) fn derive(
        &self,
        state: &ForestState,
        roots: &[Hash],
        target_hashes: &[Hash],
    ) -> Option<Vec<(u64, Hash)>> {
        if self.targets.len() != target_hashes.len() || roots.len() != state.num_roots() {
            return None;
        }

        let mut known = BTreeMap::new();
        for (&target, &hash) in self.targets.iter().zip(target_hashes) {
            if target >= state.num_leaves() || known.insert(target, hash).is_some() {
                return None;
            }
        }

        let mut proof = self.proof.iter();
        let mut nodes = Vec::with_capacity(self.targets.len() * 2 + self.proof.len());

        while let Some((position, hash)) = known.pop_first() {
            nodes.push((position, hash));

            if let Some(index) = state.root_index(position) {
                if roots[index] != hash {
                    trace!("root {} mismatch at position {}", index, position);
                    return None;
                }
                continue;
            }

            let sibling_position = state.sibling(position);
            let next_known = known.first_key_value().map(|(&p, _)| p);
            let sibling = if position & 1 == 0 && next_known == Some(sibling_position) {
                known.pop_first()?.1
            } else {
                *proof.next()?
            };
            nodes.push((sibling_position, sibling));

            let parent = if position & 1 == 0 {
                parent_hash(&hash, &sibling)
            } else {
                parent_hash(&sibling, &hash)
            };
            if known.insert(state.parent(position), parent).is_some() {
                return None;
            }
        }

        if proof.next().is_some() {
            return None;
        }
        Some(nodes)
    }
}

impl fmt::Display for BatchProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BatchProof targets={:?}", self.targets)?;
        for (i, hash) in self.proof.iter().enumerate() {
            writeln!(f, "  [{}] {}", i, hash)?;
        }
        Ok(())
    }
}
