use serde::{Deserialize, Serialize};

/// Tuning knobs for an accumulator instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Leaf slots a backend should allocate up front.
    pub reserve_leaves: usize,
    /// Re-read every root from the backend after each `modify`.
    pub verify_roots: bool,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            reserve_leaves: 0,
            verify_roots: true,
        }
    }
}
