//! Storage backends for the forest.
//!
//! - [`RamForest`]: keeps every node, can prove any leaf.
//! - [`Pollard`]: keeps only roots and remembered leaves with their proofs.

mod leaf_index;
pub mod pollard;
pub mod ram_forest;

pub use pollard::Pollard;
pub use ram_forest::RamForest;
