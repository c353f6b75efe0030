//! Utreexo-style dynamic hash accumulator.
//!
//! 一个基于哈希森林的动态累加器：用少量根哈希承诺一个大集合，
//! 支持批量成员证明以及元素的增删。
//!
//! ## Modules
//! - [`state`]: forest shape and position math
//! - [`proof`]: batch membership proofs
//! - [`accumulator`]: the orchestrator and the [`ForestBackend`] trait
//! - [`backend`]: full ([`RamForest`]) and pruned ([`Pollard`]) storage

#[macro_use]
extern crate log;

pub mod accumulator;
pub mod backend;
pub mod config;
pub mod error;
pub mod hash;
pub mod node;
pub mod proof;
pub mod state;

pub use accumulator::{Accumulator, ForestBackend};
pub use backend::{Pollard, RamForest};
pub use config::ForestConfig;
pub use error::{AccumulatorError, Result};
pub use hash::{parent_hash, Hash};
pub use node::{Leaf, LeafData, Node};
pub use proof::BatchProof;
pub use state::{ForestState, RemovalPlan};
