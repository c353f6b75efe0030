pub use accumulator::{
    parent_hash, Accumulator, AccumulatorError, BatchProof, ForestBackend, ForestConfig,
    ForestState, Hash, Leaf, LeafData, Node, Pollard, RamForest,
};

use anyhow::Context;
use std::path::Path;

/// Build an accumulator that keeps the whole forest in memory
pub fn ram_forest(config: &ForestConfig) -> anyhow::Result<Accumulator<RamForest>> {
    let backend = RamForest::with_capacity(config.reserve_leaves);
    Ok(Accumulator::with_config(backend, config.clone())?)
}

/// Build an accumulator that only keeps roots and remembered leaves
pub fn pollard(config: &ForestConfig) -> anyhow::Result<Accumulator<Pollard>> {
    let backend = Pollard::with_capacity(config.reserve_leaves);
    Ok(Accumulator::with_config(backend, config.clone())?)
}

/// Load forest configuration from a JSON file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<ForestConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: ForestConfig = serde_json::from_str(&content)
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

/// Save forest configuration to a JSON file
pub fn save_config(config: &ForestConfig, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path.as_ref(), content)
        .with_context(|| format!("failed to write config {}", path.as_ref().display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.json");

        let config = ForestConfig {
            reserve_leaves: 1024,
            verify_roots: false,
        };
        save_config(&config, &path).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }

    #[test]
    fn test_backends_from_config() {
        let config = ForestConfig::default();
        let mut full = ram_forest(&config).unwrap();
        let mut pruned = pollard(&config).unwrap();

        let hashes: Vec<Hash> = (0u8..9).map(|i| Hash::digest([i])).collect();
        full.modify(&hashes, &[]).unwrap();
        pruned.modify(&hashes, &[]).unwrap();
        assert_eq!(full.roots(), pruned.roots());
        assert_eq!(full.roots().len(), 2);
    }
}
