//! Block placement over a fixed node registry
//!
//! Block `i` of a file goes to `registry[i mod R]`, and its backup copy to
//! `registry[(i + 2) mod R]`. The policy is deterministic and has no health
//! awareness; unreachable nodes are dealt with by the client at read time.

use crate::common::config::DEFAULT_MAX_BLOCKS_PER_FILE;
use crate::common::{Error, Result};
use crate::coordinator::catalog::BlockPlacement;
use std::path::Path;

/// Distance, in registry slots, between a block's primary and its backup.
pub const BACKUP_OFFSET: usize = 2;

/// Ordered, immutable list of storage-node addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegistry {
    nodes: Vec<String>,
}

impl NodeRegistry {
    /// Build a registry. An empty list is fatal.
    pub fn new(nodes: Vec<String>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::Fatal("node registry is empty".into()));
        }
        if nodes.len() <= BACKUP_OFFSET {
            tracing::warn!(
                "Node registry has only {} node(s): backups will share a node with their primary",
                nodes.len()
            );
        }
        Ok(Self { nodes })
    }

    /// Load the registry file: one address per line, blank lines and
    /// `#` comments ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Fatal(format!(
                "cannot read node registry {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let nodes = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self::new(nodes)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Node at `slot mod len`.
    pub fn node_at(&self, slot: usize) -> &str {
        &self.nodes[slot % self.nodes.len()]
    }
}

/// PlacementManager assigns a primary and a backup node to each block.
#[derive(Debug, Clone)]
pub struct PlacementManager {
    registry: NodeRegistry,
    max_blocks: usize,
}

impl PlacementManager {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            registry,
            max_blocks: DEFAULT_MAX_BLOCKS_PER_FILE,
        }
    }

    /// Cap on blocks per file; larger `put`s are rejected before anything
    /// is allocated.
    pub fn with_max_blocks(mut self, max_blocks: usize) -> Self {
        self.max_blocks = max_blocks;
        self
    }

    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Placements for blocks `0..block_count`.
    pub fn place(&self, block_count: i64) -> Result<Vec<BlockPlacement>> {
        if block_count <= 0 {
            return Err(Error::InvalidRequest(format!(
                "block count must be positive, got {}",
                block_count
            )));
        }
        let block_count = usize::try_from(block_count)
            .ok()
            .filter(|&n| n <= self.max_blocks)
            .ok_or_else(|| {
                Error::InvalidRequest(format!(
                    "block count {} exceeds limit of {}",
                    block_count, self.max_blocks
                ))
            })?;

        Ok((0..block_count)
            .map(|block| BlockPlacement {
                block,
                primary: self.registry.node_at(block).to_string(),
                backup: self.registry.node_at(block + BACKUP_OFFSET).to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(nodes: &[&str]) -> NodeRegistry {
        NodeRegistry::new(nodes.iter().map(|n| n.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_place_three_nodes() {
        let manager = PlacementManager::new(registry(&["A", "B", "C"]));
        let placements = manager.place(3).unwrap();

        let primaries: Vec<&str> = placements.iter().map(|p| p.primary.as_str()).collect();
        let backups: Vec<&str> = placements.iter().map(|p| p.backup.as_str()).collect();
        assert_eq!(primaries, vec!["A", "B", "C"]);
        assert_eq!(backups, vec!["C", "A", "B"]);
        assert_eq!(
            placements.iter().map(|p| p.block).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_place_is_deterministic_modulo_registry() {
        let nodes = ["n0", "n1", "n2", "n3", "n4"];
        let manager = PlacementManager::new(registry(&nodes));

        for block_count in [1i64, 4, 5, 11, 23] {
            let placements = manager.place(block_count).unwrap();
            assert_eq!(placements.len(), block_count as usize);
            for (i, p) in placements.iter().enumerate() {
                assert_eq!(p.primary, nodes[i % nodes.len()]);
                assert_eq!(p.backup, nodes[(i + 2) % nodes.len()]);
            }
            assert_eq!(placements, manager.place(block_count).unwrap());
        }
    }

    #[test]
    fn test_small_registry_colocates_backup() {
        let manager = PlacementManager::new(registry(&["solo"]));
        let placements = manager.place(2).unwrap();
        assert!(placements.iter().all(|p| p.primary == "solo" && p.backup == "solo"));
    }

    #[test]
    fn test_invalid_block_count() {
        let manager = PlacementManager::new(registry(&["A"]));
        assert!(matches!(manager.place(0), Err(Error::InvalidRequest(_))));
        assert!(matches!(manager.place(-4), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_block_count_limit() {
        let manager = PlacementManager::new(registry(&["A", "B", "C"])).with_max_blocks(8);
        assert_eq!(manager.place(8).unwrap().len(), 8);
        assert!(matches!(manager.place(9), Err(Error::InvalidRequest(_))));

        let manager = PlacementManager::new(registry(&["A", "B", "C"]));
        assert_eq!(manager.max_blocks(), DEFAULT_MAX_BLOCKS_PER_FILE);
        assert!(matches!(
            manager.place(9_999_999_999),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_empty_registry_is_fatal() {
        assert!(matches!(NodeRegistry::new(vec![]), Err(Error::Fatal(_))));
        assert!(matches!(
            NodeRegistry::parse("\n  \n# nothing here\n"),
            Err(Error::Fatal(_))
        ));
    }

    #[test]
    fn test_registry_parse_and_load() {
        let registry = NodeRegistry::parse("localhost:8001\n\n  localhost:8002  \n# spare\nlocalhost:8003\n")
            .unwrap();
        assert_eq!(
            registry.nodes(),
            &["localhost:8001", "localhost:8002", "localhost:8003"]
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodeList");
        std::fs::write(&path, "a:1\nb:2\n").unwrap();
        assert_eq!(NodeRegistry::load(&path).unwrap().len(), 2);

        assert!(matches!(
            NodeRegistry::load(dir.path().join("missing")),
            Err(Error::Fatal(_))
        ));
    }
}
