//! Metadata catalog persisted as a JSON document
//!
//! Stores:
//! - File records (file name → ordered block placements)
//!
//! The whole catalog is rewritten on every mutation: serialized to a
//! temporary sibling file, then renamed over the catalog path.

use crate::common::protocol::PlacementPlan;
use crate::common::{timestamp_now, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Primary and backup node of one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPlacement {
    pub block: usize,
    pub primary: String,
    pub backup: String,
}

/// File metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_name: String,
    pub placements: Vec<BlockPlacement>,
    #[serde(default)]
    pub created_at: u64,
}

impl FileRecord {
    pub fn new(file_name: impl Into<String>, placements: Vec<BlockPlacement>) -> Self {
        Self {
            file_name: file_name.into(),
            placements,
            created_at: timestamp_now(),
        }
    }

    pub fn block_count(&self) -> usize {
        self.placements.len()
    }

    /// Primary node per block, in block order.
    pub fn primaries(&self) -> Vec<String> {
        self.placements.iter().map(|p| p.primary.clone()).collect()
    }

    pub fn backups(&self) -> Vec<String> {
        self.placements.iter().map(|p| p.backup.clone()).collect()
    }

    pub fn plan(&self) -> PlacementPlan {
        PlacementPlan {
            primaries: self.primaries(),
            backups: self.backups(),
        }
    }

    /// Placements must be indexed `0..n` without gaps.
    fn check_contiguous(&self) -> Result<()> {
        for (i, placement) in self.placements.iter().enumerate() {
            if placement.block != i {
                return Err(Error::MetadataCorrupted(format!(
                    "{}: placement {} has block index {}",
                    self.file_name, i, placement.block
                )));
            }
        }
        Ok(())
    }
}

/// Metadata catalog
#[derive(Debug)]
pub struct MetadataCatalog {
    path: PathBuf,
    files: HashMap<String, FileRecord>,
}

impl MetadataCatalog {
    /// Open the catalog at `path`, creating an empty one if missing.
    /// An unreadable or unparsable file is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let files = match std::fs::read(&path) {
            Ok(bytes) => {
                let files: HashMap<String, FileRecord> = serde_json::from_slice(&bytes)
                    .map_err(|e| {
                        Error::MetadataCorrupted(format!("{}: {}", path.display(), e))
                    })?;
                for record in files.values() {
                    record.check_contiguous()?;
                }
                tracing::info!("Loaded catalog {} ({} files)", path.display(), files.len());
                files
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Creating empty catalog {}", path.display());
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        let catalog = Self { path, files };
        if !catalog.path.exists() {
            catalog.persist()?;
        }
        Ok(catalog)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace a record, then persist. Returns the replaced
    /// record. If persisting fails the previous state is restored.
    pub fn put(&mut self, record: FileRecord) -> Result<Option<FileRecord>> {
        record.check_contiguous()?;
        let name = record.file_name.clone();
        let previous = self.files.insert(name.clone(), record);

        if let Err(e) = self.persist() {
            match previous {
                Some(old) => {
                    self.files.insert(name, old);
                }
                None => {
                    self.files.remove(&name);
                }
            }
            return Err(e);
        }

        Ok(previous)
    }

    pub fn get(&self, file_name: &str) -> Option<&FileRecord> {
        self.files.get(file_name)
    }

    /// Remove a record, then persist. `None` if absent.
    pub fn remove(&mut self, file_name: &str) -> Result<Option<FileRecord>> {
        let removed = match self.files.remove(file_name) {
            Some(record) => record,
            None => return Ok(None),
        };

        if let Err(e) = self.persist() {
            self.files.insert(file_name.to_string(), removed);
            return Err(e);
        }

        Ok(Some(removed))
    }

    /// All file names, unordered.
    pub fn list(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Rewrite the full catalog file.
    pub fn persist(&self) -> Result<()> {
        let data = serde_json::to_vec(&self.files)
            .map_err(|e| Error::Internal(format!("Serialize error: {}", e)))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &data)?;
        std::fs::rename(&tmp_path, &self.path)?;

        tracing::debug!("Catalog persisted: {} files", self.files.len());
        Ok(())
    }
}
