//! Block storage: one file per block key
//!
//! Layout: `<data_path>/<percent-encoded key>`. Writes go to a uniquely
//! named temporary file first and are renamed into place, so concurrent
//! writers to one key never interleave bytes; the last rename wins.

use crate::common::{decode_key, encode_key, Error, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

const TMP_SUFFIX: &str = ".tmp";

/// Block store rooted at a local directory
#[derive(Debug, Clone)]
pub struct BlockStore {
    data_path: PathBuf,
    max_block_size: usize,
}

impl BlockStore {
    /// Open or create block store
    pub fn open(data_path: impl AsRef<Path>, max_block_size: usize) -> Result<Self> {
        let data_path = data_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_path)?;

        tracing::info!(
            "BlockStore opened at {} (max block size {})",
            data_path.display(),
            max_block_size
        );

        Ok(Self {
            data_path,
            max_block_size,
        })
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    fn block_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key == "." || key == ".." {
            return Err(Error::InvalidRequest(format!("invalid block key {:?}", key)));
        }
        Ok(self.data_path.join(encode_key(key)))
    }

    /// Store a block, overwriting any previous content.
    pub async fn store(&self, key: &str, data: &[u8]) -> Result<()> {
        if data.len() > self.max_block_size {
            return Err(Error::InvalidRequest(format!(
                "block {} is {} bytes, limit is {}",
                key,
                data.len(),
                self.max_block_size
            )));
        }

        let path = self.block_path(key)?;
        let tmp_path = self.data_path.join(format!(
            ".{}.{}{}",
            encode_key(key),
            uuid::Uuid::new_v4().simple(),
            TMP_SUFFIX
        ));

        if let Err(e) = tokio::fs::write(&tmp_path, data).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp_path, &path).await?;

        tracing::debug!("Stored {} ({} bytes)", key, data.len());
        Ok(())
    }

    /// Read a block (at most `max_block_size` bytes). `None` if absent.
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.block_path(key)?;

        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.take(self.max_block_size as u64)
            .read_to_end(&mut data)
            .await?;
        Ok(Some(data))
    }

    /// Delete a block. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let path = self.block_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys of every stored block, unordered.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.data_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            if name.starts_with('.') && name.ends_with(TMP_SUFFIX) {
                continue;
            }
            keys.push(decode_key(name)?);
        }
        Ok(keys)
    }
}
