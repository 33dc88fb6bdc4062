//! Configuration for minidfs components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name searched for by [`Config::load`] (any extension `config` understands).
pub const CONFIG_FILE_NAME: &str = "minidfs";

/// Environment prefix, e.g. `MINIDFS__VOLUME__READ_TIMEOUT_SECS=10`.
pub const ENV_PREFIX: &str = "MINIDFS";

/// Reference chunk size: blocks are at most 1 KiB.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Largest `put` the coordinator accepts by default (256 MiB of 1 KiB
/// blocks). Its reply then stays well under `protocol::MAX_REPLY_LEN`.
pub const DEFAULT_MAX_BLOCKS_PER_FILE: usize = 256 * 1024;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging level
    pub log_level: String,

    pub coordinator: CoordinatorConfig,

    pub volume: VolumeConfig,

    pub client: ClientConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            coordinator: CoordinatorConfig::default(),
            volume: VolumeConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bind address for the client protocol
    pub bind_addr: String,

    /// Node registry: one storage-node address per line
    pub registry_path: PathBuf,

    /// JSON catalog, rewritten on every mutation
    pub catalog_path: PathBuf,

    /// Largest block count a `put` may request
    pub max_blocks_per_file: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            registry_path: PathBuf::from("nodeList"),
            catalog_path: PathBuf::from("metadata.json"),
            max_blocks_per_file: DEFAULT_MAX_BLOCKS_PER_FILE,
        }
    }
}

/// Storage daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Bind address for the storage protocol
    pub bind_addr: String,

    /// Directory holding one file per block
    pub data_path: PathBuf,

    /// Largest payload a `store` may declare
    pub max_block_size: usize,

    /// Idle/read timeout per connection
    pub read_timeout_secs: u64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8001".to_string(),
            data_path: PathBuf::from("blocks"),
            max_block_size: DEFAULT_BLOCK_SIZE,
            read_timeout_secs: 30,
        }
    }
}

impl VolumeConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub coordinator_addr: String,

    /// Chunk size used when splitting uploads
    pub block_size: usize,

    pub connect_timeout_secs: u64,

    /// Timeout for each request/response exchange with a peer
    pub io_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: "127.0.0.1:8080".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            connect_timeout_secs: 5,
            io_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

impl Config {
    /// Load `minidfs.toml` from the working directory if present, then
    /// apply `MINIDFS__*` environment overrides.
    pub fn load() -> Result<Self> {
        Self::build(config::File::with_name(CONFIG_FILE_NAME).required(false))
    }

    /// Load a specific config file (must exist), then environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(config::File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the protocol unusable.
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.max_blocks_per_file == 0 {
            return Err(Error::InvalidConfig(
                "coordinator.max_blocks_per_file must be > 0".into(),
            ));
        }
        if self.volume.max_block_size == 0 {
            return Err(Error::InvalidConfig("volume.max_block_size must be > 0".into()));
        }
        if self.volume.read_timeout_secs == 0 {
            return Err(Error::InvalidConfig("volume.read_timeout_secs must be > 0".into()));
        }
        if self.client.block_size == 0 {
            return Err(Error::InvalidConfig("client.block_size must be > 0".into()));
        }
        if self.client.block_size > self.volume.max_block_size {
            return Err(Error::InvalidConfig(format!(
                "client.block_size ({}) exceeds volume.max_block_size ({})",
                self.client.block_size, self.volume.max_block_size
            )));
        }
        if self.client.connect_timeout_secs == 0 || self.client.io_timeout_secs == 0 {
            return Err(Error::InvalidConfig("client timeouts must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.coordinator.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.coordinator.max_blocks_per_file, DEFAULT_MAX_BLOCKS_PER_FILE);
        assert_eq!(config.coordinator.registry_path, PathBuf::from("nodeList"));
        assert_eq!(config.volume.max_block_size, 1024);
        assert_eq!(config.client.block_size, 1024);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[coordinator]
bind_addr = "127.0.0.1:9090"
catalog_path = "/tmp/catalog.json"

[volume]
read_timeout_secs = 5
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.coordinator.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.coordinator.catalog_path, PathBuf::from("/tmp/catalog.json"));
        // untouched fields keep their defaults
        assert_eq!(config.coordinator.registry_path, PathBuf::from("nodeList"));
        assert_eq!(config.volume.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.client.block_size, 1024);
    }

    #[test]
    fn test_missing_log_level_matches_default() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[client]\nblock_size = 512").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.log_level, Config::default().log_level);
        assert_eq!(config.client.block_size, 512);
    }

    #[test]
    fn test_zero_block_limit_rejected() {
        let mut config = Config::default();
        config.coordinator.max_blocks_per_file = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_block_size_larger_than_volume_limit() {
        let mut config = Config::default();
        config.client.block_size = 4096;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
