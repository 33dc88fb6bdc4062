//! Client orchestration: chunking, replica writes and read-time failover
//!
//! Transfers are sequential, one connection per block copy, in block
//! order. Uploads write every primary copy first, then every backup copy.

use crate::client::coordinator_client::CoordinatorClient;
use crate::client::volume_client::VolumeClient;
use crate::common::protocol::PlacementPlan;
use crate::common::{
    backup_block_key, primary_block_key, split_blocks, validate_file_name, ClientConfig, Error,
    Result,
};
use bytes::Bytes;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub blocks: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub blocks: usize,
    pub bytes: u64,
    /// Blocks served by their backup copy.
    pub recovered: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoveReport {
    pub deleted: usize,
    /// One description per delete that could not be sent.
    pub failures: Vec<String>,
}

pub struct DfsClient {
    coordinator: CoordinatorClient,
    config: ClientConfig,
}

impl DfsClient {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let coordinator = Self::dial_coordinator(&config).await?;
        Ok(Self {
            coordinator,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn dial_coordinator(config: &ClientConfig) -> Result<CoordinatorClient> {
        CoordinatorClient::connect(
            &config.coordinator_addr,
            config.connect_timeout(),
            config.io_timeout(),
        )
        .await
    }

    /// The coordinator session, redialed if an earlier exchange broke it.
    async fn coordinator(&mut self) -> Result<&mut CoordinatorClient> {
        if self.coordinator.is_broken() {
            tracing::info!(
                "Reconnecting to coordinator {}",
                self.config.coordinator_addr
            );
            self.coordinator = Self::dial_coordinator(&self.config).await?;
        }
        Ok(&mut self.coordinator)
    }

    /// Best-effort removal of a catalog entry whose blocks never landed.
    async fn abandon(&mut self, remote_name: &str) {
        let result = match self.coordinator().await {
            Ok(coordinator) => coordinator.rm(remote_name).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!("Could not drop catalog entry for {}: {}", remote_name, e)
            }
        }
    }

    /// Split a local file into blocks and write a primary and a backup
    /// copy of each. Any failed block write aborts the upload.
    pub async fn upload(&mut self, local_path: impl AsRef<Path>, remote_name: &str) -> Result<UploadReport> {
        validate_file_name(remote_name)?;
        let local_path = local_path.as_ref();

        let data = tokio::fs::read(local_path).await?;
        let bytes = data.len() as u64;
        let blocks = split_blocks(Bytes::from(data), self.config.block_size);
        tracing::info!(
            "Uploading {} as {}: {} bytes in {} blocks",
            local_path.display(),
            remote_name,
            bytes,
            blocks.len()
        );

        let placed = self.coordinator().await?.put(remote_name, blocks.len()).await;
        let plan = match placed {
            Ok(plan) => plan,
            // rejected outright; nothing was recorded
            Err(e @ Error::Remote(_)) => return Err(e),
            Err(e) => {
                tracing::error!("Upload of {} aborted, no usable placement: {}", remote_name, e);
                self.abandon(remote_name).await;
                return Err(e);
            }
        };

        if let Err(e) = self.write_replicas(remote_name, &plan, &blocks).await {
            tracing::error!("Upload of {} aborted: {}", remote_name, e);
            // the placement was only an intent; don't leave it in the catalog
            self.abandon(remote_name).await;
            return Err(e);
        }

        Ok(UploadReport {
            blocks: blocks.len(),
            bytes,
        })
    }

    async fn write_replicas(&self, remote_name: &str, plan: &PlacementPlan, blocks: &[Bytes]) -> Result<()> {
        for (i, block) in blocks.iter().enumerate() {
            let node = plan
                .primary(i)
                .ok_or_else(|| Error::Protocol(format!("no primary for block {}", i)))?;
            tracing::debug!("Sending block {} to {}", i, node);
            self.store_block(node, &primary_block_key(remote_name, i), block)
                .await?;
        }

        for (i, block) in blocks.iter().enumerate() {
            let node = plan
                .backup(i)
                .ok_or_else(|| Error::Protocol(format!("no backup for block {}", i)))?;
            tracing::debug!("Sending backup of block {} to {}", i, node);
            self.store_block(node, &backup_block_key(remote_name, i), block)
                .await?;
        }

        Ok(())
    }

    /// Fetch every block (primary first, backup on failure) and write the
    /// reassembled file to `local_path`.
    pub async fn download(&mut self, remote_name: &str, local_path: impl AsRef<Path>) -> Result<DownloadReport> {
        validate_file_name(remote_name)?;
        let local_path = local_path.as_ref();

        let primaries = self.coordinator().await?.get(remote_name).await?;
        tracing::info!("Downloading {}: {} blocks", remote_name, primaries.len());

        let mut plan: Option<PlacementPlan> = None;
        let mut recovered = Vec::new();
        let mut data = Vec::with_capacity(primaries.len() * self.config.block_size);

        for (i, primary) in primaries.iter().enumerate() {
            let block = match self
                .read_block(primary, &primary_block_key(remote_name, i))
                .await
            {
                Ok(block) => block,
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        "Block {} of {}: primary {} failed ({}), trying backup",
                        i,
                        remote_name,
                        primary,
                        e
                    );
                    let block = self
                        .read_backup(remote_name, i, primary, &mut plan, e)
                        .await?;
                    recovered.push(i);
                    block
                }
                Err(e) => return Err(e),
            };
            data.extend_from_slice(&block);
        }

        tokio::fs::write(local_path, &data).await?;

        Ok(DownloadReport {
            blocks: primaries.len(),
            bytes: data.len() as u64,
            recovered,
        })
    }

    /// Single retry of block `index` against its backup node.
    async fn read_backup(
        &mut self,
        remote_name: &str,
        index: usize,
        primary: &str,
        plan: &mut Option<PlacementPlan>,
        primary_error: Error,
    ) -> Result<Bytes> {
        let unavailable = |backup: &str, reason: String| Error::BlockUnavailable {
            block: index,
            primary: primary.to_string(),
            backup: backup.to_string(),
            reason,
        };

        if plan.is_none() {
            let located = match self.coordinator().await {
                Ok(coordinator) => coordinator.locate(remote_name).await,
                Err(e) => Err(e),
            };
            match located {
                Ok(located) => *plan = Some(located),
                Err(e) => {
                    return Err(unavailable(
                        "unknown",
                        format!("primary: {}; locating backup: {}", primary_error, e),
                    ))
                }
            }
        }

        let backup = match plan.as_ref().and_then(|p| p.backup(index)) {
            Some(node) => node.to_string(),
            None => {
                return Err(unavailable(
                    "unknown",
                    format!("primary: {}; no backup recorded", primary_error),
                ))
            }
        };

        match self
            .read_block(&backup, &backup_block_key(remote_name, index))
            .await
        {
            Ok(block) => {
                tracing::info!("Block {} of {} recovered from {}", index, remote_name, backup);
                Ok(block)
            }
            Err(e) => Err(unavailable(
                &backup,
                format!("primary: {}; backup: {}", primary_error, e),
            )),
        }
    }

    /// Primary node of each block.
    pub async fn info(&mut self, remote_name: &str) -> Result<Vec<String>> {
        validate_file_name(remote_name)?;
        self.coordinator().await?.info(remote_name).await
    }

    pub async fn ls(&mut self) -> Result<Vec<String>> {
        self.coordinator().await?.ls().await
    }

    /// Drop the catalog entry and delete every block copy, best effort.
    pub async fn remove(&mut self, remote_name: &str) -> Result<RemoveReport> {
        validate_file_name(remote_name)?;

        // backups are only known while the entry still exists
        let backups = match self.coordinator().await?.locate(remote_name).await {
            Ok(plan) => plan.backups,
            Err(Error::NotFound(name)) => return Err(Error::NotFound(name)),
            Err(e) => {
                tracing::warn!("Could not locate backups of {}: {}", remote_name, e);
                Vec::new()
            }
        };

        let primaries = self.coordinator().await?.rm(remote_name).await?;
        tracing::info!("Removed {} from catalog, deleting {} blocks", remote_name, primaries.len());

        let mut report = RemoveReport::default();
        for (i, node) in primaries.iter().enumerate() {
            self.remove_block_best_effort(node, &primary_block_key(remote_name, i), &mut report)
                .await;
        }
        if backups.len() == primaries.len() {
            for (i, node) in backups.iter().enumerate() {
                self.remove_block_best_effort(node, &backup_block_key(remote_name, i), &mut report)
                    .await;
            }
        } else if !backups.is_empty() {
            tracing::warn!(
                "{} changed while removing; backup copies left in place",
                remote_name
            );
        }

        Ok(report)
    }

    async fn remove_block_best_effort(&self, node: &str, key: &str, report: &mut RemoveReport) {
        match self.remove_block(node, key).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                tracing::warn!("Delete of {} on {} failed: {}", key, node, e);
                report.failures.push(format!("{} on {}: {}", key, node, e));
            }
        }
    }

    async fn store_block(&self, node: &str, key: &str, data: &[u8]) -> Result<()> {
        let client = VolumeClient::connect(node, self.config.connect_timeout(), self.config.io_timeout()).await?;
        client.store(key, data).await
    }

    async fn read_block(&self, node: &str, key: &str) -> Result<Bytes> {
        let mut client =
            VolumeClient::connect(node, self.config.connect_timeout(), self.config.io_timeout()).await?;
        client.read(key, self.config.block_size).await
    }

    async fn remove_block(&self, node: &str, key: &str) -> Result<()> {
        let client = VolumeClient::connect(node, self.config.connect_timeout(), self.config.io_timeout()).await?;
        client.remove(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::protocol::{read_line, write_line};
    use std::sync::{Arc, Mutex};
    use tokio::io::BufReader;
    use tokio::net::TcpListener;

    /// Coordinator stand-in. `script(connection, line)` gives the reply, or
    /// `None` to hang up. Connections are served one after another.
    async fn scripted_coordinator<F>(script: F) -> (String, Arc<Mutex<Vec<String>>>)
    where
        F: Fn(usize, &str) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        tokio::spawn(async move {
            let mut connection = 0;
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                while let Ok(Some(line)) = read_line(&mut reader).await {
                    log.lock().unwrap().push(line.clone());
                    match script(connection, &line) {
                        Some(reply) => write_line(&mut write_half, &reply).await.unwrap(),
                        None => break,
                    }
                }
                connection += 1;
            }
        });

        (addr, seen)
    }

    fn config(addr: &str) -> ClientConfig {
        ClientConfig {
            coordinator_addr: addr.to_string(),
            connect_timeout_secs: 2,
            io_timeout_secs: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_session_redialed_after_failed_exchange() {
        let (addr, _) = scripted_coordinator(|connection, _| {
            (connection > 0).then(|| "a,b".to_string())
        })
        .await;
        let mut client = DfsClient::connect(config(&addr)).await.unwrap();

        assert!(matches!(client.ls().await, Err(Error::ConnectionFailed(_))));
        assert_eq!(client.ls().await.unwrap(), vec!["a", "b"]);
        assert_eq!(client.ls().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unusable_placement_drops_catalog_entry() {
        let (addr, seen) = scripted_coordinator(|_, line| match line {
            // one pair short for three blocks
            "put doc 3" => Some("A,B,C,A".to_string()),
            "rm doc" => Some("A,B,C".to_string()),
            _ => Some(String::new()),
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("doc.in");
        std::fs::write(&input, vec![7u8; 2500]).unwrap();

        let mut client = DfsClient::connect(config(&addr)).await.unwrap();
        let err = client.upload(&input, "doc").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {:?}", err);
        assert_eq!(*seen.lock().unwrap(), vec!["put doc 3", "rm doc"]);
    }

    #[tokio::test]
    async fn test_lost_placement_reply_drops_catalog_entry() {
        let (addr, seen) = scripted_coordinator(|connection, _| {
            (connection > 0).then(String::new)
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("doc.in");
        std::fs::write(&input, b"hello").unwrap();

        let mut client = DfsClient::connect(config(&addr)).await.unwrap();
        let err = client.upload(&input, "doc").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)), "got {:?}", err);
        // cleanup went out on a fresh session
        assert_eq!(*seen.lock().unwrap(), vec!["put doc 1", "rm doc"]);
    }

    #[tokio::test]
    async fn test_rejected_put_sends_no_cleanup() {
        let (addr, seen) = scripted_coordinator(|_, _| Some("ERR block count too large".to_string())).await;
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("doc.in");
        std::fs::write(&input, b"hello").unwrap();

        let mut client = DfsClient::connect(config(&addr)).await.unwrap();
        let err = client.upload(&input, "doc").await.unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
        assert_eq!(*seen.lock().unwrap(), vec!["put doc 1"]);
    }
}
