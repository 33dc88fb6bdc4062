//! Volume server

use crate::common::protocol::{
    read_line, read_payload, write_block, write_not_found, VolumeRequest,
};
use crate::common::{with_timeout, Error, Result, VolumeConfig};
use crate::volume::blocks::BlockStore;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};

pub struct VolumeServer {
    config: VolumeConfig,
}

impl VolumeServer {
    pub fn new(config: VolumeConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve_listener(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve_listener(self, listener: TcpListener) -> Result<()> {
        tracing::info!("Starting volume server");
        tracing::info!("  Listening on: {}", listener.local_addr()?);
        tracing::info!("  Data path: {}", self.config.data_path.display());
        tracing::info!("  Read timeout: {:?}", self.config.read_timeout());

        let store = BlockStore::open(&self.config.data_path, self.config.max_block_size)?;
        let read_timeout = self.config.read_timeout();

        tracing::info!("✓ Volume server ready");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("Error accepting connection: {}", e);
                    continue;
                }
            };
            tracing::debug!("Client connected: {}", peer);

            let store = store.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, store, read_timeout).await {
                    tracing::warn!("Connection {} closed: {}", peer, e);
                }
            });
        }
    }
}

/// Serve commands until EOF, idle timeout, or a framing error.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    store: BlockStore,
    read_timeout: Duration,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let line = match with_timeout(read_timeout, "waiting for command", read_line(&mut reader)).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("Client disconnected: {}", peer);
                return Ok(());
            }
            Err(Error::Timeout(_)) => {
                tracing::debug!("Closing idle connection {}", peer);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        // Framing cannot be recovered after a bad command line.
        let request = VolumeRequest::parse(&line)?;
        tracing::debug!("{} -> {:?}", peer, request);

        match request {
            VolumeRequest::Store { key, len } => {
                if len > store.max_block_size() {
                    return Err(Error::InvalidRequest(format!(
                        "store {} declares {} bytes, limit is {}",
                        key,
                        len,
                        store.max_block_size()
                    )));
                }
                let data = with_timeout(
                    read_timeout,
                    format!("reading payload of {}", key),
                    read_payload(&mut reader, len),
                )
                .await?;

                match store.store(&key, &data).await {
                    Ok(()) => tracing::info!("STORE {} ({} bytes)", key, len),
                    Err(e) => tracing::error!("STORE {} failed: {}", key, e),
                }
            }
            VolumeRequest::Read { key } => match store.read(&key).await? {
                Some(data) => {
                    tracing::info!("READ {} ({} bytes)", key, data.len());
                    write_block(&mut write_half, &data).await?;
                }
                None => {
                    tracing::warn!("READ {}: block not found", key);
                    write_not_found(&mut write_half).await?;
                }
            },
            VolumeRequest::Remove { key } => match store.remove(&key).await {
                Ok(true) => tracing::info!("RM {}", key),
                Ok(false) => tracing::debug!("RM {}: already absent", key),
                Err(e) => tracing::error!("RM {} failed: {}", key, e),
            },
        }
    }
}
