//! Connection to one storage daemon

use crate::common::protocol::{read_block, write_line, write_store, VolumeRequest};
use crate::common::{with_timeout, Error, Result};
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub struct VolumeClient {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    io_timeout: Duration,
}

/// Dial `addr` within `connect_timeout`.
pub(crate) async fn dial(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(Error::ConnectionFailed(format!("{}: {}", addr, e))),
        Err(_) => {
            return Err(Error::ConnectionFailed(format!(
                "{}: connect timed out after {:?}",
                addr, connect_timeout
            )))
        }
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

impl VolumeClient {
    pub async fn connect(addr: &str, connect_timeout: Duration, io_timeout: Duration) -> Result<Self> {
        let stream = dial(addr, connect_timeout).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            addr: addr.to_string(),
            reader: BufReader::new(read_half),
            writer: write_half,
            io_timeout,
        })
    }

    /// Send a block. The daemon never replies to `store`, so completion is
    /// observed as the daemon closing the connection after our half-close.
    pub async fn store(mut self, key: &str, data: &[u8]) -> Result<()> {
        let addr = self.addr.clone();
        let io_timeout = self.io_timeout;
        with_timeout(io_timeout, format!("store {} on {}", key, addr), async {
            write_store(&mut self.writer, key, data).await?;
            self.finish().await
        })
        .await
        .map_err(|e| annotate(&addr, "store", e))
    }

    /// Fetch a block. The missing-block sentinel becomes [`Error::NotFound`].
    pub async fn read(&mut self, key: &str, max_len: usize) -> Result<Bytes> {
        let addr = self.addr.clone();
        let request = VolumeRequest::Read {
            key: key.to_string(),
        };
        let reply = with_timeout(self.io_timeout, format!("read {} on {}", key, addr), async {
            self.writer.write_all(request.to_line().as_bytes()).await?;
            self.writer.flush().await?;
            read_block(&mut self.reader, max_len).await
        })
        .await
        .map_err(|e| annotate(&addr, "read", e))?;

        reply.ok_or_else(|| Error::NotFound(format!("{} on {}", key, addr)))
    }

    /// Delete a block; absent blocks are not an error on the daemon side.
    pub async fn remove(mut self, key: &str) -> Result<()> {
        let addr = self.addr.clone();
        let line = VolumeRequest::Remove {
            key: key.to_string(),
        }
        .to_line();
        with_timeout(self.io_timeout, format!("rm {} on {}", key, addr), async {
            write_line(&mut self.writer, line.trim_end()).await?;
            self.finish().await
        })
        .await
        .map_err(|e| annotate(&addr, "rm", e))
    }

    /// Half-close and wait for the daemon to hang up.
    async fn finish(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        let mut sink = [0u8; 256];
        loop {
            if self.reader.read(&mut sink).await? == 0 {
                return Ok(());
            }
        }
    }
}

/// Attach the peer address to transport-level failures.
fn annotate(addr: &str, op: &str, e: Error) -> Error {
    match e {
        Error::Io(io) => Error::ConnectionFailed(format!("{} on {}: {}", op, addr, io)),
        Error::ConnectionFailed(msg) if !msg.starts_with(addr) => {
            Error::ConnectionFailed(format!("{} on {}: {}", op, addr, msg))
        }
        Error::Protocol(msg) => Error::Protocol(format!("{} on {}: {}", op, addr, msg)),
        other => other,
    }
}
