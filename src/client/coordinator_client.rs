//! Persistent connection to the coordinator

use crate::client::volume_client::dial;
use crate::common::protocol::{
    read_line_limited, CoordRequest, PlacementPlan, ERROR_PREFIX, MAX_REPLY_LEN,
};
use crate::common::{split_list, with_timeout, Error, Result};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// One request line out, one reply line back.
pub struct CoordinatorClient {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    io_timeout: Duration,
    /// Set when an exchange was cut short; replies may be out of step.
    broken: bool,
}

impl CoordinatorClient {
    pub async fn connect(addr: &str, connect_timeout: Duration, io_timeout: Duration) -> Result<Self> {
        let stream = dial(addr, connect_timeout).await?;
        tracing::info!("Connected to coordinator {}", addr);

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            addr: addr.to_string(),
            reader: BufReader::new(read_half),
            writer: write_half,
            io_timeout,
            broken: false,
        })
    }

    /// A broken session must be replaced with a fresh connection.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Raw exchange. `ERR` replies become [`Error::Remote`].
    pub async fn request(&mut self, request: &CoordRequest) -> Result<String> {
        if self.broken {
            return Err(Error::ConnectionFailed(format!(
                "coordinator {}: connection unusable after an earlier failure",
                self.addr
            )));
        }

        let line = request.to_line();
        tracing::debug!("-> coordinator: {:?}", line.trim_end());

        let io_timeout = self.io_timeout;
        let what = format!("coordinator {}", self.addr);
        let writer = &mut self.writer;
        let reader = &mut self.reader;
        let result = with_timeout(io_timeout, what, async move {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            read_line_limited(reader, MAX_REPLY_LEN).await
        })
        .await;

        let reply = match result {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                self.broken = true;
                return Err(Error::ConnectionFailed(format!(
                    "coordinator {} closed the connection",
                    self.addr
                )));
            }
            Err(e) => {
                self.broken = true;
                return Err(match e {
                    Error::Io(io) => {
                        Error::ConnectionFailed(format!("coordinator {}: {}", self.addr, io))
                    }
                    other => other,
                });
            }
        };
        tracing::debug!("<- coordinator: {:?}", reply);

        match reply.strip_prefix(ERROR_PREFIX) {
            Some(message) => Err(Error::Remote(message.to_string())),
            None => Ok(reply),
        }
    }

    /// Register a file and get its placement plan.
    pub async fn put(&mut self, file_name: &str, block_count: usize) -> Result<PlacementPlan> {
        let block_count_wire = i64::try_from(block_count)
            .map_err(|_| Error::InvalidRequest(format!("too many blocks: {}", block_count)))?;
        let reply = self
            .request(&CoordRequest::Put {
                file_name: file_name.to_string(),
                block_count: block_count_wire,
            })
            .await?;
        PlacementPlan::from_wire(&reply, Some(block_count))
    }

    /// Primary node per block.
    pub async fn get(&mut self, file_name: &str) -> Result<Vec<String>> {
        let reply = self
            .request(&CoordRequest::Get {
                file_name: file_name.to_string(),
            })
            .await?;
        non_empty(file_name, split_list(&reply))
    }

    pub async fn info(&mut self, file_name: &str) -> Result<Vec<String>> {
        let reply = self
            .request(&CoordRequest::Info {
                file_name: file_name.to_string(),
            })
            .await?;
        non_empty(file_name, split_list(&reply))
    }

    pub async fn ls(&mut self) -> Result<Vec<String>> {
        let reply = self.request(&CoordRequest::Ls).await?;
        Ok(split_list(&reply))
    }

    /// Drop the catalog entry; returns the primaries it pointed to.
    pub async fn rm(&mut self, file_name: &str) -> Result<Vec<String>> {
        let reply = self
            .request(&CoordRequest::Rm {
                file_name: file_name.to_string(),
            })
            .await?;
        non_empty(file_name, split_list(&reply))
    }

    pub async fn locate(&mut self, file_name: &str) -> Result<PlacementPlan> {
        let reply = self
            .request(&CoordRequest::Locate {
                file_name: file_name.to_string(),
            })
            .await?;
        let plan = PlacementPlan::from_wire(&reply, None)?;
        if plan.is_empty() {
            return Err(Error::NotFound(file_name.to_string()));
        }
        Ok(plan)
    }
}

fn non_empty(file_name: &str, nodes: Vec<String>) -> Result<Vec<String>> {
    if nodes.is_empty() {
        Err(Error::NotFound(file_name.to_string()))
    } else {
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::server::serve_listener;
    use crate::coordinator::{CoordState, MetadataCatalog, NodeRegistry, PlacementManager};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn start_coordinator(dir: &std::path::Path) -> String {
        let registry = NodeRegistry::new(vec!["A".into(), "B".into(), "C".into()]).unwrap();
        let catalog = MetadataCatalog::open(dir.join("metadata.json")).unwrap();
        let state = Arc::new(CoordState::new(PlacementManager::new(registry), catalog));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(serve_listener(listener, state));
        addr
    }

    #[tokio::test]
    async fn test_session_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_coordinator(dir.path()).await;
        let mut client = CoordinatorClient::connect(&addr, TIMEOUT, TIMEOUT).await.unwrap();

        let plan = client.put("doc", 3).await.unwrap();
        assert_eq!(plan.primaries, vec!["A", "B", "C"]);
        assert_eq!(plan.backups, vec!["C", "A", "B"]);

        assert_eq!(client.get("doc").await.unwrap(), vec!["A", "B", "C"]);
        assert_eq!(client.info("doc").await.unwrap(), vec!["A", "B", "C"]);
        assert_eq!(client.locate("doc").await.unwrap(), plan);
        assert_eq!(client.ls().await.unwrap(), vec!["doc"]);

        assert_eq!(client.rm("doc").await.unwrap(), vec!["A", "B", "C"]);
        assert!(matches!(client.get("doc").await, Err(Error::NotFound(_))));
        assert!(client.ls().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_reply() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_coordinator(dir.path()).await;
        let mut client = CoordinatorClient::connect(&addr, TIMEOUT, TIMEOUT).await.unwrap();

        let err = client.put("doc", 0).await.unwrap_err();
        assert!(matches!(err, Error::Remote(_)));

        // the session is still usable afterwards
        assert!(client.ls().await.unwrap().is_empty());
    }
}
