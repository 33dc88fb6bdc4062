//! Coordinator server

use crate::common::protocol::{read_line, write_line, CoordRequest, ERROR_PREFIX};
use crate::common::{join_list, CoordinatorConfig, Error, Result};
use crate::coordinator::catalog::{FileRecord, MetadataCatalog};
use crate::coordinator::placement::{NodeRegistry, PlacementManager};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};

/// State shared by every client connection.
pub struct CoordState {
    placement: PlacementManager,
    catalog: Mutex<MetadataCatalog>,
}

impl CoordState {
    pub fn new(placement: PlacementManager, catalog: MetadataCatalog) -> Self {
        Self {
            placement,
            catalog: Mutex::new(catalog),
        }
    }

    fn lock_catalog(&self) -> Result<std::sync::MutexGuard<'_, MetadataCatalog>> {
        self.catalog
            .lock()
            .map_err(|_| Error::Internal("catalog lock poisoned".into()))
    }

    /// Execute one request and return the reply line (without terminator).
    pub fn handle(&self, request: CoordRequest) -> Result<String> {
        match request {
            CoordRequest::Put {
                file_name,
                block_count,
            } => {
                let placements = self.placement.place(block_count)?;
                let record = FileRecord::new(file_name.clone(), placements);
                let plan = record.plan();

                let previous = self.lock_catalog()?.put(record)?;
                if let Some(old) = previous {
                    tracing::warn!(
                        "{} already existed ({} blocks), metadata overwritten",
                        file_name,
                        old.block_count()
                    );
                }
                tracing::info!("PUT {}: {} blocks placed", file_name, block_count);
                Ok(plan.to_wire())
            }
            CoordRequest::Get { file_name } | CoordRequest::Info { file_name } => {
                let catalog = self.lock_catalog()?;
                let record = catalog
                    .get(&file_name)
                    .ok_or_else(|| Error::NotFound(file_name.clone()))?;
                Ok(join_list(&record.primaries()))
            }
            CoordRequest::Locate { file_name } => {
                let catalog = self.lock_catalog()?;
                let record = catalog
                    .get(&file_name)
                    .ok_or_else(|| Error::NotFound(file_name.clone()))?;
                Ok(record.plan().to_wire())
            }
            CoordRequest::Ls => Ok(join_list(&self.lock_catalog()?.list())),
            CoordRequest::Rm { file_name } => {
                let removed = self
                    .lock_catalog()?
                    .remove(&file_name)?
                    .ok_or_else(|| Error::NotFound(file_name.clone()))?;
                tracing::info!("RM {}: {} blocks released", file_name, removed.block_count());
                Ok(join_list(&removed.primaries()))
            }
        }
    }

    /// Reply line for a request line. `NotFound` becomes an empty line.
    pub fn respond(&self, line: &str) -> String {
        match CoordRequest::parse(line).and_then(|request| self.handle(request)) {
            Ok(reply) => reply,
            Err(Error::NotFound(name)) => {
                tracing::debug!("{} not in catalog", name);
                String::new()
            }
            Err(e) => {
                tracing::warn!("Request {:?} rejected: {}", line, e);
                format!("{}{}", ERROR_PREFIX, e)
            }
        }
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Load the registry and catalog. Failures here are fatal.
    pub fn open_state(&self) -> Result<CoordState> {
        let registry = NodeRegistry::load(&self.config.registry_path)?;
        tracing::info!("Node registry ({} nodes):", registry.len());
        for node in registry.nodes() {
            tracing::info!("  - {}", node);
        }

        tracing::info!("Max blocks per file: {}", self.config.max_blocks_per_file);

        let catalog = MetadataCatalog::open(&self.config.catalog_path)?;
        let placement =
            PlacementManager::new(registry).with_max_blocks(self.config.max_blocks_per_file);
        Ok(CoordState::new(placement, catalog))
    }

    pub async fn serve(self) -> Result<()> {
        let state = Arc::new(self.open_state()?);
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        serve_listener(listener, state).await
    }
}

/// Accept loop: one task per client connection.
pub async fn serve_listener(listener: TcpListener, state: Arc<CoordState>) -> Result<()> {
    tracing::info!("✓ Coordinator listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("Error accepting connection: {}", e);
                continue;
            }
        };
        tracing::info!("Client connected: {}", peer);

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, state).await {
                tracing::warn!("Connection {} ended with error: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<CoordState>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    while let Some(line) = read_line(&mut reader).await? {
        if line.trim().is_empty() {
            continue;
        }
        tracing::debug!("{} -> {:?}", peer, line);

        // catalog writes hit the disk under a std mutex
        let shared = state.clone();
        let reply = tokio::task::spawn_blocking(move || shared.respond(&line))
            .await
            .map_err(|e| Error::Internal(format!("request task failed: {}", e)))?;
        write_line(&mut write_half, &reply).await?;
    }

    tracing::info!("Client disconnected: {}", peer);
    Ok(())
}
