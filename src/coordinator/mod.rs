//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Metadata management (file → block placements)
//! - Placement decisions (modulo over a fixed node registry)
//! - Persisting the catalog after every mutation
//!
//! It never touches block bytes.

pub mod catalog;
pub mod placement;
pub mod server;

pub use catalog::{BlockPlacement, FileRecord, MetadataCatalog};
pub use placement::{NodeRegistry, PlacementManager};
pub use server::{CoordState, Coordinator};
