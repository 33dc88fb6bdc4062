//! Client side of the block store
//!
//! [`DfsClient`] keeps one session with the coordinator and opens a short
//! connection to a storage daemon for every block copy it moves.

pub mod coordinator_client;
pub mod dfs;
pub mod volume_client;

pub use coordinator_client::CoordinatorClient;
pub use dfs::{DfsClient, DownloadReport, RemoveReport, UploadReport};
pub use volume_client::VolumeClient;
