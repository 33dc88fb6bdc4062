//! # minidfs
//!
//! A minimal distributed block store:
//! - A coordinator that places blocks round-robin and keeps a JSON catalog
//! - Storage daemons that keep one file per block
//! - A client that chunks files, writes a primary and a backup copy of
//!   every block, and falls back to the backup when a primary fails
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │         Coordinator          │
//!            │  registry + placement        │
//!            │  catalog (metadata.json)     │
//!            └──────────────▲───────────────┘
//!                           │ put / get / info / ls / rm / locate
//!                     ┌─────┴─────┐
//!                     │  Client   │
//!                     └─────┬─────┘
//!             store / read / rm (one connection per block copy)
//!   ┌──────────────┬────────┴───────┬──────────────┐
//! ┌─▼──────────┐ ┌─▼──────────┐ ┌───▼────────┐
//! │ Volume A   │ │ Volume B   │ │ Volume C   │
//! │ f_block_0  │ │ f_block_1  │ │ f_block_2  │
//! │ f_backup_1 │ │ f_backup_2 │ │ f_backup_0 │
//! └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! Block `i` of a file lives on `registry[i % R]`, its backup on
//! `registry[(i + 2) % R]`.
//!
//! ## Usage
//!
//! ### Start storage daemons
//! ```bash
//! minidfs-volume 8001 --data-dir ./vol-a
//! minidfs-volume 8002 --data-dir ./vol-b
//! minidfs-volume 8003 --data-dir ./vol-c
//! ```
//!
//! ### Start the coordinator
//! ```bash
//! printf '127.0.0.1:8001\n127.0.0.1:8002\n127.0.0.1:8003\n' > nodeList
//! minidfs-coord --bind 0.0.0.0:8080 --registry nodeList --catalog metadata.json
//! ```
//!
//! ### Use the CLI
//! ```bash
//! # Interactive shell
//! minidfs --coordinator 127.0.0.1:8080
//!
//! # One-shot commands
//! minidfs put ./report.pdf report
//! minidfs get report ./report-copy.pdf
//! minidfs info report
//! minidfs ls
//! minidfs rm report
//! ```

pub mod client;
pub mod common;
pub mod coordinator;
pub mod volume;

// Re-export commonly used types
pub use client::DfsClient;
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use volume::VolumeServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
