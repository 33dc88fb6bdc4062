//! Volume server implementation
//!
//! A volume (storage daemon) owns one directory of block files and serves
//! `store` / `read` / `rm` by block key. It knows nothing about files,
//! replicas or other volumes.

pub mod blocks;
pub mod server;

pub use blocks::BlockStore;
pub use server::VolumeServer;
