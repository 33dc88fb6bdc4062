//! Common utilities and types shared across minidfs

pub mod config;
pub mod error;
pub mod protocol;
pub mod utils;

pub use config::{ClientConfig, Config, CoordinatorConfig, VolumeConfig};
pub use error::{Error, Result};
pub use utils::{
    backup_block_key, decode_key, encode_key, format_bytes, join_list, primary_block_key,
    split_blocks, split_list, timestamp_now, validate_file_name, with_timeout,
};
