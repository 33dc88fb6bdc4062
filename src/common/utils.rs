//! Utility functions for minidfs

use crate::common::{Error, Result};
use bytes::Bytes;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Percent-encoding set for block keys stored as file names
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b' ')
    .add(b':')
    .add(b'*')
    .add(b'?')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'|');

const PRIMARY_KEY_INFIX: &str = "_block_";
const BACKUP_KEY_INFIX: &str = "_backup_block_";

/// Encode a block key for filesystem usage
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Decode a percent-encoded key
pub fn decode_key(encoded: &str) -> Result<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .map(|s| s.to_string())
        .map_err(|e| Error::InvalidRequest(format!("Failed to decode key: {}", e)))
}

/// Key of the primary copy of block `index` of `file_name`.
pub fn primary_block_key(file_name: &str, index: usize) -> String {
    format!("{}{}{}", file_name, PRIMARY_KEY_INFIX, index)
}

/// Key of the backup copy of block `index` of `file_name`.
pub fn backup_block_key(file_name: &str, index: usize) -> String {
    format!("{}{}{}", file_name, BACKUP_KEY_INFIX, index)
}

/// File names travel inside space-separated command lines and
/// comma-separated lists, so neither separator may appear in them.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidRequest("file name is empty".into()));
    }
    if name.chars().any(|c| c.is_whitespace() || c == ',') {
        return Err(Error::InvalidRequest(format!(
            "file name {:?} contains whitespace or ','",
            name
        )));
    }
    Ok(())
}

/// Split `data` into blocks of at most `block_size` bytes.
///
/// The last block is never padded. Empty input yields a single empty block
/// so every stored file has at least one placement.
pub fn split_blocks(data: Bytes, block_size: usize) -> Vec<Bytes> {
    assert!(block_size > 0, "block size must be positive");

    if data.is_empty() {
        return vec![Bytes::new()];
    }

    let mut blocks = Vec::with_capacity(data.len().div_ceil(block_size));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + block_size).min(data.len());
        blocks.push(data.slice(offset..end));
        offset = end;
    }
    blocks
}

/// Join a list for the wire (`a,b,c`).
pub fn join_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a comma-separated wire list. An empty line is an empty list.
pub fn split_list(line: &str) -> Vec<String> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    line.split(',').map(|s| s.trim().to_string()).collect()
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Run `fut`, failing with [`Error::Timeout`] if it takes longer than `limit`.
pub async fn with_timeout<T, F>(limit: Duration, what: impl Into<String>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("{} after {:?}", what.into(), limit))),
    }
}
