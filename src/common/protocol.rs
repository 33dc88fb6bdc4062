//! Line-oriented wire protocol shared by the coordinator, storage daemons
//! and the client.
//!
//! Every request is one newline-terminated ASCII line. Binary payloads
//! follow their declaring line and are never newline-delimited:
//!
//! ```text
//! store <key> <len>\n<len raw bytes>      (client -> volume, no reply)
//! read <key>\n                            (client -> volume)
//!     <len>\n<len raw bytes>              (found)
//!     -1\n                                (not found)
//! rm <key>\n                              (client -> volume, no reply)
//! ```
//!
//! Coordinator replies are a single comma-separated line. An empty line
//! means "not found"; `ERR <message>` reports a rejected request.

use crate::common::utils::{join_list, split_list};
use crate::common::{Error, Result};
use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size header sent by a storage daemon for a missing block.
pub const NOT_FOUND_SENTINEL: &str = "-1";

/// Prefix of a coordinator reply carrying an error message.
pub const ERROR_PREFIX: &str = "ERR ";

/// Upper bound for a command line, and for every line a storage daemon sends.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Upper bound for a coordinator reply. Placement lists grow with the block
/// count; this fits a file at the default `max_blocks_per_file` even with
/// long node addresses.
pub const MAX_REPLY_LEN: usize = 64 * 1024 * 1024;

/// Requests understood by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordRequest {
    Put { file_name: String, block_count: i64 },
    Get { file_name: String },
    Info { file_name: String },
    Ls,
    Rm { file_name: String },
    /// Full placement plan (primaries then backups) of an existing file.
    Locate { file_name: String },
}

impl CoordRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let (cmd, args) = match parts.split_first() {
            Some((cmd, args)) => (*cmd, args),
            None => return Err(Error::InvalidRequest("empty command".into())),
        };

        let request = match (cmd, args) {
            ("put", [name, count]) => {
                let block_count = count.parse::<i64>().map_err(|_| {
                    Error::InvalidRequest(format!("block count {:?} is not a number", count))
                })?;
                CoordRequest::Put {
                    file_name: name.to_string(),
                    block_count,
                }
            }
            ("get", [name]) => CoordRequest::Get {
                file_name: name.to_string(),
            },
            ("info", [name]) => CoordRequest::Info {
                file_name: name.to_string(),
            },
            ("ls", []) => CoordRequest::Ls,
            ("rm", [name]) => CoordRequest::Rm {
                file_name: name.to_string(),
            },
            ("locate", [name]) => CoordRequest::Locate {
                file_name: name.to_string(),
            },
            ("put" | "get" | "info" | "ls" | "rm" | "locate", _) => {
                return Err(Error::InvalidRequest(format!(
                    "wrong number of arguments for {}",
                    cmd
                )))
            }
            _ => return Err(Error::InvalidRequest(format!("unknown command {:?}", cmd))),
        };

        Ok(request)
    }

    /// Newline-terminated wire form.
    pub fn to_line(&self) -> String {
        match self {
            CoordRequest::Put {
                file_name,
                block_count,
            } => format!("put {} {}\n", file_name, block_count),
            CoordRequest::Get { file_name } => format!("get {}\n", file_name),
            CoordRequest::Info { file_name } => format!("info {}\n", file_name),
            CoordRequest::Ls => "ls\n".to_string(),
            CoordRequest::Rm { file_name } => format!("rm {}\n", file_name),
            CoordRequest::Locate { file_name } => format!("locate {}\n", file_name),
        }
    }
}

/// Requests understood by a storage daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeRequest {
    Store { key: String, len: usize },
    Read { key: String },
    Remove { key: String },
}

impl VolumeRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["store", key, len] => {
                let len = len.parse::<usize>().map_err(|_| {
                    Error::InvalidRequest(format!("payload length {:?} is not a number", len))
                })?;
                Ok(VolumeRequest::Store {
                    key: key.to_string(),
                    len,
                })
            }
            ["read", key] => Ok(VolumeRequest::Read {
                key: key.to_string(),
            }),
            ["rm", key] => Ok(VolumeRequest::Remove {
                key: key.to_string(),
            }),
            [] => Err(Error::InvalidRequest("empty command".into())),
            [cmd, ..] => Err(Error::InvalidRequest(format!(
                "malformed storage command {:?}",
                cmd
            ))),
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            VolumeRequest::Store { key, len } => format!("store {} {}\n", key, len),
            VolumeRequest::Read { key } => format!("read {}\n", key),
            VolumeRequest::Remove { key } => format!("rm {}\n", key),
        }
    }
}

/// Node assignment for every block of one file, as returned by `put`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlacementPlan {
    pub primaries: Vec<String>,
    pub backups: Vec<String>,
}

impl PlacementPlan {
    pub fn block_count(&self) -> usize {
        self.primaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primaries.is_empty()
    }

    pub fn primary(&self, index: usize) -> Option<&str> {
        self.primaries.get(index).map(String::as_str)
    }

    pub fn backup(&self, index: usize) -> Option<&str> {
        self.backups.get(index).map(String::as_str)
    }

    /// `primary_0,...,primary_{n-1},backup_0,...,backup_{n-1}`
    pub fn to_wire(&self) -> String {
        let all: Vec<&str> = self
            .primaries
            .iter()
            .chain(self.backups.iter())
            .map(String::as_str)
            .collect();
        join_list(&all)
    }

    /// Parse a flattened plan. With `expected_blocks` the reply must
    /// cover exactly that many blocks.
    pub fn from_wire(line: &str, expected_blocks: Option<usize>) -> Result<Self> {
        let mut nodes = split_list(line);
        if nodes.len() % 2 != 0 {
            return Err(Error::Protocol(format!(
                "placement plan has an odd number of entries ({})",
                nodes.len()
            )));
        }

        let blocks = nodes.len() / 2;
        if let Some(expected) = expected_blocks {
            if blocks != expected {
                return Err(Error::Protocol(format!(
                    "placement plan covers {} blocks, expected {}",
                    blocks, expected
                )));
            }
        }
        if nodes.iter().any(|n| n.is_empty()) {
            return Err(Error::Protocol("placement plan contains an empty address".into()));
        }

        let backups = nodes.split_off(blocks);
        Ok(Self {
            primaries: nodes,
            backups,
        })
    }
}

/// Read one command line without its terminator. `None` on clean EOF.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    read_line_limited(reader, MAX_LINE_LEN).await
}

/// [`read_line`] with a caller-chosen length cap.
pub async fn read_line_limited<R>(reader: &mut R, max_len: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(max_len as u64)
        .read_line(&mut line)
        .await?;

    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') && n >= max_len {
        return Err(Error::InvalidRequest(format!(
            "line exceeds {} bytes",
            max_len
        )));
    }

    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Read exactly `len` payload bytes. Fewer bytes before EOF is a
/// [`Error::ShortRead`].
pub async fn read_payload<R>(reader: &mut R, len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::ShortRead {
                expected: len,
                received: filled,
            });
        }
        filled += n;
    }
    Ok(buf)
}

/// Write one line, appending the terminator.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a `store` command followed by its raw payload.
pub async fn write_store<W>(writer: &mut W, key: &str, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = VolumeRequest::Store {
        key: key.to_string(),
        len: data.len(),
    }
    .to_line();
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a `read` reply: size line then the raw block.
pub async fn write_block<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{}\n", data.len()).as_bytes())
        .await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Write the missing-block sentinel.
pub async fn write_not_found<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_line(writer, NOT_FOUND_SENTINEL).await
}

/// Read a `read` reply. `Ok(None)` is the not-found sentinel.
pub async fn read_block<R>(reader: &mut R, max_len: usize) -> Result<Option<Bytes>>
where
    R: AsyncBufRead + Unpin,
{
    let header = read_line(reader)
        .await?
        .ok_or_else(|| Error::ConnectionFailed("connection closed before block header".into()))?;
    let header = header.trim();

    if header == NOT_FOUND_SENTINEL {
        return Ok(None);
    }

    let len = header
        .parse::<usize>()
        .map_err(|_| Error::Protocol(format!("invalid block size header {:?}", header)))?;
    if len > max_len {
        return Err(Error::Protocol(format!(
            "block size {} exceeds limit {}",
            len, max_len
        )));
    }

    let data = read_payload(reader, len).await?;
    Ok(Some(Bytes::from(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_parse_coord_requests() {
        assert_eq!(
            CoordRequest::parse("put doc 3").unwrap(),
            CoordRequest::Put {
                file_name: "doc".into(),
                block_count: 3
            }
        );
        assert_eq!(
            CoordRequest::parse("  get doc  ").unwrap(),
            CoordRequest::Get {
                file_name: "doc".into()
            }
        );
        assert_eq!(CoordRequest::parse("ls").unwrap(), CoordRequest::Ls);
        assert_eq!(
            CoordRequest::parse("locate doc").unwrap(),
            CoordRequest::Locate {
                file_name: "doc".into()
            }
        );
    }

    #[test]
    fn test_parse_coord_rejects_malformed() {
        assert!(matches!(
            CoordRequest::parse("put doc many"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            CoordRequest::parse("put doc"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            CoordRequest::parse("ls extra"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            CoordRequest::parse("frobnicate x"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(CoordRequest::parse(""), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_negative_block_count_parses() {
        // rejected later by placement, not by the parser
        assert_eq!(
            CoordRequest::parse("put doc -2").unwrap(),
            CoordRequest::Put {
                file_name: "doc".into(),
                block_count: -2
            }
        );
    }

    #[test]
    fn test_parse_volume_requests() {
        assert_eq!(
            VolumeRequest::parse("store doc_block_0 452").unwrap(),
            VolumeRequest::Store {
                key: "doc_block_0".into(),
                len: 452
            }
        );
        assert_eq!(
            VolumeRequest::parse("rm doc_block_0").unwrap(),
            VolumeRequest::Remove {
                key: "doc_block_0".into()
            }
        );
        assert!(VolumeRequest::parse("store doc_block_0 -1").is_err());
        assert!(VolumeRequest::parse("read").is_err());
    }

    #[test]
    fn test_plan_wire_order() {
        let plan = PlacementPlan {
            primaries: vec!["A".into(), "B".into(), "C".into()],
            backups: vec!["C".into(), "A".into(), "B".into()],
        };
        assert_eq!(plan.to_wire(), "A,B,C,C,A,B");

        let parsed = PlacementPlan::from_wire("A,B,C,C,A,B\n", Some(3)).unwrap();
        assert_eq!(parsed, plan);
        assert_eq!(parsed.backup(0), Some("C"));
    }

    #[test]
    fn test_plan_rejects_wrong_shape() {
        assert!(matches!(
            PlacementPlan::from_wire("A,B,C", None),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            PlacementPlan::from_wire("A,B", Some(2)),
            Err(Error::Protocol(_))
        ));
        assert!(PlacementPlan::from_wire("", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_line_strips_terminator() {
        let mut reader: &[u8] = b"get doc\r\nls\n";
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), "get doc");
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), "ls");
        assert!(read_line(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_long_reply_line() {
        let addrs = vec!["127.0.0.1:8001"; 10_000].join(",");
        let wire = format!("{}\n", addrs);
        assert!(wire.len() > MAX_LINE_LEN);

        let mut reader = wire.as_bytes();
        assert!(matches!(
            read_line(&mut reader).await,
            Err(Error::InvalidRequest(_))
        ));

        let mut reader = wire.as_bytes();
        let line = read_line_limited(&mut reader, MAX_REPLY_LEN)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, addrs);
    }

    #[tokio::test]
    async fn test_payload_may_contain_newlines() {
        let mut wire = Vec::new();
        write_store(&mut wire, "bin_block_0", b"a\nb\n\nc").await.unwrap();

        let mut reader = BufReader::new(wire.as_slice());
        let line = read_line(&mut reader).await.unwrap().unwrap();
        let request = VolumeRequest::parse(&line).unwrap();
        let len = match request {
            VolumeRequest::Store { len, .. } => len,
            other => panic!("unexpected request {:?}", other),
        };
        let payload = read_payload(&mut reader, len).await.unwrap();
        assert_eq!(payload, b"a\nb\n\nc");
    }

    #[tokio::test]
    async fn test_payload_arriving_in_pieces() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"ab")
            .read(b"c")
            .read(b"de")
            .build();
        let payload = read_payload(&mut mock, 5).await.unwrap();
        assert_eq!(payload, b"abcde");
    }

    #[tokio::test]
    async fn test_short_read() {
        let mut reader: &[u8] = b"abc";
        let err = read_payload(&mut reader, 10).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ShortRead {
                expected: 10,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_block_frames() {
        let mut wire = Vec::new();
        write_block(&mut wire, &[0, 159, 10, 255]).await.unwrap();
        write_not_found(&mut wire).await.unwrap();
        write_block(&mut wire, b"").await.unwrap();

        let mut reader = BufReader::new(wire.as_slice());
        let block = read_block(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(&block[..], &[0, 159, 10, 255]);
        assert!(read_block(&mut reader, 1024).await.unwrap().is_none());
        assert!(read_block(&mut reader, 1024).await.unwrap().unwrap().is_empty());
        assert!(matches!(
            read_block(&mut reader, 1024).await,
            Err(Error::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_block_header_malformed_or_oversized() {
        let mut reader: &[u8] = b"abc\n";
        assert!(matches!(
            read_block(&mut reader, 1024).await,
            Err(Error::Protocol(_))
        ));

        let mut reader: &[u8] = b"4096\n";
        assert!(matches!(
            read_block(&mut reader, 1024).await,
            Err(Error::Protocol(_))
        ));
    }
}
