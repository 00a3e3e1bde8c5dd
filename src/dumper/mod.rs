//! Protocol-aware dumpers
//!
//! A dumper turns the raw TCP payload of one direction of one connection into
//! ordered key/value records. Every variant exposes two independent entry points:
//!
//! - [`Dumper::read_persistent_values`] recognises a connection-establishment
//!   message and extracts metadata that belongs to the whole connection
//!   (user name, database, ...).
//! - [`Dumper::read`] recognises a single queryable event (a query submission)
//!   and extracts its content plus a message-type tag.
//!
//! Buffers handed to a dumper are whatever the front-end happened to read, so a
//! message may be truncated or malformed. Dumpers never panic and never return
//! errors for such input: they return an empty `Vec`.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

pub mod hex;
pub mod mysql;
pub mod pg;
pub mod registry;

pub use hex::HexDumper;
pub use mysql::MysqlDumper;
pub use pg::PgDumper;
pub use registry::{create_dumper, create_dumper_by_name, DumperKind, DumperOptions};

/// Field names a dump record writes before the dumped values.
pub const RECORD_HEADER_KEYS: &[&str] = &["ts", "conn_id", "client_addr", "remote_addr", "direction"];

/// Keys emitted by `read` across all dumpers.
pub const READ_VALUE_KEYS: &[&str] = &[
    "query",
    "message_type",
    "stmt_name",
    "stmt_prepare_query",
    "init_db",
    "hex",
];

/// Whether `key` is unusable as a persistent value name because a record
/// header or a read value already uses it.
pub fn is_reserved_key(key: &str) -> bool {
    RECORD_HEADER_KEYS.contains(&key) || READ_VALUE_KEYS.contains(&key)
}

/// A single extracted key/value pair.
///
/// Order inside a produced `Vec<DumpValue>` mirrors the field order of the
/// decoded message and must be preserved when rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DumpValue {
    pub key: String,
    pub value: String,
}

impl DumpValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for DumpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Direction of a byte buffer relative to the connection.
///
/// `ClientToRemote`/`RemoteToClient` are used by the relay, `SrcToDst`/`DstToSrc`
/// by passive capture where the client side is inferred from the target port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ClientToRemote,
    RemoteToClient,
    SrcToDst,
    DstToSrc,
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientToRemote | Self::SrcToDst => "->",
            Self::RemoteToClient | Self::DstToSrc => "<-",
            Self::Unknown => "?",
        }
    }

    /// Whether bytes in this direction were sent by the database client.
    pub fn is_client_to_server(&self) -> bool {
        matches!(self, Self::ClientToRemote | Self::SrcToDst)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability contract implemented by every protocol variant.
///
/// Implementations hold no per-call state, so a single instance can be shared
/// by any number of connections and called concurrently.
pub trait Dumper: Send + Sync {
    /// Registry name of this variant (`"pg"`, `"mysql"`, `"hex"`)
    fn name(&self) -> &'static str;

    /// Extract connection-level metadata from an establishment message.
    ///
    /// Returns an empty `Vec` when `buf` holds no recognisable establishment
    /// message, including when it is truncated.
    fn read_persistent_values(&self, buf: &[u8]) -> Vec<DumpValue>;

    /// Extract a queryable event (query text plus message type) from `buf`.
    ///
    /// Returns an empty `Vec` when `buf` holds no recognisable event.
    fn read(&self, buf: &[u8]) -> Vec<DumpValue>;

    /// Whether buffers travelling in `direction` should be handed to this dumper.
    fn dumps_direction(&self, direction: Direction) -> bool {
        direction.is_client_to_server()
    }
}

/// Returns the bytes of the null-terminated string starting at `offset` and the
/// offset just past its terminator, or `None` if no terminator exists.
pub(crate) fn cstring_at(buf: &[u8], offset: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(offset..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    Some((&rest[..end], offset + end + 1))
}

pub(crate) fn be_u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn le_u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Wire strings are not guaranteed to be UTF-8; invalid sequences are replaced
/// rather than rejected.
pub(crate) fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}
