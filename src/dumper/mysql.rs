//! MySQL client packet dumper
//!
//! Every packet starts with a 4-byte header: a 3-byte little-endian payload
//! length followed by a 1-byte sequence id. The client's handshake response is
//! sent mid-exchange (sequence id > 0); commands always restart the sequence at 0
//! and carry the command code as their first payload byte.
//!
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

use tracing::{debug, warn, Span};

use super::{cstring_at, is_reserved_key, le_u32_at, lossy, DumpValue, Dumper};

const PACKET_HEADER_LEN: usize = 4;

/// Persistent keys always taken from the handshake response itself
const HANDSHAKE_KEYS: &[&str] = &["username", "database"];

/// Capability flags (4) + max packet size (4) + character set (1) + reserved (23)
const HANDSHAKE_RESPONSE_FIXED_LEN: usize = 32;
/// An SSLRequest is a handshake response truncated right after the fixed part.
const SSL_REQUEST_PAYLOAD_LEN: usize = HANDSHAKE_RESPONSE_FIXED_LEN;

pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
pub const CLIENT_SSL: u32 = 0x0000_0800;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
pub const CLIENT_CONNECT_ATTRS: u32 = 0x0010_0000;
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;

pub const COM_INIT_DB: u8 = 0x02;
pub const COM_QUERY: u8 = 0x03;
pub const COM_STMT_PREPARE: u8 = 0x16;

pub struct MysqlDumper {
    span: Span,
    /// Connection attributes surfaced after the username and database
    attribute_keys: Vec<String>,
}

/// Fields of a `HandshakeResponse41` relevant for dumping
#[derive(Debug, Default)]
struct HandshakeResponse<'a> {
    username: &'a [u8],
    database: Option<&'a [u8]>,
    connect_attrs: Vec<(&'a [u8], &'a [u8])>,
}

impl MysqlDumper {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            attribute_keys: Vec::new(),
        }
    }

    /// Surface connection attributes (e.g. `program_name`, `_client_name`) sent
    /// with the handshake response. Keys that clash with the username, the
    /// database or a record field are dropped.
    pub fn with_extra_persistent_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            if is_reserved_key(&key) || HANDSHAKE_KEYS.contains(&key.as_str()) {
                warn!(parent: &self.span, key = %key, "ignoring persistent key that clashes with a record field");
                continue;
            }
            if !self.attribute_keys.contains(&key) {
                self.attribute_keys.push(key);
            }
        }
        self
    }

    fn handshake_response<'a>(&self, buf: &'a [u8]) -> Option<HandshakeResponse<'a>> {
        let (sequence_id, payload) = packet(buf)?;
        if sequence_id == 0 || payload.len() <= SSL_REQUEST_PAYLOAD_LEN {
            return None;
        }

        let capabilities = le_u32_at(payload, 0)?;
        if capabilities & CLIENT_PROTOCOL_41 == 0 {
            return None;
        }
        if payload[HANDSHAKE_RESPONSE_FIXED_LEN - 23..HANDSHAKE_RESPONSE_FIXED_LEN]
            .iter()
            .any(|&b| b != 0)
        {
            // Reserved filler is always zeroed; anything else is not a handshake response.
            return None;
        }

        let Some((username, mut cursor)) = cstring_at(payload, HANDSHAKE_RESPONSE_FIXED_LEN) else {
            warn!(parent: &self.span, payload_len = payload.len(), "handshake response username has no terminator");
            return None;
        };
        let mut response = HandshakeResponse {
            username,
            ..Default::default()
        };

        cursor = if capabilities & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            lenenc_bytes_at(payload, cursor)?.1
        } else if capabilities & CLIENT_SECURE_CONNECTION != 0 {
            let len = *payload.get(cursor)? as usize;
            let end = cursor + 1 + len;
            if end > payload.len() {
                return None;
            }
            end
        } else {
            cstring_at(payload, cursor)?.1
        };

        if capabilities & CLIENT_CONNECT_WITH_DB != 0 && cursor < payload.len() {
            let Some((database, next)) = cstring_at(payload, cursor) else {
                warn!(parent: &self.span, payload_len = payload.len(), "handshake response database has no terminator");
                return None;
            };
            response.database = Some(database);
            cursor = next;
        }

        if capabilities & CLIENT_PLUGIN_AUTH != 0 && cursor < payload.len() {
            match cstring_at(payload, cursor) {
                Some((_, next)) => cursor = next,
                None => return Some(response),
            }
        }

        if capabilities & CLIENT_CONNECT_ATTRS != 0 && cursor < payload.len() {
            match connect_attrs(payload, cursor) {
                Some(attrs) => response.connect_attrs = attrs,
                None => {
                    debug!(parent: &self.span, payload_len = payload.len(), "skipping malformed connection attributes");
                }
            }
        }

        Some(response)
    }
}

impl Dumper for MysqlDumper {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn read_persistent_values(&self, buf: &[u8]) -> Vec<DumpValue> {
        let Some(response) = self.handshake_response(buf) else {
            return Vec::new();
        };

        let mut values = vec![DumpValue::new("username", lossy(response.username))];
        if let Some(database) = response.database {
            values.push(DumpValue::new("database", lossy(database)));
        }
        for key in &self.attribute_keys {
            if let Some((_, value)) = response
                .connect_attrs
                .iter()
                .find(|(name, _)| *name == key.as_bytes())
            {
                values.push(DumpValue::new(key.as_str(), lossy(value)));
            }
        }
        values
    }

    fn read(&self, buf: &[u8]) -> Vec<DumpValue> {
        let Some((0, payload)) = packet(buf) else {
            return Vec::new();
        };
        let Some((&command, body)) = payload.split_first() else {
            return Vec::new();
        };

        let (key, message_type) = match command {
            COM_QUERY => ("query", "COM_QUERY"),
            COM_STMT_PREPARE => ("stmt_prepare_query", "COM_STMT_PREPARE"),
            COM_INIT_DB => ("init_db", "COM_INIT_DB"),
            _ => return Vec::new(),
        };

        vec![
            DumpValue::new(key, lossy(trim_trailing_nulls(body))),
            DumpValue::new("message_type", message_type),
        ]
    }
}

/// Splits a buffer into the sequence id and the declared payload.
fn packet(buf: &[u8]) -> Option<(u8, &[u8])> {
    let header = buf.get(..PACKET_HEADER_LEN)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let payload = buf.get(PACKET_HEADER_LEN..PACKET_HEADER_LEN + len)?;
    Some((header[3], payload))
}

/// Reads a length-encoded integer, returning it with the offset past it.
fn lenenc_int_at(buf: &[u8], offset: usize) -> Option<(u64, usize)> {
    let first = *buf.get(offset)?;
    let width = match first {
        0x00..=0xfa => return Some((first as u64, offset + 1)),
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        // 0xfb is NULL and 0xff an error marker; neither is a length here.
        _ => return None,
    };
    let bytes = buf.get(offset + 1..offset + 1 + width)?;
    let value = bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);
    Some((value, offset + 1 + width))
}

fn lenenc_bytes_at(buf: &[u8], offset: usize) -> Option<(&[u8], usize)> {
    let (len, start) = lenenc_int_at(buf, offset)?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    Some((buf.get(start..end)?, end))
}

/// Decodes the key/value connection attributes block starting at `offset`.
fn connect_attrs(buf: &[u8], offset: usize) -> Option<Vec<(&[u8], &[u8])>> {
    let (block, _) = lenenc_bytes_at(buf, offset)?;
    let mut attrs = Vec::new();
    let mut cursor = 0;
    while cursor < block.len() {
        let (key, next) = lenenc_bytes_at(block, cursor)?;
        let (value, next) = lenenc_bytes_at(block, next)?;
        attrs.push((key, value));
        cursor = next;
    }
    Some(attrs)
}

fn trim_trailing_nulls(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
    &bytes[..end]
}
