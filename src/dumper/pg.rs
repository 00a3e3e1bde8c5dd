//! PostgreSQL frontend message dumper
//!
//! The startup message carries no type byte:
//!
//! ```text
//! ┏━━━━━━━━━━━━┳━━━━━━━━━━━━━┳━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┓
//! ┃ Length u32 ┃ Version u32 ┃ (key \0 value \0)* \0              ┃
//! ┗━━━━━━━━━━━━┻━━━━━━━━━━━━━┻━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛
//! ```
//!
//! Every later frontend message starts with a type byte followed by a
//! big-endian length that counts itself but not the type byte.

use tracing::{warn, Span};

use super::{be_u32_at, cstring_at, is_reserved_key, lossy, DumpValue, Dumper};

const STARTUP_HEADER_LEN: usize = 8;
const MESSAGE_HEADER_LEN: usize = 5;

const SSL_REQUEST_CODE: u32 = (1234 << 16) | 5679;
const GSSENC_REQUEST_CODE: u32 = (1234 << 16) | 5680;
const CANCEL_REQUEST_CODE: u32 = (1234 << 16) | 5678;
const PROTOCOL_MAJOR_VERSION: u32 = 3;

const SIMPLE_QUERY: u8 = b'Q';
const PARSE: u8 = b'P';

/// Startup parameters surfaced by default, paired with the key they are logged under.
const DEFAULT_PERSISTENT_KEYS: &[(&str, &str)] = &[("user", "username"), ("database", "database")];

pub struct PgDumper {
    span: Span,
    persistent_keys: Vec<(String, String)>,
}

impl PgDumper {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            persistent_keys: DEFAULT_PERSISTENT_KEYS
                .iter()
                .map(|(param, key)| (param.to_string(), key.to_string()))
                .collect(),
        }
    }

    /// Surface additional startup parameters, logged under their own name after
    /// the defaults. Parameters that are already surfaced are ignored, as are
    /// names that clash with a surfaced key or a record field.
    pub fn with_extra_persistent_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            if self.persistent_keys.iter().any(|(param, _)| *param == key) {
                continue;
            }
            if is_reserved_key(&key) || self.persistent_keys.iter().any(|(_, name)| *name == key) {
                warn!(parent: &self.span, key = %key, "ignoring persistent key that clashes with a record field");
                continue;
            }
            self.persistent_keys.push((key.clone(), key));
        }
        self
    }

    /// Decodes the parameter list of a startup message.
    fn startup_parameters<'a>(&self, buf: &'a [u8]) -> Option<Vec<(&'a [u8], &'a [u8])>> {
        let len = be_u32_at(buf, 0)? as usize;
        if len < STARTUP_HEADER_LEN || len > buf.len() {
            return None;
        }

        match be_u32_at(buf, 4)? {
            SSL_REQUEST_CODE | GSSENC_REQUEST_CODE | CANCEL_REQUEST_CODE => return None,
            version if version >> 16 == PROTOCOL_MAJOR_VERSION => {}
            _ => return None,
        }

        let body = &buf[STARTUP_HEADER_LEN..len];
        let mut params = Vec::new();
        let mut cursor = 0;
        loop {
            let Some((key, next)) = cstring_at(body, cursor) else {
                warn!(parent: &self.span, length = len, "startup message parameter list has no terminator");
                return None;
            };
            if key.is_empty() {
                return Some(params);
            }
            let Some((value, next)) = cstring_at(body, next) else {
                warn!(
                    parent: &self.span,
                    parameter = %lossy(key),
                    "startup parameter value has no terminator"
                );
                return None;
            };
            params.push((key, value));
            cursor = next;
        }
    }

    fn read_simple_query(&self, buf: &[u8]) -> Vec<DumpValue> {
        if !has_message_header(buf) {
            return Vec::new();
        }
        let buf = message_frame(buf);
        let Some((query, _)) = cstring_at(buf, MESSAGE_HEADER_LEN) else {
            warn!(parent: &self.span, buffered = buf.len(), "query text contains no terminator");
            return Vec::new();
        };

        vec![
            DumpValue::new("query", lossy(query)),
            DumpValue::new("message_type", "Q"),
        ]
    }

    fn read_parse(&self, buf: &[u8]) -> Vec<DumpValue> {
        if !has_message_header(buf) {
            return Vec::new();
        }
        let buf = message_frame(buf);
        let Some((stmt_name, next)) = cstring_at(buf, MESSAGE_HEADER_LEN) else {
            warn!(parent: &self.span, buffered = buf.len(), "statement name contains no terminator");
            return Vec::new();
        };
        let Some((query, _)) = cstring_at(buf, next) else {
            warn!(parent: &self.span, buffered = buf.len(), "query text contains no terminator");
            return Vec::new();
        };

        vec![
            DumpValue::new("stmt_name", lossy(stmt_name)),
            DumpValue::new("query", lossy(query)),
            DumpValue::new("message_type", "P"),
        ]
    }
}

/// A typed message needs its type byte and a length that at least covers itself.
fn has_message_header(buf: &[u8]) -> bool {
    matches!(be_u32_at(buf, 1), Some(len) if len >= 4)
}

/// Narrows `buf` to the declared message when all of it was buffered, so a
/// missing terminator cannot pull in the next message. A fragment is returned
/// whole.
fn message_frame(buf: &[u8]) -> &[u8] {
    be_u32_at(buf, 1)
        .and_then(|len| (len as usize).checked_add(1))
        .and_then(|end| buf.get(..end))
        .unwrap_or(buf)
}

impl Dumper for PgDumper {
    fn name(&self) -> &'static str {
        "pg"
    }

    fn read_persistent_values(&self, buf: &[u8]) -> Vec<DumpValue> {
        let Some(params) = self.startup_parameters(buf) else {
            return Vec::new();
        };

        self.persistent_keys
            .iter()
            .filter_map(|(param, key)| {
                params
                    .iter()
                    .find(|(name, _)| *name == param.as_bytes())
                    .map(|(_, value)| DumpValue::new(key.as_str(), lossy(value)))
            })
            .collect()
    }

    fn read(&self, buf: &[u8]) -> Vec<DumpValue> {
        match buf.first() {
            Some(&SIMPLE_QUERY) => self.read_simple_query(buf),
            Some(&PARSE) => self.read_parse(buf),
            _ => Vec::new(),
        }
    }
}
