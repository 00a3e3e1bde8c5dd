//! Per-connection dump driver
//!
//! A [`DumpSession`] sits between a front-end and a [`Dumper`]: it hands each
//! buffer to the dumper's entry points, keeps the persistent values extracted
//! from the connection-establishment message and attaches them to every record
//! written afterwards.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::dumper::{Direction, DumpValue, Dumper, RECORD_HEADER_KEYS};

/// Destination for dump records
pub trait DumpSink: Send + Sync {
    fn write(&self, record: &DumpRecord);
}

/// Identity of one TCP connection
#[derive(Debug, Clone)]
pub struct ConnMetadata {
    pub conn_id: Uuid,
    pub client_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    pub persistent_values: Vec<DumpValue>,
}

impl ConnMetadata {
    pub fn new(client_addr: Option<SocketAddr>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            client_addr,
            remote_addr,
            connected_at: Utc::now(),
            persistent_values: Vec::new(),
        }
    }
}

/// One line of the dump log
#[derive(Debug, Clone, PartialEq)]
pub struct DumpRecord {
    pub ts: DateTime<Utc>,
    pub conn_id: Uuid,
    pub client_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub direction: Direction,
    pub values: Vec<DumpValue>,
}

/// Records serialize as one flat object. Connection fields come first, then the
/// dumped values in the order the dumper produced them.
impl Serialize for DumpRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5 + self.values.len()))?;
        map.serialize_entry(
            "ts",
            &self.ts.to_rfc3339_opts(SecondsFormat::Micros, true),
        )?;
        map.serialize_entry("conn_id", &self.conn_id.to_string())?;
        map.serialize_entry("client_addr", &self.client_addr.map(|a| a.to_string()))?;
        map.serialize_entry("remote_addr", &self.remote_addr.map(|a| a.to_string()))?;
        map.serialize_entry("direction", self.direction.as_str())?;
        for value in &self.values {
            map.serialize_entry(&value.key, &value.value)?;
        }
        map.end()
    }
}

/// What a single [`DumpSession::dump`] call did with its buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpOutcome {
    /// The dumper does not handle this direction
    Skipped,
    /// Connection-establishment message; values were stored, nothing written
    PersistentValues(usize),
    /// A record with this many dumped values (excluding persistent ones) was written
    Recorded(usize),
    /// Nothing recognisable in the buffer
    Empty,
}

pub struct DumpSession {
    dumper: Arc<dyn Dumper>,
    sink: Arc<dyn DumpSink>,
    metadata: ConnMetadata,
}

impl DumpSession {
    pub fn new(dumper: Arc<dyn Dumper>, sink: Arc<dyn DumpSink>, metadata: ConnMetadata) -> Self {
        Self {
            dumper,
            sink,
            metadata,
        }
    }

    pub fn metadata(&self) -> &ConnMetadata {
        &self.metadata
    }

    /// Feeds one buffer, read in `direction`, through the dumper.
    ///
    /// Buffers must be fed in the order they arrived on the wire.
    pub fn dump(&mut self, buf: &[u8], direction: Direction) -> DumpOutcome {
        if !self.dumper.dumps_direction(direction) {
            return DumpOutcome::Skipped;
        }

        let persistent = self.dumper.read_persistent_values(buf);
        if !persistent.is_empty() {
            let count = persistent.len();
            tracing::debug!(
                conn_id = %self.metadata.conn_id,
                dumper = self.dumper.name(),
                count,
                "Captured persistent values"
            );
            self.metadata.persistent_values.extend(persistent);
            return DumpOutcome::PersistentValues(count);
        }

        let mut values = self.dumper.read(buf);
        if values.is_empty() {
            return DumpOutcome::Empty;
        }
        let count = values.len();
        // Keys must stay unique in the flat record; the event's own value wins.
        let persistent: Vec<DumpValue> = self
            .metadata
            .persistent_values
            .iter()
            .filter(|p| {
                !RECORD_HEADER_KEYS.contains(&p.key.as_str())
                    && !values.iter().any(|v| v.key == p.key)
            })
            .cloned()
            .collect();
        values.extend(persistent);

        let record = DumpRecord {
            ts: Utc::now(),
            conn_id: self.metadata.conn_id,
            client_addr: self.metadata.client_addr,
            remote_addr: self.metadata.remote_addr,
            direction,
            values,
        };
        self.sink.write(&record);
        DumpOutcome::Recorded(count)
    }
}
