//! Diagnostic logging setup and the dump log sink.
//!
//! Diagnostics go through `tracing`; dump records are written as JSON lines to
//! their own non-blocking writer so they never mix with diagnostic output.

use std::io::Write;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

use crate::config::{DumpLogConfig, LogConfig, LogFormat};
use crate::error::{ConfigError, Result};
use crate::session::{DumpRecord, DumpSink};

const DIAGNOSTIC_LOG_FILE: &str = "tcp-rust-dumper.log";

/// Keeps the background log writers alive; dropping it flushes pending lines.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` directives are honoured; the crate's own level comes from the
/// config, or `debug` when `debug` is set.
pub fn init(config: &LogConfig, debug: bool) -> Result<LogGuard> {
    let level = if debug { "debug" } else { config.level.as_str() };
    let directive = format!("tcp_rust_dumper={level}")
        .parse()
        .map_err(|e| ConfigError::Logging(format!("invalid log level '{level}': {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let (writer, guard) = match (&config.dir, config.stdout) {
        (Some(dir), false) => {
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, DIAGNOSTIC_LOG_FILE))
        }
        _ => tracing_appender::non_blocking(std::io::stdout()),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(LogGuard { _guard: guard })
}

/// JSON-lines dump log
pub struct DumpLog {
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl DumpLog {
    pub fn from_config(config: &DumpLogConfig) -> Self {
        let (writer, guard) = if !config.enable {
            tracing_appender::non_blocking(std::io::sink())
        } else if config.stdout {
            tracing_appender::non_blocking(std::io::stdout())
        } else {
            tracing_appender::non_blocking(tracing_appender::rolling::never(
                &config.dir,
                &config.file_name,
            ))
        };
        Self {
            writer,
            _guard: guard,
        }
    }

    /// Writes to an arbitrary writer, mainly for tests and offline tooling.
    pub fn to_writer<W: Write + Send + 'static>(writer: W) -> Self {
        let (writer, guard) = tracing_appender::non_blocking(writer);
        Self {
            writer,
            _guard: guard,
        }
    }
}

impl DumpSink for DumpLog {
    fn write(&self, record: &DumpRecord) {
        let mut line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(conn_id = %record.conn_id, "Failed to serialize dump record: {}", e);
                return;
            }
        };
        line.push(b'\n');

        // A single write keeps lines from concurrent connections intact.
        let mut writer = self.writer.clone();
        if let Err(e) = writer.write_all(&line) {
            tracing::error!(conn_id = %record.conn_id, "Failed to write dump record: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dumper::{Direction, DumpValue};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn record(query: &str) -> DumpRecord {
        DumpRecord {
            ts: Utc::now(),
            conn_id: Uuid::new_v4(),
            client_addr: None,
            remote_addr: None,
            direction: Direction::ClientToRemote,
            values: vec![
                DumpValue::new("query", query),
                DumpValue::new("message_type", "Q"),
            ],
        }
    }

    #[test]
    fn test_dump_log_writes_json_lines() {
        let buffer = SharedBuffer::default();
        let log = DumpLog::to_writer(buffer.clone());

        log.write(&record("SELECT 1"));
        log.write(&record("SELECT 2"));
        // Dropping the guard flushes the background writer.
        drop(log);

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["query"], "SELECT 1");
        assert_eq!(first["message_type"], "Q");
        assert_eq!(first["direction"], "->");
        assert!(lines[1].contains("SELECT 2"));
    }

    #[test]
    fn test_dump_log_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DumpLogConfig {
            enable: true,
            stdout: false,
            dir: dir.path().to_path_buf(),
            file_name: "dump.log".to_string(),
        };

        let log = DumpLog::from_config(&config);
        log.write(&record("SELECT now()"));
        drop(log);

        let contents = std::fs::read_to_string(dir.path().join("dump.log")).unwrap();
        assert!(contents.contains("SELECT now()"));
    }
}
