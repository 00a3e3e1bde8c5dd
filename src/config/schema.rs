use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::dumper::{DumperKind, DumperOptions};
use crate::error::DumperError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub tcpdp: DumperConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default, alias = "dump_log", alias = "dumplog")]
    pub dump_log: DumpLogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumperConfig {
    /// Dumper name: `pg`, `mysql` or `hex`
    #[serde(default = "default_dumper")]
    pub dumper: String,
    /// Extra connection parameters surfaced as persistent values
    #[serde(default, alias = "persistent_keys", alias = "persistentkeys")]
    pub persistent_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default = "default_listen_addr", alias = "listen_addr", alias = "listenaddr")]
    pub listen_addr: String,
    #[serde(default = "default_remote_addr", alias = "remote_addr", alias = "remoteaddr")]
    pub remote_addr: String,
    /// Size of the read buffer used for each direction of a connection
    #[serde(default = "default_buffer_size", alias = "buffer_size", alias = "buffersize")]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Write diagnostics to stdout even when `dir` is set
    #[serde(default)]
    pub stdout: bool,
    /// Directory for the daily rotated diagnostic log
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpLogConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default = "default_dump_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_dump_log_file", alias = "file_name", alias = "filename")]
    pub file_name: String,
}

// Default value functions
fn default_dumper() -> String {
    DumperKind::Hex.as_str().to_string()
}

fn default_listen_addr() -> String {
    "localhost:8080".to_string()
}

fn default_remote_addr() -> String {
    "localhost:80".to_string()
}

fn default_buffer_size() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_true() -> bool {
    true
}

fn default_dump_log_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_dump_log_file() -> String {
    "dump.log".to_string()
}

impl Default for DumperConfig {
    fn default() -> Self {
        Self {
            dumper: default_dumper(),
            persistent_keys: Vec::new(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            remote_addr: default_remote_addr(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            stdout: false,
            dir: None,
        }
    }
}

impl Default for DumpLogConfig {
    fn default() -> Self {
        Self {
            enable: true,
            stdout: false,
            dir: default_dump_log_dir(),
            file_name: default_dump_log_file(),
        }
    }
}

impl Config {
    pub fn dumper_kind(&self) -> std::result::Result<DumperKind, DumperError> {
        self.tcpdp.dumper.parse()
    }

    pub fn dumper_options(&self) -> DumperOptions {
        DumperOptions {
            extra_persistent_keys: self.tcpdp.persistent_keys.clone(),
        }
    }
}
