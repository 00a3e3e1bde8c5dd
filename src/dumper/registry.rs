use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Span;

use super::{Dumper, HexDumper, MysqlDumper, PgDumper};
use crate::error::DumperError;

/// Closed set of supported protocol dumpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumperKind {
    /// PostgreSQL frontend protocol v3
    Pg,
    /// MySQL client/server protocol 4.1+
    Mysql,
    /// Raw hex dump of every buffer
    Hex,
}

impl DumperKind {
    pub fn all() -> &'static [DumperKind] {
        &[Self::Pg, Self::Mysql, Self::Hex]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pg => "pg",
            Self::Mysql => "mysql",
            Self::Hex => "hex",
        }
    }

    pub fn supported_names() -> Vec<String> {
        Self::all().iter().map(|k| k.as_str().to_string()).collect()
    }
}

impl FromStr for DumperKind {
    type Err = DumperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pg" | "postgres" | "postgresql" => Ok(Self::Pg),
            "mysql" => Ok(Self::Mysql),
            "hex" => Ok(Self::Hex),
            _ => Err(DumperError::UnknownDumper {
                name: s.to_string(),
                supported: Self::supported_names(),
            }),
        }
    }
}

impl fmt::Display for DumperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction options shared by all dumpers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumperOptions {
    /// Extra connection parameters to surface as persistent values, after the
    /// protocol's defaults (username, database). Ignored by the hex dumper.
    #[serde(default)]
    pub extra_persistent_keys: Vec<String>,
}

/// Factory function to create the dumper for `kind`, bound to `span`.
///
/// Diagnostics emitted by the dumper are recorded as children of `span`, which
/// lets callers attach connection or listener context.
pub fn create_dumper(kind: DumperKind, options: &DumperOptions, span: Span) -> Arc<dyn Dumper> {
    let extra = options.extra_persistent_keys.iter().cloned();
    match kind {
        DumperKind::Pg => Arc::new(PgDumper::new(span).with_extra_persistent_keys(extra)),
        DumperKind::Mysql => Arc::new(MysqlDumper::new(span).with_extra_persistent_keys(extra)),
        DumperKind::Hex => Arc::new(HexDumper::new(span)),
    }
}

/// Resolves a configured dumper name and creates it.
pub fn create_dumper_by_name(
    name: &str,
    options: &DumperOptions,
    span: Span,
) -> Result<Arc<dyn Dumper>, DumperError> {
    let kind = name.parse::<DumperKind>()?;
    Ok(create_dumper(kind, options, span))
}
