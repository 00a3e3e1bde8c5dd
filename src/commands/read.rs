use serde::Serialize;
use std::path::Path;
use tracing::Span;

use crate::dumper::{create_dumper, DumpValue, Dumper, DumperKind, DumperOptions};
use crate::error::Result;

/// Which dumper entry point produced a [`ReadOutput`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadEntry {
    Persistent,
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadOutput {
    pub entry: ReadEntry,
    pub values: Vec<DumpValue>,
}

/// Runs both entry points over `buf`, keeping the non-empty results.
pub fn read_payload(dumper: &dyn Dumper, buf: &[u8]) -> Vec<ReadOutput> {
    [
        (ReadEntry::Persistent, dumper.read_persistent_values(buf)),
        (ReadEntry::Read, dumper.read(buf)),
    ]
    .into_iter()
    .filter(|(_, values)| !values.is_empty())
    .map(|(entry, values)| ReadOutput { entry, values })
    .collect()
}

/// Feeds the raw payload stored in `path` through the `kind` dumper.
pub async fn run_read(
    kind: DumperKind,
    options: &DumperOptions,
    path: &Path,
) -> Result<Vec<ReadOutput>> {
    let buf = tokio::fs::read(path).await?;
    let span = tracing::info_span!("read", dumper = kind.as_str());
    let dumper = create_dumper(kind, options, span);

    tracing::debug!(path = %path.display(), len = buf.len(), "Read payload");
    Ok(read_payload(dumper.as_ref(), &buf))
}
