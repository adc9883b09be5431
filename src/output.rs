//! Persistence of run results: the speed profiles, failed sections, and
//! the append-only run statistics log.

use crate::error::{PipelineError, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Logs a value as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file (and its directory) with headers if it does not already
/// exist.
pub fn append_record(path: &Path, record: &impl Serialize) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

/// Writes `value` as pretty JSON, replacing `path` in one rename so readers
/// see either the old or the new file.
pub fn write_json_atomic(path: &Path, value: &impl Serialize) -> Result<()> {
    let unwritable = |source: std::io::Error| PipelineError::CacheUnwritable {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(unwritable)?;

    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| unwritable(e.into()))?;
    bytes.push(b'\n');

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)
        .map_err(unwritable)?;
    tmp.write_all(&bytes).map_err(unwritable)?;
    tmp.as_file().sync_all().map_err(unwritable)?;
    tmp.persist(path).map_err(|e| unwritable(e.error))?;

    debug!(path = %path.display(), bytes = bytes.len(), "Wrote JSON");
    Ok(())
}
