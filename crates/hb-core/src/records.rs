//! Flat record rows handed to the persistence layer

use crate::bundle::FileRole;
use crate::error::{Error, Result};
use crate::report::FileStatus;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// One file of one bundle, as the catalogue stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRow {
    pub bundle_key: String,
    pub role: FileRole,
    pub path: PathBuf,
    pub status: FileStatus,
}

/// Write rows as CSV with a header line
pub fn write_csv<P: AsRef<Path>>(rows: &[RecordRow], path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read rows previously written by [`write_csv`]
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Vec<RecordRow>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut reader = csv::Reader::from_reader(file);
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

/// Write rows as a pretty-printed JSON array
pub fn write_json<P: AsRef<Path>>(rows: &[RecordRow], path: P) -> Result<()> {
    let content = serde_json::to_string_pretty(rows)?;
    fs::write(path.as_ref(), content).map_err(|e| Error::FileWrite {
        path: path.as_ref().to_path_buf(),
        source: e,
    })
}
