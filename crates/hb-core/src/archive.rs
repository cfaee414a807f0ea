//! Packing of secondary dependencies into per-bundle zip archives
//!
//! Originals are only ever read. A failed archive leaves the bundle exactly
//! as it was.

use crate::bundle::{Bundle, FileRole};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Why an archive could not be written
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot create output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write archive '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("zip error in '{path}': {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

impl ArchiveError {
    /// The archive or directory that could not be written
    pub fn path(&self) -> &Path {
        match self {
            ArchiveError::OutputDir { path, .. }
            | ArchiveError::Write { path, .. }
            | ArchiveError::Zip { path, .. } => path,
        }
    }
}

/// Which secondary dependencies go into the archive
#[derive(Debug, Clone, Copy)]
pub struct ArchiveOptions {
    /// Also take secondary files that are not under a subdirectory of the source
    pub include_loose: bool,
}

/// File name of the archive for a bundle key
pub fn archive_name(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    format!("{}.zip", sanitized)
}

/// Archive file names handed out during one scan
///
/// Distinct keys can sanitize to the same name (`site/statue` and
/// `site_statue`); later ones get a numeric suffix. Names are compared
/// case-insensitively so they stay distinct on case-folding filesystems.
#[derive(Debug, Default)]
pub struct ArchiveNames {
    used: HashSet<String>,
}

impl ArchiveNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a file name for `key` that no earlier bundle of the scan got
    pub fn claim(&mut self, key: &str) -> String {
        let name = archive_name(key);
        if self.used.insert(name.to_lowercase()) {
            return name;
        }

        let stem = name.trim_end_matches(".zip");
        let mut counter = 2;
        loop {
            let candidate = format!("{}_{}.zip", stem, counter);
            if self.used.insert(candidate.to_lowercase()) {
                debug!("Archive name {} taken, using {}", name, candidate);
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Name of `path` inside the archive, relative to the source directory
fn entry_name(path: &Path, source_dir: &Path) -> String {
    match path.strip_prefix(source_dir) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// Indices of the members that should be archived
fn select_members(bundle: &Bundle, options: ArchiveOptions) -> Vec<usize> {
    let Some(source_dir) = bundle
        .sources()
        .next()
        .and_then(|s| s.path.parent())
        .map(Path::to_path_buf)
    else {
        return Vec::new();
    };

    bundle
        .members
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == FileRole::SecondaryDependency)
        .filter(|(_, m)| {
            let in_subdirectory = m.path.starts_with(&source_dir)
                && m.path.parent().is_some_and(|p| p != source_dir);
            in_subdirectory || options.include_loose
        })
        .map(|(idx, _)| idx)
        .collect()
}

fn write_archive(archive_path: &Path, entries: &[(String, &Path)]) -> Result<(), ArchiveError> {
    let write_err = |source: io::Error| ArchiveError::Write {
        path: archive_path.to_path_buf(),
        source,
    };
    let zip_err = |source: zip::result::ZipError| ArchiveError::Zip {
        path: archive_path.to_path_buf(),
        source,
    };

    let file = File::create(archive_path).map_err(write_err)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));

    for (name, path) in entries {
        debug!("Adding {} to {} as '{}'", path.display(), archive_path.display(), name);
        let file_options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(name.as_str(), file_options).map_err(zip_err)?;
        let mut input = File::open(path).map_err(write_err)?;
        io::copy(&mut input, &mut writer).map_err(write_err)?;
    }
    writer.finish().map_err(zip_err)?;
    Ok(())
}

/// Archive a bundle's secondary dependencies into `output_root`
///
/// Returns the archive path, or `None` when nothing qualified. On success the
/// archived members are reclassified as [`FileRole::ArchivedFile`]. A name is
/// only reserved in `names` when there is something to archive.
pub fn archive_bundle(
    bundle: &mut Bundle,
    output_root: &Path,
    names: &mut ArchiveNames,
    options: ArchiveOptions,
) -> Result<Option<PathBuf>, ArchiveError> {
    let selected = select_members(bundle, options);
    if selected.is_empty() {
        return Ok(None);
    }
    let archive_path = output_root.join(names.claim(&bundle.key));

    fs::create_dir_all(output_root).map_err(|e| ArchiveError::OutputDir {
        path: output_root.to_path_buf(),
        source: e,
    })?;

    let source_dir = bundle
        .sources()
        .next()
        .and_then(|s| s.path.parent())
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let entries: Vec<(String, &Path)> = selected
        .iter()
        .map(|&idx| {
            let path = bundle.members[idx].path.as_path();
            (entry_name(path, &source_dir), path)
        })
        .collect();

    if let Err(e) = write_archive(&archive_path, &entries) {
        // never leave a truncated archive behind
        let _ = fs::remove_file(&archive_path);
        return Err(e);
    }

    for &idx in &selected {
        let member = &mut bundle.members[idx];
        member.role = FileRole::ArchivedFile;
        member.archive = Some(archive_path.clone());
    }

    info!(
        "Archived {} file(s) of bundle '{}' into {}",
        selected.len(),
        bundle.key,
        archive_path.display()
    );

    Ok(Some(archive_path))
}
