//! Directory walker that turns an input root into a sorted candidate list

use crate::bundle::{extension_of, CandidateFile};
use crate::config::ScanConfiguration;
use crate::error::{Error, Result};
use crate::report::{ReportError, ReportErrorKind};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Files found under a root, plus the entries that could not be read
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    /// Candidates sorted by relative path
    pub files: Vec<CandidateFile>,
    /// Entries skipped because they were unreadable
    pub skipped: Vec<ReportError>,
}

/// Walk `root` and collect every file whose extension the configuration allows
///
/// `exclude` names a directory (typically the archive output area) whose
/// contents never become candidates.
pub fn enumerate_files(
    root: &Path,
    config: &ScanConfiguration,
    exclude: Option<&Path>,
) -> Result<Enumeration> {
    fs::read_dir(root).map_err(|e| Error::RootUnreadable {
        path: root.to_path_buf(),
        source: e,
    })?;

    let mut enumeration = Enumeration::default();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match exclude {
            Some(excluded) => !entry.path().starts_with(excluded),
            None => true,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                warn!("Skipping unreadable entry {}: {}", path.display(), err);
                enumeration.skipped.push(ReportError {
                    kind: ReportErrorKind::UnreadableFile,
                    path,
                    message: err.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !config.allows_extension(&extension_of(path)) {
            continue;
        }

        match entry.metadata() {
            Ok(metadata) => enumeration.files.push(CandidateFile::new(
                root,
                path.to_path_buf(),
                metadata.len(),
            )),
            Err(err) => {
                warn!("Skipping {}: {}", path.display(), err);
                enumeration.skipped.push(ReportError {
                    kind: ReportErrorKind::UnreadableFile,
                    path: path.to_path_buf(),
                    message: err.to_string(),
                });
            }
        }
    }

    enumeration
        .files
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    debug!(
        "Enumerated {} file(s) under {} ({} skipped)",
        enumeration.files.len(),
        root.display(),
        enumeration.skipped.len()
    );

    Ok(enumeration)
}

/// List every regular file beneath `dir`, sorted, without any extension filter
pub fn list_files_recursive(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanSettings;
    use tempfile::tempdir;

    fn config_for(exts: &[&str]) -> ScanConfiguration {
        let settings = ScanSettings {
            allowed_extensions: exts.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        ScanConfiguration::from_settings(&settings).unwrap()
    }

    #[test]
    fn test_enumerate_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("z.obj"), "o").unwrap();
        fs::write(dir.path().join("a.OBJ"), "o").unwrap();
        fs::write(dir.path().join("b/c.mtl"), "m").unwrap();
        fs::write(dir.path().join("notes.txt"), "t").unwrap();

        let result = enumerate_files(dir.path(), &config_for(&["obj", "mtl"]), None).unwrap();
        let names: Vec<_> = result
            .files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.OBJ", "b/c.mtl", "z.obj"]);
        assert!(result.skipped.is_empty());
        assert_eq!(result.files[0].size, 1);
    }

    #[test]
    fn test_empty_allow_list_takes_everything() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README"), "r").unwrap();
        fs::write(dir.path().join("x.jpg"), "j").unwrap();

        let result = enumerate_files(dir.path(), &config_for(&[]), None).unwrap();
        assert_eq!(result.files.len(), 2);
    }

    #[test]
    fn test_excluded_directory() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("bundle.zip"), "z").unwrap();
        fs::write(dir.path().join("x.jpg"), "j").unwrap();

        let result = enumerate_files(dir.path(), &config_for(&[]), Some(&out)).unwrap();
        assert_eq!(result.files.len(), 1);
    }

    #[test]
    fn test_unreadable_root_is_fatal() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = enumerate_files(&missing, &config_for(&[]), None).unwrap_err();
        assert!(matches!(err, Error::RootUnreadable { .. }));
    }
}
