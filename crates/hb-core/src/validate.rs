//! Per-file and per-bundle status stamping

use crate::bundle::Bundle;
use crate::report::{FileStatus, ReportErrorKind, ValidationReport};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// Check that a file can be opened and read from
pub fn check_readable(path: &Path) -> Result<(), String> {
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    let mut byte = [0u8; 1];
    file.read(&mut byte).map(drop).map_err(|e| e.to_string())
}

/// Record every member of `bundle` that cannot be read
///
/// Files the resolver already failed to read are not reported twice.
pub fn validate_members(bundle: &Bundle, report: &mut ValidationReport) {
    for member in &bundle.members {
        let already_reported = report
            .errors
            .iter()
            .any(|e| e.kind == ReportErrorKind::UnreadableFile && e.path == member.path);
        if already_reported {
            continue;
        }
        if let Err(message) = check_readable(&member.path) {
            warn!("{} in bundle '{}' is unreadable: {}", member.path.display(), bundle.key, message);
            report.push_error(ReportErrorKind::UnreadableFile, &member.path, message);
        }
    }
}

/// Status of the whole bundle
pub fn bundle_status(report: &ValidationReport) -> FileStatus {
    report.status()
}

/// Status of one file, from the issues that concern it
pub fn file_status(report: &ValidationReport, path: &Path) -> FileStatus {
    report.for_file(path).status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleMember, FileRole};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn member(path: PathBuf, role: FileRole) -> BundleMember {
        BundleMember {
            relative_path: PathBuf::from(path.file_name().unwrap()),
            extension: ".jpg".into(),
            size: 0,
            path,
            role,
            archive: None,
        }
    }

    #[test]
    fn test_missing_member_is_invalid() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("a.jpg");
        fs::write(&present, "x").unwrap();
        let vanished = dir.path().join("b.jpg");

        let mut bundle = Bundle::new("a");
        bundle.members.push(member(present.clone(), FileRole::Source));
        bundle.members.push(member(vanished.clone(), FileRole::SecondaryDependency));

        let mut report = ValidationReport::new();
        validate_members(&bundle, &mut report);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(bundle_status(&report), FileStatus::Invalid);
        assert_eq!(file_status(&report, &present), FileStatus::Valid);
        assert_eq!(file_status(&report, &vanished), FileStatus::Invalid);
    }

    #[test]
    fn test_no_double_reporting() {
        let dir = tempdir().unwrap();
        let vanished = dir.path().join("gone.obj");
        let mut bundle = Bundle::new("gone");
        bundle.members.push(member(vanished.clone(), FileRole::Source));

        let mut report = ValidationReport::new();
        report.push_error(ReportErrorKind::UnreadableFile, &vanished, "not found");
        validate_members(&bundle, &mut report);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_empty_file_is_readable() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.obj");
        fs::write(&empty, "").unwrap();
        assert!(check_readable(&empty).is_ok());
    }
}
