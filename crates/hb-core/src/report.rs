//! Validation reports and statuses
//!
//! A report is built fresh for every bundle on every scan. Per-file views are
//! derived from the bundle report by filtering on the file's path.

use crate::bundle::FileRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Resolved status of a file or bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    #[serde(rename = "Valid")]
    Valid,
    #[serde(rename = "MTL Missing")]
    MtlMissing,
    #[serde(rename = "Textures Missing")]
    TexturesMissing,
    #[serde(rename = "Invalid")]
    Invalid,
    #[serde(rename = "Problems")]
    Problems,
    #[serde(rename = "File Conflict")]
    FileConflict,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Valid => "Valid",
            FileStatus::MtlMissing => "MTL Missing",
            FileStatus::TexturesMissing => "Textures Missing",
            FileStatus::Invalid => "Invalid",
            FileStatus::Problems => "Problems",
            FileStatus::FileConflict => "File Conflict",
        }
    }

    pub fn is_valid(self) -> bool {
        self == FileStatus::Valid
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of recorded (non-fatal) errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportErrorKind {
    /// A file could not be read or failed to parse
    UnreadableFile,
    /// A reference points back at one of its own ancestors
    DependencyCycle,
    /// Secondary files could not be archived; never affects status
    ArchiveWriteError,
}

/// A recorded error about one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportError {
    pub kind: ReportErrorKind,
    pub path: PathBuf,
    pub message: String,
}

/// A reference that matched nothing in any search directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    pub referenced_by: PathBuf,
    pub name: String,
    /// Role the file would have had
    pub role: FileRole,
}

impl MissingDependency {
    fn is_material(&self) -> bool {
        Path::new(&self.name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mtl"))
    }
}

/// A reference that matched several files with different content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub referenced_by: PathBuf,
    pub name: String,
    pub candidates: Vec<PathBuf>,
    pub explanation: String,
}

/// Everything that went wrong (or is worth noting) for a bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ReportError>,
    pub missing: Vec<MissingDependency>,
    pub conflicts: Vec<Conflict>,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum IssueCategory {
    Invalid,
    MtlMissing,
    TexturesMissing,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_error(&mut self, kind: ReportErrorKind, path: &Path, message: impl Into<String>) {
        self.errors.push(ReportError {
            kind,
            path: path.to_path_buf(),
            message: message.into(),
        });
    }

    pub fn push_missing(&mut self, referenced_by: &Path, name: &str, role: FileRole) {
        let missing = MissingDependency {
            referenced_by: referenced_by.to_path_buf(),
            name: name.to_string(),
            role,
        };
        if !self.missing.contains(&missing) {
            self.missing.push(missing);
        }
    }

    pub fn push_conflict(&mut self, conflict: Conflict) {
        if !self.conflicts.contains(&conflict) {
            self.conflicts.push(conflict);
        }
    }

    pub fn set_detail(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.details.insert(key.into(), value.into());
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.missing.is_empty() && self.conflicts.is_empty()
    }

    /// Names of all missing references
    pub fn missing_names(&self) -> Vec<&str> {
        self.missing.iter().map(|m| m.name.as_str()).collect()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        for missing in other.missing {
            if !self.missing.contains(&missing) {
                self.missing.push(missing);
            }
        }
        for conflict in other.conflicts {
            self.push_conflict(conflict);
        }
        self.details.extend(other.details);
    }

    /// The part of this report about a single file
    pub fn for_file(&self, path: &Path) -> ValidationReport {
        ValidationReport {
            errors: self.errors.iter().filter(|e| e.path == path).cloned().collect(),
            missing: self
                .missing
                .iter()
                .filter(|m| m.referenced_by == path)
                .cloned()
                .collect(),
            conflicts: self
                .conflicts
                .iter()
                .filter(|c| c.referenced_by == path)
                .cloned()
                .collect(),
            details: BTreeMap::new(),
        }
    }

    /// Status by precedence: conflict, problems, invalid, missing, valid
    pub fn status(&self) -> FileStatus {
        if !self.conflicts.is_empty() {
            return FileStatus::FileConflict;
        }

        let mut categories: Vec<IssueCategory> = Vec::new();
        for error in &self.errors {
            if error.kind != ReportErrorKind::ArchiveWriteError {
                categories.push(IssueCategory::Invalid);
            }
        }
        for missing in &self.missing {
            categories.push(if missing.is_material() {
                IssueCategory::MtlMissing
            } else if missing.role == FileRole::PrimaryDependency {
                // a missing buffer leaves the model without geometry
                IssueCategory::Invalid
            } else {
                IssueCategory::TexturesMissing
            });
        }
        categories.sort();
        categories.dedup();

        match categories.as_slice() {
            [] => FileStatus::Valid,
            [IssueCategory::Invalid] => FileStatus::Invalid,
            [IssueCategory::MtlMissing] => FileStatus::MtlMissing,
            [IssueCategory::TexturesMissing] => FileStatus::TexturesMissing,
            _ => FileStatus::Problems,
        }
    }
}
