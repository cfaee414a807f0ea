//! Files, roles and bundles

use crate::conflict::HashCache;
use crate::config::normalize_extension;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A file discovered under the input root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFile {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Path relative to the input root
    pub relative_path: PathBuf,
    /// Lower-cased extension with leading dot, empty if none
    pub extension: String,
    /// Size in bytes
    pub size: u64,
}

impl CandidateFile {
    /// Build a candidate for `path`, which must live under `root`
    pub fn new(root: &Path, path: PathBuf, size: u64) -> Self {
        let relative_path = path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());
        Self {
            extension: extension_of(&path),
            relative_path,
            path,
            size,
        }
    }

    /// File name as a string (lossy)
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without its final extension
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Full content hash, computed on first use and cached for the scan
    pub fn content_hash(&self, cache: &HashCache) -> io::Result<blake3::Hash> {
        cache.full_hash(&self.path)
    }
}

/// Canonical form of `path`, or the path itself if it cannot be resolved
pub fn canonical_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Lower-cased extension of `path` with a leading dot, or empty
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| normalize_extension(&e.to_string_lossy()))
        .unwrap_or_default()
}

/// The part a file plays in its bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    /// Top-level entry point
    Source,
    /// Directly referenced by a source (MTL, BIN)
    PrimaryDependency,
    /// Referenced transitively (textures)
    SecondaryDependency,
    /// Secondary dependency packed into an archive
    ArchivedFile,
}

impl FileRole {
    pub fn as_str(self) -> &'static str {
        match self {
            FileRole::Source => "source",
            FileRole::PrimaryDependency => "primary_dependency",
            FileRole::SecondaryDependency => "secondary_dependency",
            FileRole::ArchivedFile => "archived_file",
        }
    }

    /// Role for a grouped file that no source reached
    pub fn guess_for_extension(ext: &str) -> Self {
        match ext {
            ".mtl" | ".bin" => FileRole::PrimaryDependency,
            _ => FileRole::SecondaryDependency,
        }
    }

    pub fn is_dependency(self) -> bool {
        !matches!(self, FileRole::Source)
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file inside a bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMember {
    pub path: PathBuf,
    /// Relative to the input root; absolute for files found outside it
    pub relative_path: PathBuf,
    pub extension: String,
    pub size: u64,
    pub role: FileRole,
    /// Archive holding this file, for `ArchivedFile` members
    pub archive: Option<PathBuf>,
}

impl BundleMember {
    pub fn from_candidate(file: &CandidateFile, role: FileRole) -> Self {
        Self {
            path: file.path.clone(),
            relative_path: file.relative_path.clone(),
            extension: file.extension.clone(),
            size: file.size,
            role,
            archive: None,
        }
    }
}

/// A future catalogue record: a keyed set of role-tagged files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub key: String,
    pub members: Vec<BundleMember>,
}

impl Bundle {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            members: Vec::new(),
        }
    }

    /// Members with the given role
    pub fn with_role(&self, role: FileRole) -> impl Iterator<Item = &BundleMember> {
        self.members.iter().filter(move |m| m.role == role)
    }

    pub fn count_role(&self, role: FileRole) -> usize {
        self.with_role(role).count()
    }

    pub fn sources(&self) -> impl Iterator<Item = &BundleMember> {
        self.with_role(FileRole::Source)
    }

    pub fn find_member(&self, path: &Path) -> Option<&BundleMember> {
        self.members.iter().find(|m| m.path == path)
    }

    /// Sort members: sources, then primary, then secondary/archived, by relative path
    pub fn sort_members(&mut self) {
        self.members.sort_by(|a, b| {
            role_rank(a.role)
                .cmp(&role_rank(b.role))
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
    }
}

fn role_rank(role: FileRole) -> u8 {
    match role {
        FileRole::Source => 0,
        FileRole::PrimaryDependency => 1,
        FileRole::SecondaryDependency | FileRole::ArchivedFile => 2,
    }
}
