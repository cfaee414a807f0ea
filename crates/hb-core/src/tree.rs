//! Arena-backed result tree: bundles own files, each bundle owns a report

use crate::bundle::{Bundle, FileRole};
use crate::records::RecordRow;
use crate::report::{FileStatus, ValidationReport};
use crate::validate::{bundle_status, file_status};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Index of a bundle in [`RecordTree::bundles`]
pub type BundleId = usize;
/// Index of a file in [`RecordTree::files`]
pub type FileId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleNode {
    pub key: String,
    pub status: FileStatus,
    /// Sources, then primary, then secondary/archived files
    pub files: Vec<FileId>,
    /// Index into [`RecordTree::reports`]
    pub report: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub bundle: BundleId,
    pub role: FileRole,
    pub path: PathBuf,
    pub relative_path: PathBuf,
    pub size: u64,
    pub status: FileStatus,
    pub archive: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordTree {
    pub bundles: Vec<BundleNode>,
    pub files: Vec<FileNode>,
    pub reports: Vec<ValidationReport>,
}

impl RecordTree {
    /// Build the tree from finished bundles, keeping their order
    pub fn build(bundles: Vec<(Bundle, ValidationReport)>) -> Self {
        let mut tree = RecordTree::default();

        for (mut bundle, report) in bundles {
            bundle.sort_members();
            let bundle_id = tree.bundles.len();
            let report_id = tree.reports.len();

            let mut file_ids = Vec::with_capacity(bundle.members.len());
            for member in bundle.members {
                file_ids.push(tree.files.len());
                tree.files.push(FileNode {
                    bundle: bundle_id,
                    role: member.role,
                    status: file_status(&report, &member.path),
                    path: member.path,
                    relative_path: member.relative_path,
                    size: member.size,
                    archive: member.archive,
                });
            }

            tree.bundles.push(BundleNode {
                key: bundle.key,
                status: bundle_status(&report),
                files: file_ids,
                report: report_id,
            });
            tree.reports.push(report);
        }

        tree
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn find_bundle(&self, key: &str) -> Option<BundleId> {
        self.bundles.iter().position(|b| b.key == key)
    }

    pub fn find_file(&self, path: &Path) -> Option<FileId> {
        self.files.iter().position(|f| f.path == path)
    }

    /// Files of a bundle in display order
    pub fn bundle_files(&self, bundle: BundleId) -> impl Iterator<Item = &FileNode> {
        self.bundles
            .get(bundle)
            .map(|b| b.files.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|&id| self.files.get(id))
    }

    /// Number of files in a bundle with the given role
    pub fn count_role(&self, bundle: BundleId, role: FileRole) -> usize {
        self.bundle_files(bundle).filter(|f| f.role == role).count()
    }

    /// Full validation report of a bundle
    pub fn report(&self, bundle: BundleId) -> Option<&ValidationReport> {
        self.bundles
            .get(bundle)
            .and_then(|b| self.reports.get(b.report))
    }

    /// The part of the owning bundle's report that concerns one file
    pub fn file_report(&self, file: FileId) -> Option<ValidationReport> {
        let node = self.files.get(file)?;
        self.report(node.bundle).map(|r| r.for_file(&node.path))
    }

    /// Flat rows for persistence, in tree order
    pub fn records(&self) -> Vec<RecordRow> {
        self.bundles
            .iter()
            .enumerate()
            .flat_map(|(id, bundle)| {
                self.bundle_files(id).map(move |file| RecordRow {
                    bundle_key: bundle.key.clone(),
                    role: file.role,
                    path: file.path.clone(),
                    status: file.status,
                })
            })
            .collect()
    }
}
