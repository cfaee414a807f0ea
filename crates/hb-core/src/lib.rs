//! hb-core: Scan engine that turns a directory of heritage-data files into bundles
//!
//! This library provides functionality to:
//! - Enumerate candidate files under an input root
//! - Group files into bundles by name (stem, regex pattern, prefix/suffix)
//! - Resolve OBJ -> MTL -> texture and GLTF -> buffer/image references
//! - Detect missing and conflicting dependencies and stamp statuses
//! - Archive secondary dependencies and export flat record rows

pub mod archive;
pub mod bundle;
pub mod config;
pub mod conflict;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod grouping;
pub mod progress;
pub mod records;
pub mod references;
pub mod report;
pub mod resolver;
pub mod tree;
pub mod validate;

pub use bundle::{Bundle, BundleMember, CandidateFile, FileRole};
pub use config::{BatchEntityMode, GroupingSettings, GroupingStrategy, ScanConfiguration, ScanSettings};
pub use engine::{ScanOutcome, Scanner};
pub use error::{Error, Result};
pub use progress::{CancellationToken, ProgressReporter, SilentReporter};
pub use records::{read_csv, write_csv, write_json, RecordRow};
pub use report::{Conflict, FileStatus, MissingDependency, ReportError, ReportErrorKind, ValidationReport};
pub use tree::{BundleId, BundleNode, FileId, FileNode, RecordTree};
