//! Assign candidate files to scanning units and bundle keys

use crate::bundle::CandidateFile;
use crate::config::{BatchEntityMode, GroupingStrategy, ScanConfiguration};
use std::collections::BTreeMap;
use std::path::Component;
use tracing::debug;

/// A group of files sharing a bundle key, before dependency resolution
#[derive(Debug, Clone)]
pub struct DraftBundle {
    pub key: String,
    /// Members in relative-path order
    pub files: Vec<CandidateFile>,
}

/// Result of partitioning a candidate list
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    /// Drafts sorted by key
    pub drafts: Vec<DraftBundle>,
    /// Candidates outside every scanning unit of the batch-entity mode
    pub excluded: Vec<CandidateFile>,
}

/// The scanning unit a file belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanUnit {
    /// Loose files directly under the input root
    Root,
    /// An immediate subdirectory of the input root
    Subdirectory(String),
}

impl ScanUnit {
    fn key_prefix(&self) -> String {
        match self {
            ScanUnit::Root => String::new(),
            ScanUnit::Subdirectory(name) => format!("{}/", name),
        }
    }
}

/// Work out which unit (if any) a candidate falls in under `mode`
pub fn scan_unit(file: &CandidateFile, mode: BatchEntityMode) -> Option<ScanUnit> {
    let components: Vec<_> = file
        .relative_path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    match components.len() {
        0 => None,
        1 if mode.includes_root() => Some(ScanUnit::Root),
        n if n > 1 && mode.includes_subdirectories() => {
            Some(ScanUnit::Subdirectory(components[0].clone()))
        }
        _ => None,
    }
}

/// Fine-grained key of a file within its unit
pub fn group_key(file: &CandidateFile, strategy: &GroupingStrategy) -> String {
    match strategy {
        GroupingStrategy::None => file.file_name(),
        GroupingStrategy::Stem => file.stem(),
        GroupingStrategy::Pattern { regex } => {
            let name = file.file_name();
            regex
                .captures(&name)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|m| m.as_str().to_string())
                .filter(|key| !key.is_empty())
                .unwrap_or_else(|| file.stem())
        }
        GroupingStrategy::PrefixSuffix { prefix, suffix } => {
            strip_affixes(&file.stem(), prefix, suffix)
        }
    }
}

/// Remove an anchored prefix match and an anchored suffix match from `stem`
///
/// Falls back to the unmodified stem when stripping would leave nothing.
fn strip_affixes(stem: &str, prefix: &regex::Regex, suffix: &regex::Regex) -> String {
    let without_prefix = match prefix.find(stem) {
        Some(m) if m.start() == 0 => &stem[m.end()..],
        _ => stem,
    };
    let stripped = match suffix.find_iter(without_prefix).last() {
        Some(m) if m.end() == without_prefix.len() => &without_prefix[..m.start()],
        _ => without_prefix,
    };

    if stripped.is_empty() {
        stem.to_string()
    } else {
        stripped.to_string()
    }
}

/// Partition candidates into draft bundles
pub fn group_files(files: &[CandidateFile], config: &ScanConfiguration) -> Grouping {
    let mut by_key: BTreeMap<String, Vec<CandidateFile>> = BTreeMap::new();
    let mut excluded = Vec::new();

    for file in files {
        let Some(unit) = scan_unit(file, config.batch_entity()) else {
            excluded.push(file.clone());
            continue;
        };

        let key = format!("{}{}", unit.key_prefix(), group_key(file, config.strategy()));
        by_key.entry(key).or_default().push(file.clone());
    }

    let drafts: Vec<DraftBundle> = by_key
        .into_iter()
        .map(|(key, mut files)| {
            files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
            DraftBundle { key, files }
        })
        .collect();

    debug!(
        "Grouped {} file(s) into {} draft bundle(s) using '{}' ({} outside scanning units)",
        files.len() - excluded.len(),
        drafts.len(),
        config.strategy().name(),
        excluded.len()
    );

    Grouping { drafts, excluded }
}
