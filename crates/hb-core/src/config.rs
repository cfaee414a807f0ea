//! Scan configuration
//!
//! [`ScanSettings`] is the loosely-typed form that is read from and written to
//! JSON. [`ScanConfiguration`] is the validated form a scan runs against: its
//! patterns are compiled once, so a malformed regex fails here before any
//! directory is touched.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Which directory level defines a scanning unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchEntityMode {
    /// Loose files directly under the input root
    #[default]
    Root,
    /// Each immediate subdirectory, with everything beneath it
    Subdirectory,
    /// Both of the above
    Hybrid,
}

impl BatchEntityMode {
    pub fn includes_root(self) -> bool {
        matches!(self, BatchEntityMode::Root | BatchEntityMode::Hybrid)
    }

    pub fn includes_subdirectories(self) -> bool {
        matches!(self, BatchEntityMode::Subdirectory | BatchEntityMode::Hybrid)
    }
}

/// Grouping strategy as written in a settings file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum GroupingSettings {
    None,
    #[default]
    Stem,
    Pattern {
        regex: String,
    },
    #[serde(rename = "prefixsuffix")]
    PrefixSuffix {
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        suffix: String,
        #[serde(default)]
        treat_as_regex: bool,
    },
}

/// Raw scan settings, loaded from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Extensions to include; empty means every file
    pub allowed_extensions: Vec<String>,
    pub batch_entity: BatchEntityMode,
    pub bundling_enabled: bool,
    pub grouping: GroupingSettings,
    /// Extension of the authoritative entry point of a bundle (e.g. ".obj")
    pub primary_source_extension: Option<String>,
    /// Extra directories searched for referenced files
    pub search_directories: Vec<PathBuf>,
    /// Also search beneath every search directory
    pub recursive_search: bool,
    /// Pack secondary dependencies found under subdirectories into archives
    pub archive_subdirectories: bool,
    /// Also archive secondary dependencies that sit next to the source
    pub archive_loose_secondaries: bool,
    /// Bundle worker threads; 0 lets rayon decide
    pub workers: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            allowed_extensions: Vec::new(),
            batch_entity: BatchEntityMode::Root,
            bundling_enabled: true,
            grouping: GroupingSettings::Stem,
            primary_source_extension: None,
            search_directories: Vec::new(),
            recursive_search: true,
            archive_subdirectories: false,
            archive_loose_secondaries: false,
            workers: 0,
        }
    }
}

impl ScanSettings {
    /// Load settings from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(Error::Json)
    }

    /// Save settings to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content).map_err(|e| Error::FileWrite {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }
}

/// Compiled grouping strategy
#[derive(Debug, Clone)]
pub enum GroupingStrategy {
    None,
    Stem,
    Pattern { regex: Regex },
    PrefixSuffix { prefix: Regex, suffix: Regex },
}

impl GroupingStrategy {
    /// Compile a strategy, anchoring prefix/suffix patterns to the ends of the stem
    pub fn compile(settings: &GroupingSettings) -> Result<Self> {
        match settings {
            GroupingSettings::None => Ok(GroupingStrategy::None),
            GroupingSettings::Stem => Ok(GroupingStrategy::Stem),
            GroupingSettings::Pattern { regex } => Ok(GroupingStrategy::Pattern {
                regex: compile_pattern("grouping", regex)?,
            }),
            GroupingSettings::PrefixSuffix {
                prefix,
                suffix,
                treat_as_regex,
            } => {
                let (prefix_src, suffix_src) = if *treat_as_regex {
                    (prefix.clone(), suffix.clone())
                } else {
                    (regex::escape(prefix), regex::escape(suffix))
                };
                Ok(GroupingStrategy::PrefixSuffix {
                    prefix: compile_pattern("prefix", &format!("^(?:{})", prefix_src))?,
                    suffix: compile_pattern("suffix", &format!("(?:{})$", suffix_src))?,
                })
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GroupingStrategy::None => "none",
            GroupingStrategy::Stem => "stem",
            GroupingStrategy::Pattern { .. } => "pattern",
            GroupingStrategy::PrefixSuffix { .. } => "prefixsuffix",
        }
    }
}

fn compile_pattern(field: &'static str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| Error::InvalidPattern {
        field,
        pattern: pattern.to_string(),
        source,
    })
}

/// Normalize an extension to lower case with a leading dot
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.');
    format!(".{}", trimmed.to_ascii_lowercase())
}

/// Validated, immutable configuration for one scan
#[derive(Debug, Clone)]
pub struct ScanConfiguration {
    allowed_extensions: BTreeSet<String>,
    batch_entity: BatchEntityMode,
    strategy: GroupingStrategy,
    primary_source_extension: Option<String>,
    search_directories: Vec<PathBuf>,
    recursive_search: bool,
    archive_subdirectories: bool,
    archive_loose_secondaries: bool,
    workers: usize,
}

impl ScanConfiguration {
    /// Validate settings and compile their patterns
    pub fn from_settings(settings: &ScanSettings) -> Result<Self> {
        // a bad pattern fails even when bundling is off
        let compiled = GroupingStrategy::compile(&settings.grouping)?;
        let strategy = if settings.bundling_enabled {
            compiled
        } else {
            GroupingStrategy::None
        };

        let mut allowed_extensions = BTreeSet::new();
        for ext in &settings.allowed_extensions {
            let normalized = normalize_extension(ext);
            if normalized == "." {
                return Err(Error::Config(format!("empty extension in allow-list: '{}'", ext)));
            }
            allowed_extensions.insert(normalized);
        }

        let primary_source_extension = match &settings.primary_source_extension {
            Some(ext) if !ext.trim().trim_start_matches('.').is_empty() => {
                Some(normalize_extension(ext))
            }
            Some(ext) => {
                return Err(Error::Config(format!(
                    "primary source extension '{}' is empty",
                    ext
                )))
            }
            None => None,
        };

        Ok(Self {
            allowed_extensions,
            batch_entity: settings.batch_entity,
            strategy,
            primary_source_extension,
            search_directories: settings.search_directories.clone(),
            recursive_search: settings.recursive_search,
            archive_subdirectories: settings.archive_subdirectories,
            archive_loose_secondaries: settings.archive_loose_secondaries,
            workers: settings.workers,
        })
    }

    /// Whether a file with this (normalized) extension takes part in the scan
    pub fn allows_extension(&self, ext: &str) -> bool {
        self.allowed_extensions.is_empty() || self.allowed_extensions.contains(ext)
    }

    pub fn allowed_extensions(&self) -> &BTreeSet<String> {
        &self.allowed_extensions
    }

    pub fn batch_entity(&self) -> BatchEntityMode {
        self.batch_entity
    }

    pub fn strategy(&self) -> &GroupingStrategy {
        &self.strategy
    }

    /// True when files may move between bundles through dependency claims
    pub fn bundling_active(&self) -> bool {
        !matches!(self.strategy, GroupingStrategy::None)
    }

    pub fn primary_source_extension(&self) -> Option<&str> {
        self.primary_source_extension.as_deref()
    }

    pub fn is_primary_source(&self, ext: &str) -> bool {
        self.primary_source_extension.as_deref() == Some(ext)
    }

    /// Additional search directories, resolved against the input root
    pub fn search_directories(&self, input_root: &Path) -> Vec<PathBuf> {
        self.search_directories
            .iter()
            .map(|dir| {
                if dir.is_absolute() {
                    dir.clone()
                } else {
                    input_root.join(dir)
                }
            })
            .collect()
    }

    pub fn recursive_search(&self) -> bool {
        self.recursive_search
    }

    pub fn archive_subdirectories(&self) -> bool {
        self.archive_subdirectories
    }

    pub fn archive_loose_secondaries(&self) -> bool {
        self.archive_loose_secondaries
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_build() {
        let config = ScanConfiguration::from_settings(&ScanSettings::default()).unwrap();
        assert_eq!(config.strategy().name(), "stem");
        assert!(config.allows_extension(".anything"));
        assert!(config.bundling_active());
    }

    #[test]
    fn test_extensions_normalized() {
        let settings = ScanSettings {
            allowed_extensions: vec!["OBJ".into(), ".Mtl".into()],
            primary_source_extension: Some("obj".into()),
            ..Default::default()
        };
        let config = ScanConfiguration::from_settings(&settings).unwrap();
        assert!(config.allows_extension(".obj"));
        assert!(config.allows_extension(".mtl"));
        assert!(!config.allows_extension(".jpg"));
        assert!(config.is_primary_source(".obj"));
    }

    #[test]
    fn test_invalid_pattern_fails_fast() {
        let settings = ScanSettings {
            grouping: GroupingSettings::Pattern {
                regex: "model_(\\d+".into(),
            },
            ..Default::default()
        };
        let err = ScanConfiguration::from_settings(&settings).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { field: "grouping", .. }));
    }

    #[test]
    fn test_literal_prefix_is_escaped() {
        let settings = ScanSettings {
            grouping: GroupingSettings::PrefixSuffix {
                prefix: "n(1)_".into(),
                suffix: String::new(),
                treat_as_regex: false,
            },
            ..Default::default()
        };
        let config = ScanConfiguration::from_settings(&settings).unwrap();
        match config.strategy() {
            GroupingStrategy::PrefixSuffix { prefix, .. } => {
                assert!(prefix.is_match("n(1)_vase"));
                assert!(!prefix.is_match("n1_vase"));
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_bundling_disabled_forces_none() {
        let settings = ScanSettings {
            bundling_enabled: false,
            grouping: GroupingSettings::Pattern {
                regex: r"^(\w+)_".into(),
            },
            ..Default::default()
        };
        let config = ScanConfiguration::from_settings(&settings).unwrap();
        assert!(!config.bundling_active());
    }

    #[test]
    fn test_bad_pattern_rejected_with_bundling_disabled() {
        let settings = ScanSettings {
            bundling_enabled: false,
            grouping: GroupingSettings::Pattern {
                regex: "(".into(),
            },
            ..Default::default()
        };
        let err = ScanConfiguration::from_settings(&settings).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_settings_json_shape() {
        let json = r#"{
            "allowed_extensions": [".obj"],
            "batch_entity": "hybrid",
            "grouping": { "strategy": "prefixsuffix", "prefix": "n\\d+_", "suffix": "_(hiRes|lowRes)", "treat_as_regex": true }
        }"#;
        let settings: ScanSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.batch_entity, BatchEntityMode::Hybrid);
        assert!(settings.bundling_enabled);
        assert!(settings.recursive_search);
        assert!(matches!(
            settings.grouping,
            GroupingSettings::PrefixSuffix { treat_as_regex: true, .. }
        ));
    }
}
