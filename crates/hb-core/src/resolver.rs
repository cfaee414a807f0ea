//! Breadth-first resolution of structural references
//!
//! Starting at a bundle source, every file with a registered parser is parsed
//! and each referenced name is searched for in the referencing file's
//! directory and then in the configured search directories. Resolved files
//! are parsed in turn, which is how an OBJ reaches its MTL and the MTL its
//! textures.

use crate::bundle::{canonical_path as canonical, extension_of, FileRole};
use crate::conflict::{adjudicate, Adjudication, HashCache};
use crate::discovery::list_files_recursive;
use crate::references::{parse_references, ReferenceFormat};
use crate::report::{ReportErrorKind, ValidationReport};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// References are not followed deeper than this many levels below a source
const MAX_DEPTH: usize = 8;

/// One reference from a file, and where (if anywhere) it led
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: PathBuf,
    pub reference: String,
    pub resolved: Option<PathBuf>,
    pub conflict: bool,
}

/// A file reached from a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDependency {
    pub path: PathBuf,
    pub role: FileRole,
    /// Levels below the source (1 = referenced by the source itself)
    pub depth: usize,
}

/// Everything reachable from one source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub source: PathBuf,
    pub edges: Vec<DependencyEdge>,
    /// Reached files in breadth-first order
    pub dependencies: Vec<ResolvedDependency>,
}

impl DependencyGraph {
    pub fn find(&self, path: &Path) -> Option<&ResolvedDependency> {
        self.dependencies.iter().find(|d| d.path == path)
    }
}

/// Cached recursive directory listings, shared across bundle workers
#[derive(Debug, Default)]
pub struct SearchIndex {
    listings: DashMap<PathBuf, Arc<Vec<PathBuf>>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every file beneath `dir`, listed once per scan
    pub fn files_under(&self, dir: &Path) -> Arc<Vec<PathBuf>> {
        if let Some(listing) = self.listings.get(dir) {
            return Arc::clone(&listing);
        }
        let listing = Arc::new(list_files_recursive(dir));
        self.listings.insert(dir.to_path_buf(), Arc::clone(&listing));
        listing
    }
}

/// Turn a referenced name into a relative path usable for suffix matching
fn reference_path(name: &str) -> PathBuf {
    Path::new(&name.replace('\\', "/"))
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Resolves references for the sources of one scan
pub struct Resolver<'a> {
    search_directories: Vec<PathBuf>,
    recursive: bool,
    index: &'a SearchIndex,
    hashes: &'a HashCache,
}

impl<'a> Resolver<'a> {
    pub fn new(
        search_directories: Vec<PathBuf>,
        recursive: bool,
        index: &'a SearchIndex,
        hashes: &'a HashCache,
    ) -> Self {
        Self {
            search_directories: search_directories.iter().map(|d| canonical(d)).collect(),
            recursive,
            index,
            hashes,
        }
    }

    /// All distinct files `name` could refer to, in search-order preference
    pub fn find_candidates(&self, referencing_dir: &Path, name: &str) -> Vec<PathBuf> {
        let reference = reference_path(name);
        if reference.as_os_str().is_empty() {
            return Vec::new();
        }

        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut push = |path: &Path| {
            let path = canonical(path);
            if seen.insert(path.clone()) {
                found.push(path);
            }
        };

        let roots = std::iter::once(referencing_dir)
            .chain(self.search_directories.iter().map(PathBuf::as_path));
        for root in roots {
            let direct = root.join(&reference);
            if direct.is_file() {
                push(&direct);
            }
            if self.recursive && root.is_dir() {
                for path in self.index.files_under(root).iter() {
                    if path.ends_with(&reference) {
                        push(path);
                    }
                }
            }
        }

        found
    }

    /// Resolve the dependency graph of `source`, recording problems in `report`
    pub fn resolve(&self, source: &Path, report: &mut ValidationReport) -> DependencyGraph {
        let source = canonical(source);
        let mut graph = DependencyGraph {
            source: source.clone(),
            ..Default::default()
        };

        let mut parents: HashMap<PathBuf, Option<PathBuf>> = HashMap::new();
        parents.insert(source.clone(), None);
        let mut queue = VecDeque::from([(source.clone(), 0usize)]);

        while let Some((file, depth)) = queue.pop_front() {
            let Some(format) = ReferenceFormat::from_extension(&extension_of(&file)) else {
                continue;
            };

            let content = match fs::read(&file) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Cannot read {}: {}", file.display(), e);
                    report.push_error(ReportErrorKind::UnreadableFile, &file, e.to_string());
                    continue;
                }
            };
            let references = match parse_references(format, &content) {
                Ok(references) => references,
                Err(e) => {
                    warn!("Cannot parse {}: {}", file.display(), e);
                    report.push_error(ReportErrorKind::UnreadableFile, &file, e.to_string());
                    continue;
                }
            };

            let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();

            for reference in references {
                let role = if depth == 0 {
                    reference.role
                } else {
                    FileRole::SecondaryDependency
                };

                let candidates = self.find_candidates(&dir, &reference.name);
                let resolved = match candidates.len() {
                    0 => {
                        debug!("{} references missing '{}'", file.display(), reference.name);
                        report.push_missing(&file, &reference.name, role);
                        graph.edges.push(DependencyEdge {
                            from: file.clone(),
                            reference: reference.name,
                            resolved: None,
                            conflict: false,
                        });
                        continue;
                    }
                    1 => candidates[0].clone(),
                    n => match adjudicate(&file, &reference.name, &candidates, self.hashes) {
                        Adjudication::Identical(path) => {
                            report.set_detail(
                                format!("collapsed:{}", reference.name),
                                format!("{} identical candidates, using {}", n, path.display()),
                            );
                            path
                        }
                        Adjudication::Divergent(conflict) => {
                            warn!(
                                "Conflicting candidates for '{}' referenced by {}",
                                reference.name,
                                file.display()
                            );
                            report.push_conflict(conflict);
                            graph.edges.push(DependencyEdge {
                                from: file.clone(),
                                reference: reference.name,
                                resolved: None,
                                conflict: true,
                            });
                            continue;
                        }
                    },
                };

                graph.edges.push(DependencyEdge {
                    from: file.clone(),
                    reference: reference.name.clone(),
                    resolved: Some(resolved.clone()),
                    conflict: false,
                });

                if is_ancestor(&parents, &file, &resolved) {
                    report.push_error(
                        ReportErrorKind::DependencyCycle,
                        &file,
                        format!("'{}' leads back to {}", reference.name, resolved.display()),
                    );
                    continue;
                }

                if parents.contains_key(&resolved) {
                    let existing = graph.dependencies.iter_mut().find(|d| d.path == resolved);
                    if let Some(existing) = existing {
                        existing.role = existing.role.min(role);
                    }
                    continue;
                }

                parents.insert(resolved.clone(), Some(file.clone()));
                graph.dependencies.push(ResolvedDependency {
                    path: resolved.clone(),
                    role,
                    depth: depth + 1,
                });

                if depth + 1 < MAX_DEPTH {
                    queue.push_back((resolved, depth + 1));
                } else if has_parser(&resolved) {
                    warn!("Not following references below {}", resolved.display());
                }
            }
        }

        graph
    }
}

/// Whether references inside `path` would be followed at all
fn has_parser(path: &Path) -> bool {
    ReferenceFormat::from_extension(&extension_of(path)).is_some()
}

/// Whether `candidate` is `file` or one of the files that led to it
fn is_ancestor(parents: &HashMap<PathBuf, Option<PathBuf>>, file: &Path, candidate: &Path) -> bool {
    let mut current = Some(file.to_path_buf());
    while let Some(path) = current {
        if path == candidate {
            return true;
        }
        current = parents.get(&path).cloned().flatten();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FileStatus;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn resolve(source: &Path, extra: Vec<PathBuf>) -> (DependencyGraph, ValidationReport) {
        let index = SearchIndex::new();
        let hashes = HashCache::new();
        let resolver = Resolver::new(extra, true, &index, &hashes);
        let mut report = ValidationReport::new();
        let graph = resolver.resolve(source, &mut report);
        (graph, report)
    }

    fn role_of(graph: &DependencyGraph, path: &Path) -> FileRole {
        graph.find(&canonical(path)).unwrap().role
    }

    #[test]
    fn test_obj_mtl_textures() {
        let dir = tempdir().unwrap();
        let obj = write(dir.path(), "statue.obj", "mtllib statue.mtl\n");
        let mtl = write(dir.path(), "statue.mtl", "map_Kd diffuse.jpg\nmap_Bump textures/normal.jpg\n");
        let diffuse = write(dir.path(), "diffuse.jpg", "d");
        let normal = write(dir.path(), "textures/normal.jpg", "n");

        let (graph, report) = resolve(&obj, vec![]);
        assert_eq!(graph.dependencies.len(), 3);
        assert_eq!(role_of(&graph, &mtl), FileRole::PrimaryDependency);
        assert_eq!(role_of(&graph, &diffuse), FileRole::SecondaryDependency);
        assert_eq!(role_of(&graph, &normal), FileRole::SecondaryDependency);
        assert!(report.is_clean());
        assert_eq!(graph.edges.len(), 3);
    }

    #[test]
    fn test_missing_mtl_recorded() {
        let dir = tempdir().unwrap();
        let obj = write(dir.path(), "statue.obj", "mtllib gone.mtl\n");

        let (graph, report) = resolve(&obj, vec![]);
        assert!(graph.dependencies.is_empty());
        assert_eq!(report.missing_names(), vec!["gone.mtl"]);
        assert_eq!(report.status(), FileStatus::MtlMissing);
        assert_eq!(graph.edges[0].resolved, None);
    }

    #[test]
    fn test_additional_search_directory() {
        let dir = tempdir().unwrap();
        let obj = write(&dir.path().join("models"), "statue.obj", "mtllib statue.mtl\n");
        let mtl = write(&dir.path().join("materials"), "statue.mtl", "");

        let (graph, report) = resolve(&obj, vec![dir.path().join("materials")]);
        assert!(report.is_clean());
        assert_eq!(graph.dependencies[0].path, canonical(&mtl));
    }

    #[test]
    fn test_identical_duplicates_collapse() {
        let dir = tempdir().unwrap();
        let extra = dir.path().join("shared");
        let mtl = write(dir.path(), "m.mtl", "map_Kd texture.png\n");
        let local = write(dir.path(), "texture.png", "same");
        write(&extra, "texture.png", "same");

        let (graph, report) = resolve(&mtl, vec![extra]);
        assert!(report.conflicts.is_empty());
        assert_eq!(graph.dependencies[0].path, canonical(&local));
        assert!(report.details.contains_key("collapsed:texture.png"));
    }

    #[test]
    fn test_divergent_duplicates_conflict() {
        let dir = tempdir().unwrap();
        let extra = tempdir().unwrap();
        let mtl = write(dir.path(), "m.mtl", "map_Kd texture.png\n");
        write(dir.path(), "texture.png", "one");
        write(extra.path(), "texture.png", "two!");

        let (graph, report) = resolve(&mtl, vec![extra.path().to_path_buf()]);
        assert_eq!(report.status(), FileStatus::FileConflict);
        assert_eq!(report.conflicts[0].candidates.len(), 2);
        assert!(graph.edges[0].conflict);
        assert!(graph.dependencies.is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let dir = tempdir().unwrap();
        // an MTL whose "texture" is the OBJ that loaded it
        let obj = write(dir.path(), "loop.obj", "mtllib loop.mtl\n");
        write(dir.path(), "loop.mtl", "map_Kd loop.obj\n");

        let (_, report) = resolve(&obj, vec![]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ReportErrorKind::DependencyCycle);
        assert_eq!(report.status(), FileStatus::Invalid);
    }

    #[test]
    fn test_malformed_gltf() {
        let dir = tempdir().unwrap();
        let gltf = write(dir.path(), "broken.gltf", "{ not json");

        let (_, report) = resolve(&gltf, vec![]);
        assert_eq!(report.errors[0].kind, ReportErrorKind::UnreadableFile);
        assert_eq!(report.status(), FileStatus::Invalid);
    }

    #[test]
    fn test_only_parsed_formats_are_followed() {
        assert!(has_parser(Path::new("/data/statue.mtl")));
        assert!(has_parser(Path::new("/data/scene.GLTF")));
        assert!(!has_parser(Path::new("/data/textures/skin.png")));
        assert!(!has_parser(Path::new("/data/mesh.bin")));
    }

    #[test]
    fn test_non_recursive_search() {
        let dir = tempdir().unwrap();
        let mtl = write(dir.path(), "m.mtl", "map_Kd deep.png\n");
        write(dir.path(), "nested/deep.png", "d");

        let index = SearchIndex::new();
        let hashes = HashCache::new();
        let resolver = Resolver::new(vec![], false, &index, &hashes);
        let mut report = ValidationReport::new();
        resolver.resolve(&mtl, &mut report);
        assert_eq!(report.missing_names(), vec!["deep.png"]);
    }
}
