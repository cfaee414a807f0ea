//! Scan orchestration
//!
//! A scan runs in four phases:
//! 1. Enumerate candidate files and partition them into draft bundles
//! 2. Resolve the dependency graph of every draft on a rayon pool
//! 3. Fold dependency claims, assign roles and validate (sequential)
//! 4. Archive secondary dependencies and build the record tree
//!
//! Nothing is shared between scans.

use crate::archive::{archive_bundle, ArchiveNames, ArchiveOptions};
use crate::bundle::{canonical_path, extension_of, Bundle, BundleMember, CandidateFile, FileRole};
use crate::config::ScanConfiguration;
use crate::conflict::HashCache;
use crate::discovery::enumerate_files;
use crate::error::{Error, Result};
use crate::grouping::{group_files, DraftBundle};
use crate::progress::{CancellationToken, ProgressReporter, SilentReporter};
use crate::records::RecordRow;
use crate::report::{ReportError, ReportErrorKind, ValidationReport};
use crate::resolver::{DependencyGraph, Resolver, SearchIndex};
use crate::tree::RecordTree;
use crate::validate::validate_members;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything a scan produced
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub tree: RecordTree,
    /// Problems not attributable to any bundle (unreadable entries, bad candidates)
    pub scan_errors: Vec<ReportError>,
    /// Candidates outside every scanning unit that no bundle claimed
    pub excluded: Vec<CandidateFile>,
    /// True when the scan was cancelled before every bundle was resolved
    pub partial: bool,
    pub scanned_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ScanOutcome {
    pub fn records(&self) -> Vec<RecordRow> {
        self.tree.records()
    }
}

/// The graph and findings of one resolved source
struct SourceResolution {
    graph: DependencyGraph,
    report: ValidationReport,
}

/// A draft after its sources were resolved
struct ResolvedDraft {
    key: String,
    files: Vec<CandidateFile>,
    has_primary_source: bool,
    sources: Vec<SourceResolution>,
}

/// A bundle being assembled from a resolved draft and its claims
struct Assembly {
    key: String,
    members: Vec<BundleMember>,
    /// Members before any claim was folded
    initial: Vec<BundleMember>,
    /// Files the draft started with
    origin: HashSet<PathBuf>,
    has_primary_source: bool,
    sources: Vec<SourceResolution>,
}

impl From<ResolvedDraft> for Assembly {
    fn from(draft: ResolvedDraft) -> Self {
        let initial: Vec<BundleMember> = draft
            .files
            .iter()
            .map(|f| BundleMember::from_candidate(f, FileRole::Source))
            .collect();
        Self {
            key: draft.key,
            origin: draft.files.iter().map(|f| f.path.clone()).collect(),
            members: initial.clone(),
            initial,
            has_primary_source: draft.has_primary_source,
            sources: draft.sources,
        }
    }
}

impl Assembly {
    fn holds(&self, path: &Path) -> bool {
        self.members.iter().any(|m| m.path == path)
    }

    /// Resolutions whose source is still a member
    fn active_sources(&self) -> impl Iterator<Item = &SourceResolution> {
        self.sources.iter().filter(|s| self.holds(&s.graph.source))
    }

    fn has_source(&self) -> bool {
        self.active_sources().next().is_some()
    }

    fn reset(&mut self) {
        self.members = self.initial.clone();
    }
}

pub struct Scanner {
    config: ScanConfiguration,
    output_root: Option<PathBuf>,
    cancellation: CancellationToken,
    reporter: Arc<dyn ProgressReporter>,
}

impl Scanner {
    pub fn new(config: ScanConfiguration) -> Self {
        Self {
            config,
            output_root: None,
            cancellation: CancellationToken::new(),
            reporter: Arc::new(SilentReporter),
        }
    }

    /// Directory archives are written to
    pub fn with_output_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_root = Some(path.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &ScanConfiguration {
        &self.config
    }

    /// Enumerate `input_root` and scan everything found
    pub fn scan<P: AsRef<Path>>(&self, input_root: P) -> Result<ScanOutcome> {
        let started = Instant::now();
        let scanned_at = Utc::now();
        let root = open_root(input_root.as_ref())?;
        self.reporter.on_scan_start(&root.to_string_lossy());

        info!("Enumerating {}", root.display());
        let exclude = self
            .output_root
            .as_deref()
            .map(canonical_path)
            .filter(|output| output.starts_with(&root));
        let enumeration = enumerate_files(&root, &self.config, exclude.as_deref())?;
        self.reporter.on_files_enumerated(enumeration.files.len());

        self.process(
            &root,
            enumeration.files,
            enumeration.skipped,
            Vec::new(),
            started,
            scanned_at,
        )
    }

    /// Scan a caller-supplied list of files under `input_root`
    ///
    /// Paths that cannot be read are recorded as scan errors; paths outside
    /// the root or with a disallowed extension are reported as excluded.
    pub fn scan_candidates<P: AsRef<Path>>(
        &self,
        input_root: P,
        candidates: &[PathBuf],
    ) -> Result<ScanOutcome> {
        let started = Instant::now();
        let scanned_at = Utc::now();
        let root = open_root(input_root.as_ref())?;
        self.reporter.on_scan_start(&root.to_string_lossy());

        let mut files = Vec::new();
        let mut outside = Vec::new();
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for path in candidates {
            let absolute = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            let metadata = match fs::metadata(&absolute) {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping candidate {}: {}", absolute.display(), e);
                    errors.push(ReportError {
                        kind: ReportErrorKind::UnreadableFile,
                        path: absolute,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let canonical = canonical_path(&absolute);
            if !seen.insert(canonical.clone()) {
                continue;
            }
            let file = CandidateFile::new(&root, canonical, metadata.len());
            if !file.path.starts_with(&root) || !self.config.allows_extension(&file.extension) {
                outside.push(file);
            } else {
                files.push(file);
            }
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        self.reporter.on_files_enumerated(files.len());

        self.process(&root, files, errors, outside, started, scanned_at)
    }

    fn process(
        &self,
        root: &Path,
        files: Vec<CandidateFile>,
        scan_errors: Vec<ReportError>,
        mut excluded: Vec<CandidateFile>,
        started: Instant,
        scanned_at: DateTime<Utc>,
    ) -> Result<ScanOutcome> {
        let files: Vec<CandidateFile> = files
            .into_iter()
            .map(|mut f| {
                f.path = canonical_path(&f.path);
                f
            })
            .collect();

        let grouping = group_files(&files, &self.config);
        excluded.extend(grouping.excluded);
        info!(
            "Resolving {} bundle(s) from {} file(s)",
            grouping.drafts.len(),
            files.len()
        );

        let resolved = self.resolve_drafts(root, &grouping.drafts)?;
        let partial = resolved.iter().any(Option::is_none);

        // files of drafts that were never resolved stay where they are
        let reserved: HashSet<PathBuf> = grouping
            .drafts
            .iter()
            .zip(&resolved)
            .filter(|(_, r)| r.is_none())
            .flat_map(|(d, _)| d.files.iter().map(|f| f.path.clone()))
            .collect();
        if partial {
            warn!("Scan cancelled, {} file(s) left unresolved", reserved.len());
        }

        let resolved: Vec<ResolvedDraft> = resolved.into_iter().flatten().collect();
        let (bundles, claimed) = self.assemble(root, resolved, &excluded, &reserved);
        excluded.retain(|f| !claimed.contains(&f.path));

        let mut finished = Vec::with_capacity(bundles.len());
        let mut archive_names = ArchiveNames::new();
        for (mut bundle, mut report) in bundles {
            validate_members(&bundle, &mut report);
            self.archive(&mut bundle, &mut report, &mut archive_names);
            finished.push((bundle, report));
        }

        let tree = RecordTree::build(finished);
        let duration = started.elapsed();
        self.reporter.on_scan_complete(tree.len(), duration.as_secs_f64());
        info!(
            "Scan finished in {:.2}s: {} bundle(s), {} file(s), {} excluded",
            duration.as_secs_f64(),
            tree.len(),
            tree.files.len(),
            excluded.len()
        );

        Ok(ScanOutcome {
            tree,
            scan_errors,
            excluded,
            partial,
            scanned_at,
            duration,
        })
    }

    /// Resolve every draft on the worker pool; `None` marks a cancelled draft
    fn resolve_drafts(
        &self,
        root: &Path,
        drafts: &[DraftBundle],
    ) -> Result<Vec<Option<ResolvedDraft>>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers())
            .build()?;

        let index = SearchIndex::new();
        let hashes = HashCache::new();
        let resolver = Resolver::new(
            self.config.search_directories(root),
            self.config.recursive_search(),
            &index,
            &hashes,
        );
        let done = AtomicUsize::new(0);
        let total = drafts.len();

        let resolved: Vec<Option<ResolvedDraft>> = pool.install(|| {
            drafts
                .par_iter()
                .map(|draft| {
                    if self.cancellation.is_cancelled() {
                        return None;
                    }
                    let resolved = self.resolve_draft(&resolver, draft);
                    let count = done.fetch_add(1, Ordering::SeqCst) + 1;
                    self.reporter.on_bundle_resolved(&draft.key, count, total);
                    Some(resolved)
                })
                .collect()
        });

        debug!("Hashed {} file(s) while adjudicating conflicts", hashes.len());
        Ok(resolved)
    }

    fn resolve_draft(&self, resolver: &Resolver<'_>, draft: &DraftBundle) -> ResolvedDraft {
        let primary: Vec<&CandidateFile> = draft
            .files
            .iter()
            .filter(|f| self.config.is_primary_source(&f.extension))
            .collect();
        let has_primary_source = !primary.is_empty();
        let sources = if has_primary_source {
            primary
        } else {
            draft.files.iter().collect()
        };

        let sources = sources
            .into_iter()
            .map(|source| {
                let mut report = ValidationReport::new();
                let graph = resolver.resolve(&source.path, &mut report);
                SourceResolution { graph, report }
            })
            .collect();

        debug!("Resolved draft '{}'", draft.key);
        ResolvedDraft {
            key: draft.key.clone(),
            files: draft.files.clone(),
            has_primary_source,
            sources,
        }
    }

    /// Fold claims, assign roles and merge source reports
    ///
    /// Returns the non-empty bundles in key order and every path that was
    /// claimed as a dependency.
    fn assemble(
        &self,
        root: &Path,
        resolved: Vec<ResolvedDraft>,
        excluded: &[CandidateFile],
        reserved: &HashSet<PathBuf>,
    ) -> (Vec<(Bundle, ValidationReport)>, HashSet<PathBuf>) {
        let mut assemblies: Vec<Assembly> = resolved.into_iter().map(Assembly::from).collect();
        let mut claimed = HashSet::new();

        if self.config.bundling_active() {
            let protected: HashSet<PathBuf> = assemblies
                .iter()
                .flat_map(|a| a.initial.iter())
                .filter(|m| self.config.is_primary_source(&m.extension))
                .map(|m| m.path.clone())
                .collect();
            let outside: HashMap<&Path, &CandidateFile> =
                excluded.iter().map(|f| (f.path.as_path(), f)).collect();

            let mut order: Vec<usize> = (0..assemblies.len()).collect();
            order.sort_by(|&a, &b| {
                assemblies[b]
                    .has_primary_source
                    .cmp(&assemblies[a].has_primary_source)
                    .then_with(|| assemblies[a].key.cmp(&assemblies[b].key))
            });

            // A bundle whose own sources were all claimed away holds no claims
            // of its own; fold again without it until every holder has a source.
            let fold = ClaimFold {
                root,
                protected: &protected,
                reserved,
                outside: &outside,
            };
            let mut retired: HashSet<usize> = HashSet::new();
            loop {
                assemblies.iter_mut().for_each(Assembly::reset);
                claimed = fold.run(&mut assemblies, &order, &retired);

                let sourceless = stranded(&assemblies, &order);
                if sourceless.is_empty() {
                    break;
                }
                for idx in sourceless {
                    debug!(
                        "Bundle '{}' lost every source, withdrawing its claims",
                        assemblies[idx].key
                    );
                    retired.insert(idx);
                }
            }
        }

        let bundles = assemblies
            .into_iter()
            .filter_map(|mut assembly| {
                if assembly.members.is_empty() {
                    debug!("Dropping bundle '{}', all files were claimed", assembly.key);
                    return None;
                }
                self.assign_roles(&mut assembly);
                debug_assert!(
                    assembly.members.iter().any(|m| m.role == FileRole::Source),
                    "bundle '{}' has no source",
                    assembly.key
                );

                let mut report = ValidationReport::new();
                for source in assembly.active_sources() {
                    report.merge(source.report.clone());
                }

                let bundle = Bundle {
                    key: assembly.key,
                    members: assembly.members,
                };
                Some((bundle, report))
            })
            .collect();

        (bundles, claimed)
    }

    fn assign_roles(&self, assembly: &mut Assembly) {
        let mut resolved_roles: HashMap<PathBuf, FileRole> = HashMap::new();
        for source in assembly.active_sources() {
            for dependency in &source.graph.dependencies {
                resolved_roles
                    .entry(dependency.path.clone())
                    .and_modify(|role| *role = (*role).min(dependency.role))
                    .or_insert(dependency.role);
            }
        }

        let has_primary_source = assembly
            .members
            .iter()
            .any(|m| self.config.is_primary_source(&m.extension));

        for member in &mut assembly.members {
            member.role = if self.config.is_primary_source(&member.extension) {
                FileRole::Source
            } else if let Some(role) = resolved_roles.get(&member.path) {
                *role
            } else if !has_primary_source && assembly.origin.contains(&member.path) {
                FileRole::Source
            } else {
                FileRole::guess_for_extension(&member.extension)
            };
        }

        if !assembly.members.iter().any(|m| m.role == FileRole::Source) {
            // every remaining draft file is reached by another one
            if let Some(member) = assembly
                .members
                .iter_mut()
                .find(|m| assembly.origin.contains(&m.path))
            {
                warn!(
                    "Bundle '{}' has no unreached file, promoting {} to source",
                    assembly.key,
                    member.relative_path.display()
                );
                member.role = FileRole::Source;
            }
        }
    }

    fn archive(
        &self,
        bundle: &mut Bundle,
        report: &mut ValidationReport,
        names: &mut ArchiveNames,
    ) {
        if !self.config.archive_subdirectories() {
            return;
        }
        let Some(output_root) = self.output_root.as_deref() else {
            return;
        };

        let options = ArchiveOptions {
            include_loose: self.config.archive_loose_secondaries(),
        };
        if let Err(e) = archive_bundle(bundle, output_root, names, options) {
            warn!("Cannot archive bundle '{}': {}", bundle.key, e);
            report.push_error(ReportErrorKind::ArchiveWriteError, e.path(), e.to_string());
        }
    }
}

/// One pass of dependency claims over the drafts, in claim order
struct ClaimFold<'a> {
    root: &'a Path,
    /// Primary-extension sources, never claimed
    protected: &'a HashSet<PathBuf>,
    /// Files of drafts that were never resolved
    reserved: &'a HashSet<PathBuf>,
    outside: &'a HashMap<&'a Path, &'a CandidateFile>,
}

impl ClaimFold<'_> {
    /// Returns every path claimed; first claim wins
    fn run(
        &self,
        assemblies: &mut [Assembly],
        order: &[usize],
        retired: &HashSet<usize>,
    ) -> HashSet<PathBuf> {
        let mut owner: HashMap<PathBuf, usize> = HashMap::new();
        for (idx, assembly) in assemblies.iter().enumerate() {
            for member in &assembly.members {
                owner.insert(member.path.clone(), idx);
            }
        }

        let mut claimed = HashSet::new();
        for &idx in order {
            if retired.contains(&idx) {
                continue;
            }
            let wanted: Vec<PathBuf> = assemblies[idx]
                .sources
                .iter()
                .flat_map(|s| s.graph.dependencies.iter().map(|d| d.path.clone()))
                .collect();

            for path in wanted {
                if self.protected.contains(&path) || self.reserved.contains(&path) {
                    continue;
                }
                if !claimed.insert(path.clone()) {
                    continue;
                }

                match owner.get(&path).copied() {
                    Some(current) if current == idx => {}
                    Some(current) => {
                        let position = assemblies[current]
                            .members
                            .iter()
                            .position(|m| m.path == path);
                        if let Some(position) = position {
                            let member = assemblies[current].members.remove(position);
                            debug!(
                                "Bundle '{}' claims {} from '{}'",
                                assemblies[idx].key,
                                member.relative_path.display(),
                                assemblies[current].key
                            );
                            assemblies[idx].members.push(member);
                            owner.insert(path, idx);
                        }
                    }
                    None => {
                        let member = match self.outside.get(path.as_path()) {
                            Some(file) => BundleMember::from_candidate(file, FileRole::Source),
                            None => external_member(self.root, &path),
                        };
                        debug!(
                            "Bundle '{}' takes in {}",
                            assemblies[idx].key,
                            member.relative_path.display()
                        );
                        assemblies[idx].members.push(member);
                        owner.insert(path, idx);
                    }
                }
            }
        }
        claimed
    }
}

/// Non-empty assemblies left without a source after a fold
///
/// Those whose draft files all went to bundles that kept a source come first;
/// when every one of them lost its files to another stranded assembly, the
/// last to claim in `order` is given up.
fn stranded(assemblies: &[Assembly], order: &[usize]) -> Vec<usize> {
    let holder: HashMap<&Path, usize> = assemblies
        .iter()
        .enumerate()
        .flat_map(|(idx, a)| a.members.iter().map(move |m| (m.path.as_path(), idx)))
        .collect();

    let sourceless: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&idx| !assemblies[idx].members.is_empty() && !assemblies[idx].has_source())
        .collect();

    let lost: Vec<usize> = sourceless
        .iter()
        .copied()
        .filter(|&idx| {
            assemblies[idx].origin.iter().all(|path| {
                holder
                    .get(path.as_path())
                    .map_or(true, |&h| assemblies[h].has_source())
            })
        })
        .collect();

    if lost.is_empty() {
        sourceless.last().copied().into_iter().collect()
    } else {
        lost
    }
}

fn open_root(input_root: &Path) -> Result<PathBuf> {
    let root = fs::canonicalize(input_root).map_err(|e| Error::RootUnreadable {
        path: input_root.to_path_buf(),
        source: e,
    })?;
    if !root.is_dir() {
        return Err(Error::RootUnreadable {
            path: input_root.to_path_buf(),
            source: std::io::Error::other("not a directory"),
        });
    }
    Ok(root)
}

/// A dependency found outside the scanned set
fn external_member(root: &Path, path: &Path) -> BundleMember {
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let relative_path = path
        .strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf());
    BundleMember {
        path: path.to_path_buf(),
        relative_path,
        extension: extension_of(path),
        size,
        role: FileRole::SecondaryDependency,
        archive: None,
    }
}
