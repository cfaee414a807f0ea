//! Adjudication of references that resolve to more than one file
//!
//! Candidates are compared cheaply first (size, then an XxHash64 of the first
//! few KiB) and only fall through to a full BLAKE3 hash when those agree.
//! Hashes are cached per path for the lifetime of one scan.

use crate::report::Conflict;
use dashmap::DashMap;
use std::fs::{self, File};
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use twox_hash::XxHash64;

const PARTIAL_HASH_LENGTH: usize = 4096;

/// Scan-scoped content hash cache, shared by all bundle workers
#[derive(Debug, Default)]
pub struct HashCache {
    partial: DashMap<PathBuf, u64>,
    full: DashMap<PathBuf, blake3::Hash>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// XxHash64 of the first `PARTIAL_HASH_LENGTH` bytes
    pub fn partial_hash(&self, path: &Path) -> io::Result<u64> {
        if let Some(hash) = self.partial.get(path) {
            return Ok(*hash);
        }
        let data = read_portion(path)?;
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(&data);
        let hash = hasher.finish();
        self.partial.insert(path.to_path_buf(), hash);
        Ok(hash)
    }

    /// BLAKE3 of the whole file
    pub fn full_hash(&self, path: &Path) -> io::Result<blake3::Hash> {
        if let Some(hash) = self.full.get(path) {
            trace!("Found hash for {} in cache", path.display());
            return Ok(*hash);
        }
        let mut hasher = blake3::Hasher::new();
        let mut file = File::open(path)?;
        io::copy(&mut file, &mut hasher)?;
        let hash = hasher.finalize();
        self.full.insert(path.to_path_buf(), hash);
        Ok(hash)
    }

    /// Number of files fully hashed so far
    pub fn len(&self) -> usize {
        self.full.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full.is_empty()
    }
}

fn read_portion(path: &Path) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buffer = Vec::with_capacity(PARTIAL_HASH_LENGTH);
    file.take(PARTIAL_HASH_LENGTH as u64).read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Outcome of comparing several candidates for one reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Adjudication {
    /// All candidates hold the same bytes; use this one
    Identical(PathBuf),
    /// Candidates differ; the user has to disambiguate
    Divergent(Conflict),
}

/// Decide whether `candidates` (in search-order preference) are interchangeable
pub fn adjudicate(
    referenced_by: &Path,
    name: &str,
    candidates: &[PathBuf],
    cache: &HashCache,
) -> Adjudication {
    let divergent = |explanation: String| {
        Adjudication::Divergent(Conflict {
            referenced_by: referenced_by.to_path_buf(),
            name: name.to_string(),
            candidates: candidates.to_vec(),
            explanation,
        })
    };

    let Some(first) = candidates.first() else {
        return divergent("no candidates to compare".to_string());
    };
    if candidates.len() == 1 {
        return Adjudication::Identical(first.clone());
    }

    match contents_identical(candidates, cache) {
        Ok(true) => {
            debug!(
                "'{}' matched {} identical files, using {}",
                name,
                candidates.len(),
                first.display()
            );
            Adjudication::Identical(first.clone())
        }
        Ok(false) => divergent(format!(
            "'{}' matches {} files with different content; remove or rename all but one",
            name,
            candidates.len()
        )),
        Err(e) => divergent(format!(
            "'{}' matches {} files that could not all be compared: {}",
            name,
            candidates.len(),
            e
        )),
    }
}

fn contents_identical(candidates: &[PathBuf], cache: &HashCache) -> io::Result<bool> {
    let sizes = candidates
        .iter()
        .map(|p| fs::metadata(p).map(|m| m.len()))
        .collect::<io::Result<Vec<_>>>()?;
    if sizes.windows(2).any(|w| w[0] != w[1]) {
        return Ok(false);
    }

    let partials = candidates
        .iter()
        .map(|p| cache.partial_hash(p))
        .collect::<io::Result<Vec<_>>>()?;
    if partials.windows(2).any(|w| w[0] != w[1]) {
        return Ok(false);
    }

    let fulls = candidates
        .iter()
        .map(|p| cache.full_hash(p))
        .collect::<io::Result<Vec<_>>>()?;
    Ok(fulls.windows(2).all(|w| w[0] == w[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_identical_collapse_to_first() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        fs::write(&a, vec![7u8; 10_000]).unwrap();
        fs::write(&b, vec![7u8; 10_000]).unwrap();

        let cache = HashCache::new();
        let result = adjudicate(Path::new("m.mtl"), "texture.png", &[a.clone(), b], &cache);
        assert_eq!(result, Adjudication::Identical(a));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_different_sizes_skip_hashing() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        fs::write(&a, "short").unwrap();
        fs::write(&b, "much longer").unwrap();

        let cache = HashCache::new();
        let result = adjudicate(Path::new("m.mtl"), "texture.png", &[a, b], &cache);
        assert!(matches!(result, Adjudication::Divergent(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_same_size_late_difference() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let mut data = vec![0u8; PARTIAL_HASH_LENGTH * 2];
        fs::write(&a, &data).unwrap();
        data[PARTIAL_HASH_LENGTH + 5] = 1;
        fs::write(&b, &data).unwrap();

        let cache = HashCache::new();
        match adjudicate(Path::new("s.gltf"), "s.bin", &[a.clone(), b.clone()], &cache) {
            Adjudication::Divergent(conflict) => {
                assert_eq!(conflict.candidates, vec![a, b]);
                assert_eq!(conflict.name, "s.bin");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_candidate_is_divergent() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.png");
        fs::write(&a, "x").unwrap();
        let gone = dir.path().join("gone.png");

        let result = adjudicate(Path::new("m.mtl"), "texture.png", &[a, gone], &HashCache::new());
        assert!(matches!(result, Adjudication::Divergent(_)));
    }

    #[test]
    fn test_cached_hash_reused() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.png");
        fs::write(&a, "first").unwrap();
        let cache = HashCache::new();
        let first = cache.full_hash(&a).unwrap();
        fs::write(&a, "second").unwrap();
        assert_eq!(cache.full_hash(&a).unwrap(), first);
    }
}
