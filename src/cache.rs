use std::sync::Arc;

use dashmap::DashMap;

use crate::types::ObjectInfo;

/// Build the cache key for a directory at a ref: `repository/ref[/dir]`.
///
/// `dir` must already be normalized (no leading or trailing slash).
pub fn dir_key(repository: &str, reference: &str, dir: &str) -> String {
    if dir.is_empty() {
        format!("{}/{}", repository, reference)
    } else {
        format!("{}/{}/{}", repository, reference, dir)
    }
}

/// Directory listings last observed per `repository/ref/dir` key.
///
/// Entries are replaced whole, so readers never see a half-updated listing.
/// There is no expiry; entries go away only through explicit invalidation.
#[derive(Debug, Default)]
pub struct DirCache {
    entries: DashMap<String, Arc<Vec<ObjectInfo>>>,
}

impl DirCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<Vec<ObjectInfo>>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn populate(&self, key: impl Into<String>, entries: Vec<ObjectInfo>) -> Arc<Vec<ObjectInfo>> {
        let entries = Arc::new(entries);
        self.entries.insert(key.into(), Arc::clone(&entries));
        entries
    }

    /// Drop one key. Returns whether it was cached.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop the listing of `dir` and of every ancestor directory up to the
    /// ref root, all under the same `repository/ref` prefix.
    ///
    /// Ancestors list `dir` itself as an entry, which may appear or vanish
    /// with a write or delete.
    pub fn invalidate_with_ancestors(&self, repository: &str, reference: &str, dir: &str) {
        let mut current = dir;
        loop {
            self.invalidate(&dir_key(repository, reference, current));
            match current.rfind('/') {
                Some(idx) => current = &current[..idx],
                None if !current.is_empty() => current = "",
                None => break,
            }
        }
    }

    /// Drop every listing of `branch` in `repository`, including listings
    /// through relative or committed-only forms of it (`branch@`, `branch~1`).
    pub fn invalidate_ref(&self, repository: &str, branch: &str) {
        let root = dir_key(repository, branch, "");
        self.entries.retain(|key, _| {
            let Some(rest) = key.strip_prefix(&root) else {
                return true;
            };
            !(rest.is_empty() || rest.starts_with(['/', '@', '~', '^']))
        });
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
