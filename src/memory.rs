//! In-process implementation of [`VersioningClient`].
//!
//! `MemoryClient` models the backing store closely enough to exercise the
//! transaction, cache, and hook layers deterministically: every branch has a
//! committed head plus a staging area, reads through a plain branch name see
//! staged changes, and reads through `branch@` or a relative ref see only
//! committed state. Merges are three-way with path-level conflict detection.
//!
//! Every client call is recorded so tests can assert on call counts, and a
//! one-shot failure can be injected for any method.
//!
//! # Example
//!
//! ```
//! use lakefs_spec::memory::MemoryClient;
//! use lakefs_spec::VersioningClient;
//!
//! let client = MemoryClient::with_repository("repo", "main").unwrap();
//! client.upload_object("repo", "main", "a.txt", b"hello").unwrap();
//! assert_eq!(client.get_object("repo", "main", "a.txt", None).unwrap(), b"hello");
//! assert_eq!(client.call_count("upload_object"), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use sha2::{Digest, Sha256};

use crate::client::VersioningClient;
use crate::error::{Error, Result};
use crate::helpers::content_checksum;
use crate::paths::{RefExpr, RefModifier};
use crate::types::{
    Commit, DiffEntry, DiffKind, Metadata, ObjectStat, Page, PathType, Ref, DEFAULT_CONTENT_TYPE,
};

#[derive(Debug, Clone)]
struct Blob {
    data: Arc<Vec<u8>>,
    checksum: String,
    mtime: i64,
    content_type: String,
    metadata: Metadata,
}

impl Blob {
    fn new(content: &[u8]) -> Self {
        Self {
            checksum: content_checksum(content),
            data: Arc::new(content.to_vec()),
            mtime: chrono::Utc::now().timestamp(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            metadata: Metadata::new(),
        }
    }

    fn stat(&self, path: &str) -> ObjectStat {
        ObjectStat {
            path: path.to_string(),
            path_type: PathType::Object,
            checksum: self.checksum.clone(),
            size_bytes: self.data.len() as u64,
            mtime: self.mtime,
            content_type: Some(self.content_type.clone()),
            metadata: self.metadata.clone(),
        }
    }
}

fn same_blob(a: Option<&Blob>, b: Option<&Blob>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.checksum == b.checksum,
        _ => false,
    }
}

type Tree = BTreeMap<String, Blob>;

#[derive(Debug)]
struct StoredCommit {
    commit: Commit,
    tree: Arc<Tree>,
}

#[derive(Debug, Default)]
struct Branch {
    head: String,
    /// `None` marks a staged deletion.
    staging: BTreeMap<String, Option<Blob>>,
}

#[derive(Debug, Default)]
struct Repository {
    commits: HashMap<String, StoredCommit>,
    branches: BTreeMap<String, Branch>,
    tags: BTreeMap<String, String>,
}

/// A queued one-shot failure for a client method.
#[derive(Debug, Clone)]
struct FailOn {
    method: &'static str,
    status: u16,
    message: String,
}

#[derive(Debug)]
struct MemoryState {
    repositories: BTreeMap<String, Repository>,
    calls: Vec<&'static str>,
    failures: Vec<FailOn>,
    seq: u64,
    committer: String,
}

/// Deterministic in-memory versioned object store.
///
/// Thread-safe via internal `Arc<Mutex<...>>`; clones share state.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    inner: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    /// Create an empty store with no repositories.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryState {
                repositories: BTreeMap::new(),
                calls: Vec::new(),
                failures: Vec::new(),
                seq: 0,
                committer: "lakefs-spec".into(),
            })),
        }
    }

    /// Create a store holding one repository with `default_branch`.
    ///
    /// The creation call is not recorded.
    pub fn with_repository(name: &str, default_branch: &str) -> Result<Self> {
        let client = Self::new();
        client.create_repository(name, default_branch)?;
        client.reset_calls();
        Ok(client)
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.inner.lock().map_err(|e| Error::backend(e.to_string()))
    }

    /// Names of all recorded calls, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Number of recorded calls to `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .map(|s| s.calls.iter().filter(|c| **c == method).count())
            .unwrap_or(0)
    }

    /// Total number of recorded calls.
    pub fn total_calls(&self) -> usize {
        self.state().map(|s| s.calls.len()).unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        if let Ok(mut s) = self.state() {
            s.calls.clear();
        }
    }

    /// Make the next call to `method` fail with the given status.
    pub fn fail_on(&self, method: &'static str, status: u16, message: impl Into<String>) {
        if let Ok(mut s) = self.state() {
            s.failures.push(FailOn {
                method,
                status,
                message: message.into(),
            });
        }
    }
}

impl MemoryState {
    fn record(&mut self, method: &'static str) -> Result<()> {
        self.calls.push(method);
        if let Some(pos) = self.failures.iter().position(|f| f.method == method) {
            let failure = self.failures.remove(pos);
            return Err(Error::from_status(failure.status, failure.message));
        }
        Ok(())
    }

    fn repo(&self, name: &str) -> Result<&Repository> {
        self.repositories
            .get(name)
            .ok_or_else(|| Error::not_found(format!("repository {:?} not found", name)))
    }

    fn repo_mut(&mut self, name: &str) -> Result<&mut Repository> {
        self.repositories
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("repository {:?} not found", name)))
    }

    fn next_commit_id(&mut self, repository: &str, parents: &[String], message: &str) -> String {
        self.seq += 1;
        let mut hasher = Sha256::new();
        hasher.update(repository.as_bytes());
        for p in parents {
            hasher.update(p.as_bytes());
        }
        hasher.update(message.as_bytes());
        hasher.update(self.seq.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// Store a new commit on `branch` and advance its head.
    fn write_commit(
        &mut self,
        repository: &str,
        branch: &str,
        parents: Vec<String>,
        message: String,
        metadata: Metadata,
        tree: Tree,
    ) -> Result<Commit> {
        let id = self.next_commit_id(repository, &parents, &message);
        let commit = Commit {
            id: id.clone(),
            parents,
            message,
            metadata,
            creation_date: chrono::Utc::now().timestamp(),
            committer: self.committer.clone(),
        };
        let repo = self.repo_mut(repository)?;
        repo.commits.insert(
            id.clone(),
            StoredCommit {
                commit: commit.clone(),
                tree: Arc::new(tree),
            },
        );
        let br = repo.branch_mut(branch)?;
        br.head = id;
        br.staging.clear();
        Ok(commit)
    }
}

impl Repository {
    fn branch(&self, name: &str) -> Result<&Branch> {
        self.branches
            .get(name)
            .ok_or_else(|| Error::not_found(format!("branch {:?} not found", name)))
    }

    fn branch_mut(&mut self, name: &str) -> Result<&mut Branch> {
        self.branches
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("branch {:?} not found", name)))
    }

    fn stored(&self, id: &str) -> Result<&StoredCommit> {
        self.commits
            .get(id)
            .ok_or_else(|| Error::not_found(format!("commit {:?} not found", id)))
    }

    /// Resolve a branch, tag, full or abbreviated commit id.
    fn resolve_base(&self, base: &str) -> Option<String> {
        if let Some(br) = self.branches.get(base) {
            return Some(br.head.clone());
        }
        if let Some(id) = self.tags.get(base) {
            return Some(id.clone());
        }
        if self.commits.contains_key(base) {
            return Some(base.to_string());
        }
        if base.len() >= 6 {
            let mut matches = self.commits.keys().filter(|id| id.starts_with(base));
            if let (Some(id), None) = (matches.next(), matches.next()) {
                return Some(id.clone());
            }
        }
        None
    }

    fn resolve(&self, reference: &str) -> Result<String> {
        let expr: RefExpr = reference.parse()?;
        let mut id = self
            .resolve_base(&expr.base)
            .ok_or_else(|| Error::not_found(format!("reference {:?} not found", expr.base)))?;
        for modifier in &expr.modifiers {
            match *modifier {
                RefModifier::Committed => {}
                RefModifier::Ancestor(n) => {
                    for depth in 0..n {
                        let commit = &self.stored(&id)?.commit;
                        id = commit.parents.first().cloned().ok_or_else(|| {
                            Error::revision_not_found(format!(
                                "{:?} has only {} ancestors",
                                reference, depth
                            ))
                        })?;
                    }
                }
                RefModifier::Parent(n) => {
                    if n == 0 {
                        continue;
                    }
                    let commit = &self.stored(&id)?.commit;
                    id = commit.parents.get(n - 1).cloned().ok_or_else(|| {
                        Error::revision_not_found(format!(
                            "{:?}: commit has only {} parents",
                            reference,
                            commit.parents.len()
                        ))
                    })?;
                }
            }
        }
        Ok(id)
    }

    fn committed_tree(&self, reference: &str) -> Result<Arc<Tree>> {
        let id = self.resolve(reference)?;
        Ok(Arc::clone(&self.stored(&id)?.tree))
    }

    fn staged_tree(&self, branch: &Branch) -> Result<Tree> {
        let mut tree = (*self.stored(&branch.head)?.tree).clone();
        for (path, change) in &branch.staging {
            match change {
                Some(blob) => {
                    tree.insert(path.clone(), blob.clone());
                }
                None => {
                    tree.remove(path);
                }
            }
        }
        Ok(tree)
    }

    /// The tree visible through `reference`: staged state for a plain branch
    /// name, committed state otherwise.
    fn view(&self, reference: &str) -> Result<Arc<Tree>> {
        let expr: RefExpr = reference.parse()?;
        if !expr.is_committed_only() {
            if let Some(br) = self.branches.get(&expr.base) {
                return Ok(Arc::new(self.staged_tree(br)?));
            }
        }
        self.committed_tree(reference)
    }

    fn staged_diff(&self, branch: &Branch) -> Result<Vec<DiffEntry>> {
        let head = &self.stored(&branch.head)?.tree;
        let mut out = Vec::new();
        for (path, change) in &branch.staging {
            let before = head.get(path);
            let after = change.as_ref();
            if same_blob(before, after) {
                continue;
            }
            let kind = match (before, after) {
                (None, _) => DiffKind::Added,
                (_, None) => DiffKind::Removed,
                _ => DiffKind::Changed,
            };
            out.push(DiffEntry::new(path.clone(), kind));
        }
        Ok(out)
    }

    fn ancestors(&self, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(stored) = self.commits.get(&current) {
                queue.extend(stored.commit.parents.iter().cloned());
            }
        }
        seen
    }

    fn merge_base(&self, a: &str, b: &str) -> Option<String> {
        let of_a = self.ancestors(a);
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([b.to_string()]);
        while let Some(current) = queue.pop_front() {
            if of_a.contains(&current) {
                return Some(current);
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(stored) = self.commits.get(&current) {
                queue.extend(stored.commit.parents.iter().cloned());
            }
        }
        None
    }

    fn is_dirty(&self, branch: &Branch) -> Result<bool> {
        Ok(!self.staged_diff(branch)?.is_empty())
    }
}

fn tree_diff(left: &Tree, right: &Tree) -> Vec<DiffEntry> {
    let paths: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
    paths
        .into_iter()
        .filter_map(|path| {
            let (l, r) = (left.get(path), right.get(path));
            if same_blob(l, r) {
                return None;
            }
            let kind = match (l, r) {
                (None, _) => DiffKind::Added,
                (_, None) => DiffKind::Removed,
                _ => DiffKind::Changed,
            };
            Some(DiffEntry::new(path.clone(), kind))
        })
        .collect()
}

fn branch_name(reference: &str) -> Result<&str> {
    let expr: RefExpr = reference.parse()?;
    if !expr.modifiers.is_empty() {
        return Err(Error::invalid_path(format!(
            "cannot write to relative ref {:?}",
            reference
        )));
    }
    Ok(reference)
}

impl VersioningClient for MemoryClient {
    fn create_repository(&self, name: &str, default_branch: &str) -> Result<()> {
        let mut s = self.state()?;
        s.record("create_repository")?;
        if s.repositories.contains_key(name) {
            return Err(Error::conflict(format!("repository {:?} already exists", name)));
        }
        s.repositories.insert(name.to_string(), Repository::default());
        s.repo_mut(name)?
            .branches
            .insert(default_branch.to_string(), Branch::default());
        s.write_commit(
            name,
            default_branch,
            Vec::new(),
            "Repository created".into(),
            Metadata::new(),
            Tree::new(),
        )?;
        Ok(())
    }

    fn create_commit(
        &self,
        repository: &str,
        branch: &str,
        message: &str,
        metadata: &Metadata,
    ) -> Result<Commit> {
        let mut s = self.state()?;
        s.record("create_commit")?;
        let repo = s.repo(repository)?;
        let br = repo.branch(branch)?;
        if !repo.is_dirty(br)? {
            return Err(Error::from_status(400, format!("commit: no changes on {:?}", branch)));
        }
        let tree = repo.staged_tree(br)?;
        let parents = vec![br.head.clone()];
        s.write_commit(
            repository,
            branch,
            parents,
            message.to_string(),
            metadata.clone(),
            tree,
        )
    }

    fn get_commit(&self, repository: &str, commit_id: &str) -> Result<Commit> {
        let mut s = self.state()?;
        s.record("get_commit")?;
        let repo = s.repo(repository)?;
        let id = repo.resolve(commit_id)?;
        Ok(repo.stored(&id)?.commit.clone())
    }

    fn log_commits(
        &self,
        repository: &str,
        reference: &str,
        after: Option<&str>,
        amount: usize,
    ) -> Result<Page<Commit>> {
        let mut s = self.state()?;
        s.record("log_commits")?;
        let repo = s.repo(repository)?;
        let mut chain = Vec::new();
        let mut next = Some(repo.resolve(reference)?);
        while let Some(id) = next {
            let commit = repo.stored(&id)?.commit.clone();
            next = commit.parents.first().cloned();
            chain.push(commit);
        }
        let start = match after {
            Some(cursor) => chain
                .iter()
                .position(|c| c.id == cursor)
                .map_or(chain.len(), |idx| idx + 1),
            None => 0,
        };
        let rest: Vec<Commit> = chain.into_iter().skip(start).collect();
        // Page::slice filters by key order, which a log does not have.
        Ok(Page::slice(rest, None, amount, |c| c.id.as_str()))
    }

    fn resolve_ref(&self, repository: &str, reference: &str) -> Result<String> {
        let mut s = self.state()?;
        s.record("resolve_ref")?;
        s.repo(repository)?.resolve(reference)
    }

    fn get_parent(&self, repository: &str, commit_id: &str, n: usize) -> Result<String> {
        let mut s = self.state()?;
        s.record("get_parent")?;
        let repo = s.repo(repository)?;
        let commit = &repo.stored(&repo.resolve(commit_id)?)?.commit;
        n.checked_sub(1)
            .and_then(|idx| commit.parents.get(idx))
            .cloned()
            .ok_or_else(|| {
                Error::revision_not_found(format!(
                    "commit {} has {} parents, requested parent {}",
                    commit_id,
                    commit.parents.len(),
                    n
                ))
            })
    }

    fn create_branch(&self, repository: &str, name: &str, source: &str) -> Result<Ref> {
        let mut s = self.state()?;
        s.record("create_branch")?;
        let repo = s.repo_mut(repository)?;
        if repo.branches.contains_key(name) {
            return Err(Error::conflict(format!("branch {:?} already exists", name)));
        }
        let head = repo.resolve(source)?;
        repo.branches.insert(
            name.to_string(),
            Branch {
                head: head.clone(),
                staging: BTreeMap::new(),
            },
        );
        Ok(Ref {
            id: name.to_string(),
            commit_id: head,
        })
    }

    fn get_branch(&self, repository: &str, name: &str) -> Result<Ref> {
        let mut s = self.state()?;
        s.record("get_branch")?;
        let br = s.repo(repository)?.branch(name)?;
        Ok(Ref {
            id: name.to_string(),
            commit_id: br.head.clone(),
        })
    }

    fn delete_branch(&self, repository: &str, name: &str) -> Result<()> {
        let mut s = self.state()?;
        s.record("delete_branch")?;
        s.repo_mut(repository)?
            .branches
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("branch {:?} not found", name)))
    }

    fn list_branches(
        &self,
        repository: &str,
        after: Option<&str>,
        amount: usize,
    ) -> Result<Page<Ref>> {
        let mut s = self.state()?;
        s.record("list_branches")?;
        let refs: Vec<Ref> = s
            .repo(repository)?
            .branches
            .iter()
            .map(|(name, br)| Ref {
                id: name.clone(),
                commit_id: br.head.clone(),
            })
            .collect();
        Ok(Page::slice(refs, after, amount, |r| r.id.as_str()))
    }

    fn reset_branch(&self, repository: &str, branch: &str) -> Result<()> {
        let mut s = self.state()?;
        s.record("reset_branch")?;
        s.repo_mut(repository)?.branch_mut(branch)?.staging.clear();
        Ok(())
    }

    fn diff_branch(&self, repository: &str, branch: &str) -> Result<Vec<DiffEntry>> {
        let mut s = self.state()?;
        s.record("diff_branch")?;
        let repo = s.repo(repository)?;
        repo.staged_diff(repo.branch(branch)?)
    }

    fn diff_refs(&self, repository: &str, left: &str, right: &str) -> Result<Vec<DiffEntry>> {
        let mut s = self.state()?;
        s.record("diff_refs")?;
        let repo = s.repo(repository)?;
        let left = repo.committed_tree(left)?;
        let right = repo.committed_tree(right)?;
        Ok(tree_diff(&left, &right))
    }

    fn merge(&self, repository: &str, source_ref: &str, target_branch: &str) -> Result<Commit> {
        let mut s = self.state()?;
        s.record("merge")?;
        let repo = s.repo(repository)?;
        let source_id = repo.resolve(source_ref)?;
        let target = repo.branch(target_branch)?;
        if repo.is_dirty(target)? {
            return Err(Error::conflict(format!(
                "destination branch {:?} has uncommitted changes",
                target_branch
            )));
        }
        let target_id = target.head.clone();
        let base_tree = match repo.merge_base(&source_id, &target_id) {
            Some(base) => Arc::clone(&repo.stored(&base)?.tree),
            None => Arc::new(Tree::new()),
        };
        let source_tree = Arc::clone(&repo.stored(&source_id)?.tree);
        let target_tree = Arc::clone(&repo.stored(&target_id)?.tree);

        let paths: BTreeSet<&String> = base_tree
            .keys()
            .chain(source_tree.keys())
            .chain(target_tree.keys())
            .collect();
        let mut merged = Tree::new();
        let mut conflicts = Vec::new();
        for path in paths {
            let (b, src, tgt) = (base_tree.get(path), source_tree.get(path), target_tree.get(path));
            let pick = if same_blob(src, tgt) || same_blob(src, b) {
                tgt
            } else if same_blob(tgt, b) {
                src
            } else {
                conflicts.push(path.clone());
                continue;
            };
            if let Some(blob) = pick {
                merged.insert(path.clone(), blob.clone());
            }
        }
        if !conflicts.is_empty() {
            return Err(Error::conflict(format!(
                "merge of {:?} into {:?} conflicts on: {}",
                source_ref,
                target_branch,
                conflicts.join(", ")
            )));
        }
        if tree_diff(&target_tree, &merged).is_empty() {
            return Err(Error::from_status(
                400,
                format!("merge of {:?} into {:?}: no changes", source_ref, target_branch),
            ));
        }

        let message = format!("Merge '{}' into '{}'", source_ref, target_branch);
        s.write_commit(
            repository,
            target_branch,
            vec![target_id, source_id],
            message,
            Metadata::new(),
            merged,
        )
    }

    fn revert(
        &self,
        repository: &str,
        branch: &str,
        reference: &str,
        parent_number: usize,
    ) -> Result<Commit> {
        let mut s = self.state()?;
        s.record("revert")?;
        let repo = s.repo(repository)?;
        let br = repo.branch(branch)?;
        if repo.is_dirty(br)? {
            return Err(Error::conflict(format!(
                "branch {:?} has uncommitted changes",
                branch
            )));
        }
        let reverted_id = repo.resolve(reference)?;
        let reverted = repo.stored(&reverted_id)?;
        let parent_id = parent_number
            .checked_sub(1)
            .and_then(|idx| reverted.commit.parents.get(idx))
            .ok_or_else(|| {
                Error::revision_not_found(format!(
                    "cannot revert {:?}: commit has {} parents, requested parent {}",
                    reference,
                    reverted.commit.parents.len(),
                    parent_number
                ))
            })?;
        let parent_tree = &repo.stored(parent_id)?.tree;
        let head_id = br.head.clone();
        let mut tree = (*repo.stored(&head_id)?.tree).clone();

        let mut conflicts = Vec::new();
        for change in tree_diff(parent_tree, &reverted.tree) {
            let introduced = reverted.tree.get(&change.path);
            if !same_blob(tree.get(&change.path), introduced) {
                conflicts.push(change.path);
                continue;
            }
            match parent_tree.get(&change.path) {
                Some(blob) => {
                    tree.insert(change.path, blob.clone());
                }
                None => {
                    tree.remove(&change.path);
                }
            }
        }
        if !conflicts.is_empty() {
            return Err(Error::conflict(format!(
                "revert of {:?} conflicts on: {}",
                reference,
                conflicts.join(", ")
            )));
        }

        let message = format!("Revert {}", reverted_id);
        s.write_commit(repository, branch, vec![head_id], message, Metadata::new(), tree)
    }

    fn create_tag(&self, repository: &str, tag: &str, reference: &str) -> Result<Ref> {
        let mut s = self.state()?;
        s.record("create_tag")?;
        let repo = s.repo_mut(repository)?;
        if repo.tags.contains_key(tag) {
            return Err(Error::conflict(format!("tag {:?} already exists", tag)));
        }
        let commit_id = repo.resolve(reference)?;
        repo.tags.insert(tag.to_string(), commit_id.clone());
        Ok(Ref {
            id: tag.to_string(),
            commit_id,
        })
    }

    fn get_tag(&self, repository: &str, tag: &str) -> Result<Ref> {
        let mut s = self.state()?;
        s.record("get_tag")?;
        let commit_id = s
            .repo(repository)?
            .tags
            .get(tag)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("tag {:?} not found", tag)))?;
        Ok(Ref {
            id: tag.to_string(),
            commit_id,
        })
    }

    fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        let mut s = self.state()?;
        s.record("delete_tag")?;
        s.repo_mut(repository)?
            .tags
            .remove(tag)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("tag {:?} not found", tag)))
    }

    fn list_tags(&self, repository: &str, after: Option<&str>, amount: usize) -> Result<Page<Ref>> {
        let mut s = self.state()?;
        s.record("list_tags")?;
        let refs: Vec<Ref> = s
            .repo(repository)?
            .tags
            .iter()
            .map(|(name, id)| Ref {
                id: name.clone(),
                commit_id: id.clone(),
            })
            .collect();
        Ok(Page::slice(refs, after, amount, |r| r.id.as_str()))
    }

    fn list_objects(
        &self,
        repository: &str,
        reference: &str,
        prefix: &str,
        delimiter: Option<&str>,
        after: Option<&str>,
        amount: usize,
    ) -> Result<Page<ObjectStat>> {
        let mut s = self.state()?;
        s.record("list_objects")?;
        let tree = s.repo(repository)?.view(reference)?;
        let mut entries: BTreeMap<String, ObjectStat> = BTreeMap::new();
        for (path, blob) in tree.range(prefix.to_string()..) {
            let Some(rest) = path.strip_prefix(prefix) else {
                break;
            };
            match delimiter.filter(|d| !d.is_empty()).and_then(|d| rest.find(d).map(|i| (d, i))) {
                Some((d, idx)) => {
                    let dir = format!("{}{}", prefix, &rest[..idx + d.len()]);
                    entries
                        .entry(dir.clone())
                        .or_insert_with(|| ObjectStat::common_prefix(dir));
                }
                None => {
                    entries.insert(path.clone(), blob.stat(path));
                }
            }
        }
        Ok(Page::slice(
            entries.into_values().collect(),
            after,
            amount,
            |o| o.path.as_str(),
        ))
    }

    fn stat_object(&self, repository: &str, reference: &str, path: &str) -> Result<ObjectStat> {
        let mut s = self.state()?;
        s.record("stat_object")?;
        let tree = s.repo(repository)?.view(reference)?;
        tree.get(path)
            .map(|blob| blob.stat(path))
            .ok_or_else(|| Error::not_found(format!("object {:?} not found on {:?}", path, reference)))
    }

    fn get_object(
        &self,
        repository: &str,
        reference: &str,
        path: &str,
        range: Option<Range<u64>>,
    ) -> Result<Vec<u8>> {
        let mut s = self.state()?;
        s.record("get_object")?;
        let tree = s.repo(repository)?.view(reference)?;
        let blob = tree
            .get(path)
            .ok_or_else(|| Error::not_found(format!("object {:?} not found on {:?}", path, reference)))?;
        let data = blob.data.as_slice();
        Ok(match range {
            Some(r) => {
                let len = data.len() as u64;
                let start = r.start.min(len) as usize;
                let end = r.end.clamp(r.start.min(len), len) as usize;
                data[start..end].to_vec()
            }
            None => data.to_vec(),
        })
    }

    fn upload_object(
        &self,
        repository: &str,
        branch: &str,
        path: &str,
        content: &[u8],
    ) -> Result<ObjectStat> {
        let mut s = self.state()?;
        s.record("upload_object")?;
        let branch = branch_name(branch)?;
        let blob = Blob::new(content);
        let stat = blob.stat(path);
        s.repo_mut(repository)?
            .branch_mut(branch)?
            .staging
            .insert(path.to_string(), Some(blob));
        Ok(stat)
    }

    fn delete_object(&self, repository: &str, branch: &str, path: &str) -> Result<()> {
        let mut s = self.state()?;
        s.record("delete_object")?;
        let branch = branch_name(branch)?;
        let repo = s.repo_mut(repository)?;
        if !repo.view(branch)?.contains_key(path) {
            return Err(Error::not_found(format!(
                "object {:?} not found on {:?}",
                path, branch
            )));
        }
        let in_head = repo.stored(&repo.branch(branch)?.head)?.tree.contains_key(path);
        let br = repo.branch_mut(branch)?;
        if in_head {
            br.staging.insert(path.to_string(), None);
        } else {
            br.staging.remove(path);
        }
        Ok(())
    }

    fn copy_object(
        &self,
        repository: &str,
        src_ref: &str,
        src_path: &str,
        dest_branch: &str,
        dest_path: &str,
    ) -> Result<ObjectStat> {
        let mut s = self.state()?;
        s.record("copy_object")?;
        let dest_branch = branch_name(dest_branch)?;
        let repo = s.repo_mut(repository)?;
        let mut blob = repo
            .view(src_ref)?
            .get(src_path)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("object {:?} not found on {:?}", src_path, src_ref)))?;
        blob.mtime = chrono::Utc::now().timestamp();
        let stat = blob.stat(dest_path);
        repo.branch_mut(dest_branch)?
            .staging
            .insert(dest_path.to_string(), Some(blob));
        Ok(stat)
    }
}
