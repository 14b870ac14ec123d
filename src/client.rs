//! The versioning-service client seam.
//!
//! [`VersioningClient`] mirrors the RPC surface of the backing store. It is
//! synchronous; [`AsyncLakeFs`](crate::asyn::AsyncLakeFs) moves calls onto a
//! blocking pool instead of requiring an async client. Implementations report
//! failures already translated into the crate's error taxonomy (see
//! [`Error::from_status`](crate::Error::from_status)).
//!
//! [`MemoryClient`](crate::memory::MemoryClient) is the in-process
//! implementation used by tests and local tooling.

use std::ops::Range;

use crate::error::{Error, Result};
use crate::types::{Commit, DiffEntry, Metadata, ObjectStat, Page, Ref};

pub trait VersioningClient: Send + Sync {
    // -- Repositories -------------------------------------------------------

    /// Create a repository whose `default_branch` holds one empty commit.
    fn create_repository(&self, name: &str, default_branch: &str) -> Result<()>;

    // -- Commits ------------------------------------------------------------

    /// Commit all staged changes on `branch`. Fails if nothing is staged.
    fn create_commit(
        &self,
        repository: &str,
        branch: &str,
        message: &str,
        metadata: &Metadata,
    ) -> Result<Commit>;

    fn get_commit(&self, repository: &str, commit_id: &str) -> Result<Commit>;

    /// First-parent commit log starting at `reference`, newest first.
    fn log_commits(
        &self,
        repository: &str,
        reference: &str,
        after: Option<&str>,
        amount: usize,
    ) -> Result<Page<Commit>>;

    /// Resolve a branch, tag, or commit id (including relative modifiers) to a
    /// commit id.
    fn resolve_ref(&self, repository: &str, reference: &str) -> Result<String>;

    /// The `n`th (1-based) parent of a commit.
    fn get_parent(&self, repository: &str, commit_id: &str, n: usize) -> Result<String> {
        let commit = self.get_commit(repository, commit_id)?;
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

    // -- Branches -----------------------------------------------------------

    /// Create `name` pointing at `source`. Fails with a conflict if it exists.
    fn create_branch(&self, repository: &str, name: &str, source: &str) -> Result<Ref>;

    fn get_branch(&self, repository: &str, name: &str) -> Result<Ref>;

    fn delete_branch(&self, repository: &str, name: &str) -> Result<()>;

    fn list_branches(
        &self,
        repository: &str,
        after: Option<&str>,
        amount: usize,
    ) -> Result<Page<Ref>>;

    /// Drop all staged changes on `branch`.
    fn reset_branch(&self, repository: &str, branch: &str) -> Result<()>;

    /// Uncommitted (staged) changes on `branch`.
    fn diff_branch(&self, repository: &str, branch: &str) -> Result<Vec<DiffEntry>>;

    /// Committed differences going from `left` to `right`.
    fn diff_refs(&self, repository: &str, left: &str, right: &str) -> Result<Vec<DiffEntry>>;

    /// Merge `source_ref` into `target_branch`, returning the merge commit.
    fn merge(&self, repository: &str, source_ref: &str, target_branch: &str) -> Result<Commit>;

    /// Revert the changes `reference` introduced relative to its
    /// `parent_number`th parent, committing the result on `branch`.
    fn revert(
        &self,
        repository: &str,
        branch: &str,
        reference: &str,
        parent_number: usize,
    ) -> Result<Commit>;

    // -- Tags ---------------------------------------------------------------

    /// Create `tag` pointing at `reference`. Fails with a conflict if it exists.
    fn create_tag(&self, repository: &str, tag: &str, reference: &str) -> Result<Ref>;

    fn get_tag(&self, repository: &str, tag: &str) -> Result<Ref>;

    fn delete_tag(&self, repository: &str, tag: &str) -> Result<()>;

    fn list_tags(&self, repository: &str, after: Option<&str>, amount: usize) -> Result<Page<Ref>>;

    // -- Objects ------------------------------------------------------------

    /// List objects under `prefix`. With a delimiter, deeper keys collapse into
    /// common-prefix entries.
    fn list_objects(
        &self,
        repository: &str,
        reference: &str,
        prefix: &str,
        delimiter: Option<&str>,
        after: Option<&str>,
        amount: usize,
    ) -> Result<Page<ObjectStat>>;

    fn stat_object(&self, repository: &str, reference: &str, path: &str) -> Result<ObjectStat>;

    /// Read an object, optionally restricted to a byte range.
    fn get_object(
        &self,
        repository: &str,
        reference: &str,
        path: &str,
        range: Option<Range<u64>>,
    ) -> Result<Vec<u8>>;

    /// Stage `content` at `path` on `branch`.
    fn upload_object(
        &self,
        repository: &str,
        branch: &str,
        path: &str,
        content: &[u8],
    ) -> Result<ObjectStat>;

    /// Stage the removal of `path` on `branch`.
    fn delete_object(&self, repository: &str, branch: &str, path: &str) -> Result<()>;

    /// Stage a copy of `src_ref:src_path` at `dest_branch:dest_path`.
    fn copy_object(
        &self,
        repository: &str,
        src_ref: &str,
        src_path: &str,
        dest_branch: &str,
        dest_path: &str,
    ) -> Result<ObjectStat>;
}
