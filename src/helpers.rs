//! Client helpers layered on [`VersioningClient`].
//!
//! These add the idempotency and no-op rules the filesystem and transaction
//! layers rely on: committing or merging without a diff logs a warning and
//! returns the current head, creating an existing branch is accepted when
//! `exist_ok` is set, and re-creating a tag on the same commit is not an
//! error.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::client::VersioningClient;
use crate::error::{Error, Result};
use crate::paths::{RefExpr, RefModifier};
use crate::types::{Commit, Metadata, Page, Ref};

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a byte slice.
pub fn content_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 hex digest of a local file, read in `blocksize` chunks.
pub fn file_checksum(path: &Path, blocksize: usize) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; blocksize.max(1)];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Lazy iterator over the items of a paginated listing.
///
/// `fetch(after)` is called once per page until the store reports no further
/// pages. A failed fetch is yielded once and ends the iteration.
pub struct Pages<T, F>
where
    F: FnMut(Option<&str>) -> Result<Page<T>>,
{
    fetch: F,
    buffer: std::vec::IntoIter<T>,
    cursor: Option<String>,
    done: bool,
}

impl<T, F> Pages<T, F>
where
    F: FnMut(Option<&str>) -> Result<Page<T>>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            buffer: Vec::new().into_iter(),
            cursor: None,
            done: false,
        }
    }
}

impl<T, F> Iterator for Pages<T, F>
where
    F: FnMut(Option<&str>) -> Result<Page<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.next() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            match (self.fetch)(self.cursor.as_deref()) {
                Ok(page) => {
                    self.done = !page.pagination.has_more;
                    self.cursor = Some(page.pagination.next_offset);
                    self.buffer = page.results.into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Drain every page of a listing into one vector.
pub fn depaginate<T, F>(fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<&str>) -> Result<Page<T>>,
{
    Pages::new(fetch).collect()
}

const PAGE_SIZE: usize = 1000;

// ---------------------------------------------------------------------------
// Repositories and branches
// ---------------------------------------------------------------------------

/// Create a repository, treating an existing one as success when `exist_ok`.
pub fn create_repository(
    client: &dyn VersioningClient,
    name: &str,
    default_branch: &str,
    exist_ok: bool,
) -> Result<()> {
    match client.create_repository(name, default_branch) {
        Err(e) if exist_ok && e.is_conflict() => Ok(()),
        other => other,
    }
}

/// Create `name` from `source`, returning the branch name.
///
/// With `exist_ok`, a conflict from an existing branch is swallowed.
pub fn create_branch(
    client: &dyn VersioningClient,
    repository: &str,
    name: &str,
    source: &str,
    exist_ok: bool,
) -> Result<String> {
    match client.create_branch(repository, name, source) {
        Ok(_) => {
            log::debug!("created branch {:?} from {:?}", name, source);
            Ok(name.to_string())
        }
        Err(e) if exist_ok && e.is_conflict() => Ok(name.to_string()),
        Err(e) => Err(e),
    }
}

pub fn delete_branch(
    client: &dyn VersioningClient,
    repository: &str,
    branch: &str,
    missing_ok: bool,
) -> Result<()> {
    match client.delete_branch(repository, branch) {
        Err(Error::NotFound(_)) if missing_ok => Ok(()),
        other => other,
    }
}

pub fn list_branches(client: &dyn VersioningClient, repository: &str) -> Result<Vec<Ref>> {
    depaginate(|after| client.list_branches(repository, after, PAGE_SIZE))
}

/// Drop all uncommitted changes on `branch`.
pub fn reset_branch(client: &dyn VersioningClient, repository: &str, branch: &str) -> Result<()> {
    client.reset_branch(repository, branch)
}

// ---------------------------------------------------------------------------
// Commits, merges, reverts
// ---------------------------------------------------------------------------

/// Commit staged changes on `branch`.
///
/// Without staged changes no commit is created; a warning is logged and the
/// current head commit is returned.
pub fn commit(
    client: &dyn VersioningClient,
    repository: &str,
    branch: &str,
    message: &str,
    metadata: &Metadata,
) -> Result<Commit> {
    if client.diff_branch(repository, branch)?.is_empty() {
        log::warn!("no changes to commit on branch {:?}, aborting commit", branch);
        return rev_parse(client, repository, branch, 0);
    }
    client.create_commit(repository, branch, message, metadata)
}

/// Merge `source_ref` into `target_branch`.
///
/// If the two refs have no committed differences, nothing is merged, a
/// warning is logged and the target's head commit is returned.
pub fn merge(
    client: &dyn VersioningClient,
    repository: &str,
    source_ref: &str,
    target_branch: &str,
) -> Result<Commit> {
    if client.diff_refs(repository, target_branch, source_ref)?.is_empty() {
        log::warn!(
            "no difference between {:?} and {:?}, aborting merge",
            source_ref,
            target_branch
        );
        return rev_parse(client, repository, target_branch, 0);
    }
    client.merge(repository, source_ref, target_branch)
}

/// Revert the head commit of `branch` relative to its `parent_number`th
/// parent (1 is the first parent).
pub fn revert(
    client: &dyn VersioningClient,
    repository: &str,
    branch: &str,
    parent_number: usize,
) -> Result<Commit> {
    client.revert(repository, branch, branch, parent_number)
}

// ---------------------------------------------------------------------------
// Ref resolution
// ---------------------------------------------------------------------------

/// Resolve a ref expression to a commit id by walking its modifiers.
///
/// `~N` follows first parents N times, `^N` selects the Nth parent, and `@`
/// does not change the commit.
pub fn resolve_ref_expr(
    client: &dyn VersioningClient,
    repository: &str,
    expr: &RefExpr,
) -> Result<String> {
    let mut id = client
        .resolve_ref(repository, &expr.base)
        .map_err(|e| match e {
            Error::NotFound(_) => Error::revision_not_found(format!(
                "{:?} does not match any revision in repository {:?}",
                expr.base, repository
            )),
            other => other,
        })?;

    for modifier in &expr.modifiers {
        match *modifier {
            RefModifier::Committed => {}
            RefModifier::Parent(0) => {}
            RefModifier::Parent(n) => {
                id = client.get_parent(repository, &id, n)?;
            }
            RefModifier::Ancestor(n) => {
                for depth in 0..n {
                    id = client.get_parent(repository, &id, 1).map_err(|e| match e {
                        Error::RevisionNotFound(_) => Error::revision_not_found(format!(
                            "unable to resolve {}: history ends after {} ancestors",
                            expr, depth
                        )),
                        other => other,
                    })?;
                }
            }
        }
    }
    Ok(id)
}

/// Resolve `reference` (optionally with modifiers) and walk `parent` steps
/// back along its first-parent history.
///
/// # Errors
/// [`Error::RevisionNotFound`] if the ref does not exist or the history is
/// shorter than `parent`; the message states how many commits are available.
pub fn rev_parse(
    client: &dyn VersioningClient,
    repository: &str,
    reference: &str,
    parent: usize,
) -> Result<Commit> {
    let expr: RefExpr = reference.parse()?;
    let start = resolve_ref_expr(client, repository, &expr)?;

    let amount = parent.saturating_add(1).saturating_mul(2).min(PAGE_SIZE);
    let mut revisions = Vec::new();
    for commit in Pages::new(|after| client.log_commits(repository, &start, after, amount)) {
        revisions.push(commit?);
        if revisions.len() > parent {
            break;
        }
    }

    if revisions.len() <= parent {
        return Err(Error::revision_not_found(format!(
            "unable to fetch revision {}~{}: ref {:?} only has {} parents",
            reference,
            parent,
            reference,
            revisions.len()
        )));
    }
    Ok(revisions.swap_remove(parent))
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Create `tag` at `reference`.
///
/// Re-creating an existing tag that already points at the same commit returns
/// the existing tag; a tag pointing elsewhere is a conflict.
pub fn create_tag(
    client: &dyn VersioningClient,
    repository: &str,
    reference: &str,
    tag: &str,
) -> Result<Ref> {
    match client.create_tag(repository, tag, reference) {
        Err(e) if e.is_conflict() => {
            let target = rev_parse(client, repository, reference, 0)?;
            let existing = client.get_tag(repository, tag)?;
            if existing.commit_id == target.id {
                Ok(existing)
            } else {
                Err(e)
            }
        }
        other => other,
    }
}

pub fn delete_tag(client: &dyn VersioningClient, repository: &str, tag: &str) -> Result<()> {
    client.delete_tag(repository, tag)
}

pub fn list_tags(client: &dyn VersioningClient, repository: &str) -> Result<Vec<Ref>> {
    depaginate(|after| client.list_tags(repository, after, PAGE_SIZE))
}
