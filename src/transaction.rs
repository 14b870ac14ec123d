//! Deferred, ordered execution of file writes and versioning operations.
//!
//! A [`Transaction`] is bound to one repository and works on a branch: a
//! caller-named branch, or an ephemeral `transaction-<uuid>` branch created
//! off the base branch. Writes are buffered locally and versioning calls are
//! queued, each returning immediately. Nothing reaches the store until
//! [`Transaction::complete`], which replays the queue strictly in order.
//!
//! ```
//! use lakefs_spec::{FsOptions, LakeFs, MemoryClient, TransactionOptions};
//!
//! let fs = LakeFs::new(MemoryClient::with_repository("repo", "main").unwrap(), FsOptions::default());
//! let (tag, _report) = fs
//!     .transaction("repo", TransactionOptions::default(), |tx| {
//!         tx.put("a.txt", b"hello")?;
//!         let commit = tx.commit("add a", None);
//!         tx.tag(&commit, "v1")
//!     })
//!     .unwrap();
//! assert_eq!(tag.get().unwrap().id, "v1");
//! assert_eq!(fs.cat("repo/main/a.txt").unwrap(), b"hello");
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fileobj::TxWriter;
use crate::fs::LakeFs;
use crate::helpers;
use crate::oplog::{
    BufferedWrite, LogEntry, OperationLog, RefArg, ResultSlot, VersioningCall, VersioningOp,
};
use crate::paths;
use crate::placeholder::Placeholder;
use crate::types::{Commit, Metadata, Ref};

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

/// What happens to an ephemeral branch once the transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    Never,
    #[default]
    OnSuccess,
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
    /// Branch the transaction starts from and merges back into.
    pub base_branch: String,
    /// Work directly on this branch instead of an ephemeral one.
    pub branch_name: Option<String>,
    /// Merge an ephemeral branch into `base_branch` after a successful drain.
    pub automerge: bool,
    pub delete: DeletePolicy,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            base_branch: "main".into(),
            branch_name: None,
            automerge: true,
            delete: DeletePolicy::OnSuccess,
        }
    }
}

/// Summary of a completed transaction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionReport {
    pub branch: String,
    pub ephemeral: bool,
    /// Number of log entries executed, including the implicit merge.
    pub executed: usize,
    /// The base branch's head after the implicit merge, if one ran.
    pub merge: Option<Commit>,
    pub deleted_branch: bool,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A unit of deferred work against one repository.
///
/// Dropping an open transaction discards it.
pub struct Transaction {
    fs: LakeFs,
    repository: String,
    base_branch: String,
    branch: String,
    ephemeral: bool,
    options: TransactionOptions,
    log: OperationLog,
    closed: bool,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("repository", &self.repository)
            .field("branch", &self.branch)
            .field("base_branch", &self.base_branch)
            .field("ephemeral", &self.ephemeral)
            .field("pending", &self.log.len())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn begin(fs: LakeFs, repository: &str, options: TransactionOptions) -> Result<Self> {
        paths::validate_repository(repository)?;
        paths::validate_ref_name(&options.base_branch)?;

        let (branch, ephemeral) = match &options.branch_name {
            Some(name) => {
                paths::validate_ref_name(name)?;
                (name.clone(), false)
            }
            None => (
                format!("transaction-{}", uuid::Uuid::new_v4().simple()),
                true,
            ),
        };

        if branch != options.base_branch {
            helpers::create_branch(fs.client(), repository, &branch, &options.base_branch, true)?;
        }
        log::debug!(
            "opened transaction on {}/{} (base {}, ephemeral: {})",
            repository,
            branch,
            options.base_branch,
            ephemeral
        );

        Ok(Transaction {
            fs,
            repository: repository.to_string(),
            base_branch: options.base_branch.clone(),
            branch,
            ephemeral,
            options,
            log: OperationLog::new(),
            closed: false,
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The branch writes and commits go to.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// The fully qualified path of `resource` on the transaction branch.
    pub fn path(&self, resource: &str) -> String {
        paths::join(&self.repository, &self.branch, resource)
    }

    // -- Buffered writes ----------------------------------------------------

    /// Buffer `data` for upload to `resource` on the transaction branch.
    pub fn put(&mut self, resource: &str, data: &[u8]) -> Result<()> {
        let resource = paths::normalize_path(resource)?;
        if resource.is_empty() {
            return Err(Error::invalid_path("cannot write to the ref root"));
        }
        self.log.append(LogEntry::Write(BufferedWrite {
            repository: self.repository.clone(),
            branch: self.branch.clone(),
            resource,
            data: data.to_vec(),
        }));
        Ok(())
    }

    /// Read a local file now and buffer it for upload to `resource`.
    pub fn put_file(&mut self, lpath: &Path, resource: &str) -> Result<()> {
        let data = std::fs::read(lpath).map_err(|e| Error::io(lpath, e))?;
        self.put(resource, &data)
    }

    /// A writer that buffers into this transaction on close.
    pub fn writer(&mut self, resource: &str) -> Result<TxWriter<'_>> {
        let resource = paths::normalize_path(resource)?;
        if resource.is_empty() {
            return Err(Error::invalid_path("cannot write to the ref root"));
        }
        Ok(TxWriter::new(self, resource))
    }

    // -- Queued versioning calls --------------------------------------------

    fn queue(&mut self, op: VersioningOp, slot: Option<ResultSlot>) {
        let mut call = VersioningCall::new(self.repository.clone(), op);
        call.result = slot;
        self.log.append(LogEntry::Call(call));
    }

    /// Queue a commit of the transaction branch.
    pub fn commit(&mut self, message: &str, metadata: Option<Metadata>) -> Placeholder<Commit> {
        let p = Placeholder::new();
        self.queue(
            VersioningOp::Commit {
                branch: self.branch.clone(),
                message: message.to_string(),
                metadata: metadata.unwrap_or_default(),
            },
            Some(ResultSlot::Commit(p.clone())),
        );
        p
    }

    /// Queue creation of branch `name` off `source`, returning the name.
    pub fn create_branch(
        &mut self,
        name: &str,
        source: impl Into<RefArg>,
        exist_ok: bool,
    ) -> Result<String> {
        paths::validate_ref_name(name)?;
        self.queue(
            VersioningOp::CreateBranch {
                name: name.to_string(),
                source: source.into(),
                exist_ok,
            },
            None,
        );
        Ok(name.to_string())
    }

    /// Queue a merge of `source` into branch `into`.
    ///
    /// Without a diff between the two, the merge is skipped with a warning
    /// and the placeholder receives the head of `into`.
    pub fn merge(&mut self, source: impl Into<RefArg>, into: &str) -> Result<Placeholder<Commit>> {
        paths::validate_ref_name(into)?;
        let p = Placeholder::new();
        self.queue(
            VersioningOp::Merge {
                source: source.into(),
                into: into.to_string(),
            },
            Some(ResultSlot::Commit(p.clone())),
        );
        Ok(p)
    }

    /// Queue a revert of the head commit of `branch`.
    pub fn revert(&mut self, branch: &str, parent_number: usize) -> Result<Placeholder<Commit>> {
        paths::validate_ref_name(branch)?;
        if parent_number == 0 {
            return Err(Error::invalid_path("parent number must be at least 1"));
        }
        let p = Placeholder::new();
        self.queue(
            VersioningOp::Revert {
                branch: branch.to_string(),
                parent_number,
            },
            Some(ResultSlot::Commit(p.clone())),
        );
        Ok(p)
    }

    /// Queue resolution of `reference` walked back `parent` commits.
    pub fn rev_parse(&mut self, reference: impl Into<RefArg>, parent: usize) -> Placeholder<Commit> {
        let p = Placeholder::new();
        self.queue(
            VersioningOp::RevParse {
                reference: reference.into(),
                parent,
            },
            Some(ResultSlot::Commit(p.clone())),
        );
        p
    }

    /// Queue creation of tag `name` at `reference`.
    pub fn tag(&mut self, reference: impl Into<RefArg>, name: &str) -> Result<Placeholder<Ref>> {
        paths::validate_ref_name(name)?;
        let p = Placeholder::new();
        self.queue(
            VersioningOp::Tag {
                reference: reference.into(),
                name: name.to_string(),
            },
            Some(ResultSlot::Tag(p.clone())),
        );
        Ok(p)
    }

    // -- Completion ---------------------------------------------------------

    /// Execute entries from the head of the log until it is empty or one
    /// fails. Entries after a failure stay queued.
    fn drain(&mut self, report: &mut TransactionReport) -> Result<()> {
        let client = self.fs.client();
        for entry in self.log.drain() {
            log::debug!("transaction {}: executing {}", self.branch, entry.describe());
            match entry {
                LogEntry::Write(write) => write.commit(&self.fs)?,
                LogEntry::Call(call) => {
                    call.execute(client)?;
                    if let Some(branch) = call.op.moved_branch() {
                        self.fs.cache().invalidate_ref(&self.repository, branch);
                    }
                }
            }
            report.executed += 1;
        }
        Ok(())
    }

    /// Execute all queued work in order, then merge and clean up per the
    /// transaction options.
    ///
    /// # Errors
    /// The first failing entry's error, unwrapped. Later entries are not
    /// executed and earlier ones are not undone.
    pub fn complete(mut self) -> Result<TransactionReport> {
        self.closed = true;
        let mut report = TransactionReport {
            branch: self.branch.clone(),
            ephemeral: self.ephemeral,
            ..TransactionReport::default()
        };

        if let Err(e) = self.drain(&mut report) {
            log::warn!(
                "transaction on {}/{} failed after {} entries: {}",
                self.repository,
                self.branch,
                report.executed,
                e
            );
            self.abort();
            return Err(e);
        }

        if self.ephemeral && self.options.automerge {
            let merged = Placeholder::new();
            self.queue(
                VersioningOp::Merge {
                    source: RefArg::Name(self.branch.clone()),
                    into: self.base_branch.clone(),
                },
                Some(ResultSlot::Commit(merged.clone())),
            );
            if let Err(e) = self.drain(&mut report) {
                self.abort();
                return Err(e);
            }
            report.merge = merged.value().ok();
        }

        let delete = self.ephemeral && self.options.delete != DeletePolicy::Never;
        if let Some(warning) = self.uncommitted_warning(delete)? {
            log::warn!("{}", warning);
            report.warnings.push(warning);
        }
        if delete {
            self.delete_branch()?;
            report.deleted_branch = true;
        }
        Ok(report)
    }

    fn uncommitted_warning(&self, deleting: bool) -> Result<Option<String>> {
        let diff = self.fs.client().diff_branch(&self.repository, &self.branch)?;
        if diff.is_empty() {
            return Ok(None);
        }
        Ok(Some(if deleting {
            format!(
                "discarding {} uncommitted changes on ephemeral branch {:?}",
                diff.len(),
                self.branch
            )
        } else {
            format!(
                "{} uncommitted changes remain staged on branch {:?}",
                diff.len(),
                self.branch
            )
        }))
    }

    /// Drop all buffered writes and queued calls without executing them.
    pub fn discard(mut self) -> Result<()> {
        self.closed = true;
        self.abort_checked()
    }

    fn abort_checked(&mut self) -> Result<()> {
        let mut skipped = 0usize;
        for entry in self.log.drain() {
            match entry {
                LogEntry::Write(write) => write.discard(),
                LogEntry::Call(call) => {
                    log::debug!("skipping queued {}", call.op.name());
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            log::info!(
                "transaction on {}/{} aborted, {} queued calls not executed",
                self.repository,
                self.branch,
                skipped
            );
        }
        if self.ephemeral && self.options.delete == DeletePolicy::Always {
            self.delete_branch()?;
        }
        Ok(())
    }

    fn delete_branch(&self) -> Result<()> {
        helpers::delete_branch(self.fs.client(), &self.repository, &self.branch, true)?;
        self.fs.cache().invalidate_ref(&self.repository, &self.branch);
        Ok(())
    }

    fn abort(&mut self) {
        if let Err(e) = self.abort_checked() {
            log::warn!("cleanup of transaction branch {:?} failed: {}", self.branch, e);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;
    use crate::types::FsOptions;
    use crate::VersioningClient;

    fn setup() -> (MemoryClient, LakeFs) {
        let client = MemoryClient::with_repository("repo", "main").unwrap();
        (client.clone(), LakeFs::new(client, FsOptions::default()))
    }

    #[test]
    fn ephemeral_branch_is_created_up_front() {
        let (client, fs) = setup();
        let tx = fs.start_transaction("repo", TransactionOptions::default()).unwrap();
        assert!(tx.is_ephemeral());
        assert!(tx.branch().starts_with("transaction-"));
        assert!(client.get_branch("repo", tx.branch()).is_ok());
        assert_eq!(tx.path("a.txt"), format!("repo/{}/a.txt", tx.branch()));
    }

    #[test]
    fn calls_are_queued_not_executed() {
        let (client, fs) = setup();
        let mut tx = fs.start_transaction("repo", TransactionOptions::default()).unwrap();
        client.reset_calls();
        tx.put("a.txt", b"a").unwrap();
        let c = tx.commit("add a", None);
        tx.tag(&c, "v1").unwrap();
        assert_eq!(tx.len(), 3);
        assert!(!c.is_available());
        assert_eq!(client.total_calls(), 0);
        tx.discard().unwrap();
    }

    #[test]
    fn named_branch_is_kept_and_not_merged() {
        let (client, fs) = setup();
        let opts = TransactionOptions {
            branch_name: Some("work".into()),
            ..TransactionOptions::default()
        };
        let tx = {
            let mut tx = fs.start_transaction("repo", opts).unwrap();
            tx.put("a.txt", b"a").unwrap();
            tx.commit("add a", None);
            tx
        };
        let report = tx.complete().unwrap();
        assert!(!report.ephemeral);
        assert!(report.merge.is_none());
        assert!(!report.deleted_branch);
        assert!(client.get_branch("repo", "work").is_ok());
        assert_eq!(client.call_count("merge"), 0);
    }

    #[test]
    fn uncommitted_writes_on_persisted_branch_warn() {
        let (_, fs) = setup();
        let opts = TransactionOptions {
            branch_name: Some("work".into()),
            ..TransactionOptions::default()
        };
        let mut tx = fs.start_transaction("repo", opts).unwrap();
        tx.put("a.txt", b"a").unwrap();
        let report = tx.complete().unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("remain staged"));
        assert!(fs.exists("repo/work/a.txt").unwrap());
    }

    #[test]
    fn delete_always_removes_branch_on_discard() {
        let (client, fs) = setup();
        let opts = TransactionOptions {
            delete: DeletePolicy::Always,
            ..TransactionOptions::default()
        };
        let tx = fs.start_transaction("repo", opts).unwrap();
        let branch = tx.branch().to_string();
        tx.discard().unwrap();
        assert!(client.get_branch("repo", &branch).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_never_keeps_ephemeral_branch() {
        let (client, fs) = setup();
        let opts = TransactionOptions {
            delete: DeletePolicy::Never,
            ..TransactionOptions::default()
        };
        let mut tx = fs.start_transaction("repo", opts).unwrap();
        tx.put("a.txt", b"a").unwrap();
        tx.commit("add a", None);
        let branch = tx.branch().to_string();
        let report = tx.complete().unwrap();
        assert!(!report.deleted_branch);
        assert!(client.get_branch("repo", &branch).is_ok());
    }

    #[test]
    fn drop_discards_open_transaction() {
        let (client, fs) = setup();
        {
            let mut tx = fs.start_transaction("repo", TransactionOptions::default()).unwrap();
            tx.put("a.txt", b"a").unwrap();
        }
        assert_eq!(client.call_count("upload_object"), 0);
    }

    #[test]
    fn invalid_names_fail_before_any_call() {
        let (client, fs) = setup();
        let opts = TransactionOptions {
            branch_name: Some("bad~name".into()),
            ..TransactionOptions::default()
        };
        assert!(matches!(
            fs.start_transaction("repo", opts),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            fs.start_transaction("Repo", TransactionOptions::default()),
            Err(Error::InvalidPath(_))
        ));
        assert_eq!(client.total_calls(), 0);
    }

    #[test]
    fn revert_rejects_parent_zero() {
        let (_, fs) = setup();
        let mut tx = fs.start_transaction("repo", TransactionOptions::default()).unwrap();
        assert!(matches!(tx.revert("main", 0), Err(Error::InvalidPath(_))));
    }
}
