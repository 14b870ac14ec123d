//! The ordered log of deferred transaction work.
//!
//! Entries are either buffered file writes or versioning calls. A versioning
//! call binds its arguments when it is queued; arguments that depend on an
//! earlier call's result are held as [`RefArg::Commit`] placeholders and
//! substituted immediately before the call executes.

use std::collections::VecDeque;

use crate::client::VersioningClient;
use crate::error::{Error, Result};
use crate::fs::LakeFs;
use crate::helpers;
use crate::placeholder::Placeholder;
use crate::types::{Commit, Metadata, Ref};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// A ref argument: either known now or produced by an earlier queued call.
#[derive(Debug, Clone)]
pub enum RefArg {
    Name(String),
    Commit(Placeholder<Commit>),
}

impl RefArg {
    /// Substitute the argument's concrete value.
    ///
    /// # Errors
    /// [`Error::DanglingPlaceholder`] naming `op` if the placeholder was never
    /// fulfilled.
    pub fn resolve(&self, op: &str) -> Result<String> {
        match self {
            RefArg::Name(name) => Ok(name.clone()),
            RefArg::Commit(p) => p
                .get()
                .map(|c| c.id.clone())
                .map_err(|_| Error::DanglingPlaceholder(op.to_string())),
        }
    }
}

impl From<&str> for RefArg {
    fn from(s: &str) -> Self {
        RefArg::Name(s.to_string())
    }
}

impl From<String> for RefArg {
    fn from(s: String) -> Self {
        RefArg::Name(s)
    }
}

impl From<Placeholder<Commit>> for RefArg {
    fn from(p: Placeholder<Commit>) -> Self {
        RefArg::Commit(p)
    }
}

impl From<&Placeholder<Commit>> for RefArg {
    fn from(p: &Placeholder<Commit>) -> Self {
        RefArg::Commit(p.clone())
    }
}

// ---------------------------------------------------------------------------
// Versioning calls
// ---------------------------------------------------------------------------

/// A versioning operation with its bound arguments.
#[derive(Debug, Clone)]
pub enum VersioningOp {
    Commit {
        branch: String,
        message: String,
        metadata: Metadata,
    },
    CreateBranch {
        name: String,
        source: RefArg,
        exist_ok: bool,
    },
    Merge {
        source: RefArg,
        into: String,
    },
    Revert {
        branch: String,
        parent_number: usize,
    },
    RevParse {
        reference: RefArg,
        parent: usize,
    },
    Tag {
        reference: RefArg,
        name: String,
    },
}

/// What a versioning operation produced.
#[derive(Debug, Clone)]
pub enum OpOutput {
    Commit(Commit),
    Branch(String),
    Tag(Ref),
}

impl VersioningOp {
    pub fn name(&self) -> &'static str {
        match self {
            VersioningOp::Commit { .. } => "commit",
            VersioningOp::CreateBranch { .. } => "create_branch",
            VersioningOp::Merge { .. } => "merge",
            VersioningOp::Revert { .. } => "revert",
            VersioningOp::RevParse { .. } => "rev_parse",
            VersioningOp::Tag { .. } => "tag",
        }
    }

    /// The branch whose head this operation moves, if any.
    pub fn moved_branch(&self) -> Option<&str> {
        match self {
            VersioningOp::Commit { branch, .. } | VersioningOp::Revert { branch, .. } => {
                Some(branch)
            }
            VersioningOp::Merge { into, .. } => Some(into),
            _ => None,
        }
    }

    /// Substitute placeholder arguments and run the operation.
    pub fn execute(&self, client: &dyn VersioningClient, repository: &str) -> Result<OpOutput> {
        let op = self.name();
        match self {
            VersioningOp::Commit {
                branch,
                message,
                metadata,
            } => helpers::commit(client, repository, branch, message, metadata).map(OpOutput::Commit),
            VersioningOp::CreateBranch {
                name,
                source,
                exist_ok,
            } => {
                let source = source.resolve(op)?;
                helpers::create_branch(client, repository, name, &source, *exist_ok)
                    .map(OpOutput::Branch)
            }
            VersioningOp::Merge { source, into } => {
                let source = source.resolve(op)?;
                helpers::merge(client, repository, &source, into).map(OpOutput::Commit)
            }
            VersioningOp::Revert {
                branch,
                parent_number,
            } => helpers::revert(client, repository, branch, *parent_number).map(OpOutput::Commit),
            VersioningOp::RevParse { reference, parent } => {
                let reference = reference.resolve(op)?;
                helpers::rev_parse(client, repository, &reference, *parent).map(OpOutput::Commit)
            }
            VersioningOp::Tag { reference, name } => {
                let reference = reference.resolve(op)?;
                helpers::create_tag(client, repository, &reference, name).map(OpOutput::Tag)
            }
        }
    }
}

/// Where a call's result goes once it has executed.
#[derive(Debug, Clone)]
pub enum ResultSlot {
    Commit(Placeholder<Commit>),
    Tag(Placeholder<Ref>),
}

impl ResultSlot {
    fn fill(&self, output: OpOutput) -> Result<()> {
        match (self, output) {
            (ResultSlot::Commit(p), OpOutput::Commit(c)) => p.fulfill(c),
            (ResultSlot::Tag(p), OpOutput::Tag(t)) => p.fulfill(t),
            (_, other) => Err(Error::internal(format!(
                "result {:?} does not match its placeholder",
                other
            ))),
        }
    }
}

/// A queued versioning call and the placeholder for its result.
#[derive(Debug, Clone)]
pub struct VersioningCall {
    pub repository: String,
    pub op: VersioningOp,
    pub result: Option<ResultSlot>,
}

impl VersioningCall {
    pub fn new(repository: impl Into<String>, op: VersioningOp) -> Self {
        Self {
            repository: repository.into(),
            op,
            result: None,
        }
    }

    pub fn with_result(mut self, slot: ResultSlot) -> Self {
        self.result = Some(slot);
        self
    }

    /// Run the call and fill its result placeholder.
    pub fn execute(&self, client: &dyn VersioningClient) -> Result<OpOutput> {
        let output = self.op.execute(client, &self.repository)?;
        if let Some(slot) = &self.result {
            slot.fill(output.clone())?;
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Buffered writes
// ---------------------------------------------------------------------------

/// File content held locally until the transaction completes.
#[derive(Debug, Clone)]
pub struct BufferedWrite {
    pub repository: String,
    pub branch: String,
    pub resource: String,
    pub data: Vec<u8>,
}

impl BufferedWrite {
    /// Upload the buffered content.
    pub fn commit(self, fs: &LakeFs) -> Result<()> {
        fs.upload(&self.repository, &self.branch, &self.resource, &self.data)?;
        Ok(())
    }

    /// Drop the buffered content without uploading.
    pub fn discard(self) {
        log::debug!(
            "discarding buffered write of {} bytes to {}/{}/{}",
            self.data.len(),
            self.repository,
            self.branch,
            self.resource
        );
    }
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum LogEntry {
    Write(BufferedWrite),
    Call(VersioningCall),
}

impl LogEntry {
    /// Short label used in log messages.
    pub fn describe(&self) -> String {
        match self {
            LogEntry::Write(w) => format!("write {}", w.resource),
            LogEntry::Call(c) => c.op.name().to_string(),
        }
    }
}

/// Append-only queue drained strictly from the head.
#[derive(Debug, Default)]
pub struct OperationLog {
    entries: VecDeque<LogEntry>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Pop entries from the head in insertion order.
    ///
    /// Entries not yet yielded when the iterator is dropped stay in the log.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { log: self }
    }
}

pub struct Drain<'a> {
    log: &'a mut OperationLog,
}

impl Iterator for Drain<'_> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        self.log.entries.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.log.entries.len();
        (n, Some(n))
    }
}
