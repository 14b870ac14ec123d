//! A transactional, path-based file system over a versioned object store.
//!
//! `lakefs-spec` addresses objects as `repository/ref/resource` (optionally
//! `lakefs://`-prefixed) and layers three things over a
//! [`VersioningClient`]: a per-instance directory cache, post-operation
//! hooks, and transactions that defer writes and versioning calls until they
//! complete.
//!
//! # Key types
//!
//! - [`LakeFs`]: the file system. `ls`, `info`, `exists`, `checksum`, `cat`,
//!   `put`, `put_file`, `get_file`, `rm`, `cp_file`, and transactions.
//! - [`Transaction`]: buffers writes and queues commits, branches, merges,
//!   reverts, ref resolutions, and tags; results come back as
//!   [`Placeholder`]s filled when the transaction completes.
//! - [`DirCache`]: directory listings keyed by `repository/ref/dir`.
//! - [`HookRegistry`]: one callback per [`FsEvent`], with scoped suspension.
//! - [`MemoryClient`]: an in-process versioned store.
//!
//! # Quick example
//!
//! ```rust
//! use lakefs_spec::{FsOptions, LakeFs, ListOptions, MemoryClient, TransactionOptions};
//!
//! let client = MemoryClient::with_repository("repo", "main").unwrap();
//! let fs = LakeFs::new(client, FsOptions::default());
//!
//! fs.put("repo/main/raw/a.csv", b"x,y\n1,2\n").unwrap();
//! let entries = fs.ls("repo/main/raw", &ListOptions::default()).unwrap();
//! assert_eq!(entries[0].name, "repo/main/raw/a.csv");
//!
//! let (_, report) = fs
//!     .transaction("repo", TransactionOptions::default(), |tx| {
//!         tx.put("clean/a.csv", b"x,y\n1,2\n")?;
//!         tx.commit("clean a", None);
//!         Ok(())
//!     })
//!     .unwrap();
//! assert!(report.merge.is_some());
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod fileobj;
pub mod fs;
pub mod helpers;
pub mod hooks;
pub mod memory;
pub mod oplog;
pub mod paths;
pub mod placeholder;
pub mod transaction;
pub mod types;

#[cfg(feature = "async")]
pub mod asyn;

// Re-export primary public types at crate root.
pub use cache::DirCache;
pub use client::VersioningClient;
pub use error::{Error, Result};
pub use fileobj::{FileWriter, TxWriter};
pub use fs::LakeFs;
pub use hooks::{FsEvent, Hook, HookContext, HookRegistry};
pub use memory::MemoryClient;
pub use oplog::RefArg;
pub use paths::{parse, RefExpr, ResourcePath};
pub use placeholder::Placeholder;
pub use transaction::{DeletePolicy, Transaction, TransactionOptions, TransactionReport};
pub use types::*;

#[cfg(feature = "async")]
pub use asyn::AsyncLakeFs;
