//! Post-operation callbacks keyed by file system event.
//!
//! At most one hook is registered per [`FsEvent`]. Hooks run synchronously
//! after the corresponding [`LakeFs`](crate::LakeFs) operation succeeds and
//! receive the client plus the `(repository, ref, resource)` the operation
//! touched. A hook error is returned to the caller of the operation.
//!
//! ```
//! use lakefs_spec::hooks::{commit_on_change, FsEvent};
//! use lakefs_spec::{LakeFs, FsOptions, MemoryClient};
//!
//! let client = MemoryClient::with_repository("repo", "main").unwrap();
//! let fs = LakeFs::new(client, FsOptions::default());
//! fs.hooks().register(FsEvent::Put, commit_on_change(FsEvent::Put).unwrap()).unwrap();
//! fs.put("repo/main/a.txt", b"a").unwrap();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::client::VersioningClient;
use crate::error::{Error, Result};
use crate::helpers;
use crate::paths;
use crate::types::Metadata;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FsEvent {
    Checksum,
    Exists,
    Get,
    GetFile,
    Info,
    Ls,
    Put,
    PutFile,
    Rm,
    RmFile,
}

impl FsEvent {
    pub const ALL: [FsEvent; 10] = [
        FsEvent::Checksum,
        FsEvent::Exists,
        FsEvent::Get,
        FsEvent::GetFile,
        FsEvent::Info,
        FsEvent::Ls,
        FsEvent::Put,
        FsEvent::PutFile,
        FsEvent::Rm,
        FsEvent::RmFile,
    ];

    /// Whether the event follows a write or delete.
    pub fn modifies_files(self) -> bool {
        matches!(
            self,
            FsEvent::Put | FsEvent::PutFile | FsEvent::Rm | FsEvent::RmFile
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FsEvent::Checksum => "checksum",
            FsEvent::Exists => "exists",
            FsEvent::Get => "get",
            FsEvent::GetFile => "get_file",
            FsEvent::Info => "info",
            FsEvent::Ls => "ls",
            FsEvent::Put => "put",
            FsEvent::PutFile => "put_file",
            FsEvent::Rm => "rm",
            FsEvent::RmFile => "rm_file",
        }
    }

    /// Parse an event name, ignoring ASCII case.
    ///
    /// # Errors
    /// [`Error::UnknownEvent`] for names outside the fixed set.
    pub fn canonicalize(name: &str) -> Result<FsEvent> {
        FsEvent::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::UnknownEvent(name.to_string()))
    }
}

impl fmt::Display for FsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FsEvent::canonicalize(s)
    }
}

// ---------------------------------------------------------------------------
// Context and hook type
// ---------------------------------------------------------------------------

/// What a completed operation touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub repository: String,
    pub reference: String,
    pub resource: String,
}

impl HookContext {
    pub fn new(
        repository: impl Into<String>,
        reference: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            reference: reference.into(),
            resource: resource.into(),
        }
    }

    pub fn from_path(path: &str) -> Result<Self> {
        let rp = paths::parse(path)?;
        Ok(Self::new(rp.repository, rp.reference, rp.resource))
    }
}

pub type Hook = Arc<dyn Fn(&dyn VersioningClient, &HookContext) -> Result<()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Per-instance event → hook mapping.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<FsEvent, Hook>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        let mut events: Vec<_> = hooks.keys().map(|e| e.as_str()).collect();
        events.sort_unstable();
        f.debug_struct("HookRegistry").field("events", &events).finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` for `event`.
    ///
    /// # Errors
    /// [`Error::HookRegistered`] if `event` already has a hook.
    pub fn register(&self, event: FsEvent, hook: Hook) -> Result<()> {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        if hooks.contains_key(&event) {
            return Err(Error::HookRegistered(event.to_string()));
        }
        hooks.insert(event, hook);
        Ok(())
    }

    /// Register a plain closure for `event`.
    pub fn register_fn<F>(&self, event: FsEvent, hook: F) -> Result<()>
    where
        F: Fn(&dyn VersioningClient, &HookContext) -> Result<()> + Send + Sync + 'static,
    {
        self.register(event, Arc::new(hook))
    }

    /// Remove the hook for `event`. Returns `false` if none was registered.
    pub fn deregister(&self, event: FsEvent) -> bool {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&event)
            .is_some()
    }

    pub fn is_registered(&self, event: FsEvent) -> bool {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&event)
    }

    /// Call the hook for `event`, if any. Returns whether a hook ran.
    ///
    /// The registry lock is released before the hook runs, so a hook may
    /// itself register or deregister hooks.
    pub fn invoke(
        &self,
        event: FsEvent,
        client: &dyn VersioningClient,
        ctx: &HookContext,
    ) -> Result<bool> {
        let hook = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .cloned();
        match hook {
            Some(hook) => {
                log::debug!(
                    "running {} hook for {}/{}/{}",
                    event,
                    ctx.repository,
                    ctx.reference,
                    ctx.resource
                );
                hook(client, ctx)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Hide every registration until the returned guard is dropped.
    ///
    /// The guard restores the exact snapshot taken here, discarding anything
    /// registered while suspended. Guards nest.
    pub fn suspend(&self) -> HooksSuspended<'_> {
        let snapshot = std::mem::take(&mut *self.hooks.write().unwrap_or_else(PoisonError::into_inner));
        HooksSuspended {
            registry: self,
            snapshot: Some(snapshot),
        }
    }

    /// Run `f` with all hooks suspended.
    pub fn without_hooks<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.suspend();
        f()
    }
}

/// Guard returned by [`HookRegistry::suspend`].
#[must_use = "hooks are restored as soon as the guard is dropped"]
pub struct HooksSuspended<'a> {
    registry: &'a HookRegistry,
    snapshot: Option<HashMap<FsEvent, Hook>>,
}

impl Drop for HooksSuspended<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self
                .registry
                .hooks
                .write()
                .unwrap_or_else(PoisonError::into_inner) = snapshot;
        }
    }
}

// ---------------------------------------------------------------------------
// Ready-made hooks
// ---------------------------------------------------------------------------

/// A hook committing the branch after a write or delete.
///
/// Messages are `Add file {resource}` for `put`/`put_file` and
/// `Remove file {resource}` for `rm`/`rm_file`. Without staged changes the
/// commit is skipped with a warning.
///
/// # Errors
/// [`Error::Internal`] for events that do not modify files.
pub fn commit_on_change(event: FsEvent) -> Result<Hook> {
    let action = match event {
        FsEvent::Put | FsEvent::PutFile => "Add",
        FsEvent::Rm | FsEvent::RmFile => "Remove",
        other => {
            return Err(Error::internal(format!(
                "cannot auto-commit on '{}' events",
                other
            )))
        }
    };
    Ok(Arc::new(move |client: &dyn VersioningClient, ctx: &HookContext| {
        let message = format!("{} file {}", action, ctx.resource);
        helpers::commit(
            client,
            &ctx.repository,
            &ctx.reference,
            &message,
            &Metadata::new(),
        )?;
        Ok(())
    }))
}
