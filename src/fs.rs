use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use crate::cache::{dir_key, DirCache};
use crate::client::VersioningClient;
use crate::error::{Error, Result};
use crate::fileobj::FileWriter;
use crate::helpers::{self, depaginate, file_checksum};
use crate::hooks::{FsEvent, HookContext, HookRegistry};
use crate::paths::{self, parent_dir, ResourcePath};
use crate::transaction::{Transaction, TransactionOptions, TransactionReport};
use crate::types::{
    FsOptions, GetOptions, ListOptions, ObjectInfo, ObjectStat, ObjectType, PutOptions, RmOptions,
};

/// Internal state shared via `Arc`.
pub(crate) struct LakeFsInner {
    pub(crate) client: Arc<dyn VersioningClient>,
    pub(crate) cache: DirCache,
    pub(crate) hooks: HookRegistry,
    pub(crate) options: FsOptions,
}

// ---------------------------------------------------------------------------
// LakeFs
// ---------------------------------------------------------------------------

/// Path-based file system over a versioned object store.
///
/// Paths have the form `repository/ref/resource`, optionally prefixed with
/// `lakefs://`. Each instance owns its directory cache and hook registry.
///
/// Cheap to clone (`Arc` internally). No lifetime parameter: can be stored
/// in structs, returned from functions, sent across threads.
#[derive(Clone)]
pub struct LakeFs {
    pub(crate) inner: Arc<LakeFsInner>,
}

impl fmt::Debug for LakeFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LakeFs")
            .field("options", &self.inner.options)
            .field("cached_dirs", &self.inner.cache.len())
            .field("hooks", &self.inner.hooks)
            .finish()
    }
}

impl LakeFs {
    pub fn new(client: impl VersioningClient + 'static, options: FsOptions) -> Self {
        Self::from_arc(Arc::new(client), options)
    }

    /// Build from a client shared with other owners.
    pub fn from_arc(client: Arc<dyn VersioningClient>, options: FsOptions) -> Self {
        LakeFs {
            inner: Arc::new(LakeFsInner {
                client,
                cache: DirCache::new(),
                hooks: HookRegistry::new(),
                options,
            }),
        }
    }

    pub fn client(&self) -> &dyn VersioningClient {
        self.inner.client.as_ref()
    }

    pub fn cache(&self) -> &DirCache {
        &self.inner.cache
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    pub fn options(&self) -> &FsOptions {
        &self.inner.options
    }

    fn fire(&self, event: FsEvent, rp: &ResourcePath, resource: &str) -> Result<()> {
        let ctx = HookContext::new(&rp.repository, &rp.reference, resource);
        let ran = self.inner.hooks.invoke(event, self.client(), &ctx)?;
        // a write hook may have committed and moved the branch head
        if ran && event.modifies_files() {
            self.inner
                .cache
                .invalidate_ref(&rp.repository, &rp.reference);
        }
        Ok(())
    }

    // -- Listing and metadata -----------------------------------------------

    /// List the entries directly under a directory.
    ///
    /// Served from the directory cache unless `opts.refresh` is set. A path
    /// naming a single object lists just that object.
    pub fn ls(&self, path: &str, opts: &ListOptions) -> Result<Vec<ObjectInfo>> {
        let rp = paths::parse(path)?;
        let resource = rp.normalized_resource()?;
        let entries = self.ls_inner(&rp, &resource, opts.refresh)?;
        self.fire(FsEvent::Ls, &rp, &resource)?;
        Ok(entries)
    }

    fn ls_inner(&self, rp: &ResourcePath, resource: &str, refresh: bool) -> Result<Vec<ObjectInfo>> {
        let key = dir_key(&rp.repository, &rp.reference, resource);
        if !refresh {
            if let Some(hit) = self.inner.cache.lookup(&key) {
                log::debug!("directory cache hit for {}", key);
                return Ok(hit.as_ref().clone());
            }
        }

        let prefix = if resource.is_empty() {
            String::new()
        } else {
            format!("{}/", resource)
        };
        let page_size = self.inner.options.list_page_size;
        let stats = depaginate(|after| {
            self.client().list_objects(
                &rp.repository,
                &rp.reference,
                &prefix,
                Some("/"),
                after,
                page_size,
            )
        })?;
        let entries: Vec<ObjectInfo> = stats
            .into_iter()
            .map(|s| ObjectInfo::from_stat(&rp.repository, &rp.reference, s))
            .collect();

        if entries.is_empty() {
            self.inner.cache.invalidate(&key);
            if !resource.is_empty() {
                match self.stat(rp, resource) {
                    Ok(info) => return Ok(vec![info]),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            return Ok(entries);
        }

        Ok(self.inner.cache.populate(key, entries).as_ref().clone())
    }

    fn stat(&self, rp: &ResourcePath, resource: &str) -> Result<ObjectInfo> {
        let stat = self
            .client()
            .stat_object(&rp.repository, &rp.reference, resource)?;
        Ok(ObjectInfo::from_stat(&rp.repository, &rp.reference, stat))
    }

    /// Metadata for a file or directory.
    ///
    /// A directory's size is the sum of the sizes of its direct children.
    ///
    /// # Errors
    /// [`Error::NotFound`] if neither an object nor a non-empty directory
    /// exists at `path`.
    pub fn info(&self, path: &str) -> Result<ObjectInfo> {
        let rp = paths::parse(path)?;
        let resource = rp.normalized_resource()?;
        let info = self.info_inner(&rp, &resource)?;
        self.fire(FsEvent::Info, &rp, &resource)?;
        Ok(info)
    }

    fn info_inner(&self, rp: &ResourcePath, resource: &str) -> Result<ObjectInfo> {
        if !resource.is_empty() {
            match self.stat(rp, resource) {
                Ok(info) => return Ok(info),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let children = self.ls_inner(rp, resource, false)?;
        let name = paths::join(&rp.repository, &rp.reference, resource);
        if children.is_empty() && !resource.is_empty() {
            return Err(Error::not_found(name));
        }
        Ok(ObjectInfo {
            name,
            object_type: ObjectType::Directory,
            size: children.iter().map(|c| c.size).sum(),
            checksum: None,
            content_type: None,
            mtime: None,
            metadata: None,
        })
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        let rp = paths::parse(path)?;
        let resource = rp.normalized_resource()?;
        let found = match self.info_inner(&rp, &resource) {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };
        self.fire(FsEvent::Exists, &rp, &resource)?;
        Ok(found)
    }

    /// The checksum of the object at `path`, or `None` for directories and
    /// missing paths.
    pub fn checksum(&self, path: &str) -> Result<Option<String>> {
        let rp = paths::parse(path)?;
        let resource = rp.normalized_resource()?;
        let checksum = self.checksum_inner(&rp, &resource)?;
        self.fire(FsEvent::Checksum, &rp, &resource)?;
        Ok(checksum)
    }

    fn checksum_inner(&self, rp: &ResourcePath, resource: &str) -> Result<Option<String>> {
        match self.info_inner(rp, resource) {
            Ok(info) => Ok(info.checksum),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    // -- Read ---------------------------------------------------------------

    /// Read the whole object at `path`.
    pub fn cat(&self, path: &str) -> Result<Vec<u8>> {
        self.read(path, None)
    }

    /// Read `range` bytes of the object at `path`.
    pub fn cat_range(&self, path: &str, range: Range<u64>) -> Result<Vec<u8>> {
        self.read(path, Some(range))
    }

    fn read(&self, path: &str, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        let rp = paths::parse(path)?;
        let resource = object_resource(&rp)?;
        let data = self
            .client()
            .get_object(&rp.repository, &rp.reference, &resource, range)?;
        self.fire(FsEvent::Get, &rp, &resource)?;
        Ok(data)
    }

    /// Download the object at `rpath` to the local file `lpath`.
    ///
    /// With `opts.precheck`, an existing local file whose checksum matches
    /// the remote one is left untouched.
    pub fn get_file(&self, rpath: &str, lpath: &Path, opts: &GetOptions) -> Result<()> {
        let rp = paths::parse(rpath)?;
        let resource = object_resource(&rp)?;

        let mut skipped = false;
        if opts.precheck && lpath.is_file() {
            let local = file_checksum(lpath, self.inner.options.blocksize)?;
            if self.checksum_inner(&rp, &resource)?.as_deref() == Some(local.as_str()) {
                log::info!(
                    "skipping download of {} to {}: checksums match",
                    rpath,
                    lpath.display()
                );
                skipped = true;
            }
        }

        if !skipped {
            let data = self
                .client()
                .get_object(&rp.repository, &rp.reference, &resource, None)?;
            if let Some(parent) = lpath.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            std::fs::write(lpath, data).map_err(|e| Error::io(lpath, e))?;
        }

        self.fire(FsEvent::GetFile, &rp, &resource)
    }

    // -- Write --------------------------------------------------------------

    /// Upload `data` to `path`, returning the new object's metadata.
    pub fn put(&self, path: &str, data: &[u8]) -> Result<ObjectInfo> {
        let rp = paths::parse(path)?;
        let resource = object_resource(&rp)?;
        paths::validate_ref_name(&rp.reference)?;
        let stat = self.upload(&rp.repository, &rp.reference, &resource, data)?;
        self.fire(FsEvent::Put, &rp, &resource)?;
        Ok(ObjectInfo::from_stat(&rp.repository, &rp.reference, stat))
    }

    /// Upload the local file `lpath` to `rpath`.
    ///
    /// With `opts.precheck`, the upload is skipped when the remote object's
    /// checksum already matches the local file. Returns whether an upload
    /// happened.
    pub fn put_file(&self, lpath: &Path, rpath: &str, opts: &PutOptions) -> Result<bool> {
        let rp = paths::parse(rpath)?;
        let resource = object_resource(&rp)?;
        paths::validate_ref_name(&rp.reference)?;

        if opts.precheck {
            let local = file_checksum(lpath, self.inner.options.blocksize)?;
            if self.checksum_inner(&rp, &resource)?.as_deref() == Some(local.as_str()) {
                log::info!(
                    "skipping upload of {} to {}: checksums match",
                    lpath.display(),
                    rpath
                );
                self.fire(FsEvent::PutFile, &rp, &resource)?;
                return Ok(false);
            }
        }

        let data = std::fs::read(lpath).map_err(|e| Error::io(lpath, e))?;
        self.upload(&rp.repository, &rp.reference, &resource, &data)?;
        self.fire(FsEvent::PutFile, &rp, &resource)?;
        Ok(true)
    }

    /// Open a buffered writer that uploads to `path` on close.
    pub fn writer(&self, path: &str) -> Result<FileWriter> {
        let rp = paths::parse(path)?;
        object_resource(&rp)?;
        paths::validate_ref_name(&rp.reference)?;
        Ok(FileWriter::new(self.clone(), path.to_string()))
    }

    /// Copy an object to another path in the same repository.
    ///
    /// # Errors
    /// [`Error::InvalidPath`] when the repositories differ.
    pub fn cp_file(&self, path1: &str, path2: &str) -> Result<ObjectInfo> {
        let src = paths::parse(path1)?;
        let dest = paths::parse(path2)?;
        if src.repository != dest.repository {
            return Err(Error::invalid_path(format!(
                "can only copy objects within a repository, got {:?} and {:?}",
                src.repository, dest.repository
            )));
        }
        let src_resource = object_resource(&src)?;
        let dest_resource = object_resource(&dest)?;
        paths::validate_ref_name(&dest.reference)?;

        self.ensure_branch(&dest.repository, &dest.reference)?;
        let stat = self.client().copy_object(
            &src.repository,
            &src.reference,
            &src_resource,
            &dest.reference,
            &dest_resource,
        )?;
        self.inner.cache.invalidate_with_ancestors(
            &dest.repository,
            &dest.reference,
            parent_dir(&dest_resource),
        );
        Ok(ObjectInfo::from_stat(&dest.repository, &dest.reference, stat))
    }

    // -- Delete -------------------------------------------------------------

    /// Delete a single object.
    pub fn rm_file(&self, path: &str) -> Result<()> {
        let rp = paths::parse(path)?;
        let resource = object_resource(&rp)?;
        paths::validate_ref_name(&rp.reference)?;
        self.delete(&rp.repository, &rp.reference, &resource)?;
        self.fire(FsEvent::RmFile, &rp, &resource)
    }

    /// Delete an object, or with `opts.recursive` everything under a
    /// directory.
    ///
    /// # Errors
    /// [`Error::IsADirectory`] for a directory without `recursive`.
    pub fn rm(&self, path: &str, opts: &RmOptions) -> Result<()> {
        let rp = paths::parse(path)?;
        let resource = rp.normalized_resource()?;
        paths::validate_ref_name(&rp.reference)?;

        let info = self.info_inner(&rp, &resource)?;
        if info.is_file() {
            self.delete(&rp.repository, &rp.reference, &resource)?;
        } else {
            if !opts.recursive {
                return Err(Error::is_a_directory(info.name));
            }
            let prefix = if resource.is_empty() {
                String::new()
            } else {
                format!("{}/", resource)
            };
            let page_size = self.inner.options.list_page_size;
            let objects: Vec<ObjectStat> = depaginate(|after| {
                self.client().list_objects(
                    &rp.repository,
                    &rp.reference,
                    &prefix,
                    None,
                    after,
                    page_size,
                )
            })?;
            for obj in objects {
                self.delete(&rp.repository, &rp.reference, &obj.path)?;
            }
        }

        self.fire(FsEvent::Rm, &rp, &resource)
    }

    // -- Transactions -------------------------------------------------------

    /// Open a transaction on `repository` that the caller completes or
    /// discards explicitly.
    pub fn start_transaction(
        &self,
        repository: &str,
        options: TransactionOptions,
    ) -> Result<Transaction> {
        Transaction::begin(self.clone(), repository, options)
    }

    /// Run `f` inside a transaction.
    ///
    /// If `f` returns `Ok`, the queued work is executed in order and the
    /// closure's value is returned with the completion report. If `f` fails,
    /// buffered writes are discarded, no queued call runs, and the error is
    /// returned wrapped in [`Error::TransactionAborted`].
    pub fn transaction<T, F>(
        &self,
        repository: &str,
        options: TransactionOptions,
        f: F,
    ) -> Result<(T, TransactionReport)>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut tx = self.start_transaction(repository, options)?;
        match f(&mut tx) {
            Ok(value) => {
                let report = tx.complete()?;
                Ok((value, report))
            }
            Err(e) => {
                if let Err(cleanup) = tx.discard() {
                    log::warn!("cleanup after aborted transaction failed: {}", cleanup);
                }
                Err(Error::transaction_aborted(e))
            }
        }
    }

    // -- Internal single-file operations ------------------------------------

    fn ensure_branch(&self, repository: &str, branch: &str) -> Result<()> {
        if self.inner.options.create_branch_ok {
            helpers::create_branch(
                self.client(),
                repository,
                branch,
                &self.inner.options.source_branch,
                true,
            )?;
        }
        Ok(())
    }

    /// Upload without firing hooks, invalidating the parent directory and
    /// its ancestors at `repository/branch`.
    pub(crate) fn upload(
        &self,
        repository: &str,
        branch: &str,
        resource: &str,
        data: &[u8],
    ) -> Result<ObjectStat> {
        self.ensure_branch(repository, branch)?;
        let stat = self
            .client()
            .upload_object(repository, branch, resource, data)?;
        self.inner
            .cache
            .invalidate_with_ancestors(repository, branch, parent_dir(resource));
        Ok(stat)
    }

    fn delete(&self, repository: &str, branch: &str, resource: &str) -> Result<()> {
        self.client().delete_object(repository, branch, resource)?;
        self.inner
            .cache
            .invalidate_with_ancestors(repository, branch, parent_dir(resource));
        Ok(())
    }
}

/// The normalized resource of a path that must name an object.
fn object_resource(rp: &ResourcePath) -> Result<String> {
    let resource = rp.normalized_resource()?;
    if resource.is_empty() {
        return Err(Error::invalid_path(format!(
            "{} does not name an object",
            rp
        )));
    }
    Ok(resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;

    fn setup() -> (MemoryClient, LakeFs) {
        let client = MemoryClient::with_repository("repo", "main").unwrap();
        let fs = LakeFs::new(client.clone(), FsOptions::default());
        (client, fs)
    }

    #[test]
    fn put_then_cat() {
        let (_, fs) = setup();
        let info = fs.put("repo/main/dir/a.txt", b"hello").unwrap();
        assert_eq!(info.name, "repo/main/dir/a.txt");
        assert_eq!(info.size, 5);
        assert_eq!(fs.cat("repo/main/dir/a.txt").unwrap(), b"hello");
        assert_eq!(fs.cat_range("repo/main/dir/a.txt", 1..3).unwrap(), b"el");
    }

    #[test]
    fn ls_names_are_fully_qualified() {
        let (_, fs) = setup();
        fs.put("repo/main/dir/a.txt", b"a").unwrap();
        fs.put("repo/main/dir/sub/b.txt", b"b").unwrap();
        let names: Vec<_> = fs
            .ls("repo/main/dir", &ListOptions::default())
            .unwrap()
            .into_iter()
            .map(|i| (i.name, i.object_type))
            .collect();
        assert_eq!(
            names,
            vec![
                ("repo/main/dir/a.txt".to_string(), ObjectType::File),
                ("repo/main/dir/sub".to_string(), ObjectType::Directory),
            ]
        );
    }

    #[test]
    fn ls_of_file_lists_the_file() {
        let (_, fs) = setup();
        fs.put("repo/main/a.txt", b"a").unwrap();
        let entries = fs.ls("repo/main/a.txt", &ListOptions::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_file());
    }

    #[test]
    fn empty_listing_is_not_cached() {
        let (client, fs) = setup();
        assert!(fs.ls("repo/main/nothing", &ListOptions::default()).unwrap().is_empty());
        assert!(fs.cache().is_empty());
        fs.ls("repo/main/nothing", &ListOptions::default()).unwrap();
        assert_eq!(client.call_count("list_objects"), 2);
    }

    #[test]
    fn info_sums_directory_sizes() {
        let (_, fs) = setup();
        fs.put("repo/main/d/a", b"123").unwrap();
        fs.put("repo/main/d/b", b"45").unwrap();
        let info = fs.info("repo/main/d").unwrap();
        assert!(info.is_dir());
        assert_eq!(info.size, 5);
        assert_eq!(info.name, "repo/main/d");
    }

    #[test]
    fn exists_and_checksum() {
        let (_, fs) = setup();
        fs.put("repo/main/a.txt", b"a").unwrap();
        assert!(fs.exists("repo/main/a.txt").unwrap());
        assert!(!fs.exists("repo/main/b.txt").unwrap());
        assert_eq!(
            fs.checksum("repo/main/a.txt").unwrap(),
            Some(helpers::content_checksum(b"a"))
        );
        assert_eq!(fs.checksum("repo/main/b.txt").unwrap(), None);
    }

    #[test]
    fn put_creates_missing_branch() {
        let (client, fs) = setup();
        fs.put("repo/feature/a.txt", b"a").unwrap();
        assert!(client.get_branch("repo", "feature").is_ok());
        assert!(!fs.exists("repo/main/a.txt").unwrap());
    }

    #[test]
    fn put_without_branch_creation_fails_on_missing_branch() {
        let client = MemoryClient::with_repository("repo", "main").unwrap();
        let fs = LakeFs::new(
            client,
            FsOptions {
                create_branch_ok: false,
                ..FsOptions::default()
            },
        );
        assert!(fs.put("repo/feature/a.txt", b"a").unwrap_err().is_not_found());
    }

    #[test]
    fn writes_to_relative_refs_are_rejected() {
        let (client, fs) = setup();
        assert!(matches!(
            fs.put("repo/main~1/a.txt", b"a"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(fs.put("repo/main@/a.txt", b"a"), Err(Error::InvalidPath(_))));
        assert_eq!(client.total_calls(), 0);
    }

    #[test]
    fn rm_directory_requires_recursive() {
        let (_, fs) = setup();
        fs.put("repo/main/d/a", b"1").unwrap();
        fs.put("repo/main/d/sub/b", b"2").unwrap();
        assert!(matches!(
            fs.rm("repo/main/d", &RmOptions::default()),
            Err(Error::IsADirectory(_))
        ));
        fs.rm("repo/main/d", &RmOptions { recursive: true }).unwrap();
        assert!(!fs.exists("repo/main/d").unwrap());
    }

    #[test]
    fn cp_file_within_repository() {
        let (_, fs) = setup();
        fs.put("repo/main/a.txt", b"a").unwrap();
        fs.cp_file("repo/main/a.txt", "repo/main/copy/a.txt").unwrap();
        assert_eq!(fs.cat("repo/main/copy/a.txt").unwrap(), b"a");
        assert!(matches!(
            fs.cp_file("repo/main/a.txt", "other/main/a.txt"),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn cat_of_missing_object_is_not_found() {
        let (_, fs) = setup();
        assert!(fs.cat("repo/main/ghost").unwrap_err().is_not_found());
    }
}
