//! Async façade over [`LakeFs`].
//!
//! Every call runs the blocking operation on tokio's blocking pool, with at
//! most `max_workers` in flight per instance. Semantics, cache, and hooks are
//! those of the wrapped [`LakeFs`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::fs::LakeFs;
use crate::transaction::{Transaction, TransactionOptions, TransactionReport};
use crate::types::{GetOptions, ListOptions, ObjectInfo, PutOptions, RmOptions};

pub const DEFAULT_MAX_WORKERS: usize = 8;

#[derive(Debug, Clone)]
pub struct AsyncLakeFs {
    fs: LakeFs,
    permits: Arc<Semaphore>,
}

impl AsyncLakeFs {
    pub fn new(fs: LakeFs) -> Self {
        Self::with_max_workers(fs, DEFAULT_MAX_WORKERS)
    }

    pub fn with_max_workers(fs: LakeFs, max_workers: usize) -> Self {
        Self {
            fs,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// The wrapped blocking file system.
    pub fn blocking(&self) -> &LakeFs {
        &self.fs
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&LakeFs) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        let fs = self.fs.clone();
        tokio::task::spawn_blocking(move || f(&fs))
            .await
            .map_err(|e| Error::backend(format!("worker task failed: {}", e)))?
    }

    pub async fn ls(&self, path: &str, opts: ListOptions) -> Result<Vec<ObjectInfo>> {
        let path = path.to_string();
        self.run(move |fs| fs.ls(&path, &opts)).await
    }

    pub async fn info(&self, path: &str) -> Result<ObjectInfo> {
        let path = path.to_string();
        self.run(move |fs| fs.info(&path)).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.run(move |fs| fs.exists(&path)).await
    }

    pub async fn checksum(&self, path: &str) -> Result<Option<String>> {
        let path = path.to_string();
        self.run(move |fs| fs.checksum(&path)).await
    }

    pub async fn cat(&self, path: &str) -> Result<Vec<u8>> {
        let path = path.to_string();
        self.run(move |fs| fs.cat(&path)).await
    }

    pub async fn put(&self, path: &str, data: Vec<u8>) -> Result<ObjectInfo> {
        let path = path.to_string();
        self.run(move |fs| fs.put(&path, &data)).await
    }

    pub async fn put_file(&self, lpath: impl Into<PathBuf>, rpath: &str, opts: PutOptions) -> Result<bool> {
        let (lpath, rpath) = (lpath.into(), rpath.to_string());
        self.run(move |fs| fs.put_file(&lpath, &rpath, &opts)).await
    }

    pub async fn get_file(&self, rpath: &str, lpath: impl Into<PathBuf>, opts: GetOptions) -> Result<()> {
        let (rpath, lpath) = (rpath.to_string(), lpath.into());
        self.run(move |fs| fs.get_file(&rpath, &lpath, &opts)).await
    }

    pub async fn rm_file(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.run(move |fs| fs.rm_file(&path)).await
    }

    pub async fn rm(&self, path: &str, opts: RmOptions) -> Result<()> {
        let path = path.to_string();
        self.run(move |fs| fs.rm(&path, &opts)).await
    }

    pub async fn cp_file(&self, path1: &str, path2: &str) -> Result<ObjectInfo> {
        let (path1, path2) = (path1.to_string(), path2.to_string());
        self.run(move |fs| fs.cp_file(&path1, &path2)).await
    }

    /// Run a whole transaction, body and completion, on one worker.
    pub async fn transaction<T, F>(
        &self,
        repository: &str,
        options: TransactionOptions,
        f: F,
    ) -> Result<(T, TransactionReport)>
    where
        F: FnOnce(&mut Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let repository = repository.to_string();
        self.run(move |fs| fs.transaction(&repository, options, f)).await
    }
}
