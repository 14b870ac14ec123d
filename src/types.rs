use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form key/value metadata attached to commits and objects.
pub type Metadata = BTreeMap<String, String>;

/// Default content type reported for uploads without one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// ---------------------------------------------------------------------------
// Commit / Ref
// ---------------------------------------------------------------------------

/// A commit in the versioned store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    /// Parent commit ids; the first entry is the first parent.
    pub parents: Vec<String>,
    pub message: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Seconds since the Unix epoch.
    pub creation_date: i64,
    pub committer: String,
}

impl Commit {
    /// Whether this commit has more than one parent.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// A named reference (branch or tag) and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub id: String,
    pub commit_id: String,
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Whether a listing entry is an object or a collapsed common prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    Object,
    CommonPrefix,
}

/// Metadata of a single object as reported by the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStat {
    pub path: String,
    pub path_type: PathType,
    pub checksum: String,
    pub size_bytes: u64,
    /// Seconds since the Unix epoch.
    pub mtime: i64,
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ObjectStat {
    /// A common-prefix entry (a "directory") produced by delimiter listings.
    pub fn common_prefix(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            path_type: PathType::CommonPrefix,
            checksum: String::new(),
            size_bytes: 0,
            mtime: 0,
            content_type: None,
            metadata: Metadata::new(),
        }
    }
}

/// File or directory, as reported by `ls` and `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    File,
    Directory,
}

/// Path-level metadata record returned by listing and info calls.
///
/// `name` is always the fully qualified `repository/ref/path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub size: u64,
    pub checksum: Option<String>,
    #[serde(rename = "content-type")]
    pub content_type: Option<String>,
    pub mtime: Option<i64>,
    pub metadata: Option<Metadata>,
}

impl ObjectInfo {
    /// Build an info record from a store stat, qualifying the name with
    /// `repository/reference`.
    pub fn from_stat(repository: &str, reference: &str, stat: ObjectStat) -> Self {
        let path = stat.path.trim_end_matches('/');
        let name = format!("{}/{}/{}", repository, reference, path);
        match stat.path_type {
            PathType::CommonPrefix => Self {
                name,
                object_type: ObjectType::Directory,
                size: 0,
                checksum: None,
                content_type: None,
                mtime: None,
                metadata: None,
            },
            PathType::Object => Self {
                name,
                object_type: ObjectType::File,
                size: stat.size_bytes,
                checksum: Some(stat.checksum),
                content_type: stat.content_type,
                mtime: Some(stat.mtime),
                metadata: if stat.metadata.is_empty() {
                    None
                } else {
                    Some(stat.metadata)
                },
            },
        }
    }

    pub fn is_file(&self) -> bool {
        self.object_type == ObjectType::File
    }

    pub fn is_dir(&self) -> bool {
        self.object_type == ObjectType::Directory
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
    Changed,
}

/// A single path difference between two refs, or between a branch's staging
/// area and its head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub kind: DiffKind,
}

impl DiffEntry {
    pub fn new(path: impl Into<String>, kind: DiffKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub has_more: bool,
    /// Opaque cursor to pass as `after` for the next page.
    pub next_offset: String,
    pub results: usize,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    /// Build a page from a full, already-sorted result set.
    ///
    /// `key` extracts the cursor from an item; items with a key `<= after`
    /// are skipped.
    pub fn slice<F>(items: Vec<T>, after: Option<&str>, amount: usize, key: F) -> Self
    where
        F: Fn(&T) -> &str,
    {
        let amount = amount.max(1);
        let mut remaining = items
            .into_iter()
            .filter(|item| after.map_or(true, |a| key(item) > a));
        let results: Vec<T> = remaining.by_ref().take(amount).collect();
        let has_more = remaining.next().is_some();
        let next_offset = if has_more {
            results.last().map(|item| key(item).to_string()).unwrap_or_default()
        } else {
            String::new()
        };
        let count = results.len();
        Page {
            results,
            pagination: Pagination {
                has_more,
                next_offset,
                results: count,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Construction options for a [`LakeFs`](crate::LakeFs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FsOptions {
    /// Create missing branches implicitly when writing to them.
    pub create_branch_ok: bool,
    /// Source branch for implicitly created branches.
    pub source_branch: String,
    /// Page size requested from the store when listing.
    pub list_page_size: usize,
    /// Block size used when hashing local files.
    pub blocksize: usize,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            create_branch_ok: true,
            source_branch: "main".into(),
            list_page_size: 1000,
            blocksize: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    /// Bypass the directory cache and always repopulate it.
    pub refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PutOptions {
    /// Skip the upload if the remote checksum equals the local one.
    pub precheck: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self { precheck: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GetOptions {
    /// Skip the download if the local file's checksum equals the remote one.
    pub precheck: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self { precheck: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RmOptions {
    pub recursive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("k{:02}", i)).collect()
    }

    #[test]
    fn page_slice_first_page() {
        let page = Page::slice(names(5), None, 2, |s| s.as_str());
        assert_eq!(page.results, vec!["k00", "k01"]);
        assert!(page.pagination.has_more);
        assert_eq!(page.pagination.next_offset, "k01");
    }

    #[test]
    fn page_slice_last_page() {
        let page = Page::slice(names(5), Some("k02"), 2, |s| s.as_str());
        assert_eq!(page.results, vec!["k03", "k04"]);
        assert!(!page.pagination.has_more);
        assert_eq!(page.pagination.next_offset, "");
    }

    #[test]
    fn info_serializes_with_dashed_content_type() {
        let info = ObjectInfo::from_stat(
            "repo",
            "main",
            ObjectStat {
                path: "a.txt".into(),
                path_type: PathType::Object,
                checksum: "abc".into(),
                size_bytes: 3,
                mtime: 7,
                content_type: Some("text/plain".into()),
                metadata: Metadata::new(),
            },
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "repo/main/a.txt");
        assert_eq!(json["type"], "file");
        assert_eq!(json["content-type"], "text/plain");
    }

    #[test]
    fn common_prefix_becomes_directory() {
        let info = ObjectInfo::from_stat("repo", "main", ObjectStat::common_prefix("data/raw/"));
        assert_eq!(info.name, "repo/main/data/raw");
        assert!(info.is_dir());
        assert_eq!(info.size, 0);
    }

    #[test]
    fn options_defaults() {
        let opts = FsOptions::default();
        assert!(opts.create_branch_ok);
        assert_eq!(opts.source_branch, "main");
        let parsed: FsOptions = serde_json::from_str(r#"{"source_branch": "dev"}"#).unwrap();
        assert_eq!(parsed.source_branch, "dev");
        assert!(parsed.create_branch_ok);
    }
}
