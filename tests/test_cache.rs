mod common;

use common::REPO;
use lakefs_spec::*;

fn ls(fs: &LakeFs, path: &str) -> Vec<String> {
    fs.ls(path, &ListOptions::default())
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect()
}

// ---------------------------------------------------------------------------
// Hits and misses
// ---------------------------------------------------------------------------

#[test]
fn second_listing_is_a_cache_hit() {
    let (client, fs) = common::fs_with_files();
    let first = ls(&fs, "repo/main/dir");
    let second = ls(&fs, "repo/main/dir");
    assert_eq!(first, second);
    assert_eq!(first, vec!["repo/main/dir/a.txt", "repo/main/dir/b.txt"]);
    assert_eq!(client.call_count("list_objects"), 1);
}

#[test]
fn trailing_slash_and_scheme_share_a_key() {
    let (client, fs) = common::fs_with_files();
    ls(&fs, "repo/main/dir");
    ls(&fs, "repo/main/dir/");
    ls(&fs, "lakefs://repo/main/dir");
    assert_eq!(client.call_count("list_objects"), 1);
}

#[test]
fn refresh_bypasses_and_repopulates() {
    let (client, fs) = common::fs_with_files();
    ls(&fs, "repo/main/dir");
    // a change the cache layer does not observe
    client.upload_object(REPO, "main", "dir/c.txt", b"ccc").unwrap();
    assert_eq!(ls(&fs, "repo/main/dir").len(), 2);

    let fresh = fs
        .ls("repo/main/dir", &ListOptions { refresh: true })
        .unwrap();
    assert_eq!(fresh.len(), 3);
    assert_eq!(ls(&fs, "repo/main/dir").len(), 3);
    assert_eq!(client.call_count("list_objects"), 2);
}

#[test]
fn listing_accumulates_all_pages() {
    let client = MemoryClient::with_repository(REPO, "main").unwrap();
    let fs = LakeFs::new(
        client.clone(),
        FsOptions {
            list_page_size: 2,
            ..FsOptions::default()
        },
    );
    for i in 0..5 {
        client
            .upload_object(REPO, "main", &format!("many/f{}", i), b"x")
            .unwrap();
    }
    assert_eq!(ls(&fs, "repo/main/many").len(), 5);
    assert_eq!(client.call_count("list_objects"), 3);
    ls(&fs, "repo/main/many");
    assert_eq!(client.call_count("list_objects"), 3);
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

#[test]
fn write_invalidates_parent_directory() {
    let (client, fs) = common::fs_with_files();
    ls(&fs, "repo/main/dir");
    fs.put("repo/main/dir/c.txt", b"ccc").unwrap();
    let names = ls(&fs, "repo/main/dir");
    assert!(names.contains(&"repo/main/dir/c.txt".to_string()));
    assert_eq!(client.call_count("list_objects"), 2);
}

#[test]
fn delete_invalidates_parent_directory() {
    let (client, fs) = common::fs_with_files();
    ls(&fs, "repo/main/dir");
    fs.rm_file("repo/main/dir/a.txt").unwrap();
    assert_eq!(ls(&fs, "repo/main/dir"), vec!["repo/main/dir/b.txt"]);
    assert_eq!(client.call_count("list_objects"), 2);
}

#[test]
fn new_subdirectory_shows_up_in_ancestor_listing() {
    let (_, fs) = common::fs_with_files();
    ls(&fs, "repo/main");
    fs.put("repo/main/dir/deep/x.txt", b"x").unwrap();
    let root = ls(&fs, "repo/main");
    assert!(root.contains(&"repo/main/dir".to_string()));
    let dir = ls(&fs, "repo/main/dir");
    assert!(dir.contains(&"repo/main/dir/deep".to_string()));
}

#[test]
fn sibling_directories_stay_cached() {
    let (client, fs) = common::fs_with_files();
    fs.put("repo/main/other/o.txt", b"o").unwrap();
    ls(&fs, "repo/main/dir");
    ls(&fs, "repo/main/other");
    fs.put("repo/main/other/p.txt", b"p").unwrap();
    ls(&fs, "repo/main/dir");
    assert_eq!(client.call_count("list_objects"), 2);
}

// ---------------------------------------------------------------------------
// Branch isolation
// ---------------------------------------------------------------------------

#[test]
fn write_on_other_branch_leaves_cache_alone() {
    let (client, fs) = common::fs_with_files();
    client.create_branch(REPO, "dev", "main").unwrap();
    let main_before = ls(&fs, "repo/main/dir");

    fs.put("repo/dev/dir/dev-only.txt", b"d").unwrap();
    assert_eq!(ls(&fs, "repo/main/dir"), main_before);
    assert_eq!(client.call_count("list_objects"), 1);

    let dev = ls(&fs, "repo/dev/dir");
    assert!(dev.contains(&"repo/dev/dir/dev-only.txt".to_string()));
    assert!(!ls(&fs, "repo/main/dir").contains(&"repo/main/dir/dev-only.txt".to_string()));
}

#[test]
fn refs_are_separate_keys() {
    let (client, fs) = common::fs_with_files();
    ls(&fs, "repo/main/dir");
    ls(&fs, "repo/main@/dir");
    assert_eq!(client.call_count("list_objects"), 2);
    assert_eq!(fs.cache().len(), 2);
}

#[test]
fn transaction_merge_invalidates_base_listing() {
    let (_, fs) = common::fs_with_files();
    let before = ls(&fs, "repo/main");
    fs.transaction(REPO, TransactionOptions::default(), |tx| {
        tx.put("merged.txt", b"m")?;
        tx.commit("add merged", None);
        Ok(())
    })
    .unwrap();
    let after = ls(&fs, "repo/main");
    assert_eq!(after.len(), before.len() + 1);
    assert!(after.contains(&"repo/main/merged.txt".to_string()));
}

#[test]
fn empty_refresh_drops_stale_listing() {
    let (client, fs) = common::fs_with_files();
    assert_eq!(ls(&fs, "repo/main/dir").len(), 2);
    client.delete_object(REPO, "main", "dir/a.txt").unwrap();
    client.delete_object(REPO, "main", "dir/b.txt").unwrap();

    let refreshed = fs
        .ls("repo/main/dir", &ListOptions { refresh: true })
        .unwrap();
    assert!(refreshed.is_empty());
    assert!(ls(&fs, "repo/main/dir").is_empty());
}

#[test]
fn auto_commit_hook_invalidates_committed_listings() {
    let (_, fs) = common::fs_with_files();
    fs.hooks()
        .register(
            FsEvent::Put,
            hooks::commit_on_change(FsEvent::Put).unwrap(),
        )
        .unwrap();
    assert_eq!(ls(&fs, "repo/main@/dir").len(), 2);

    fs.put("repo/main/dir/c.txt", b"ccc").unwrap();
    let committed = ls(&fs, "repo/main@/dir");
    assert!(committed.contains(&"repo/main@/dir/c.txt".to_string()));
}

#[test]
fn deleted_transaction_branch_leaves_no_listings() {
    let (_, fs) = common::fs_with_files();
    let tx = fs
        .start_transaction(REPO, TransactionOptions::default())
        .unwrap();
    let branch = tx.branch().to_string();
    assert_eq!(ls(&fs, &tx.path("dir")).len(), 2);
    assert!(fs.cache().lookup(&cache::dir_key(REPO, &branch, "dir")).is_some());

    let report = tx.complete().unwrap();
    assert!(report.deleted_branch);
    assert!(fs.cache().lookup(&cache::dir_key(REPO, &branch, "dir")).is_none());
}
