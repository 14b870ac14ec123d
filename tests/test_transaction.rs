mod common;

use common::{head, REPO};
use lakefs_spec::*;

fn on_main() -> TransactionOptions {
    TransactionOptions {
        branch_name: Some("main".into()),
        ..TransactionOptions::default()
    }
}

// ---------------------------------------------------------------------------
// Ordering and placeholders
// ---------------------------------------------------------------------------

#[test]
fn tag_points_at_commit_queued_before_it() {
    let (client, fs) = common::fs_with_files();
    let before = head(&client, "main");

    let ((commit, tag), _) = fs
        .transaction(REPO, on_main(), |tx| {
            tx.put("a.txt", b"A")?;
            let commit = tx.commit("m1", None);
            let tag = tx.tag(&commit, "t1")?;
            Ok((commit, tag))
        })
        .unwrap();

    let commit = commit.value().unwrap();
    assert_eq!(commit.message, "m1");
    assert_eq!(commit.parents, vec![before.clone()]);
    assert_ne!(commit.id, before);
    assert_eq!(tag.get().unwrap().commit_id, commit.id);
    assert_eq!(client.get_tag(REPO, "t1").unwrap().commit_id, commit.id);
}

#[test]
fn operations_execute_in_append_order() {
    let (client, fs) = common::fs_with_files();
    client.reset_calls();

    fs.transaction(REPO, on_main(), |tx| {
        tx.put("x.txt", b"x")?;
        let c = tx.commit("add x", None);
        tx.create_branch("side", &c, false)?;
        tx.tag(&c, "v1")?;
        Ok(())
    })
    .unwrap();

    let order: Vec<&str> = client
        .calls()
        .into_iter()
        .filter(|c| matches!(*c, "upload_object" | "create_commit" | "create_branch" | "create_tag"))
        .collect();
    // the first create_branch is the implicit branch creation of the upload
    assert_eq!(
        order,
        vec!["create_branch", "upload_object", "create_commit", "create_branch", "create_tag"]
    );
    assert_eq!(head(&client, "side"), head(&client, "main"));
}

#[test]
fn rev_parse_placeholder_feeds_later_calls() {
    let (client, fs) = common::fs_with_files();
    let seed = head(&client, "main");

    let (parent, _) = fs
        .transaction(REPO, on_main(), |tx| {
            tx.put("y.txt", b"y")?;
            let c = tx.commit("add y", None);
            let parent = tx.rev_parse(&c, 1);
            tx.create_branch("from-parent", &parent, false)?;
            Ok(parent)
        })
        .unwrap();

    assert_eq!(parent.value().unwrap().id, seed);
    assert_eq!(head(&client, "from-parent"), seed);
}

#[test]
fn revert_and_merge_in_one_transaction() {
    let (client, fs) = common::fs_with_files();
    client.create_branch(REPO, "feature", "main").unwrap();
    client.upload_object(REPO, "feature", "f.txt", b"f").unwrap();
    client
        .create_commit(REPO, "feature", "feature work", &Metadata::new())
        .unwrap();

    let ((merged, reverted), _) = fs
        .transaction(REPO, on_main(), |tx| {
            let merged = tx.merge("feature", "main")?;
            let reverted = tx.revert("main", 1)?;
            Ok((merged, reverted))
        })
        .unwrap();

    assert!(merged.value().unwrap().is_merge());
    let reverted = reverted.value().unwrap();
    assert!(reverted.message.starts_with("Revert "));
    assert!(!fs.exists("repo/main/f.txt").unwrap());
}

#[test]
fn merge_without_diff_is_recorded_as_noop() {
    let (client, fs) = common::fs_with_files();
    client.create_branch(REPO, "same", "main").unwrap();
    let before = head(&client, "main");

    let (merged, _) = fs
        .transaction(REPO, on_main(), |tx| tx.merge("same", "main"))
        .unwrap();

    assert_eq!(merged.value().unwrap().id, before);
    assert_eq!(client.call_count("merge"), 0);
}

// ---------------------------------------------------------------------------
// Abort
// ---------------------------------------------------------------------------

#[test]
fn failing_body_discards_everything() {
    let (client, fs) = common::fs_with_files();
    let before = head(&client, "main");
    client.reset_calls();

    let err = fs
        .transaction(REPO, on_main(), |tx| {
            tx.put("new.txt", b"n")?;
            tx.commit("should not happen", None);
            tx.tag("main", "never")?;
            Err::<(), _>(Error::internal("boom"))
        })
        .unwrap_err();

    match err {
        Error::TransactionAborted { source } => assert!(matches!(*source, Error::Internal(_))),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!fs.exists("repo/main/new.txt").unwrap());
    assert_eq!(head(&client, "main"), before);
    assert_eq!(client.call_count("upload_object"), 0);
    assert_eq!(client.call_count("create_commit"), 0);
    assert_eq!(client.call_count("create_tag"), 0);
}

#[test]
fn failing_body_on_ephemeral_branch_leaves_base_untouched() {
    let (client, fs) = common::fs_with_files();
    let before = head(&client, "main");
    let opts = TransactionOptions {
        delete: DeletePolicy::Always,
        ..TransactionOptions::default()
    };

    let mut branch = String::new();
    let result = fs.transaction(REPO, opts, |tx| {
        branch = tx.branch().to_string();
        tx.put("a.txt", b"a")?;
        tx.commit("add a", None);
        Err::<(), _>(Error::conflict("caller gave up"))
    });

    assert!(matches!(result, Err(Error::TransactionAborted { .. })));
    assert_eq!(head(&client, "main"), before);
    assert!(client.get_branch(REPO, &branch).unwrap_err().is_not_found());
}

#[test]
fn failing_cleanup_still_reports_body_error() {
    let (client, fs) = common::fs_with_files();
    let opts = TransactionOptions {
        delete: DeletePolicy::Always,
        ..TransactionOptions::default()
    };
    client.fail_on("delete_branch", 500, "store unavailable");

    let err = fs
        .transaction(REPO, opts, |tx| {
            tx.put("a.txt", b"a")?;
            Err::<(), _>(Error::conflict("caller gave up"))
        })
        .unwrap_err();

    match err {
        Error::TransactionAborted { source } => assert!(matches!(*source, Error::Conflict(_))),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(client.call_count("delete_branch"), 1);
}

#[test]
fn failure_mid_drain_stops_remaining_entries() {
    let (client, fs) = common::fs_with_files();
    client.create_tag(REPO, "taken", "main").unwrap();
    client.reset_calls();

    let result = fs.transaction(REPO, on_main(), |tx| {
        tx.put("a.txt", b"a")?;
        let c = tx.commit("add a", None);
        tx.tag(&c, "taken")?;
        tx.put("b.txt", b"b")?;
        tx.commit("add b", None);
        Ok(c)
    });

    // the underlying conflict propagates unwrapped
    assert!(result.unwrap_err().is_conflict());
    assert_eq!(client.call_count("create_commit"), 1);
    assert!(fs.exists("repo/main/a.txt").unwrap());
    assert!(!fs.exists("repo/main/b.txt").unwrap());
}

#[test]
fn dangling_placeholder_fails_fast() {
    let (client, fs) = common::fs_with_files();
    let orphan: Placeholder<Commit> = Placeholder::new();

    let result = fs.transaction(REPO, on_main(), |tx| {
        tx.tag(&orphan, "orphan")?;
        Ok(())
    });

    assert!(matches!(result, Err(Error::DanglingPlaceholder(op)) if op == "tag"));
    assert_eq!(client.call_count("create_tag"), 0);
}

// ---------------------------------------------------------------------------
// Ephemeral branch end to end
// ---------------------------------------------------------------------------

#[test]
fn ephemeral_transaction_merges_into_base() {
    let (client, fs) = common::fs_with_files();
    let before = head(&client, "main");

    let (branch, report) = fs
        .transaction(REPO, TransactionOptions::default(), |tx| {
            tx.put("a.txt", b"from tx")?;
            tx.commit("add a", None);
            Ok(tx.branch().to_string())
        })
        .unwrap();

    let merge = report.merge.clone().unwrap();
    let main_head = client.get_commit(REPO, "main").unwrap();
    assert_eq!(main_head.id, merge.id);
    assert_eq!(merge.parents.len(), 2);
    assert_eq!(merge.parents[0], before);
    assert!(merge.message.contains(&branch));
    assert_eq!(main_head.parents[0], before);

    assert_eq!(fs.cat("repo/main/a.txt").unwrap(), b"from tx");
    assert!(report.ephemeral);
    assert!(report.deleted_branch);
    assert_eq!(report.executed, 3);
    assert!(client.get_branch(REPO, &branch).unwrap_err().is_not_found());
}

#[test]
fn transaction_writes_invisible_until_completion() {
    let (_, fs) = common::fs_with_files();
    let listed_before = fs.ls("repo/main", &ListOptions::default()).unwrap();

    let mut tx = fs
        .start_transaction(REPO, TransactionOptions::default())
        .unwrap();
    tx.put("late.txt", b"late").unwrap();
    tx.commit("add late", None);
    assert_eq!(fs.ls("repo/main", &ListOptions::default()).unwrap(), listed_before);
    assert!(!fs.exists(&tx.path("late.txt")).unwrap());

    tx.complete().unwrap();
    assert!(fs.exists("repo/main/late.txt").unwrap());
}

#[test]
fn tx_writer_buffers_into_transaction() {
    use std::io::Write;

    let (_, fs) = common::fs_with_files();
    fs.transaction(REPO, on_main(), |tx| {
        let mut w = tx.writer("streamed.txt")?;
        w.write_all(b"part 1, ").map_err(Error::from)?;
        w.write_all(b"part 2").map_err(Error::from)?;
        w.close()?;
        drop(w);
        tx.commit("streamed", None);
        Ok(())
    })
    .unwrap();

    assert_eq!(fs.cat("repo/main/streamed.txt").unwrap(), b"part 1, part 2");
}

#[test]
fn put_file_reads_local_content_eagerly() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("data.bin");
    std::fs::write(&local, b"v1").unwrap();

    let (_, fs) = common::fs_with_files();
    fs.transaction(REPO, on_main(), |tx| {
        tx.put_file(&local, "data.bin")?;
        std::fs::write(&local, b"v2").map_err(Error::from)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(fs.cat("repo/main/data.bin").unwrap(), b"v1");
}

#[test]
fn report_serializes() {
    let (_, fs) = common::fs_with_files();
    let (_, report) = fs
        .transaction(REPO, on_main(), |tx| {
            tx.put("s.txt", b"s")?;
            tx.commit("add s", None);
            Ok(())
        })
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["branch"], "main");
    assert_eq!(json["executed"], 2);
    assert_eq!(json["ephemeral"], false);
}
