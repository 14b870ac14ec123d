use lakefs_spec::*;

pub const REPO: &str = "repo";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn create_fs() -> (MemoryClient, LakeFs) {
    init_logging();
    let client = MemoryClient::with_repository(REPO, "main").unwrap();
    let fs = LakeFs::new(client.clone(), FsOptions::default());
    (client, fs)
}

/// A repository whose `main` branch has one commit holding
/// `hello.txt`, `dir/a.txt`, and `dir/b.txt`. Call counters start at zero.
#[allow(dead_code)]
pub fn fs_with_files() -> (MemoryClient, LakeFs) {
    let (client, fs) = create_fs();
    client.upload_object(REPO, "main", "hello.txt", b"hello").unwrap();
    client.upload_object(REPO, "main", "dir/a.txt", b"aaa").unwrap();
    client.upload_object(REPO, "main", "dir/b.txt", b"bbb").unwrap();
    client
        .create_commit(REPO, "main", "seed", &Metadata::new())
        .unwrap();
    client.reset_calls();
    (client, fs)
}

#[allow(dead_code)]
pub fn head(client: &MemoryClient, branch: &str) -> String {
    client.resolve_ref(REPO, branch).unwrap()
}
