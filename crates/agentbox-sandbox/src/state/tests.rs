//! Tests for the state backend

use super::*;

fn backend() -> StateSandboxBackend {
    StateSandboxBackend::new(StateSandboxConfig::default())
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let backend = backend();
    assert!(backend.write("/scratch/plan.md", "step one\nstep two").await.is_ok());

    let content = backend.read("/scratch/plan.md", 0, 2000).await;
    assert!(content.contains("step one"));
    assert!(content.contains("     2\tstep two"));
}

#[tokio::test]
async fn test_keys_are_normalised() {
    let backend = backend();
    backend.write("notes//a.txt", "x").await;

    let files = backend.state();
    assert!(files.read().await.contains_key("/notes/a.txt"));
    assert!(backend.read("/notes/./a.txt", 0, 10).await.contains('x'));
}

#[tokio::test]
async fn test_write_never_clobbers() {
    let backend = backend();
    backend.write("/a.txt", "one").await;

    let second = backend.write("/a.txt", "two").await;
    assert!(second.error.unwrap().contains("already exists"));
    assert!(backend.read("/a.txt", 0, 10).await.contains("one"));
}

#[tokio::test]
async fn test_file_and_directory_cannot_share_a_path() {
    let backend = backend();
    assert!(backend.write("/a/b.txt", "child").await.is_ok());

    let over_dir = backend.write("/a", "file").await;
    assert!(over_dir.error.unwrap().contains("is a directory"));

    assert!(backend.write("/c", "file").await.is_ok());
    let under_file = backend.write("/c/d/e.txt", "child").await;
    assert!(under_file.error.unwrap().contains("'/c' is a file"));

    // Sibling names sharing a prefix are unaffected
    assert!(backend.write("/a-b", "x").await.is_ok());
    assert!(backend.write("/cd", "x").await.is_ok());

    let keys: Vec<String> = backend.state().read().await.keys().cloned().collect();
    assert_eq!(keys, vec!["/a-b", "/a/b.txt", "/c", "/cd"]);

    let listing = backend.ls_info("/").await;
    let dirs = listing.iter().filter(|info| info.is_dir).count();
    assert_eq!(dirs, 1);
}

#[tokio::test]
async fn test_parent_components_rejected() {
    let backend = backend();
    assert!(!backend.write("/a/../../b.txt", "x").await.is_ok());
    assert!(backend.state().read().await.is_empty());
}

#[tokio::test]
async fn test_edit_occurrences_and_ambiguity() {
    let backend = backend();
    backend.write("/f.txt", "a-a-a").await;

    let ambiguous = backend.edit("/f.txt", "a", "b", false).await;
    assert!(!ambiguous.is_ok());

    let result = backend.edit("/f.txt", "a", "b", true).await;
    assert_eq!(result.occurrences, 3);
    assert!(backend.read("/f.txt", 0, 10).await.contains("b-b-b"));

    let missing = backend.edit("/nope.txt", "a", "b", false).await;
    assert!(missing.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn test_ls_info_infers_directories() {
    let backend = backend();
    backend.write("/top.txt", "t").await;
    backend.write("/dir/inner.txt", "i").await;
    backend.write("/dir/deeper/x.txt", "x").await;

    let root: Vec<(String, bool)> = backend
        .ls_info("/")
        .await
        .into_iter()
        .map(|i| (i.path, i.is_dir))
        .collect();
    assert_eq!(
        root,
        vec![("/dir/".to_string(), true), ("/top.txt".to_string(), false)]
    );

    let inner = backend.ls_info("/dir").await;
    assert_eq!(inner.len(), 2);
    assert_eq!(inner[0].path, "/dir/deeper/");
    assert_eq!(inner[1].path, "/dir/inner.txt");
    assert_eq!(inner[1].size, 1);

    assert!(backend.ls_info("/empty").await.is_empty());
}

#[tokio::test]
async fn test_glob_and_grep() {
    let backend = backend();
    backend.write("/app/main.py", "import os\nprint('hi')").await;
    backend.write("/app/lib/util.py", "def helper():\n    print('x')").await;
    backend.write("/README.md", "print nothing").await;

    let py: Vec<String> = backend
        .glob_info("**/*.py", "/")
        .await
        .into_iter()
        .map(|i| i.path)
        .collect();
    assert_eq!(py, vec!["/app/lib/util.py", "/app/main.py"]);

    let dirs = backend.glob_info("app/", "/").await;
    assert_eq!(dirs.len(), 1);
    assert_eq!(dirs[0].path, "/app/");

    let matches = backend.grep_raw("print", Some("/app"), None).await;
    assert_eq!(matches.matches().len(), 2);

    let filtered = backend.grep_raw("print", None, Some("*.md")).await;
    assert_eq!(filtered.matches().len(), 1);
    assert_eq!(filtered.matches()[0].path, "/README.md");
}

#[tokio::test]
async fn test_execute_runs_on_host_not_in_state() {
    let backend = backend();
    backend.write("/only-in-memory.txt", "x").await;

    let response = backend.execute("test -e /only-in-memory.txt").await;
    assert_ne!(response.exit_code, 0);

    let response = backend.execute("echo host").await;
    assert_eq!(response.output.trim(), "host");
    assert_eq!(backend.isolation(), IsolationTier::None);
}

#[tokio::test]
async fn test_shared_state_between_instances() {
    let files = FileState::default();
    let first = StateSandboxBackend::with_state(Arc::clone(&files), StateSandboxConfig::default());
    let second = StateSandboxBackend::with_state(files, StateSandboxConfig::default());

    first.write("/shared.txt", "hello").await;
    assert!(second.read("/shared.txt", 0, 10).await.contains("hello"));
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn test_binary_round_trip() {
    let backend = backend();
    let bytes = vec![0xde, 0xad, 0xbe, 0xef, 0x00];
    assert!(backend.upload_file("/blob", &bytes).await.is_ok());
    assert_eq!(backend.download_file("/blob").await.content, Some(bytes));
    assert!(backend.download_file("/absent").await.error.is_some());
}
