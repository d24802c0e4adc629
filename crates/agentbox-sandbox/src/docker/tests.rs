//! Tests for the Docker backend
//!
//! Tests marked `#[ignore]` need a running Docker daemon:
//! `cargo test -p agentbox-sandbox -- --ignored`

use super::*;

/// Backend wired to a docker binary that does not exist
fn offline_backend() -> DockerSandboxBackend {
    DockerSandboxBackend {
        id: Uuid::new_v4(),
        config: DockerSandboxConfig::default(),
        cli: DockerCli::new("agentbox-no-such-docker-binary"),
        state: Mutex::new(ContainerState::Absent),
    }
}

async fn live_backend(config: DockerSandboxConfig) -> DockerSandboxBackend {
    let backend = DockerSandboxBackend::connect(config).await.unwrap();
    backend.ensure_container().await.unwrap();
    backend
}

#[tokio::test]
async fn test_connect_without_docker_is_an_infrastructure_error() {
    let config = DockerSandboxConfig {
        docker_binary: "agentbox-no-such-docker-binary".to_string(),
        ..DockerSandboxConfig::default()
    };
    let result = DockerSandboxBackend::connect(config).await;
    assert!(matches!(result, Err(Error::DockerUnavailable(_))));
}

#[tokio::test]
async fn test_operations_degrade_to_results_without_docker() {
    let backend = offline_backend();

    let response = backend.execute("echo hi").await;
    assert_eq!(response.exit_code, -1);
    assert!(response.output.starts_with("Error executing command"));

    assert!(!backend.write("/a.txt", "x").await.is_ok());
    assert!(!backend.edit("/a.txt", "x", "y", false).await.is_ok());
    assert!(backend.read("/a.txt", 0, 10).await.starts_with("Error"));
    assert!(backend.ls_info("/").await.is_empty());
    assert!(backend.glob_info("*", "/").await.is_empty());
    assert!(backend.grep_raw("x", None, None).await.error().is_some());
    assert!(backend.download_file("/a.txt").await.error.is_some());
}

#[tokio::test]
async fn test_cleanup_without_container_is_noop() {
    let backend = offline_backend();
    backend.cleanup().await;
    backend.cleanup().await;
    assert_eq!(backend.container_id().await, None);
}

#[tokio::test]
async fn test_cleanup_tolerates_vanished_container() {
    let backend = offline_backend();
    *backend.state.lock().await = ContainerState::Running {
        id: "already-gone".to_string(),
    };

    backend.cleanup().await;
    assert_eq!(backend.container_id().await, None);
    backend.cleanup().await;
}

/// Backend driven by a stand-in docker script that logs its arguments
///
/// `docker stop` exits non-zero, every other subcommand succeeds.
#[cfg(unix)]
fn scripted_backend(
    dir: &std::path::Path,
    container: &str,
) -> (DockerSandboxBackend, std::path::PathBuf) {
    use std::os::unix::fs::PermissionsExt;

    let log = dir.join("calls.log");
    let script = dir.join("docker");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\nif [ \"$1\" = stop ]; then echo 'daemon timeout' >&2; exit 1; fi\n",
            log.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let backend = DockerSandboxBackend {
        id: Uuid::new_v4(),
        config: DockerSandboxConfig::default(),
        cli: DockerCli::new(script.to_string_lossy()),
        state: Mutex::new(ContainerState::Running {
            id: container.to_string(),
        }),
    };
    (backend, log)
}

#[cfg(unix)]
#[tokio::test]
async fn test_cleanup_removes_container_when_stop_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, log) = scripted_backend(dir.path(), "c1");
    assert!(backend.config.auto_remove);

    backend.cleanup().await;

    let calls = std::fs::read_to_string(&log).unwrap();
    let calls: Vec<&str> = calls.lines().collect();
    assert_eq!(calls, vec!["stop -t 5 c1", "rm -f c1"]);
    assert_eq!(backend.container_id().await, None);
}

#[test]
fn test_container_path() {
    let backend = offline_backend();
    assert_eq!(backend.container_path("/etc/hosts"), "/etc/hosts");
    assert_eq!(backend.container_path("notes.txt"), "/workspace/notes.txt");
    assert_eq!(backend.container_path("./a/b"), "/workspace/a/b");
}

#[tokio::test]
async fn test_invalid_regex_is_reported_before_touching_docker() {
    let backend = offline_backend();
    let output = backend.grep_raw("(", None, None).await;
    assert!(output.error().unwrap().contains("Invalid regex"));
}

// ============================================================================
// Daemon-backed tests
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_docker_write_read_round_trip() {
    let backend = live_backend(DockerSandboxConfig::default()).await;

    let result = backend.write("/workspace/dir/new/file.txt", "hello\nworld").await;
    assert!(result.is_ok(), "{:?}", result.error);

    let content = backend.read("/workspace/dir/new/file.txt", 0, 2000).await;
    assert_eq!(content, "     1\thello\n     2\tworld");

    let clobber = backend.write("/workspace/dir/new/file.txt", "other").await;
    assert!(clobber.error.unwrap().contains("already exists"));

    backend.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_docker_binary_content_is_not_reencoded() {
    let backend = live_backend(DockerSandboxConfig::default()).await;
    let bytes: Vec<u8> = (0..=255u8).collect();

    assert!(backend.upload_file("blob.bin", &bytes).await.is_ok());
    assert_eq!(backend.download_file("blob.bin").await.content, Some(bytes));

    backend.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_docker_edit_and_search() {
    let backend = live_backend(DockerSandboxConfig::default()).await;
    backend.write("src/app.py", "x = 1\ny = 1\n").await;

    let edit = backend.edit("src/app.py", "1", "2", true).await;
    assert_eq!(edit.occurrences, 2);

    let grep = backend.grep_raw("= 2", None, Some("*.py")).await;
    assert_eq!(grep.matches().len(), 2);
    assert_eq!(grep.matches()[0].path, "/workspace/src/app.py");

    let none = backend.grep_raw("absent", None, None).await;
    assert!(none.matches().is_empty());

    let globbed = backend.glob_info("**/*.py", "/workspace").await;
    assert_eq!(globbed.len(), 1);
    assert!(!globbed[0].is_dir);

    let listed = backend.ls_info("/workspace").await;
    assert!(listed.iter().any(|i| i.path == "/workspace/src/" && i.is_dir));

    backend.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_docker_execute_in_container() {
    let config = DockerSandboxConfig {
        max_output_size: 10,
        command_timeout_secs: 2,
        ..DockerSandboxConfig::default()
    };
    let backend = live_backend(config).await;

    let pwd = backend.execute("pwd").await;
    assert_eq!(pwd.output.trim(), "/workspace");

    let over = backend.execute("printf 'aaaaaaaaaaa'").await;
    assert!(over.truncated);
    assert_eq!(over.output.len(), 10);

    let slow = backend.execute("sleep 10").await;
    assert_eq!(slow.exit_code, -1);
    assert!(slow.output.contains("timed out"));

    let network = backend.execute("getent hosts example.com").await;
    assert_ne!(network.exit_code, 0);

    backend.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_docker_cleanup_twice() {
    let backend = live_backend(DockerSandboxConfig::default()).await;
    assert!(backend.container_id().await.is_some());

    backend.cleanup().await;
    backend.cleanup().await;
    assert_eq!(backend.container_id().await, None);
}
