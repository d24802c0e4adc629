//! File subcommands
//!
//! Backend operations report failure in their results; these map a
//! failed result to exit code 1 after printing it.

use agentbox_sandbox::{FileInfo, SandboxBackend};
use anyhow::Context;
use serde::Serialize;
use std::io::Read;
use std::path::Path;

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_entries(entries: &[FileInfo]) {
    for entry in entries {
        if entry.is_dir {
            println!("{:>10}  {}  {}", "-", entry.modified_at, entry.path);
        } else {
            println!("{:>10}  {}  {}", entry.size, entry.modified_at, entry.path);
        }
    }
}

fn report(error: Option<&str>, success: impl FnOnce()) -> i32 {
    match error {
        Some(error) => {
            eprintln!("{}", error);
            1
        }
        None => {
            success();
            0
        }
    }
}

pub async fn ls(backend: &dyn SandboxBackend, path: &str, json: bool) -> anyhow::Result<i32> {
    let entries = backend.ls_info(path).await;
    if json {
        print_json(&entries)?;
    } else {
        print_entries(&entries);
    }
    Ok(0)
}

pub async fn read(
    backend: &dyn SandboxBackend,
    path: &str,
    offset: usize,
    limit: usize,
    json: bool,
) -> anyhow::Result<i32> {
    let content = backend.read(path, offset, limit).await;
    if json {
        print_json(&serde_json::json!({ "path": path, "content": content }))?;
    } else {
        println!("{}", content);
    }
    // Read failures are reported in-band as "Error: ..."
    Ok(if content.starts_with("Error") { 1 } else { 0 })
}

pub async fn write(
    backend: &dyn SandboxBackend,
    path: &str,
    content: Option<String>,
    json: bool,
) -> anyhow::Result<i32> {
    let content = match content {
        Some(content) => content,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read content from stdin")?;
            buf
        }
    };

    let result = backend.write(path, &content).await;
    if json {
        print_json(&result)?;
        return Ok(if result.is_ok() { 0 } else { 1 });
    }
    Ok(report(result.error.as_deref(), || {
        println!("Created {}", result.path.as_deref().unwrap_or(path));
    }))
}

pub async fn edit(
    backend: &dyn SandboxBackend,
    path: &str,
    old: &str,
    new: &str,
    replace_all: bool,
    json: bool,
) -> anyhow::Result<i32> {
    let result = backend.edit(path, old, new, replace_all).await;
    if json {
        print_json(&result)?;
        return Ok(if result.is_ok() { 0 } else { 1 });
    }
    Ok(report(result.error.as_deref(), || {
        println!(
            "Replaced {} occurrence(s) in {}",
            result.occurrences,
            result.path.as_deref().unwrap_or(path)
        );
    }))
}

pub async fn grep(
    backend: &dyn SandboxBackend,
    pattern: &str,
    path: Option<&str>,
    glob: Option<&str>,
    json: bool,
) -> anyhow::Result<i32> {
    let output = backend.grep_raw(pattern, path, glob).await;
    if json {
        print_json(&output)?;
        return Ok(if output.error().is_some() { 1 } else { 0 });
    }
    Ok(report(output.error(), || {
        for m in output.matches() {
            println!("{}:{}:{}", m.path, m.line, m.text);
        }
    }))
}

pub async fn glob(
    backend: &dyn SandboxBackend,
    pattern: &str,
    path: &str,
    json: bool,
) -> anyhow::Result<i32> {
    let entries = backend.glob_info(pattern, path).await;
    if json {
        print_json(&entries)?;
    } else {
        print_entries(&entries);
    }
    Ok(0)
}

pub async fn upload(
    backend: &dyn SandboxBackend,
    local: &Path,
    remote: &str,
    json: bool,
) -> anyhow::Result<i32> {
    let bytes = tokio::fs::read(local)
        .await
        .with_context(|| format!("Failed to read {}", local.display()))?;

    let result = backend.upload_file(remote, &bytes).await;
    if json {
        print_json(&result)?;
        return Ok(if result.is_ok() { 0 } else { 1 });
    }
    Ok(report(result.error.as_deref(), || {
        println!("Uploaded {} bytes to {}", bytes.len(), remote);
    }))
}

pub async fn download(
    backend: &dyn SandboxBackend,
    remote: &str,
    local: &Path,
    json: bool,
) -> anyhow::Result<i32> {
    let result = backend.download_file(remote).await;
    let Some(content) = &result.content else {
        if json {
            print_json(&result)?;
        } else {
            eprintln!("{}", result.error.as_deref().unwrap_or("download failed"));
        }
        return Ok(1);
    };

    tokio::fs::write(local, content)
        .await
        .with_context(|| format!("Failed to write {}", local.display()))?;
    if json {
        print_json(&serde_json::json!({ "path": remote, "bytes": content.len() }))?;
    } else {
        println!("Downloaded {} bytes to {}", content.len(), local.display());
    }
    Ok(0)
}
