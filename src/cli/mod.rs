//! CLI module for agentbox
//!
//! Every subcommand builds a backend for `--owner`, performs one
//! operation, then cleans the backend up.

use crate::config::{load_config, AppConfig};
use agentbox_sandbox::{BackendFactory, BackendKind, SandboxBackend};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

pub mod exec;
pub mod files;

/// Sandboxed file and command execution for agent tool calls
#[derive(Parser, Debug)]
#[command(name = "agentbox")]
#[command(about = "Sandboxed file and command execution for agent tool calls")]
#[command(version)]
pub struct Cli {
    /// Backend to use, overriding configuration
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Owner (user or session id) the backend is built for
    #[arg(long, global = true, default_value = "local")]
    pub owner: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a shell command in the sandbox; Ctrl-C stops it
    Exec {
        /// Command line passed to `sh -c`
        command: String,
        /// Thread id to register the run under (defaults to the owner)
        #[arg(long)]
        thread: Option<String>,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file with line numbers
    Read {
        path: String,
        /// First line to show (0-based)
        #[arg(long, default_value_t = agentbox_sandbox::DEFAULT_READ_OFFSET)]
        offset: usize,
        /// Maximum number of lines
        #[arg(long, default_value_t = agentbox_sandbox::DEFAULT_READ_LIMIT)]
        limit: usize,
    },
    /// Create a new file; content is read from stdin when omitted
    Write {
        path: String,
        content: Option<String>,
    },
    /// Replace text in a file
    Edit {
        path: String,
        old: String,
        new: String,
        /// Replace every occurrence
        #[arg(long)]
        all: bool,
    },
    /// Search file contents with a regular expression
    Grep {
        pattern: String,
        path: Option<String>,
        /// Only search files matching this glob
        #[arg(long)]
        glob: Option<String>,
    },
    /// Find paths matching a glob
    Glob {
        pattern: String,
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Copy a local file into the sandbox
    Upload { local: PathBuf, remote: String },
    /// Copy a sandbox file to the local disk
    Download { remote: String, local: PathBuf },
    /// Show the effective configuration
    Config,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let mut config = load_config()?;
    if let Some(kind) = cli.backend {
        config.sandbox.kind = kind;
    }
    debug!(kind = %config.sandbox.kind, owner = %cli.owner, "Configuration loaded");

    if let Commands::Config = command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let factory = BackendFactory::new(config.sandbox.clone());
    let backend: std::sync::Arc<dyn SandboxBackend> = factory
        .create(&cli.owner)
        .await
        .with_context(|| format!("Failed to create {} backend", config.sandbox.kind))?
        .into();

    let result = dispatch(command, &backend, &config, &cli.owner, cli.json).await;
    backend.cleanup().await;

    let code = result?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Returns the process exit code
async fn dispatch(
    command: Commands,
    backend: &std::sync::Arc<dyn SandboxBackend>,
    config: &AppConfig,
    owner: &str,
    json: bool,
) -> anyhow::Result<i32> {
    match command {
        Commands::Exec { command, thread } => {
            let grace = config.tasks.stop_grace();
            exec::run(backend, owner, &command, thread, grace, json).await
        }
        Commands::Ls { path } => files::ls(backend.as_ref(), &path, json).await,
        Commands::Read {
            path,
            offset,
            limit,
        } => files::read(backend.as_ref(), &path, offset, limit, json).await,
        Commands::Write { path, content } => {
            files::write(backend.as_ref(), &path, content, json).await
        }
        Commands::Edit {
            path,
            old,
            new,
            all,
        } => files::edit(backend.as_ref(), &path, &old, &new, all, json).await,
        Commands::Grep {
            pattern,
            path,
            glob,
        } => {
            files::grep(
                backend.as_ref(),
                &pattern,
                path.as_deref(),
                glob.as_deref(),
                json,
            )
            .await
        }
        Commands::Glob { pattern, path } => {
            files::glob(backend.as_ref(), &pattern, &path, json).await
        }
        Commands::Upload { local, remote } => {
            files::upload(backend.as_ref(), &local, &remote, json).await
        }
        Commands::Download { remote, local } => {
            files::download(backend.as_ref(), &remote, &local, json).await
        }
        Commands::Config => Ok(0),
    }
}
