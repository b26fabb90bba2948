use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use graph::GraphSnapshot;
use lineage_core::{
    ActiveSelection, Backend, Config, FetchStatus, GitBackend, RepoSession, Refs, SessionHandle, SessionStatus,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lineage")]
#[command(about = "Commit graph with related-commit highlighting", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show commits, marking those related to the active commit
    Log {
        /// Path to the repository
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Active commit (full id or unique prefix), HEAD by default
        #[arg(short, long)]
        active: Option<String>,
        /// Number of commits to load
        #[arg(short, long)]
        count: Option<usize>,
    },
    /// List references
    Refs {
        /// Path to the repository
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Print the raw reference list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show graph statistics
    Stats {
        /// Path to the repository
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref()).context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Log { path, active, count } => {
            if count.is_some() {
                config.commit_limit = count;
            }
            let (status, snapshot) = load(&path, &config).await?;
            let refs = Refs::from_list(status.refs.clone());

            let active = match active {
                Some(prefix) => resolve(&snapshot, &prefix)?,
                None => status
                    .head()
                    .map(str::to_owned)
                    .ok_or_else(|| anyhow!("HEAD does not point at a commit, pass --active"))?,
            };
            let mut selection = ActiveSelection::new(active);

            for node in snapshot.commits() {
                let marker = if node.id == selection.current() {
                    "@"
                } else if selection.is_related(&snapshot, &node.id) {
                    "*"
                } else {
                    "."
                };
                let date = node
                    .timestamp()
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let names = refs.names_for(&node.id);
                let decoration = if names.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", names.join(", "))
                };

                println!(
                    "{} {} {}{} {}",
                    marker,
                    node.short_id(),
                    date,
                    decoration,
                    node.summary.as_deref().unwrap_or_default()
                );
            }
        }
        Commands::Refs { path, json } => {
            let list = GitBackend::new(&config)
                .get_refs(&path)
                .await
                .with_context(|| format!("failed to read refs of {}", path.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
                return Ok(());
            }

            let refs = Refs::from_list(list);
            match (&refs.head, &refs.active_branch) {
                (Some(head), Some(branch)) => println!("HEAD -> {} ({})", branch.name, short(head)),
                (Some(head), None) => println!("HEAD detached at {}", short(head)),
                (None, _) => println!("HEAD unborn"),
            }

            println!("\nLocal branches:");
            for branch in &refs.local {
                let marker = if branch.is_head { "* " } else { "  " };
                println!("{}{} {}", marker, branch.name, short(&branch.id));
            }

            for (remote, branches) in &refs.remotes {
                println!("\nRemote {}:", remote);
                for branch in branches {
                    println!("  {} {}", branch.name, short(&branch.id));
                }
            }

            if !refs.tags.is_empty() {
                println!("\nTags:");
                for tag in &refs.tags {
                    println!("  {} {}", tag.name, short(&tag.id));
                }
            }
        }
        Commands::Stats { path } => {
            let (_, snapshot) = load(&path, &config).await?;
            let stats = snapshot.stats();
            println!("Commits:  {}", stats.total_commits);
            println!("Edges:    {}", stats.total_edges);
            println!("Merges:   {}", stats.merge_commits);
            println!("Roots:    {}", stats.root_commits);
            println!("Leaves:   {}", stats.leaf_commits);
            if stats.has_orphans {
                println!("History has more than one root");
            }
        }
    }

    Ok(())
}

/// Run one fetch cycle for `path` through a session and return the result
async fn load(path: &Path, config: &Config) -> Result<(SessionStatus, Arc<GraphSnapshot>)> {
    let (session, handle) = RepoSession::new(GitBackend::new(config), config);
    let driver = tokio::spawn(session.run());

    let outcome = fetch(&handle, path).await;
    drop(handle);
    driver.await.context("session task failed")?;
    outcome
}

async fn fetch(handle: &SessionHandle, path: &Path) -> Result<(SessionStatus, Arc<GraphSnapshot>)> {
    handle.open(path)?;
    let status = handle.wait_for_fetch(path).await?;
    if let FetchStatus::Failed(message) = &status.fetch {
        bail!("failed to load {}: {}", path.display(), message);
    }
    let snapshot = handle.wait_for_snapshot(status.revision).await?;
    tracing::debug!(commits = snapshot.len(), "history loaded");
    Ok((status, snapshot))
}

fn resolve(snapshot: &GraphSnapshot, prefix: &str) -> Result<String> {
    let mut matches = snapshot.order().iter().filter(|id| id.starts_with(prefix));
    match (matches.next(), matches.next()) {
        (Some(id), None) => Ok(id.clone()),
        (Some(_), Some(_)) => bail!("commit prefix {} is ambiguous", prefix),
        (None, _) => bail!("no loaded commit matches {}", prefix),
    }
}

fn short(id: &str) -> &str {
    &id[..id.len().min(8)]
}
