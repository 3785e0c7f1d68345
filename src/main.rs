use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod config;
mod store;
mod sync;
mod util;

use store::{MappingStore, MappingTable};

#[derive(Parser)]
#[command(
    name = "mapsyncd",
    version,
    about = "Mapping-driven one-way file mirror daemon"
)]
struct Cli {
    /// Path to config file [default: ~/.config/mapsyncd/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the mirror daemon (foreground, runs until interrupted)
    Start,
    /// Print the persisted mapping table
    Status,
    /// Create an empty mapping document
    Init,
}

fn init_tracing(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "mapsyncd=info",
        1 => "mapsyncd=debug",
        2 => "mapsyncd=trace",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// Check inotify watch limits on Linux and warn if they look too low.
fn check_inotify_limits() {
    let path = "/proc/sys/fs/inotify/max_user_watches";
    if let Ok(content) = std::fs::read_to_string(path)
        && let Ok(limit) = content.trim().parse::<u64>()
    {
        if limit < 65536 {
            tracing::warn!(
                max_user_watches = limit,
                "inotify watch limit is low — you may hit issues with large trees. \
                 Increase with: echo 524288 | sudo tee {path}"
            );
        } else {
            tracing::debug!(max_user_watches = limit, "inotify watch limit OK");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(cli.config.as_deref())?;
    let store = MappingStore::new(&cfg.sync.mapping_path, cfg.lock_timeout());

    match cli.command {
        Command::Start => run_daemon(&cfg, store).await,
        Command::Status => print_status(&store),
        Command::Init => init_mapping(&store),
    }
}

async fn run_daemon(cfg: &config::Config, store: MappingStore) -> Result<()> {
    check_inotify_limits();

    std::fs::create_dir_all(&cfg.sync.source_root).with_context(|| {
        format!(
            "Failed to create source root: {}",
            cfg.sync.source_root.display()
        )
    })?;
    std::fs::create_dir_all(&cfg.sync.target_root).with_context(|| {
        format!(
            "Failed to create target root: {}",
            cfg.sync.target_root.display()
        )
    })?;

    // Watcher events carry absolute paths; canonicalize the roots so key
    // derivation strips the right prefix.
    let source_root = std::fs::canonicalize(&cfg.sync.source_root)?;
    let target_root = std::fs::canonicalize(&cfg.sync.target_root)?;

    if !store.exists() {
        tracing::info!(
            path = %store.path().display(),
            "mapping document missing, creating empty table"
        );
        store.write(&MappingTable::new())?;
    }

    let mut reconciler =
        sync::reconciler::Reconciler::new(source_root.clone(), target_root, store)?;

    let (mut event_rx, _source_watch) = sync::watcher::watch_source(&source_root)?;
    let (mut reload_rx, _mapping_watch) = sync::reload::watch_mapping(&cfg.sync.mapping_path)?;

    // SIGTERM handling (for systemd graceful stop)
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tracing::info!("mapsyncd ready — monitoring");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }

            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }

            // Source tree change: events are handled one at a time, in
            // arrival order. A slow copy delays the next event by design.
            Some(event) = event_rx.recv() => {
                if let Err(e) = reconciler.handle_event(&event) {
                    tracing::error!(error = %format!("{e:#}"), "event handling failed");
                }
            }

            // External edit of the mapping document
            Some(()) = reload_rx.recv() => {
                tracing::info!(
                    path = %cfg.sync.mapping_path.display(),
                    "mapping document changed, reloading"
                );
                if let Err(e) = reconciler.reload() {
                    tracing::error!(error = %format!("{e:#}"), "mapping reload failed");
                }
            }
        }
    }

    tracing::info!("mapsyncd stopped");
    Ok(())
}

/// Print a summary of the persisted mapping table.
fn print_status(store: &MappingStore) -> Result<()> {
    let table = store.read().context("Failed to read mapping document")?;

    let targets: std::collections::BTreeSet<_> = table.values().flatten().collect();

    println!("mapsyncd status");
    println!("===============");
    println!("Mapping document: {}", store.path().display());
    println!(
        "Tracked: {} entries ({} distinct targets)",
        table.len(),
        targets.len()
    );

    for (key, value) in &table {
        match value {
            Some(v) => println!("  {key} -> {v}"),
            None => println!("  {key} -> (null)"),
        }
    }

    Ok(())
}

/// Create the mapping document with an empty table.
fn init_mapping(store: &MappingStore) -> Result<()> {
    if store.exists() {
        anyhow::bail!(
            "mapping document already exists: {}",
            store.path().display()
        );
    }

    store
        .write(&MappingTable::new())
        .context("Failed to create mapping document")?;
    println!("created {}", store.path().display());
    Ok(())
}
