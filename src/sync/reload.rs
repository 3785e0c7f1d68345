use std::ffi::OsString;
use std::path::Path;

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Handle that keeps the mapping document watcher alive.
pub struct ReloadHandle {
    _watcher: RecommendedWatcher,
}

/// Watch the mapping document's containing directory (non-recursive) and
/// signal whenever the document itself is modified, so the reconciler can
/// reload its in-memory table.
///
/// Only the mapping file triggers a signal; churn on siblings (the lock
/// file in particular) is ignored.
pub fn watch_mapping(mapping_path: &Path) -> Result<(mpsc::UnboundedReceiver<()>, ReloadHandle)> {
    let dir = mapping_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .with_context(|| {
            format!(
                "Mapping document has no containing directory: {}",
                mapping_path.display()
            )
        })?;
    let file_name: OsString = mapping_path
        .file_name()
        .with_context(|| format!("Mapping path has no file name: {}", mapping_path.display()))?
        .to_os_string();

    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(
        move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_)) {
                    return;
                }
                let hits_mapping = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()) && !p.is_dir());
                if hits_mapping {
                    let _ = tx.send(());
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "mapping watcher error");
            }
        },
    )
    .context("Failed to create mapping watcher")?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch mapping directory: {}", dir.display()))?;
    tracing::info!(path = %mapping_path.display(), "watching mapping document");

    Ok((rx, ReloadHandle { _watcher: watcher }))
}
