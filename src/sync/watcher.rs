use std::path::Path;

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::FsEvent;

/// Handle that keeps the source watcher alive. Drop to stop watching.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
}

/// Start watching the source root recursively for filesystem changes.
///
/// Raw notify events are converted to domain events on the watcher thread
/// and sent over the returned channel; the receiver side (the reconciler
/// loop) processes them one at a time, in arrival order.
pub fn watch_source(root: &Path) -> Result<(mpsc::UnboundedReceiver<FsEvent>, WatcherHandle)> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(
        move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                for converted in convert_event(event) {
                    let _ = tx.send(converted);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "source watcher error");
            }
        },
    )
    .context("Failed to create source watcher")?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch source root: {}", root.display()))?;
    tracing::info!(root = %root.display(), "watching source tree");

    Ok((rx, WatcherHandle { _watcher: watcher }))
}

/// Convert a raw notify event into zero or more domain events.
///
/// Rename reporting differs per platform: a correlated rename arrives as
/// `RenameMode::Both` with two paths, while uncorrelated halves arrive as
/// `From`/`To` and are surfaced as plain delete/create — the reconciler's
/// cut-and-paste heuristic reassembles those when it can.
fn convert_event(event: notify::Event) -> Vec<FsEvent> {
    let mut out = Vec::new();

    match event.kind {
        EventKind::Create(kind) => {
            for path in event.paths {
                let is_dir = match kind {
                    CreateKind::Folder => true,
                    CreateKind::File => false,
                    _ => path.is_dir(),
                };
                out.push(FsEvent::Created { path, is_dir });
            }
        }

        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both if event.paths.len() >= 2 => {
                let from = event.paths[0].clone();
                let to = event.paths[event.paths.len() - 1].clone();
                let is_dir = to.is_dir();
                out.push(FsEvent::Moved { from, to, is_dir });
            }
            RenameMode::From => {
                for path in event.paths {
                    // The old name is gone; the directory flag is
                    // unknowable, treat as a file like the create half.
                    out.push(FsEvent::Deleted { path, is_dir: false });
                }
            }
            RenameMode::To => {
                for path in event.paths {
                    let is_dir = path.is_dir();
                    out.push(FsEvent::Created { path, is_dir });
                }
            }
            _ => {
                for path in event.paths {
                    let is_dir = path.is_dir();
                    out.push(FsEvent::Modified { path, is_dir });
                }
            }
        },

        EventKind::Modify(_) => {
            for path in event.paths {
                let is_dir = path.is_dir();
                out.push(FsEvent::Modified { path, is_dir });
            }
        }

        EventKind::Remove(kind) => {
            for path in event.paths {
                let is_dir = matches!(kind, RemoveKind::Folder);
                out.push(FsEvent::Deleted { path, is_dir });
            }
        }

        // Access and catch-all kinds carry no change we mirror.
        _ => {}
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::Event;
    use std::path::PathBuf;

    #[test]
    fn test_create_file() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/src/a.txt"));
        assert_eq!(
            convert_event(event),
            vec![FsEvent::Created {
                path: PathBuf::from("/src/a.txt"),
                is_dir: false,
            }]
        );
    }

    #[test]
    fn test_create_folder() {
        let event = Event::new(EventKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/src/dir"));
        assert_eq!(
            convert_event(event),
            vec![FsEvent::Created {
                path: PathBuf::from("/src/dir"),
                is_dir: true,
            }]
        );
    }

    #[test]
    fn test_modify_data() {
        let event = Event::new(EventKind::Modify(ModifyKind::Data(
            notify::event::DataChange::Content,
        )))
        .add_path(PathBuf::from("/src/a.txt"));
        assert_eq!(
            convert_event(event),
            vec![FsEvent::Modified {
                path: PathBuf::from("/src/a.txt"),
                is_dir: false,
            }]
        );
    }

    #[test]
    fn test_rename_both_becomes_move() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/src/a.txt"))
            .add_path(PathBuf::from("/src/b.txt"));
        assert_eq!(
            convert_event(event),
            vec![FsEvent::Moved {
                from: PathBuf::from("/src/a.txt"),
                to: PathBuf::from("/src/b.txt"),
                is_dir: false,
            }]
        );
    }

    #[test]
    fn test_rename_halves_become_delete_and_create() {
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/src/a.txt"));
        assert_eq!(
            convert_event(from),
            vec![FsEvent::Deleted {
                path: PathBuf::from("/src/a.txt"),
                is_dir: false,
            }]
        );

        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/src/b.txt"));
        assert_eq!(
            convert_event(to),
            vec![FsEvent::Created {
                path: PathBuf::from("/src/b.txt"),
                is_dir: false,
            }]
        );
    }

    #[test]
    fn test_remove_file_and_folder() {
        let file = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/src/a.txt"));
        assert_eq!(
            convert_event(file),
            vec![FsEvent::Deleted {
                path: PathBuf::from("/src/a.txt"),
                is_dir: false,
            }]
        );

        let folder = Event::new(EventKind::Remove(RemoveKind::Folder))
            .add_path(PathBuf::from("/src/dir"));
        assert_eq!(
            convert_event(folder),
            vec![FsEvent::Deleted {
                path: PathBuf::from("/src/dir"),
                is_dir: true,
            }]
        );
    }

    #[test]
    fn test_access_ignored() {
        let event = Event::new(EventKind::Access(notify::event::AccessKind::Read))
            .add_path(PathBuf::from("/src/a.txt"));
        assert!(convert_event(event).is_empty());
    }
}
