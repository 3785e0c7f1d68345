pub mod copier;
pub mod reconciler;
pub mod reload;
pub mod watcher;

use std::path::PathBuf;

/// A change observed in the source tree, one per filesystem notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created { path: PathBuf, is_dir: bool },
    Modified { path: PathBuf, is_dir: bool },
    Deleted { path: PathBuf, is_dir: bool },
    Moved {
        from: PathBuf,
        to: PathBuf,
        is_dir: bool,
    },
}
