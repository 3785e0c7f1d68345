use std::path::Path;

use anyhow::{Context, Result};

use crate::store::MappingTable;
use crate::util::path::RelPath;

/// Copy a tracked source file to its mapped location under the target root.
///
/// No-op when the key has no mapping entry (or maps to an explicit null).
/// An extension mismatch between the key and its mapped value is only a
/// warning; the mapping is trusted even when it looks inconsistent.
///
/// Copy failures are logged here and never propagated — one broken file
/// must not abort monitoring of the rest of the tree.
pub fn copy_tracked(
    source_abs: &Path,
    target_root: &Path,
    key: &RelPath,
    table: &MappingTable,
) {
    let Some(Some(target_rel)) = table.get(key) else {
        return;
    };

    if key.extension() != target_rel.extension() {
        tracing::warn!(
            source = %key,
            target = %target_rel,
            "extension mismatch between source file and mapped target"
        );
    }

    let target_abs = target_root.join(target_rel.as_str());
    match copy_file(source_abs, &target_abs) {
        Ok(()) => {
            tracing::info!(
                from = %source_abs.display(),
                to = %target_abs.display(),
                "synchronized"
            );
        }
        Err(e) => {
            tracing::error!(
                from = %source_abs.display(),
                to = %target_abs.display(),
                error = %format!("{e:#}"),
                "synchronization failed"
            );
        }
    }
}

/// Copy content and metadata, creating missing target directories and
/// overwriting any existing target file.
fn copy_file(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create target directory: {}", parent.display()))?;
    }
    // fs::copy carries permission bits along with the content.
    std::fs::copy(source, target)
        .with_context(|| format!("Failed to copy {}", source.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MappingTable;
    use tempfile::tempdir;

    fn rel(s: &str) -> RelPath {
        RelPath::new(s).unwrap()
    }

    #[test]
    fn test_copies_tracked_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, "hello").unwrap();

        let mut table = MappingTable::new();
        table.insert(rel("a.txt"), Some(rel("nested/out/a.txt")));

        let target_root = dir.path().join("target");
        copy_tracked(&source, &target_root, &rel("a.txt"), &table);

        let copied = std::fs::read_to_string(target_root.join("nested/out/a.txt")).unwrap();
        assert_eq!(copied, "hello");
    }

    #[test]
    fn test_overwrites_existing_target() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, "new").unwrap();

        let target_root = dir.path().join("target");
        std::fs::create_dir_all(&target_root).unwrap();
        std::fs::write(target_root.join("a.txt"), "old").unwrap();

        let mut table = MappingTable::new();
        table.insert(rel("a.txt"), Some(rel("a.txt")));
        copy_tracked(&source, &target_root, &rel("a.txt"), &table);

        assert_eq!(
            std::fs::read_to_string(target_root.join("a.txt")).unwrap(),
            "new"
        );
    }

    #[test]
    fn test_untracked_is_noop() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, "hello").unwrap();

        let target_root = dir.path().join("target");
        copy_tracked(&source, &target_root, &rel("a.txt"), &MappingTable::new());

        assert!(!target_root.exists());
    }

    #[test]
    fn test_null_target_is_noop() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, "hello").unwrap();

        let mut table = MappingTable::new();
        table.insert(rel("a.txt"), None);

        let target_root = dir.path().join("target");
        copy_tracked(&source, &target_root, &rel("a.txt"), &table);

        assert!(!target_root.exists());
    }

    #[test]
    fn test_extension_mismatch_still_copies() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, "content").unwrap();

        let mut table = MappingTable::new();
        table.insert(rel("a.txt"), Some(rel("out/a.md")));

        let target_root = dir.path().join("target");
        copy_tracked(&source, &target_root, &rel("a.txt"), &table);

        assert_eq!(
            std::fs::read_to_string(target_root.join("out/a.md")).unwrap(),
            "content"
        );
    }

    #[test]
    fn test_missing_source_does_not_panic() {
        let dir = tempdir().unwrap();
        let mut table = MappingTable::new();
        table.insert(rel("gone.txt"), Some(rel("out/gone.txt")));

        copy_tracked(
            &dir.path().join("gone.txt"),
            &dir.path().join("target"),
            &rel("gone.txt"),
            &table,
        );
    }
}
