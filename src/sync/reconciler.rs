use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{FsEvent, copier};
use crate::store::{MappingStore, MappingTable};
use crate::util::path::{self, RelPath};

/// The kind of the most recently processed file-level operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Created,
    Deleted,
    Modified,
    Moved,
}

/// Single-slot memory of the most recent file-level operation. Overwritten
/// on every file event, no history beyond one step. Consumed only by the
/// cut-and-paste heuristic: a DELETED slot with a key lets an immediately
/// following CREATED of the same basename re-claim the deleted entry's
/// target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastOp {
    pub op: OpType,
    /// The affected mapping key; `None` when the event hit an untracked
    /// path (which inherently blocks cut-and-paste recovery).
    pub key: Option<RelPath>,
    pub value: Option<RelPath>,
}

/// The stateful core: consumes one filesystem event at a time, keeps the
/// in-memory mapping table authoritative, writes every mutation straight
/// through to the store, and drives the file copier.
///
/// Owned by a single task; watcher threads only send messages, they never
/// touch this state directly.
pub struct Reconciler {
    source_root: PathBuf,
    target_root: PathBuf,
    store: MappingStore,
    table: MappingTable,
    // Derived indexes, always equal to keys(table) / non-null values(table).
    keys: BTreeSet<RelPath>,
    values: BTreeSet<RelPath>,
    last_op: Option<LastOp>,
}

impl Reconciler {
    pub fn new(source_root: PathBuf, target_root: PathBuf, store: MappingStore) -> Result<Self> {
        let mut reconciler = Self {
            source_root,
            target_root,
            store,
            table: MappingTable::new(),
            keys: BTreeSet::new(),
            values: BTreeSet::new(),
            last_op: None,
        };
        reconciler.reload()?;
        Ok(reconciler)
    }

    /// Discard the in-memory table and re-read it from the store. A reload
    /// is a full replace; the last-op slot is independent of the table and
    /// survives as-is.
    pub fn reload(&mut self) -> Result<()> {
        self.table = self
            .store
            .read()
            .context("Failed to load mapping document")?;
        self.rebuild_index();
        tracing::info!(
            path = %self.store.path().display(),
            entries = self.keys.len(),
            targets = self.values.len(),
            "mapping loaded"
        );
        Ok(())
    }

    #[cfg(test)]
    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    #[cfg(test)]
    pub fn last_op(&self) -> Option<&LastOp> {
        self.last_op.as_ref()
    }

    pub fn handle_event(&mut self, event: &FsEvent) -> Result<()> {
        match event {
            FsEvent::Modified { path, is_dir } => self.on_modified(path, *is_dir),
            FsEvent::Created { path, is_dir } => self.on_created(path, *is_dir),
            FsEvent::Deleted { path, is_dir } => self.on_deleted(path, *is_dir),
            FsEvent::Moved { from, to, is_dir } => self.on_moved(from, to, *is_dir),
        }
    }

    fn on_modified(&mut self, event_path: &Path, is_dir: bool) -> Result<()> {
        if is_dir {
            tracing::info!(path = %event_path.display(), "directory modified");
            return Ok(());
        }

        let key = path::to_key(event_path, &self.source_root)?;
        if self.need_track(&key) {
            tracing::info!(path = %key, "file modified");
            copier::copy_tracked(event_path, &self.target_root, &key, &self.table);
        }

        let value = self.table.get(&key).cloned().flatten();
        self.set_last(OpType::Modified, Some(key), value);
        Ok(())
    }

    fn on_created(&mut self, event_path: &Path, is_dir: bool) -> Result<()> {
        if is_dir {
            tracing::info!(path = %event_path.display(), "directory created");
            return Ok(());
        }

        let key = path::to_key(event_path, &self.source_root)?;

        // Cut-and-paste heuristic: a move performed by an external tool can
        // surface as an unrelated DELETE followed by an unrelated CREATE.
        // Matching the basename against the immediately preceding tracked
        // DELETE re-claims the lost mapping entry. Basename equality is an
        // approximation, not proof of identity.
        let recovered = match &self.last_op {
            Some(last) if last.op == OpType::Deleted => match &last.key {
                Some(old_key) if old_key.basename() == key.basename() => {
                    Some(last.value.clone())
                }
                _ => None,
            },
            _ => None,
        };
        if let Some(value) = recovered {
            tracing::info!(
                key = %key,
                target = value.as_ref().map(|v| v.as_str()).unwrap_or("null"),
                "cut-and-paste detected, restoring mapping entry"
            );
            self.table.insert(key.clone(), value);
            self.rebuild_index();
            self.persist()?;
        }

        if self.need_track(&key) {
            tracing::info!(path = %key, "file created");
        }

        let value = self.table.get(&key).cloned().flatten();
        self.set_last(OpType::Created, Some(key), value);
        Ok(())
    }

    fn on_deleted(&mut self, event_path: &Path, is_dir: bool) -> Result<()> {
        if is_dir {
            tracing::info!(path = %event_path.display(), "directory deleted");
            return Ok(());
        }

        let key = path::to_key(event_path, &self.source_root)?;

        let (removed_key, removed_value) = if self.need_track(&key) {
            tracing::info!(path = %key, "file deleted");
            let value = self.table.remove(&key).flatten();
            self.rebuild_index();
            self.persist()?;
            (Some(key), value)
        } else {
            // Untracked delete: no entry to remove, nothing to persist.
            (None, None)
        };

        // The removed target survives only here, for a possible
        // cut-and-paste recovery by the next CREATED event.
        self.set_last(OpType::Deleted, removed_key, removed_value);
        Ok(())
    }

    fn on_moved(&mut self, from: &Path, to: &Path, is_dir: bool) -> Result<()> {
        if is_dir {
            tracing::info!(
                from = %from.display(),
                to = %to.display(),
                "directory moved"
            );
            return Ok(());
        }

        let old_key = path::to_key(from, &self.source_root)?;
        if !self.need_track(&old_key) {
            // Untracked rename: ignored entirely, last-op stays as it was.
            return Ok(());
        }

        let new_key = path::to_key(to, &self.source_root)?;
        tracing::info!(from = %old_key, to = %new_key, "file moved");

        let value = self.table.remove(&old_key).flatten();
        self.table.insert(new_key.clone(), value.clone());
        self.rebuild_index();
        self.persist()?;

        self.set_last(OpType::Moved, Some(new_key), value);
        Ok(())
    }

    fn need_track(&self, key: &RelPath) -> bool {
        self.keys.contains(key)
    }

    fn set_last(&mut self, op: OpType, key: Option<RelPath>, value: Option<RelPath>) {
        self.last_op = Some(LastOp { op, key, value });
    }

    fn rebuild_index(&mut self) {
        self.keys = self.table.keys().cloned().collect();
        self.values = self.table.values().flatten().cloned().collect();
    }

    /// Write-through: every table mutation lands in the store immediately.
    fn persist(&self) -> Result<()> {
        self.store
            .write(&self.table)
            .context("Failed to persist mapping document")
    }
}
