//! Backup-then-delete for a single uninstall record
//!
//! ⚠️ WARNING: this is the only place that deletes registry keys. The
//! export must succeed before the store is touched at all.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::backup::BackupService;
use crate::error::{BackupError, RemovalError};
use crate::model::{AccessMode, AppEntry, RegistryView, RootKey};
use crate::store::{split_key_path, RegistryStore};

/// Proof of a completed removal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalReceipt {
    pub root: RootKey,
    pub registry_path: String,
    pub view: RegistryView,
    pub display_name: String,
    /// File that restores the deleted key
    pub backup_path: PathBuf,
    pub removed_at: DateTime<Local>,
}

impl fmt::Display for RemovalReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Removed: {}", self.display_name)?;
        writeln!(f, r"  Key: {}\{} ({})", self.root, self.registry_path, self.view)?;
        writeln!(f, "  Backup: {}", self.backup_path.display())?;
        Ok(())
    }
}

/// Sequences export and delete for one entry
pub struct DeletionOrchestrator<'a, S, B> {
    store: &'a S,
    backup: &'a B,
}

impl<'a, S: RegistryStore, B: BackupService> DeletionOrchestrator<'a, S, B> {
    pub fn new(store: &'a S, backup: &'a B) -> Self {
        DeletionOrchestrator { store, backup }
    }

    /// Backs up the entry's key, then deletes it through the entry's view
    pub fn remove(&self, entry: &AppEntry) -> Result<RemovalReceipt, RemovalError> {
        let (parent_path, leaf) =
            split_key_path(&entry.registry_path).map_err(|_| RemovalError::InvalidPath {
                path: entry.registry_path.clone(),
            })?;

        let backup_path = self
            .backup
            .export(
                entry.root,
                &entry.registry_path,
                entry.view,
                entry.display_name(),
            )
            .map_err(|e| {
                error!(id = %entry.id(), error = %e, "backup failed, key left untouched");
                RemovalError::BackupFailed(e)
            })?;

        info!(id = %entry.id(), backup = %backup_path.display(), "backup written");

        let deleted = self
            .store
            .open_key(entry.root, parent_path, entry.view, AccessMode::Write)
            .and_then(|parent| self.store.delete_key(&parent, leaf));

        if let Err(source) = deleted {
            error!(id = %entry.id(), backup = %backup_path.display(), error = %source, "delete failed");
            return Err(RemovalError::DeleteFailed {
                backup: backup_path,
                source,
            });
        }

        info!(id = %entry.id(), view = %entry.view, "registry key deleted");
        Ok(RemovalReceipt {
            root: entry.root,
            registry_path: entry.registry_path.clone(),
            view: entry.view,
            display_name: entry.display_name().to_string(),
            backup_path,
            removed_at: Local::now(),
        })
    }

    /// Re-imports a backup file
    pub fn restore(&self, file: &Path) -> Result<(), BackupError> {
        self.backup.import(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::RegFileBackup;
    use crate::error::RegistryError;
    use crate::memory::{MemoryKey, MemoryRegistry};
    use crate::model::{AppFields, AppStatus, RegValue};
    use crate::resolver::KnownPaths;
    use crate::scanner::RegistryScanner;
    use std::cell::Cell;
    use std::sync::Arc;

    const UNINSTALL: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";
    const WOW: &str = r"SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall";

    /// Counts delete calls on top of a memory registry
    struct RecordingStore {
        inner: Arc<MemoryRegistry>,
        deletes: Cell<usize>,
    }

    impl RegistryStore for RecordingStore {
        type Key = MemoryKey;

        fn open_key(
            &self,
            root: RootKey,
            path: &str,
            view: RegistryView,
            access: AccessMode,
        ) -> Result<MemoryKey, RegistryError> {
            self.inner.open_key(root, path, view, access)
        }

        fn list_subkey_names(&self, key: &MemoryKey) -> Result<Vec<String>, RegistryError> {
            self.inner.list_subkey_names(key)
        }

        fn read_value(&self, key: &MemoryKey, name: &str) -> Result<Option<RegValue>, RegistryError> {
            self.inner.read_value(key, name)
        }

        fn list_values(&self, key: &MemoryKey) -> Result<Vec<(String, RegValue)>, RegistryError> {
            self.inner.list_values(key)
        }

        fn delete_key(&self, parent: &MemoryKey, leaf: &str) -> Result<(), RegistryError> {
            self.deletes.set(self.deletes.get() + 1);
            self.inner.delete_key(parent, leaf)
        }

        fn create_key(
            &self,
            root: RootKey,
            path: &str,
            view: RegistryView,
        ) -> Result<MemoryKey, RegistryError> {
            self.inner.create_key(root, path, view)
        }

        fn write_value(
            &self,
            key: &MemoryKey,
            name: &str,
            value: &RegValue,
        ) -> Result<(), RegistryError> {
            self.inner.write_value(key, name, value)
        }
    }

    struct FailingBackup;

    impl BackupService for FailingBackup {
        fn export(
            &self,
            root: RootKey,
            path: &str,
            _view: RegistryView,
            _label: &str,
        ) -> Result<PathBuf, BackupError> {
            Err(BackupError::ExportFailed {
                root,
                path: path.to_string(),
                message: "disk full".to_string(),
            })
        }

        fn import(&self, file: &Path) -> Result<(), BackupError> {
            Err(BackupError::FileNotFound {
                file: file.to_path_buf(),
            })
        }
    }

    fn entry(base: &str, key: &str, view: RegistryView) -> AppEntry {
        AppEntry {
            root: RootKey::LocalMachine,
            registry_path: format!(r"{}\{}", base, key),
            key_name: key.to_string(),
            view,
            fields: AppFields {
                display_name: Some(key.to_string()),
                ..Default::default()
            },
            status: AppStatus::Ghost,
            reason: "Uninstaller missing: x".to_string(),
        }
    }

    #[test]
    fn test_backup_failure_never_deletes() {
        let memory = Arc::new(MemoryRegistry::new());
        memory.set_string(RootKey::LocalMachine, &format!(r"{}\Foo", UNINSTALL), "DisplayName", "Foo");
        let store = RecordingStore {
            inner: memory.clone(),
            deletes: Cell::new(0),
        };

        let remover = DeletionOrchestrator::new(&store, &FailingBackup);
        let err = remover
            .remove(&entry(UNINSTALL, "Foo", RegistryView::Native64))
            .unwrap_err();

        assert!(matches!(err, RemovalError::BackupFailed(_)));
        assert_eq!(store.deletes.get(), 0);
        assert!(memory.key_exists(RootKey::LocalMachine, &format!(r"{}\Foo", UNINSTALL)));
    }

    #[test]
    fn test_delete_failure_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryRegistry::new());
        memory.set_string(RootKey::LocalMachine, &format!(r"{}\Foo", UNINSTALL), "DisplayName", "Foo");
        memory.deny_writes(RootKey::LocalMachine, UNINSTALL);
        let backup = RegFileBackup::new(dir.path(), memory.clone());

        let remover = DeletionOrchestrator::new(memory.as_ref(), &backup);
        let err = remover
            .remove(&entry(UNINSTALL, "Foo", RegistryView::Native64))
            .unwrap_err();

        let surviving = err.surviving_backup().unwrap().clone();
        assert!(surviving.exists());
        assert!(err.to_string().contains("backup still exists"));
        assert!(memory.key_exists(RootKey::LocalMachine, &format!(r"{}\Foo", UNINSTALL)));
    }

    #[test]
    fn test_invalid_path_is_rejected_before_backup() {
        let memory = MemoryRegistry::new();
        let mut bad = entry(UNINSTALL, "Foo", RegistryView::Native64);
        bad.registry_path = "Foo".to_string();

        let err = DeletionOrchestrator::new(&memory, &FailingBackup)
            .remove(&bad)
            .unwrap_err();
        assert!(matches!(err, RemovalError::InvalidPath { .. }));
    }

    #[test]
    fn test_deletion_reuses_entry_view() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryRegistry::new());
        memory.set_string(RootKey::LocalMachine, &format!(r"{}\Old32", WOW), "DisplayName", "Old32");
        let backup = RegFileBackup::new(dir.path(), memory.clone());

        let receipt = DeletionOrchestrator::new(memory.as_ref(), &backup)
            .remove(&entry(WOW, "Old32", RegistryView::Wow32))
            .unwrap();

        assert_eq!(receipt.view, RegistryView::Wow32);
        let deletions = memory.deletions();
        assert_eq!(deletions.len(), 1);
        assert_eq!(deletions[0].2, RegistryView::Wow32);
    }

    #[test]
    fn test_end_to_end_ghost_removal_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryRegistry::new());
        let key = format!(r"{}\Foo", UNINSTALL);
        memory.set_string(RootKey::LocalMachine, &key, "DisplayName", "Foo");
        memory.set_string(RootKey::LocalMachine, &key, "InstallLocation", r"C:\NoSuchFolder");
        memory.set_string(
            RootKey::LocalMachine,
            &key,
            "UninstallString",
            r"C:\NoSuchFolder\un.exe",
        );
        let backup = RegFileBackup::new(dir.path(), memory.clone());

        let report = RegistryScanner::new(memory.as_ref(), KnownPaths::default()).scan();
        assert_eq!(report.entries.len(), 1);
        let foo = &report.entries[0];
        assert_eq!(foo.status, AppStatus::Ghost);
        assert_eq!(foo.reason, r"Uninstaller missing: C:\NoSuchFolder\un.exe");

        let remover = DeletionOrchestrator::new(memory.as_ref(), &backup);
        let receipt = remover.remove(foo).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1);
        let stamp = files[0]
            .strip_prefix("Foo_")
            .and_then(|rest| rest.strip_suffix(".reg"))
            .unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").is_ok());
        assert_eq!(receipt.backup_path, dir.path().join(&files[0]));
        assert!(!memory.key_exists(RootKey::LocalMachine, &key));

        let rescan = RegistryScanner::new(memory.as_ref(), KnownPaths::default()).scan();
        assert!(rescan.entries.is_empty());

        remover.restore(&receipt.backup_path).unwrap();
        assert!(memory.key_exists(RootKey::LocalMachine, &key));
        let restored = RegistryScanner::new(memory.as_ref(), KnownPaths::default()).scan();
        assert_eq!(restored.entries.len(), 1);
        assert_eq!(restored.entries[0].display_name(), "Foo");
        assert_eq!(restored.entries[0].fields, foo.fields);
        assert_eq!(restored.entries[0].reason, foo.reason);
    }
}
