//! Registry key backups
//!
//! A backup is one `.reg` file per removed record, named after the
//! record's display name and the time it was taken. Files are never
//! overwritten; a clash within the same second gets a numeric suffix.

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
#[cfg(windows)]
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::BackupError;
use crate::model::{RegistryView, RootKey};
use crate::regfile::{decode_text, RegDocument};
use crate::store::RegistryStore;

/// Exports a key to a restorable file and imports such files back
pub trait BackupService {
    /// Writes `root\path` (and its subkeys) to a new file, returning its path
    fn export(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
        label: &str,
    ) -> Result<PathBuf, BackupError>;

    /// Restores the keys and values stored in `file`
    fn import(&self, file: &Path) -> Result<(), BackupError>;
}

impl<B: BackupService + ?Sized> BackupService for &B {
    fn export(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
        label: &str,
    ) -> Result<PathBuf, BackupError> {
        (**self).export(root, path, view, label)
    }

    fn import(&self, file: &Path) -> Result<(), BackupError> {
        (**self).import(file)
    }
}

impl<B: BackupService + ?Sized> BackupService for Arc<B> {
    fn export(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
        label: &str,
    ) -> Result<PathBuf, BackupError> {
        (**self).export(root, path, view, label)
    }

    fn import(&self, file: &Path) -> Result<(), BackupError> {
        (**self).import(file)
    }
}

/// Keeps alphanumerics, spaces, `-` and `_`; falls back to `backup`
pub fn sanitize_label(label: &str) -> String {
    let kept: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();
    let trimmed = kept.trim();
    if trimmed.is_empty() {
        "backup".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `{label}_{YYYYMMDD_HHMMSS}.reg`
pub fn backup_file_name(label: &str, at: NaiveDateTime) -> String {
    format!("{}_{}.reg", sanitize_label(label), at.format("%Y%m%d_%H%M%S"))
}

/// First free backup path in `dir` for `label` at time `at`
pub fn unused_backup_path(dir: &Path, label: &str, at: NaiveDateTime) -> PathBuf {
    let first = dir.join(backup_file_name(label, at));
    if !first.exists() {
        return first;
    }

    let stem = format!("{}_{}", sanitize_label(label), at.format("%Y%m%d_%H%M%S"));
    let mut n = 2;
    loop {
        let candidate = dir.join(format!("{}_{}.reg", stem, n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn prepare_dir(dir: &Path) -> Result<(), BackupError> {
    fs::create_dir_all(dir).map_err(|e| BackupError::Io {
        dir: dir.to_path_buf(),
        message: e.to_string(),
    })
}

/// Backups rendered in-process through a [`RegistryStore`].
///
/// Works on any platform. Offline audits use it against the in-memory
/// registry; on Windows it is selected with `[backup] engine = "native"`.
pub struct RegFileBackup<S> {
    dir: PathBuf,
    store: Arc<S>,
}

impl<S: RegistryStore> RegFileBackup<S> {
    pub fn new(dir: impl Into<PathBuf>, store: Arc<S>) -> Self {
        RegFileBackup {
            dir: dir.into(),
            store,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl<S: RegistryStore> BackupService for RegFileBackup<S> {
    fn export(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
        label: &str,
    ) -> Result<PathBuf, BackupError> {
        let failed = |message: String| BackupError::ExportFailed {
            root,
            path: path.to_string(),
            message,
        };

        let doc = RegDocument::capture(self.store.as_ref(), root, path, view)
            .map_err(|e| failed(e.to_string()))?;

        prepare_dir(&self.dir)?;
        let file = unused_backup_path(&self.dir, label, Local::now().naive_local());
        fs::write(&file, doc.render()).map_err(|e| failed(e.to_string()))?;

        info!(root = %root, path, file = %file.display(), sections = doc.sections.len(), "registry key exported");
        Ok(file)
    }

    fn import(&self, file: &Path) -> Result<(), BackupError> {
        if !file.is_file() {
            return Err(BackupError::FileNotFound {
                file: file.to_path_buf(),
            });
        }

        let failed = |message: String| BackupError::ImportFailed {
            file: file.to_path_buf(),
            message,
        };

        let bytes = fs::read(file).map_err(|e| failed(e.to_string()))?;
        let text = decode_text(&bytes).map_err(|e| failed(e.to_string()))?;
        let doc = RegDocument::parse(&text).map_err(|e| failed(e.to_string()))?;
        let written = doc
            .apply(self.store.as_ref())
            .map_err(|e| failed(e.to_string()))?;

        info!(file = %file.display(), values = written, "registry file imported");
        Ok(())
    }
}

/// Backups produced by the system `reg.exe`
#[cfg(windows)]
pub struct RegExeBackup {
    dir: PathBuf,
}

#[cfg(windows)]
impl RegExeBackup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        RegExeBackup { dir: dir.into() }
    }

    fn view_switch(view: RegistryView) -> Option<&'static str> {
        match view {
            RegistryView::Native64 => Some("/reg:64"),
            RegistryView::Wow32 => Some("/reg:32"),
            RegistryView::User => None,
        }
    }

    fn run(args: &[&OsStr]) -> Result<(), String> {
        let output = std::process::Command::new("reg")
            .args(args)
            .output()
            .map_err(|e| format!("failed to run reg.exe: {}", e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let detail = if !stderr.is_empty() { stderr } else { stdout };
        Err(format!("status={} {}", output.status, detail).trim().to_string())
    }
}

#[cfg(windows)]
impl BackupService for RegExeBackup {
    fn export(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
        label: &str,
    ) -> Result<PathBuf, BackupError> {
        prepare_dir(&self.dir)?;
        let file = unused_backup_path(&self.dir, label, Local::now().naive_local());
        let key = format!(r"{}\{}", root.short_name(), path);

        let mut args = vec![
            OsStr::new("export"),
            OsStr::new(key.as_str()),
            file.as_os_str(),
            OsStr::new("/y"),
        ];
        if let Some(switch) = Self::view_switch(view) {
            args.push(OsStr::new(switch));
        }

        Self::run(&args).map_err(|message| BackupError::ExportFailed {
            root,
            path: path.to_string(),
            message,
        })?;

        info!(key = %key, file = %file.display(), "registry key exported with reg.exe");
        Ok(file)
    }

    fn import(&self, file: &Path) -> Result<(), BackupError> {
        if !file.is_file() {
            return Err(BackupError::FileNotFound {
                file: file.to_path_buf(),
            });
        }

        Self::run(&[OsStr::new("import"), file.as_os_str()]).map_err(|message| {
            BackupError::ImportFailed {
                file: file.to_path_buf(),
                message,
            }
        })?;

        info!(file = %file.display(), "registry file imported with reg.exe");
        Ok(())
    }
}

/// A backup file in the backup directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Local>,
}

/// `.reg` files in `dir`, newest first. A missing directory is empty.
pub fn list_backups(dir: &Path) -> Result<Vec<BackupFile>, BackupError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let io_err = |e: std::io::Error| BackupError::Io {
        dir: dir.to_path_buf(),
        message: e.to_string(),
    };

    let mut backups = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        let is_reg = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("reg"))
            .unwrap_or(false);
        if !is_reg {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                debug!(file = %path.display(), error = %e, "skipping unreadable backup");
                continue;
            }
        };
        let modified = metadata
            .modified()
            .map(DateTime::<Local>::from)
            .unwrap_or_else(|_| Local::now());

        backups.push(BackupFile {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: metadata.len(),
            modified,
            path,
        });
    }

    backups.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
    Ok(backups)
}

/// Accepts a path, or a bare file name looked up in `dir`
pub fn resolve_backup_path(dir: &Path, name_or_path: &str) -> PathBuf {
    let given = Path::new(name_or_path);
    if given.is_absolute() || given.components().count() > 1 || given.exists() {
        given.to_path_buf()
    } else {
        dir.join(given)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRegistry;
    use crate::model::RegValue;
    use chrono::NaiveDate;

    const UNINSTALL: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("Foo"), "Foo");
        assert_eq!(sanitize_label("  Foo: Bar/Baz v1.0  "), "Foo BarBaz v10");
        assert_eq!(sanitize_label("my-app_x64"), "my-app_x64");
        assert_eq!(sanitize_label("???"), "backup");
        assert_eq!(sanitize_label(""), "backup");
    }

    #[test]
    fn test_backup_file_name_format() {
        assert_eq!(backup_file_name("Foo", at()), "Foo_20240309_140507.reg");
    }

    #[test]
    fn test_collision_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = unused_backup_path(dir.path(), "Foo", at());
        fs::write(&first, "x").unwrap();
        let second = unused_backup_path(dir.path(), "Foo", at());
        fs::write(&second, "x").unwrap();
        let third = unused_backup_path(dir.path(), "Foo", at());

        assert_eq!(first.file_name().unwrap(), "Foo_20240309_140507.reg");
        assert_eq!(second.file_name().unwrap(), "Foo_20240309_140507_2.reg");
        assert_eq!(third.file_name().unwrap(), "Foo_20240309_140507_3.reg");
    }

    #[test]
    fn test_export_import_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryRegistry::new());
        let key = format!(r"{}\Foo", UNINSTALL);
        store.set_string(RootKey::LocalMachine, &key, "DisplayName", "Foo");
        store.set_value(RootKey::LocalMachine, &key, "NoModify", RegValue::Dword(1));
        store.set_value(
            RootKey::LocalMachine,
            &format!(r"{}\Sub", key),
            "",
            RegValue::MultiString(vec!["a".to_string(), "b".to_string()]),
        );
        store.set_value(
            RootKey::LocalMachine,
            &key,
            "M",
            RegValue::MultiString(vec!["a".to_string(), String::new(), "b".to_string()]),
        );
        store.set_value(
            RootKey::LocalMachine,
            &key,
            "Flag",
            RegValue::Other { vtype: 0, bytes: Vec::new() },
        );
        store.set_value(
            RootKey::LocalMachine,
            &key,
            "L",
            RegValue::Other { vtype: 6, bytes: vec![0x41, 0x00] },
        );

        let backup = RegFileBackup::new(dir.path().join("backups"), store.clone());
        let file = backup
            .export(RootKey::LocalMachine, &key, RegistryView::Native64, "Foo")
            .unwrap();
        assert!(file.exists());
        let before = store.values_of(RootKey::LocalMachine, &key).unwrap();

        let parent = store
            .open_key(
                RootKey::LocalMachine,
                UNINSTALL,
                RegistryView::Native64,
                crate::model::AccessMode::Write,
            )
            .unwrap();
        store.delete_key(&parent, "Foo").unwrap();
        assert!(!store.key_exists(RootKey::LocalMachine, &key));

        backup.import(&file).unwrap();
        assert_eq!(store.values_of(RootKey::LocalMachine, &key).unwrap(), before);
        assert!(store.key_exists(RootKey::LocalMachine, &format!(r"{}\Sub", key)));
    }

    #[test]
    fn test_export_of_missing_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backup = RegFileBackup::new(dir.path(), Arc::new(MemoryRegistry::new()));
        let err = backup
            .export(RootKey::CurrentUser, r"Software\Nope", RegistryView::User, "Nope")
            .unwrap_err();
        assert!(matches!(err, BackupError::ExportFailed { .. }));
        assert!(list_backups(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_import_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let backup = RegFileBackup::new(dir.path(), Arc::new(MemoryRegistry::new()));
        let err = backup.import(&dir.path().join("gone.reg")).unwrap_err();
        assert!(matches!(err, BackupError::FileNotFound { .. }));
    }

    #[test]
    fn test_import_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.reg");
        fs::write(&file, "not a registry file").unwrap();
        let backup = RegFileBackup::new(dir.path(), Arc::new(MemoryRegistry::new()));
        assert!(matches!(
            backup.import(&file).unwrap_err(),
            BackupError::ImportFailed { .. }
        ));
    }

    #[test]
    fn test_list_backups() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_backups(&dir.path().join("missing")).unwrap().is_empty());

        fs::write(dir.path().join("A_20240101_000000.reg"), "x").unwrap();
        fs::write(dir.path().join("B_20240102_000000.reg"), "xy").unwrap();
        fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let backups = list_backups(dir.path()).unwrap();
        assert_eq!(backups.len(), 2);
        assert!(backups[0].modified >= backups[1].modified);
        assert!(backups.iter().all(|b| b.name.ends_with(".reg")));
    }

    #[test]
    fn test_resolve_backup_path() {
        let dir = Path::new("backups");
        assert_eq!(
            resolve_backup_path(dir, "Foo_20240101_000000.reg"),
            dir.join("Foo_20240101_000000.reg")
        );
        assert_eq!(
            resolve_backup_path(dir, "other/Foo.reg"),
            PathBuf::from("other/Foo.reg")
        );
    }
}
