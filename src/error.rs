//! Error types
//!
//! Registry, backup and removal failures are kept as separate enums so
//! callers can tell "key absent" from "insufficient rights" and a failed
//! backup from a failed delete.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::RootKey;

/// Failures of primitive registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("access denied: {path}")]
    AccessDenied { path: String },

    #[error("key not found: {path}")]
    NotFound { path: String },

    #[error("invalid registry path: {path}")]
    InvalidPath { path: String },

    #[error("registry operation failed on {path}: {message}")]
    Io { path: String, message: String },
}

impl RegistryError {
    /// Maps an OS error for `path` onto the registry taxonomy
    pub fn from_io(path: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => RegistryError::AccessDenied {
                path: path.to_string(),
            },
            std::io::ErrorKind::NotFound => RegistryError::NotFound {
                path: path.to_string(),
            },
            _ => RegistryError::Io {
                path: path.to_string(),
                message: err.to_string(),
            },
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, RegistryError::AccessDenied { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }
}

/// Malformed `.reg` content
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegFileError {
    #[error("not a registry export file: {0}")]
    BadHeader(String),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: unsupported registry root in [{path}]")]
    UnsupportedRoot { line: usize, path: String },
}

/// Failures at the export/import boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackupError {
    #[error("failed to export {root}\\{path}: {message}")]
    ExportFailed {
        root: RootKey,
        path: String,
        message: String,
    },

    #[error("failed to import {}: {message}", file.display())]
    ImportFailed { file: PathBuf, message: String },

    #[error("backup file not found: {}", file.display())]
    FileNotFound { file: PathBuf },

    #[error("backup directory error at {}: {message}", dir.display())]
    Io { dir: PathBuf, message: String },
}

/// Failures of the backup-then-delete transaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemovalError {
    #[error("backup failed, registry left untouched: {0}")]
    BackupFailed(#[source] BackupError),

    #[error(
        "delete failed after backup; backup still exists at {}: {source}",
        backup.display()
    )]
    DeleteFailed {
        backup: PathBuf,
        #[source]
        source: RegistryError,
    },

    #[error("cannot split registry path into parent and key: {path}")]
    InvalidPath { path: String },
}

impl RemovalError {
    /// Backup written before the failure, if any
    pub fn surviving_backup(&self) -> Option<&PathBuf> {
        match self {
            RemovalError::DeleteFailed { backup, .. } => Some(backup),
            _ => None,
        }
    }
}

/// Failures of the session that serializes scans and mutations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("another {0} is in progress")]
    Busy(&'static str),

    #[error(transparent)]
    Removal(#[from] RemovalError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("scan worker exited without a result")]
    WorkerLost,
}

/// Failures loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    #[error("failed to parse config {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_mapping() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(RegistryError::from_io("X", &denied).is_access_denied());

        let missing = io::Error::from(io::ErrorKind::NotFound);
        assert!(RegistryError::from_io("X", &missing).is_not_found());

        let other = io::Error::other("boom");
        assert!(matches!(
            RegistryError::from_io("X", &other),
            RegistryError::Io { .. }
        ));
    }

    #[test]
    fn test_delete_failed_mentions_backup() {
        let err = RemovalError::DeleteFailed {
            backup: PathBuf::from("Foo_20240101_120000.reg"),
            source: RegistryError::AccessDenied {
                path: "SOFTWARE\\Foo".to_string(),
            },
        };
        let message = err.to_string();
        assert!(message.contains("backup still exists"));
        assert!(message.contains("Foo_20240101_120000.reg"));
        assert!(err.surviving_backup().is_some());
    }
}
