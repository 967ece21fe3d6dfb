//! ghostreg - Windows uninstall-record auditor
//!
//! Finds "ghost" applications: entries under the registry Uninstall keys
//! whose program files are gone. Each record is classified Valid, Ghost or
//! Unknown, and a selected record can be removed after its key has been
//! exported to a restorable `.reg` file.

// Core model and registry access
pub mod error;
pub mod model;
pub mod store;
pub mod memory;
pub mod regfile;
#[cfg(windows)]
pub mod registry;

// Scan pipeline
pub mod resolver;
pub mod classifier;
pub mod scanner;

// Mutations
pub mod backup;
pub mod remover;
pub mod session;

// Front-end support
pub mod config;
pub mod logging;
pub mod privilege;

pub use backup::{list_backups, resolve_backup_path, BackupFile, BackupService, RegFileBackup};
pub use classifier::HealthClassifier;
pub use config::Config;
pub use error::{BackupError, ConfigError, RegistryError, RemovalError, SessionError};
pub use memory::MemoryRegistry;
pub use model::{AppEntry, AppFields, AppStatus, Health, RegValue, RegistryView, RootKey};
pub use remover::{DeletionOrchestrator, RemovalReceipt};
pub use resolver::{LocalFs, PathProbe, PathResolver};
pub use scanner::{RegistryScanner, ScanReport, ScanRoot};
pub use session::{AppFilter, AuditSession, ScanSnapshot};
pub use store::RegistryStore;
