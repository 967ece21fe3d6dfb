//! Configuration management for ghostreg
//!
//! Loaded and merged from:
//! - Default values (hard-coded)
//! - Configuration file (`%APPDATA%\ghostreg\config.toml` or `--config`)
//! - Environment variables (`GHOSTREG_BACKUP_DIR`, `GHOSTREG_LOG`)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::scanner::{default_roots, ScanRoot};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scan: ScanConfig,
}

/// Where and how backups are written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Unset means the per-user default directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub engine: BackupEngine,
}

/// Exporter used for live backups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupEngine {
    /// `reg.exe export` / `reg.exe import`
    #[default]
    RegExe,
    /// In-process `.reg` writer and reader
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
    /// Optional JSON-lines log file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_roots")]
    pub roots: Vec<ScanRoot>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn app_data_dir() -> Option<PathBuf> {
    std::env::var_os("APPDATA").map(|dir| PathBuf::from(dir).join("ghostreg"))
}

impl Config {
    /// `%APPDATA%\ghostreg\config.toml`, if `APPDATA` is set
    pub fn default_path() -> Option<PathBuf> {
        app_data_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Self::parse(&contents).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    fn parse(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }

    /// Load configuration with fallback to defaults.
    ///
    /// An explicit path must exist; the default path is optional.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.merge_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    pub fn merge_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("GHOSTREG_BACKUP_DIR").filter(|v| !v.trim().is_empty()) {
            self.backup.dir = Some(PathBuf::from(dir));
        }

        if let Some(level) = lookup("GHOSTREG_LOG").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.roots.is_empty() {
            return Err(ConfigError::Invalid("scan.roots must not be empty".to_string()));
        }
        if let Some(root) = self
            .scan
            .roots
            .iter()
            .find(|r| r.path.trim_matches('\\').is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "scan root under {} has an empty path",
                root.root
            )));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level must not be empty".to_string()));
        }
        Ok(())
    }

    /// Resolved backup directory
    pub fn backup_dir(&self) -> PathBuf {
        match &self.backup.dir {
            Some(dir) => dir.clone(),
            None => app_data_dir()
                .map(|dir| dir.join("backups"))
                .unwrap_or_else(|| PathBuf::from("backups")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RegistryView, RootKey};

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.backup.engine, BackupEngine::RegExe);
        assert_eq!(config.scan.roots, default_roots());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::parse(
            r#"
[backup]
dir = 'D:\backups'
engine = "native"

[[scan.roots]]
root = "HKCU"
path = 'Software\Microsoft\Windows\CurrentVersion\Uninstall'
view = "user"
"#,
        )
        .unwrap();

        assert_eq!(config.backup_dir(), PathBuf::from(r"D:\backups"));
        assert_eq!(config.backup.engine, BackupEngine::Native);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.scan.roots.len(), 1);
        assert_eq!(config.scan.roots[0].root, RootKey::CurrentUser);
        assert_eq!(config.scan.roots[0].view, RegistryView::User);
    }

    #[test]
    fn test_parse_rejects_unknown_view() {
        let err = Config::parse(
            r#"
[[scan.roots]]
root = "HKLM"
path = "SOFTWARE"
view = "sideways"
"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.merge_env(|name| match name {
            "GHOSTREG_BACKUP_DIR" => Some("/tmp/ghost".to_string()),
            "GHOSTREG_LOG" => Some("debug".to_string()),
            _ => None,
        });
        assert_eq!(config.backup_dir(), PathBuf::from("/tmp/ghost"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_roots_are_invalid() {
        let mut config = Config::default();
        config.scan.roots.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[logging]\nlevel = \"warn\"\n").unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.logging.level, "warn");

        let missing = Config::load_from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        fs::write(&path, "[logging\n").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
