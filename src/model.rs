//! Core data types for uninstall-record auditing
//!
//! Everything the scanner produces and the remover consumes lives here:
//! registry roots and views, raw value types, and the classified
//! application entry itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registry hive an uninstall record was discovered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RootKey {
    /// HKEY_LOCAL_MACHINE (machine-wide installs)
    #[serde(rename = "HKLM")]
    LocalMachine,
    /// HKEY_CURRENT_USER (per-user installs)
    #[serde(rename = "HKCU")]
    CurrentUser,
}

impl RootKey {
    /// Short hive name, as used in identities and `reg.exe` arguments
    pub fn short_name(self) -> &'static str {
        match self {
            RootKey::LocalMachine => "HKLM",
            RootKey::CurrentUser => "HKCU",
        }
    }

    /// Long hive name, as written in `.reg` section headers
    pub fn long_name(self) -> &'static str {
        match self {
            RootKey::LocalMachine => "HKEY_LOCAL_MACHINE",
            RootKey::CurrentUser => "HKEY_CURRENT_USER",
        }
    }
}

impl fmt::Display for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for RootKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HKLM" | "HKEY_LOCAL_MACHINE" => Ok(RootKey::LocalMachine),
            "HKCU" | "HKEY_CURRENT_USER" => Ok(RootKey::CurrentUser),
            other => Err(format!("unsupported registry root: {}", other)),
        }
    }
}

/// Registry view a key was read through.
///
/// On 64-bit Windows the same logical path can resolve to different
/// physical keys depending on the view, so deletion must reuse the view
/// the entry was discovered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryView {
    /// Native 64-bit view (KEY_WOW64_64KEY)
    Native64,
    /// 32-bit compatibility view (KEY_WOW64_32KEY)
    Wow32,
    /// Current-user hive, no view flag
    User,
}

impl fmt::Display for RegistryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryView::Native64 => write!(f, "64-bit"),
            RegistryView::Wow32 => write!(f, "32-bit"),
            RegistryView::User => write!(f, "user"),
        }
    }
}

/// Access requested when opening a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// A typed registry value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegValue {
    /// REG_SZ
    String(String),
    /// REG_EXPAND_SZ
    ExpandString(String),
    /// REG_MULTI_SZ
    MultiString(Vec<String>),
    /// REG_DWORD
    Dword(u32),
    /// REG_QWORD
    Qword(u64),
    /// REG_BINARY
    Binary(Vec<u8>),
    /// Any other type, or a known type whose data does not fit it
    /// (e.g. a REG_DWORD that is not four bytes long). Kept raw so it is
    /// written back with the same type.
    Other { vtype: u32, bytes: Vec<u8> },
}

impl RegValue {
    /// Textual form of the value, if it has one
    pub fn as_text(&self) -> Option<String> {
        match self {
            RegValue::String(s) | RegValue::ExpandString(s) => Some(s.clone()),
            RegValue::MultiString(parts) => Some(parts.join(" ")),
            RegValue::Dword(n) => Some(n.to_string()),
            RegValue::Qword(n) => Some(n.to_string()),
            RegValue::Binary(_) | RegValue::Other { .. } => None,
        }
    }

    /// Interprets the value as a boolean-like flag.
    ///
    /// Non-zero integers are truthy; strings are truthy when they read
    /// `1`, `true` or `yes` in any case.
    pub fn is_truthy(&self) -> bool {
        match self {
            RegValue::Dword(n) => *n != 0,
            RegValue::Qword(n) => *n != 0,
            RegValue::String(s) | RegValue::ExpandString(s) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
            }
            RegValue::MultiString(_) | RegValue::Binary(_) | RegValue::Other { .. } => false,
        }
    }
}

/// Health of an application record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppStatus {
    /// Referenced files exist on disk
    Valid,
    /// Registry record remains but its files are gone
    Ghost,
    /// Record carries no path information to check
    Unknown,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppStatus::Valid => write!(f, "Valid"),
            AppStatus::Ghost => write!(f, "Ghost"),
            AppStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Classification verdict: a status plus its human-readable justification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: AppStatus,
    pub reason: String,
}

impl Health {
    pub fn new(status: AppStatus, reason: impl Into<String>) -> Self {
        Health {
            status,
            reason: reason.into(),
        }
    }
}

/// Raw values read from one uninstall key. Absent or unreadable values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppFields {
    pub display_name: Option<String>,
    pub display_version: Option<String>,
    pub publisher: Option<String>,
    pub install_location: Option<String>,
    pub uninstall_string: Option<String>,
    pub quiet_uninstall_string: Option<String>,
    /// SystemComponent flag (hidden from Programs and Features when set)
    pub system_component: Option<bool>,
    /// WindowsInstaller flag (MSI-managed record)
    pub windows_installer: Option<bool>,
}

/// One discovered and classified application record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    /// Hive the record lives under
    pub root: RootKey,
    /// Full key path below the hive, e.g. `SOFTWARE\...\Uninstall\{GUID}`
    pub registry_path: String,
    /// Leaf key name
    pub key_name: String,
    /// View the key was read through; deletion reopens the same view
    pub view: RegistryView,
    /// Raw values
    pub fields: AppFields,
    /// Classification result
    pub status: AppStatus,
    /// Why the classifier decided on `status`
    pub reason: String,
}

impl AppEntry {
    /// Trimmed display name. Retained entries always have one.
    pub fn display_name(&self) -> &str {
        self.fields.display_name.as_deref().map(str::trim).unwrap_or("")
    }

    /// Dedup identity `(root, registry_path)`
    pub fn identity(&self) -> (RootKey, &str) {
        (self.root, self.registry_path.as_str())
    }

    /// Printable identity, e.g. `HKLM\SOFTWARE\...\{GUID}`
    pub fn id(&self) -> String {
        format!(r"{}\{}", self.root, self.registry_path)
    }

    pub fn is_ghost(&self) -> bool {
        self.status == AppStatus::Ghost
    }
}

impl fmt::Display for AppEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name: {}", self.display_name())?;
        writeln!(f, "Status: {}", self.status)?;
        writeln!(f, "Reason: {}", self.reason)?;
        writeln!(f)?;
        writeln!(f, "Registry Path: {}", self.id())?;
        writeln!(f, "View: {}", self.view)?;
        if let Some(version) = &self.fields.display_version {
            writeln!(f, "Version: {}", version)?;
        }
        if let Some(publisher) = &self.fields.publisher {
            writeln!(f, "Publisher: {}", publisher)?;
        }
        writeln!(
            f,
            "Install Location: {}",
            self.fields.install_location.as_deref().unwrap_or("-")
        )?;
        writeln!(
            f,
            "Uninstall String: {}",
            self.fields.uninstall_string.as_deref().unwrap_or("-")
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_key_parsing() {
        assert_eq!("hklm".parse::<RootKey>().unwrap(), RootKey::LocalMachine);
        assert_eq!(
            "HKEY_CURRENT_USER".parse::<RootKey>().unwrap(),
            RootKey::CurrentUser
        );
        assert!("HKCR".parse::<RootKey>().is_err());
    }

    #[test]
    fn test_truthy_flags() {
        assert!(RegValue::Dword(1).is_truthy());
        assert!(!RegValue::Dword(0).is_truthy());
        assert!(RegValue::String(" True ".to_string()).is_truthy());
        assert!(!RegValue::String("0".to_string()).is_truthy());
        assert!(!RegValue::Binary(vec![1]).is_truthy());
        assert!(!RegValue::Other { vtype: 4, bytes: vec![1] }.is_truthy());
    }

    #[test]
    fn test_entry_identity() {
        let entry = AppEntry {
            root: RootKey::LocalMachine,
            registry_path: r"SOFTWARE\Uninstall\Foo".to_string(),
            key_name: "Foo".to_string(),
            view: RegistryView::Native64,
            fields: AppFields {
                display_name: Some("  Foo  ".to_string()),
                ..Default::default()
            },
            status: AppStatus::Unknown,
            reason: String::new(),
        };

        assert_eq!(entry.display_name(), "Foo");
        assert_eq!(entry.id(), r"HKLM\SOFTWARE\Uninstall\Foo");
        assert_eq!(entry.identity(), (RootKey::LocalMachine, r"SOFTWARE\Uninstall\Foo"));
    }

    #[test]
    fn test_root_serializes_short_name() {
        let json = serde_json::to_string(&RootKey::CurrentUser).unwrap();
        assert_eq!(json, "\"HKCU\"");
    }
}
