//! Registry access abstraction
//!
//! The scanner, remover and file-based backup only talk to the registry
//! through [`RegistryStore`], so they run against [`crate::memory::MemoryRegistry`]
//! in tests and against the live registry on Windows.

use crate::error::RegistryError;
use crate::model::{AccessMode, RegValue, RegistryView, RootKey};

/// Primitive registry operations.
///
/// Every method distinguishes [`RegistryError::AccessDenied`] from
/// [`RegistryError::NotFound`].
pub trait RegistryStore {
    /// Open handle to one key
    type Key;

    /// Opens `path` under `root` through `view`
    fn open_key(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
        access: AccessMode,
    ) -> Result<Self::Key, RegistryError>;

    /// Names of the immediate subkeys of `key`
    fn list_subkey_names(&self, key: &Self::Key) -> Result<Vec<String>, RegistryError>;

    /// Reads a single value. `Ok(None)` when the value does not exist.
    fn read_value(&self, key: &Self::Key, name: &str) -> Result<Option<RegValue>, RegistryError>;

    /// All values of `key`, in the order the store reports them
    fn list_values(&self, key: &Self::Key) -> Result<Vec<(String, RegValue)>, RegistryError>;

    /// Deletes subkey `leaf` of `parent` together with everything below it
    fn delete_key(&self, parent: &Self::Key, leaf: &str) -> Result<(), RegistryError>;

    /// Opens `path`, creating it and any missing ancestors
    fn create_key(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
    ) -> Result<Self::Key, RegistryError>;

    /// Writes `value` under `name` (empty name is the default value)
    fn write_value(&self, key: &Self::Key, name: &str, value: &RegValue)
        -> Result<(), RegistryError>;
}

/// Splits `a\b\c` into (`a\b`, `c`).
///
/// Fails for paths without a parent, since hive roots are never deleted.
pub fn split_key_path(path: &str) -> Result<(&str, &str), RegistryError> {
    let trimmed = path.trim_matches('\\');
    match trimmed.rfind('\\') {
        Some(idx) if idx > 0 && idx + 1 < trimmed.len() => {
            Ok((&trimmed[..idx], &trimmed[idx + 1..]))
        }
        _ => Err(RegistryError::InvalidPath {
            path: path.to_string(),
        }),
    }
}

/// Joins a key path and a child name
pub fn join_key_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('\\');
    if parent.is_empty() {
        child.to_string()
    } else {
        format!(r"{}\{}", parent, child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key_path() {
        let (parent, leaf) =
            split_key_path(r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall\Foo").unwrap();
        assert_eq!(parent, r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall");
        assert_eq!(leaf, "Foo");
    }

    #[test]
    fn test_split_rejects_single_component() {
        assert!(split_key_path("SOFTWARE").is_err());
        assert!(split_key_path("").is_err());
        assert!(split_key_path(r"\Foo").is_err());
    }

    #[test]
    fn test_join_key_path() {
        assert_eq!(join_key_path(r"A\B", "C"), r"A\B\C");
        assert_eq!(join_key_path("", "C"), "C");
    }
}
