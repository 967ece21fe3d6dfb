//! In-memory registry
//!
//! A case-insensitive key tree behind a mutex. Tests use it as the
//! registry fake; the CLI uses it to audit a `.reg` snapshot offline.
//! Views are not modelled: 32-bit keys live at their explicit
//! `WOW6432Node` paths, the way `reg export` presents them.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::RegistryError;
use crate::model::{AccessMode, RegValue, RegistryView, RootKey};
use crate::store::{join_key_path, RegistryStore};

/// Handle returned by [`MemoryRegistry::open_key`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryKey {
    pub root: RootKey,
    pub path: String,
    pub view: RegistryView,
    pub access: AccessMode,
}

#[derive(Debug, Clone, Default)]
struct Node {
    /// Path with original casing
    path: String,
    values: Vec<(String, RegValue)>,
}

#[derive(Debug, Default)]
struct Inner {
    keys: BTreeMap<(RootKey, String), Node>,
    denied: HashSet<(RootKey, String)>,
    read_only: HashSet<(RootKey, String)>,
    deletions: Vec<(RootKey, String, RegistryView)>,
}

/// Registry tree held in memory
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    inner: Mutex<Inner>,
}

fn fold(path: &str) -> String {
    path.trim_matches('\\').to_lowercase()
}

fn parent_of(folded: &str) -> Option<&str> {
    folded.rfind('\\').map(|idx| &folded[..idx])
}

impl Inner {
    /// True when `path` or one of its ancestors is listed in `set`
    fn covered(set: &HashSet<(RootKey, String)>, root: RootKey, folded: &str) -> bool {
        let mut current = Some(folded);
        while let Some(path) = current {
            if set.contains(&(root, path.to_string())) {
                return true;
            }
            current = parent_of(path);
        }
        false
    }

    fn ensure_key(&mut self, root: RootKey, path: &str) -> String {
        let trimmed = path.trim_matches('\\');
        let mut built = String::new();
        for part in trimmed.split('\\').filter(|p| !p.is_empty()) {
            built = join_key_path(&built, part);
            self.keys
                .entry((root, fold(&built)))
                .or_insert_with(|| Node {
                    path: built.clone(),
                    values: Vec::new(),
                });
        }
        built
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates `path` (and ancestors) if missing
    pub fn add_key(&self, root: RootKey, path: &str) {
        self.lock().ensure_key(root, path);
    }

    /// Creates `path` if needed and sets one value on it
    pub fn set_value(&self, root: RootKey, path: &str, name: &str, value: RegValue) {
        let mut inner = self.lock();
        inner.ensure_key(root, path);
        if let Some(node) = inner.keys.get_mut(&(root, fold(path))) {
            upsert(&mut node.values, name, value);
        }
    }

    /// Convenience for string values
    pub fn set_string(&self, root: RootKey, path: &str, name: &str, value: &str) {
        self.set_value(root, path, name, RegValue::String(value.to_string()));
    }

    /// Any open of `path` or a key below it fails with `AccessDenied`
    pub fn deny_access(&self, root: RootKey, path: &str) {
        self.lock().denied.insert((root, fold(path)));
    }

    /// Opens of `path` or a key below it with write access fail with `AccessDenied`
    pub fn deny_writes(&self, root: RootKey, path: &str) {
        self.lock().read_only.insert((root, fold(path)));
    }

    pub fn key_exists(&self, root: RootKey, path: &str) -> bool {
        self.lock().keys.contains_key(&(root, fold(path)))
    }

    /// Values of a key, or `None` when the key is absent
    pub fn values_of(&self, root: RootKey, path: &str) -> Option<Vec<(String, RegValue)>> {
        self.lock()
            .keys
            .get(&(root, fold(path)))
            .map(|node| node.values.clone())
    }

    /// Every key path under `root`, in sorted order
    pub fn key_paths(&self, root: RootKey) -> Vec<String> {
        self.lock()
            .keys
            .iter()
            .filter(|((r, _), _)| *r == root)
            .map(|(_, node)| node.path.clone())
            .collect()
    }

    /// Successful deletions as (root, deleted path, view used)
    pub fn deletions(&self) -> Vec<(RootKey, String, RegistryView)> {
        self.lock().deletions.clone()
    }
}

fn upsert(values: &mut Vec<(String, RegValue)>, name: &str, value: RegValue) {
    match values
        .iter_mut()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
    {
        Some(slot) => slot.1 = value,
        None => values.push((name.to_string(), value)),
    }
}

impl RegistryStore for MemoryRegistry {
    type Key = MemoryKey;

    fn open_key(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
        access: AccessMode,
    ) -> Result<MemoryKey, RegistryError> {
        let inner = self.lock();
        let folded = fold(path);

        if Inner::covered(&inner.denied, root, &folded) {
            return Err(RegistryError::AccessDenied {
                path: path.to_string(),
            });
        }
        if access == AccessMode::Write && Inner::covered(&inner.read_only, root, &folded) {
            return Err(RegistryError::AccessDenied {
                path: path.to_string(),
            });
        }

        match inner.keys.get(&(root, folded)) {
            Some(node) => Ok(MemoryKey {
                root,
                path: node.path.clone(),
                view,
                access,
            }),
            None => Err(RegistryError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    fn list_subkey_names(&self, key: &MemoryKey) -> Result<Vec<String>, RegistryError> {
        let inner = self.lock();
        let prefix = format!(r"{}\", fold(&key.path));

        Ok(inner
            .keys
            .iter()
            .filter(|((root, folded), _)| {
                *root == key.root
                    && folded.starts_with(&prefix)
                    && !folded[prefix.len()..].contains('\\')
            })
            .filter_map(|(_, node)| node.path.rsplit('\\').next().map(str::to_string))
            .collect())
    }

    fn read_value(&self, key: &MemoryKey, name: &str) -> Result<Option<RegValue>, RegistryError> {
        let inner = self.lock();
        let node = inner
            .keys
            .get(&(key.root, fold(&key.path)))
            .ok_or_else(|| RegistryError::NotFound {
                path: key.path.clone(),
            })?;

        Ok(node
            .values
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone()))
    }

    fn list_values(&self, key: &MemoryKey) -> Result<Vec<(String, RegValue)>, RegistryError> {
        let inner = self.lock();
        inner
            .keys
            .get(&(key.root, fold(&key.path)))
            .map(|node| node.values.clone())
            .ok_or_else(|| RegistryError::NotFound {
                path: key.path.clone(),
            })
    }

    fn delete_key(&self, parent: &MemoryKey, leaf: &str) -> Result<(), RegistryError> {
        let target = join_key_path(&parent.path, leaf);

        if parent.access != AccessMode::Write {
            return Err(RegistryError::AccessDenied { path: target });
        }

        let mut inner = self.lock();
        let folded = fold(&target);
        if !inner.keys.contains_key(&(parent.root, folded.clone())) {
            return Err(RegistryError::NotFound { path: target });
        }

        let below = format!(r"{}\", folded);
        inner.keys.retain(|(root, path), _| {
            *root != parent.root || (*path != folded && !path.starts_with(&below))
        });
        inner.deletions.push((parent.root, target, parent.view));
        Ok(())
    }

    fn create_key(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
    ) -> Result<MemoryKey, RegistryError> {
        let mut inner = self.lock();
        let folded = fold(path);
        if folded.is_empty() {
            return Err(RegistryError::InvalidPath {
                path: path.to_string(),
            });
        }
        if Inner::covered(&inner.denied, root, &folded)
            || Inner::covered(&inner.read_only, root, &folded)
        {
            return Err(RegistryError::AccessDenied {
                path: path.to_string(),
            });
        }

        let created = inner.ensure_key(root, path);
        let canonical = inner
            .keys
            .get(&(root, folded))
            .map(|node| node.path.clone())
            .unwrap_or(created);

        Ok(MemoryKey {
            root,
            path: canonical,
            view,
            access: AccessMode::Write,
        })
    }

    fn write_value(
        &self,
        key: &MemoryKey,
        name: &str,
        value: &RegValue,
    ) -> Result<(), RegistryError> {
        if key.access != AccessMode::Write {
            return Err(RegistryError::AccessDenied {
                path: key.path.clone(),
            });
        }

        let mut inner = self.lock();
        let node = inner
            .keys
            .get_mut(&(key.root, fold(&key.path)))
            .ok_or_else(|| RegistryError::NotFound {
                path: key.path.clone(),
            })?;
        upsert(&mut node.values, name, value.clone());
        Ok(())
    }
}
