//! Live Windows registry store
//!
//! Implements [`RegistryStore`] on top of `winreg`. Views map onto the
//! WOW64 access flags; values are read raw and decoded here so every
//! registry type round-trips through [`RegValue`].
//!
//! ⚠️ WARNING: `delete_key` removes a whole subtree. Callers must have a
//! backup first (see [`crate::remover`]).

use winreg::enums::*;
use winreg::RegKey;

use crate::error::RegistryError;
use crate::model::{AccessMode, RegValue, RegistryView, RootKey};
use crate::regfile::{encode_multi_sz, encode_utf16z, typed_value};
use crate::store::{join_key_path, RegistryStore};

/// Open key plus the addressing it was opened with
pub struct WinKey {
    key: RegKey,
    root: RootKey,
    path: String,
}

/// The registry of the running machine
#[derive(Debug, Default, Clone, Copy)]
pub struct WinRegistry;

impl WinRegistry {
    pub fn new() -> Self {
        WinRegistry
    }

    fn hive(root: RootKey) -> RegKey {
        match root {
            RootKey::LocalMachine => RegKey::predef(HKEY_LOCAL_MACHINE),
            RootKey::CurrentUser => RegKey::predef(HKEY_CURRENT_USER),
        }
    }

    fn view_flag(view: RegistryView) -> u32 {
        match view {
            RegistryView::Native64 => KEY_WOW64_64KEY,
            RegistryView::Wow32 => KEY_WOW64_32KEY,
            RegistryView::User => 0,
        }
    }

    fn describe(root: RootKey, path: &str) -> String {
        format!(r"{}\{}", root, path)
    }
}

fn to_reg_value(raw: &winreg::RegValue) -> RegValue {
    typed_value(raw.vtype.clone() as u32, raw.bytes.clone())
}

/// `winreg` only models the twelve documented value types
fn reg_type(code: u32) -> Option<RegType> {
    Some(match code {
        0 => REG_NONE,
        1 => REG_SZ,
        2 => REG_EXPAND_SZ,
        3 => REG_BINARY,
        4 => REG_DWORD,
        5 => REG_DWORD_BIG_ENDIAN,
        6 => REG_LINK,
        7 => REG_MULTI_SZ,
        8 => REG_RESOURCE_LIST,
        9 => REG_FULL_RESOURCE_DESCRIPTOR,
        10 => REG_RESOURCE_REQUIREMENTS_LIST,
        11 => REG_QWORD,
        _ => return None,
    })
}

fn from_reg_value(value: &RegValue) -> Option<winreg::RegValue> {
    let (bytes, vtype) = match value {
        RegValue::String(s) => (encode_utf16z(s), REG_SZ),
        RegValue::ExpandString(s) => (encode_utf16z(s), REG_EXPAND_SZ),
        RegValue::MultiString(parts) => (encode_multi_sz(parts), REG_MULTI_SZ),
        RegValue::Dword(n) => (n.to_le_bytes().to_vec(), REG_DWORD),
        RegValue::Qword(n) => (n.to_le_bytes().to_vec(), REG_QWORD),
        RegValue::Binary(b) => (b.clone(), REG_BINARY),
        RegValue::Other { vtype, bytes } => (bytes.clone(), reg_type(*vtype)?),
    };
    Some(winreg::RegValue { bytes, vtype })
}

impl RegistryStore for WinRegistry {
    type Key = WinKey;

    fn open_key(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
        access: AccessMode,
    ) -> Result<WinKey, RegistryError> {
        // RegDeleteTree needs DELETE on the parent in addition to read access
        let rights = match access {
            AccessMode::Read => KEY_READ,
            AccessMode::Write => KEY_ALL_ACCESS,
        };

        let key = Self::hive(root)
            .open_subkey_with_flags(path, rights | Self::view_flag(view))
            .map_err(|e| RegistryError::from_io(&Self::describe(root, path), &e))?;

        Ok(WinKey {
            key,
            root,
            path: path.to_string(),
        })
    }

    fn list_subkey_names(&self, key: &WinKey) -> Result<Vec<String>, RegistryError> {
        let mut names = Vec::new();
        for name in key.key.enum_keys() {
            let name =
                name.map_err(|e| RegistryError::from_io(&Self::describe(key.root, &key.path), &e))?;
            names.push(name);
        }
        Ok(names)
    }

    fn read_value(&self, key: &WinKey, name: &str) -> Result<Option<RegValue>, RegistryError> {
        match key.key.get_raw_value(name) {
            Ok(raw) => Ok(Some(to_reg_value(&raw))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RegistryError::from_io(
                &Self::describe(key.root, &join_key_path(&key.path, name)),
                &e,
            )),
        }
    }

    fn list_values(&self, key: &WinKey) -> Result<Vec<(String, RegValue)>, RegistryError> {
        let mut values = Vec::new();
        for item in key.key.enum_values() {
            let (name, raw) =
                item.map_err(|e| RegistryError::from_io(&Self::describe(key.root, &key.path), &e))?;
            values.push((name, to_reg_value(&raw)));
        }
        Ok(values)
    }

    fn delete_key(&self, parent: &WinKey, leaf: &str) -> Result<(), RegistryError> {
        parent.key.delete_subkey_all(leaf).map_err(|e| {
            RegistryError::from_io(
                &Self::describe(parent.root, &join_key_path(&parent.path, leaf)),
                &e,
            )
        })
    }

    fn create_key(
        &self,
        root: RootKey,
        path: &str,
        view: RegistryView,
    ) -> Result<WinKey, RegistryError> {
        let (key, _disposition) = Self::hive(root)
            .create_subkey_with_flags(path, KEY_READ | KEY_WRITE | Self::view_flag(view))
            .map_err(|e| RegistryError::from_io(&Self::describe(root, path), &e))?;

        Ok(WinKey {
            key,
            root,
            path: path.to_string(),
        })
    }

    fn write_value(&self, key: &WinKey, name: &str, value: &RegValue) -> Result<(), RegistryError> {
        let target = Self::describe(key.root, &join_key_path(&key.path, name));
        let raw = from_reg_value(value).ok_or_else(|| RegistryError::Io {
            path: target.clone(),
            message: format!("unsupported value type {:?}", value),
        })?;
        key.key
            .set_raw_value(name, &raw)
            .map_err(|e| RegistryError::from_io(&target, &e))
    }
}
