//! `.reg` export format
//!
//! Renders and parses the plain-text format written by `reg export` and
//! understood by `reg import`:
//!
//! ```text
//! Windows Registry Editor Version 5.00
//!
//! [HKEY_LOCAL_MACHINE\SOFTWARE\...\Uninstall\Foo]
//! "DisplayName"="Foo"
//! "SystemComponent"=dword:00000001
//! "Paths"=hex(7):61,00,00,00,00,00
//! ```
//!
//! Files are written as UTF-8. Both UTF-8 and UTF-16LE with BOM (what
//! `reg.exe` produces) are accepted on read.

use std::fmt::Write as _;

use crate::error::{RegFileError, RegistryError};
use crate::model::{AccessMode, RegValue, RegistryView, RootKey};
use crate::store::{join_key_path, RegistryStore};

pub const REG_HEADER: &str = "Windows Registry Editor Version 5.00";

/// Registry value type codes, as written in `hex(N):` values
pub const REG_SZ: u32 = 1;
pub const REG_EXPAND_SZ: u32 = 2;
pub const REG_BINARY: u32 = 3;
pub const REG_DWORD: u32 = 4;
pub const REG_MULTI_SZ: u32 = 7;
pub const REG_QWORD: u32 = 11;
const LEGACY_HEADER: &str = "REGEDIT4";

/// One `[key]` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegSection {
    pub root: RootKey,
    pub path: String,
    pub values: Vec<(String, RegValue)>,
}

/// A whole `.reg` file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegDocument {
    pub sections: Vec<RegSection>,
}

impl RegDocument {
    /// Reads `path` and everything below it from `store`, depth first
    pub fn capture<S: RegistryStore>(
        store: &S,
        root: RootKey,
        path: &str,
        view: RegistryView,
    ) -> Result<Self, RegistryError> {
        let mut doc = RegDocument::default();
        capture_into(store, root, path, view, &mut doc.sections)?;
        Ok(doc)
    }

    /// Writes every section into `store`, creating keys as needed.
    ///
    /// HKLM keys are written through the native view: 32-bit keys already
    /// carry their explicit `WOW6432Node` path in an export.
    pub fn apply<S: RegistryStore>(&self, store: &S) -> Result<usize, RegistryError> {
        let mut written = 0;
        for section in &self.sections {
            let view = match section.root {
                RootKey::LocalMachine => RegistryView::Native64,
                RootKey::CurrentUser => RegistryView::User,
            };
            let key = store.create_key(section.root, &section.path, view)?;
            for (name, value) in &section.values {
                store.write_value(&key, name, value)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Renders the document in `.reg` syntax
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(REG_HEADER);
        out.push_str("\r\n\r\n");

        for section in &self.sections {
            let _ = write!(out, "[{}\\{}]\r\n", section.root.long_name(), section.path);
            for (name, value) in &section.values {
                if name.is_empty() {
                    out.push('@');
                } else {
                    out.push('"');
                    out.push_str(&escape(name));
                    out.push('"');
                }
                out.push('=');
                out.push_str(&render_value(value));
                out.push_str("\r\n");
            }
            out.push_str("\r\n");
        }

        out
    }

    /// Parses `.reg` text
    pub fn parse(text: &str) -> Result<Self, RegFileError> {
        let mut lines = text.lines().enumerate().peekable();
        let mut doc = RegDocument::default();

        let header = loop {
            match lines.next() {
                Some((_, line)) if line.trim().is_empty() => continue,
                Some((_, line)) => break line.trim().trim_start_matches('\u{feff}').to_string(),
                None => return Err(RegFileError::BadHeader("empty file".to_string())),
            }
        };
        if header != REG_HEADER && header != LEGACY_HEADER {
            return Err(RegFileError::BadHeader(header));
        }

        while let Some((idx, raw)) = lines.next() {
            let line_no = idx + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            if let Some(inner) = line.strip_prefix('[') {
                let path = inner.strip_suffix(']').ok_or_else(|| RegFileError::Syntax {
                    line: line_no,
                    message: "unterminated key header".to_string(),
                })?;
                if path.starts_with('-') {
                    return Err(RegFileError::Syntax {
                        line: line_no,
                        message: "key deletion entries are not supported".to_string(),
                    });
                }
                let (hive, rest) = path.split_once('\\').unwrap_or((path, ""));
                let root = hive
                    .parse::<RootKey>()
                    .map_err(|_| RegFileError::UnsupportedRoot {
                        line: line_no,
                        path: path.to_string(),
                    })?;
                doc.sections.push(RegSection {
                    root,
                    path: rest.trim_matches('\\').to_string(),
                    values: Vec::new(),
                });
                continue;
            }

            let section = doc.sections.last_mut().ok_or_else(|| RegFileError::Syntax {
                line: line_no,
                message: "value outside of a key section".to_string(),
            })?;

            let mut logical = line.to_string();
            while logical.ends_with('\\') && is_hex_line(&logical) {
                logical.pop();
                match lines.next() {
                    Some((_, next)) => logical.push_str(next.trim()),
                    None => break,
                }
            }

            let (name, data) = split_assignment(&logical).ok_or_else(|| RegFileError::Syntax {
                line: line_no,
                message: format!("expected name=value, got `{}`", logical),
            })?;
            let value = parse_value(data).map_err(|message| RegFileError::Syntax {
                line: line_no,
                message,
            })?;
            section.values.push((name, value));
        }

        Ok(doc)
    }
}

fn capture_into<S: RegistryStore>(
    store: &S,
    root: RootKey,
    path: &str,
    view: RegistryView,
    sections: &mut Vec<RegSection>,
) -> Result<(), RegistryError> {
    let key = store.open_key(root, path, view, AccessMode::Read)?;
    sections.push(RegSection {
        root,
        path: path.to_string(),
        values: store.list_values(&key)?,
    });

    for child in store.list_subkey_names(&key)? {
        capture_into(store, root, &join_key_path(path, &child), view, sections)?;
    }
    Ok(())
}

/// Decodes file bytes, honoring a UTF-16LE or UTF-8 byte order mark
pub fn decode_text(bytes: &[u8]) -> Result<String, RegFileError> {
    if let Some(body) = bytes.strip_prefix(&[0xff, 0xfe]) {
        if body.len() % 2 != 0 {
            return Err(RegFileError::BadHeader(
                "truncated UTF-16 file (odd byte count)".to_string(),
            ));
        }
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16(&units)
            .map_err(|e| RegFileError::BadHeader(format!("invalid UTF-16: {}", e)));
    }

    let body = bytes.strip_prefix(&[0xef, 0xbb, 0xbf]).unwrap_or(bytes);
    String::from_utf8(body.to_vec())
        .map_err(|e| RegFileError::BadHeader(format!("invalid UTF-8: {}", e)))
}

fn is_hex_line(line: &str) -> bool {
    line.split_once('=')
        .map(|(_, data)| data.trim_start().starts_with("hex"))
        .unwrap_or(false)
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Splits `"name"=data` or `@=data`, unescaping the name
fn split_assignment(line: &str) -> Option<(String, &str)> {
    if let Some(rest) = line.strip_prefix('@') {
        return rest.trim_start().strip_prefix('=').map(|d| (String::new(), d.trim()));
    }

    let (name, consumed) = read_quoted(line)?;
    let rest = line[consumed..].trim_start().strip_prefix('=')?;
    Some((name, rest.trim()))
}

/// Reads a leading `"..."` token; returns the unescaped text and bytes consumed
fn read_quoted(s: &str) -> Option<(String, usize)> {
    let body = s.strip_prefix('"')?;
    let mut out = String::new();
    let mut chars = body.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => return None,
            },
            '"' => return Some((out, idx + 2)),
            other => out.push(other),
        }
    }
    None
}

fn render_value(value: &RegValue) -> String {
    match value {
        RegValue::String(s) if !s.contains(['\r', '\n', '\0']) => format!("\"{}\"", escape(s)),
        RegValue::String(s) => format!("hex(1):{}", hex_list(&encode_utf16z(s))),
        RegValue::ExpandString(s) => format!("hex(2):{}", hex_list(&encode_utf16z(s))),
        RegValue::MultiString(parts) => format!("hex(7):{}", hex_list(&encode_multi_sz(parts))),
        RegValue::Dword(n) => format!("dword:{:08x}", n),
        RegValue::Qword(n) => format!("hex(b):{}", hex_list(&n.to_le_bytes())),
        RegValue::Binary(bytes) => format!("hex:{}", hex_list(bytes)),
        RegValue::Other { vtype, bytes } => format!("hex({:x}):{}", vtype, hex_list(bytes)),
    }
}

fn hex_list(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_hex_bytes(list: &str) -> Result<Vec<u8>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| u8::from_str_radix(part, 16).map_err(|_| format!("bad hex byte `{}`", part)))
        .collect()
}

fn parse_value(data: &str) -> Result<RegValue, String> {
    if data.starts_with('"') {
        let (text, consumed) = read_quoted(data).ok_or("unterminated string")?;
        if !data[consumed..].trim().is_empty() {
            return Err("trailing characters after string".to_string());
        }
        return Ok(RegValue::String(text));
    }

    if data == "-" {
        return Err("value deletion entries are not supported".to_string());
    }

    if let Some(hex) = data.strip_prefix("dword:") {
        return u32::from_str_radix(hex.trim(), 16)
            .map(RegValue::Dword)
            .map_err(|_| format!("bad dword `{}`", hex));
    }

    if let Some(list) = data.strip_prefix("hex:") {
        return parse_hex_bytes(list).map(RegValue::Binary);
    }

    if let Some(rest) = data.strip_prefix("hex(") {
        let (kind, list) = rest.split_once("):").ok_or("malformed hex(type) value")?;
        let vtype = u32::from_str_radix(kind.trim(), 16)
            .map_err(|_| format!("bad value type `{}`", kind))?;
        return Ok(typed_value(vtype, parse_hex_bytes(list)?));
    }

    Err(format!("unrecognized value `{}`", data))
}

/// Interprets raw registry data of type `vtype`.
///
/// Data that does not fit its declared type stays [`RegValue::Other`], so
/// writing it back reproduces the original type and bytes.
pub fn typed_value(vtype: u32, bytes: Vec<u8>) -> RegValue {
    let is_text = bytes.len() % 2 == 0;
    match vtype {
        REG_SZ if is_text => RegValue::String(decode_utf16z(&bytes)),
        REG_EXPAND_SZ if is_text => RegValue::ExpandString(decode_utf16z(&bytes)),
        REG_MULTI_SZ if is_text => RegValue::MultiString(decode_multi_sz(&bytes)),
        REG_BINARY => RegValue::Binary(bytes),
        REG_DWORD if bytes.len() == 4 => {
            RegValue::Dword(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        REG_QWORD if bytes.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes);
            RegValue::Qword(u64::from_le_bytes(buf))
        }
        _ => RegValue::Other { vtype, bytes },
    }
}

/// UTF-16LE with a terminating NUL, as stored for REG_SZ
pub fn encode_utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Inverse of [`encode_utf16z`]; stops at the first NUL
pub fn decode_utf16z(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// REG_MULTI_SZ layout: each string NUL-terminated, then one more NUL
pub fn encode_multi_sz(parts: &[String]) -> Vec<u8> {
    let mut units: Vec<u16> = Vec::new();
    for part in parts {
        units.extend(part.encode_utf16());
        units.push(0);
    }
    units.push(0);
    units.into_iter().flat_map(u16::to_le_bytes).collect()
}

/// Inverse of [`encode_multi_sz`]. Empty strings inside the list are kept.
pub fn decode_multi_sz(bytes: &[u8]) -> Vec<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    // list terminator, then the last string's own NUL
    let body = units.strip_suffix(&[0]).unwrap_or(&units);
    if body.is_empty() {
        return Vec::new();
    }
    let body = body.strip_suffix(&[0]).unwrap_or(body);

    body.split(|&unit| unit == 0)
        .map(String::from_utf16_lossy)
        .collect()
}
