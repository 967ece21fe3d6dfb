//! Uninstall-command path extraction
//!
//! Uninstall strings come in three shapes: installer-indirect (`MsiExec.exe
//! /X{GUID}`), quoted (`"C:\Program Files\App\un.exe" /S`) and bare
//! (`C:\Program Files\App\un.exe /S`, spaces unquoted). Each shape is one
//! [`Heuristic`]; [`PathResolver`] tries them in order and the first one
//! that yields a path wins.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Executable that every installer-indirect command resolves to
pub const INSTALLER_ENGINE_PATH: &str = r"C:\Windows\System32\msiexec.exe";

/// Filesystem existence check, injectable for tests
pub trait PathProbe {
    fn exists(&self, path: &str) -> bool;
}

/// Checks the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl PathProbe for LocalFs {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }
}

/// Fixed set of paths that "exist"; everything else is missing
#[derive(Debug, Default, Clone)]
pub struct KnownPaths {
    paths: HashSet<String>,
}

impl KnownPaths {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KnownPaths {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl PathProbe for KnownPaths {
    fn exists(&self, path: &str) -> bool {
        self.paths.contains(path)
    }
}

impl<P: PathProbe + ?Sized> PathProbe for &P {
    fn exists(&self, path: &str) -> bool {
        (**self).exists(path)
    }
}

/// One way of pulling a path out of a command string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Heuristic {
    /// Command runs through the Windows Installer engine
    InstallerEngine,
    /// Path is wrapped in double quotes
    Quoted,
    /// Path is the first token, or several tokens re-joined on spaces
    Unquoted,
}

/// Evaluation order of the heuristics
pub const HEURISTIC_CHAIN: [Heuristic; 3] = [
    Heuristic::InstallerEngine,
    Heuristic::Quoted,
    Heuristic::Unquoted,
];

/// A resolved path and how it was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub path: String,
    pub heuristic: Heuristic,
    /// The path was confirmed to exist while resolving
    pub verified: bool,
}

impl Resolution {
    /// Whether the resolved path should be treated as present on disk.
    ///
    /// The installer engine path is always considered present. This keeps
    /// every MSI-managed record Valid; resolving the cached package from the
    /// product GUID is not attempted.
    pub fn exists_with(&self, probe: &impl PathProbe) -> bool {
        self.verified || self.heuristic == Heuristic::InstallerEngine || probe.exists(&self.path)
    }
}

impl Heuristic {
    /// Applies this heuristic to an already-trimmed, non-empty command.
    ///
    /// `None` means the heuristic does not apply and the next one is tried.
    pub fn apply(self, command: &str, probe: &impl PathProbe) -> Option<Resolution> {
        match self {
            Heuristic::InstallerEngine => {
                if command.to_lowercase().contains("msiexec") {
                    Some(Resolution {
                        path: INSTALLER_ENGINE_PATH.to_string(),
                        heuristic: self,
                        verified: false,
                    })
                } else {
                    None
                }
            }
            Heuristic::Quoted => {
                let body = command.strip_prefix('"')?;
                let end = body.find('"')?;
                Some(Resolution {
                    path: body[..end].to_string(),
                    heuristic: self,
                    verified: false,
                })
            }
            Heuristic::Unquoted => resolve_unquoted(command, probe),
        }
    }
}

fn resolve_unquoted(command: &str, probe: &impl PathProbe) -> Option<Resolution> {
    let parts: Vec<&str> = command.split_whitespace().collect();
    let first = *parts.first()?;

    let found = |path: String| Resolution {
        path,
        heuristic: Heuristic::Unquoted,
        verified: true,
    };

    if probe.exists(first) {
        return Some(found(first.to_string()));
    }

    for count in 2..=parts.len() {
        let candidate = parts[..count].join(" ");
        if probe.exists(&candidate) {
            return Some(found(candidate));
        }
        let with_ext = format!("{}.exe", candidate);
        if probe.exists(&with_ext) {
            return Some(found(with_ext));
        }
    }

    // Best-effort guess; callers re-check existence
    Some(Resolution {
        path: first.to_string(),
        heuristic: Heuristic::Unquoted,
        verified: false,
    })
}

/// Extracts a candidate executable path from an uninstall command
#[derive(Debug, Clone, Default)]
pub struct PathResolver<P> {
    probe: P,
}

impl<P: PathProbe> PathResolver<P> {
    pub fn new(probe: P) -> Self {
        PathResolver { probe }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Path named by `command`, if any heuristic finds one
    pub fn resolve(&self, command: Option<&str>) -> Option<String> {
        self.resolve_detailed(command).map(|r| r.path)
    }

    /// Like [`resolve`](Self::resolve), keeping which heuristic matched.
    ///
    /// The first heuristic that applies decides. If it yields an empty path
    /// (`"" /S`) the command counts as unresolved.
    pub fn resolve_detailed(&self, command: Option<&str>) -> Option<Resolution> {
        let raw = command?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        HEURISTIC_CHAIN
            .iter()
            .find_map(|heuristic| heuristic.apply(trimmed, &self.probe))
            .filter(|resolution| !resolution.path.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(existing: &[&str]) -> PathResolver<KnownPaths> {
        PathResolver::new(KnownPaths::new(existing.iter().copied()))
    }

    #[test]
    fn test_empty_command_resolves_nothing() {
        let r = resolver(&[]);
        assert_eq!(r.resolve(None), None);
        assert_eq!(r.resolve(Some("")), None);
        assert_eq!(r.resolve(Some("   ")), None);
    }

    #[test]
    fn test_quoted_path_extraction() {
        let r = resolver(&[]);
        assert_eq!(
            r.resolve(Some(r#""C:\Program Files\App\un.exe" /S"#)),
            Some(r"C:\Program Files\App\un.exe".to_string())
        );
    }

    #[test]
    fn test_quoted_without_closing_quote_falls_through() {
        let r = resolver(&[]);
        let resolution = r
            .resolve_detailed(Some(r#""C:\App\un.exe /S"#))
            .unwrap();
        assert_eq!(resolution.heuristic, Heuristic::Unquoted);
        assert_eq!(resolution.path, r#""C:\App\un.exe"#);
    }

    #[test]
    fn test_empty_quoted_path_is_unresolved() {
        let r = resolver(&[]);
        assert_eq!(r.resolve(Some("\"\" /S")), None);
        assert_eq!(r.resolve(Some("\"\"")), None);
        assert_eq!(r.resolve(Some("\"   \" /S")), None);
    }

    #[test]
    fn test_unquoted_space_joined_fallback() {
        let r = resolver(&[r"C:\Program Files\App\un.exe"]);
        let resolution = r
            .resolve_detailed(Some(r"C:\Program Files\App\un.exe /S"))
            .unwrap();
        assert_eq!(resolution.path, r"C:\Program Files\App\un.exe");
        assert!(resolution.verified);
    }

    #[test]
    fn test_unquoted_exe_suffix_recovery() {
        let r = resolver(&[r"C:\Program Files\App\uninstall.exe"]);
        assert_eq!(
            r.resolve(Some(r"C:\Program Files\App\uninstall /quiet")),
            Some(r"C:\Program Files\App\uninstall.exe".to_string())
        );
    }

    #[test]
    fn test_unquoted_first_token_exists() {
        let r = resolver(&[r"C:\Tools\un.exe"]);
        assert_eq!(
            r.resolve(Some(r"C:\Tools\un.exe /S")),
            Some(r"C:\Tools\un.exe".to_string())
        );
    }

    #[test]
    fn test_unverified_first_token_guess() {
        let r = resolver(&[]);
        let resolution = r
            .resolve_detailed(Some(r"C:\Program Files\Gone\un.exe /S"))
            .unwrap();
        assert_eq!(resolution.path, r"C:\Program");
        assert!(!resolution.verified);
    }

    #[test]
    fn test_msiexec_resolves_to_installer_engine() {
        let r = resolver(&[]);
        let resolution = r
            .resolve_detailed(Some("MsiExec.exe /X{11111111-2222-3333-4444-555555555555}"))
            .unwrap();
        assert_eq!(resolution.path, INSTALLER_ENGINE_PATH);
        assert_eq!(resolution.heuristic, Heuristic::InstallerEngine);
        assert!(resolution.exists_with(r.probe()));
    }

    #[test]
    fn test_msiexec_wins_over_quotes() {
        let r = resolver(&[]);
        assert_eq!(
            r.resolve(Some(r#""C:\Windows\System32\MSIEXEC.EXE" /x{GUID}"#)),
            Some(INSTALLER_ENGINE_PATH.to_string())
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let r = resolver(&[r"C:\Program Files\App\un.exe"]);
        let inputs = [
            r#""C:\Program Files\App\un.exe" /S"#,
            r"C:\Program Files\App\un.exe /S",
            r"C:\Missing\un.exe",
            "msiexec /x{GUID}",
            "",
        ];

        for input in inputs {
            assert_eq!(r.resolve(Some(input)), r.resolve(Some(input)));
        }
    }

    #[test]
    fn test_each_heuristic_in_isolation() {
        let probe = KnownPaths::default();
        assert!(Heuristic::InstallerEngine.apply("un.exe", &probe).is_none());
        assert!(Heuristic::Quoted.apply("un.exe", &probe).is_none());
        assert_eq!(
            Heuristic::Quoted.apply(r#""a b" c"#, &probe).unwrap().path,
            "a b"
        );
        assert_eq!(
            Heuristic::Unquoted.apply("un.exe /S", &probe).unwrap().path,
            "un.exe"
        );
    }
}
