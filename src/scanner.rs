//! Scanner module for finding uninstall records
//!
//! Walks the Uninstall branches of the registry, reads each record's
//! values, drops system noise and classifies what is left. Failures on a
//! single root or subkey are logged, recorded in the report and skipped;
//! a scan as a whole never fails.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::classifier::HealthClassifier;
use crate::error::RegistryError;
use crate::model::{AccessMode, AppEntry, AppFields, AppStatus, RegistryView, RootKey};
use crate::resolver::PathProbe;
use crate::store::{join_key_path, RegistryStore};

/// One registry location enumerated for uninstall records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRoot {
    pub root: RootKey,
    pub path: String,
    pub view: RegistryView,
}

impl ScanRoot {
    pub fn new(root: RootKey, path: impl Into<String>, view: RegistryView) -> Self {
        ScanRoot {
            root,
            path: path.into(),
            view,
        }
    }
}

impl fmt::Display for ScanRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r"{}\{} ({})", self.root, self.path, self.view)
    }
}

/// The three Uninstall branches, in traversal order
pub fn default_roots() -> Vec<ScanRoot> {
    vec![
        ScanRoot::new(
            RootKey::LocalMachine,
            r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall",
            RegistryView::Native64,
        ),
        ScanRoot::new(
            RootKey::LocalMachine,
            r"SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall",
            RegistryView::Wow32,
        ),
        ScanRoot::new(
            RootKey::CurrentUser,
            r"Software\Microsoft\Windows\CurrentVersion\Uninstall",
            RegistryView::User,
        ),
    ]
}

/// Why a record was left out of the working set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exclusion {
    /// DisplayName missing or blank
    NoDisplayName,
    /// SystemComponent flag set
    SystemComponent,
    /// Hardware abstraction layer entries
    HardwareArtifact,
}

/// Per-reason exclusion counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionCounts {
    pub no_display_name: usize,
    pub system_component: usize,
    pub hardware_artifact: usize,
}

impl ExclusionCounts {
    fn record(&mut self, reason: Exclusion) {
        match reason {
            Exclusion::NoDisplayName => self.no_display_name += 1,
            Exclusion::SystemComponent => self.system_component += 1,
            Exclusion::HardwareArtifact => self.hardware_artifact += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.no_display_name + self.system_component + self.hardware_artifact
    }
}

/// A root or subkey that could not be opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub root: RootKey,
    pub path: String,
    pub view: RegistryView,
    /// The failure was a permissions problem rather than a missing key
    pub access_denied: bool,
    pub message: String,
}

impl ScanFailure {
    fn new(root: RootKey, path: &str, view: RegistryView, err: &RegistryError) -> Self {
        ScanFailure {
            root,
            path: path.to_string(),
            view,
            access_denied: err.is_access_denied(),
            message: err.to_string(),
        }
    }
}

/// Result of one scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    /// Retained, classified records in traversal order
    pub entries: Vec<AppEntry>,
    /// Roots and subkeys that were skipped
    pub failures: Vec<ScanFailure>,
    pub excluded: ExclusionCounts,
    /// Subkeys skipped because their identity was already seen
    pub duplicates: usize,
    pub duration: Duration,
}

impl ScanReport {
    /// Number of entries with the given status
    pub fn count(&self, status: AppStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scan completed in {:.2?}", self.duration)?;
        writeln!(f, "  Applications: {}", self.entries.len())?;
        writeln!(f, "    Valid:   {}", self.count(AppStatus::Valid))?;
        writeln!(f, "    Ghost:   {}", self.count(AppStatus::Ghost))?;
        writeln!(f, "    Unknown: {}", self.count(AppStatus::Unknown))?;
        writeln!(
            f,
            "  Excluded: {} (no name {}, system {}, HAL {})",
            self.excluded.total(),
            self.excluded.no_display_name,
            self.excluded.system_component,
            self.excluded.hardware_artifact
        )?;
        if !self.failures.is_empty() {
            writeln!(f, "  Skipped keys: {}", self.failures.len())?;
            for failure in &self.failures {
                writeln!(f, r"    {}\{}: {}", failure.root, failure.path, failure.message)?;
            }
        }
        Ok(())
    }
}

/// True for hardware-abstraction-layer records
pub fn is_hardware_artifact(display_name: &str) -> bool {
    let lower = display_name.to_lowercase();
    lower.ends_with("hal") || lower.contains("hardware abstraction layer")
}

/// Retention filter. `None` means the record is kept.
pub fn exclusion_for(fields: &AppFields) -> Option<Exclusion> {
    let name = match fields.display_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return Some(Exclusion::NoDisplayName),
    };

    if fields.system_component == Some(true) {
        return Some(Exclusion::SystemComponent);
    }
    if is_hardware_artifact(name) {
        return Some(Exclusion::HardwareArtifact);
    }
    None
}

/// Enumerates, filters and classifies uninstall records
pub struct RegistryScanner<'a, S, P> {
    store: &'a S,
    classifier: HealthClassifier<P>,
    roots: Vec<ScanRoot>,
}

impl<'a, S: RegistryStore, P: PathProbe> RegistryScanner<'a, S, P> {
    /// Scanner over the default roots
    pub fn new(store: &'a S, probe: P) -> Self {
        RegistryScanner {
            store,
            classifier: HealthClassifier::new(probe),
            roots: default_roots(),
        }
    }

    /// Replace the roots to enumerate
    #[must_use]
    pub fn with_roots(mut self, roots: Vec<ScanRoot>) -> Self {
        self.roots = roots;
        self
    }

    pub fn roots(&self) -> &[ScanRoot] {
        &self.roots
    }

    /// Run the scan over every root
    pub fn scan(&self) -> ScanReport {
        let started = Instant::now();
        let mut report = ScanReport::default();
        let mut seen: HashSet<(RootKey, String)> = HashSet::new();

        for scan_root in &self.roots {
            self.scan_root(scan_root, &mut seen, &mut report);
        }

        report.duration = started.elapsed();
        info!(
            entries = report.entries.len(),
            ghosts = report.count(AppStatus::Ghost),
            excluded = report.excluded.total(),
            failures = report.failures.len(),
            "scan finished"
        );
        report
    }

    fn scan_root(
        &self,
        scan_root: &ScanRoot,
        seen: &mut HashSet<(RootKey, String)>,
        report: &mut ScanReport,
    ) {
        let ScanRoot { root, path, view } = scan_root;

        let names = self
            .store
            .open_key(*root, path, *view, AccessMode::Read)
            .and_then(|key| self.store.list_subkey_names(&key));
        let names = match names {
            Ok(names) => names,
            Err(e) => {
                warn!(root = %root, path = %path, view = %view, error = %e, "cannot enumerate uninstall root");
                report.failures.push(ScanFailure::new(*root, path, *view, &e));
                return;
            }
        };

        debug!(root = %root, path = %path, subkeys = names.len(), "enumerating uninstall root");

        for name in names {
            let registry_path = join_key_path(path, &name);

            // Identity is claimed at discovery, so the first view wins
            if !seen.insert((*root, registry_path.to_lowercase())) {
                debug!(root = %root, path = %registry_path, "duplicate identity skipped");
                report.duplicates += 1;
                continue;
            }

            let key = match self
                .store
                .open_key(*root, &registry_path, *view, AccessMode::Read)
            {
                Ok(key) => key,
                Err(e) => {
                    warn!(root = %root, path = %registry_path, error = %e, "skipping unreadable subkey");
                    report
                        .failures
                        .push(ScanFailure::new(*root, &registry_path, *view, &e));
                    continue;
                }
            };

            let fields = self.read_fields(&key);
            if let Some(reason) = exclusion_for(&fields) {
                debug!(path = %registry_path, ?reason, "record excluded");
                report.excluded.record(reason);
                continue;
            }

            let health = self.classifier.classify(&fields);
            report.entries.push(AppEntry {
                root: *root,
                registry_path,
                key_name: name,
                view: *view,
                fields,
                status: health.status,
                reason: health.reason,
            });
        }
    }

    fn read_fields(&self, key: &S::Key) -> AppFields {
        let read = |name: &str| match self.store.read_value(key, name) {
            Ok(value) => value,
            Err(e) => {
                debug!(value = name, error = %e, "value unreadable, treated as absent");
                None
            }
        };
        let text = |name: &str| read(name).and_then(|v| v.as_text());
        let flag = |name: &str| read(name).map(|v| v.is_truthy());

        AppFields {
            display_name: text("DisplayName"),
            display_version: text("DisplayVersion"),
            publisher: text("Publisher"),
            install_location: text("InstallLocation"),
            uninstall_string: text("UninstallString"),
            quiet_uninstall_string: text("QuietUninstallString"),
            system_component: flag("SystemComponent"),
            windows_installer: flag("WindowsInstaller"),
        }
    }
}
