//! Health classification of uninstall records
//!
//! Decides whether a record is Valid, Ghost or Unknown from its
//! InstallLocation and UninstallString. A found install folder wins
//! outright; otherwise the uninstaller path decides; a record with no path
//! information at all is Unknown.

use crate::model::{AppFields, AppStatus, Health};
use crate::resolver::{PathProbe, PathResolver};

/// Three-state classifier over an injectable filesystem probe
#[derive(Debug, Clone, Default)]
pub struct HealthClassifier<P> {
    resolver: PathResolver<P>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl<P: PathProbe> HealthClassifier<P> {
    pub fn new(probe: P) -> Self {
        HealthClassifier {
            resolver: PathResolver::new(probe),
        }
    }

    pub fn resolver(&self) -> &PathResolver<P> {
        &self.resolver
    }

    /// Classifies one record. Total: every input maps to exactly one status.
    pub fn classify(&self, fields: &AppFields) -> Health {
        let probe = self.resolver.probe();
        let install_location = present(&fields.install_location);
        let uninstall_string = present(&fields.uninstall_string);

        if let Some(location) = install_location {
            let folder = location.trim_matches('"');
            if probe.exists(folder) {
                return Health::new(
                    AppStatus::Valid,
                    format!("Installation folder found: {}", folder),
                );
            }
        }

        if let Some(command) = uninstall_string {
            if let Some(resolution) = self.resolver.resolve_detailed(Some(command)) {
                return if resolution.exists_with(probe) {
                    Health::new(
                        AppStatus::Valid,
                        format!("Uninstaller found: {}", resolution.path),
                    )
                } else {
                    Health::new(
                        AppStatus::Ghost,
                        format!("Uninstaller missing: {}", resolution.path),
                    )
                };
            }
        }

        if install_location.is_none() && uninstall_string.is_none() {
            return Health::new(AppStatus::Unknown, "No path information available");
        }

        Health::new(AppStatus::Ghost, "Files referenced in registry are missing")
    }
}
