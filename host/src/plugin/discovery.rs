//! Plugin Discovery
//!
//! Scans the plugins root directory for installable plugins. Each immediate
//! subdirectory holding a readable `plugin.json` yields a manifest; a broken
//! or missing manifest excludes that directory from the result without
//! aborting discovery of its siblings.
//!
//! Discovery is a pure read: it is safe to call repeatedly and tolerates
//! directories appearing or disappearing between calls. Output is ordered
//! ascending by declared priority, ties broken by slug, so seeding and load
//! order are deterministic across restarts.

use std::path::{Path, PathBuf};

use super::manifest::{ManifestError, PluginManifest};

/// Errors produced during a discovery pass
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The plugins root itself is missing - fatal to startup
    #[error("plugins root {0} is missing or not a directory")]
    RootMissing(PathBuf),

    /// The plugins root could not be scanned
    #[error("failed to scan plugins root: {0}")]
    Scan(#[from] std::io::Error),

    /// One plugin directory was skipped; recorded, never thrown
    #[error("plugin directory '{dir}' skipped: {source}")]
    InvalidManifest {
        dir: String,
        #[source]
        source: ManifestError,
    },
}

/// Result of one discovery pass: ordered manifests plus the per-directory
/// errors that were recorded (not thrown) along the way.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Manifests sorted by (priority, slug) ascending
    pub manifests: Vec<PluginManifest>,

    /// Directories skipped due to bad or missing manifests
    pub errors: Vec<DiscoveryError>,
}

impl DiscoveryReport {
    /// Find a discovered manifest by slug.
    pub fn manifest(&self, slug: &str) -> Option<&PluginManifest> {
        self.manifests.iter().find(|m| m.slug == slug)
    }
}

/// Discover installable plugins under `root`.
///
/// Only the root being absent is an error; anything wrong with an individual
/// plugin directory lands in [`DiscoveryReport::errors`].
pub fn discover_plugins(root: &Path) -> Result<DiscoveryReport, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootMissing(root.to_path_buf()));
    }

    let mut report = DiscoveryReport::default();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_dir() {
            continue;
        }

        let dir_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        // Dot-directories are never plugins (upload staging lives here)
        if dir_name.starts_with('.') {
            continue;
        }

        match PluginManifest::from_dir(&path) {
            Ok(manifest) => {
                tracing::trace!(slug = %manifest.slug, "Found plugin candidate");
                report.manifests.push(manifest);
            }
            Err(source) => {
                tracing::warn!(dir = %dir_name, error = %source, "Skipping plugin directory");
                report.errors.push(DiscoveryError::InvalidManifest {
                    dir: dir_name,
                    source,
                });
            }
        }
    }

    report
        .manifests
        .sort_by(|a, b| (a.priority, &a.slug).cmp(&(b.priority, &b.slug)));

    tracing::debug!(
        count = report.manifests.len(),
        skipped = report.errors.len(),
        path = %root.display(),
        "Discovered plugins"
    );

    Ok(report)
}
