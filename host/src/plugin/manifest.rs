//! Plugin Manifest Types
//!
//! A plugin is a directory under the plugins root containing a `plugin.json`
//! descriptor. This module defines the manifest structure and its parsing
//! rules: `slug` defaults to the directory name, `entry` defaults to
//! `"index"`, `version` is required and parsed as semver (invalid versions
//! fall back to 1.0.0 with a warning).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Manifest file name inside each plugin directory
pub const MANIFEST_FILE: &str = "plugin.json";

/// Default entry module name when the manifest omits `entry`
pub const DEFAULT_ENTRY: &str = "index";

/// Errors produced while reading a single plugin manifest
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Manifest file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest file is not valid JSON
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A required field is absent
    #[error("manifest missing required field '{0}'")]
    MissingField(&'static str),
}

/// Client asset declaration inside a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientAssets {
    /// Directory of client sources, relative to the plugin directory
    #[serde(default = "default_client_dir")]
    pub dir: String,

    /// Components the plugin exports to the host UI
    #[serde(default)]
    pub components: Vec<ClientComponentDecl>,
}

fn default_client_dir() -> String {
    "frontend".to_string()
}

/// One exported client component with its usage types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientComponentDecl {
    /// Globally unique component name
    pub name: String,

    /// Usage types this component can be slotted into (e.g. "sidebar-left")
    #[serde(default)]
    pub usages: Vec<String>,

    /// Module path relative to the client asset directory
    pub module: String,
}

/// Parsed plugin manifest
///
/// Ephemeral, derived from `plugin.json` on every discovery pass.
/// Re-discovery of an unchanged directory yields an equal manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Stable unique identifier; the plugin's directory name
    pub slug: String,

    /// Human-readable plugin name
    pub name: String,

    /// Brief description
    #[serde(default)]
    pub description: String,

    /// Entry module path relative to the plugin directory
    pub entry: String,

    /// Semantic version of the plugin
    pub version: semver::Version,

    /// Plugin author or organization
    #[serde(default)]
    pub author: String,

    /// Icon reference for the plugin management UI
    #[serde(default)]
    pub icon: Option<String>,

    /// Category for the plugin management UI
    #[serde(default)]
    pub category: Option<String>,

    /// Default ordering weight; lower loads (and sorts) first
    #[serde(default)]
    pub priority: i64,

    /// Client asset declaration, if the plugin ships UI components
    #[serde(default)]
    pub client: Option<ClientAssets>,

    /// Database schema context name; defaults to the slug with `-` → `_`
    #[serde(default)]
    pub schema: Option<String>,
}

/// Raw manifest as it appears on disk, before defaults are applied
#[derive(Debug, Deserialize)]
struct RawManifest {
    slug: Option<String>,
    name: Option<String>,
    #[serde(default)]
    description: String,
    entry: Option<String>,
    version: Option<String>,
    #[serde(default)]
    author: String,
    icon: Option<String>,
    category: Option<String>,
    #[serde(default)]
    priority: i64,
    client: Option<ClientAssets>,
    schema: Option<String>,
}

impl PluginManifest {
    /// Read and parse the manifest inside `dir`, using the directory name as
    /// the fallback slug.
    pub fn from_dir(dir: &Path) -> Result<Self, ManifestError> {
        let fallback = dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        Self::from_dir_with_slug(dir, fallback.as_deref())
    }

    /// Read and parse the manifest inside `dir` with an explicit fallback
    /// slug (used for archive uploads, where the staging directory name is
    /// meaningless).
    pub fn from_dir_with_slug(
        dir: &Path,
        fallback_slug: Option<&str>,
    ) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;

        let raw: RawManifest =
            serde_json::from_str(&contents).map_err(|source| ManifestError::Parse {
                path: path.clone(),
                source,
            })?;

        let slug = raw
            .slug
            .filter(|s| !s.is_empty())
            .or_else(|| fallback_slug.map(str::to_string))
            .ok_or(ManifestError::MissingField("slug"))?;

        let version_str = raw.version.ok_or(ManifestError::MissingField("version"))?;
        let version = match semver::Version::parse(&version_str) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    slug = %slug,
                    version = %version_str,
                    error = %e,
                    "Invalid plugin version, falling back to 1.0.0"
                );
                semver::Version::new(1, 0, 0)
            }
        };

        Ok(Self {
            name: raw.name.unwrap_or_else(|| slug.clone()),
            entry: raw.entry.unwrap_or_else(|| DEFAULT_ENTRY.to_string()),
            slug,
            description: raw.description,
            version,
            author: raw.author,
            icon: raw.icon,
            category: raw.category,
            priority: raw.priority,
            client: raw.client,
            schema: raw.schema,
        })
    }

    /// Name of the database schema context this plugin's migrations run in.
    pub fn schema_context(&self) -> String {
        self.schema
            .clone()
            .unwrap_or_else(|| self.slug.replace('-', "_"))
    }

    /// Whether the plugin declares any client assets.
    pub fn has_client_assets(&self) -> bool {
        self.client.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, contents: &str) {
        std::fs::write(dir.join(MANIFEST_FILE), contents).unwrap();
    }

    #[test]
    fn test_manifest_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("chat-plugin");
        std::fs::create_dir(&dir).unwrap();
        write_manifest(&dir, r#"{"version": "1.2.3"}"#);

        let manifest = PluginManifest::from_dir(&dir).unwrap();
        assert_eq!(manifest.slug, "chat-plugin");
        assert_eq!(manifest.name, "chat-plugin");
        assert_eq!(manifest.entry, DEFAULT_ENTRY);
        assert_eq!(manifest.version, semver::Version::new(1, 2, 3));
        assert_eq!(manifest.priority, 0);
        assert!(!manifest.has_client_assets());
        assert_eq!(manifest.schema_context(), "chat_plugin");
    }

    #[test]
    fn test_manifest_missing_version() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("no-version");
        std::fs::create_dir(&dir).unwrap();
        write_manifest(&dir, r#"{"name": "No Version"}"#);

        let err = PluginManifest::from_dir(&dir).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("version")));
    }

    #[test]
    fn test_manifest_invalid_version_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bad-version");
        std::fs::create_dir(&dir).unwrap();
        write_manifest(&dir, r#"{"version": "not-semver"}"#);

        let manifest = PluginManifest::from_dir(&dir).unwrap();
        assert_eq!(manifest.version, semver::Version::new(1, 0, 0));
    }

    #[test]
    fn test_manifest_client_assets() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ui-plugin");
        std::fs::create_dir(&dir).unwrap();
        write_manifest(
            &dir,
            r#"{
                "version": "0.1.0",
                "client": {
                    "components": [
                        {"name": "ChatSidebar", "usages": ["sidebar-left"], "module": "components/ChatSidebar.jsx"}
                    ]
                }
            }"#,
        );

        let manifest = PluginManifest::from_dir(&dir).unwrap();
        let client = manifest.client.as_ref().unwrap();
        assert_eq!(client.dir, "frontend");
        assert_eq!(client.components.len(), 1);
        assert_eq!(client.components[0].usages, vec!["sidebar-left"]);
    }

    #[test]
    fn test_manifest_rediscovery_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("stable");
        std::fs::create_dir(&dir).unwrap();
        write_manifest(&dir, r#"{"version": "2.0.0", "priority": 7}"#);

        let first = PluginManifest::from_dir(&dir).unwrap();
        let second = PluginManifest::from_dir(&dir).unwrap();
        assert_eq!(first, second);
    }
}
