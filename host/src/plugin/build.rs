//! Client Component Build Pipeline
//!
//! Collects the client components plugins declare in their manifests and
//! materializes them into a single import map the frontend loads at runtime.
//! Two generated artifacts live in the generated directory:
//!
//! - `plugin-imports.json` - the machine-readable map, keyed by component name
//! - `plugin-imports.ts`   - a typed module re-exporting the same map
//!
//! Both files are written atomically (temp file + rename) so a reader never
//! observes a half-written map. Builds are per-plugin and additive: a plugin
//! whose build fails keeps whatever entries it had from its last good build,
//! and never disturbs other plugins' entries.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::manifest::PluginManifest;

/// File name of the JSON import map
pub const IMPORT_MAP_FILE: &str = "plugin-imports.json";

/// File name of the generated TypeScript module
pub const IMPORT_MODULE_FILE: &str = "plugin-imports.ts";

/// Build errors
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Generated directory or map file could not be read/written
    #[error("build io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The existing import map is not valid JSON
    #[error("corrupt import map at {path}: {source}")]
    CorruptMap {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One component entry in the import map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientComponentEntry {
    /// Component name, unique across the map
    pub name: String,

    /// Where the frontend mounts the component (e.g. `dashboard-widget`)
    pub usages: Vec<String>,

    /// Import path served to the frontend
    pub module: String,

    /// Owning plugin slug
    pub plugin: String,

    /// Owning plugin's priority, used to settle name conflicts
    pub priority: i64,

    /// Position within the owning plugin's declaration list
    #[serde(default)]
    pub order: usize,
}

/// The persisted import map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportMap {
    /// Entries keyed by component name; BTreeMap keeps output byte-stable
    pub components: BTreeMap<String, ClientComponentEntry>,
}

impl ImportMap {
    /// Look up a component by its globally unique name.
    pub fn component(&self, name: &str) -> Option<&ClientComponentEntry> {
        self.components.get(name)
    }

    /// All components declaring `usage`, ordered by owning plugin priority
    /// then declaration order within the plugin.
    pub fn components_by_usage(&self, usage: &str) -> Vec<&ClientComponentEntry> {
        let mut matches: Vec<&ClientComponentEntry> = self
            .components
            .values()
            .filter(|e| e.usages.iter().any(|u| u == usage))
            .collect();
        matches.sort_by(|a, b| {
            (a.priority, a.plugin.as_str(), a.order).cmp(&(b.priority, b.plugin.as_str(), b.order))
        });
        matches
    }
}

/// Outcome of building one plugin's components
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Components were (re)written into the map
    Success { components: usize },

    /// Plugin declares no client assets
    Skipped,

    /// Validation failed; the plugin's previous entries were kept
    Failed { reason: String },
}

/// Outcome of a full build pass
#[derive(Debug)]
pub struct BuildReport {
    /// Per-plugin outcomes in build order
    pub outcomes: Vec<(String, BuildOutcome)>,

    /// Total components in the map after the pass
    pub total_components: usize,
}

impl BuildReport {
    /// Whether any plugin's build failed.
    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, BuildOutcome::Failed { .. }))
    }
}

/// Builds and maintains the client component import map.
pub struct ComponentBuilder {
    plugins_root: PathBuf,
    generated_dir: PathBuf,
}

impl ComponentBuilder {
    pub fn new(plugins_root: impl Into<PathBuf>, generated_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_root: plugins_root.into(),
            generated_dir: generated_dir.into(),
        }
    }

    /// Path of the JSON import map.
    pub fn map_path(&self) -> PathBuf {
        self.generated_dir.join(IMPORT_MAP_FILE)
    }

    /// Load the current map, or an empty one when none has been written yet.
    pub fn load_map(&self) -> Result<ImportMap, BuildError> {
        let path = self.map_path();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ImportMap::default());
            }
            Err(source) => return Err(BuildError::Io { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| BuildError::CorruptMap { path, source })
    }

    /// Build one plugin's components into the map.
    ///
    /// On validation failure the map (including the plugin's previous
    /// entries) is left untouched and the reason is reported.
    pub fn build_plugin(&self, manifest: &PluginManifest) -> Result<BuildOutcome, BuildError> {
        let Some(client) = &manifest.client else {
            return Ok(BuildOutcome::Skipped);
        };

        let entries = match self.validate_components(manifest, client) {
            Ok(entries) => entries,
            Err(reason) => {
                tracing::warn!(slug = %manifest.slug, reason = %reason, "Component build failed");
                return Ok(BuildOutcome::Failed { reason });
            }
        };

        let mut map = self.load_map()?;
        self.merge_plugin_entries(&mut map, &manifest.slug, entries);
        let count = map
            .components
            .values()
            .filter(|e| e.plugin == manifest.slug)
            .count();
        self.write_map(&map)?;

        tracing::info!(slug = %manifest.slug, components = count, "Components built");
        Ok(BuildOutcome::Success { components: count })
    }

    /// Build every plugin's components in one pass.
    ///
    /// A failing plugin keeps its previous entries; successful plugins are
    /// rewritten. The map is written once at the end.
    pub fn build_all(&self, manifests: &[PluginManifest]) -> Result<BuildReport, BuildError> {
        let mut map = self.load_map()?;
        let mut outcomes = Vec::with_capacity(manifests.len());

        for manifest in manifests {
            let outcome = match &manifest.client {
                None => BuildOutcome::Skipped,
                Some(client) => match self.validate_components(manifest, client) {
                    Ok(entries) => {
                        self.merge_plugin_entries(&mut map, &manifest.slug, entries);
                        let count = map
                            .components
                            .values()
                            .filter(|e| e.plugin == manifest.slug)
                            .count();
                        BuildOutcome::Success { components: count }
                    }
                    Err(reason) => {
                        tracing::warn!(
                            slug = %manifest.slug,
                            reason = %reason,
                            "Component build failed, keeping previous entries"
                        );
                        BuildOutcome::Failed { reason }
                    }
                },
            };
            outcomes.push((manifest.slug.clone(), outcome));
        }

        self.write_map(&map)?;
        Ok(BuildReport {
            outcomes,
            total_components: map.components.len(),
        })
    }

    /// Drop one plugin's entries from the map (deactivation/uninstall).
    pub fn remove_plugin(&self, slug: &str) -> Result<usize, BuildError> {
        let mut map = self.load_map()?;
        let before = map.components.len();
        map.components.retain(|_, entry| entry.plugin != slug);
        let removed = before - map.components.len();
        if removed > 0 {
            self.write_map(&map)?;
            tracing::info!(slug = %slug, removed, "Components removed from import map");
        }
        Ok(removed)
    }

    /// Validate a manifest's component declarations without touching the
    /// map. Returns the number of components that would be written.
    pub fn validate_manifest(&self, manifest: &PluginManifest) -> Result<usize, String> {
        match &manifest.client {
            None => Ok(0),
            Some(client) => self
                .validate_components(manifest, client)
                .map(|entries| entries.len()),
        }
    }

    /// Validate declared components against the plugin's asset directory,
    /// producing map entries. All-or-nothing per plugin.
    fn validate_components(
        &self,
        manifest: &PluginManifest,
        client: &super::manifest::ClientAssets,
    ) -> Result<Vec<ClientComponentEntry>, String> {
        let asset_dir = self.plugins_root.join(&manifest.slug).join(&client.dir);
        if !client.components.is_empty() && !asset_dir.is_dir() {
            return Err(format!(
                "asset directory '{}' does not exist",
                asset_dir.display()
            ));
        }

        let mut entries = Vec::with_capacity(client.components.len());
        for (order, decl) in client.components.iter().enumerate() {
            if decl.name.is_empty() {
                return Err("component with empty name".to_string());
            }
            let module_file = asset_dir.join(&decl.module);
            if !module_file.is_file() {
                return Err(format!(
                    "component '{}' references missing module '{}'",
                    decl.name, decl.module
                ));
            }
            entries.push(ClientComponentEntry {
                name: decl.name.clone(),
                usages: decl.usages.clone(),
                module: format!("/plugins/{}/{}/{}", manifest.slug, client.dir, decl.module),
                plugin: manifest.slug.clone(),
                priority: manifest.priority,
                order,
            });
        }
        Ok(entries)
    }

    /// Replace a plugin's entries with `entries`, settling name conflicts in
    /// favor of the earlier-loading (lower priority value) plugin.
    fn merge_plugin_entries(
        &self,
        map: &mut ImportMap,
        slug: &str,
        entries: Vec<ClientComponentEntry>,
    ) {
        map.components.retain(|_, entry| entry.plugin != slug);
        for entry in entries {
            match map.components.get(&entry.name) {
                Some(existing)
                    if (existing.priority, existing.plugin.as_str())
                        <= (entry.priority, entry.plugin.as_str()) =>
                {
                    tracing::warn!(
                        component = %entry.name,
                        winner = %existing.plugin,
                        loser = %entry.plugin,
                        "Component name conflict"
                    );
                }
                _ => {
                    map.components.insert(entry.name.clone(), entry);
                }
            }
        }
    }

    /// Write both generated artifacts atomically.
    fn write_map(&self, map: &ImportMap) -> Result<(), BuildError> {
        std::fs::create_dir_all(&self.generated_dir).map_err(|source| BuildError::Io {
            path: self.generated_dir.clone(),
            source,
        })?;

        let json = serde_json::to_string_pretty(map).expect("import map serializes");
        self.write_atomic(&self.map_path(), json.as_bytes())?;

        let ts = render_ts_module(map);
        self.write_atomic(&self.generated_dir.join(IMPORT_MODULE_FILE), ts.as_bytes())?;
        Ok(())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), BuildError> {
        let io_err = |source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.generated_dir)
            .map_err(io_err)?;
        tmp.write_all(bytes).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

/// Render the typed module the frontend imports. Entries come out of a
/// BTreeMap, so the output is byte-stable for a given map.
fn render_ts_module(map: &ImportMap) -> String {
    let mut out = String::from(
        "// Generated file. Do not edit; run the plugin build instead.\n\n\
         export interface PluginComponent {\n\
         \x20 name: string;\n\
         \x20 usages: string[];\n\
         \x20 module: string;\n\
         \x20 plugin: string;\n\
         }\n\n\
         export const pluginComponents: Record<string, PluginComponent> = {\n",
    );
    for entry in map.components.values() {
        let usages = entry
            .usages
            .iter()
            .map(|u| format!("\"{u}\""))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "  \"{name}\": {{ name: \"{name}\", usages: [{usages}], module: \"{module}\", plugin: \"{plugin}\" }},\n",
            name = entry.name,
            usages = usages,
            module = entry.module,
            plugin = entry.plugin,
        ));
    }
    out.push_str("};\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manifest::{ClientAssets, ClientComponentDecl};

    fn manifest_with_components(
        slug: &str,
        priority: i64,
        components: Vec<ClientComponentDecl>,
    ) -> PluginManifest {
        PluginManifest {
            slug: slug.to_string(),
            name: slug.to_string(),
            description: String::new(),
            entry: "index".to_string(),
            version: semver::Version::new(1, 0, 0),
            author: String::new(),
            icon: None,
            category: None,
            priority,
            client: Some(ClientAssets {
                dir: "frontend".to_string(),
                components,
            }),
            schema: None,
        }
    }

    fn decl(name: &str, module: &str) -> ClientComponentDecl {
        ClientComponentDecl {
            name: name.to_string(),
            usages: vec!["dashboard".to_string()],
            module: module.to_string(),
        }
    }

    fn seed_assets(plugins_root: &Path, slug: &str, modules: &[&str]) {
        let dir = plugins_root.join(slug).join("frontend");
        std::fs::create_dir_all(&dir).unwrap();
        for module in modules {
            std::fs::write(dir.join(module), "export default {}\n").unwrap();
        }
    }

    #[test]
    fn test_build_plugin_writes_both_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins = tmp.path().join("plugins");
        let generated = tmp.path().join("generated");
        seed_assets(&plugins, "chat", &["Widget.tsx"]);

        let builder = ComponentBuilder::new(&plugins, &generated);
        let outcome = builder
            .build_plugin(&manifest_with_components(
                "chat",
                0,
                vec![decl("ChatWidget", "Widget.tsx")],
            ))
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Success { components: 1 });

        let map = builder.load_map().unwrap();
        let entry = &map.components["ChatWidget"];
        assert_eq!(entry.module, "/plugins/chat/frontend/Widget.tsx");

        let ts = std::fs::read_to_string(generated.join(IMPORT_MODULE_FILE)).unwrap();
        assert!(ts.contains("\"ChatWidget\""));
    }

    #[test]
    fn test_missing_module_fails_without_touching_map() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins = tmp.path().join("plugins");
        let generated = tmp.path().join("generated");
        seed_assets(&plugins, "chat", &["Widget.tsx"]);

        let builder = ComponentBuilder::new(&plugins, &generated);
        builder
            .build_plugin(&manifest_with_components(
                "chat",
                0,
                vec![decl("ChatWidget", "Widget.tsx")],
            ))
            .unwrap();

        // A later broken declaration must not clobber the good entry
        let outcome = builder
            .build_plugin(&manifest_with_components(
                "chat",
                0,
                vec![decl("ChatWidget", "Gone.tsx")],
            ))
            .unwrap();
        assert!(matches!(outcome, BuildOutcome::Failed { .. }));

        let map = builder.load_map().unwrap();
        assert_eq!(
            map.components["ChatWidget"].module,
            "/plugins/chat/frontend/Widget.tsx"
        );
    }

    #[test]
    fn test_build_all_mixes_outcomes_without_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins = tmp.path().join("plugins");
        let generated = tmp.path().join("generated");
        seed_assets(&plugins, "good", &["A.tsx"]);
        seed_assets(&plugins, "bad", &[]);

        let builder = ComponentBuilder::new(&plugins, &generated);
        let report = builder
            .build_all(&[
                manifest_with_components("good", 0, vec![decl("Alpha", "A.tsx")]),
                manifest_with_components("bad", 1, vec![decl("Beta", "Missing.tsx")]),
                PluginManifest {
                    client: None,
                    ..manifest_with_components("plain", 2, vec![])
                },
            ])
            .unwrap();

        assert!(report.has_failures());
        assert_eq!(report.total_components, 1);
        assert_eq!(report.outcomes[0].1, BuildOutcome::Success { components: 1 });
        assert!(matches!(report.outcomes[1].1, BuildOutcome::Failed { .. }));
        assert_eq!(report.outcomes[2].1, BuildOutcome::Skipped);
    }

    #[test]
    fn test_name_conflict_keeps_earlier_loading_plugin() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins = tmp.path().join("plugins");
        seed_assets(&plugins, "early", &["W.tsx"]);
        seed_assets(&plugins, "late", &["W.tsx"]);

        let builder = ComponentBuilder::new(&plugins, tmp.path().join("generated"));
        builder
            .build_all(&[
                manifest_with_components("early", 1, vec![decl("Widget", "W.tsx")]),
                manifest_with_components("late", 10, vec![decl("Widget", "W.tsx")]),
            ])
            .unwrap();

        let map = builder.load_map().unwrap();
        assert_eq!(map.components["Widget"].plugin, "early");
    }

    #[test]
    fn test_remove_plugin_drops_only_its_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins = tmp.path().join("plugins");
        seed_assets(&plugins, "a", &["A.tsx"]);
        seed_assets(&plugins, "b", &["B.tsx"]);

        let builder = ComponentBuilder::new(&plugins, tmp.path().join("generated"));
        builder
            .build_all(&[
                manifest_with_components("a", 0, vec![decl("Alpha", "A.tsx")]),
                manifest_with_components("b", 1, vec![decl("Beta", "B.tsx")]),
            ])
            .unwrap();

        assert_eq!(builder.remove_plugin("a").unwrap(), 1);
        let map = builder.load_map().unwrap();
        assert!(!map.components.contains_key("Alpha"));
        assert!(map.components.contains_key("Beta"));
    }

    #[test]
    fn test_components_by_usage_orders_by_priority_then_declaration() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins = tmp.path().join("plugins");
        seed_assets(&plugins, "late", &["Z.tsx", "A.tsx"]);
        seed_assets(&plugins, "early", &["E.tsx"]);

        let builder = ComponentBuilder::new(&plugins, tmp.path().join("generated"));
        builder
            .build_all(&[
                manifest_with_components(
                    "late",
                    10,
                    // Declared out of alphabetical order on purpose
                    vec![decl("Zed", "Z.tsx"), decl("Alpha", "A.tsx")],
                ),
                manifest_with_components("early", 1, vec![decl("Eta", "E.tsx")]),
            ])
            .unwrap();

        let map = builder.load_map().unwrap();
        let hits: Vec<&str> = map
            .components_by_usage("dashboard")
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(hits, vec!["Eta", "Zed", "Alpha"]);
        assert!(map.components_by_usage("sidebar").is_empty());
        assert!(map.component("Zed").is_some());
    }

    #[test]
    fn test_map_output_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins = tmp.path().join("plugins");
        seed_assets(&plugins, "p", &["A.tsx", "B.tsx"]);

        let manifests = vec![manifest_with_components(
            "p",
            0,
            vec![decl("Zeta", "B.tsx"), decl("Alpha", "A.tsx")],
        )];

        let builder = ComponentBuilder::new(&plugins, tmp.path().join("generated"));
        builder.build_all(&manifests).unwrap();
        let first = std::fs::read(builder.map_path()).unwrap();
        builder.build_all(&manifests).unwrap();
        let second = std::fs::read(builder.map_path()).unwrap();
        assert_eq!(first, second);
    }
}
