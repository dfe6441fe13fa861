//! Plugin Manager
//!
//! Facade tying the plugin subsystems together: discovery, the persisted
//! activation state, migrations, loading, menu composition, and the client
//! component build. Management operations (activate, deactivate, upload,
//! uninstall, delete) go through here so their multi-step semantics live in
//! one place.
//!
//! Activation is the only compound write path: flip the persisted flag
//! first (compare-and-set, so concurrent requests cannot double-activate),
//! then run migrations, load the module, and rebuild components. Any step
//! failing rolls the flag back and unloads whatever was registered.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use atrium_plugin_api::{ADMIN_MENU_HOOK, HookContext, ViewSpec};

use crate::config::HostConfig;

use super::build::{BuildError, BuildOutcome, BuildReport, ComponentBuilder};
use super::discovery::{DiscoveryError, discover_plugins};
use super::hooks::{HookRegistrationInfo, HookStats};
use super::lifecycle::PluginState;
use super::loader::{LoadSummary, ModuleResolver, PluginLoader};
use super::manifest::{ManifestError, PluginManifest};
use super::menu::{AdminMenuContext, CompositionOutcome};
use super::migrate::{MigrateError, MigrationRunner};
use super::store::{
    MigrationAuditRecord, MigrationDirection, MigrationStats, PluginRecord, PluginStore,
    StoreError,
};

/// Management errors
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// No plugin with the given slug is installed
    #[error("plugin '{0}' is not installed")]
    NotFound(String),

    /// Upload target slug already has a directory
    #[error("plugin '{0}' is already installed")]
    AlreadyInstalled(String),

    /// Activation requested for an already-active plugin
    #[error("plugin '{0}' is already active")]
    AlreadyActive(String),

    /// Deletion requested for a still-active plugin
    #[error("plugin '{0}' is still active; deactivate it first")]
    StillActive(String),

    /// Activation failed partway; state was rolled back
    #[error("activating plugin '{slug}' failed: {message}")]
    Activation { slug: String, message: String },

    /// Uploaded archive was malformed
    #[error("invalid plugin archive: {0}")]
    Upload(String),

    /// Archive could not be read
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Migrate(#[from] MigrateError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One installed plugin as exposed to the management surface
#[derive(Debug, Clone, Serialize)]
pub struct PluginOverview {
    #[serde(flatten)]
    pub record: PluginRecord,

    /// Runtime lifecycle state this process
    pub state: PluginState,
}

/// Per-plugin validation result
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub slug: String,

    /// Problems that would prevent the plugin from activating
    pub errors: Vec<String>,

    /// Whether a compiled-in module matches the slug
    pub module_resolved: bool,

    /// Client components that validated
    pub components: usize,

    /// Up-migration steps found
    pub migration_steps: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of the startup sequence
#[derive(Debug)]
pub struct StartupReport {
    /// Plugins discovered on disk
    pub discovered: usize,

    /// Directories skipped during discovery
    pub skipped_dirs: usize,

    /// Load pass over active plugins
    pub load: LoadSummary,

    /// Client component build pass
    pub build: BuildReport,
}

/// Central management facade over the plugin runtime.
pub struct PluginManager {
    config: HostConfig,
    store: Arc<PluginStore>,
    loader: PluginLoader,
    migrator: MigrationRunner,
    builder: ComponentBuilder,
    discovered: RwLock<Vec<PluginManifest>>,
}

impl PluginManager {
    /// Create a manager over the configured directories.
    pub fn new(config: HostConfig, resolver: Box<dyn ModuleResolver>) -> Result<Self, ManagerError> {
        let store = Arc::new(PluginStore::open(&config.db_path())?);
        let migrator = MigrationRunner::new(&config.data_dir, store.clone());
        let builder = ComponentBuilder::new(&config.plugins_root, &config.generated_dir);

        Ok(Self {
            config,
            store,
            loader: PluginLoader::new(resolver),
            migrator,
            builder,
            discovered: RwLock::new(Vec::new()),
        })
    }

    /// The backing store (read access for the management surface).
    pub fn store(&self) -> &Arc<PluginStore> {
        &self.store
    }

    /// Startup sequence: discover, reconcile, load active plugins, build
    /// their client components.
    ///
    /// Only a missing plugins root is fatal; individual plugins failing to
    /// load are isolated and reported.
    pub async fn startup(&self) -> Result<StartupReport, ManagerError> {
        let skipped_dirs = self.refresh()?.len();
        let manifests = self.discovered.read().clone();
        self.store.reconcile(&manifests)?;

        let mut active = Vec::new();
        for record in self.store.list()? {
            if !record.is_active {
                continue;
            }
            if record.is_broken {
                tracing::warn!(slug = %record.slug, "Skipping broken plugin at startup");
                self.loader.mark_broken(&record.slug);
            }
            if let Some(manifest) = manifests.iter().find(|m| m.slug == record.slug) {
                active.push(manifest.clone());
            } else {
                tracing::warn!(slug = %record.slug, "Active plugin has no directory on disk");
            }
        }

        let load = self.loader.load_all(&active).await;
        for (slug, message) in &load.failed {
            self.note_load_failure(slug, message)?;
        }
        for slug in &load.loaded {
            self.store.record_load_success(slug)?;
        }

        let build = self.builder.build_all(&active)?;

        tracing::info!(
            discovered = manifests.len(),
            loaded = load.loaded.len(),
            failed = load.failed.len(),
            components = build.total_components,
            "Plugin runtime started"
        );

        Ok(StartupReport {
            discovered: manifests.len(),
            skipped_dirs,
            load,
            build,
        })
    }

    /// Re-scan the plugins root, refreshing the manifest cache. Returns the
    /// per-directory errors recorded along the way.
    pub fn refresh(&self) -> Result<Vec<DiscoveryError>, ManagerError> {
        let report = discover_plugins(&self.config.plugins_root)?;
        *self.discovered.write() = report.manifests;
        Ok(report.errors)
    }

    fn manifest(&self, slug: &str) -> Result<PluginManifest, ManagerError> {
        self.discovered
            .read()
            .iter()
            .find(|m| m.slug == slug)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(slug.to_string()))
    }

    fn plugin_dir(&self, slug: &str) -> PathBuf {
        self.config.plugins_root.join(slug)
    }

    /// Record a load failure, marking the plugin broken in both the store
    /// and the loader once the threshold is crossed.
    fn note_load_failure(&self, slug: &str, message: &str) -> Result<bool, ManagerError> {
        let now_broken =
            self.store
                .record_load_failure(slug, message, self.config.broken_threshold)?;
        if now_broken {
            tracing::error!(slug = %slug, "Plugin crossed failure threshold, marking broken");
            self.loader.mark_broken(slug);
        }
        Ok(now_broken)
    }

    /// Activate a plugin: persist the flag, run its up-migrations, load the
    /// module, and rebuild its client components.
    ///
    /// Any failure after the flag flips rolls everything back, so a failed
    /// activation leaves the plugin inactive and unloaded. A plugin marked
    /// broken activates in the store but is not loaded until reset.
    pub async fn activate(&self, slug: &str) -> Result<(), ManagerError> {
        let manifest = self.manifest(slug)?;
        let record = self
            .store
            .get(slug)?
            .ok_or_else(|| ManagerError::NotFound(slug.to_string()))?;

        if !self.store.set_active(slug, true)? {
            return Err(ManagerError::AlreadyActive(slug.to_string()));
        }

        if record.is_broken {
            tracing::warn!(slug = %slug, "Activated broken plugin; load suppressed until reset");
            self.loader.mark_broken(slug);
            return Ok(());
        }

        if let Err(err) = self.migrator.run(
            slug,
            &manifest.schema_context(),
            &self.plugin_dir(slug),
            MigrationDirection::Up,
        ) {
            self.store.set_active(slug, false)?;
            return Err(ManagerError::Activation {
                slug: slug.to_string(),
                message: err.to_string(),
            });
        }

        if let Err(err) = self.loader.load_plugin(&manifest).await {
            let message = err.to_string();
            self.note_load_failure(slug, &message)?;
            self.store.set_active(slug, false)?;
            self.loader.unload(slug);
            return Err(ManagerError::Activation {
                slug: slug.to_string(),
                message,
            });
        }
        self.store.record_load_success(slug)?;

        match self.builder.build_plugin(&manifest)? {
            BuildOutcome::Failed { reason } => {
                self.store.set_active(slug, false)?;
                self.loader.unload(slug);
                Err(ManagerError::Activation {
                    slug: slug.to_string(),
                    message: format!("component build failed: {reason}"),
                })
            }
            _ => {
                tracing::info!(slug = %slug, "Plugin activated");
                Ok(())
            }
        }
    }

    /// Deactivate a plugin: persist the flag, drop its registrations and
    /// client components. Returns whether the flag actually flipped.
    pub fn deactivate(&self, slug: &str) -> Result<bool, ManagerError> {
        let changed = self.store.set_active(slug, false)?;
        self.loader.unload(slug);
        self.builder.remove_plugin(slug)?;
        if changed {
            tracing::info!(slug = %slug, "Plugin deactivated");
        }
        Ok(changed)
    }

    /// Uninstall a plugin: deactivate, run its down-migrations, then remove
    /// its record and directory.
    ///
    /// A failing down-migration aborts before anything is removed; the
    /// plugin stays installed (inactive) with the failure in the audit log.
    pub fn uninstall(&self, slug: &str) -> Result<(), ManagerError> {
        let record = self
            .store
            .get(slug)?
            .ok_or_else(|| ManagerError::NotFound(slug.to_string()))?;

        if record.is_active {
            self.store.set_active(slug, false)?;
            self.loader.unload(slug);
        }

        let dir = self.plugin_dir(slug);
        if dir.is_dir() {
            let context = self
                .manifest(slug)
                .map(|m| m.schema_context())
                .unwrap_or_else(|_| slug.replace('-', "_"));
            self.migrator
                .run(slug, &context, &dir, MigrationDirection::Down)?;
        }

        self.builder.remove_plugin(slug)?;
        self.store.delete(slug)?;
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir)?;
        }
        self.refresh()?;

        tracing::info!(slug = %slug, "Plugin uninstalled");
        Ok(())
    }

    /// Force-remove a plugin without running its down-migrations, leaving
    /// its schema-context data behind. Requires the plugin to be inactive.
    pub fn delete(&self, slug: &str) -> Result<(), ManagerError> {
        let record = self
            .store
            .get(slug)?
            .ok_or_else(|| ManagerError::NotFound(slug.to_string()))?;
        if record.is_active {
            return Err(ManagerError::StillActive(slug.to_string()));
        }

        self.builder.remove_plugin(slug)?;
        self.store.delete(slug)?;
        let dir = self.plugin_dir(slug);
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir)?;
        }
        self.refresh()?;

        tracing::warn!(slug = %slug, "Plugin force-deleted; schema data left in place");
        Ok(())
    }

    /// Install a plugin from a zip archive.
    ///
    /// The archive is staged into a dot-directory under the plugins root
    /// (invisible to discovery), validated, then renamed into place. The
    /// plugin arrives installed but inactive.
    pub fn upload(&self, archive_path: &Path) -> Result<PluginManifest, ManagerError> {
        std::fs::create_dir_all(&self.config.plugins_root)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.config.plugins_root)?;

        self.extract_archive(archive_path, staging.path())?;
        let source = locate_plugin_root(staging.path())?;
        let manifest = PluginManifest::from_dir_with_slug(&source, None)?;

        let target = self.plugin_dir(&manifest.slug);
        if target.exists() {
            return Err(ManagerError::AlreadyInstalled(manifest.slug.clone()));
        }
        std::fs::rename(&source, &target)?;

        self.store.reconcile(std::slice::from_ref(&manifest))?;
        self.refresh()?;

        tracing::info!(slug = %manifest.slug, version = %manifest.version, "Plugin uploaded");
        Ok(manifest)
    }

    fn extract_archive(&self, archive_path: &Path, dest: &Path) -> Result<(), ManagerError> {
        let file = std::fs::File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(ManagerError::Upload(format!(
                    "archive entry '{}' escapes the extraction root",
                    entry.name()
                )));
            };
            let out_path = dest.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
            } else {
                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out = std::fs::File::create(&out_path)?;
                std::io::copy(&mut entry, &mut out)?;
            }
        }
        Ok(())
    }

    /// Validate one installed plugin without activating it.
    pub fn validate(&self, slug: &str) -> Result<ValidationReport, ManagerError> {
        let dir = self.plugin_dir(slug);
        let mut errors = Vec::new();

        let manifest = match PluginManifest::from_dir(&dir) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                errors.push(err.to_string());
                None
            }
        };

        let module_resolved = self.loader.can_resolve(slug);
        if !module_resolved {
            errors.push(format!("no compiled-in module registered for '{slug}'"));
        }

        let mut components = 0;
        let mut migration_steps = 0;
        if let Some(manifest) = &manifest {
            match self.builder.validate_manifest(manifest) {
                Ok(count) => components = count,
                Err(reason) => errors.push(reason),
            }
            match self.migrator.steps(&dir, MigrationDirection::Up) {
                Ok(steps) => migration_steps = steps.len(),
                Err(err) => errors.push(err.to_string()),
            }
        }

        Ok(ValidationReport {
            slug: slug.to_string(),
            errors,
            module_resolved,
            components,
            migration_steps,
        })
    }

    /// Fire the `admin_menu` hook and compose the sidebar for one request.
    ///
    /// Callback failures are attributed to their owning plugin's record and
    /// never fail the request.
    pub async fn admin_menu(&self, route: Option<String>) -> CompositionOutcome {
        let composer = Arc::new(AdminMenuContext::new());
        let ctx = HookContext::admin_menu(composer.clone(), route);
        let report = self.loader.hooks().fire(ADMIN_MENU_HOOK, ctx).await;

        for failure in &report.failures {
            if let Err(err) = self
                .store
                .record_hook_failure(&failure.owner, &failure.error.to_string())
            {
                tracing::warn!(owner = %failure.owner, error = %err, "Failed to record hook failure");
            }
        }

        composer.finish()
    }

    /// Clear a plugin's broken flag so the next activation loads it again.
    pub fn reset_broken(&self, slug: &str) -> Result<(), ManagerError> {
        self.store.reset_broken(slug)?;
        self.loader.unload(slug);
        tracing::info!(slug = %slug, "Plugin broken flag reset");
        Ok(())
    }

    /// All installed plugins with their persisted and runtime state.
    pub fn plugins(&self) -> Result<Vec<PluginOverview>, ManagerError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|record| {
                let state = self.loader.state(&record.slug);
                PluginOverview { record, state }
            })
            .collect())
    }

    /// A plugin's registered admin view, if loaded.
    pub fn view(&self, slug: &str) -> Option<ViewSpec> {
        self.loader.view(slug)
    }

    // Hook inspector passthroughs

    pub fn hook_names(&self) -> Vec<String> {
        self.loader.hooks().hook_names()
    }

    pub fn hook_detail(&self, hook: &str) -> Vec<HookRegistrationInfo> {
        self.loader.hooks().detail(hook)
    }

    pub fn hook_stats(&self) -> Vec<HookStats> {
        self.loader.hooks().stats()
    }

    // Migration audit passthroughs

    pub fn migration_history(
        &self,
        slug: Option<&str>,
    ) -> Result<Vec<MigrationAuditRecord>, ManagerError> {
        Ok(self.store.migration_history(slug)?)
    }

    pub fn migration_record(&self, id: i64) -> Result<Option<MigrationAuditRecord>, ManagerError> {
        Ok(self.store.migration_record(id)?)
    }

    pub fn migration_stats(&self) -> Result<MigrationStats, ManagerError> {
        Ok(self.store.migration_stats()?)
    }

    // Client component read APIs (backed by the generated import map)

    /// Look up a built component by name.
    pub fn client_component(
        &self,
        name: &str,
    ) -> Result<Option<super::build::ClientComponentEntry>, ManagerError> {
        Ok(self.builder.load_map()?.component(name).cloned())
    }

    /// All built components declaring `usage`, ordered by plugin priority
    /// then declaration order.
    pub fn client_components_by_usage(
        &self,
        usage: &str,
    ) -> Result<Vec<super::build::ClientComponentEntry>, ManagerError> {
        Ok(self
            .builder
            .load_map()?
            .components_by_usage(usage)
            .into_iter()
            .cloned()
            .collect())
    }

    /// The full import map as last written.
    pub fn client_components(&self) -> Result<super::build::ImportMap, ManagerError> {
        Ok(self.builder.load_map()?)
    }

    // Build pipeline entry points (CLI)

    /// Build one plugin's client components.
    pub fn build_plugin(&self, slug: &str) -> Result<BuildOutcome, ManagerError> {
        self.refresh()?;
        let manifest = self.manifest(slug)?;
        Ok(self.builder.build_plugin(&manifest)?)
    }

    /// Build every discovered plugin's client components.
    pub fn build_plugins(&self) -> Result<BuildReport, ManagerError> {
        self.refresh()?;
        let manifests = self.discovered.read().clone();
        Ok(self.builder.build_all(&manifests)?)
    }
}

/// Find the directory containing `plugin.json` inside an extracted archive:
/// either the extraction root itself or exactly one top-level subdirectory.
fn locate_plugin_root(extracted: &Path) -> Result<PathBuf, ManagerError> {
    if extracted.join(super::manifest::MANIFEST_FILE).is_file() {
        return Ok(extracted.to_path_buf());
    }

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(extracted)? {
        let path = entry?.path();
        if path.is_dir() && path.join(super::manifest::MANIFEST_FILE).is_file() {
            candidates.push(path);
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(ManagerError::Upload(
            "archive contains no plugin.json".to_string(),
        )),
        _ => Err(ManagerError::Upload(
            "archive contains multiple plugin directories".to_string(),
        )),
    }
}
