//! Plugin Loader
//!
//! Resolves discovered plugins to their compiled-in modules and drives
//! `load()` exactly once per process lifetime, sequentially in discovery
//! order so hook registration order is deterministic. Each plugin loads
//! through a [`HostApi`] scoped to its own slug; everything it registers is
//! attributed to that slug and can be removed wholesale on unload.
//!
//! A plugin that panics or errors during `load()` is isolated: its partial
//! registrations are rolled back and the remaining plugins still load.

use std::sync::Arc;

use dashmap::DashMap;

use atrium_plugin_api::{
    HookCallback, HostApi, PluginApiError, PluginModule, PluginRegistration, ViewSpec,
};

use super::hooks::HookRegistry;
use super::isolation::catch_unwind_future;
use super::lifecycle::PluginState;
use super::manifest::PluginManifest;

/// Load errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No module registered for the slug
    #[error("no module registered for plugin '{0}'")]
    Unresolved(String),

    /// Plugin is marked broken; load suppressed
    #[error("plugin '{0}' is broken and will not be loaded")]
    Broken(String),

    /// Plugin already loaded this process
    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    /// `load()` panicked
    #[error("plugin '{slug}' panicked during load: {message}")]
    Panic { slug: String, message: String },

    /// `load()` returned an error
    #[error("plugin '{slug}' failed to load: {source}")]
    Init {
        slug: String,
        #[source]
        source: PluginApiError,
    },
}

/// Resolves a plugin slug to its module implementation.
///
/// The production resolver reads the compile-time registration table; tests
/// substitute their own.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, slug: &str) -> Option<Box<dyn PluginModule>>;
}

/// Resolver over the `inventory`-collected registration table.
#[derive(Default)]
pub struct StaticModuleResolver;

impl ModuleResolver for StaticModuleResolver {
    fn resolve(&self, slug: &str) -> Option<Box<dyn PluginModule>> {
        for registration in inventory::iter::<PluginRegistration> {
            if registration.slug == slug {
                return Some((registration.construct)());
            }
        }
        None
    }
}

/// Per-plugin [`HostApi`] handed to `load()`.
///
/// Everything registered through it is attributed to `slug`.
struct ScopedHostApi {
    slug: String,
    hooks: Arc<HookRegistry>,
    views: Arc<DashMap<String, ViewSpec>>,
}

impl HostApi for ScopedHostApi {
    fn slug(&self) -> &str {
        &self.slug
    }

    fn on(&self, hook: &str, callback: HookCallback) {
        self.hooks.on(hook, &self.slug, callback);
    }

    fn register_view(&self, view: ViewSpec) {
        tracing::debug!(slug = %self.slug, title = %view.title, "Registered view");
        self.views.insert(self.slug.clone(), view);
    }
}

/// Summary of one `load_all` pass
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// Slugs loaded successfully, in load order
    pub loaded: Vec<String>,

    /// Per-plugin load failures as (slug, message)
    pub failed: Vec<(String, String)>,

    /// Slugs skipped (broken or already loaded)
    pub skipped: Vec<String>,
}

/// Drives plugin loading and owns the runtime registration state.
pub struct PluginLoader {
    hooks: Arc<HookRegistry>,
    views: Arc<DashMap<String, ViewSpec>>,
    states: DashMap<String, PluginState>,
    resolver: Box<dyn ModuleResolver>,
}

impl PluginLoader {
    pub fn new(resolver: Box<dyn ModuleResolver>) -> Self {
        Self {
            hooks: Arc::new(HookRegistry::new()),
            views: Arc::new(DashMap::new()),
            states: DashMap::new(),
            resolver,
        }
    }

    /// The shared hook registry.
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Whether a module is registered for the slug (validation probe).
    pub fn can_resolve(&self, slug: &str) -> bool {
        self.resolver.resolve(slug).is_some()
    }

    /// Current lifecycle state of a plugin.
    pub fn state(&self, slug: &str) -> PluginState {
        self.states
            .get(slug)
            .map(|s| *s)
            .unwrap_or(PluginState::Discovered)
    }

    /// Snapshot of every tracked plugin's state, sorted by slug.
    pub fn states(&self) -> Vec<(String, PluginState)> {
        let mut states: Vec<(String, PluginState)> = self
            .states
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// A plugin's registered admin view, if any.
    pub fn view(&self, slug: &str) -> Option<ViewSpec> {
        self.views.get(slug).map(|v| v.clone())
    }

    /// All registered views as (slug, view), sorted by slug.
    pub fn views(&self) -> Vec<(String, ViewSpec)> {
        let mut views: Vec<(String, ViewSpec)> = self
            .views
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        views.sort_by(|a, b| a.0.cmp(&b.0));
        views
    }

    /// Mark a plugin broken so subsequent load attempts are suppressed.
    pub fn mark_broken(&self, slug: &str) {
        self.states.insert(slug.to_string(), PluginState::Broken);
    }

    /// Load one plugin. At most once per process: a plugin already in
    /// `Loaded` returns [`LoadError::AlreadyLoaded`], a `Broken` one
    /// [`LoadError::Broken`].
    ///
    /// On failure any registrations made before the failure are removed, so
    /// a half-loaded plugin leaves no trace in the hook registry.
    pub async fn load_plugin(&self, manifest: &PluginManifest) -> Result<(), LoadError> {
        let slug = manifest.slug.clone();
        let state = self.state(&slug);
        if !state.can_load() {
            return Err(match state {
                PluginState::Broken => LoadError::Broken(slug),
                _ => LoadError::AlreadyLoaded(slug),
            });
        }

        let Some(module) = self.resolver.resolve(&slug) else {
            self.states.insert(slug.clone(), PluginState::LoadFailed);
            return Err(LoadError::Unresolved(slug));
        };

        self.states.insert(slug.clone(), PluginState::Loading);
        tracing::info!(slug = %slug, version = %manifest.version, "Loading plugin");

        let api = ScopedHostApi {
            slug: slug.clone(),
            hooks: self.hooks.clone(),
            views: self.views.clone(),
        };

        let result = catch_unwind_future(module.load(&api)).await;
        match result {
            Ok(Ok(())) => {
                self.states.insert(slug.clone(), PluginState::Loaded);
                tracing::info!(slug = %slug, "Plugin loaded");
                Ok(())
            }
            Ok(Err(source)) => {
                self.rollback(&slug);
                Err(LoadError::Init { slug, source })
            }
            Err(message) => {
                self.rollback(&slug);
                Err(LoadError::Panic { slug, message })
            }
        }
    }

    /// Load every manifest sequentially, in the given (discovery) order.
    ///
    /// Failures are recorded per plugin and never stop the pass.
    pub async fn load_all(&self, manifests: &[PluginManifest]) -> LoadSummary {
        let mut summary = LoadSummary::default();
        for manifest in manifests {
            match self.load_plugin(manifest).await {
                Ok(()) => summary.loaded.push(manifest.slug.clone()),
                Err(LoadError::Broken(slug)) | Err(LoadError::AlreadyLoaded(slug)) => {
                    tracing::debug!(slug = %slug, "Skipping plugin");
                    summary.skipped.push(slug);
                }
                Err(err) => {
                    tracing::error!(slug = %manifest.slug, error = %err, "Plugin load failed");
                    summary.failed.push((manifest.slug.clone(), err.to_string()));
                }
            }
        }
        summary
    }

    /// Unload a plugin: removes its hook callbacks and view, and returns its
    /// state to `Discovered` so it can load again later.
    pub fn unload(&self, slug: &str) -> usize {
        let removed = self.hooks.remove_owner(slug);
        self.views.remove(slug);
        self.states.insert(slug.to_string(), PluginState::Discovered);
        tracing::info!(slug = %slug, hooks_removed = removed, "Plugin unloaded");
        removed
    }

    /// Remove every registration and reset all state (intentional reload).
    pub fn clear(&self) {
        self.hooks.clear();
        self.views.clear();
        self.states.clear();
    }

    fn rollback(&self, slug: &str) {
        self.hooks.remove_owner(slug);
        self.views.remove(slug);
        self.states.insert(slug.to_string(), PluginState::LoadFailed);
    }
}
