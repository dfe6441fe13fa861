//! # Atrium Plugin API
//!
//! This crate provides the interface plugin authors compile against to extend
//! the Atrium admin host. A plugin is a directory of assets plus a module
//! implementing [`PluginModule`]; the host discovers the directory, looks up
//! the module in the compile-time registration table, and calls
//! [`PluginModule::load`] exactly once per process lifetime.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Plugin Registration                       │
//! │  register_plugin! ──▶ inventory table ──▶ host module lookup │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! During `load()` the plugin receives a [`HostApi`] scoped to its own slug,
//! so every hook callback and view it registers is automatically attributed
//! to it. Hook callbacks receive a [`HookContext`]; for the `admin_menu` hook
//! the context carries a [`MenuComposer`] for registering sidebar pages.
//!
//! # Example Plugin
//!
//! ```rust,ignore
//! use atrium_plugin_api::prelude::*;
//!
//! struct ChatPlugin;
//!
//! #[async_trait]
//! impl PluginModule for ChatPlugin {
//!     async fn load(&self, api: &dyn HostApi) -> Result<(), PluginApiError> {
//!         api.on_admin_menu(hook_fn(|ctx| async move {
//!             if let Some(menu) = ctx.menu() {
//!                 menu.add_menu_page(
//!                     MenuPageSpec::new("chats", "Chats").with_priority(10),
//!                 );
//!             }
//!             Ok(())
//!         }));
//!         Ok(())
//!     }
//! }
//!
//! atrium_plugin_api::register_plugin!("chat-plugin", || Box::new(ChatPlugin));
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Name of the hook fired once per admin request to compose the sidebar.
pub const ADMIN_MENU_HOOK: &str = "admin_menu";

/// Default capability tag for menu pages.
pub const DEFAULT_CAPABILITY: &str = "read";

/// Error type for failures inside plugin code.
#[derive(Debug, thiserror::Error)]
pub enum PluginApiError {
    /// Plugin initialization failed during `load()`
    #[error("plugin initialization failed: {0}")]
    Init(String),

    /// Plugin configuration was invalid
    #[error("plugin configuration error: {0}")]
    Configuration(String),
}

/// Error type for failures inside hook callbacks.
///
/// The host catches these per-callback; a failing callback never aborts the
/// firing of remaining callbacks.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Callback returned an error
    #[error("hook callback failed: {0}")]
    Callback(String),

    /// Callback panicked (converted by the host's isolation layer)
    #[error("hook callback panicked: {0}")]
    Panic(String),
}

/// Boxed future returned by hook callbacks.
pub type HookFuture = BoxFuture<'static, Result<(), HookError>>;

/// A hook callback: invoked with a fresh request-scoped context on every
/// firing of the hook it is registered against.
pub type HookCallback = Arc<dyn Fn(HookContext) -> HookFuture + Send + Sync>;

/// Wrap an async closure into a [`HookCallback`].
///
/// ```rust
/// use atrium_plugin_api::hook_fn;
///
/// let cb = hook_fn(|_ctx| async move { Ok(()) });
/// ```
pub fn hook_fn<F, Fut>(f: F) -> HookCallback
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HookError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Capability for composing the admin sidebar during an `admin_menu` firing.
///
/// Implemented by the host's request-scoped composition context. Registering
/// the same top-level page id twice overwrites the previous entry, so
/// callbacks are safe to run on every request without accumulating
/// duplicates. Submenu pages registered before their parent are buffered and
/// resolved at the end of the firing.
pub trait MenuComposer: Send + Sync {
    /// Register (or overwrite) a top-level menu page.
    fn add_menu_page(&self, spec: MenuPageSpec);

    /// Register a submenu page under the given parent id.
    fn add_submenu_page(&self, parent_id: &str, spec: MenuSubPageSpec);
}

/// Request-scoped context handed to every hook callback.
///
/// Cheap to clone; the menu composer is shared across all callbacks of one
/// firing and discarded afterwards.
#[derive(Clone)]
pub struct HookContext {
    /// Route of the request that triggered the firing, if any
    pub route: Option<String>,

    /// Hook-specific payload (Null for hooks that carry no data)
    pub payload: serde_json::Value,

    menu: Option<Arc<dyn MenuComposer>>,
}

impl HookContext {
    /// Create an empty context for hooks that carry no data.
    pub fn empty() -> Self {
        Self {
            route: None,
            payload: serde_json::Value::Null,
            menu: None,
        }
    }

    /// Create a context for an `admin_menu` firing.
    pub fn admin_menu(menu: Arc<dyn MenuComposer>, route: Option<String>) -> Self {
        Self {
            route,
            payload: serde_json::Value::Null,
            menu: Some(menu),
        }
    }

    /// Create a context carrying an arbitrary payload.
    pub fn with_payload(payload: serde_json::Value) -> Self {
        Self {
            route: None,
            payload,
            menu: None,
        }
    }

    /// The menu composer, present only for `admin_menu` firings.
    pub fn menu(&self) -> Option<&Arc<dyn MenuComposer>> {
        self.menu.as_ref()
    }
}

impl std::fmt::Debug for HookContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookContext")
            .field("route", &self.route)
            .field("payload", &self.payload)
            .field("has_menu", &self.menu.is_some())
            .finish()
    }
}

/// Specification of a top-level admin menu page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuPageSpec {
    /// Unique id across all top-level pages (e.g. "chats")
    pub id: String,

    /// Human-readable label
    pub label: String,

    /// Icon reference (front-end icon name)
    #[serde(default)]
    pub icon: Option<String>,

    /// Coarse permission tag (default "read")
    pub capability: String,

    /// Sort key, ascending; ties broken by id
    #[serde(default)]
    pub priority: i64,

    /// Route this page links to, if it renders a routed view
    #[serde(default)]
    pub path: Option<String>,
}

impl MenuPageSpec {
    /// Create a page spec with the default capability and priority 0.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            icon: None,
            capability: DEFAULT_CAPABILITY.to_string(),
            priority: 0,
            path: None,
        }
    }

    /// Set the icon reference
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Set the capability tag
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = capability.into();
        self
    }

    /// Set the sort priority
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the route path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Specification of a submenu page nested under a top-level page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuSubPageSpec {
    /// Unique id within the parent page
    pub id: String,

    /// Human-readable label
    pub label: String,

    /// Icon reference (front-end icon name)
    #[serde(default)]
    pub icon: Option<String>,

    /// Coarse permission tag (default "read")
    pub capability: String,

    /// Sort key within the parent, ascending; ties broken by id
    #[serde(default)]
    pub priority: i64,

    /// Route this page links to
    #[serde(default)]
    pub path: Option<String>,
}

impl MenuSubPageSpec {
    /// Create a submenu spec with the default capability and priority 0.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            icon: None,
            capability: DEFAULT_CAPABILITY.to_string(),
            priority: 0,
            path: None,
        }
    }

    /// Set the icon reference
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Set the capability tag
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = capability.into();
        self
    }

    /// Set the sort priority
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the route path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// A full-page admin view registered by a plugin during `load()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewSpec {
    /// View title shown in the admin UI
    pub title: String,

    /// Client component name rendering this view
    pub component: String,

    /// Route the view is mounted at
    #[serde(default)]
    pub path: Option<String>,
}

impl ViewSpec {
    /// Create a view spec.
    pub fn new(title: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            component: component.into(),
            path: None,
        }
    }

    /// Set the mount route
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Capability set handed to every plugin's `load()`.
///
/// The host scopes one instance per plugin, so registrations are attributed
/// to the owning slug without the plugin passing it explicitly.
pub trait HostApi: Send + Sync {
    /// Slug of the plugin this API instance is scoped to.
    fn slug(&self) -> &str;

    /// Register a callback against a named hook. Callbacks run in
    /// registration order each time the hook fires.
    fn on(&self, hook: &str, callback: HookCallback);

    /// Convenience for `on(ADMIN_MENU_HOOK, ...)`.
    fn on_admin_menu(&self, callback: HookCallback) {
        self.on(ADMIN_MENU_HOOK, callback);
    }

    /// Register this plugin's admin view.
    fn register_view(&self, view: ViewSpec);
}

/// A loadable plugin module.
///
/// `load()` is invoked exactly once per process lifetime (or per intentional
/// reload). All hook and view registration happens here, synchronously or
/// asynchronously; the host awaits completion before loading the next plugin
/// so registration order is deterministic.
#[async_trait]
pub trait PluginModule: Send + Sync {
    /// Load the plugin, registering its hooks and views through `api`.
    async fn load(&self, api: &dyn HostApi) -> Result<(), PluginApiError>;
}

/// Constructor function producing a plugin module instance.
pub type ModuleCtor = fn() -> Box<dyn PluginModule>;

/// Compile-time plugin registration entry.
///
/// Collected via the `inventory` crate; the host resolves a discovered
/// plugin directory to its module by matching slugs against this table.
pub struct PluginRegistration {
    /// Plugin slug, matching the plugin's directory name
    pub slug: &'static str,

    /// Factory for the plugin module
    pub construct: ModuleCtor,
}

impl PluginRegistration {
    /// Create a registration entry.
    pub const fn new(slug: &'static str, construct: ModuleCtor) -> Self {
        Self { slug, construct }
    }
}

inventory::collect!(PluginRegistration);

/// Register a plugin module with the host.
///
/// Wraps the `inventory::submit!` boilerplate. The registering crate must
/// depend on `inventory` directly.
///
/// # Example
///
/// ```ignore
/// atrium_plugin_api::register_plugin!("chat-plugin", || Box::new(ChatPlugin));
/// ```
#[macro_export]
macro_rules! register_plugin {
    ($slug:expr, $ctor:expr) => {
        ::inventory::submit! {
            $crate::PluginRegistration::new($slug, $ctor)
        }
    };
}

/// Prelude module for plugin development.
///
/// ```ignore
/// use atrium_plugin_api::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        hook_fn, HookCallback, HookContext, HookError, HostApi, MenuComposer, MenuPageSpec,
        MenuSubPageSpec, PluginApiError, PluginModule, PluginRegistration, ViewSpec,
        ADMIN_MENU_HOOK,
    };

    // Re-export commonly needed external crates
    pub use async_trait::async_trait;
    pub use inventory;
    pub use serde_json::Value;
    pub use std::sync::Arc;
}
