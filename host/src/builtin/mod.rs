//! Built-in System Plugin
//!
//! Ships the baseline admin surface (dashboard, settings) through the same
//! plugin machinery external plugins use, so the menu pipeline has no
//! special cases for host-owned pages.

use async_trait::async_trait;

use atrium_plugin_api::prelude::*;

/// Slug of the built-in plugin; a matching directory must exist under the
/// plugins root for it to be discovered.
pub const SYSTEM_PLUGIN_SLUG: &str = "system";

struct SystemPlugin;

#[async_trait]
impl PluginModule for SystemPlugin {
    async fn load(&self, api: &dyn HostApi) -> Result<(), PluginApiError> {
        api.on_admin_menu(hook_fn(|ctx| async move {
            if let Some(menu) = ctx.menu() {
                menu.add_menu_page(
                    MenuPageSpec::new("dashboard", "Dashboard")
                        .with_icon("layout-dashboard")
                        .with_priority(0)
                        .with_path("/"),
                );
                menu.add_menu_page(
                    MenuPageSpec::new("settings", "Settings")
                        .with_icon("settings")
                        .with_priority(90)
                        .with_path("/settings"),
                );
                menu.add_submenu_page(
                    "settings",
                    MenuSubPageSpec::new("appearance", "Appearance")
                        .with_path("/settings/appearance"),
                );
                menu.add_submenu_page(
                    "settings",
                    MenuSubPageSpec::new("plugins", "Plugins")
                        .with_priority(10)
                        .with_path("/settings/plugins"),
                );
            }
            Ok(())
        }));

        api.register_view(ViewSpec::new("Dashboard", "SystemDashboard").with_path("/"));
        Ok(())
    }
}

atrium_plugin_api::register_plugin!(SYSTEM_PLUGIN_SLUG, || Box::new(SystemPlugin));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::menu::AdminMenuContext;
    use std::sync::Arc;

    struct RecordingApi {
        menu_callbacks: parking_lot::Mutex<Vec<HookCallback>>,
        views: parking_lot::Mutex<Vec<ViewSpec>>,
    }

    impl HostApi for RecordingApi {
        fn slug(&self) -> &str {
            SYSTEM_PLUGIN_SLUG
        }

        fn on(&self, hook: &str, callback: HookCallback) {
            assert_eq!(hook, ADMIN_MENU_HOOK);
            self.menu_callbacks.lock().push(callback);
        }

        fn register_view(&self, view: ViewSpec) {
            self.views.lock().push(view);
        }
    }

    #[tokio::test]
    async fn test_system_plugin_composes_baseline_menu() {
        let api = RecordingApi {
            menu_callbacks: parking_lot::Mutex::new(Vec::new()),
            views: parking_lot::Mutex::new(Vec::new()),
        };
        SystemPlugin.load(&api).await.unwrap();

        let composer = Arc::new(AdminMenuContext::new());
        let ctx = HookContext::admin_menu(composer.clone(), None);
        for callback in api.menu_callbacks.lock().iter() {
            callback(ctx.clone()).await.unwrap();
        }

        let tree = composer.finish().tree;
        assert_eq!(tree.pages[0].id, "dashboard");
        let settings = tree.page("settings").unwrap();
        assert_eq!(settings.children.len(), 2);
        assert_eq!(settings.children[0].id, "appearance");

        assert_eq!(api.views.lock()[0].component, "SystemDashboard");
    }
}
