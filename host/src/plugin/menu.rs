//! Sidebar/Menu Composition
//!
//! Built on top of the hook registry's `admin_menu` hook. Each firing passes
//! a fresh, request-scoped [`AdminMenuContext`] to every callback; after the
//! firing completes, [`AdminMenuContext::finish`] flattens the registrations
//! into a single ordered [`MenuTree`].
//!
//! Composition is an explicit two-pass algorithm: pass 1 collects top-level
//! and submenu registrations into temporary lists while callbacks run; pass 2
//! resolves parent links, drops unresolved submenus (logged, never merged
//! into a wrong parent), and sorts everything by (priority, id).
//!
//! Registering the same top-level id twice overwrites the previous entry
//! (last-writer-wins), so callbacks are safe to run on every request without
//! accumulating duplicates.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use atrium_plugin_api::{MenuComposer, MenuPageSpec, MenuSubPageSpec};

/// A flattened submenu page
#[derive(Debug, Clone, Serialize)]
pub struct MenuSubPage {
    pub id: String,
    pub label: String,
    pub icon: Option<String>,
    pub capability: String,
    pub priority: i64,
    pub path: Option<String>,
}

impl From<MenuSubPageSpec> for MenuSubPage {
    fn from(spec: MenuSubPageSpec) -> Self {
        Self {
            id: spec.id,
            label: spec.label,
            icon: spec.icon,
            capability: spec.capability,
            priority: spec.priority,
            path: spec.path,
        }
    }
}

/// A flattened top-level page with its ordered submenus
#[derive(Debug, Clone, Serialize)]
pub struct MenuPage {
    pub id: String,
    pub label: String,
    pub icon: Option<String>,
    pub capability: String,
    pub priority: i64,
    pub path: Option<String>,
    pub children: Vec<MenuSubPage>,
}

/// The ordered menu tree serialized for the client
#[derive(Debug, Clone, Default, Serialize)]
pub struct MenuTree {
    pub pages: Vec<MenuPage>,
}

/// The menu item matching the current route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveMenuItem {
    /// Top-level page id
    pub page_id: String,

    /// Submenu id, when the match is a submenu path
    pub submenu_id: Option<String>,
}

impl MenuTree {
    /// Find a top-level page by id.
    pub fn page(&self, id: &str) -> Option<&MenuPage> {
        self.pages.iter().find(|p| p.id == id)
    }

    /// Which page matches `route`, by longest-prefix match against every
    /// page and submenu path.
    pub fn match_route(&self, route: &str) -> Option<ActiveMenuItem> {
        let mut best: Option<(usize, ActiveMenuItem)> = None;

        let mut consider = |path: &Option<String>, item: ActiveMenuItem| {
            if let Some(path) = path
                && route.starts_with(path.as_str())
                && best.as_ref().map(|(len, _)| path.len() > *len).unwrap_or(true)
            {
                best = Some((path.len(), item));
            }
        };

        for page in &self.pages {
            consider(
                &page.path,
                ActiveMenuItem {
                    page_id: page.id.clone(),
                    submenu_id: None,
                },
            );
            for child in &page.children {
                consider(
                    &child.path,
                    ActiveMenuItem {
                        page_id: page.id.clone(),
                        submenu_id: Some(child.id.clone()),
                    },
                );
            }
        }

        best.map(|(_, item)| item)
    }
}

/// A submenu whose parent never appeared within the firing
#[derive(Debug, Clone, Serialize)]
pub struct OrphanSubmenu {
    pub parent_id: String,
    pub submenu_id: String,
}

/// Result of flattening one firing's registrations
#[derive(Debug)]
pub struct CompositionOutcome {
    /// The ordered tree
    pub tree: MenuTree,

    /// Submenus dropped because their parent was never registered
    pub orphans: Vec<OrphanSubmenu>,
}

#[derive(Default)]
struct MenuDraft {
    /// Top-level specs in insertion order; duplicates replaced in place
    tops: Vec<MenuPageSpec>,
    top_index: HashMap<String, usize>,

    /// Submenu registrations in insertion order, resolved in pass 2
    subs: Vec<(String, MenuSubPageSpec)>,
}

/// Request-scoped composition context for one `admin_menu` firing.
///
/// Shared across that firing's callbacks through the hook context and
/// discarded afterwards; nothing here outlives the request.
#[derive(Default)]
pub struct AdminMenuContext {
    draft: Mutex<MenuDraft>,
}

impl AdminMenuContext {
    /// Create a fresh context for one firing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass 2: resolve parent links, drop orphans, sort, and flatten.
    pub fn finish(&self) -> CompositionOutcome {
        let draft = std::mem::take(&mut *self.draft.lock());

        let mut pages: Vec<MenuPage> = draft
            .tops
            .into_iter()
            .map(|spec| MenuPage {
                id: spec.id,
                label: spec.label,
                icon: spec.icon,
                capability: spec.capability,
                priority: spec.priority,
                path: spec.path,
                children: Vec::new(),
            })
            .collect();

        let index: HashMap<String, usize> = pages
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();

        let mut orphans = Vec::new();
        for (parent_id, spec) in draft.subs {
            match index.get(&parent_id) {
                Some(&i) => pages[i].children.push(spec.into()),
                None => {
                    tracing::warn!(
                        parent = %parent_id,
                        submenu = %spec.id,
                        "Dropping submenu with unknown parent"
                    );
                    orphans.push(OrphanSubmenu {
                        parent_id,
                        submenu_id: spec.id,
                    });
                }
            }
        }

        pages.sort_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)));
        for page in &mut pages {
            page.children
                .sort_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)));
        }

        CompositionOutcome {
            tree: MenuTree { pages },
            orphans,
        }
    }
}

impl MenuComposer for AdminMenuContext {
    fn add_menu_page(&self, spec: MenuPageSpec) {
        let mut draft = self.draft.lock();
        match draft.top_index.get(&spec.id) {
            // Last-writer-wins, keeping the original insertion position
            Some(&i) => draft.tops[i] = spec,
            None => {
                let idx = draft.tops.len();
                draft.top_index.insert(spec.id.clone(), idx);
                draft.tops.push(spec);
            }
        }
    }

    fn add_submenu_page(&self, parent_id: &str, spec: MenuSubPageSpec) {
        self.draft.lock().subs.push((parent_id.to_string(), spec));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_sorts_by_priority_then_id() {
        let ctx = AdminMenuContext::new();
        ctx.add_menu_page(MenuPageSpec::new("chats", "Chats").with_priority(10));
        ctx.add_menu_page(MenuPageSpec::new("admin", "Admin").with_priority(1));
        ctx.add_menu_page(MenuPageSpec::new("billing", "Billing").with_priority(1));

        let outcome = ctx.finish();
        let ids: Vec<&str> = outcome.tree.pages.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["admin", "billing", "chats"]);
        assert!(outcome.orphans.is_empty());
    }

    #[test]
    fn test_duplicate_top_level_id_overwrites() {
        let ctx = AdminMenuContext::new();
        ctx.add_menu_page(MenuPageSpec::new("chats", "Chats"));
        ctx.add_menu_page(MenuPageSpec::new("chats", "Chats v2").with_priority(5));

        let outcome = ctx.finish();
        assert_eq!(outcome.tree.pages.len(), 1);
        assert_eq!(outcome.tree.pages[0].label, "Chats v2");
        assert_eq!(outcome.tree.pages[0].priority, 5);
    }

    #[test]
    fn test_interleaved_inserts_and_overwrites_keep_index_consistent() {
        let ctx = AdminMenuContext::new();
        ctx.add_menu_page(MenuPageSpec::new("a", "A"));
        ctx.add_menu_page(MenuPageSpec::new("b", "B"));
        ctx.add_menu_page(MenuPageSpec::new("a", "A v2"));
        ctx.add_menu_page(MenuPageSpec::new("c", "C"));

        let tree = ctx.finish().tree;
        assert_eq!(tree.pages.len(), 3);
        assert_eq!(tree.page("a").unwrap().label, "A v2");
        assert_eq!(tree.page("c").unwrap().label, "C");
    }

    #[test]
    fn test_submenu_before_parent_resolves_within_firing() {
        let ctx = AdminMenuContext::new();
        ctx.add_submenu_page("settings", MenuSubPageSpec::new("appearance", "Appearance"));
        ctx.add_menu_page(MenuPageSpec::new("settings", "Settings"));

        let outcome = ctx.finish();
        let page = outcome.tree.page("settings").unwrap();
        assert_eq!(page.children.len(), 1);
        assert_eq!(page.children[0].id, "appearance");
        assert!(outcome.orphans.is_empty());
    }

    #[test]
    fn test_orphan_submenu_is_dropped_and_reported() {
        let ctx = AdminMenuContext::new();
        ctx.add_menu_page(MenuPageSpec::new("settings", "Settings"));
        ctx.add_submenu_page("nonexistent", MenuSubPageSpec::new("lost", "Lost"));

        let outcome = ctx.finish();
        assert!(outcome.tree.page("settings").unwrap().children.is_empty());
        assert_eq!(outcome.orphans.len(), 1);
        assert_eq!(outcome.orphans[0].parent_id, "nonexistent");
        assert_eq!(outcome.orphans[0].submenu_id, "lost");
    }

    #[test]
    fn test_match_route_prefers_longest_prefix() {
        let ctx = AdminMenuContext::new();
        ctx.add_menu_page(MenuPageSpec::new("settings", "Settings").with_path("/settings"));
        ctx.add_submenu_page(
            "settings",
            MenuSubPageSpec::new("appearance", "Appearance").with_path("/settings/appearance"),
        );

        let tree = ctx.finish().tree;

        let hit = tree.match_route("/settings/appearance/theme").unwrap();
        assert_eq!(hit.page_id, "settings");
        assert_eq!(hit.submenu_id.as_deref(), Some("appearance"));

        let hit = tree.match_route("/settings/security").unwrap();
        assert_eq!(hit.submenu_id, None);

        assert_eq!(tree.match_route("/unrelated"), None);
    }

    #[test]
    fn test_composition_is_deterministic() {
        let build = || {
            let ctx = AdminMenuContext::new();
            ctx.add_menu_page(MenuPageSpec::new("b", "B").with_priority(2));
            ctx.add_menu_page(MenuPageSpec::new("a", "A").with_priority(2));
            ctx.add_submenu_page("a", MenuSubPageSpec::new("z", "Z"));
            ctx.add_submenu_page("a", MenuSubPageSpec::new("y", "Y"));
            serde_json::to_string(&ctx.finish().tree).unwrap()
        };
        assert_eq!(build(), build());
    }
}
