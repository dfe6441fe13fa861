//! Plugin Runtime for the Atrium Host
//!
//! This module provides the host side of the plugin architecture:
//! - Discovery of plugin directories under the plugins root
//! - A hook registry with ordered, panic-isolated async firing
//! - Admin menu composition over the `admin_menu` hook
//! - Sequential plugin loading with a broken-plugin threshold
//! - SQLite-persisted activation state and migration audit log
//! - The client component build pipeline
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Plugin Runtime                             │
//! │  discovery ──▶ store reconcile ──▶ loader ──▶ hook registry      │
//! │                     │                              │             │
//! │                 migrations                    menu / views       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`manager::PluginManager`] is the facade the binary and the management
//! surface talk to; the submodules are usable on their own in tests.

pub mod build;
pub mod discovery;
pub mod hooks;
pub mod isolation;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod menu;
pub mod migrate;
pub mod store;

// Re-exports for convenience
pub use build::{BuildOutcome, BuildReport, ComponentBuilder, ImportMap};
pub use discovery::{DiscoveryReport, discover_plugins};
pub use hooks::{FireReport, HookRegistry, HookStats};
pub use lifecycle::PluginState;
pub use loader::{LoadError, ModuleResolver, PluginLoader, StaticModuleResolver};
pub use manager::{ManagerError, PluginManager, PluginOverview, ValidationReport};
pub use manifest::PluginManifest;
pub use menu::{AdminMenuContext, CompositionOutcome, MenuTree};
pub use migrate::MigrationRunner;
pub use store::{MigrationDirection, PluginRecord, PluginStore};
