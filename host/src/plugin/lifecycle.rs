//! Plugin Lifecycle States
//!
//! Per-plugin state machine driven by the loader:
//!
//! ```text
//!     +-------------+
//!     | Discovered  |  (manifest found)
//!     +------+------+
//!            |  is_active && !is_broken
//!            v
//!     +------+------+
//!     |   Loading   |  (load() invoked)
//!     +------+------+
//!            |
//!     +------+------+
//!     |             |
//!     v             v
//! +---+----+  +-----+------+
//! | Loaded |  | LoadFailed |--(threshold)--> Broken
//! +--------+  +------------+
//! ```
//!
//! `Broken` plugins are never invoked again until an operator resets them.

use serde::Serialize;

/// Plugin lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Manifest discovered; not loaded this process
    Discovered,

    /// `load()` is executing
    Loading,

    /// `load()` completed successfully
    Loaded,

    /// `load()` or module resolution failed
    LoadFailed,

    /// Failure threshold crossed; skipped until explicitly reset
    Broken,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Discovered => write!(f, "discovered"),
            PluginState::Loading => write!(f, "loading"),
            PluginState::Loaded => write!(f, "loaded"),
            PluginState::LoadFailed => write!(f, "load_failed"),
            PluginState::Broken => write!(f, "broken"),
        }
    }
}

impl PluginState {
    /// Whether the loader may attempt (another) load from this state.
    pub fn can_load(&self) -> bool {
        matches!(self, PluginState::Discovered | PluginState::LoadFailed)
    }
}
