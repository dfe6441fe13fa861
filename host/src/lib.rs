pub mod builtin;
pub mod config;
pub mod plugin;

// Re-export commonly used items for convenience
pub use config::HostConfig;
pub use plugin::{PluginManager, StaticModuleResolver};
