//! Lathe Dev Bridge
//!
//! Filter-dispatched plugin pipeline for the Lathe bundler, plus the
//! SSE session bridge its dev server exposes to MCP clients.

pub mod config;
pub mod error;
pub mod filter;
pub mod manifest;
pub mod module;
pub mod plugin;
pub mod plugins;
pub mod session;
pub mod state;
pub mod virtualmod;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use error::{PipelineError, Result};
pub use plugin::{HookStageDispatcher, Plugin, PluginRegistry};
pub use state::AppState;
