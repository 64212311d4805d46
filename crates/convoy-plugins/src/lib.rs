//! # convoy-plugins
//!
//! Execution backends behind the uniform [`Plugin`] capability
//! (`configure`, `check`, `process`).
//!
//! - [`ShellPlugin`] - runs SHELL activities in a subprocess
//! - [`LocalTransferPlugin`] - copies local files for TRANSFER activities
//! - [`PluginRegistry`] - capability name to plugin, built once at startup
//!
//! **Warning**: the shell plugin provides NO isolation. Only run campaigns
//! from trusted submitters.

mod error;
mod registry;
mod shell;
mod traits;
mod transfer;

pub use error::PluginError;
pub use registry::PluginRegistry;
pub use shell::ShellPlugin;
pub use traits::{Plugin, PluginOutcome, PluginRequest, Validation};
pub use transfer::LocalTransferPlugin;
