//! Parsing and validation of `tpo.toml` orchestrator configuration files.
//!
//! This crate reads the optional configuration file and produces a
//! strongly-typed [`OrchestratorConfig`], and resolves platform names to
//! [`PlatformDescriptor`](tpo_common::PlatformDescriptor)s from either the
//! file or the built-in board presets.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod presets;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, load_or_default, CONFIG_FILE};
pub use presets::{preset, preset_names};
pub use resolve::resolve_platform;
pub use types::*;
