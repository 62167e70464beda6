//! Application configuration module.
//!
//! Manages the TOML config file holding repair settings, fetch client
//! settings and the list of EPG sources.

#[allow(clippy::module_inception)]
mod config;
mod paths;

#[allow(clippy::module_name_repetitions)]
pub use config::{AppConfig, FetchConfig, SourceConfig, parse_window_end};
pub use paths::resolve_config_path;
